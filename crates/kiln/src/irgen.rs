//! IR generation: graph nodes to instruction streams.
//!
//! Nodes are visited in dependency order (producers strictly before
//! consumers). For each node, resolution order is: manual rule from the
//! active [`IrGenRuleSet`], then the schema's auto-IRGen binding, then
//! [`IrGenError::NoRule`]. Graph outputs are materialized by a trailing Copy
//! instruction per output placeholder, so node results always land in
//! shareable temporaries.

use std::collections::{BTreeMap, HashMap, HashSet};

use smallvec::SmallVec;

use crate::backend::IrGenError;
use crate::graph::{Graph, Node, NodeId, PlaceholderId, ValueRef};
use crate::ir::{AllocId, Buffer, BufferId, Instr, InstrOperand, IrModule};
use crate::schema::{self, InstKind, OpKind, OperandKind};
use crate::types::{MemberValue, TypeDesc};

/// Manual emission rule for one node; wins over any auto binding.
pub type ManualRule = fn(&Node, &mut IrBuilder<'_>) -> Result<(), IrGenError>;

/// Manual IR-generation rules keyed by node kind.
#[derive(Clone, Default)]
pub struct IrGenRuleSet {
    rules: HashMap<OpKind, ManualRule>,
}

impl IrGenRuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, kind: OpKind, rule: ManualRule) {
        self.rules.insert(kind, rule);
    }

    pub fn get(&self, kind: OpKind) -> Option<ManualRule> {
        self.rules.get(&kind).copied()
    }

    pub fn contains(&self, kind: OpKind) -> bool {
        self.rules.contains_key(&kind)
    }
}

/// Whether IR can be emitted for the kind under the given rule set.
pub fn has_rule(kind: OpKind, rules: &IrGenRuleSet) -> bool {
    rules.contains(kind) || schema::auto_irgen_for(kind).is_some()
}

/// Emission state handed to manual rules.
pub struct IrBuilder<'g> {
    graph: &'g Graph,
    buffers: Vec<Buffer>,
    instrs: Vec<Instr>,
    placeholder_buffers: HashMap<PlaceholderId, BufferId>,
    value_buffers: HashMap<(NodeId, usize), BufferId>,
    read_placeholders: Vec<PlaceholderId>,
    seen_reads: HashSet<PlaceholderId>,
}

impl<'g> IrBuilder<'g> {
    fn new(graph: &'g Graph) -> Self {
        Self {
            graph,
            buffers: Vec::new(),
            instrs: Vec::new(),
            placeholder_buffers: HashMap::new(),
            value_buffers: HashMap::new(),
            read_placeholders: Vec::new(),
            seen_reads: HashSet::new(),
        }
    }

    fn alloc_buffer(
        &mut self,
        name: String,
        ty: TypeDesc,
        placeholder: Option<PlaceholderId>,
    ) -> BufferId {
        let id = BufferId(self.buffers.len() as u32);
        self.buffers.push(Buffer {
            id,
            name,
            ty,
            placeholder,
            alloc: AllocId(id.0),
        });
        id
    }

    fn placeholder_buffer(&mut self, ph: PlaceholderId) -> BufferId {
        if let Some(&id) = self.placeholder_buffers.get(&ph) {
            return id;
        }
        let (name, ty) = {
            let placeholder = self
                .graph
                .placeholder(ph)
                .expect("verified graph resolves placeholders");
            (placeholder.name.clone(), placeholder.ty.clone())
        };
        let id = self.alloc_buffer(name, ty, Some(ph));
        self.placeholder_buffers.insert(ph, id);
        id
    }

    fn resolve(&mut self, value: ValueRef, user: &str, input: usize) -> Result<BufferId, IrGenError> {
        match value {
            ValueRef::Placeholder(ph) => {
                let id = self.placeholder_buffer(ph);
                if self.seen_reads.insert(ph) {
                    self.read_placeholders.push(ph);
                }
                Ok(id)
            }
            ValueRef::Node { node: producer, result } => self
                .value_buffers
                .get(&(producer, result))
                .copied()
                .ok_or_else(|| IrGenError::MissingProducer {
                    node: user.to_string(),
                    input,
                }),
        }
    }

    /// Buffer holding the node's `index`-th input.
    pub fn input_buffer(&mut self, node: &Node, index: usize) -> Result<BufferId, IrGenError> {
        let value = *node
            .inputs
            .get(index)
            .ok_or_else(|| IrGenError::MissingProducer {
                node: node.name.clone(),
                input: index,
            })?;
        self.resolve(value, &node.name, index)
    }

    /// Fresh temporary for the node's `index`-th result. Idempotent per
    /// (node, result).
    pub fn result_buffer(&mut self, node: &Node, index: usize) -> BufferId {
        if let Some(&id) = self.value_buffers.get(&(node.id, index)) {
            return id;
        }
        let ty = node.results[index].clone();
        let id = self.alloc_buffer(format!("{}.{index}", node.name), ty, None);
        self.value_buffers.insert((node.id, index), id);
        id
    }

    fn bind_result(&mut self, node: &Node, index: usize, buffer: BufferId) {
        self.value_buffers.insert((node.id, index), buffer);
    }

    /// Appends an instruction. `buffers` align positionally with the kind's
    /// registered operands; roles, the data-parallel flag and required-member
    /// validation all come from the schema record.
    pub fn emit(
        &mut self,
        kind: InstKind,
        name: impl Into<String>,
        buffers: &[BufferId],
        members: BTreeMap<String, MemberValue>,
    ) -> Result<(), IrGenError> {
        let name = name.into();
        let def = schema::inst_def(kind).ok_or_else(|| IrGenError::UnknownInstKind {
            node: name.clone(),
            kind: schema::inst_name(kind),
        })?;
        if buffers.len() != def.operands.len() {
            return Err(IrGenError::OperandArity {
                node: name,
                kind: def.name,
                expected: def.operands.len(),
                found: buffers.len(),
            });
        }
        for member in &def.members {
            if !members.contains_key(member) {
                return Err(IrGenError::MissingMember {
                    node: name,
                    kind: def.name,
                    member: member.clone(),
                });
            }
        }
        let operands: SmallVec<[InstrOperand; 4]> = buffers
            .iter()
            .zip(def.operands.iter())
            .map(|(&buffer, (_, role))| InstrOperand {
                buffer,
                kind: *role,
            })
            .collect();
        self.instrs.push(Instr {
            kind,
            name,
            operands,
            members,
            data_parallel: def.data_parallel,
        });
        Ok(())
    }

    /// Structural emission via the kind's auto binding: In operands take node
    /// inputs in order, Out operands take node results in order, InOut
    /// operands take one of each and alias them.
    fn emit_auto(&mut self, node: &Node, inst: InstKind) -> Result<(), IrGenError> {
        let def = schema::inst_def(inst).ok_or_else(|| IrGenError::UnknownInstKind {
            node: node.name.clone(),
            kind: schema::inst_name(inst),
        })?;
        let mut buffers = Vec::with_capacity(def.operands.len());
        let mut next_input = 0;
        let mut next_result = 0;
        for (_, role) in &def.operands {
            let buffer = match role {
                OperandKind::In => {
                    let b = self.input_buffer(node, next_input)?;
                    next_input += 1;
                    b
                }
                OperandKind::Out => {
                    let b = self.result_buffer(node, next_result);
                    next_result += 1;
                    b
                }
                OperandKind::InOut => {
                    let b = self.input_buffer(node, next_input)?;
                    next_input += 1;
                    self.bind_result(node, next_result, b);
                    next_result += 1;
                    b
                }
            };
            buffers.push(buffer);
        }
        if next_input != node.inputs.len() || next_result != node.results.len() {
            return Err(IrGenError::OperandArity {
                node: node.name.clone(),
                kind: def.name,
                expected: def.operands.len(),
                found: node.inputs.len() + node.results.len(),
            });
        }
        let mut members = BTreeMap::new();
        for member in &def.members {
            let value =
                node.members
                    .get(member)
                    .cloned()
                    .ok_or_else(|| IrGenError::MissingMember {
                        node: node.name.clone(),
                        kind: def.name.clone(),
                        member: member.clone(),
                    })?;
            members.insert(member.clone(), value);
        }
        self.emit(inst, node.name.clone(), &buffers, members)
    }

    fn finish(mut self) -> Result<IrModule, IrGenError> {
        let outputs: Vec<(PlaceholderId, ValueRef)> = self
            .graph
            .outputs()
            .iter()
            .map(|o| (o.placeholder, o.value))
            .collect();
        let copy = schema::builtin::copy_inst();
        let mut output_buffers = Vec::with_capacity(outputs.len());
        for (ph, value) in outputs {
            let dest = self.placeholder_buffer(ph);
            let ph_name = self
                .graph
                .placeholder(ph)
                .expect("verified graph resolves placeholders")
                .name
                .clone();
            let src = self.resolve(value, &ph_name, 0)?;
            self.emit(copy, format!("{ph_name}.save"), &[dest, src], BTreeMap::new())?;
            output_buffers.push((ph, dest));
        }
        let inputs = self
            .read_placeholders
            .iter()
            .map(|&ph| (ph, self.placeholder_buffers[&ph]))
            .collect();
        Ok(IrModule {
            name: self.graph.name().to_string(),
            buffers: self.buffers,
            instrs: self.instrs,
            inputs,
            outputs: output_buffers,
        })
    }
}

/// Generates an instruction stream for every node reachable from a graph
/// output, plus the trailing output copies.
pub fn generate(graph: &Graph, rules: &IrGenRuleSet) -> Result<IrModule, IrGenError> {
    let mut builder = IrBuilder::new(graph);
    for id in topo_order(graph) {
        let node = graph.node(id).expect("ordered ids are live");
        if let Some(rule) = rules.get(node.kind) {
            rule(node, &mut builder)?;
        } else if let Some(inst) = schema::auto_irgen_for(node.kind) {
            builder.emit_auto(node, inst)?;
        } else {
            return Err(IrGenError::NoRule {
                node: node.name.clone(),
                kind: schema::op_name(node.kind),
            });
        }
    }
    builder.finish()
}

/// Nodes reachable from the graph outputs, producers before consumers.
/// Assumes the graph verified acyclic.
fn topo_order(graph: &Graph) -> Vec<NodeId> {
    let mut order = Vec::new();
    let mut visited: HashSet<NodeId> = HashSet::new();
    for output in graph.outputs() {
        let ValueRef::Node { node, .. } = output.value else {
            continue;
        };
        if visited.contains(&node) {
            continue;
        }
        let mut stack: Vec<(NodeId, usize)> = vec![(node, 0)];
        visited.insert(node);
        while let Some((id, child)) = stack.pop() {
            let current = graph.node(id).expect("verified graph resolves nodes");
            if child >= current.inputs.len() {
                order.push(id);
                continue;
            }
            stack.push((id, child + 1));
            if let ValueRef::Node { node: dep, .. } = current.inputs[child] {
                if visited.insert(dep) {
                    stack.push((dep, 0));
                }
            }
        }
    }
    order
}
