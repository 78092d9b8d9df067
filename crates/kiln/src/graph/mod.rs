//! Graph-level representation.
//!
//! A [`Graph`] is an owned DAG of [`Node`]s over named [`Placeholder`]s,
//! mutable during compilation through a small transactional interface:
//! batch edits with [`Graph::add_node`], [`Graph::replace_all_uses`] and
//! [`Graph::remove_node`], then re-establish invariants with
//! [`Graph::verify`].

mod build;
mod verify;

pub use build::GraphBuilder;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::schema::{self, OpKind};
use crate::types::{MemberValue, TypeDesc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlaceholderId(pub u32);

/// Reference to a value consumed by a node or bound to an output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueRef {
    /// The `result`-th result of another node.
    Node { node: NodeId, result: usize },
    /// The value bound to a placeholder at execution time.
    Placeholder(PlaceholderId),
}

#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub kind: OpKind,
    pub name: String,
    pub inputs: Vec<ValueRef>,
    pub results: Vec<TypeDesc>,
    pub members: BTreeMap<String, MemberValue>,
}

impl Node {
    pub fn result(&self, index: usize) -> ValueRef {
        ValueRef::Node {
            node: self.id,
            result: index,
        }
    }
}

/// Named symbolic tensor bound to concrete storage at execution time.
#[derive(Debug, Clone)]
pub struct Placeholder {
    pub id: PlaceholderId,
    pub name: String,
    pub ty: TypeDesc,
}

/// Binding of a computed value to an output placeholder.
#[derive(Debug, Clone, Copy)]
pub struct Output {
    pub placeholder: PlaceholderId,
    pub value: ValueRef,
}

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("node '{user}' references unknown node id {node}")]
    UnknownNode { user: String, node: u32 },
    #[error("'{user}' references unknown placeholder id {placeholder}")]
    UnknownPlaceholder { user: String, placeholder: u32 },
    #[error("node '{user}' references result {index} of '{producer}', which has {count} results")]
    ResultIndexOutOfRange {
        user: String,
        producer: String,
        index: usize,
        count: usize,
    },
    #[error("graph contains a cycle through node '{node}'")]
    Cycle { node: String },
    #[error("cannot remove node '{node}': {uses} live use(s) remain")]
    NodeInUse { node: String, uses: usize },
    #[error("node '{node}' of kind '{kind}' expects {expected} input(s), found {found}")]
    InputArity {
        node: String,
        kind: String,
        expected: usize,
        found: usize,
    },
    #[error("node '{node}' result type {found} does not match input {input} type {expected}")]
    ResultType {
        node: String,
        input: usize,
        expected: TypeDesc,
        found: TypeDesc,
    },
    #[error("output bound to '{placeholder}' has type {found}, placeholder expects {expected}")]
    OutputType {
        placeholder: String,
        expected: TypeDesc,
        found: TypeDesc,
    },
    #[error("node '{node}' declares no results")]
    NoResults { node: String },
}

/// Owned dataflow graph handed to a backend for compilation.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    name: String,
    nodes: Vec<Node>,
    placeholders: Vec<Placeholder>,
    outputs: Vec<Output>,
    next_node: u32,
}

impl Graph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_placeholder(&mut self, name: impl Into<String>, ty: TypeDesc) -> PlaceholderId {
        let id = PlaceholderId(self.placeholders.len() as u32);
        self.placeholders.push(Placeholder {
            id,
            name: name.into(),
            ty,
        });
        id
    }

    pub fn add_node(
        &mut self,
        kind: OpKind,
        name: impl Into<String>,
        inputs: Vec<ValueRef>,
        results: Vec<TypeDesc>,
        members: BTreeMap<String, MemberValue>,
    ) -> NodeId {
        let id = NodeId(self.next_node);
        self.next_node += 1;
        self.nodes.push(Node {
            id,
            kind,
            name: name.into(),
            inputs,
            results,
            members,
        });
        id
    }

    /// Binds a computed value to an output placeholder.
    pub fn mark_output(&mut self, placeholder: PlaceholderId, value: ValueRef) {
        self.outputs.push(Output { placeholder, value });
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn placeholder(&self, id: PlaceholderId) -> Option<&Placeholder> {
        self.placeholders.get(id.0 as usize)
    }

    pub fn placeholders(&self) -> impl Iterator<Item = &Placeholder> {
        self.placeholders.iter()
    }

    pub fn outputs(&self) -> &[Output] {
        &self.outputs
    }

    /// Nodes consuming the given value.
    pub fn users_of(&self, value: ValueRef) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|n| n.inputs.contains(&value))
            .map(|n| n.id)
            .collect()
    }

    /// Rewires every use of `from` (node inputs and output bindings) to `to`.
    /// Returns the number of uses rewritten.
    pub fn replace_all_uses(&mut self, from: ValueRef, to: ValueRef) -> usize {
        if from == to {
            return 0;
        }
        let mut rewired = 0;
        for node in &mut self.nodes {
            for input in &mut node.inputs {
                if *input == from {
                    *input = to;
                    rewired += 1;
                }
            }
        }
        for output in &mut self.outputs {
            if output.value == from {
                output.value = to;
                rewired += 1;
            }
        }
        rewired
    }

    /// Removes a node with no remaining uses, returning it.
    pub fn remove_node(&mut self, id: NodeId) -> Result<Node, GraphError> {
        let pos = self.nodes.iter().position(|n| n.id == id).ok_or_else(|| {
            GraphError::UnknownNode {
                user: self.name.clone(),
                node: id.0,
            }
        })?;
        let uses = self
            .nodes
            .iter()
            .flat_map(|n| n.inputs.iter())
            .chain(self.outputs.iter().map(|o| &o.value))
            .filter(|v| matches!(v, ValueRef::Node { node, .. } if *node == id))
            .count();
        if uses > 0 {
            return Err(GraphError::NodeInUse {
                node: self.nodes[pos].name.clone(),
                uses,
            });
        }
        Ok(self.nodes.remove(pos))
    }

    /// Type of the referenced value.
    pub fn value_type(&self, value: ValueRef) -> Result<&TypeDesc, GraphError> {
        self.value_type_for(value, self.name.clone())
    }

    fn value_type_for(&self, value: ValueRef, user: String) -> Result<&TypeDesc, GraphError> {
        match value {
            ValueRef::Placeholder(ph) => self
                .placeholder(ph)
                .map(|p| &p.ty)
                .ok_or(GraphError::UnknownPlaceholder {
                    user,
                    placeholder: ph.0,
                }),
            ValueRef::Node { node, result } => {
                let producer = self.node(node).ok_or_else(|| GraphError::UnknownNode {
                    user: user.clone(),
                    node: node.0,
                })?;
                producer
                    .results
                    .get(result)
                    .ok_or_else(|| GraphError::ResultIndexOutOfRange {
                        user,
                        producer: producer.name.clone(),
                        index: result,
                        count: producer.results.len(),
                    })
            }
        }
    }

    /// Checks structural and schema invariants; run after any mutation batch.
    pub fn verify(&self) -> Result<(), GraphError> {
        verify::verify(self)
    }
}

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "graph {} {{", self.name)?;
        for ph in &self.placeholders {
            writeln!(f, "  placeholder %p{} : {} // {}", ph.id.0, ph.ty, ph.name)?;
        }
        for node in &self.nodes {
            write!(f, "  %n{} = {}(", node.id.0, schema::op_name(node.kind))?;
            for (i, input) in node.inputs.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                match input {
                    ValueRef::Placeholder(ph) => write!(f, "%p{}", ph.0)?,
                    ValueRef::Node { node, result } => write!(f, "%n{}:{}", node.0, result)?,
                }
            }
            write!(f, ")")?;
            if let Some(ty) = node.results.first() {
                write!(f, " : {ty}")?;
            }
            writeln!(f, " // {}", node.name)?;
        }
        for output in &self.outputs {
            let value = match output.value {
                ValueRef::Placeholder(ph) => format!("%p{}", ph.0),
                ValueRef::Node { node, result } => format!("%n{node_id}:{result}", node_id = node.0),
            };
            writeln!(f, "  output %p{} = {}", output.placeholder.0, value)?;
        }
        write!(f, "}}")
    }
}
