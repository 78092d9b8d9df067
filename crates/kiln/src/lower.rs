//! Backend-independent lowering.
//!
//! A fixed rule table rewrites complex node kinds into simpler ones that the
//! IR generator handles directly. Backends exempt nodes they implement
//! natively through [`Backend::should_lower`]; exempted nodes pass through
//! untouched. Replacement nodes are terminal: the engine walks a snapshot of
//! the pre-lowering node list and never revisits what a rule produced.

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::backend::{Backend, CompileError, UnsupportedOperationError};
use crate::graph::{Graph, GraphError, NodeId, ValueRef};
use crate::irgen::{self, IrGenRuleSet};
use crate::schema::{self, OpKind};
use crate::types::MemberValue;

type LoweringRule = fn(&mut Graph, NodeId) -> Result<(), GraphError>;

fn rule_table() -> &'static HashMap<OpKind, LoweringRule> {
    static TABLE: OnceLock<HashMap<OpKind, LoweringRule>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table: HashMap<OpKind, LoweringRule> = HashMap::new();
        table.insert(schema::builtin::relu(), lower_relu);
        table.insert(schema::builtin::fused_mul_add(), lower_fused_mul_add);
        table
    })
}

/// Whether the fixed rule table can rewrite the kind.
pub fn lowers(kind: OpKind) -> bool {
    rule_table().contains_key(&kind)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LowerStats {
    pub lowered: usize,
}

/// Rewrites every lowerable node the backend does not exempt.
///
/// A node with no rule, no exemption and no IR-generation path under `rules`
/// fails with [`UnsupportedOperationError`].
pub fn lower_graph(
    graph: &mut Graph,
    backend: &dyn Backend,
    rules: &IrGenRuleSet,
) -> Result<LowerStats, CompileError> {
    let snapshot: Vec<NodeId> = graph.nodes().map(|n| n.id).collect();
    let table = rule_table();
    let mut stats = LowerStats::default();
    for id in snapshot {
        let Some(node) = graph.node(id) else {
            continue;
        };
        if !backend.should_lower(node) {
            continue;
        }
        if let Some(rule) = table.get(&node.kind) {
            rule(graph, id).map_err(CompileError::Graph)?;
            stats.lowered += 1;
        } else if !irgen::has_rule(node.kind, rules) {
            return Err(UnsupportedOperationError {
                kind: schema::op_name(node.kind),
                elem: node.results.first().map(|ty| ty.elem),
            }
            .into());
        }
    }
    Ok(stats)
}

/// Relu(x) => Max(x, Splat(0)).
fn lower_relu(graph: &mut Graph, id: NodeId) -> Result<(), GraphError> {
    let (name, input, ty) = {
        let node = graph.node(id).ok_or(GraphError::UnknownNode {
            user: graph.name().to_string(),
            node: id.0,
        })?;
        (node.name.clone(), node.inputs[0], node.results[0].clone())
    };
    let zero = graph.add_node(
        schema::builtin::splat(),
        format!("{name}.zero"),
        Vec::new(),
        vec![ty.clone()],
        [("value".to_string(), MemberValue::Float(0.0))]
            .into_iter()
            .collect(),
    );
    let max = graph.add_node(
        schema::builtin::max(),
        format!("{name}.max"),
        vec![input, ValueRef::Node { node: zero, result: 0 }],
        vec![ty],
        Default::default(),
    );
    graph.replace_all_uses(
        ValueRef::Node { node: id, result: 0 },
        ValueRef::Node { node: max, result: 0 },
    );
    graph.remove_node(id)?;
    Ok(())
}

/// FusedMulAdd(a, b, c) => Add(Mul(a, b), c).
fn lower_fused_mul_add(graph: &mut Graph, id: NodeId) -> Result<(), GraphError> {
    let (name, lhs, rhs, addend, ty) = {
        let node = graph.node(id).ok_or(GraphError::UnknownNode {
            user: graph.name().to_string(),
            node: id.0,
        })?;
        (
            node.name.clone(),
            node.inputs[0],
            node.inputs[1],
            node.inputs[2],
            node.results[0].clone(),
        )
    };
    let mul = graph.add_node(
        schema::builtin::mul(),
        format!("{name}.mul"),
        vec![lhs, rhs],
        vec![ty.clone()],
        Default::default(),
    );
    let add = graph.add_node(
        schema::builtin::add(),
        format!("{name}.add"),
        vec![ValueRef::Node { node: mul, result: 0 }, addend],
        vec![ty],
        Default::default(),
    );
    graph.replace_all_uses(
        ValueRef::Node { node: id, result: 0 },
        ValueRef::Node { node: add, result: 0 },
    );
    graph.remove_node(id)?;
    Ok(())
}
