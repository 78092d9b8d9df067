use std::collections::HashMap;

use super::{Graph, GraphError, NodeId, ValueRef};
use crate::schema::{self, ResultTypeRule};

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    InProgress,
    Done,
}

/// Full invariant check: value resolution, acyclicity, schema arity and
/// result-type rules, output binding types.
pub(super) fn verify(graph: &Graph) -> Result<(), GraphError> {
    for node in graph.nodes() {
        if node.results.is_empty() {
            return Err(GraphError::NoResults {
                node: node.name.clone(),
            });
        }
        for input in &node.inputs {
            graph.value_type_for(*input, node.name.clone())?;
        }
        if let Some(def) = schema::op_def(node.kind) {
            if node.inputs.len() != def.inputs.len() {
                return Err(GraphError::InputArity {
                    node: node.name.clone(),
                    kind: def.name,
                    expected: def.inputs.len(),
                    found: node.inputs.len(),
                });
            }
            if let ResultTypeRule::SameAsInput(index) = def.result_rule {
                let expected = graph.value_type_for(node.inputs[index], node.name.clone())?;
                if node.results[0] != *expected {
                    return Err(GraphError::ResultType {
                        node: node.name.clone(),
                        input: index,
                        expected: expected.clone(),
                        found: node.results[0].clone(),
                    });
                }
            }
        }
    }

    check_acyclic(graph)?;

    for output in graph.outputs() {
        let placeholder =
            graph
                .placeholder(output.placeholder)
                .ok_or(GraphError::UnknownPlaceholder {
                    user: graph.name().to_string(),
                    placeholder: output.placeholder.0,
                })?;
        let found = graph.value_type_for(output.value, placeholder.name.clone())?;
        if *found != placeholder.ty {
            return Err(GraphError::OutputType {
                placeholder: placeholder.name.clone(),
                expected: placeholder.ty.clone(),
                found: found.clone(),
            });
        }
    }
    Ok(())
}

fn check_acyclic(graph: &Graph) -> Result<(), GraphError> {
    let mut marks: HashMap<NodeId, Mark> = HashMap::new();
    for root in graph.nodes() {
        if marks.contains_key(&root.id) {
            continue;
        }
        // Iterative DFS; an edge back into an in-progress node is a cycle.
        let mut stack: Vec<(NodeId, usize)> = vec![(root.id, 0)];
        marks.insert(root.id, Mark::InProgress);
        while let Some((id, child)) = stack.pop() {
            let node = graph.node(id).ok_or_else(|| GraphError::UnknownNode {
                user: graph.name().to_string(),
                node: id.0,
            })?;
            if child >= node.inputs.len() {
                marks.insert(id, Mark::Done);
                continue;
            }
            stack.push((id, child + 1));
            if let ValueRef::Node { node: dep, .. } = node.inputs[child] {
                match marks.get(&dep) {
                    Some(Mark::InProgress) => {
                        let name = graph
                            .node(dep)
                            .map(|n| n.name.clone())
                            .unwrap_or_else(|| format!("n{}", dep.0));
                        return Err(GraphError::Cycle { node: name });
                    }
                    Some(Mark::Done) => {}
                    None => {
                        marks.insert(dep, Mark::InProgress);
                        stack.push((dep, 0));
                    }
                }
            }
        }
    }
    Ok(())
}
