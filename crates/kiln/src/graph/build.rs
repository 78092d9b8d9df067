use std::collections::BTreeMap;

use super::{Graph, PlaceholderId, ValueRef};
use crate::schema::OpKind;
use crate::types::{MemberValue, TypeDesc};

/// Programmatic graph construction for tests and front ends.
///
/// Thin sugar over the [`Graph`] mutation interface for the common
/// single-result case.
pub struct GraphBuilder {
    graph: Graph,
}

impl GraphBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            graph: Graph::new(name),
        }
    }

    pub fn placeholder(&mut self, name: impl Into<String>, ty: TypeDesc) -> PlaceholderId {
        self.graph.add_placeholder(name, ty)
    }

    /// Adds a single-result node and returns a reference to its result.
    pub fn node(
        &mut self,
        kind: OpKind,
        name: impl Into<String>,
        inputs: Vec<ValueRef>,
        result: TypeDesc,
    ) -> ValueRef {
        self.node_with_members(kind, name, inputs, result, BTreeMap::new())
    }

    pub fn node_with_members(
        &mut self,
        kind: OpKind,
        name: impl Into<String>,
        inputs: Vec<ValueRef>,
        result: TypeDesc,
        members: BTreeMap<String, MemberValue>,
    ) -> ValueRef {
        let id = self
            .graph
            .add_node(kind, name, inputs, vec![result], members);
        ValueRef::Node { node: id, result: 0 }
    }

    pub fn output(&mut self, placeholder: PlaceholderId, value: ValueRef) {
        self.graph.mark_output(placeholder, value);
    }

    pub fn finish(self) -> Graph {
        self.graph
    }
}
