use kiln::graph::{GraphBuilder, GraphError, ValueRef};
use kiln::schema;
use kiln::types::{ElemKind, TypeDesc};

fn vec4() -> TypeDesc {
    TypeDesc::new(ElemKind::F32, vec![4])
}

#[test]
fn builder_constructs_a_verifiable_graph() {
    let mut b = GraphBuilder::new("main");
    let x = b.placeholder("x", vec4());
    let y = b.placeholder("y", vec4());
    let out = b.placeholder("out", vec4());
    let sum = b.node(
        schema::builtin::add(),
        "sum",
        vec![ValueRef::Placeholder(x), ValueRef::Placeholder(y)],
        vec4(),
    );
    b.output(out, sum);
    let graph = b.finish();
    graph.verify().expect("graph verifies");
    assert_eq!(graph.node_count(), 1);
    assert_eq!(graph.outputs().len(), 1);
}

#[test]
fn unknown_producer_is_rejected() {
    let mut b = GraphBuilder::new("main");
    let x = b.placeholder("x", vec4());
    let bogus = ValueRef::Node {
        node: kiln::graph::NodeId(99),
        result: 0,
    };
    let sum = b.node(
        schema::builtin::add(),
        "sum",
        vec![ValueRef::Placeholder(x), bogus],
        vec4(),
    );
    let out = b.placeholder("out", vec4());
    b.output(out, sum);
    let err = b.finish().verify().expect_err("dangling producer");
    assert!(matches!(err, GraphError::UnknownNode { .. }));
}

#[test]
fn cycle_is_rejected() {
    let mut b = GraphBuilder::new("main");
    let x = b.placeholder("x", vec4());
    let y = b.placeholder("y", vec4());
    let a = b.node(
        schema::builtin::add(),
        "a",
        vec![ValueRef::Placeholder(x), ValueRef::Placeholder(y)],
        vec4(),
    );
    let c = b.node(
        schema::builtin::add(),
        "c",
        vec![a, ValueRef::Placeholder(y)],
        vec4(),
    );
    let out = b.placeholder("out", vec4());
    b.output(out, c);
    let mut graph = b.finish();
    // Rewire a's placeholder input to c's result, closing a -> c -> a.
    let rewired = graph.replace_all_uses(ValueRef::Placeholder(x), c);
    assert!(rewired >= 1);
    let err = graph.verify().expect_err("cycle");
    assert!(matches!(err, GraphError::Cycle { .. }));
}

#[test]
fn replace_all_uses_rewires_outputs() {
    let mut b = GraphBuilder::new("main");
    let x = b.placeholder("x", vec4());
    let y = b.placeholder("y", vec4());
    let out = b.placeholder("out", vec4());
    let sum = b.node(
        schema::builtin::add(),
        "sum",
        vec![ValueRef::Placeholder(x), ValueRef::Placeholder(y)],
        vec4(),
    );
    b.output(out, sum);
    let mut graph = b.finish();
    let prod = b_node_id(sum);
    let max = graph.add_node(
        schema::builtin::max(),
        "max",
        vec![ValueRef::Placeholder(x), ValueRef::Placeholder(y)],
        vec![vec4()],
        Default::default(),
    );
    let replacement = ValueRef::Node {
        node: max,
        result: 0,
    };
    let rewired = graph.replace_all_uses(sum, replacement);
    assert_eq!(rewired, 1);
    assert_eq!(graph.outputs()[0].value, replacement);
    graph.remove_node(prod).expect("old producer is dead");
    graph.verify().expect("still valid");
}

#[test]
fn remove_node_with_live_uses_fails() {
    let mut b = GraphBuilder::new("main");
    let x = b.placeholder("x", vec4());
    let y = b.placeholder("y", vec4());
    let out = b.placeholder("out", vec4());
    let sum = b.node(
        schema::builtin::add(),
        "sum",
        vec![ValueRef::Placeholder(x), ValueRef::Placeholder(y)],
        vec4(),
    );
    b.output(out, sum);
    let mut graph = b.finish();
    let err = graph.remove_node(b_node_id(sum)).expect_err("still used");
    assert!(matches!(err, GraphError::NodeInUse { uses: 1, .. }));
}

#[test]
fn schema_arity_is_enforced() {
    let mut b = GraphBuilder::new("main");
    let x = b.placeholder("x", vec4());
    let out = b.placeholder("out", vec4());
    let sum = b.node(
        schema::builtin::add(),
        "sum",
        vec![ValueRef::Placeholder(x)],
        vec4(),
    );
    b.output(out, sum);
    let err = b.finish().verify().expect_err("one operand short");
    assert!(matches!(
        err,
        GraphError::InputArity {
            expected: 2,
            found: 1,
            ..
        }
    ));
}

#[test]
fn result_type_rule_is_enforced() {
    let mut b = GraphBuilder::new("main");
    let x = b.placeholder("x", vec4());
    let y = b.placeholder("y", vec4());
    let wide = TypeDesc::new(ElemKind::F32, vec![8]);
    let out = b.placeholder("out", wide.clone());
    let sum = b.node(
        schema::builtin::add(),
        "sum",
        vec![ValueRef::Placeholder(x), ValueRef::Placeholder(y)],
        wide,
    );
    b.output(out, sum);
    let err = b.finish().verify().expect_err("result must match input 0");
    assert!(matches!(err, GraphError::ResultType { input: 0, .. }));
}

#[test]
fn output_binding_type_is_enforced() {
    let mut b = GraphBuilder::new("main");
    let x = b.placeholder("x", vec4());
    let y = b.placeholder("y", vec4());
    let narrow = b.placeholder("out", TypeDesc::new(ElemKind::F32, vec![2]));
    let sum = b.node(
        schema::builtin::add(),
        "sum",
        vec![ValueRef::Placeholder(x), ValueRef::Placeholder(y)],
        vec4(),
    );
    b.output(narrow, sum);
    let err = b.finish().verify().expect_err("output shape differs");
    assert!(matches!(err, GraphError::OutputType { .. }));
}

fn b_node_id(value: ValueRef) -> kiln::graph::NodeId {
    match value {
        ValueRef::Node { node, .. } => node,
        ValueRef::Placeholder(_) => panic!("expected a node result"),
    }
}
