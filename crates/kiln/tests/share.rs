use kiln::graph::{Graph, GraphBuilder, ValueRef};
use kiln::ir::{BufferId, IrModule};
use kiln::irgen::{self, IrGenRuleSet};
use kiln::schema::{self, InstKindDef, OpKindDef, OperandKind, ResultTypeRule};
use kiln::share;
use kiln::types::{ElemKind, TypeDesc};

fn vec4() -> TypeDesc {
    TypeDesc::new(ElemKind::F32, vec![4])
}

fn generate(graph: &Graph) -> IrModule {
    irgen::generate(graph, &IrGenRuleSet::new()).expect("irgen succeeds")
}

fn buffer_named(module: &IrModule, name: &str) -> BufferId {
    module
        .buffers
        .iter()
        .find(|b| b.name == name)
        .unwrap_or_else(|| panic!("no buffer named '{name}'"))
        .id
}

fn same_alloc(module: &IrModule, a: BufferId, b: BufferId) -> bool {
    module.buffer(a).alloc == module.buffer(b).alloc
}

/// sum = x + y; prod = sum * y; out = prod.
fn chain_graph() -> Graph {
    let mut b = GraphBuilder::new("chain");
    let x = b.placeholder("x", vec4());
    let y = b.placeholder("y", vec4());
    let out = b.placeholder("out", vec4());
    let sum = b.node(
        schema::builtin::add(),
        "sum",
        vec![ValueRef::Placeholder(x), ValueRef::Placeholder(y)],
        vec4(),
    );
    let prod = b.node(
        schema::builtin::mul(),
        "prod",
        vec![sum, ValueRef::Placeholder(y)],
        vec4(),
    );
    b.output(out, prod);
    b.finish()
}

#[test]
fn dying_producer_merges_with_its_consumer() {
    let mut module = generate(&chain_graph());
    let stats = share::share_buffers(&mut module);
    let sum = buffer_named(&module, "sum.0");
    let prod = buffer_named(&module, "prod.0");
    assert!(same_alloc(&module, sum, prod));
    assert_eq!(stats.merged, 1);
    assert_eq!(stats.allocs_after, stats.allocs_before - 1);
}

#[test]
fn overlapping_live_ranges_are_never_merged() {
    // base feeds both scaled and the final mul, so it outlives scaled's def.
    let mut b = GraphBuilder::new("overlap");
    let x = b.placeholder("x", vec4());
    let y = b.placeholder("y", vec4());
    let out = b.placeholder("out", vec4());
    let base = b.node(
        schema::builtin::add(),
        "base",
        vec![ValueRef::Placeholder(x), ValueRef::Placeholder(y)],
        vec4(),
    );
    let scaled = b.node(
        schema::builtin::add(),
        "scaled",
        vec![base, ValueRef::Placeholder(y)],
        vec4(),
    );
    let prod = b.node(schema::builtin::mul(), "prod", vec![base, scaled], vec4());
    b.output(out, prod);
    let mut module = generate(&b.finish());
    share::share_buffers(&mut module);
    let base = buffer_named(&module, "base.0");
    let scaled = buffer_named(&module, "scaled.0");
    assert!(!same_alloc(&module, base, scaled));
}

#[test]
fn placeholder_buffers_are_never_merged() {
    // A bare copy node: its input and output placeholders stay pinned, only
    // the temporary in between could ever share.
    let mut b = GraphBuilder::new("passthrough");
    let x = b.placeholder("x", vec4());
    let out = b.placeholder("out", vec4());
    let copied = b.node(
        schema::builtin::copy(),
        "copied",
        vec![ValueRef::Placeholder(x)],
        vec4(),
    );
    b.output(out, copied);
    let mut module = generate(&b.finish());
    share::share_buffers(&mut module);
    for buffer in module.buffers.iter().filter(|b| b.is_placeholder()) {
        assert_eq!(buffer.alloc.0, buffer.id.0, "{} stays pinned", buffer.name);
        assert_eq!(
            module.buffers.iter().filter(|b| b.alloc == buffer.alloc).count(),
            1,
            "{} shares with nothing",
            buffer.name
        );
    }
}

#[test]
fn disabling_the_pass_keeps_every_buffer_distinct() {
    let module = generate(&chain_graph());
    assert_eq!(module.alloc_count(), module.buffers.len());
}

#[test]
fn sharing_is_deterministic() {
    let mut first = generate(&chain_graph());
    let mut second = generate(&chain_graph());
    share::share_buffers(&mut first);
    share::share_buffers(&mut second);
    let allocs = |m: &IrModule| m.buffers.iter().map(|b| b.alloc).collect::<Vec<_>>();
    assert_eq!(allocs(&first), allocs(&second));
}

#[test]
fn competing_pairs_resolve_in_declared_order() -> anyhow::Result<()> {
    let blend_op = schema::register_op_kind(OpKindDef {
        name: "Blend".to_string(),
        inputs: vec!["A".to_string(), "B".to_string()],
        result_rule: ResultTypeRule::SameAsInput(0),
        members: Vec::new(),
        doc: "test-only blend".to_string(),
    })?;
    let blend_inst = schema::register_inst_kind(InstKindDef {
        name: "Blend".to_string(),
        operands: vec![
            ("Dest".to_string(), OperandKind::Out),
            ("A".to_string(), OperandKind::In),
            ("B".to_string(), OperandKind::In),
        ],
        members: Vec::new(),
        inplace_pairs: vec![(0, 1), (0, 2)],
        data_parallel: true,
        auto_irgen: Some(blend_op),
    })?;

    let mut b = GraphBuilder::new("blend_net");
    let x = b.placeholder("x", vec4());
    let y = b.placeholder("y", vec4());
    let out = b.placeholder("out", vec4());
    let first = b.node(
        schema::builtin::copy(),
        "first",
        vec![ValueRef::Placeholder(x)],
        vec4(),
    );
    let second = b.node(
        schema::builtin::copy(),
        "second",
        vec![ValueRef::Placeholder(y)],
        vec4(),
    );
    let blended = b.node(blend_op, "blended", vec![first, second], vec4());
    b.output(out, blended);
    let mut module = generate(&b.finish());
    assert!(module.instrs.iter().any(|i| i.kind == blend_inst));
    share::share_buffers(&mut module);

    // Both sources die at the blend; the first declared pair wins.
    let dest = buffer_named(&module, "blended.0");
    let a = buffer_named(&module, "first.0");
    let b = buffer_named(&module, "second.0");
    assert!(same_alloc(&module, dest, a));
    assert!(!same_alloc(&module, dest, b));
    Ok(())
}
