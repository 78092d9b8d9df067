use std::collections::BTreeMap;

use kiln::backend::IrGenError;
use kiln::graph::{Graph, GraphBuilder, Node, ValueRef};
use kiln::ir::IrModule;
use kiln::irgen::{self, IrBuilder, IrGenRuleSet};
use kiln::schema;
use kiln::types::{ElemKind, MemberValue, TypeDesc};

fn vec4() -> TypeDesc {
    TypeDesc::new(ElemKind::F32, vec![4])
}

/// add -> mul chain over two placeholders.
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

fn generate(graph: &Graph) -> IrModule {
    irgen::generate(graph, &IrGenRuleSet::new()).expect("irgen succeeds")
}

fn instr_index(module: &IrModule, name: &str) -> usize {
    module
        .instrs
        .iter()
        .position(|i| i.name == name)
        .unwrap_or_else(|| panic!("instruction '{name}' not emitted"))
}

#[test]
fn producers_are_emitted_before_consumers() {
    let module = generate(&chain_graph());
    assert!(instr_index(&module, "sum") < instr_index(&module, "prod"));
    assert!(instr_index(&module, "prod") < instr_index(&module, "out.save"));
}

#[test]
fn every_reachable_node_yields_an_instruction() {
    let graph = chain_graph();
    let module = generate(&graph);
    // Two node instructions plus the trailing output copy.
    assert_eq!(module.instrs.len(), graph.node_count() + 1);
}

#[test]
fn unreachable_nodes_are_skipped() {
    let mut graph = chain_graph();
    graph.add_node(
        schema::builtin::splat(),
        "dangling",
        Vec::new(),
        vec![vec4()],
        [("value".to_string(), MemberValue::Float(1.0))]
            .into_iter()
            .collect(),
    );
    let module = generate(&graph);
    assert!(module.instrs.iter().all(|i| i.name != "dangling"));
}

#[test]
fn operand_roles_and_flags_mirror_the_schema() {
    let module = generate(&chain_graph());
    for instr in &module.instrs {
        let def = schema::inst_def(instr.kind).expect("emitted kinds are registered");
        assert_eq!(instr.operands.len(), def.operands.len(), "{}", instr.name);
        for (operand, (_, role)) in instr.operands.iter().zip(&def.operands) {
            assert_eq!(operand.kind, *role, "{}", instr.name);
        }
        assert_eq!(instr.data_parallel, def.data_parallel, "{}", instr.name);
    }
}

#[test]
fn outputs_are_materialized_through_a_copy() {
    let graph = chain_graph();
    let module = generate(&graph);
    let last = module.instrs.last().expect("stream not empty");
    assert_eq!(last.kind, schema::builtin::copy_inst());
    let dest = module.buffer(last.operand(0));
    assert_eq!(dest.placeholder, Some(graph.outputs()[0].placeholder));
    // Node results land in temporaries, never directly in placeholders.
    let sum = &module.instrs[instr_index(&module, "sum")];
    assert!(!module.buffer(sum.operand(0)).is_placeholder());
}

#[test]
fn members_are_copied_onto_instructions() {
    let mut b = GraphBuilder::new("splat_net");
    let out = b.placeholder("out", vec4());
    let splat = b.node_with_members(
        schema::builtin::splat(),
        "fill",
        Vec::new(),
        vec4(),
        [("value".to_string(), MemberValue::Float(3.5))]
            .into_iter()
            .collect(),
    );
    b.output(out, splat);
    let module = generate(&b.finish());
    let fill = &module.instrs[instr_index(&module, "fill")];
    assert_eq!(fill.members["value"].as_f64(), Some(3.5));
}

#[test]
fn missing_required_member_fails() {
    let mut b = GraphBuilder::new("splat_net");
    let out = b.placeholder("out", vec4());
    let splat = b.node(schema::builtin::splat(), "fill", Vec::new(), vec4());
    b.output(out, splat);
    let err = irgen::generate(&b.finish(), &IrGenRuleSet::new()).expect_err("no value member");
    assert!(matches!(err, IrGenError::MissingMember { .. }));
}

#[test]
fn kind_without_any_rule_fails() {
    let mut b = GraphBuilder::new("mystery_net");
    let x = b.placeholder("x", vec4());
    let out = b.placeholder("out", vec4());
    let node = b.node(
        kiln::schema::OpKind(0xbeef),
        "mystery",
        vec![ValueRef::Placeholder(x)],
        vec4(),
    );
    b.output(out, node);
    let err = irgen::generate(&b.finish(), &IrGenRuleSet::new()).expect_err("no rule");
    assert!(matches!(err, IrGenError::NoRule { .. }));
}

fn add_as_double_copy(node: &Node, builder: &mut IrBuilder<'_>) -> Result<(), IrGenError> {
    let copy = schema::builtin::copy_inst();
    let lhs = builder.input_buffer(node, 0)?;
    let dest = builder.result_buffer(node, 0);
    builder.emit(copy, format!("{}.stage", node.name), &[dest, lhs], BTreeMap::new())?;
    builder.emit(copy, format!("{}.again", node.name), &[dest, dest], BTreeMap::new())
}

#[test]
fn manual_rules_take_precedence_over_auto_bindings() {
    let mut rules = IrGenRuleSet::new();
    rules.insert(schema::builtin::add(), add_as_double_copy);
    let module = irgen::generate(&chain_graph(), &rules).expect("irgen succeeds");
    // The Add node emitted two Copy instructions instead of one ElementAdd.
    assert!(module
        .instrs
        .iter()
        .all(|i| i.kind != schema::builtin::element_add()));
    assert!(module.instrs.iter().any(|i| i.name == "sum.stage"));
    assert!(module.instrs.iter().any(|i| i.name == "sum.again"));
}

#[test]
fn input_placeholders_are_recorded_once() {
    let graph = chain_graph();
    let module = generate(&graph);
    // y feeds both nodes but appears once.
    assert_eq!(module.inputs.len(), 2);
    assert_eq!(module.outputs.len(), 1);
}
