use kiln::schema::{
    self, InstKindDef, OpKindDef, OperandKind, ResultTypeRule, SchemaError,
};

fn sample_op(name: &str) -> OpKindDef {
    OpKindDef {
        name: name.to_string(),
        inputs: vec!["Src".to_string()],
        result_rule: ResultTypeRule::SameAsInput(0),
        members: Vec::new(),
        doc: "test kind".to_string(),
    }
}

#[test]
fn builtins_are_always_registered() {
    let add = schema::builtin::add();
    let def = schema::op_def(add).expect("Add registered");
    assert_eq!(def.name, "Add");
    assert_eq!(def.inputs.len(), 2);
    assert!(matches!(def.result_rule, ResultTypeRule::SameAsInput(0)));
    assert_eq!(schema::op_kind("Add"), Some(add));
}

#[test]
fn builtin_elementwise_instructions_declare_inplace_pairs() {
    for kind in [
        schema::builtin::element_add(),
        schema::builtin::element_mul(),
        schema::builtin::element_max(),
        schema::builtin::copy_inst(),
    ] {
        let def = schema::inst_def(kind).expect("builtin registered");
        assert!(def.data_parallel, "{} is data-parallel", def.name);
        assert_eq!(def.inplace_pairs, vec![(0, 1)], "{}", def.name);
        assert_eq!(def.operands[0].1, OperandKind::Out, "{}", def.name);
        assert!(
            def.operands[1..]
                .iter()
                .all(|(_, role)| *role == OperandKind::In),
            "{}",
            def.name
        );
    }
}

#[test]
fn auto_bindings_cover_directly_executable_builtins() {
    assert_eq!(
        schema::auto_irgen_for(schema::builtin::add()),
        Some(schema::builtin::element_add())
    );
    assert_eq!(
        schema::auto_irgen_for(schema::builtin::splat()),
        Some(schema::builtin::splat_inst())
    );
    // Lowerable kinds have no direct instruction form.
    assert_eq!(schema::auto_irgen_for(schema::builtin::relu()), None);
    assert_eq!(schema::auto_irgen_for(schema::builtin::fused_mul_add()), None);
}

#[test]
fn reregistering_an_identical_def_returns_the_same_id() {
    let first = schema::register_op_kind(sample_op("IdempotentProbe")).expect("first");
    let second = schema::register_op_kind(sample_op("IdempotentProbe")).expect("second");
    assert_eq!(first, second);
}

#[test]
fn conflicting_def_is_rejected() {
    schema::register_op_kind(sample_op("ConflictProbe")).expect("first");
    let mut changed = sample_op("ConflictProbe");
    changed.inputs.push("Extra".to_string());
    let err = schema::register_op_kind(changed).expect_err("conflict");
    assert!(matches!(err, SchemaError::Conflict { .. }));
}

#[test]
fn inplace_pair_out_of_range_is_rejected() {
    let op = schema::register_op_kind(sample_op("RangeProbeOp")).expect("op");
    let err = schema::register_inst_kind(InstKindDef {
        name: "RangeProbe".to_string(),
        operands: vec![
            ("Dest".to_string(), OperandKind::Out),
            ("Src".to_string(), OperandKind::In),
        ],
        members: Vec::new(),
        inplace_pairs: vec![(0, 7)],
        data_parallel: true,
        auto_irgen: Some(op),
    })
    .expect_err("src index 7 out of range");
    assert!(matches!(err, SchemaError::InplaceOutOfRange { src: 7, .. }));
}

#[test]
fn inplace_pair_must_write_dest_and_read_src() {
    let err = schema::register_inst_kind(InstKindDef {
        name: "RoleProbe".to_string(),
        operands: vec![
            ("A".to_string(), OperandKind::In),
            ("B".to_string(), OperandKind::In),
        ],
        members: Vec::new(),
        inplace_pairs: vec![(0, 1)],
        data_parallel: false,
        auto_irgen: None,
    })
    .expect_err("dest operand is read-only");
    assert!(matches!(err, SchemaError::InplacePairRole { .. }));
}

#[test]
fn second_auto_binding_for_an_op_is_rejected() {
    let err = schema::register_inst_kind(InstKindDef {
        name: "ShadowAdd".to_string(),
        operands: vec![
            ("Dest".to_string(), OperandKind::Out),
            ("LHS".to_string(), OperandKind::In),
            ("RHS".to_string(), OperandKind::In),
        ],
        members: Vec::new(),
        inplace_pairs: Vec::new(),
        data_parallel: true,
        auto_irgen: Some(schema::builtin::add()),
    })
    .expect_err("Add already auto-binds ElementAdd");
    assert!(matches!(err, SchemaError::AutoBindingTaken { .. }));
}

#[test]
fn unregistered_kinds_fall_back_to_raw_names() {
    let kind = kiln::schema::OpKind(u32::MAX);
    assert_eq!(schema::op_name(kind), format!("op#{}", u32::MAX));
    assert_eq!(schema::op_def(kind), None);
}
