//! Open-enumeration schema registry.
//!
//! Node and instruction kinds are registry-assigned identifiers rather than a
//! closed enum, so backends can introduce kinds without touching the core.
//! Each kind carries a property record describing its operands, members and
//! lowering/IR-generation metadata; the core consults those records instead of
//! matching on specific kinds.

use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Registry-assigned identifier for a graph-level operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OpKind(pub u32);

/// Registry-assigned identifier for a low-level instruction kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstKind(pub u32);

/// Role of an instruction operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperandKind {
    In,
    Out,
    InOut,
}

/// How a node kind derives its first result type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultTypeRule {
    /// Result type equals the type of the given input.
    SameAsInput(usize),
    /// Result type is supplied at construction and not derivable.
    Explicit,
}

/// Property record for a graph-level operation kind.
#[derive(Debug, Clone, PartialEq)]
pub struct OpKindDef {
    pub name: String,
    pub inputs: Vec<String>,
    pub result_rule: ResultTypeRule,
    pub members: Vec<String>,
    pub doc: String,
}

/// Property record for a low-level instruction kind.
#[derive(Debug, Clone, PartialEq)]
pub struct InstKindDef {
    pub name: String,
    pub operands: Vec<(String, OperandKind)>,
    pub members: Vec<String>,
    /// `(dest, src)` operand index pairs eligible for buffer sharing.
    pub inplace_pairs: Vec<(usize, usize)>,
    pub data_parallel: bool,
    /// Op kind this instruction implements one-to-one, if any.
    pub auto_irgen: Option<OpKind>,
}

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("kind '{name}' is already registered with a different definition")]
    Conflict { name: String },
    #[error("in-place pair ({dest}, {src}) on '{name}' is out of range")]
    InplaceOutOfRange { name: String, dest: usize, src: usize },
    #[error("in-place pair ({dest}, {src}) on '{name}' must pair a written operand with a read operand")]
    InplacePairRole { name: String, dest: usize, src: usize },
    #[error("instruction '{name}' auto-binds unknown op kind {op}")]
    UnknownAutoOp { name: String, op: u32 },
    #[error("op '{op}' already has an auto-bound instruction kind")]
    AutoBindingTaken { op: String },
}

struct Registry {
    ops: Vec<OpKindDef>,
    op_names: HashMap<String, OpKind>,
    insts: Vec<InstKindDef>,
    inst_names: HashMap<String, InstKind>,
    auto_by_op: HashMap<OpKind, InstKind>,
}

impl Registry {
    fn register_op(&mut self, def: OpKindDef) -> Result<OpKind, SchemaError> {
        if let Some(&existing) = self.op_names.get(&def.name) {
            if self.ops[existing.0 as usize] == def {
                return Ok(existing);
            }
            return Err(SchemaError::Conflict { name: def.name });
        }
        let kind = OpKind(self.ops.len() as u32);
        self.op_names.insert(def.name.clone(), kind);
        self.ops.push(def);
        Ok(kind)
    }

    fn register_inst(&mut self, def: InstKindDef) -> Result<InstKind, SchemaError> {
        if let Some(&existing) = self.inst_names.get(&def.name) {
            if self.insts[existing.0 as usize] == def {
                return Ok(existing);
            }
            return Err(SchemaError::Conflict { name: def.name });
        }
        for &(dest, src) in &def.inplace_pairs {
            if dest >= def.operands.len() || src >= def.operands.len() {
                return Err(SchemaError::InplaceOutOfRange {
                    name: def.name,
                    dest,
                    src,
                });
            }
            let dest_ok = matches!(def.operands[dest].1, OperandKind::Out | OperandKind::InOut);
            let src_ok = matches!(def.operands[src].1, OperandKind::In | OperandKind::InOut);
            if !dest_ok || !src_ok {
                return Err(SchemaError::InplacePairRole {
                    name: def.name,
                    dest,
                    src,
                });
            }
        }
        if let Some(op) = def.auto_irgen {
            if op.0 as usize >= self.ops.len() {
                return Err(SchemaError::UnknownAutoOp {
                    name: def.name,
                    op: op.0,
                });
            }
            if self.auto_by_op.contains_key(&op) {
                return Err(SchemaError::AutoBindingTaken {
                    op: self.ops[op.0 as usize].name.clone(),
                });
            }
        }
        let kind = InstKind(self.insts.len() as u32);
        if let Some(op) = def.auto_irgen {
            self.auto_by_op.insert(op, kind);
        }
        self.inst_names.insert(def.name.clone(), kind);
        self.insts.push(def);
        Ok(kind)
    }
}

static REGISTRY: OnceLock<RwLock<Registry>> = OnceLock::new();

fn registry() -> &'static RwLock<Registry> {
    REGISTRY.get_or_init(|| {
        let mut reg = Registry {
            ops: Vec::new(),
            op_names: HashMap::new(),
            insts: Vec::new(),
            inst_names: HashMap::new(),
            auto_by_op: HashMap::new(),
        };
        builtin::install(&mut reg);
        RwLock::new(reg)
    })
}

/// Registers an op kind, returning its stable identifier.
///
/// Registration is idempotent by name: re-registering an identical definition
/// returns the existing identifier, a conflicting one is an error.
pub fn register_op_kind(def: OpKindDef) -> Result<OpKind, SchemaError> {
    registry()
        .write()
        .expect("schema registry poisoned")
        .register_op(def)
}

/// Registers an instruction kind; same idempotence rule as [`register_op_kind`].
pub fn register_inst_kind(def: InstKindDef) -> Result<InstKind, SchemaError> {
    registry()
        .write()
        .expect("schema registry poisoned")
        .register_inst(def)
}

pub fn op_kind(name: &str) -> Option<OpKind> {
    registry()
        .read()
        .expect("schema registry poisoned")
        .op_names
        .get(name)
        .copied()
}

pub fn inst_kind(name: &str) -> Option<InstKind> {
    registry()
        .read()
        .expect("schema registry poisoned")
        .inst_names
        .get(name)
        .copied()
}

pub fn op_def(kind: OpKind) -> Option<OpKindDef> {
    registry()
        .read()
        .expect("schema registry poisoned")
        .ops
        .get(kind.0 as usize)
        .cloned()
}

pub fn inst_def(kind: InstKind) -> Option<InstKindDef> {
    registry()
        .read()
        .expect("schema registry poisoned")
        .insts
        .get(kind.0 as usize)
        .cloned()
}

/// Instruction kind auto-bound to the op, if one was registered.
pub fn auto_irgen_for(op: OpKind) -> Option<InstKind> {
    registry()
        .read()
        .expect("schema registry poisoned")
        .auto_by_op
        .get(&op)
        .copied()
}

/// Display name for an op kind; falls back to the raw id for unregistered kinds.
pub fn op_name(kind: OpKind) -> String {
    op_def(kind)
        .map(|def| def.name)
        .unwrap_or_else(|| format!("op#{}", kind.0))
}

/// Display name for an instruction kind.
pub fn inst_name(kind: InstKind) -> String {
    inst_def(kind)
        .map(|def| def.name)
        .unwrap_or_else(|| format!("inst#{}", kind.0))
}

/// Built-in operation and instruction kinds.
///
/// Installed when the registry is first touched, so the accessors below are
/// always resolvable.
pub mod builtin {
    use super::*;

    pub(super) fn install(reg: &mut Registry) {
        let unary = |name: &str, doc: &str| OpKindDef {
            name: name.to_string(),
            inputs: vec!["Src".to_string()],
            result_rule: ResultTypeRule::SameAsInput(0),
            members: Vec::new(),
            doc: doc.to_string(),
        };
        let binary = |name: &str, doc: &str| OpKindDef {
            name: name.to_string(),
            inputs: vec!["LHS".to_string(), "RHS".to_string()],
            result_rule: ResultTypeRule::SameAsInput(0),
            members: Vec::new(),
            doc: doc.to_string(),
        };

        let add = reg
            .register_op(binary("Add", "Elementwise addition."))
            .expect("builtin op schema");
        let mul = reg
            .register_op(binary("Mul", "Elementwise multiplication."))
            .expect("builtin op schema");
        let max = reg
            .register_op(binary("Max", "Elementwise maximum."))
            .expect("builtin op schema");
        let splat = reg
            .register_op(OpKindDef {
                name: "Splat".to_string(),
                inputs: Vec::new(),
                result_rule: ResultTypeRule::Explicit,
                members: vec!["value".to_string()],
                doc: "Tensor filled with a scalar constant.".to_string(),
            })
            .expect("builtin op schema");
        reg.register_op(unary("Relu", "Rectified linear unit."))
            .expect("builtin op schema");
        reg.register_op(OpKindDef {
            name: "FusedMulAdd".to_string(),
            inputs: vec![
                "LHS".to_string(),
                "RHS".to_string(),
                "Addend".to_string(),
            ],
            result_rule: ResultTypeRule::SameAsInput(0),
            members: Vec::new(),
            doc: "LHS * RHS + Addend.".to_string(),
        })
        .expect("builtin op schema");
        let copy = reg
            .register_op(unary("Copy", "Identity copy."))
            .expect("builtin op schema");

        let elementwise = |name: &str, ins: &[&str], auto: OpKind| InstKindDef {
            name: name.to_string(),
            operands: std::iter::once(("Dest".to_string(), OperandKind::Out))
                .chain(ins.iter().map(|n| (n.to_string(), OperandKind::In)))
                .collect(),
            members: Vec::new(),
            inplace_pairs: vec![(0, 1)],
            data_parallel: true,
            auto_irgen: Some(auto),
        };

        reg.register_inst(elementwise("ElementAdd", &["LHS", "RHS"], add))
            .expect("builtin inst schema");
        reg.register_inst(elementwise("ElementMul", &["LHS", "RHS"], mul))
            .expect("builtin inst schema");
        reg.register_inst(elementwise("ElementMax", &["LHS", "RHS"], max))
            .expect("builtin inst schema");
        reg.register_inst(InstKindDef {
            name: "Splat".to_string(),
            operands: vec![("Dest".to_string(), OperandKind::Out)],
            members: vec!["value".to_string()],
            inplace_pairs: Vec::new(),
            data_parallel: true,
            auto_irgen: Some(splat),
        })
        .expect("builtin inst schema");
        reg.register_inst(elementwise("Copy", &["Src"], copy))
            .expect("builtin inst schema");
    }

    fn op(name: &str) -> OpKind {
        super::op_kind(name).expect("builtin op kind registered")
    }

    fn inst(name: &str) -> InstKind {
        super::inst_kind(name).expect("builtin inst kind registered")
    }

    pub fn add() -> OpKind {
        op("Add")
    }

    pub fn mul() -> OpKind {
        op("Mul")
    }

    pub fn max() -> OpKind {
        op("Max")
    }

    pub fn splat() -> OpKind {
        op("Splat")
    }

    pub fn relu() -> OpKind {
        op("Relu")
    }

    pub fn fused_mul_add() -> OpKind {
        op("FusedMulAdd")
    }

    pub fn copy() -> OpKind {
        op("Copy")
    }

    pub fn element_add() -> InstKind {
        inst("ElementAdd")
    }

    pub fn element_mul() -> InstKind {
        inst("ElementMul")
    }

    pub fn element_max() -> InstKind {
        inst("ElementMax")
    }

    pub fn splat_inst() -> InstKind {
        inst("Splat")
    }

    pub fn copy_inst() -> InstKind {
        inst("Copy")
    }
}
