use serde::{Deserialize, Serialize};
use std::fmt;

/// Scalar element kinds understood by the compiler core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElemKind {
    F32,
    F16,
    I64,
    I32,
    I8,
    Bool,
}

impl ElemKind {
    pub fn is_float(self) -> bool {
        matches!(self, ElemKind::F32 | ElemKind::F16)
    }

    pub fn is_integer(self) -> bool {
        matches!(self, ElemKind::I64 | ElemKind::I32 | ElemKind::I8)
    }

    pub fn size_in_bytes(self) -> usize {
        match self {
            ElemKind::F32 => 4,
            ElemKind::F16 => 2,
            ElemKind::I64 => 8,
            ElemKind::I32 => 4,
            ElemKind::I8 => 1,
            ElemKind::Bool => 1,
        }
    }
}

impl fmt::Display for ElemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ElemKind::F32 => "f32",
            ElemKind::F16 => "f16",
            ElemKind::I64 => "i64",
            ElemKind::I32 => "i32",
            ElemKind::I8 => "i8",
            ElemKind::Bool => "bool",
        };
        f.write_str(name)
    }
}

/// Tensor metadata coupling an element kind with static dimensions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeDesc {
    pub elem: ElemKind,
    pub dims: Vec<usize>,
}

impl TypeDesc {
    pub fn new(elem: ElemKind, dims: impl Into<Vec<usize>>) -> Self {
        Self {
            elem,
            dims: dims.into(),
        }
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Total element count, or `None` on overflow.
    pub fn element_count(&self) -> Option<usize> {
        self.dims
            .iter()
            .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
    }

    /// Dense byte length of a tensor of this type, or `None` on overflow.
    pub fn byte_len(&self) -> Option<usize> {
        self.element_count()?.checked_mul(self.elem.size_in_bytes())
    }
}

impl fmt::Display for TypeDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.elem)?;
        for dim in &self.dims {
            write!(f, "x{dim}")?;
        }
        Ok(())
    }
}

/// Kind-specific constant attached to a node or instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum MemberValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    IntVec(Vec<i64>),
}

impl MemberValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            MemberValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MemberValue::Float(v) => Some(*v),
            MemberValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MemberValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MemberValue::Str(v) => Some(v),
            _ => None,
        }
    }
}
