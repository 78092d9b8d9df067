//! Execution-time placeholder bindings.

use std::collections::HashMap;

use crate::graph::PlaceholderId;
use crate::types::{ElemKind, TypeDesc};

/// Dense host-side tensor storage bound to one placeholder.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorData {
    ty: TypeDesc,
    bytes: Vec<u8>,
}

impl TensorData {
    /// Builds f32 storage from a value slice; dims must cover the slice.
    pub fn from_f32(dims: impl Into<Vec<usize>>, values: &[f32]) -> Option<Self> {
        let ty = TypeDesc::new(ElemKind::F32, dims);
        if ty.element_count()? != values.len() {
            return None;
        }
        let mut bytes = Vec::with_capacity(values.len() * 4);
        for value in values {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        Some(Self { ty, bytes })
    }

    pub fn ty(&self) -> &TypeDesc {
        &self.ty
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Decodes as f32 values; `None` when the element kind differs.
    pub fn as_f32(&self) -> Option<Vec<f32>> {
        if self.ty.elem != ElemKind::F32 {
            return None;
        }
        Some(
            self.bytes
                .chunks_exact(4)
                .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
                .collect(),
        )
    }
}

/// Map from placeholders to concrete tensors for one execution.
///
/// Input bindings are only read by `execute`; output bindings are written by
/// `execute` alone, and only after the whole stream succeeded.
#[derive(Debug, Default)]
pub struct Context {
    bindings: HashMap<PlaceholderId, TensorData>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, placeholder: PlaceholderId, data: TensorData) {
        self.bindings.insert(placeholder, data);
    }

    pub fn get(&self, placeholder: PlaceholderId) -> Option<&TensorData> {
        self.bindings.get(&placeholder)
    }

    pub fn unbind(&mut self, placeholder: PlaceholderId) -> Option<TensorData> {
        self.bindings.remove(&placeholder)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}
