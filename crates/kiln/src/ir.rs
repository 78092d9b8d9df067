//! Backend-facing low-level IR.
//!
//! An [`IrModule`] is a linear instruction stream over explicit buffers.
//! Buffers carry an allocation class (`alloc`): distinct buffers with the
//! same class share storage after the buffer-sharing pass.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use thiserror::Error;

use crate::graph::PlaceholderId;
use crate::schema::{self, InstKind, OperandKind};
use crate::types::{MemberValue, TypeDesc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BufferId(pub u32);

/// Storage equivalence class assigned by the buffer-sharing pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AllocId(pub u32);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Buffer {
    pub id: BufferId,
    pub name: String,
    pub ty: TypeDesc,
    /// Placeholder backing this buffer, if it is externally visible.
    pub placeholder: Option<PlaceholderId>,
    pub alloc: AllocId,
}

impl Buffer {
    pub fn is_placeholder(&self) -> bool {
        self.placeholder.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrOperand {
    pub buffer: BufferId,
    pub kind: OperandKind,
}

/// One instruction; operand roles and the data-parallel flag mirror the
/// schema record the kind was registered with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instr {
    pub kind: InstKind,
    pub name: String,
    pub operands: SmallVec<[InstrOperand; 4]>,
    pub members: BTreeMap<String, MemberValue>,
    pub data_parallel: bool,
}

impl Instr {
    pub fn operand(&self, index: usize) -> BufferId {
        self.operands[index].buffer
    }
}

#[derive(Debug, Error)]
pub enum IrIoError {
    #[error("io failure for {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("encode failure: {0}")]
    Encode(String),
    #[error("decode failure: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrModule {
    pub name: String,
    pub buffers: Vec<Buffer>,
    pub instrs: Vec<Instr>,
    /// Placeholder buffers read by the stream.
    pub inputs: Vec<(PlaceholderId, BufferId)>,
    /// Placeholder buffers written by the stream, in graph output order.
    pub outputs: Vec<(PlaceholderId, BufferId)>,
}

impl IrModule {
    /// Buffer by id; panics when out of range. Modules produced by the IR
    /// generator always index densely, so this is for trusted modules —
    /// anything loaded from disk should go through [`IrModule::get_buffer`].
    pub fn buffer(&self, id: BufferId) -> &Buffer {
        &self.buffers[id.0 as usize]
    }

    pub fn get_buffer(&self, id: BufferId) -> Option<&Buffer> {
        self.buffers.get(id.0 as usize)
    }

    /// Number of distinct storage classes.
    pub fn alloc_count(&self) -> usize {
        self.buffers
            .iter()
            .map(|b| b.alloc)
            .collect::<HashSet<_>>()
            .len()
    }

    pub fn to_bincode_bytes(&self) -> Result<Vec<u8>, IrIoError> {
        bincode::serialize(self).map_err(|err| IrIoError::Encode(err.to_string()))
    }

    pub fn from_bincode_slice(bytes: &[u8]) -> Result<Self, IrIoError> {
        bincode::deserialize(bytes).map_err(|err| IrIoError::Decode(err.to_string()))
    }

    pub fn save_bincode(&self, path: &Path) -> Result<(), IrIoError> {
        let bytes = self.to_bincode_bytes()?;
        fs::write(path, bytes).map_err(|source| IrIoError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn load_bincode(path: &Path) -> Result<Self, IrIoError> {
        let bytes = fs::read(path).map_err(|source| IrIoError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_bincode_slice(&bytes)
    }

    pub fn to_json_string(&self) -> Result<String, IrIoError> {
        serde_json::to_string_pretty(self).map_err(|err| IrIoError::Encode(err.to_string()))
    }
}

impl fmt::Display for IrModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "module {} {{", self.name)?;
        for buffer in &self.buffers {
            write!(f, "  buffer %b{} : {}", buffer.id.0, buffer.ty)?;
            if buffer.id.0 != buffer.alloc.0 {
                write!(f, " @alloc{}", buffer.alloc.0)?;
            }
            if let Some(ph) = buffer.placeholder {
                write!(f, " placeholder %p{}", ph.0)?;
            }
            writeln!(f, " // {}", buffer.name)?;
        }
        for instr in &self.instrs {
            write!(f, "  {}(", schema::inst_name(instr.kind))?;
            for (i, operand) in instr.operands.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                let role = match operand.kind {
                    OperandKind::In => "in",
                    OperandKind::Out => "out",
                    OperandKind::InOut => "inout",
                };
                write!(f, "{role} %b{}", operand.buffer.0)?;
            }
            writeln!(f, ") // {}", instr.name)?;
        }
        write!(f, "}}")
    }
}
