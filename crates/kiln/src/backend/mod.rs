//! Backend abstraction.
//!
//! A [`Backend`] turns a verified [`Graph`] into an executable
//! [`CompiledFunction`]. The trait is the single integration point for new
//! targets: the shared pipeline calls back into the backend at fixed points
//! (pre/post-lowering transforms, lowering and buffer-sharing gates) and the
//! backend supplies the final codegen step inside `compile`.

pub mod registry;

use std::fmt;
use std::path::Path;

use thiserror::Error;

use crate::context::Context;
use crate::graph::{Graph, GraphError, Node};
use crate::schema::OpKind;
use crate::types::ElemKind;

/// Stateless hint passed to graph transforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompilationMode {
    Inference,
    Training,
}

/// A node kind / element type pair with no lowering or IR-generation path.
#[derive(Debug, Clone, PartialEq)]
pub struct UnsupportedOperationError {
    pub kind: String,
    pub elem: Option<ElemKind>,
}

impl std::error::Error for UnsupportedOperationError {}

impl fmt::Display for UnsupportedOperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.elem {
            Some(elem) => write!(
                f,
                "operation '{}' over {elem} has no lowering or IR generation path",
                self.kind
            ),
            None => write!(
                f,
                "operation '{}' has no lowering or IR generation path",
                self.kind
            ),
        }
    }
}

/// Structural failure while emitting instructions for a node.
#[derive(Debug, Error)]
pub enum IrGenError {
    #[error("no IR generation rule for node '{node}' of kind '{kind}'")]
    NoRule { node: String, kind: String },
    #[error("instruction kind '{kind}' emitted for '{node}' is not registered")]
    UnknownInstKind { node: String, kind: String },
    #[error("'{kind}' binds {expected} operand(s), node '{node}' supplies {found}")]
    OperandArity {
        node: String,
        kind: String,
        expected: usize,
        found: usize,
    },
    #[error("node '{node}' is missing member '{member}' required by '{kind}'")]
    MissingMember {
        node: String,
        kind: String,
        member: String,
    },
    #[error("input {input} of node '{node}' has no emitted producer")]
    MissingProducer { node: String, input: usize },
}

/// Umbrella error for the whole compile path.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error(transparent)]
    Unsupported(#[from] UnsupportedOperationError),
    #[error(transparent)]
    IrGen(#[from] IrGenError),
    #[error("graph verification failed: {0}")]
    Graph(#[from] GraphError),
    #[error("backend '{backend}' failed: {message}")]
    Backend { backend: String, message: String },
    #[error("backend '{backend}' does not implement save")]
    SaveUnsupported { backend: String },
    #[error("artifact io failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Runtime failure of a compiled function. Never retried implicitly; unless a
/// variant documents otherwise the function remains callable afterwards.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("no binding for placeholder '{name}'")]
    MissingBinding { name: String },
    #[error("binding for placeholder '{name}' does not match its declared type")]
    BindingType { name: String },
    #[error("element kind {elem} is not executable on this backend")]
    UnsupportedElem { elem: ElemKind },
    #[error("no kernel registered for instruction kind '{kind}'")]
    MissingKernel { kind: String },
    #[error("instruction '{instr}' is malformed: {message}")]
    Malformed { instr: String, message: String },
    #[error("device failure: {message}")]
    Device { message: String },
}

/// Executable product of a successful compile.
///
/// `execute` copies input placeholder bindings in, runs the instruction
/// stream, and writes output bindings back only after the whole stream
/// succeeded; a failed call leaves output bindings untouched. Calls are
/// sequential; the function is re-entrant across calls.
pub trait CompiledFunction: Send {
    fn execute(&mut self, ctx: &mut Context) -> Result<(), ExecutionError>;
}

/// A compilation target.
///
/// Only `name`, `compile` and `is_op_supported` are mandatory; every hook has
/// a conservative default so a minimal backend stays small.
pub trait Backend: Send + Sync {
    fn name(&self) -> &str;

    /// Consumes the graph, runs the shared pipeline plus backend codegen.
    fn compile(
        &self,
        graph: Graph,
        ctx: &Context,
    ) -> Result<Box<dyn CompiledFunction>, CompileError>;

    /// Pure capability query. Any graph built solely from supported pairs is
    /// guaranteed to compile.
    fn is_op_supported(&self, kind: OpKind, elem: ElemKind) -> bool;

    /// Graph transform before lowering. Returns `Ok(true)` when the graph was
    /// modified, which triggers re-verification. Must be idempotent-safe.
    fn transform_pre_lowering(
        &self,
        _graph: &mut Graph,
        _mode: CompilationMode,
    ) -> Result<bool, CompileError> {
        Ok(false)
    }

    /// Graph transform after lowering; same contract as
    /// [`Backend::transform_pre_lowering`].
    fn transform_post_lowering(
        &self,
        _graph: &mut Graph,
        _mode: CompilationMode,
    ) -> Result<bool, CompileError> {
        Ok(false)
    }

    /// Whether the lowering engine may rewrite this node.
    fn should_lower(&self, _node: &Node) -> bool {
        true
    }

    /// Whether the buffer-sharing pass runs on generated IR.
    fn should_share_buffers(&self) -> bool {
        true
    }

    /// Writes a self-contained compiled artifact for later standalone use.
    fn save(
        &self,
        _graph: &Graph,
        _output_dir: &Path,
        _network_name: &str,
    ) -> Result<(), CompileError> {
        Err(CompileError::SaveUnsupported {
            backend: self.name().to_string(),
        })
    }
}
