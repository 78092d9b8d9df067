//! Graph compiler core with pluggable hardware backends.
//!
//! The crate compiles a high-level dataflow [`Graph`] into an executable
//! function through a shared pipeline: graph verification, backend graph
//! transforms, lowering of complex node kinds, IR generation into an explicit
//! buffer-based instruction stream, and buffer sharing. Backends implement
//! the [`Backend`] trait and plug into the pipeline at fixed points; node and
//! instruction kinds are an open enumeration managed by [`schema`], so a
//! backend can introduce kinds without touching this crate.

pub mod backend;
pub mod context;
pub mod graph;
pub mod ir;
pub mod irgen;
pub mod lower;
pub mod pipeline;
pub mod schema;
pub mod share;
pub mod trace;
pub mod types;

pub use backend::{
    Backend, CompilationMode, CompileError, CompiledFunction, ExecutionError, IrGenError,
    UnsupportedOperationError,
};
pub use context::{Context, TensorData};
pub use graph::{Graph, GraphBuilder};
pub use types::{ElemKind, TypeDesc};
