//! Compile-phase trace events.
//!
//! The pipeline emits one event per phase into a process-global sink.
//! Without an installed sink emission is a no-op.

use std::sync::{Arc, Mutex, OnceLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompilePhase {
    Verify,
    PreLowering,
    Lowering,
    PostLowering,
    IrGen,
    BufferSharing,
}

#[derive(Debug, Clone)]
pub struct PhaseEvent {
    pub phase: CompilePhase,
    pub graph: String,
    /// Whether the phase modified the graph or IR.
    pub changed: bool,
    pub nodes: usize,
    pub instrs: usize,
}

pub type TraceSink = Arc<dyn Fn(PhaseEvent) + Send + Sync>;

static SINK: OnceLock<Mutex<Option<TraceSink>>> = OnceLock::new();

fn sink_slot() -> &'static Mutex<Option<TraceSink>> {
    SINK.get_or_init(|| Mutex::new(None))
}

/// Installs (or clears, with `None`) the global sink.
pub fn set_sink(sink: Option<TraceSink>) {
    *sink_slot().lock().expect("trace sink poisoned") = sink;
}

pub fn emit(event: PhaseEvent) {
    let sink = sink_slot().lock().expect("trace sink poisoned").clone();
    if let Some(sink) = sink {
        sink(event);
    }
}
