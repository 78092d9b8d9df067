//! Shared compile pipeline.
//!
//! Phase order is fixed: verify, pre-lowering hook, lowering, post-lowering
//! hook, per-node support check, IR generation, buffer sharing. A hook that
//! reports modification triggers re-verification before the next phase runs.

use crate::backend::{Backend, CompilationMode, CompileError, UnsupportedOperationError};
use crate::graph::Graph;
use crate::ir::IrModule;
use crate::irgen::{self, IrGenRuleSet};
use crate::lower;
use crate::schema;
use crate::share;
use crate::trace::{self, CompilePhase, PhaseEvent};

/// Runs the pipeline with no manual IR-generation rules.
pub fn run(
    backend: &dyn Backend,
    graph: &mut Graph,
    mode: CompilationMode,
) -> Result<IrModule, CompileError> {
    run_with_rules(backend, graph, mode, &IrGenRuleSet::default())
}

/// Runs the pipeline with backend-supplied manual IR-generation rules.
pub fn run_with_rules(
    backend: &dyn Backend,
    graph: &mut Graph,
    mode: CompilationMode,
    rules: &IrGenRuleSet,
) -> Result<IrModule, CompileError> {
    graph.verify()?;
    emit_graph_phase(CompilePhase::Verify, graph, false);

    let changed = backend.transform_pre_lowering(graph, mode)?;
    if changed {
        graph.verify()?;
    }
    emit_graph_phase(CompilePhase::PreLowering, graph, changed);

    let stats = lower::lower_graph(graph, backend, rules)?;
    graph.verify()?;
    emit_graph_phase(CompilePhase::Lowering, graph, stats.lowered > 0);

    let changed = backend.transform_post_lowering(graph, mode)?;
    if changed {
        graph.verify()?;
    }
    emit_graph_phase(CompilePhase::PostLowering, graph, changed);

    verify_supported(backend, graph)?;

    let mut module = irgen::generate(graph, rules)?;
    trace::emit(PhaseEvent {
        phase: CompilePhase::IrGen,
        graph: graph.name().to_string(),
        changed: true,
        nodes: graph.node_count(),
        instrs: module.instrs.len(),
    });

    if backend.should_share_buffers() {
        let share_stats = share::share_buffers(&mut module);
        trace::emit(PhaseEvent {
            phase: CompilePhase::BufferSharing,
            graph: graph.name().to_string(),
            changed: share_stats.merged > 0,
            nodes: graph.node_count(),
            instrs: module.instrs.len(),
        });
    }
    Ok(module)
}

/// Standalone pre-compile validation: every node kind must be supported by
/// the backend at each of its result element kinds.
pub fn verify_supported(backend: &dyn Backend, graph: &Graph) -> Result<(), CompileError> {
    for node in graph.nodes() {
        for ty in &node.results {
            if !backend.is_op_supported(node.kind, ty.elem) {
                return Err(UnsupportedOperationError {
                    kind: schema::op_name(node.kind),
                    elem: Some(ty.elem),
                }
                .into());
            }
        }
    }
    Ok(())
}

fn emit_graph_phase(phase: CompilePhase, graph: &Graph, changed: bool) {
    trace::emit(PhaseEvent {
        phase,
        graph: graph.name().to_string(),
        changed,
        nodes: graph.node_count(),
        instrs: 0,
    });
}
