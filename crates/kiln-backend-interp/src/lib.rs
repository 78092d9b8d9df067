//! Reference interpreter backend.
//!
//! Runs generated instruction streams directly over f32 host buffers. Slow
//! and simple on purpose: it exercises the full shared pipeline (lowering,
//! IR generation, buffer sharing) and serves as the conformance baseline for
//! real targets. The kernel table is extensible, so a test or embedder can
//! register kernels for instruction kinds the built-in set does not cover.

mod exec;

pub use exec::{
    kernel_copy, kernel_element_add, kernel_element_max, kernel_element_mul, kernel_splat,
    member_f64, ExecState, InterpFunction, Kernel, KernelSet,
};

use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use kiln::backend::{registry, Backend, CompilationMode, CompileError, CompiledFunction};
use kiln::context::Context;
use kiln::graph::Graph;
use kiln::irgen::{IrGenRuleSet, ManualRule};
use kiln::pipeline;
use kiln::schema::{self, InstKind, OpKind};
use kiln::lower;
use kiln::types::ElemKind;

pub const BACKEND_NAME: &str = "interp";

/// The interpreter backend. Construct with [`InterpBackend::new`] and adjust
/// through the builder methods.
pub struct InterpBackend {
    mode: CompilationMode,
    share_buffers: bool,
    kernels: KernelSet,
    rules: IrGenRuleSet,
}

impl Default for InterpBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InterpBackend {
    pub fn new() -> Self {
        Self {
            mode: CompilationMode::Inference,
            share_buffers: true,
            kernels: KernelSet::builtin(),
            rules: IrGenRuleSet::new(),
        }
    }

    pub fn with_mode(mut self, mode: CompilationMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_buffer_sharing(mut self, enabled: bool) -> Self {
        self.share_buffers = enabled;
        self
    }

    /// Registers a kernel for an instruction kind.
    pub fn with_kernel(mut self, kind: InstKind, kernel: Kernel) -> Self {
        self.kernels.insert(kind, kernel);
        self
    }

    /// Registers a manual IR-generation rule for a node kind.
    pub fn with_irgen_rule(mut self, kind: OpKind, rule: ManualRule) -> Self {
        self.rules.insert(kind, rule);
        self
    }

    pub fn kernels(&self) -> &KernelSet {
        &self.kernels
    }

    pub fn irgen_rules(&self) -> &IrGenRuleSet {
        &self.rules
    }
}

impl Backend for InterpBackend {
    fn name(&self) -> &str {
        BACKEND_NAME
    }

    fn compile(
        &self,
        mut graph: Graph,
        _ctx: &Context,
    ) -> Result<Box<dyn CompiledFunction>, CompileError> {
        let module = pipeline::run_with_rules(self, &mut graph, self.mode, &self.rules)?;
        Ok(Box::new(InterpFunction::new(module, self.kernels.clone())))
    }

    fn is_op_supported(&self, kind: OpKind, elem: ElemKind) -> bool {
        if elem != ElemKind::F32 {
            return false;
        }
        if self.rules.contains(kind) {
            return true;
        }
        if let Some(inst) = schema::auto_irgen_for(kind) {
            return self.kernels.contains(inst);
        }
        lower::lowers(kind)
    }

    fn should_share_buffers(&self) -> bool {
        self.share_buffers
    }

    fn save(
        &self,
        graph: &Graph,
        output_dir: &Path,
        network_name: &str,
    ) -> Result<(), CompileError> {
        let mut scratch = graph.clone();
        let module = pipeline::run_with_rules(self, &mut scratch, self.mode, &self.rules)?;

        fs::create_dir_all(output_dir)?;
        let payload_name = format!("{network_name}.kiln.bin");
        module
            .save_bincode(&output_dir.join(&payload_name))
            .map_err(|err| CompileError::Backend {
                backend: BACKEND_NAME.to_string(),
                message: err.to_string(),
            })?;

        let metadata = ArtifactMetadata {
            network: network_name.to_string(),
            backend: BACKEND_NAME.to_string(),
            entry: payload_name,
            instr_count: module.instrs.len(),
            buffer_count: module.buffers.len(),
        };
        let json = serde_json::to_string_pretty(&metadata).map_err(|err| {
            CompileError::Backend {
                backend: BACKEND_NAME.to_string(),
                message: err.to_string(),
            }
        })?;
        fs::write(output_dir.join(format!("{network_name}.json")), json)?;
        Ok(())
    }
}

/// Sidecar metadata written next to a saved artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub network: String,
    pub backend: String,
    pub entry: String,
    pub instr_count: usize,
    pub buffer_count: usize,
}

/// Registers the interpreter in the global backend registry.
pub fn register() {
    registry::register_backend(BACKEND_NAME, || Arc::new(InterpBackend::new()));
}
