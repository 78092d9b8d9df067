//! Instruction-stream interpretation over f32 host buffers.

use std::collections::HashMap;

use kiln::backend::{CompiledFunction, ExecutionError};
use kiln::context::{Context, TensorData};
use kiln::ir::{AllocId, Buffer, BufferId, Instr, IrModule};
use kiln::schema::{self, InstKind};
use kiln::types::ElemKind;

/// Kernel for one instruction kind.
pub type Kernel = fn(&Instr, &mut ExecState<'_>) -> Result<(), ExecutionError>;

/// Extensible kind-to-kernel table.
///
/// Backends and tests register kernels for instruction kinds the built-in
/// set does not cover.
#[derive(Clone, Default)]
pub struct KernelSet {
    kernels: HashMap<InstKind, Kernel>,
}

impl KernelSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kernels for every built-in instruction kind.
    pub fn builtin() -> Self {
        Self::new()
            .with(schema::builtin::element_add(), kernel_element_add)
            .with(schema::builtin::element_mul(), kernel_element_mul)
            .with(schema::builtin::element_max(), kernel_element_max)
            .with(schema::builtin::splat_inst(), kernel_splat)
            .with(schema::builtin::copy_inst(), kernel_copy)
    }

    pub fn with(mut self, kind: InstKind, kernel: Kernel) -> Self {
        self.insert(kind, kernel);
        self
    }

    pub fn insert(&mut self, kind: InstKind, kernel: Kernel) {
        self.kernels.insert(kind, kernel);
    }

    pub fn contains(&self, kind: InstKind) -> bool {
        self.kernels.contains_key(&kind)
    }

    pub fn get(&self, kind: InstKind) -> Option<Kernel> {
        self.kernels.get(&kind).copied()
    }
}

/// Mutable buffer state threaded through kernels during one execute call.
pub struct ExecState<'m> {
    module: &'m IrModule,
    allocs: HashMap<AllocId, Vec<f32>>,
}

impl<'m> ExecState<'m> {
    fn new(module: &'m IrModule) -> Result<Self, ExecutionError> {
        let mut allocs: HashMap<AllocId, Vec<f32>> = HashMap::new();
        for buffer in &module.buffers {
            if buffer.ty.elem != ElemKind::F32 {
                return Err(ExecutionError::UnsupportedElem {
                    elem: buffer.ty.elem,
                });
            }
            let count = buffer
                .ty
                .element_count()
                .ok_or_else(|| ExecutionError::Device {
                    message: format!("buffer '{}' element count overflows", buffer.name),
                })?;
            let slot = allocs.entry(buffer.alloc).or_default();
            if slot.len() < count {
                slot.resize(count, 0.0);
            }
        }
        Ok(Self { module, allocs })
    }

    fn element_count(&self, instr: &Instr, operand: usize) -> Result<usize, ExecutionError> {
        let buffer = self.operand_buffer(instr, operand)?;
        buffer.ty.element_count().ok_or_else(|| ExecutionError::Device {
            message: format!("buffer '{}' element count overflows", buffer.name),
        })
    }

    fn operand_id(&self, instr: &Instr, operand: usize) -> Result<BufferId, ExecutionError> {
        instr
            .operands
            .get(operand)
            .map(|op| op.buffer)
            .ok_or_else(|| ExecutionError::Malformed {
                instr: instr.name.clone(),
                message: format!("operand {operand} out of range"),
            })
    }

    /// Bounds-checked buffer lookup; loaded modules are untrusted.
    fn operand_buffer(&self, instr: &Instr, operand: usize) -> Result<&'m Buffer, ExecutionError> {
        let id = self.operand_id(instr, operand)?;
        self.module
            .get_buffer(id)
            .ok_or_else(|| ExecutionError::Malformed {
                instr: instr.name.clone(),
                message: format!("operand {operand} references unknown buffer {}", id.0),
            })
    }

    /// Current contents of an operand's buffer, cloned out so a kernel can
    /// freely write an aliasing destination.
    pub fn values(&self, instr: &Instr, operand: usize) -> Result<Vec<f32>, ExecutionError> {
        let buffer = self.operand_buffer(instr, operand)?;
        let count = self.element_count(instr, operand)?;
        let slot = self
            .allocs
            .get(&buffer.alloc)
            .ok_or_else(|| ExecutionError::Malformed {
                instr: instr.name.clone(),
                message: format!("buffer '{}' has no storage", buffer.name),
            })?;
        Ok(slot[..count].to_vec())
    }

    /// Overwrites an operand's buffer with `values`.
    pub fn store(
        &mut self,
        instr: &Instr,
        operand: usize,
        values: Vec<f32>,
    ) -> Result<(), ExecutionError> {
        let count = self.element_count(instr, operand)?;
        if values.len() != count {
            return Err(ExecutionError::Malformed {
                instr: instr.name.clone(),
                message: format!("expected {count} element(s), kernel produced {}", values.len()),
            });
        }
        let buffer = self.operand_buffer(instr, operand)?;
        let alloc = buffer.alloc;
        let slot = self
            .allocs
            .get_mut(&alloc)
            .ok_or_else(|| ExecutionError::Malformed {
                instr: instr.name.clone(),
                message: format!("buffer '{}' has no storage", buffer.name),
            })?;
        slot[..count].copy_from_slice(&values);
        Ok(())
    }

    fn load_input(&mut self, buffer: &Buffer, values: &[f32]) -> Result<(), ExecutionError> {
        let slot = self
            .allocs
            .get_mut(&buffer.alloc)
            .ok_or_else(|| ExecutionError::Device {
                message: format!("input '{}' has no storage", buffer.name),
            })?;
        if slot.len() < values.len() {
            return Err(ExecutionError::Device {
                message: format!("input '{}' overruns its storage", buffer.name),
            });
        }
        slot[..values.len()].copy_from_slice(values);
        Ok(())
    }
}

fn table_buffer<'m>(
    module: &'m IrModule,
    id: BufferId,
    table: &str,
) -> Result<&'m Buffer, ExecutionError> {
    module.get_buffer(id).ok_or_else(|| ExecutionError::Device {
        message: format!("{table} table references unknown buffer {}", id.0),
    })
}

/// Reads a required float member off an instruction.
pub fn member_f64(instr: &Instr, name: &str) -> Result<f64, ExecutionError> {
    instr
        .members
        .get(name)
        .and_then(|member| member.as_f64())
        .ok_or_else(|| ExecutionError::Malformed {
            instr: instr.name.clone(),
            message: format!("missing float member '{name}'"),
        })
}

fn binary(
    instr: &Instr,
    state: &mut ExecState<'_>,
    op: fn(f32, f32) -> f32,
) -> Result<(), ExecutionError> {
    let lhs = state.values(instr, 1)?;
    let rhs = state.values(instr, 2)?;
    if lhs.len() != rhs.len() {
        return Err(ExecutionError::Malformed {
            instr: instr.name.clone(),
            message: format!("operand lengths differ: {} vs {}", lhs.len(), rhs.len()),
        });
    }
    let out = lhs.iter().zip(&rhs).map(|(&a, &b)| op(a, b)).collect();
    state.store(instr, 0, out)
}

pub fn kernel_element_add(instr: &Instr, state: &mut ExecState<'_>) -> Result<(), ExecutionError> {
    binary(instr, state, |a, b| a + b)
}

pub fn kernel_element_mul(instr: &Instr, state: &mut ExecState<'_>) -> Result<(), ExecutionError> {
    binary(instr, state, |a, b| a * b)
}

pub fn kernel_element_max(instr: &Instr, state: &mut ExecState<'_>) -> Result<(), ExecutionError> {
    binary(instr, state, f32::max)
}

pub fn kernel_splat(instr: &Instr, state: &mut ExecState<'_>) -> Result<(), ExecutionError> {
    let value = member_f64(instr, "value")? as f32;
    let count = state.element_count(instr, 0)?;
    state.store(instr, 0, vec![value; count])
}

pub fn kernel_copy(instr: &Instr, state: &mut ExecState<'_>) -> Result<(), ExecutionError> {
    let src = state.values(instr, 1)?;
    state.store(instr, 0, src)
}

/// Compiled form of a graph on the interpreter: the generated module plus
/// the kernel table it runs with.
pub struct InterpFunction {
    module: IrModule,
    kernels: KernelSet,
}

impl InterpFunction {
    pub fn new(module: IrModule, kernels: KernelSet) -> Self {
        Self { module, kernels }
    }

    pub fn module(&self) -> &IrModule {
        &self.module
    }
}

impl CompiledFunction for InterpFunction {
    fn execute(&mut self, ctx: &mut Context) -> Result<(), ExecutionError> {
        let mut state = ExecState::new(&self.module)?;

        for &(ph, buffer_id) in &self.module.inputs {
            let buffer = table_buffer(&self.module, buffer_id, "input")?;
            let data = ctx.get(ph).ok_or_else(|| ExecutionError::MissingBinding {
                name: buffer.name.clone(),
            })?;
            if *data.ty() != buffer.ty {
                return Err(ExecutionError::BindingType {
                    name: buffer.name.clone(),
                });
            }
            let values = data.as_f32().ok_or(ExecutionError::UnsupportedElem {
                elem: data.ty().elem,
            })?;
            state.load_input(buffer, &values)?;
        }

        for instr in &self.module.instrs {
            let kernel =
                self.kernels
                    .get(instr.kind)
                    .ok_or_else(|| ExecutionError::MissingKernel {
                        kind: schema::inst_name(instr.kind),
                    })?;
            kernel(instr, &mut state)?;
        }

        // Output bindings are written only after the whole stream succeeded.
        for &(ph, buffer_id) in &self.module.outputs {
            let buffer = table_buffer(&self.module, buffer_id, "output")?;
            let count = buffer
                .ty
                .element_count()
                .ok_or_else(|| ExecutionError::Device {
                    message: format!("buffer '{}' element count overflows", buffer.name),
                })?;
            let slot = &state.allocs[&buffer.alloc];
            let data = TensorData::from_f32(buffer.ty.dims.clone(), &slot[..count]).ok_or_else(
                || ExecutionError::Device {
                    message: format!("output '{}' shape does not cover its data", buffer.name),
                },
            )?;
            ctx.bind(ph, data);
        }
        Ok(())
    }
}
