// This module defines the compiler driver. Compiler holds the target Architecture and the
// CompileOptions and runs one compilation per compile() call: a fresh bumpalo arena and
// EmitContext are created, the frontend traverses the graph backward from the requested
// outputs and rewrites the reachable nodes into Emitter operations, and the scheduler
// commits them into the instruction stream. Everything a caller needs afterwards is copied
// out of the arena into a CompiledProgram before the context is dropped: the schedule with
// its encoded words, the binding history of on-chip memory, the tensor names, the DRAM
// placement of every graph input, constant and output, and the CompilationSummary. The
// program carries the fingerprint of the architecture it was compiled for, renders the
// machine-parameter header and a program listing, and writes the raw instruction stream.

//! Compiler driver.
//!
//! ```text
//! outputs ──► Frontend::traverse ──► Frontend::rewrite ──► Scheduler ──► CompiledProgram
//!                                         │                   │
//!                                         └──── EmitContext ──┘
//! ```

use super::architecture::Architecture;
use super::context::EmitContext;
use super::error::{CompileError, CompileResult};
use super::frontend::Frontend;
use super::memory::Binding;
use super::scheduler::{Schedule, ScheduledOp, SchedulerConfig};
use super::summary::CompilationSummary;
use super::tensor::{DramLocation, TensorId, TensorRole};
use crate::tcu::header::render_header;
use crate::tcu::instruction::Instruction;
use crate::tcu::layout::InstructionLayout;
use bumpalo::Bump;
use std::fmt::Write as _;
use std::io;

/// Tunables of one compilation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompileOptions {
    pub scheduler: SchedulerConfig,
}

/// Which side of the program a DRAM tensor is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IoKind {
    Input,
    Constant,
    Output,
}

/// A tensor the host places in, or reads back from, DRAM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoTensor {
    pub name: String,
    pub kind: IoKind,
    pub location: DramLocation,
    pub shape: Vec<usize>,
    /// Vectors occupied in DRAM.
    pub depth: usize,
}

/// Result of a successful compilation.
#[derive(Debug, Clone)]
pub struct CompiledProgram {
    arch: Architecture,
    layout: InstructionLayout,
    schedule: Schedule,
    bindings: Vec<Binding>,
    tensor_names: Vec<String>,
    op_labels: Vec<String>,
    io: Vec<IoTensor>,
    summary: CompilationSummary,
    fingerprint: String,
}

impl CompiledProgram {
    fn from_context(ctx: &EmitContext<'_>, schedule: Schedule) -> Self {
        let tensors = ctx.tensors();
        let op_labels = schedule.ops.iter().map(|op| op.emitter.describe(tensors)).collect();
        let tensor_names = tensors.iter().map(|(_, info)| info.name.to_string()).collect();

        let mut io = Vec::new();
        for (_, info) in tensors.iter() {
            let kind = match info.role {
                TensorRole::Input => IoKind::Input,
                TensorRole::Constant => IoKind::Constant,
                _ => continue,
            };
            if let Some(location) = info.home {
                io.push(IoTensor {
                    name: info.name.to_string(),
                    kind,
                    location,
                    shape: info.dims.shape().to_vec(),
                    depth: info.dims.depth(),
                });
            }
        }
        for (_, info) in tensors.iter() {
            if let Some(location) = info.export {
                io.push(IoTensor {
                    name: info.name.to_string(),
                    kind: IoKind::Output,
                    location,
                    shape: info.dims.shape().to_vec(),
                    depth: info.dims.depth(),
                });
            }
        }

        let summary = CompilationSummary::collect(ctx.arch(), &schedule, &ctx.memory().stats(), ctx.dram());
        Self {
            arch: ctx.arch().clone(),
            layout: ctx.layout().clone(),
            bindings: ctx.memory().history().to_vec(),
            tensor_names,
            op_labels,
            io,
            summary,
            fingerprint: ctx.arch().fingerprint(),
            schedule,
        }
    }

    pub fn arch(&self) -> &Architecture {
        &self.arch
    }

    pub fn layout(&self) -> &InstructionLayout {
        &self.layout
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn ops(&self) -> &[ScheduledOp] {
        &self.schedule.ops
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.schedule.instructions
    }

    /// The encoded instruction stream, little-endian words back to back.
    pub fn bytes(&self) -> &[u8] {
        &self.schedule.bytes
    }

    /// Every on-chip binding made during scheduling, in allocation order.
    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    pub fn tensor_name(&self, tensor: TensorId) -> &str {
        &self.tensor_names[tensor.index()]
    }

    /// Readable form of the committed operation at `position`.
    pub fn op_label(&self, position: usize) -> &str {
        &self.op_labels[position]
    }

    pub fn io(&self) -> &[IoTensor] {
        &self.io
    }

    pub fn summary(&self) -> &CompilationSummary {
        &self.summary
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// C header describing the target and the DRAM placement of the program.
    pub fn header(&self) -> String {
        render_header(&self.arch, &self.layout, &self.io, self.schedule.instructions.len())
    }

    /// Fail unless `arch` is the machine this program was compiled for.
    pub fn check_compatible(&self, arch: &Architecture) -> CompileResult<()> {
        let found = arch.fingerprint();
        if found != self.fingerprint {
            return Err(CompileError::Incompatible {
                expected: self.fingerprint.clone(),
                found,
            });
        }
        Ok(())
    }

    pub fn write_program(&self, out: &mut impl io::Write) -> io::Result<()> {
        out.write_all(&self.schedule.bytes)?;
        out.flush()
    }

    /// One line per instruction, grouped under the operation that emitted it.
    pub fn listing(&self) -> String {
        let mut text = String::new();
        for (op, label) in self.schedule.ops.iter().zip(&self.op_labels) {
            let _ = writeln!(
                text,
                "; {label} [{}] cycles {}..{}",
                op.resource, op.start_cycle, op.end_cycle
            );
            for idx in op.instructions.clone() {
                let _ = writeln!(text, "{idx:5}  {}", self.schedule.instructions[idx]);
            }
        }
        text
    }
}

/// Compiles graphs for one architecture.
#[derive(Debug, Clone)]
pub struct Compiler {
    arch: Architecture,
    options: CompileOptions,
}

impl Compiler {
    pub fn new(arch: Architecture, options: CompileOptions) -> CompileResult<Self> {
        arch.validate()?;
        Ok(Self { arch, options })
    }

    pub fn arch(&self) -> &Architecture {
        &self.arch
    }

    pub fn options(&self) -> CompileOptions {
        self.options
    }

    /// Compile everything `outputs` depends on.
    pub fn compile<F: Frontend + ?Sized>(&self, frontend: &F, outputs: &[&str]) -> CompileResult<CompiledProgram> {
        let arena = Bump::new();
        let mut ctx = EmitContext::new(&arena, &self.arch, outputs, self.options.scheduler)?;
        log::debug!("compiling {} outputs for {}", ctx.outputs().len(), self.arch);

        let nodes = frontend.traverse(ctx.outputs())?;
        let program = frontend.rewrite(&mut ctx, &nodes)?;
        let schedule = ctx.schedule(&program)?;
        let compiled = CompiledProgram::from_context(&ctx, schedule);

        log::debug!(
            "compiled {} instructions ({} bytes, arena {} bytes)",
            compiled.instructions().len(),
            compiled.bytes().len(),
            arena.allocated_bytes()
        );
        Ok(compiled)
    }
}

/// Compile `outputs` of a graph with default options.
pub fn compile<F: Frontend + ?Sized>(
    frontend: &F,
    outputs: &[&str],
    arch: &Architecture,
) -> CompileResult<CompiledProgram> {
    Compiler::new(arch.clone(), CompileOptions::default())?.compile(frontend, outputs)
}
