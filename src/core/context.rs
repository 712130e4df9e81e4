// This module provides EmitContext, the per-compilation state threaded through the frontend
// rewrite and the scheduler. It is created once per compilation around a bumpalo arena and
// owns everything that changes while a graph is compiled: the tensor table (names interned
// in the arena), the DRAM allocator, the MemoryManager and the Scheduler, next to the
// immutable Architecture and its InstructionLayout. The requested output names are interned
// when the context is created and never change afterwards. Frontends register tensors through
// the add_* methods, which also give graph inputs and constants their DRAM home; the driver
// then hands the lowered program to schedule(), which lends the scheduler the parts of the
// context it drives.

//! Shared compilation context.
//!
//! The context is exclusively owned by one compilation and discarded once the
//! instruction stream is final.

use super::architecture::Architecture;
use super::dimensions::MemoryDimensions;
use super::error::CompileResult;
use super::memory::{MemoryKind, MemoryManager};
use super::scheduler::{Schedule, Scheduler, SchedulerConfig, SchedulerEnv};
use super::tensor::{DramAllocator, DramBank, DramLocation, TensorId, TensorRole, TensorTable};
use crate::tcu::emitter::Emitter;
use crate::tcu::layout::InstructionLayout;
use bumpalo::Bump;

pub struct EmitContext<'arena> {
    arch: Architecture,
    layout: InstructionLayout,
    scheduler: Scheduler,
    memory: MemoryManager,
    tensors: TensorTable<'arena>,
    dram: DramAllocator,
    outputs: Vec<&'arena str>,
}

impl<'arena> EmitContext<'arena> {
    /// Create the context for one compilation. Duplicate output names are
    /// kept once, in first-seen order.
    pub fn new(
        arena: &'arena Bump,
        arch: &Architecture,
        outputs: &[&str],
        config: SchedulerConfig,
    ) -> CompileResult<Self> {
        arch.validate()?;
        let layout = InstructionLayout::new(arch)?;
        layout.validate()?;

        let mut interned: Vec<&'arena str> = Vec::with_capacity(outputs.len());
        for &name in outputs {
            if !interned.iter().any(|&seen| seen == name) {
                interned.push(arena.alloc_str(name));
            }
        }

        Ok(Self {
            arch: arch.clone(),
            layout,
            scheduler: Scheduler::new(config),
            memory: MemoryManager::new(arch),
            tensors: TensorTable::new(arena),
            dram: DramAllocator::new(),
            outputs: interned,
        })
    }

    pub fn arch(&self) -> &Architecture {
        &self.arch
    }

    pub fn layout(&self) -> &InstructionLayout {
        &self.layout
    }

    pub fn memory(&self) -> &MemoryManager {
        &self.memory
    }

    pub fn tensors(&self) -> &TensorTable<'arena> {
        &self.tensors
    }

    pub fn dram(&self) -> &DramAllocator {
        &self.dram
    }

    /// Requested output names, in request order.
    pub fn outputs(&self) -> &[&'arena str] {
        &self.outputs
    }

    /// Scalars per memory vector.
    pub fn vector_size(&self) -> usize {
        self.arch.array_size
    }

    /// Register a graph input; it is read from DRAM0.
    pub fn add_input(&mut self, name: &str, dims: MemoryDimensions) -> CompileResult<TensorId> {
        let home = self.dram.allocate(DramBank::Dram0, dims.depth())?;
        let id = self.tensors.add(name, dims, TensorRole::Input, MemoryKind::Local);
        self.tensors.get_mut(id).home = Some(home);
        Ok(id)
    }

    /// Register a constant; it is read from DRAM1.
    pub fn add_constant(&mut self, name: &str, dims: MemoryDimensions) -> CompileResult<TensorId> {
        let home = self.dram.allocate(DramBank::Dram1, dims.depth())?;
        let id = self.tensors.add(name, dims, TensorRole::Constant, MemoryKind::Local);
        self.tensors.get_mut(id).home = Some(home);
        Ok(id)
    }

    /// Register a value computed into local memory.
    pub fn add_intermediate(&mut self, name: &str, dims: MemoryDimensions) -> TensorId {
        self.tensors.add(name, dims, TensorRole::Intermediate, MemoryKind::Local)
    }

    /// Register a partial result living in accumulator memory.
    pub fn add_accumulator(&mut self, name: &str, dims: MemoryDimensions) -> TensorId {
        self.tensors.add(name, dims, TensorRole::Accumulator, MemoryKind::Accumulator)
    }

    /// Give a tensor a DRAM0 export region for its `Store`. Idempotent.
    pub fn mark_output(&mut self, tensor: TensorId) -> CompileResult<DramLocation> {
        if let Some(export) = self.tensors.get(tensor).export {
            return Ok(export);
        }
        let depth = self.tensors.get(tensor).dims.depth();
        let export = self.dram.allocate(DramBank::Dram0, depth)?;
        self.tensors.get_mut(tensor).export = Some(export);
        Ok(export)
    }

    /// Run the scheduler over a lowered program.
    pub fn schedule(&mut self, program: &[Emitter]) -> CompileResult<Schedule> {
        let mut env = SchedulerEnv {
            arch: &self.arch,
            layout: &self.layout,
            tensors: &mut self.tensors,
            dram: &mut self.dram,
            memory: &mut self.memory,
        };
        self.scheduler.schedule(program, &mut env)
    }
}
