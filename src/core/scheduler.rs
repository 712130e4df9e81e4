// This module implements the list scheduler that turns the lowered Emitter sequence into the
// committed instruction stream. The accelerator is modelled as three resources (load,
// compute, store) with a free-at cycle each. Compute operations commit in program order;
// loads and stores may move ahead within a lookahead window once their producers have
// committed, provided their result fits without evicting anything and still leaves room for
// the results of the older operations they overtake. A pending load or store at the head of
// the program that would have to evict or reload waits while any other operation can commit
// cleanly. Among the eligible operations the one that can start earliest wins, then the one
// whose resource has the largest backlog, then program order, which keeps the schedule
// deterministic. Cycle estimates saturate instead of overflowing.
//
// Committing an operation is the only place on-chip memory changes: its inputs are pinned,
// its result is allocated (evicting victims and injecting Spill stores for tensors without a
// DRAM copy), it is encoded against the resolved addresses, and inputs whose last reader it
// was are released. A read of an evicted tensor first commits a Reload. Every committed
// operation records its estimated start and end cycle and the range of instructions it
// produced.

//! List scheduling over load, compute and store resources.

use super::architecture::Architecture;
use super::error::{CompileError, CompileResult};
use super::memory::{Allocation, MemoryKind, MemoryManager, Region};
use super::tensor::{DramAllocator, DramBank, TensorId, TensorTable};
use crate::tcu::emitter::{Emitter, Resolver, Resource};
use crate::tcu::instruction::Instruction;
use crate::tcu::layout::InstructionLayout;
use hashbrown::HashMap;
use std::cmp::Reverse;
use std::ops::Range;

/// Operations past the oldest pending one that loads and stores may overtake.
pub const DEFAULT_LOOKAHEAD: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub lookahead: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { lookahead: DEFAULT_LOOKAHEAD }
    }
}

/// One committed operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledOp {
    pub emitter: Emitter,
    /// Index in the lowered program; `None` for injected spills and reloads.
    pub origin: Option<usize>,
    pub resource: Resource,
    pub start_cycle: u64,
    pub end_cycle: u64,
    /// Instructions this operation produced.
    pub instructions: Range<usize>,
}

/// The committed program.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schedule {
    pub ops: Vec<ScheduledOp>,
    pub instructions: Vec<Instruction>,
    pub bytes: Vec<u8>,
}

impl Schedule {
    /// Estimated cycle at which the last operation finishes.
    pub fn total_cycles(&self) -> u64 {
        self.ops.iter().map(|op| op.end_cycle).max().unwrap_or(0)
    }

    pub fn busy_cycles(&self, resource: Resource) -> u64 {
        self.ops
            .iter()
            .filter(|op| op.resource == resource)
            .fold(0u64, |busy, op| busy.saturating_add(op.end_cycle - op.start_cycle))
    }

    pub fn spills(&self) -> usize {
        self.ops.iter().filter(|op| matches!(op.emitter, Emitter::Spill { .. })).count()
    }

    pub fn reloads(&self) -> usize {
        self.ops.iter().filter(|op| matches!(op.emitter, Emitter::Reload { .. })).count()
    }
}

/// The parts of a compilation the scheduler reads and drives.
pub struct SchedulerEnv<'a, 'arena> {
    pub arch: &'a Architecture,
    pub layout: &'a InstructionLayout,
    pub tensors: &'a mut TensorTable<'arena>,
    pub dram: &'a mut DramAllocator,
    pub memory: &'a mut MemoryManager,
}

pub struct Scheduler {
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> SchedulerConfig {
        self.config
    }

    /// Commit every operation of `program`, driving allocation, eviction and
    /// encoding in committed order.
    pub fn schedule(&self, program: &[Emitter], env: &mut SchedulerEnv<'_, '_>) -> CompileResult<Schedule> {
        log::debug!(
            "scheduling {} operations (lookahead {})",
            program.len(),
            self.config.lookahead
        );
        let mut run = Run::new(program, env, self.config)?;

        while !run.pending.is_empty() {
            let chosen = run.select(env)?;
            let emitter = program[chosen];

            let reads = emitter.reads();
            for &tensor in &reads {
                if env.memory.is_resident(tensor) {
                    continue;
                }
                let pins: Vec<TensorId> = reads
                    .iter()
                    .copied()
                    .filter(|&t| env.memory.is_resident(t))
                    .collect();
                run.commit(env, Emitter::Reload { tensor }, None, chosen, &pins)?;
            }
            run.commit(env, emitter, Some(chosen), chosen, &[])?;
        }

        env.memory.check_invariants()?;
        let schedule = run.out;
        log::debug!(
            "scheduled {} operations into {} instructions, {} spills, {} reloads, ~{} cycles",
            schedule.ops.len(),
            schedule.instructions.len(),
            schedule.spills(),
            schedule.reloads(),
            schedule.total_cycles()
        );
        Ok(schedule)
    }
}

/// State of one `schedule` call.
struct Run<'p> {
    program: &'p [Emitter],
    lookahead: usize,
    costs: Vec<u64>,
    committed: Vec<bool>,
    /// Uncommitted program indices, ascending.
    pending: Vec<usize>,
    producer: HashMap<TensorId, usize>,
    /// Program indices reading each tensor, ascending.
    readers: HashMap<TensorId, Vec<usize>>,
    remaining: HashMap<TensorId, usize>,
    /// Cycle at which each tensor's latest definition is available.
    ready: HashMap<TensorId, u64>,
    resource_free: [u64; 3],
    backlog: [u64; 3],
    out: Schedule,
}

impl<'p> Run<'p> {
    fn new(program: &'p [Emitter], env: &SchedulerEnv<'_, '_>, config: SchedulerConfig) -> CompileResult<Self> {
        let mut producer = HashMap::new();
        let mut readers: HashMap<TensorId, Vec<usize>> = HashMap::new();
        let mut backlog = [0u64; 3];
        let mut costs = Vec::with_capacity(program.len());

        for (idx, emitter) in program.iter().enumerate() {
            for tensor in emitter.reads() {
                let Some(&def) = producer.get(&tensor) else {
                    return Err(CompileError::Scheduling {
                        reason: format!("{} is read before it is defined", env.tensors.name(tensor)),
                        context: format!("operation {idx}: {}", emitter.describe(env.tensors)),
                    });
                };
                debug_assert!(def < idx);
                readers.entry(tensor).or_default().push(idx);
            }
            if let Some(tensor) = emitter.writes() {
                if producer.insert(tensor, idx).is_some() {
                    return Err(CompileError::Scheduling {
                        reason: format!("{} is defined twice", env.tensors.name(tensor)),
                        context: format!("operation {idx}: {}", emitter.describe(env.tensors)),
                    });
                }
            }
            let cost = emitter.estimated_cycles(env.arch, env.tensors);
            let slot = &mut backlog[emitter.resource().index()];
            *slot = slot.saturating_add(cost);
            costs.push(cost);
        }

        let remaining = readers.iter().map(|(&t, r)| (t, r.len())).collect();
        Ok(Self {
            program,
            lookahead: config.lookahead.max(1),
            costs,
            committed: vec![false; program.len()],
            pending: (0..program.len()).collect(),
            producer,
            readers,
            remaining,
            ready: HashMap::new(),
            resource_free: [0; 3],
            backlog,
            out: Schedule::default(),
        })
    }

    fn deps_committed(&self, idx: usize) -> bool {
        self.program[idx]
            .reads()
            .iter()
            .all(|t| self.producer.get(t).is_some_and(|&p| self.committed[p]))
    }

    fn ready_at(&self, emitter: &Emitter) -> u64 {
        let deps = emitter
            .reads()
            .iter()
            .filter_map(|t| self.ready.get(t).copied())
            .max()
            .unwrap_or(0);
        self.resource_free[emitter.resource().index()].max(deps)
    }

    /// Pick the next program operation to commit.
    fn select(&self, env: &SchedulerEnv<'_, '_>) -> CompileResult<usize> {
        let oldest = self.pending[0];
        let oldest_compute = self
            .pending
            .iter()
            .copied()
            .find(|&i| self.program[i].resource() == Resource::Compute);

        let mut best: Option<((u64, Reverse<u64>, usize), usize)> = None;
        let mut deferred = None;
        for &idx in self.pending.iter().take(self.lookahead) {
            let emitter = &self.program[idx];
            let resource = emitter.resource();
            if !self.deps_committed(idx) {
                continue;
            }
            if resource == Resource::Compute && Some(idx) != oldest_compute {
                continue;
            }
            if idx == oldest {
                if resource != Resource::Compute && !self.commits_cleanly(env, idx, false) {
                    deferred = Some(idx);
                    continue;
                }
            } else if !self.commits_cleanly(env, idx, resource != Resource::Compute) {
                // Overtaking operations must not disturb what is resident.
                continue;
            }
            let key = (self.ready_at(emitter), Reverse(self.backlog[resource.index()]), idx);
            if best.as_ref().map_or(true, |(best_key, _)| key < *best_key) {
                best = Some((key, idx));
            }
        }

        best.map(|(_, idx)| idx).or(deferred).ok_or_else(|| CompileError::Scheduling {
            reason: "no pending operation is ready".to_string(),
            context: format!(
                "{} pending, oldest is operation {oldest}: {}",
                self.pending.len(),
                self.program[oldest].describe(env.tensors)
            ),
        })
    }

    /// Whether operation `idx` can commit with its inputs resident and its
    /// result placed without evicting anything. With `reserve`, the result
    /// must also leave room for the results of the older pending operations.
    fn commits_cleanly(&self, env: &SchedulerEnv<'_, '_>, idx: usize, reserve: bool) -> bool {
        let emitter = &self.program[idx];
        if emitter.reads().iter().any(|&t| !env.memory.is_resident(t)) {
            return false;
        }
        let Some(written) = emitter.writes() else {
            return true;
        };
        let info = env.tensors.get(written);
        if !env.memory.fits(&info.dims, info.kind) {
            return false;
        }
        if !reserve {
            return true;
        }
        let reserved = self
            .pending
            .iter()
            .take_while(|&&i| i < idx)
            .filter_map(|&i| self.program[i].writes())
            .map(|t| env.tensors.get(t))
            .filter(|older| older.kind == info.kind)
            .fold(0usize, |sum, older| sum.saturating_add(older.dims.depth()));
        let available = env.memory.capacity(info.kind) - env.memory.used(info.kind);
        info.dims.depth().saturating_add(reserved) <= available
    }

    /// First uncommitted program reader of `tensor`.
    fn next_use(&self, tensor: TensorId) -> Option<usize> {
        self.readers
            .get(&tensor)
            .and_then(|r| r.iter().copied().find(|&i| !self.committed[i]))
    }

    fn commit(
        &mut self,
        env: &mut SchedulerEnv<'_, '_>,
        emitter: Emitter,
        origin: Option<usize>,
        anchor: usize,
        extra_pins: &[TensorId],
    ) -> CompileResult<()> {
        env.memory.set_clock(self.out.ops.len());
        let reads = emitter.reads();
        let pins: Vec<TensorId> = reads.iter().chain(extra_pins).copied().collect();
        for &tensor in &pins {
            env.memory.pin(tensor)?;
        }

        let writes = emitter.writes();
        if let Some(tensor) = writes {
            self.place(env, tensor, anchor)?;
        }

        let encoded = emitter.encode(&Resolver {
            arch: env.arch,
            layout: env.layout,
            tensors: env.tensors,
            memory: env.memory,
        })?;
        if let Some(binding) = writes.and_then(|tensor| env.memory.binding(tensor)) {
            self.check_hazards(env, binding.tensor, binding.kind, binding.region(), anchor, &emitter)?;
        }

        let resource = emitter.resource();
        let start_cycle = self.ready_at(&emitter);
        let end_cycle = start_cycle.saturating_add(emitter.estimated_cycles(env.arch, env.tensors));
        self.resource_free[resource.index()] = end_cycle;
        if let Some(tensor) = writes {
            self.ready.insert(tensor, end_cycle);
        }

        let first = self.out.instructions.len();
        self.out.instructions.extend(encoded.instructions);
        self.out.bytes.extend(encoded.bytes);
        log::trace!(
            "#{} {} on {resource} [{start_cycle}, {end_cycle})",
            self.out.ops.len(),
            emitter.describe(env.tensors)
        );
        self.out.ops.push(ScheduledOp {
            emitter,
            origin,
            resource,
            start_cycle,
            end_cycle,
            instructions: first..self.out.instructions.len(),
        });

        for &tensor in &pins {
            env.memory.unpin(tensor)?;
        }

        if let Some(idx) = origin {
            self.committed[idx] = true;
            self.pending.retain(|&i| i != idx);
            let slot = &mut self.backlog[resource.index()];
            *slot = slot.saturating_sub(self.costs[idx]);
            for &tensor in &reads {
                let left = self.remaining.get_mut(&tensor).map(|n| {
                    *n -= 1;
                    *n
                });
                if left == Some(0) && env.memory.is_resident(tensor) {
                    env.memory.free(tensor)?;
                }
            }
        }
        if let Some(tensor) = writes {
            if self.remaining.get(&tensor).copied().unwrap_or(0) == 0 && env.memory.is_resident(tensor) {
                log::debug!("{} has no readers", env.tensors.name(tensor));
                env.memory.free(tensor)?;
            }
        }

        for tensor in reads.into_iter().chain(writes) {
            env.memory.set_next_use(tensor, self.next_use(tensor));
        }
        Ok(())
    }

    /// Allocate `tensor`, evicting victims until it fits.
    fn place(&mut self, env: &mut SchedulerEnv<'_, '_>, tensor: TensorId, anchor: usize) -> CompileResult<()> {
        loop {
            let info = env.tensors.get(tensor);
            let dims = info.dims.clone();
            match env.memory.allocate(tensor, info.name, &dims, info.kind)? {
                Allocation::Placed(_) => return Ok(()),
                Allocation::Spill(decision) => {
                    for victim in decision.victims {
                        self.evict(env, victim, anchor)?;
                    }
                    env.memory.set_clock(self.out.ops.len());
                }
            }
        }
    }

    /// Evict `victim`, storing it first when DRAM holds no copy.
    fn evict(&mut self, env: &mut SchedulerEnv<'_, '_>, victim: TensorId, anchor: usize) -> CompileResult<()> {
        if env.tensors.get(victim).dram_copy().is_none() {
            let depth = env.tensors.get(victim).dims.depth();
            let slot = env.dram.allocate(DramBank::Dram0, depth)?;
            env.tensors.get_mut(victim).spill_slot = Some(slot);
            self.commit(env, Emitter::Spill { tensor: victim }, None, anchor, &[])?;
        } else {
            env.memory.set_clock(self.out.ops.len());
        }
        env.memory.spill(victim)?;
        Ok(())
    }

    /// A write to `region` must not land on a region an earlier pending
    /// operation still has to read.
    fn check_hazards(
        &self,
        env: &SchedulerEnv<'_, '_>,
        tensor: TensorId,
        kind: MemoryKind,
        region: Region,
        anchor: usize,
        emitter: &Emitter,
    ) -> CompileResult<()> {
        for &idx in self.pending.iter().take_while(|&&i| i < anchor) {
            for read in self.program[idx].reads() {
                if read == tensor {
                    continue;
                }
                let Some(binding) = env.memory.binding(read) else {
                    continue;
                };
                if binding.kind == kind && binding.region().overlaps(&region) {
                    return Err(CompileError::Scheduling {
                        reason: format!(
                            "write to {} overlaps {} still read by pending operation {idx}",
                            env.tensors.name(tensor),
                            env.tensors.name(read)
                        ),
                        context: emitter.describe(env.tensors),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::dimensions::MemoryDimensions;
    use crate::core::tensor::TensorRole;
    use crate::tcu::emitter::Activation;
    use bumpalo::Bump;

    struct Setup<'arena> {
        arch: Architecture,
        layout: InstructionLayout,
        tensors: TensorTable<'arena>,
        dram: DramAllocator,
        memory: MemoryManager,
    }

    impl<'arena> Setup<'arena> {
        fn new(arena: &'arena Bump, local_depth: usize) -> Self {
            let arch = Architecture { array_size: 4, local_depth, accumulator_depth: 64, ..Architecture::default() };
            Self {
                layout: InstructionLayout::new(&arch).unwrap(),
                memory: MemoryManager::new(&arch),
                tensors: TensorTable::new(arena),
                dram: DramAllocator::new(),
                arch,
            }
        }

        /// An 8-vector tensor.
        fn tensor(&mut self, name: &str, role: TensorRole) -> TensorId {
            self.tensor_with_rows(name, role, 8)
        }

        fn tensor_with_rows(&mut self, name: &str, role: TensorRole, rows: usize) -> TensorId {
            let kind = match role {
                TensorRole::Accumulator => MemoryKind::Accumulator,
                _ => MemoryKind::Local,
            };
            let dims = MemoryDimensions::vars(&[rows, 4], 4).unwrap();
            let id = self.tensors.add(name, dims, role, kind);
            if role == TensorRole::Input {
                self.tensors.get_mut(id).home = Some(self.dram.allocate(DramBank::Dram0, rows).unwrap());
            }
            id
        }

        fn output(&mut self, tensor: TensorId) {
            let depth = self.tensors.get(tensor).dims.depth();
            self.tensors.get_mut(tensor).export = Some(self.dram.allocate(DramBank::Dram0, depth).unwrap());
        }

        fn env(&mut self) -> SchedulerEnv<'_, 'arena> {
            SchedulerEnv {
                arch: &self.arch,
                layout: &self.layout,
                tensors: &mut self.tensors,
                dram: &mut self.dram,
                memory: &mut self.memory,
            }
        }

        fn run(&mut self, program: &[Emitter]) -> CompileResult<Schedule> {
            let mut env = self.env();
            Scheduler::new(SchedulerConfig::default()).schedule(program, &mut env)
        }
    }

    /// x -> a = relu x -> b = relu a -> y = b + a
    fn chain(s: &mut Setup<'_>) -> Vec<Emitter> {
        let x = s.tensor("x", TensorRole::Input);
        let acc1 = s.tensor("a.acc", TensorRole::Accumulator);
        let a = s.tensor("a", TensorRole::Intermediate);
        let acc2 = s.tensor("b.acc", TensorRole::Accumulator);
        let b = s.tensor("b", TensorRole::Intermediate);
        let acc3 = s.tensor("y.acc", TensorRole::Accumulator);
        let y = s.tensor("y", TensorRole::Intermediate);
        s.output(y);
        vec![
            Emitter::Load { tensor: x },
            Emitter::Accumulate { input: x, output: acc1, accumulate: false },
            Emitter::Activate { input: acc1, output: a, activation: Activation::Relu },
            Emitter::Accumulate { input: a, output: acc2, accumulate: false },
            Emitter::Activate { input: acc2, output: b, activation: Activation::Relu },
            Emitter::Accumulate { input: b, output: acc3, accumulate: false },
            Emitter::Accumulate { input: a, output: acc3, accumulate: true },
            Emitter::Activate { input: acc3, output: y, activation: Activation::Identity },
            Emitter::Store { tensor: y },
        ]
    }

    #[test]
    fn test_roomy_schedule_has_no_spills() {
        let arena = Bump::new();
        let mut s = Setup::new(&arena, 64);
        let program = chain(&mut s);
        let schedule = s.run(&program).unwrap();

        assert_eq!(schedule.ops.len(), program.len());
        assert_eq!(schedule.spills(), 0);
        assert_eq!(schedule.reloads(), 0);
        assert!(schedule.total_cycles() > 0);
        assert_eq!(s.memory.used(MemoryKind::Local), 0);
        assert_eq!(s.memory.used(MemoryKind::Accumulator), 0);
    }

    #[test]
    fn test_tight_schedule_spills_and_reloads() {
        let arena = Bump::new();
        let mut s = Setup::new(&arena, 12);
        let program = chain(&mut s);
        let schedule = s.run(&program).unwrap();

        let a = s.tensors.lookup("a").unwrap();
        let spill = schedule
            .ops
            .iter()
            .position(|op| op.emitter == Emitter::Spill { tensor: a })
            .expect("a is spilled");
        let reload = schedule
            .ops
            .iter()
            .position(|op| op.emitter == Emitter::Reload { tensor: a })
            .expect("a is reloaded");
        let consumer = schedule
            .ops
            .iter()
            .position(|op| op.origin == Some(6))
            .unwrap();
        assert!(spill < reload && reload < consumer);
        assert!(s.memory.stats().peak_local <= 12);
        assert!(s.tensors.get(a).spill_slot.is_some());
    }

    #[test]
    fn test_compute_commits_in_program_order() {
        let arena = Bump::new();
        let mut s = Setup::new(&arena, 64);
        let program = chain(&mut s);
        let schedule = s.run(&program).unwrap();

        let compute: Vec<usize> = schedule
            .ops
            .iter()
            .filter(|op| op.resource == Resource::Compute)
            .filter_map(|op| op.origin)
            .collect();
        let mut sorted = compute.clone();
        sorted.sort_unstable();
        assert_eq!(compute, sorted);
    }

    #[test]
    fn test_read_before_definition_is_rejected() {
        let arena = Bump::new();
        let mut s = Setup::new(&arena, 64);
        let x = s.tensor("x", TensorRole::Input);
        let err = s.run(&[Emitter::Store { tensor: x }]).unwrap_err();
        assert!(matches!(err, CompileError::Scheduling { .. }));
    }

    #[test]
    fn test_instruction_ranges_partition_stream() {
        let arena = Bump::new();
        let mut s = Setup::new(&arena, 12);
        let program = chain(&mut s);
        let schedule = s.run(&program).unwrap();

        let mut next = 0;
        for op in &schedule.ops {
            assert_eq!(op.instructions.start, next);
            assert!(op.end_cycle > op.start_cycle);
            next = op.instructions.end;
        }
        assert_eq!(next, schedule.instructions.len());
        assert_eq!(schedule.bytes.len(), next * s.layout.word_bytes());
    }

    #[test]
    fn test_early_load_leaves_room_for_older_results() {
        // Hoisting `w` right after `x` would fill local memory before `a` is
        // produced and force `w` out again.
        let arena = Bump::new();
        let mut s = Setup::new(&arena, 8);
        let x = s.tensor_with_rows("x", TensorRole::Input, 4);
        let acc1 = s.tensor_with_rows("a.acc", TensorRole::Accumulator, 4);
        let a = s.tensor_with_rows("a", TensorRole::Intermediate, 4);
        let w = s.tensor_with_rows("w", TensorRole::Input, 4);
        let acc2 = s.tensor_with_rows("y.acc", TensorRole::Accumulator, 4);
        let y = s.tensor_with_rows("y", TensorRole::Intermediate, 4);
        s.output(y);
        let program = vec![
            Emitter::Load { tensor: x },
            Emitter::Accumulate { input: x, output: acc1, accumulate: false },
            Emitter::Activate { input: acc1, output: a, activation: Activation::Relu },
            Emitter::Load { tensor: w },
            Emitter::Accumulate { input: x, output: acc2, accumulate: false },
            Emitter::Accumulate { input: w, output: acc2, accumulate: true },
            Emitter::Accumulate { input: a, output: acc2, accumulate: true },
            Emitter::Activate { input: acc2, output: y, activation: Activation::Identity },
            Emitter::Store { tensor: y },
        ];
        let schedule = s.run(&program).unwrap();

        assert_eq!(schedule.spills(), 0);
        assert_eq!(schedule.reloads(), 0);
        let position = |origin: usize| schedule.ops.iter().position(|op| op.origin == Some(origin)).unwrap();
        assert!(position(2) < position(3));
        assert!(position(4) < position(3));
        assert!(s.memory.stats().peak_local <= 8);
    }

    #[test]
    fn test_overlapping_write_is_a_hazard() {
        let arena = Bump::new();
        let mut s = Setup::new(&arena, 16);
        let program = chain(&mut s);
        let x = s.tensors.lookup("x").unwrap();
        let a = s.tensors.lookup("a").unwrap();
        let mut env = s.env();
        let mut run = Run::new(&program, &env, SchedulerConfig::default()).unwrap();
        run.commit(&mut env, program[0], Some(0), 0, &[]).unwrap();
        let x_region = env.memory.binding(x).unwrap().region();

        // Operation 1 still has to read `x`.
        let clash = Region { start: x_region.start + 4, len: 8 };
        let err = run
            .check_hazards(&env, a, MemoryKind::Local, clash, 2, &program[2])
            .unwrap_err();
        assert!(matches!(err, CompileError::Scheduling { ref reason, .. } if reason.contains("still read")));

        let apart = Region { start: x_region.end(), len: 8 };
        assert!(run.check_hazards(&env, a, MemoryKind::Local, apart, 2, &program[2]).is_ok());
        assert!(run.check_hazards(&env, a, MemoryKind::Accumulator, clash, 2, &program[2]).is_ok());
    }

    #[test]
    fn test_stalled_program_reports_scheduling_error() {
        let arena = Bump::new();
        let mut s = Setup::new(&arena, 16);
        let program = chain(&mut s);
        let env = s.env();
        let mut run = Run::new(&program, &env, SchedulerConfig::default()).unwrap();
        // Drop the load without committing it: nothing left depends only on
        // committed operations.
        run.pending.remove(0);

        let err = run.select(&env).unwrap_err();
        match err {
            CompileError::Scheduling { reason, context } => {
                assert!(reason.contains("no pending operation is ready"));
                assert!(context.contains("operation 1"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
