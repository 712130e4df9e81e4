//! On-chip memory allocation and management.
//!
//! This module implements the MemoryManager that places tensors in the local
//! scratchpad and in the accumulator memory, tracks which tensors are
//! resident, and decides spills to DRAM when a request does not fit. It plays
//! the part a register file plays in a CPU compiler, with contiguous regions
//! instead of single registers.
//!
//! Placement is best-fit over a free list kept sorted by address; released
//! regions are always coalesced with their neighbours, so fragmentation never
//! outlives the tensors that caused it. When no region fits, victims are
//! chosen by furthest next use (then larger size, then lower tensor id) among
//! the resident tensors that are neither pinned nor in accumulator memory.
//! The manager only *decides* the spill; the scheduler evicts the victims,
//! injects the matching store operations and retries.

use super::dimensions::MemoryDimensions;
use super::error::{CompileError, CompileResult};
use super::tensor::TensorId;
use super::architecture::Architecture;
use hashbrown::HashMap;
use std::fmt;

/// The two on-chip memories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MemoryKind {
    Local,
    Accumulator,
}

impl MemoryKind {
    pub const ALL: [MemoryKind; 2] = [MemoryKind::Local, MemoryKind::Accumulator];

    pub const fn name(self) -> &'static str {
        match self {
            MemoryKind::Local => "local",
            MemoryKind::Accumulator => "accumulator",
        }
    }
}

impl fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A run of vectors `[start, start + len)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub start: usize,
    pub len: usize,
}

impl Region {
    pub fn end(&self) -> usize {
        self.start + self.len
    }

    pub fn overlaps(&self, other: &Region) -> bool {
        self.start < other.end() && other.start < self.end()
    }
}

/// Free regions of one memory, sorted by address and coalesced.
#[derive(Debug, Clone)]
struct FreeList {
    capacity: usize,
    free: Vec<Region>,
}

impl FreeList {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            free: vec![Region { start: 0, len: capacity }],
        }
    }

    /// Smallest free region that fits `len` vectors at `align`; ties go to
    /// the lowest address. Returns the aligned start.
    fn best_fit(&self, len: usize, align: usize) -> Option<usize> {
        let align = align.max(1);
        let mut best: Option<(usize, usize)> = None;
        for region in &self.free {
            let start = region.start.div_ceil(align) * align;
            if start.checked_add(len).map_or(true, |end| end > region.end()) {
                continue;
            }
            if best.map_or(true, |(best_len, _)| region.len < best_len) {
                best = Some((region.len, start));
            }
        }
        best.map(|(_, start)| start)
    }

    /// Carve `[start, start + len)` out of the free region containing it.
    fn reserve(&mut self, start: usize, len: usize) -> bool {
        let wanted = Region { start, len };
        let Some(idx) = self
            .free
            .iter()
            .position(|r| r.start <= start && wanted.end() <= r.end())
        else {
            return false;
        };
        let region = self.free[idx];
        let mut pieces = Vec::with_capacity(2);
        if region.start < start {
            pieces.push(Region { start: region.start, len: start - region.start });
        }
        if wanted.end() < region.end() {
            pieces.push(Region { start: wanted.end(), len: region.end() - wanted.end() });
        }
        self.free.splice(idx..=idx, pieces);
        true
    }

    /// Return a region; fails if any part of it is already free.
    fn release(&mut self, region: Region) -> bool {
        if region.end() > self.capacity {
            return false;
        }
        let idx = self.free.partition_point(|r| r.start < region.start);
        if idx > 0 && self.free[idx - 1].overlaps(&region) {
            return false;
        }
        if idx < self.free.len() && self.free[idx].overlaps(&region) {
            return false;
        }
        self.free.insert(idx, region);

        // Coalesce with the next region, then with the previous one.
        if idx + 1 < self.free.len() && self.free[idx].end() == self.free[idx + 1].start {
            self.free[idx].len += self.free[idx + 1].len;
            self.free.remove(idx + 1);
        }
        if idx > 0 && self.free[idx - 1].end() == self.free[idx].start {
            self.free[idx - 1].len += self.free[idx].len;
            self.free.remove(idx);
        }
        true
    }

    fn used(&self) -> usize {
        self.capacity - self.free.iter().map(|r| r.len).sum::<usize>()
    }
}

/// A tensor placed in on-chip memory, with its liveness interval in commit
/// positions of the schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub tensor: TensorId,
    pub kind: MemoryKind,
    pub address: usize,
    pub size: usize,
    pub allocated_at: usize,
    pub released_at: Option<usize>,
    /// Released by a spill rather than after its last use.
    pub spilled: bool,
}

impl Binding {
    pub fn region(&self) -> Region {
        Region { start: self.address, len: self.size }
    }

    /// Whether the binding holds its region at commit position `pos`.
    pub fn is_live_at(&self, pos: usize) -> bool {
        self.allocated_at <= pos && self.released_at.map_or(true, |end| pos <= end)
    }
}

#[derive(Debug, Clone, Copy)]
struct Resident {
    history_idx: usize,
    pins: u32,
    next_use: Option<usize>,
}

/// Result of an allocation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Allocation {
    /// The tensor now lives at this address.
    Placed(usize),
    /// Nothing was placed; evicting these tensors makes room.
    Spill(SpillDecision),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpillDecision {
    pub kind: MemoryKind,
    pub victims: Vec<TensorId>,
}

/// Allocation statistics.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MemoryStats {
    pub peak_local: usize,
    pub peak_accumulator: usize,
    pub allocations: usize,
    pub spills: usize,
}

impl MemoryStats {
    pub fn peak(&self, kind: MemoryKind) -> usize {
        match kind {
            MemoryKind::Local => self.peak_local,
            MemoryKind::Accumulator => self.peak_accumulator,
        }
    }
}

/// MemoryManager owns the allocation state of local and accumulator memory
/// for one compilation.
///
/// Only the scheduler drives it: allocation right before the operation that
/// first writes a tensor, release right after the last reader committed.
pub struct MemoryManager {
    local: FreeList,
    accumulator: FreeList,
    resident: HashMap<TensorId, Resident>,
    history: Vec<Binding>,
    /// Commit position stamped on new and released bindings.
    clock: usize,
    stats: MemoryStats,
}

impl MemoryManager {
    pub fn new(arch: &Architecture) -> Self {
        Self::with_capacity(arch.local_depth, arch.accumulator_depth)
    }

    /// Create a manager with explicit capacities in vectors.
    pub fn with_capacity(local: usize, accumulator: usize) -> Self {
        Self {
            local: FreeList::new(local),
            accumulator: FreeList::new(accumulator),
            resident: HashMap::new(),
            history: Vec::new(),
            clock: 0,
            stats: MemoryStats::default(),
        }
    }

    fn list(&self, kind: MemoryKind) -> &FreeList {
        match kind {
            MemoryKind::Local => &self.local,
            MemoryKind::Accumulator => &self.accumulator,
        }
    }

    fn list_mut(&mut self, kind: MemoryKind) -> &mut FreeList {
        match kind {
            MemoryKind::Local => &mut self.local,
            MemoryKind::Accumulator => &mut self.accumulator,
        }
    }

    pub fn capacity(&self, kind: MemoryKind) -> usize {
        self.list(kind).capacity
    }

    /// Vectors currently held by resident tensors.
    pub fn used(&self, kind: MemoryKind) -> usize {
        self.list(kind).used()
    }

    pub fn set_clock(&mut self, position: usize) {
        self.clock = position;
    }

    pub fn clock(&self) -> usize {
        self.clock
    }

    /// Reserve room for `tensor` in `kind` memory.
    ///
    /// Returns the address when a free region fits, otherwise the set of
    /// victims whose eviction makes the request fit. Fails with
    /// `OutOfMemory` when the request exceeds the capacity or no victim set
    /// frees enough contiguous room.
    pub fn allocate(
        &mut self,
        tensor: TensorId,
        name: &str,
        dims: &MemoryDimensions,
        kind: MemoryKind,
    ) -> CompileResult<Allocation> {
        if self.resident.contains_key(&tensor) {
            return Err(CompileError::MemoryInvariant {
                reason: format!("{name} ({tensor}) is already resident"),
            });
        }

        let size = dims.depth();
        let align = dims.alignment();
        let capacity = self.capacity(kind);
        let out_of_memory = || CompileError::OutOfMemory {
            tensor: name.to_string(),
            kind,
            requested: size,
            capacity,
        };
        if size == 0 || size > capacity {
            return Err(out_of_memory());
        }

        if let Some(address) = self.list(kind).best_fit(size, align) {
            self.place(tensor, kind, address, size)?;
            log::trace!("placed {name} at {kind}[{address}..{}]", address + size);
            return Ok(Allocation::Placed(address));
        }

        let victims = self.choose_victims(kind, size, align).ok_or_else(out_of_memory)?;
        log::debug!(
            "{name} needs {size} {kind} vectors, spilling {} tensor(s)",
            victims.len()
        );
        Ok(Allocation::Spill(SpillDecision { kind, victims }))
    }

    /// Victims in eviction order until a simulated free list fits the request.
    fn choose_victims(&self, kind: MemoryKind, size: usize, align: usize) -> Option<Vec<TensorId>> {
        if kind == MemoryKind::Accumulator {
            return None;
        }

        let mut candidates: Vec<(TensorId, &Resident, &Binding)> = self
            .resident
            .iter()
            .map(|(&tensor, res)| (tensor, res, &self.history[res.history_idx]))
            .filter(|(_, res, binding)| binding.kind == kind && res.pins == 0)
            .collect();
        candidates.sort_by(|a, b| {
            let next_a = a.1.next_use.unwrap_or(usize::MAX);
            let next_b = b.1.next_use.unwrap_or(usize::MAX);
            next_b
                .cmp(&next_a)
                .then(b.2.size.cmp(&a.2.size))
                .then(a.0.cmp(&b.0))
        });

        let mut simulated = self.list(kind).clone();
        let mut victims = Vec::new();
        for (tensor, _, binding) in candidates {
            simulated.release(binding.region());
            victims.push(tensor);
            if simulated.best_fit(size, align).is_some() {
                return Some(victims);
            }
        }
        None
    }

    fn place(&mut self, tensor: TensorId, kind: MemoryKind, address: usize, size: usize) -> CompileResult<()> {
        if !self.list_mut(kind).reserve(address, size) {
            return Err(CompileError::MemoryInvariant {
                reason: format!("{kind}[{address}..{}] is not free", address + size),
            });
        }
        self.history.push(Binding {
            tensor,
            kind,
            address,
            size,
            allocated_at: self.clock,
            released_at: None,
            spilled: false,
        });
        self.resident.insert(
            tensor,
            Resident {
                history_idx: self.history.len() - 1,
                pins: 0,
                next_use: None,
            },
        );

        self.stats.allocations += 1;
        let used = self.used(kind);
        let peak = match kind {
            MemoryKind::Local => &mut self.stats.peak_local,
            MemoryKind::Accumulator => &mut self.stats.peak_accumulator,
        };
        *peak = (*peak).max(used);
        Ok(())
    }

    fn release(&mut self, tensor: TensorId, spilled: bool) -> CompileResult<Binding> {
        let res = self.resident.remove(&tensor).ok_or_else(|| CompileError::MemoryInvariant {
            reason: format!("{tensor} is not allocated"),
        })?;
        if res.pins != 0 {
            return Err(CompileError::MemoryInvariant {
                reason: format!("{tensor} released while pinned"),
            });
        }

        let clock = self.clock;
        let binding = &mut self.history[res.history_idx];
        binding.released_at = Some(clock);
        binding.spilled = spilled;
        let binding = binding.clone();

        if !self.list_mut(binding.kind).release(binding.region()) {
            return Err(CompileError::MemoryInvariant {
                reason: format!(
                    "{kind}[{}..{}] released twice",
                    binding.address,
                    binding.region().end(),
                    kind = binding.kind
                ),
            });
        }
        Ok(binding)
    }

    /// Release a tensor after its last reader committed.
    pub fn free(&mut self, tensor: TensorId) -> CompileResult<Binding> {
        let binding = self.release(tensor, false)?;
        log::trace!("freed {tensor} from {}[{}]", binding.kind, binding.address);
        Ok(binding)
    }

    /// Evict a tensor chosen by a spill decision.
    pub fn spill(&mut self, tensor: TensorId) -> CompileResult<Binding> {
        if self.binding(tensor).map(|b| b.kind) == Some(MemoryKind::Accumulator) {
            return Err(CompileError::MemoryInvariant {
                reason: format!("{tensor} lives in accumulator memory and cannot be spilled"),
            });
        }
        let binding = self.release(tensor, true)?;
        self.stats.spills += 1;
        log::debug!("spilled {tensor} from {}[{}]", binding.kind, binding.address);
        Ok(binding)
    }

    /// Protect a resident tensor from eviction.
    pub fn pin(&mut self, tensor: TensorId) -> CompileResult<()> {
        let res = self.resident.get_mut(&tensor).ok_or_else(|| CompileError::MemoryInvariant {
            reason: format!("cannot pin {tensor}: not resident"),
        })?;
        res.pins += 1;
        Ok(())
    }

    pub fn unpin(&mut self, tensor: TensorId) -> CompileResult<()> {
        match self.resident.get_mut(&tensor) {
            Some(res) if res.pins > 0 => {
                res.pins -= 1;
                Ok(())
            }
            _ => Err(CompileError::MemoryInvariant {
                reason: format!("{tensor} unpinned more often than pinned"),
            }),
        }
    }

    /// Program position of the next pending reader, used to rank victims.
    pub fn set_next_use(&mut self, tensor: TensorId, next_use: Option<usize>) {
        if let Some(res) = self.resident.get_mut(&tensor) {
            res.next_use = next_use;
        }
    }

    pub fn is_resident(&self, tensor: TensorId) -> bool {
        self.resident.contains_key(&tensor)
    }

    /// Current binding of a resident tensor.
    pub fn binding(&self, tensor: TensorId) -> Option<&Binding> {
        self.resident
            .get(&tensor)
            .map(|res| &self.history[res.history_idx])
    }

    pub fn address_of(&self, tensor: TensorId) -> Option<(MemoryKind, usize)> {
        self.binding(tensor).map(|b| (b.kind, b.address))
    }

    /// Whether `size` vectors fit in `kind` memory without evicting anything.
    pub fn fits(&self, dims: &MemoryDimensions, kind: MemoryKind) -> bool {
        self.list(kind).best_fit(dims.depth(), dims.alignment()).is_some()
    }

    /// Resident bindings of one memory, by address.
    pub fn live_bindings(&self, kind: MemoryKind) -> Vec<&Binding> {
        let mut live: Vec<&Binding> = self
            .resident
            .values()
            .map(|res| &self.history[res.history_idx])
            .filter(|b| b.kind == kind)
            .collect();
        live.sort_by_key(|b| b.address);
        live
    }

    /// Every binding ever made, in allocation order.
    pub fn history(&self) -> &[Binding] {
        &self.history
    }

    pub fn stats(&self) -> MemoryStats {
        self.stats.clone()
    }

    /// Verify that live bindings are disjoint and account for all used space.
    pub fn check_invariants(&self) -> CompileResult<()> {
        for kind in MemoryKind::ALL {
            let live = self.live_bindings(kind);
            for pair in live.windows(2) {
                if pair[0].region().overlaps(&pair[1].region()) {
                    return Err(CompileError::MemoryInvariant {
                        reason: format!(
                            "{} and {} overlap in {kind} memory",
                            pair[0].tensor, pair[1].tensor
                        ),
                    });
                }
            }
            let held: usize = live.iter().map(|b| b.size).sum();
            let used = self.used(kind);
            // Alignment padding stays in the free list, so held == used.
            if held != used {
                return Err(CompileError::MemoryInvariant {
                    reason: format!("{kind} memory holds {held} vectors but {used} are in use"),
                });
            }
        }
        Ok(())
    }
}
