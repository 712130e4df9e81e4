// This module holds the registry of logical tensors for one compilation. Every value the
// lowered program touches gets a TensorId: graph inputs and constants (which have a DRAM
// home they are loaded from), intermediates computed on chip, accumulator temporaries, and
// requested outputs (which additionally get a DRAM0 export region written by a Store).
// Tensor names are interned in the compilation arena and indexed by an arena-allocated
// hashbrown map. DramAllocator hands out DRAM regions with a bump pointer per bank. It does
// not know the bank depths: running past a bank surfaces later as an encoding error naming
// the instruction field that cannot hold the address. Only a pointer that would wrap around
// the address space is refused here.

//! Logical tensors and their DRAM placement.

use super::dimensions::MemoryDimensions;
use super::error::{CompileError, CompileResult};
use super::memory::MemoryKind;
use bumpalo::Bump;
use hashbrown::{DefaultHashBuilder, HashMap};
use std::fmt;

/// Identifier of a logical tensor within one compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TensorId(pub u32);

impl TensorId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// The two DRAM banks of the accelerator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DramBank {
    /// Activations: inputs, outputs and spill slots.
    Dram0,
    /// Constants.
    Dram1,
}

impl DramBank {
    pub const fn name(self) -> &'static str {
        match self {
            DramBank::Dram0 => "DRAM0",
            DramBank::Dram1 => "DRAM1",
        }
    }
}

/// A vector address in one DRAM bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DramLocation {
    pub bank: DramBank,
    pub address: usize,
}

/// Role of a tensor in the lowered program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorRole {
    Input,
    Constant,
    Intermediate,
    Accumulator,
}

#[derive(Debug, Clone)]
pub struct TensorInfo<'arena> {
    pub name: &'arena str,
    pub dims: MemoryDimensions,
    pub role: TensorRole,
    /// On-chip memory the tensor lives in while resident.
    pub kind: MemoryKind,
    /// DRAM region the tensor is loaded from.
    pub home: Option<DramLocation>,
    /// DRAM region a requested output is stored to.
    pub export: Option<DramLocation>,
    /// DRAM0 region holding a spilled copy.
    pub spill_slot: Option<DramLocation>,
}

impl TensorInfo<'_> {
    /// DRAM copy an evicted tensor can be reloaded from, if any.
    pub fn dram_copy(&self) -> Option<DramLocation> {
        self.spill_slot.or(self.home)
    }
}

type NameMap<'arena> = HashMap<&'arena str, TensorId, DefaultHashBuilder, &'arena Bump>;

/// All tensors of one compilation.
pub struct TensorTable<'arena> {
    arena: &'arena Bump,
    tensors: Vec<TensorInfo<'arena>>,
    by_name: NameMap<'arena>,
}

impl<'arena> TensorTable<'arena> {
    pub fn new(arena: &'arena Bump) -> Self {
        Self {
            arena,
            tensors: Vec::new(),
            by_name: HashMap::new_in(arena),
        }
    }

    /// Register a tensor. The first tensor registered under a name owns it
    /// for lookups.
    pub fn add(
        &mut self,
        name: &str,
        dims: MemoryDimensions,
        role: TensorRole,
        kind: MemoryKind,
    ) -> TensorId {
        let id = TensorId(self.tensors.len() as u32);
        let existing = self.by_name.get_key_value(name).map(|(&interned, _)| interned);
        let name = match existing {
            Some(interned) => interned,
            None => {
                let interned: &'arena str = self.arena.alloc_str(name);
                self.by_name.insert(interned, id);
                interned
            }
        };
        self.tensors.push(TensorInfo {
            name,
            dims,
            role,
            kind,
            home: None,
            export: None,
            spill_slot: None,
        });
        id
    }

    pub fn get(&self, id: TensorId) -> &TensorInfo<'arena> {
        &self.tensors[id.index()]
    }

    pub fn get_mut(&mut self, id: TensorId) -> &mut TensorInfo<'arena> {
        &mut self.tensors[id.index()]
    }

    pub fn lookup(&self, name: &str) -> Option<TensorId> {
        self.by_name.get(name).copied()
    }

    pub fn name(&self, id: TensorId) -> &'arena str {
        self.tensors[id.index()].name
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TensorId, &TensorInfo<'arena>)> {
        self.tensors
            .iter()
            .enumerate()
            .map(|(idx, info)| (TensorId(idx as u32), info))
    }
}

/// Bump allocation of DRAM regions, one pointer per bank.
#[derive(Debug, Clone, Default)]
pub struct DramAllocator {
    next: [usize; 2],
}

impl DramAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self, bank: DramBank, size: usize) -> CompileResult<DramLocation> {
        let slot = &mut self.next[bank as usize];
        let address = *slot;
        *slot = address.checked_add(size).ok_or_else(|| CompileError::Encoding {
            emitter: format!("{} region of {size} vectors", bank.name()),
            field: "address",
            value: address as u64,
            limit: (usize::MAX - size) as u64,
        })?;
        Ok(DramLocation { bank, address })
    }

    /// Vectors handed out so far in `bank`.
    pub fn used(&self, bank: DramBank) -> usize {
        self.next[bank as usize]
    }
}
