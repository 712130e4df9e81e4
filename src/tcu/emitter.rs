// This module implements the Emitter family: the coarse, architecture-aware operations the
// frontend lowers a graph into and the scheduler orders. An Emitter names tensors only by
// TensorId; it declares which tensors it reads and writes, which of the three accelerator
// resources (load, compute, store) executes it and an estimated cycle count. Once the
// scheduler has placed every tensor it touches, encode() resolves the ids to on-chip
// addresses through the MemoryManager, to DRAM locations through the TensorTable, and turns
// the operation into concrete instructions. Every instruction is pushed through the
// InstructionLayout immediately so that an operand that does not fit its field surfaces as
// an encoding error naming this emitter and the field.

//! Schedulable operations and their instruction encoding.

use super::instruction::{DataMoveKind, Instruction, SimdOp};
use super::layout::InstructionLayout;
use crate::core::architecture::Architecture;
use crate::core::error::{CompileError, CompileResult};
use crate::core::memory::{MemoryKind, MemoryManager};
use crate::core::tensor::{DramBank, DramLocation, TensorId, TensorTable};
use std::fmt;

/// Hardware unit executing an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Resource {
    /// DRAM to local transfers.
    Load,
    /// Systolic array, accumulator and SIMD unit.
    Compute,
    /// Local to DRAM transfers.
    Store,
}

impl Resource {
    pub const ALL: [Resource; 3] = [Resource::Load, Resource::Compute, Resource::Store];

    pub const fn name(self) -> &'static str {
        match self {
            Resource::Load => "load",
            Resource::Compute => "compute",
            Resource::Store => "store",
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Function applied while moving a result out of accumulator memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Activation {
    Identity,
    Relu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Emitter {
    /// Bring an input or constant from its DRAM home into local memory.
    Load { tensor: TensorId },
    /// `output = input x weights (+ bias)` into accumulator memory.
    MatMul {
        input: TensorId,
        weights: TensorId,
        bias: Option<TensorId>,
        output: TensorId,
    },
    /// Move a local tensor into accumulator memory, optionally adding it to
    /// what `output` already holds.
    Accumulate {
        input: TensorId,
        output: TensorId,
        accumulate: bool,
    },
    /// Move an accumulator tensor back into local memory.
    Activate {
        input: TensorId,
        output: TensorId,
        activation: Activation,
    },
    /// Write a requested output to its export region.
    Store { tensor: TensorId },
    /// Write an evicted tensor to its spill slot.
    Spill { tensor: TensorId },
    /// Bring an evicted tensor back from its DRAM copy.
    Reload { tensor: TensorId },
}

/// Instructions of one emitter together with their encoded words.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Encoded {
    pub instructions: Vec<Instruction>,
    pub bytes: Vec<u8>,
}

/// Everything needed to turn tensor ids into operand values.
pub struct Resolver<'a, 'arena> {
    pub arch: &'a Architecture,
    pub layout: &'a InstructionLayout,
    pub tensors: &'a TensorTable<'arena>,
    pub memory: &'a MemoryManager,
}

impl Resolver<'_, '_> {
    fn on_chip(&self, emitter: &Emitter, tensor: TensorId, kind: MemoryKind) -> CompileResult<u64> {
        match self.memory.address_of(tensor) {
            Some((found, address)) if found == kind => Ok(address as u64),
            Some((found, _)) => Err(CompileError::Scheduling {
                reason: format!("{} lives in {found} memory, expected {kind}", self.tensors.name(tensor)),
                context: emitter.describe(self.tensors),
            }),
            None => Err(CompileError::Scheduling {
                reason: format!("{} ({tensor}) is not resident", self.tensors.name(tensor)),
                context: emitter.describe(self.tensors),
            }),
        }
    }

    fn local(&self, emitter: &Emitter, tensor: TensorId) -> CompileResult<u64> {
        self.on_chip(emitter, tensor, MemoryKind::Local)
    }

    fn accumulator(&self, emitter: &Emitter, tensor: TensorId) -> CompileResult<u64> {
        self.on_chip(emitter, tensor, MemoryKind::Accumulator)
    }

    /// Validate a DRAM transfer against the depth of its bank.
    fn dram(
        &self,
        emitter: &Emitter,
        location: Option<DramLocation>,
        size: usize,
    ) -> CompileResult<DramLocation> {
        let tensor = emitter.primary();
        let location = location.ok_or_else(|| CompileError::Scheduling {
            reason: format!("{} has no DRAM location", self.tensors.name(tensor)),
            context: emitter.describe(self.tensors),
        })?;
        let depth = match location.bank {
            DramBank::Dram0 => self.arch.dram0_depth,
            DramBank::Dram1 => self.arch.dram1_depth,
        };
        if location.address + size > depth {
            return Err(CompileError::Encoding {
                emitter: emitter.describe(self.tensors),
                field: "address",
                value: location.address as u64,
                limit: depth.saturating_sub(size) as u64,
            });
        }
        Ok(location)
    }
}

struct Sink<'a> {
    layout: &'a InstructionLayout,
    name: String,
    out: Encoded,
}

impl Sink<'_> {
    fn push(&mut self, inst: Instruction) -> CompileResult<()> {
        let bytes = self
            .layout
            .encode(&inst)
            .map_err(|overflow| overflow.into_error(&self.name))?;
        self.out.bytes.extend_from_slice(&bytes);
        self.out.instructions.push(inst);
        Ok(())
    }
}

impl Emitter {
    pub const fn name(&self) -> &'static str {
        match self {
            Emitter::Load { .. } => "Load",
            Emitter::MatMul { .. } => "MatMul",
            Emitter::Accumulate { .. } => "Accumulate",
            Emitter::Activate { .. } => "Activate",
            Emitter::Store { .. } => "Store",
            Emitter::Spill { .. } => "Spill",
            Emitter::Reload { .. } => "Reload",
        }
    }

    pub fn resource(&self) -> Resource {
        match self {
            Emitter::Load { .. } | Emitter::Reload { .. } => Resource::Load,
            Emitter::MatMul { .. } | Emitter::Accumulate { .. } | Emitter::Activate { .. } => {
                Resource::Compute
            }
            Emitter::Store { .. } | Emitter::Spill { .. } => Resource::Store,
        }
    }

    /// The tensor the operation is about: its result, or what it moves.
    pub fn primary(&self) -> TensorId {
        match *self {
            Emitter::Load { tensor }
            | Emitter::Store { tensor }
            | Emitter::Spill { tensor }
            | Emitter::Reload { tensor } => tensor,
            Emitter::MatMul { output, .. }
            | Emitter::Accumulate { output, .. }
            | Emitter::Activate { output, .. } => output,
        }
    }

    /// Tensors that must be resident when the operation executes, without
    /// duplicates.
    pub fn reads(&self) -> Vec<TensorId> {
        let mut reads = match *self {
            Emitter::Load { .. } | Emitter::Reload { .. } => Vec::new(),
            Emitter::MatMul { input, weights, bias, .. } => {
                let mut reads = vec![input, weights];
                reads.extend(bias);
                reads
            }
            Emitter::Accumulate { input, output, accumulate } => {
                if accumulate {
                    vec![input, output]
                } else {
                    vec![input]
                }
            }
            Emitter::Activate { input, .. } => vec![input],
            Emitter::Store { tensor } | Emitter::Spill { tensor } => vec![tensor],
        };
        let mut seen = Vec::with_capacity(reads.len());
        reads.retain(|t| {
            let fresh = !seen.contains(t);
            seen.push(*t);
            fresh
        });
        reads
    }

    /// Tensor the operation allocates and defines.
    pub fn writes(&self) -> Option<TensorId> {
        match *self {
            Emitter::Load { tensor } | Emitter::Reload { tensor } => Some(tensor),
            Emitter::MatMul { output, .. } | Emitter::Activate { output, .. } => Some(output),
            Emitter::Accumulate { output, accumulate, .. } => (!accumulate).then_some(output),
            Emitter::Store { .. } | Emitter::Spill { .. } => None,
        }
    }

    /// Human readable form with tensor names, used in errors and listings.
    pub fn describe(&self, tensors: &TensorTable<'_>) -> String {
        let n = |t: TensorId| tensors.name(t);
        match *self {
            Emitter::Load { tensor }
            | Emitter::Store { tensor }
            | Emitter::Spill { tensor }
            | Emitter::Reload { tensor } => format!("{}({})", self.name(), n(tensor)),
            Emitter::MatMul { input, weights, bias, output } => match bias {
                Some(bias) => format!(
                    "MatMul({} = {} x {} + {})",
                    n(output),
                    n(input),
                    n(weights),
                    n(bias)
                ),
                None => format!("MatMul({} = {} x {})", n(output), n(input), n(weights)),
            },
            Emitter::Accumulate { input, output, accumulate } => {
                let op = if accumulate { "+=" } else { "=" };
                format!("Accumulate({} {op} {})", n(output), n(input))
            }
            Emitter::Activate { input, output, activation } => match activation {
                Activation::Identity => format!("Activate({} = {})", n(output), n(input)),
                Activation::Relu => format!("Activate({} = relu {})", n(output), n(input)),
            },
        }
    }

    /// Estimated execution time in cycles on its resource. Saturates at
    /// `u64::MAX`.
    pub fn estimated_cycles(&self, arch: &Architecture, tensors: &TensorTable<'_>) -> u64 {
        let cycles = |n: usize| u64::try_from(n).unwrap_or(u64::MAX);
        let depth = |t: TensorId| cycles(tensors.get(t).dims.depth());
        let beats = cycles(arch.dram_beats_per_vector());
        match *self {
            Emitter::Load { tensor }
            | Emitter::Reload { tensor }
            | Emitter::Store { tensor }
            | Emitter::Spill { tensor } => depth(tensor).saturating_mul(beats),
            Emitter::MatMul { input, bias, output, .. } => {
                let rows = cycles(tensors.get(input).dims.rows());
                let in_tiles = cycles(tensors.get(input).dims.tiles());
                let out_tiles = cycles(tensors.get(output).dims.tiles());
                let n = cycles(arch.array_size);
                let bias_moves = if bias.is_some() { out_tiles.saturating_mul(rows) } else { 0 };
                out_tiles
                    .saturating_mul(in_tiles)
                    .saturating_mul(n.saturating_add(rows))
                    .saturating_add(bias_moves)
            }
            Emitter::Accumulate { input, .. } => depth(input),
            Emitter::Activate { input, activation, .. } => match activation {
                Activation::Identity => depth(input),
                Activation::Relu => depth(input).saturating_mul(2),
            },
        }
    }

    /// Resolve addresses and produce the instruction sequence.
    pub fn encode(&self, env: &Resolver<'_, '_>) -> CompileResult<Encoded> {
        let mut sink = Sink {
            layout: env.layout,
            name: self.describe(env.tensors),
            out: Encoded::default(),
        };
        let depth = |t: TensorId| env.tensors.get(t).dims.depth();

        match *self {
            Emitter::Load { tensor } | Emitter::Reload { tensor } => {
                let source = match self {
                    Emitter::Load { .. } => env.tensors.get(tensor).home,
                    _ => env.tensors.get(tensor).dram_copy(),
                };
                let size = depth(tensor);
                let source = env.dram(self, source, size)?;
                let kind = match source.bank {
                    DramBank::Dram0 => DataMoveKind::Dram0ToLocal,
                    DramBank::Dram1 => DataMoveKind::Dram1ToLocal,
                };
                sink.push(Instruction::DataMove {
                    kind,
                    local_address: env.local(self, tensor)?,
                    address: source.address as u64,
                    size: size as u64,
                })?;
            }
            Emitter::Store { tensor } | Emitter::Spill { tensor } => {
                let target = match self {
                    Emitter::Store { .. } => env.tensors.get(tensor).export,
                    _ => env.tensors.get(tensor).spill_slot,
                };
                let size = depth(tensor);
                let target = env.dram(self, target, size)?;
                let kind = match target.bank {
                    DramBank::Dram0 => DataMoveKind::LocalToDram0,
                    DramBank::Dram1 => DataMoveKind::LocalToDram1,
                };
                sink.push(Instruction::DataMove {
                    kind,
                    local_address: env.local(self, tensor)?,
                    address: target.address as u64,
                    size: size as u64,
                })?;
            }
            Emitter::MatMul { input, weights, bias, output } => {
                let x = env.local(self, input)?;
                let w = env.local(self, weights)?;
                let o = env.accumulator(self, output)?;
                let b = bias.map(|b| env.local(self, b)).transpose()?;

                let n = env.arch.array_size as u64;
                let x_dims = &env.tensors.get(input).dims;
                let rows = x_dims.rows() as u64;
                let in_tiles = x_dims.tiles() as u64;
                let w_stride = env.tensors.get(weights).dims.stride() as u64;
                let out_tiles = env.tensors.get(output).dims.tiles() as u64;

                for j in 0..out_tiles {
                    let out_tile = o + j * rows;
                    if let Some(b) = b {
                        // Seed every output row with the bias vector of this tile.
                        for r in 0..rows {
                            sink.push(Instruction::DataMove {
                                kind: DataMoveKind::LocalToAccumulator,
                                local_address: b + j,
                                address: out_tile + r,
                                size: 1,
                            })?;
                        }
                    }
                    for i in 0..in_tiles {
                        sink.push(Instruction::LoadWeight {
                            zeroes: false,
                            local_address: w + j * w_stride + i * n,
                            size: n,
                        })?;
                        sink.push(Instruction::MatMul {
                            accumulate: b.is_some() || i > 0,
                            zeroes: false,
                            local_address: x + i * rows,
                            accumulator_address: out_tile,
                            size: rows,
                        })?;
                    }
                }
            }
            Emitter::Accumulate { input, output, accumulate } => {
                let kind = if accumulate {
                    DataMoveKind::LocalToAccumulatorAccumulate
                } else {
                    DataMoveKind::LocalToAccumulator
                };
                sink.push(Instruction::DataMove {
                    kind,
                    local_address: env.local(self, input)?,
                    address: env.accumulator(self, output)?,
                    size: depth(input) as u64,
                })?;
            }
            Emitter::Activate { input, output, activation } => {
                let acc = env.accumulator(self, input)?;
                let size = depth(input) as u64;
                if activation == Activation::Relu {
                    for v in 0..size {
                        sink.push(Instruction::Simd {
                            op: SimdOp::Relu,
                            read: true,
                            write: true,
                            accumulate: false,
                            read_address: acc + v,
                            write_address: acc + v,
                        })?;
                    }
                }
                sink.push(Instruction::DataMove {
                    kind: DataMoveKind::AccumulatorToLocal,
                    local_address: env.local(self, output)?,
                    address: acc,
                    size,
                })?;
            }
        }
        Ok(sink.out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::dimensions::MemoryDimensions;
    use crate::core::memory::Allocation;
    use crate::core::tensor::{DramAllocator, TensorRole};
    use bumpalo::Bump;

    struct Fixture<'arena> {
        arch: Architecture,
        layout: InstructionLayout,
        tensors: TensorTable<'arena>,
        memory: MemoryManager,
        dram: DramAllocator,
    }

    impl<'arena> Fixture<'arena> {
        fn new(arena: &'arena Bump) -> Self {
            let arch = Architecture { array_size: 4, local_depth: 64, accumulator_depth: 32, ..Architecture::default() };
            Self {
                layout: InstructionLayout::new(&arch).unwrap(),
                memory: MemoryManager::new(&arch),
                tensors: TensorTable::new(arena),
                dram: DramAllocator::new(),
                arch,
            }
        }

        fn tensor(&mut self, name: &str, dims: MemoryDimensions, role: TensorRole, kind: MemoryKind) -> TensorId {
            let id = self.tensors.add(name, dims.clone(), role, kind);
            let home = match role {
                TensorRole::Input => Some(self.dram.allocate(DramBank::Dram0, dims.depth()).unwrap()),
                TensorRole::Constant => Some(self.dram.allocate(DramBank::Dram1, dims.depth()).unwrap()),
                _ => None,
            };
            self.tensors.get_mut(id).home = home;
            match self.memory.allocate(id, name, &dims, kind).unwrap() {
                Allocation::Placed(_) => id,
                other => panic!("unexpected {other:?}"),
            }
        }

        fn encode(&self, emitter: Emitter) -> CompileResult<Encoded> {
            emitter.encode(&Resolver {
                arch: &self.arch,
                layout: &self.layout,
                tensors: &self.tensors,
                memory: &self.memory,
            })
        }
    }

    #[test]
    fn test_reads_and_writes() {
        let (a, b) = (TensorId(0), TensorId(1));
        let acc = Emitter::Accumulate { input: a, output: b, accumulate: true };
        assert_eq!(acc.reads(), vec![a, b]);
        assert_eq!(acc.writes(), None);

        let mm = Emitter::MatMul { input: a, weights: a, bias: None, output: b };
        assert_eq!(mm.reads(), vec![a]);
        assert_eq!(mm.writes(), Some(b));
        assert_eq!(mm.resource(), Resource::Compute);
        assert_eq!(Emitter::Spill { tensor: a }.resource(), Resource::Store);
        assert_eq!(Emitter::Reload { tensor: a }.resource(), Resource::Load);
    }

    #[test]
    fn test_load_encodes_single_data_move() {
        let arena = Bump::new();
        let mut fx = Fixture::new(&arena);
        let w = fx.tensor("w", MemoryDimensions::consts(&[8, 4], 4).unwrap(), TensorRole::Constant, MemoryKind::Local);

        let encoded = fx.encode(Emitter::Load { tensor: w }).unwrap();
        assert_eq!(
            encoded.instructions,
            vec![Instruction::DataMove {
                kind: DataMoveKind::Dram1ToLocal,
                local_address: 0,
                address: 0,
                size: 8,
            }]
        );
        assert_eq!(encoded.bytes.len(), fx.layout.word_bytes());
    }

    #[test]
    fn test_matmul_tiles_and_bias() {
        let arena = Bump::new();
        let mut fx = Fixture::new(&arena);
        let x = fx.tensor("x", MemoryDimensions::vars(&[2, 8], 4).unwrap(), TensorRole::Input, MemoryKind::Local);
        let w = fx.tensor("w", MemoryDimensions::consts(&[8, 4], 4).unwrap(), TensorRole::Constant, MemoryKind::Local);
        let b = fx.tensor("b", MemoryDimensions::vars(&[4], 4).unwrap(), TensorRole::Constant, MemoryKind::Local);
        let o = fx.tensor("o", MemoryDimensions::vars(&[2, 4], 4).unwrap(), TensorRole::Accumulator, MemoryKind::Accumulator);

        let emitter = Emitter::MatMul { input: x, weights: w, bias: Some(b), output: o };
        let encoded = fx.encode(emitter).unwrap();
        // x at 0..4, w at 4..12, b at 12, o at acc 0..2
        assert_eq!(
            encoded.instructions,
            vec![
                Instruction::DataMove { kind: DataMoveKind::LocalToAccumulator, local_address: 12, address: 0, size: 1 },
                Instruction::DataMove { kind: DataMoveKind::LocalToAccumulator, local_address: 12, address: 1, size: 1 },
                Instruction::LoadWeight { zeroes: false, local_address: 4, size: 4 },
                Instruction::MatMul { accumulate: true, zeroes: false, local_address: 0, accumulator_address: 0, size: 2 },
                Instruction::LoadWeight { zeroes: false, local_address: 8, size: 4 },
                Instruction::MatMul { accumulate: true, zeroes: false, local_address: 2, accumulator_address: 0, size: 2 },
            ]
        );
        assert_eq!(emitter.estimated_cycles(&fx.arch, &fx.tensors), 2 + 2 * (4 + 2));
    }

    #[test]
    fn test_relu_activation_runs_simd_per_vector() {
        let arena = Bump::new();
        let mut fx = Fixture::new(&arena);
        let acc = fx.tensor("h", MemoryDimensions::vars(&[3, 4], 4).unwrap(), TensorRole::Accumulator, MemoryKind::Accumulator);
        let out = fx.tensor("y", MemoryDimensions::vars(&[3, 4], 4).unwrap(), TensorRole::Intermediate, MemoryKind::Local);

        let encoded = fx
            .encode(Emitter::Activate { input: acc, output: out, activation: Activation::Relu })
            .unwrap();
        assert_eq!(encoded.instructions.len(), 4);
        assert!(matches!(encoded.instructions[2], Instruction::Simd { op: SimdOp::Relu, read_address: 2, .. }));
        assert!(matches!(
            encoded.instructions[3],
            Instruction::DataMove { kind: DataMoveKind::AccumulatorToLocal, size: 3, .. }
        ));
    }

    #[test]
    fn test_unresolved_tensor_is_scheduling_error() {
        let arena = Bump::new();
        let mut fx = Fixture::new(&arena);
        let t = fx.tensors.add("ghost", MemoryDimensions::vars(&[1, 4], 4).unwrap(), TensorRole::Intermediate, MemoryKind::Local);
        fx.tensors.get_mut(t).export = Some(DramLocation { bank: DramBank::Dram0, address: 0 });
        let err = fx.encode(Emitter::Store { tensor: t }).unwrap_err();
        assert!(matches!(err, CompileError::Scheduling { .. }));
    }

    #[test]
    fn test_dram_overflow_is_encoding_error() {
        let arena = Bump::new();
        let mut fx = Fixture::new(&arena);
        let y = fx.tensor("y", MemoryDimensions::vars(&[2, 4], 4).unwrap(), TensorRole::Intermediate, MemoryKind::Local);
        let end = fx.arch.dram0_depth - 1;
        fx.tensors.get_mut(y).export = Some(DramLocation { bank: DramBank::Dram0, address: end });

        let err = fx.encode(Emitter::Store { tensor: y }).unwrap_err();
        match err {
            CompileError::Encoding { emitter, field, .. } => {
                assert_eq!(emitter, "Store(y)");
                assert_eq!(field, "address");
            }
            other => panic!("unexpected {other}"),
        }
    }

    #[test]
    fn test_estimated_cycles_saturate() {
        let arena = Bump::new();
        let mut fx = Fixture::new(&arena);
        let dims = MemoryDimensions::vars(&[usize::MAX, 4], 4).unwrap();
        let depth = usize::MAX as u64;
        let acc = fx.tensors.add("h", dims.clone(), TensorRole::Accumulator, MemoryKind::Accumulator);
        let out = fx.tensors.add("y", dims, TensorRole::Intermediate, MemoryKind::Local);

        let relu = Emitter::Activate { input: acc, output: out, activation: Activation::Relu };
        assert_eq!(relu.estimated_cycles(&fx.arch, &fx.tensors), depth.saturating_mul(2));
        let store = Emitter::Store { tensor: out };
        assert_eq!(store.estimated_cycles(&fx.arch, &fx.tensors), depth);
    }
}
