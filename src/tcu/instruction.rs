// This module defines the instruction set of the tensor compute unit at the semantic level:
// opcodes, flag encodings, data-move directions, SIMD operations and the Instruction enum
// holding fully resolved operand values (addresses and vector counts). It knows nothing
// about bit positions; InstructionLayout maps these values onto the instruction word for a
// concrete Architecture. Instruction implements Display as the one-line mnemonic used in
// program listings, and operands()/from_fields() are the two halves of the round trip
// between an Instruction and the named fields of its layout.

//! TCU instruction set.

use std::fmt;

/// Operation selector in the top four bits of every word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Opcode {
    NoOp = 0x0,
    MatMul = 0x1,
    DataMove = 0x2,
    LoadWeight = 0x3,
    Simd = 0x4,
}

impl Opcode {
    pub const ALL: [Opcode; 5] = [
        Opcode::NoOp,
        Opcode::MatMul,
        Opcode::DataMove,
        Opcode::LoadWeight,
        Opcode::Simd,
    ];

    pub fn from_bits(bits: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|op| *op as u8 == bits)
    }

    pub const fn mnemonic(self) -> &'static str {
        match self {
            Opcode::NoOp => "NoOp",
            Opcode::MatMul => "MatMul",
            Opcode::DataMove => "DataMove",
            Opcode::LoadWeight => "LoadWeight",
            Opcode::Simd => "Simd",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

pub const MATMUL_ACCUMULATE: u8 = 0b0001;
pub const MATMUL_ZEROES: u8 = 0b0010;
pub const LOAD_WEIGHT_ZEROES: u8 = 0b0001;
pub const SIMD_READ: u8 = 0b0001;
pub const SIMD_WRITE: u8 = 0b0010;
pub const SIMD_ACCUMULATE: u8 = 0b0100;

/// Direction of a `DataMove`, stored in its flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DataMoveKind {
    Dram0ToLocal = 0b0000,
    LocalToDram0 = 0b0001,
    Dram1ToLocal = 0b0010,
    LocalToDram1 = 0b0011,
    AccumulatorToLocal = 0b1100,
    LocalToAccumulator = 0b1101,
    LocalToAccumulatorAccumulate = 0b1111,
}

impl DataMoveKind {
    pub const ALL: [DataMoveKind; 7] = [
        DataMoveKind::Dram0ToLocal,
        DataMoveKind::LocalToDram0,
        DataMoveKind::Dram1ToLocal,
        DataMoveKind::LocalToDram1,
        DataMoveKind::AccumulatorToLocal,
        DataMoveKind::LocalToAccumulator,
        DataMoveKind::LocalToAccumulatorAccumulate,
    ];

    pub fn from_flags(flags: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| *kind as u8 == flags)
    }

    pub const fn mnemonic(self) -> &'static str {
        match self {
            DataMoveKind::Dram0ToLocal => "dram0->local",
            DataMoveKind::LocalToDram0 => "local->dram0",
            DataMoveKind::Dram1ToLocal => "dram1->local",
            DataMoveKind::LocalToDram1 => "local->dram1",
            DataMoveKind::AccumulatorToLocal => "acc->local",
            DataMoveKind::LocalToAccumulator => "local->acc",
            DataMoveKind::LocalToAccumulatorAccumulate => "local->acc+",
        }
    }
}

/// Vector operation performed by the SIMD unit on accumulator memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SimdOp {
    Zero = 0x0,
    Move = 0x1,
    Relu = 0x2,
}

impl SimdOp {
    pub const ALL: [SimdOp; 3] = [SimdOp::Zero, SimdOp::Move, SimdOp::Relu];

    pub fn from_bits(bits: u64) -> Option<Self> {
        Self::ALL.into_iter().find(|op| *op as u64 == bits)
    }

    pub const fn mnemonic(self) -> &'static str {
        match self {
            SimdOp::Zero => "zero",
            SimdOp::Move => "move",
            SimdOp::Relu => "relu",
        }
    }
}

/// A fully resolved instruction. Sizes count vectors and are at least one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Instruction {
    NoOp,
    MatMul {
        accumulate: bool,
        zeroes: bool,
        local_address: u64,
        accumulator_address: u64,
        size: u64,
    },
    DataMove {
        kind: DataMoveKind,
        local_address: u64,
        address: u64,
        size: u64,
    },
    LoadWeight {
        zeroes: bool,
        local_address: u64,
        size: u64,
    },
    Simd {
        op: SimdOp,
        read: bool,
        write: bool,
        accumulate: bool,
        read_address: u64,
        write_address: u64,
    },
}

/// Why a word could not be turned back into an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidFields {
    Flags(u8),
    SimdOp(u64),
}

fn flag(flags: u8, bit: u8) -> bool {
    flags & bit != 0
}

impl Instruction {
    pub fn opcode(&self) -> Opcode {
        match self {
            Instruction::NoOp => Opcode::NoOp,
            Instruction::MatMul { .. } => Opcode::MatMul,
            Instruction::DataMove { .. } => Opcode::DataMove,
            Instruction::LoadWeight { .. } => Opcode::LoadWeight,
            Instruction::Simd { .. } => Opcode::Simd,
        }
    }

    /// Value of the four flag bits.
    pub fn flags(&self) -> u8 {
        let bit = |set: bool, value: u8| if set { value } else { 0 };
        match *self {
            Instruction::NoOp => 0,
            Instruction::MatMul { accumulate, zeroes, .. } => {
                bit(accumulate, MATMUL_ACCUMULATE) | bit(zeroes, MATMUL_ZEROES)
            }
            Instruction::DataMove { kind, .. } => kind as u8,
            Instruction::LoadWeight { zeroes, .. } => bit(zeroes, LOAD_WEIGHT_ZEROES),
            Instruction::Simd { read, write, accumulate, .. } => {
                bit(read, SIMD_READ) | bit(write, SIMD_WRITE) | bit(accumulate, SIMD_ACCUMULATE)
            }
        }
    }

    /// Operand values keyed by the field names of the layout.
    pub fn operands(&self) -> Vec<(&'static str, u64)> {
        match *self {
            Instruction::NoOp => Vec::new(),
            Instruction::MatMul { local_address, accumulator_address, size, .. } => vec![
                ("local_address", local_address),
                ("accumulator_address", accumulator_address),
                ("size", size),
            ],
            Instruction::DataMove { local_address, address, size, .. } => vec![
                ("local_address", local_address),
                ("address", address),
                ("size", size),
            ],
            Instruction::LoadWeight { local_address, size, .. } => {
                vec![("local_address", local_address), ("size", size)]
            }
            Instruction::Simd { op, read_address, write_address, .. } => vec![
                ("simd_op", op as u64),
                ("read_address", read_address),
                ("write_address", write_address),
            ],
        }
    }

    /// Rebuild an instruction from its opcode, flags and named operands.
    pub fn from_fields(
        opcode: Opcode,
        flags: u8,
        field: impl Fn(&'static str) -> u64,
    ) -> Result<Self, InvalidFields> {
        let check = |allowed: u8| {
            if flags & !allowed != 0 {
                Err(InvalidFields::Flags(flags))
            } else {
                Ok(())
            }
        };
        match opcode {
            Opcode::NoOp => {
                check(0)?;
                Ok(Instruction::NoOp)
            }
            Opcode::MatMul => {
                check(MATMUL_ACCUMULATE | MATMUL_ZEROES)?;
                Ok(Instruction::MatMul {
                    accumulate: flag(flags, MATMUL_ACCUMULATE),
                    zeroes: flag(flags, MATMUL_ZEROES),
                    local_address: field("local_address"),
                    accumulator_address: field("accumulator_address"),
                    size: field("size"),
                })
            }
            Opcode::DataMove => Ok(Instruction::DataMove {
                kind: DataMoveKind::from_flags(flags).ok_or(InvalidFields::Flags(flags))?,
                local_address: field("local_address"),
                address: field("address"),
                size: field("size"),
            }),
            Opcode::LoadWeight => {
                check(LOAD_WEIGHT_ZEROES)?;
                Ok(Instruction::LoadWeight {
                    zeroes: flag(flags, LOAD_WEIGHT_ZEROES),
                    local_address: field("local_address"),
                    size: field("size"),
                })
            }
            Opcode::Simd => {
                check(SIMD_READ | SIMD_WRITE | SIMD_ACCUMULATE)?;
                let bits = field("simd_op");
                Ok(Instruction::Simd {
                    op: SimdOp::from_bits(bits).ok_or(InvalidFields::SimdOp(bits))?,
                    read: flag(flags, SIMD_READ),
                    write: flag(flags, SIMD_WRITE),
                    accumulate: flag(flags, SIMD_ACCUMULATE),
                    read_address: field("read_address"),
                    write_address: field("write_address"),
                })
            }
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Instruction::NoOp => write!(f, "NoOp"),
            Instruction::MatMul { accumulate, zeroes, local_address, accumulator_address, size } => {
                write!(f, "MatMul")?;
                if accumulate {
                    write!(f, ".acc")?;
                }
                if zeroes {
                    write!(f, ".zeroes")?;
                }
                write!(f, " local={local_address:#06x} acc={accumulator_address:#06x} size={size}")
            }
            Instruction::DataMove { kind, local_address, address, size } => write!(
                f,
                "DataMove.{} local={local_address:#06x} address={address:#06x} size={size}",
                kind.mnemonic()
            ),
            Instruction::LoadWeight { zeroes, local_address, size } => {
                write!(f, "LoadWeight")?;
                if zeroes {
                    write!(f, ".zeroes")?;
                }
                write!(f, " local={local_address:#06x} size={size}")
            }
            Instruction::Simd { op, read, write, accumulate, read_address, write_address } => {
                write!(f, "Simd.{}", op.mnemonic())?;
                for (set, name) in [(read, ".r"), (write, ".w"), (accumulate, ".acc")] {
                    if set {
                        f.write_str(name)?;
                    }
                }
                write!(f, " read={read_address:#06x} write={write_address:#06x}")
            }
        }
    }
}
