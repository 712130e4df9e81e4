// This module derives the bit-level instruction layout from an Architecture. One word is
// three operand slots followed by reserved padding, four flag bits and a four bit opcode,
// least significant bit first and padded to whole bytes. Slot widths are the widest value
// any instruction kind places in that slot, so every kind shares the same slot boundaries
// and only the naming of the slots differs. Unused slots and the padding become reserved
// fields, which makes the field list of every kind cover the word exactly. The layout is the
// ABI between the compiler and the hardware build: encode() and decode() are inverse over
// every in-range Instruction, and the header generator publishes the same offsets.

//! Instruction word layout.

use super::instruction::{Instruction, InvalidFields, Opcode};
use crate::core::architecture::Architecture;
use crate::core::error::{CompileError, CompileResult};
use thiserror::Error;

/// Width of the SIMD operation selector.
pub const SIMD_OP_BITS: u32 = 4;
pub const FLAGS_BITS: u32 = 4;
pub const OPCODE_BITS: u32 = 4;
/// Widest word the hardware decoder supports.
pub const MAX_WORD_BITS: u32 = 128;

/// Name given to padding fields.
pub const RESERVED: &str = "reserved";

/// One contiguous bit range of the word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub offset: u32,
    pub width: u32,
}

impl Field {
    pub fn end(&self) -> u32 {
        self.offset + self.width
    }

    pub fn is_reserved(&self) -> bool {
        self.name == RESERVED
    }

    fn mask(&self) -> u128 {
        if self.width >= 128 {
            u128::MAX
        } else {
            (1u128 << self.width) - 1
        }
    }

    /// Largest value the field can hold.
    pub fn max_value(&self) -> u64 {
        self.mask().min(u64::MAX as u128) as u64
    }

    fn extract(&self, word: u128) -> u64 {
        ((word >> self.offset) & self.mask()) as u64
    }
}

/// An operand value does not fit its field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldOverflow {
    pub field: &'static str,
    pub value: u64,
    pub limit: u64,
}

impl FieldOverflow {
    pub fn into_error(self, emitter: &str) -> CompileError {
        CompileError::Encoding {
            emitter: emitter.to_string(),
            field: self.field,
            value: self.value,
            limit: self.limit,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Instruction {index}: unknown opcode {opcode:#x}")]
    UnknownOpcode { index: usize, opcode: u8 },

    #[error("Instruction {index}: invalid flags {flags:#06b} for {opcode}")]
    InvalidFlags { index: usize, opcode: Opcode, flags: u8 },

    #[error("Instruction {index}: invalid SIMD operation {op}")]
    InvalidSimdOp { index: usize, op: u64 },

    #[error("Stream of {len} bytes is not a multiple of the {word_bytes} byte word")]
    WrongLength { len: usize, word_bytes: usize },

    #[error("Instruction {index}: reserved bits are set")]
    ReservedBits { index: usize },
}

/// Operand names of each slot per opcode. `None` leaves the slot reserved.
fn slot_names(opcode: Opcode) -> [Option<&'static str>; 3] {
    match opcode {
        Opcode::NoOp => [None, None, None],
        Opcode::MatMul => [Some("local_address"), Some("accumulator_address"), Some("size")],
        Opcode::DataMove => [Some("local_address"), Some("address"), Some("size")],
        Opcode::LoadWeight => [Some("local_address"), None, Some("size")],
        Opcode::Simd => [Some("simd_op"), Some("read_address"), Some("write_address")],
    }
}

/// Bit layout of every instruction kind for one Architecture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructionLayout {
    word_bits: u32,
    slot_widths: [u32; 3],
    fields: Vec<(Opcode, Vec<Field>)>,
}

impl InstructionLayout {
    pub fn new(arch: &Architecture) -> CompileResult<Self> {
        let local = arch.local_address_bits();
        let accumulator = arch.accumulator_address_bits();
        let dram = arch.dram_address_bits();
        let size = arch.size_bits();

        let slot_widths = [
            local.max(SIMD_OP_BITS),
            accumulator.max(dram),
            size.max(accumulator),
        ];
        let payload: u32 = slot_widths.iter().sum::<u32>() + FLAGS_BITS + OPCODE_BITS;
        let word_bits = payload.div_ceil(8) * 8;
        if word_bits > MAX_WORD_BITS {
            return Err(CompileError::InvalidArchitecture {
                reason: format!(
                    "instruction word needs {word_bits} bits, at most {MAX_WORD_BITS} are supported"
                ),
            });
        }

        let fields = Opcode::ALL
            .into_iter()
            .map(|opcode| (opcode, Self::kind_fields(opcode, slot_widths, word_bits)))
            .collect();
        Ok(Self { word_bits, slot_widths, fields })
    }

    fn kind_fields(opcode: Opcode, slot_widths: [u32; 3], word_bits: u32) -> Vec<Field> {
        let mut fields: Vec<Field> = Vec::new();
        let mut push = |name: &'static str, offset: u32, width: u32| {
            if width == 0 {
                return;
            }
            // Adjacent padding collapses into one reserved field.
            if let Some(last) = fields.last_mut() {
                if name == RESERVED && last.is_reserved() && last.end() == offset {
                    last.width += width;
                    return;
                }
            }
            fields.push(Field { name, offset, width });
        };

        let mut offset = 0;
        for (name, width) in slot_names(opcode).into_iter().zip(slot_widths) {
            push(name.unwrap_or(RESERVED), offset, width);
            offset += width;
        }
        let flags_offset = word_bits - FLAGS_BITS - OPCODE_BITS;
        push(RESERVED, offset, flags_offset - offset);
        push("flags", flags_offset, FLAGS_BITS);
        push("opcode", flags_offset + FLAGS_BITS, OPCODE_BITS);
        fields
    }

    pub fn word_bits(&self) -> u32 {
        self.word_bits
    }

    pub fn word_bytes(&self) -> usize {
        (self.word_bits / 8) as usize
    }

    pub fn slot_widths(&self) -> [u32; 3] {
        self.slot_widths
    }

    /// All fields of one kind, by offset, including flags and opcode.
    pub fn fields(&self, opcode: Opcode) -> &[Field] {
        self.fields
            .iter()
            .find(|(op, _)| *op == opcode)
            .map(|(_, fields)| fields.as_slice())
            .unwrap_or(&[])
    }

    pub fn field(&self, opcode: Opcode, name: &str) -> Option<Field> {
        self.fields(opcode).iter().copied().find(|f| f.name == name)
    }

    /// Check that the fields of every kind tile the word without gaps.
    pub fn validate(&self) -> CompileResult<()> {
        for opcode in Opcode::ALL {
            let mut next = 0;
            for field in self.fields(opcode) {
                if field.offset != next || field.width == 0 {
                    return Err(CompileError::InvalidArchitecture {
                        reason: format!(
                            "{opcode} field {} at bit {} does not follow bit {next}",
                            field.name, field.offset
                        ),
                    });
                }
                next = field.end();
            }
            if next != self.word_bits {
                return Err(CompileError::InvalidArchitecture {
                    reason: format!("{opcode} fields cover {next} of {} bits", self.word_bits),
                });
            }
        }
        Ok(())
    }

    /// Encode one instruction into a little-endian word.
    pub fn encode(&self, inst: &Instruction) -> Result<Vec<u8>, FieldOverflow> {
        let opcode = inst.opcode();
        let mut word: u128 = 0;
        for (name, value) in inst.operands() {
            let Some(field) = self.field(opcode, name) else {
                continue;
            };
            let raw = if name == "size" {
                if value == 0 || value - 1 > field.max_value() {
                    return Err(FieldOverflow {
                        field: name,
                        value,
                        limit: field.max_value().saturating_add(1),
                    });
                }
                value - 1
            } else {
                if value > field.max_value() {
                    return Err(FieldOverflow { field: name, value, limit: field.max_value() });
                }
                value
            };
            word |= (raw as u128) << field.offset;
        }

        let flags_offset = self.word_bits - FLAGS_BITS - OPCODE_BITS;
        word |= (inst.flags() as u128) << flags_offset;
        word |= (opcode as u128) << (flags_offset + FLAGS_BITS);
        Ok(word.to_le_bytes()[..self.word_bytes()].to_vec())
    }

    /// Decode one word; `index` only labels errors.
    pub fn decode(&self, index: usize, bytes: &[u8]) -> Result<Instruction, DecodeError> {
        if bytes.len() != self.word_bytes() {
            return Err(DecodeError::WrongLength { len: bytes.len(), word_bytes: self.word_bytes() });
        }
        let mut buf = [0u8; 16];
        buf[..bytes.len()].copy_from_slice(bytes);
        let word = u128::from_le_bytes(buf);

        let flags_offset = self.word_bits - FLAGS_BITS - OPCODE_BITS;
        let opcode_bits = ((word >> (flags_offset + FLAGS_BITS)) & 0xF) as u8;
        let opcode = Opcode::from_bits(opcode_bits)
            .ok_or(DecodeError::UnknownOpcode { index, opcode: opcode_bits })?;
        let flags = ((word >> flags_offset) & 0xF) as u8;

        let fields = self.fields(opcode);
        if fields.iter().any(|f| f.is_reserved() && f.extract(word) != 0) {
            return Err(DecodeError::ReservedBits { index });
        }

        let value = |name: &'static str| {
            let raw = self.field(opcode, name).map_or(0, |f| f.extract(word));
            if name == "size" {
                raw + 1
            } else {
                raw
            }
        };
        Instruction::from_fields(opcode, flags, value).map_err(|invalid| match invalid {
            InvalidFields::Flags(flags) => DecodeError::InvalidFlags { index, opcode, flags },
            InvalidFields::SimdOp(op) => DecodeError::InvalidSimdOp { index, op },
        })
    }

    pub fn decode_stream(&self, bytes: &[u8]) -> Result<Vec<Instruction>, DecodeError> {
        let word_bytes = self.word_bytes();
        if bytes.len() % word_bytes != 0 {
            return Err(DecodeError::WrongLength { len: bytes.len(), word_bytes });
        }
        bytes
            .chunks(word_bytes)
            .enumerate()
            .map(|(index, word)| self.decode(index, word))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tcu::instruction::{DataMoveKind, SimdOp};

    fn layout() -> InstructionLayout {
        InstructionLayout::new(&Architecture::default()).unwrap()
    }

    #[test]
    fn test_default_word_shape() {
        let layout = layout();
        // local 11 bits, max(acc 9, dram 20), max(size 11, acc 9)
        assert_eq!(layout.slot_widths(), [11, 20, 11]);
        assert_eq!(layout.word_bits(), 56);
        assert_eq!(layout.word_bytes(), 7);
        assert_eq!(layout.field(Opcode::MatMul, "flags").unwrap().offset, 48);
        assert_eq!(layout.field(Opcode::MatMul, "opcode").unwrap().offset, 52);
    }

    #[test]
    fn test_fields_cover_word_for_every_kind() {
        for arch in [
            Architecture::default(),
            Architecture { array_size: 16, local_depth: 3000, accumulator_depth: 7, ..Architecture::default() },
            Architecture { dram0_depth: 2, dram1_depth: 2, local_depth: 4, accumulator_depth: 2, ..Architecture::default() },
        ] {
            let layout = InstructionLayout::new(&arch).unwrap();
            layout.validate().unwrap();
            assert_eq!(layout.word_bits() % 8, 0);
            for opcode in Opcode::ALL {
                let covered: u32 = layout.fields(opcode).iter().map(|f| f.width).sum();
                assert_eq!(covered, layout.word_bits(), "{opcode}");
            }
        }
    }

    #[test]
    fn test_unused_slots_are_reserved() {
        let layout = layout();
        let fields = layout.fields(Opcode::LoadWeight);
        let names: Vec<_> = fields.iter().map(|f| f.name).collect();
        assert_eq!(
            names,
            vec!["local_address", RESERVED, "size", RESERVED, "flags", "opcode"]
        );

        let noop: Vec<_> = layout.fields(Opcode::NoOp).iter().map(|f| f.name).collect();
        assert_eq!(noop, vec![RESERVED, "flags", "opcode"]);
    }

    #[test]
    fn test_round_trip_each_kind() {
        let layout = layout();
        let instructions = [
            Instruction::NoOp,
            Instruction::MatMul {
                accumulate: true,
                zeroes: false,
                local_address: 2047,
                accumulator_address: 511,
                size: 8,
            },
            Instruction::DataMove {
                kind: DataMoveKind::Dram1ToLocal,
                local_address: 17,
                address: (1 << 20) - 1,
                size: 2048,
            },
            Instruction::LoadWeight { zeroes: true, local_address: 64, size: 1 },
            Instruction::Simd {
                op: SimdOp::Relu,
                read: true,
                write: true,
                accumulate: false,
                read_address: 5,
                write_address: 5,
            },
        ];
        for inst in instructions {
            let bytes = layout.encode(&inst).unwrap();
            assert_eq!(bytes.len(), layout.word_bytes());
            assert_eq!(layout.decode(0, &bytes).unwrap(), inst);
        }
    }

    #[test]
    fn test_overflow_names_field() {
        let layout = layout();
        let inst = Instruction::LoadWeight { zeroes: false, local_address: 2048, size: 1 };
        assert_eq!(
            layout.encode(&inst),
            Err(FieldOverflow { field: "local_address", value: 2048, limit: 2047 })
        );

        let inst = Instruction::MatMul {
            accumulate: false,
            zeroes: false,
            local_address: 0,
            accumulator_address: 0,
            size: 0,
        };
        assert_eq!(layout.encode(&inst).unwrap_err().field, "size");
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let layout = layout();
        let mut bytes = layout.encode(&Instruction::NoOp).unwrap();
        bytes[0] = 1;
        assert_eq!(layout.decode(3, &bytes), Err(DecodeError::ReservedBits { index: 3 }));

        let mut bytes = vec![0u8; layout.word_bytes()];
        bytes[layout.word_bytes() - 1] = 0xF0;
        assert_eq!(
            layout.decode(0, &bytes),
            Err(DecodeError::UnknownOpcode { index: 0, opcode: 0xF })
        );

        assert!(matches!(
            layout.decode_stream(&[0u8; 5]),
            Err(DecodeError::WrongLength { len: 5, .. })
        ));
    }

    #[test]
    fn test_word_wider_than_decoder_is_rejected() {
        let arch = Architecture {
            local_depth: 1 << 40,
            accumulator_depth: 1 << 40,
            dram0_depth: 1 << 50,
            ..Architecture::default()
        };
        assert!(matches!(
            InstructionLayout::new(&arch),
            Err(CompileError::InvalidArchitecture { .. })
        ));
    }
}
