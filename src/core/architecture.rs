// This module describes the target machine. Architecture is the immutable set of parameters
// of one tensor compute unit build: the fixed-point data type, the size of the square
// systolic array, the depth of the local scratchpad and of the accumulator memory (both in
// vectors of array_size scalars), the depth of the two DRAM banks and the width of the
// DRAM bus. The value is read once per compilation and never mutated. Derived quantities
// (vector width in bits, DRAM beats per vector, address widths) are exposed as methods so
// the instruction layout, the cost model and the header generator agree on them. The
// fingerprint is a SHA-256 digest over every parameter and is embedded in the generated
// header so that a program and a hardware build from different parameters are rejected.

//! Machine parameters of the target accelerator.

use super::error::{CompileError, CompileResult};
use crate::tcu::layout::InstructionLayout;
use sha2::{Digest, Sha256};
use std::fmt;

/// Fixed-point formats supported by the processing elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    /// 8 bits, 4 fractional.
    Fp8Bp4,
    /// 16 bits, 8 fractional.
    Fp16Bp8,
    /// 18 bits, 10 fractional.
    Fp18Bp10,
    /// 32 bits, 16 fractional.
    Fp32Bp16,
}

impl DataType {
    pub const ALL: [DataType; 4] = [
        DataType::Fp8Bp4,
        DataType::Fp16Bp8,
        DataType::Fp18Bp10,
        DataType::Fp32Bp16,
    ];

    /// Total width of one scalar in bits.
    pub const fn width_bits(self) -> u32 {
        match self {
            DataType::Fp8Bp4 => 8,
            DataType::Fp16Bp8 => 16,
            DataType::Fp18Bp10 => 18,
            DataType::Fp32Bp16 => 32,
        }
    }

    /// Number of fractional bits.
    pub const fn fractional_bits(self) -> u32 {
        match self {
            DataType::Fp8Bp4 => 4,
            DataType::Fp16Bp8 => 8,
            DataType::Fp18Bp10 => 10,
            DataType::Fp32Bp16 => 16,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            DataType::Fp8Bp4 => "FP8BP4",
            DataType::Fp16Bp8 => "FP16BP8",
            DataType::Fp18Bp10 => "FP18BP10",
            DataType::Fp32Bp16 => "FP32BP16",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|dt| dt.name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Parameters of one accelerator build.
///
/// The processing element array is square: `array_size` rows by
/// `array_size` columns, and one local-memory vector holds `array_size`
/// scalars. All depths are counted in vectors.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Architecture {
    pub data_type: DataType,
    pub array_size: usize,
    pub local_depth: usize,
    pub accumulator_depth: usize,
    /// DRAM bank for inputs, outputs and spill slots.
    pub dram0_depth: usize,
    /// DRAM bank for constants.
    pub dram1_depth: usize,
    /// Bits transferred per DRAM beat.
    pub dram_bus_width: usize,
}

impl Default for Architecture {
    fn default() -> Self {
        Self {
            data_type: DataType::Fp16Bp8,
            array_size: 8,
            local_depth: 2048,
            accumulator_depth: 512,
            dram0_depth: 1 << 20,
            dram1_depth: 1 << 20,
            dram_bus_width: 128,
        }
    }
}

impl Architecture {
    /// Reject parameter sets no accelerator can be built from.
    pub fn validate(&self) -> CompileResult<()> {
        let invalid = |reason: String| Err(CompileError::InvalidArchitecture { reason });

        if self.array_size == 0 {
            return invalid("array size must be positive".to_string());
        }
        for (name, depth) in [
            ("local", self.local_depth),
            ("accumulator", self.accumulator_depth),
            ("dram0", self.dram0_depth),
            ("dram1", self.dram1_depth),
        ] {
            if depth == 0 {
                return invalid(format!("{name} depth must be positive"));
            }
        }
        if self.dram_bus_width == 0 || self.dram_bus_width % 8 != 0 {
            return invalid(format!(
                "DRAM bus width {} is not a positive multiple of 8",
                self.dram_bus_width
            ));
        }
        InstructionLayout::new(self)?;
        Ok(())
    }

    /// Width of one memory vector in bits.
    pub fn vector_bits(&self) -> usize {
        self.array_size * self.data_type.width_bits() as usize
    }

    /// Number of DRAM bus beats needed to move one vector.
    pub fn dram_beats_per_vector(&self) -> usize {
        self.vector_bits().div_ceil(self.dram_bus_width)
    }

    pub fn local_address_bits(&self) -> u32 {
        bits_for(self.local_depth)
    }

    pub fn accumulator_address_bits(&self) -> u32 {
        bits_for(self.accumulator_depth)
    }

    pub fn dram_address_bits(&self) -> u32 {
        bits_for(self.dram0_depth.max(self.dram1_depth))
    }

    /// Bits needed for a transfer count encoded as `count - 1`.
    pub fn size_bits(&self) -> u32 {
        bits_for(self.local_depth.max(self.accumulator_depth))
    }

    /// Stable identifier of this parameter set.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.data_type.name().as_bytes());
        for value in [
            self.array_size,
            self.local_depth,
            self.accumulator_depth,
            self.dram0_depth,
            self.dram1_depth,
            self.dram_bus_width,
        ] {
            hasher.update((value as u64).to_le_bytes());
        }
        let digest = hasher.finalize();
        hex::encode(&digest[..8])
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}x{} array, local {} vectors, accumulator {} vectors, dram0 {}, dram1 {}, bus {} bits",
            self.data_type,
            self.array_size,
            self.array_size,
            self.local_depth,
            self.accumulator_depth,
            self.dram0_depth,
            self.dram1_depth,
            self.dram_bus_width
        )
    }
}

/// Number of bits needed to address `count` distinct slots (at least one).
pub fn bits_for(count: usize) -> u32 {
    let max = count.saturating_sub(1);
    (usize::BITS - max.leading_zeros()).max(1)
}
