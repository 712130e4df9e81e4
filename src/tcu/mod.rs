// This module groups everything specific to the tensor compute unit as a target: the
// instruction set, the bit-level instruction layout derived from an Architecture, the
// Emitter operations that encode themselves into instructions, and the generator for the
// machine-parameter header that ships next to every compiled program.

//! Tensor compute unit target.

pub mod emitter;
pub mod header;
pub mod instruction;
pub mod layout;

pub use emitter::{Activation, Emitter, Encoded, Resolver, Resource};
pub use header::render_header;
pub use instruction::{DataMoveKind, Instruction, Opcode, SimdOp};
pub use layout::{DecodeError, Field, InstructionLayout};
