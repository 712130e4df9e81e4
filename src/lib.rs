//! tcuc - a compiler for tensor compute units.
//!
//! tcuc lowers a neural-network computation graph into the linear instruction
//! stream of a fixed-function accelerator: a square systolic array with a
//! local scratchpad, an accumulator memory and two DRAM banks. Every load,
//! matrix multiply, activation and store is scheduled explicitly and placed at
//! a known on-chip address.
//!
//! # Primary Usage
//!
//! ```ignore
//! use tcuc::core::{Architecture, CompileOptions, Compiler};
//! use tcuc::test_graph::{Graph, GraphFrontend};
//!
//! let graph = Graph::parse(text)?;
//! let compiler = Compiler::new(Architecture::default(), CompileOptions::default())?;
//! let program = compiler.compile(&GraphFrontend::new(&graph), &["y"])?;
//! println!("{}", program.summary());
//! ```
//!
//! # Architecture
//!
//! - [`core`] - Machine model, frontend trait, memory manager, scheduler and driver
//! - [`tcu`] - Instruction set, instruction layout, emitters and header generation
//! - [`test_graph`] - Textual graph format used by tests and the `tcuc` binary

pub mod core;
pub mod tcu;
pub mod test_graph;

pub use crate::core::{
    compile, Architecture, CompileError, CompileOptions, CompileResult, CompiledProgram, Compiler,
    DataType, Frontend, GraphError, NodeOp,
};
