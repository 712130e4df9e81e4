// This module defines error types for the tcuc compiler using the thiserror crate for
// idiomatic Rust error handling. GraphError covers problems with the input graph itself:
// requested outputs that do not exist, cycles, malformed nodes and TGF parse failures.
// CompileError is the main error enum and wraps GraphError next to the failures of the
// later passes: on-chip memory exhaustion, scheduler deadlocks, operands that do not fit
// their instruction field, invalid machine parameters, broken allocator invariants and
// architecture mismatches between a program and its target. Each variant carries the
// tensor, node, emitter or field that triggered it. The module also provides
// CompileResult<T> as a convenience type alias for Result<T, CompileError>.

//! Error types for the tcuc compiler.
//!
//! Using thiserror for more idiomatic error handling.

use super::memory::MemoryKind;
use thiserror::Error;

/// Problems with the computation graph handed to a frontend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Unknown output tensor: {name}")]
    UnknownOutput {
        name: String,
    },

    #[error("Cycle detected at node {node}")]
    Cycle {
        node: String,
    },

    #[error("Malformed node {node}: {reason}")]
    Malformed {
        node: String,
        reason: String,
    },

    #[error("Parse error at line {line}: {message}")]
    Parse {
        line: usize,
        message: String,
    },
}

/// Main error type for compilation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("Out of {kind} memory placing {tensor}: requested {requested} vectors, capacity {capacity}")]
    OutOfMemory {
        tensor: String,
        kind: MemoryKind,
        requested: usize,
        capacity: usize,
    },

    #[error("Scheduling failed: {reason} ({context})")]
    Scheduling {
        reason: String,
        context: String,
    },

    #[error("Cannot encode {emitter}: {field} = {value} is outside the encodable range (limit {limit})")]
    Encoding {
        emitter: String,
        field: &'static str,
        value: u64,
        limit: u64,
    },

    #[error("Invalid architecture: {reason}")]
    InvalidArchitecture {
        reason: String,
    },

    #[error("Memory invariant violated: {reason}")]
    MemoryInvariant {
        reason: String,
    },

    #[error("Program built for architecture {found} but target is {expected}")]
    Incompatible {
        expected: String,
        found: String,
    },
}

/// Result type alias for compile operations.
pub type CompileResult<T> = Result<T, CompileError>;
