// This module serves as the central hub for tcuc's target-independent infrastructure. It
// exports and organizes the building blocks every compilation goes through: machine
// parameters and tensor layout (architecture, dimensions), the registry of logical tensors
// and their DRAM placement (tensor), on-chip allocation (memory), the Frontend trait with
// its traversal and lowering (frontend), list scheduling (scheduler), the per-compilation
// context (context), statistics (summary) and the driver tying them together (compiler).

//! Core tcuc infrastructure
//!
//! # Key Components
//!
//! ## Machine Model (`architecture`, `dimensions`)
//! - Immutable parameters of one accelerator build and their fingerprint
//! - Mapping of tensor shapes to on-chip vectors, tiles and strides
//!
//! ## Memory Management (`memory`, `tensor`)
//! - Best-fit placement in local and accumulator memory
//! - Spill victim selection by furthest next use
//! - Bump allocation of DRAM homes, exports and spill slots
//!
//! ## Passes (`frontend`, `scheduler`)
//! - Backward traversal from the requested outputs
//! - Lowering of graph nodes into emitters with activation fusion
//! - Resource-aware list scheduling with spill and reload injection
//!
//! ## Driver (`context`, `compiler`, `summary`)
//! - Arena-backed compilation context
//! - Compiled programs with listing, header and statistics

pub mod architecture;
pub mod compiler;
pub mod context;
pub mod dimensions;
pub mod error;
pub mod frontend;
pub mod memory;
pub mod scheduler;
pub mod summary;
pub mod tensor;

pub use architecture::{Architecture, DataType};
pub use compiler::{compile, CompileOptions, CompiledProgram, Compiler, IoKind, IoTensor};
pub use context::EmitContext;
pub use dimensions::MemoryDimensions;
pub use error::{CompileError, CompileResult, GraphError};
pub use frontend::{Frontend, NodeOp};
pub use memory::{Allocation, Binding, MemoryKind, MemoryManager, MemoryStats, Region, SpillDecision};
pub use scheduler::{Schedule, ScheduledOp, Scheduler, SchedulerConfig, DEFAULT_LOOKAHEAD};
pub use summary::CompilationSummary;
pub use tensor::{DramBank, DramLocation, TensorId, TensorRole};
