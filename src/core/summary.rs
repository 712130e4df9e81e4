// This module provides CompilationSummary, the human-readable account of one compilation.
// It is collected once the schedule is final from the committed operations, the memory
// manager statistics and the DRAM allocator, and printed by the tcuc driver. Memory peaks
// are reported against capacity, instructions are counted per opcode in opcode order, and
// the estimated cycle count is broken down into the busy time of every resource.

use super::architecture::Architecture;
use super::memory::{MemoryKind, MemoryStats};
use super::scheduler::Schedule;
use super::tensor::{DramAllocator, DramBank};
use crate::tcu::emitter::Resource;
use crate::tcu::instruction::Opcode;
use std::fmt;

/// Statistics of one compilation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompilationSummary {
    /// Committed operations, injected spills and reloads included.
    pub operations: usize,

    /// Instruction words emitted.
    pub instructions: usize,

    /// Size of the instruction stream in bytes.
    pub program_bytes: usize,

    /// Instruction count per opcode, in opcode order, zero counts omitted.
    pub instruction_counts: Vec<(Opcode, usize)>,

    pub peak_local: usize,
    pub local_capacity: usize,
    pub peak_accumulator: usize,
    pub accumulator_capacity: usize,

    /// On-chip allocations made.
    pub allocations: usize,

    /// Spill stores injected.
    pub spills: usize,

    /// Reloads injected.
    pub reloads: usize,

    /// Estimated cycle at which the last operation finishes.
    pub total_cycles: u64,

    /// Busy cycles per resource, indexed by [`Resource::index`].
    pub busy_cycles: [u64; 3],

    pub dram0_used: usize,
    pub dram1_used: usize,
}

impl CompilationSummary {
    pub fn collect(arch: &Architecture, schedule: &Schedule, memory: &MemoryStats, dram: &DramAllocator) -> Self {
        let instruction_counts = Opcode::ALL
            .iter()
            .map(|&opcode| {
                let count = schedule
                    .instructions
                    .iter()
                    .filter(|inst| inst.opcode() == opcode)
                    .count();
                (opcode, count)
            })
            .filter(|&(_, count)| count > 0)
            .collect();

        let mut busy_cycles = [0; 3];
        for resource in Resource::ALL {
            busy_cycles[resource.index()] = schedule.busy_cycles(resource);
        }

        Self {
            operations: schedule.ops.len(),
            instructions: schedule.instructions.len(),
            program_bytes: schedule.bytes.len(),
            instruction_counts,
            peak_local: memory.peak(MemoryKind::Local),
            local_capacity: arch.local_depth,
            peak_accumulator: memory.peak(MemoryKind::Accumulator),
            accumulator_capacity: arch.accumulator_depth,
            allocations: memory.allocations,
            spills: schedule.spills(),
            reloads: schedule.reloads(),
            total_cycles: schedule.total_cycles(),
            busy_cycles,
            dram0_used: dram.used(DramBank::Dram0),
            dram1_used: dram.used(DramBank::Dram1),
        }
    }

    pub fn busy(&self, resource: Resource) -> u64 {
        self.busy_cycles[resource.index()]
    }
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}

impl fmt::Display for CompilationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Compilation Summary:")?;
        writeln!(f, "  Operations committed: {}", self.operations)?;
        writeln!(f, "  Instructions emitted: {}", self.instructions)?;
        writeln!(f, "  Program size: {} bytes", self.program_bytes)?;
        writeln!(
            f,
            "  Local memory peak: {}/{} vectors ({:.1}%)",
            self.peak_local,
            self.local_capacity,
            percent(self.peak_local as u64, self.local_capacity as u64)
        )?;
        writeln!(
            f,
            "  Accumulator peak: {}/{} vectors ({:.1}%)",
            self.peak_accumulator,
            self.accumulator_capacity,
            percent(self.peak_accumulator as u64, self.accumulator_capacity as u64)
        )?;
        writeln!(f, "  Allocations: {}", self.allocations)?;
        writeln!(f, "  Spills generated: {}", self.spills)?;
        writeln!(f, "  Reloads generated: {}", self.reloads)?;
        writeln!(f, "  DRAM0 used: {} vectors", self.dram0_used)?;
        writeln!(f, "  DRAM1 used: {} vectors", self.dram1_used)?;
        writeln!(f, "  Estimated cycles: {}", self.total_cycles)?;
        for resource in Resource::ALL {
            let busy = self.busy(resource);
            writeln!(
                f,
                "    {} busy: {} ({:.1}%)",
                resource,
                busy,
                percent(busy, self.total_cycles)
            )?;
        }

        if !self.instruction_counts.is_empty() {
            writeln!(f, "  Instruction breakdown:")?;
            for (opcode, count) in &self.instruction_counts {
                writeln!(f, "    {}: {}", opcode.mnemonic(), count)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::scheduler::ScheduledOp;
    use crate::core::tensor::TensorId;
    use crate::tcu::emitter::Emitter;
    use crate::tcu::instruction::{DataMoveKind, Instruction};

    fn schedule() -> Schedule {
        let load = Instruction::DataMove {
            kind: DataMoveKind::Dram0ToLocal,
            local_address: 0,
            address: 0,
            size: 4,
        };
        let store = Instruction::DataMove {
            kind: DataMoveKind::LocalToDram0,
            local_address: 0,
            address: 16,
            size: 4,
        };
        Schedule {
            ops: vec![
                ScheduledOp {
                    emitter: Emitter::Load { tensor: TensorId(0) },
                    origin: Some(0),
                    resource: Resource::Load,
                    start_cycle: 0,
                    end_cycle: 10,
                    instructions: 0..1,
                },
                ScheduledOp {
                    emitter: Emitter::Spill { tensor: TensorId(0) },
                    origin: None,
                    resource: Resource::Store,
                    start_cycle: 10,
                    end_cycle: 20,
                    instructions: 1..2,
                },
            ],
            instructions: vec![load, store],
            bytes: vec![0; 14],
        }
    }

    #[test]
    fn test_collect() {
        let arch = Architecture::default();
        let stats = MemoryStats { peak_local: 4, peak_accumulator: 0, allocations: 1, spills: 1 };
        let mut dram = DramAllocator::new();
        dram.allocate(DramBank::Dram0, 20).unwrap();

        let summary = CompilationSummary::collect(&arch, &schedule(), &stats, &dram);
        assert_eq!(summary.instructions, 2);
        assert_eq!(summary.program_bytes, 14);
        assert_eq!(summary.instruction_counts, vec![(Opcode::DataMove, 2)]);
        assert_eq!(summary.spills, 1);
        assert_eq!(summary.reloads, 0);
        assert_eq!(summary.total_cycles, 20);
        assert_eq!(summary.busy(Resource::Load), 10);
        assert_eq!(summary.busy(Resource::Compute), 0);
        assert_eq!(summary.dram0_used, 20);
    }

    #[test]
    fn test_display() {
        let arch = Architecture::default();
        let summary = CompilationSummary::collect(&arch, &schedule(), &MemoryStats::default(), &DramAllocator::new());
        let text = summary.to_string();
        assert!(text.starts_with("Compilation Summary:\n"));
        assert!(text.contains("  Instructions emitted: 2\n"));
        assert!(text.contains("  Spills generated: 1\n"));
        assert!(text.contains("    DataMove: 2\n"));
        assert!(text.contains("busy: 10 (50.0%)"));
    }
}
