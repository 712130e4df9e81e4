// This module renders the machine-parameter header that accompanies a compiled program. The
// header is a C include file made of #define lines: the architecture parameters, the
// instruction word size, the offset and width of every named field of every instruction
// kind, the opcode values, the DRAM placement of each graph input, constant and output, and
// the architecture fingerprint. Host code uses it to stage tensors in DRAM and hardware test
// benches use it to check that they decode the same layout the compiler encoded.

//! C header generation.

use super::instruction::Opcode;
use super::layout::InstructionLayout;
use crate::core::architecture::Architecture;
use crate::core::compiler::{IoKind, IoTensor};
use hashbrown::HashSet;
use std::fmt::Write;

const GUARD: &str = "TCU_PROGRAM_H";

/// Upper-case a name into a C identifier fragment.
pub fn c_identifier(name: &str) -> String {
    let mut ident: String = name
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() { ch.to_ascii_uppercase() } else { '_' })
        .collect();
    if ident.starts_with(|ch: char| ch.is_ascii_digit()) {
        ident.insert(0, '_');
    }
    ident
}

struct Defines {
    out: String,
}

impl Defines {
    fn define(&mut self, name: &str, value: impl std::fmt::Display) {
        let _ = writeln!(self.out, "#define {name} {value}");
    }

    fn section(&mut self, title: &str) {
        let _ = writeln!(self.out, "\n/* {title} */");
    }
}

/// Render the header for a program compiled for `arch`.
pub fn render_header(arch: &Architecture, layout: &InstructionLayout, io: &[IoTensor], instructions: usize) -> String {
    let mut defs = Defines { out: String::new() };
    let _ = writeln!(defs.out, "/* Generated by tcuc for {arch}. Do not edit. */");
    let _ = writeln!(defs.out, "#ifndef {GUARD}");
    let _ = writeln!(defs.out, "#define {GUARD}");

    defs.section("Architecture");
    defs.define("TCU_FINGERPRINT", format!("\"{}\"", arch.fingerprint()));
    defs.define("TCU_DATA_TYPE", format!("\"{}\"", arch.data_type));
    defs.define("TCU_DATA_WIDTH", arch.data_type.width_bits());
    defs.define("TCU_DATA_FRACTIONAL_BITS", arch.data_type.fractional_bits());
    defs.define("TCU_ARRAY_SIZE", arch.array_size);
    defs.define("TCU_LOCAL_DEPTH", arch.local_depth);
    defs.define("TCU_ACCUMULATOR_DEPTH", arch.accumulator_depth);
    defs.define("TCU_DRAM0_DEPTH", arch.dram0_depth);
    defs.define("TCU_DRAM1_DEPTH", arch.dram1_depth);
    defs.define("TCU_DRAM_BUS_WIDTH", arch.dram_bus_width);

    defs.section("Instruction words");
    defs.define("TCU_INSTRUCTION_BITS", layout.word_bits());
    defs.define("TCU_INSTRUCTION_BYTES", layout.word_bytes());
    defs.define("TCU_INSTRUCTION_COUNT", instructions);

    for opcode in Opcode::ALL {
        let kind = c_identifier(opcode.mnemonic());
        defs.section(&format!("{opcode} layout"));
        defs.define(&format!("TCU_OPCODE_{kind}"), format!("0x{:X}", opcode as u8));
        for field in layout.fields(opcode).iter().filter(|f| !f.is_reserved()) {
            let name = c_identifier(field.name);
            defs.define(&format!("TCU_{kind}_{name}_OFFSET"), field.offset);
            defs.define(&format!("TCU_{kind}_{name}_WIDTH"), field.width);
        }
    }

    if !io.is_empty() {
        defs.section("DRAM placement");
    }
    let mut taken = HashSet::new();
    for tensor in io {
        let base = format!("TCU_{}_{}", tensor.kind.prefix(), c_identifier(&tensor.name));
        // Names that fold to the same identifier get a numeric suffix in io order.
        let mut prefix = base.clone();
        let mut n = 2;
        while !taken.insert(prefix.clone()) {
            prefix = format!("{base}_{n}");
            n += 1;
        }
        defs.define(&format!("{prefix}_BANK"), tensor.location.bank as u8);
        defs.define(&format!("{prefix}_ADDRESS"), tensor.location.address);
        defs.define(&format!("{prefix}_DEPTH"), tensor.depth);
    }

    let _ = writeln!(defs.out, "\n#endif /* {GUARD} */");
    defs.out
}

/// Value of `#define name value` in a rendered header.
pub fn define_value<'h>(header: &'h str, name: &str) -> Option<&'h str> {
    header.lines().find_map(|line| {
        let rest = line.strip_prefix("#define ")?;
        let (key, value) = rest.split_once(' ')?;
        (key == name).then_some(value)
    })
}

impl IoKind {
    fn prefix(self) -> &'static str {
        match self {
            IoKind::Input => "INPUT",
            IoKind::Constant => "CONST",
            IoKind::Output => "OUTPUT",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tensor::{DramBank, DramLocation};

    #[test]
    fn test_c_identifier() {
        assert_eq!(c_identifier("local_address"), "LOCAL_ADDRESS");
        assert_eq!(c_identifier("h.acc"), "H_ACC");
        assert_eq!(c_identifier("1x"), "_1X");
    }

    #[test]
    fn test_header_matches_layout() {
        let arch = Architecture::default();
        let layout = InstructionLayout::new(&arch).unwrap();
        let io = vec![
            IoTensor {
                name: "x".to_string(),
                kind: IoKind::Input,
                location: DramLocation { bank: DramBank::Dram0, address: 0 },
                shape: vec![4, 16],
                depth: 8,
            },
            IoTensor {
                name: "w".to_string(),
                kind: IoKind::Constant,
                location: DramLocation { bank: DramBank::Dram1, address: 0 },
                shape: vec![16, 8],
                depth: 16,
            },
        ];
        let header = render_header(&arch, &layout, &io, 12);

        assert!(header.contains("#ifndef TCU_PROGRAM_H\n#define TCU_PROGRAM_H\n"));
        assert_eq!(define_value(&header, "TCU_INSTRUCTION_BITS"), Some("56"));
        assert_eq!(define_value(&header, "TCU_INSTRUCTION_BYTES"), Some("7"));
        assert_eq!(define_value(&header, "TCU_INSTRUCTION_COUNT"), Some("12"));
        assert_eq!(define_value(&header, "TCU_OPCODE_SIMD"), Some("0x4"));
        assert_eq!(define_value(&header, "TCU_DATAMOVE_ADDRESS_OFFSET"), Some("11"));
        assert_eq!(define_value(&header, "TCU_DATAMOVE_ADDRESS_WIDTH"), Some("20"));
        assert_eq!(define_value(&header, "TCU_MATMUL_OPCODE_OFFSET"), Some("52"));
        assert_eq!(define_value(&header, "TCU_INPUT_X_BANK"), Some("0"));
        assert_eq!(define_value(&header, "TCU_CONST_W_BANK"), Some("1"));
        assert_eq!(define_value(&header, "TCU_CONST_W_DEPTH"), Some("16"));
        assert_eq!(
            define_value(&header, "TCU_FINGERPRINT"),
            Some(format!("\"{}\"", arch.fingerprint()).as_str())
        );
        assert!(!header.contains("RESERVED"));
    }

    #[test]
    fn test_folded_names_get_distinct_defines() {
        let arch = Architecture::default();
        let layout = InstructionLayout::new(&arch).unwrap();
        let tensor = |name: &str, address| IoTensor {
            name: name.to_string(),
            kind: IoKind::Input,
            location: DramLocation { bank: DramBank::Dram0, address },
            shape: vec![4, 8],
            depth: 4,
        };
        let io = vec![tensor("a", 0), tensor("A", 4), tensor("a_2", 8)];
        let header = render_header(&arch, &layout, &io, 0);

        assert_eq!(define_value(&header, "TCU_INPUT_A_ADDRESS"), Some("0"));
        assert_eq!(define_value(&header, "TCU_INPUT_A_2_ADDRESS"), Some("4"));
        assert_eq!(define_value(&header, "TCU_INPUT_A_2_2_ADDRESS"), Some("8"));

        let mut names: Vec<&str> = header
            .lines()
            .filter_map(|line| line.strip_prefix("#define ")?.split_once(' ').map(|(key, _)| key))
            .collect();
        let total = names.len();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), total);
    }
}
