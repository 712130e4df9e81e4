//! Command-line driver for the tcuc compiler.
//!
//! Reads a TGF graph, compiles the requested outputs for the machine described
//! by the flags and writes `<prefix>.tprog` (the instruction stream) and
//! `<prefix>.h` (the machine-parameter header).

use clap::Parser;
use std::fs;
use std::io::BufWriter;
use std::path::PathBuf;
use tcuc::core::{Architecture, CompileOptions, Compiler, DataType, SchedulerConfig, DEFAULT_LOOKAHEAD};
use tcuc::test_graph::{Graph, GraphFrontend};

#[derive(Parser)]
#[command(name = "tcuc")]
#[command(about = "Compile a computation graph for a tensor compute unit", long_about = None)]
#[command(version)]
struct Cli {
    /// Graph in TGF
    #[arg(value_name = "GRAPH")]
    graph: PathBuf,

    /// Tensor to compute and store; repeat for several outputs
    #[arg(long = "output", value_name = "NAME", required = true)]
    outputs: Vec<String>,

    /// Prefix of the generated files (default: the graph path without extension)
    #[arg(short = 'o', long = "prefix")]
    prefix: Option<PathBuf>,

    /// Scalar format: FP8BP4, FP16BP8, FP18BP10 or FP32BP16
    #[arg(long = "data-type", default_value = "FP16BP8", value_parser = parse_data_type)]
    data_type: DataType,

    /// Rows and columns of the processing element array
    #[arg(long = "array-size", default_value_t = 8)]
    array_size: usize,

    /// Local memory depth in vectors
    #[arg(long = "local-depth", default_value_t = 2048)]
    local_depth: usize,

    /// Accumulator memory depth in vectors
    #[arg(long = "accumulator-depth", default_value_t = 512)]
    accumulator_depth: usize,

    /// DRAM0 depth in vectors
    #[arg(long = "dram0-depth", default_value_t = 1 << 20)]
    dram0_depth: usize,

    /// DRAM1 depth in vectors
    #[arg(long = "dram1-depth", default_value_t = 1 << 20)]
    dram1_depth: usize,

    /// DRAM bus width in bits
    #[arg(long = "dram-bus-width", default_value_t = 128)]
    dram_bus_width: usize,

    /// Operations loads and stores may be hoisted over
    #[arg(long, default_value_t = DEFAULT_LOOKAHEAD)]
    lookahead: usize,

    /// Print the program listing
    #[arg(short, long)]
    listing: bool,
}

fn parse_data_type(name: &str) -> Result<DataType, String> {
    DataType::from_name(name).ok_or_else(|| format!("unknown data type '{name}'"))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();

    let arch = Architecture {
        data_type: cli.data_type,
        array_size: cli.array_size,
        local_depth: cli.local_depth,
        accumulator_depth: cli.accumulator_depth,
        dram0_depth: cli.dram0_depth,
        dram1_depth: cli.dram1_depth,
        dram_bus_width: cli.dram_bus_width,
    };
    let options = CompileOptions {
        scheduler: SchedulerConfig { lookahead: cli.lookahead },
    };

    let text = fs::read_to_string(&cli.graph)?;
    let graph = Graph::parse(&text)?;
    log::info!("parsed {} nodes from {}", graph.len(), cli.graph.display());

    let outputs: Vec<&str> = cli.outputs.iter().map(String::as_str).collect();
    let compiler = Compiler::new(arch, options)?;
    let program = compiler.compile(&GraphFrontend::new(&graph), &outputs)?;

    let prefix = cli.prefix.unwrap_or_else(|| cli.graph.with_extension(""));
    let program_path = prefix.with_extension("tprog");
    let header_path = prefix.with_extension("h");

    let mut out = BufWriter::new(fs::File::create(&program_path)?);
    program.write_program(&mut out)?;
    fs::write(&header_path, program.header())?;

    if cli.listing {
        print!("{}", program.listing());
    }
    println!("Wrote {} and {}", program_path.display(), header_path.display());
    print!("{}", program.summary());
    Ok(())
}
