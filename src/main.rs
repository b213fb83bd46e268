use anyhow::{Context, Result};
use clap::Parser;
use dwarf_memmap::{
    ArchTable, ArrayElements, BinaryData, Cli, Commands, CommonArgs, DwarfContext, JsonFormatter,
    MapOptions, MemoryMap, OutputFormat, TableFormatter, TypeAggregator, TypeTables, WalkOptions,
    collect_globals,
};
use globset::{GlobBuilder, GlobMatcher};
use tracing_subscriber::EnvFilter;

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn compile_filter(pattern: Option<&str>) -> Result<Option<GlobMatcher>> {
    pattern
        .map(|p| {
            GlobBuilder::new(p)
                .literal_separator(false)
                .build()
                .map(|glob| glob.compile_matcher())
                .with_context(|| format!("Invalid glob pattern: '{}'", p))
        })
        .transpose()
}

/// Everything both subcommands need once the binary has been analyzed.
struct Analysis {
    tables: TypeTables,
    arch: dwarf_memmap::ArchConfig,
    machine: dwarf_memmap::MachineInfo,
}

fn analyze(common: &CommonArgs) -> Result<Analysis> {
    let table = match &common.arch_config {
        Some(path) => ArchTable::load(path)
            .with_context(|| format!("Failed to load arch config: {}", path.display()))?,
        None => ArchTable::builtin(),
    };

    let binary = BinaryData::load(&common.binary)
        .with_context(|| format!("Failed to load binary: {}", common.binary.display()))?;
    let loaded = binary.load_dwarf().context("Failed to load DWARF debug info")?;

    let dwarf = DwarfContext::new(&loaded);
    let arch = dwarf.arch_config(&table);
    let options = WalkOptions {
        default_lower_bound: common.lower_bound,
        language_lower_bound: common.language_bounds,
    };
    let tables = dwarf.analyze(&arch, options).context("Failed to analyze debug info")?;

    Ok(Analysis { tables, arch, machine: dwarf.machine().clone() })
}

fn run_map(common: &CommonArgs, all_elements: bool, max_depth: usize) -> Result<()> {
    let filter = compile_filter(common.filter.as_deref())?;
    let analysis = analyze(common)?;

    let options = MapOptions {
        array_elements: if all_elements { ArrayElements::All } else { ArrayElements::First },
        filter,
        max_depth,
    };
    let mut aggregator = TypeAggregator::new(&analysis.tables, &analysis.arch);
    let map = MemoryMap::build(&analysis.tables, &mut aggregator, &options)
        .context("Failed to resolve variable types")?;

    if map.is_empty() {
        match &common.filter {
            Some(f) => eprintln!("No globals found matching filter: {}", f),
            None => eprintln!("No globals with a fixed address found in binary"),
        }
        return Ok(());
    }

    let output = match common.output {
        OutputFormat::Table => TableFormatter::new(common.no_color, analysis.arch.pointer_size)
            .format_map(&map, &analysis.machine.name),
        OutputFormat::Json => JsonFormatter::new(common.pretty).format_map(&map, &analysis.machine),
    };
    println!("{}", output);
    Ok(())
}

fn run_globals(common: &CommonArgs) -> Result<()> {
    let filter = compile_filter(common.filter.as_deref())?;
    let analysis = analyze(common)?;

    let mut aggregator = TypeAggregator::new(&analysis.tables, &analysis.arch);
    let globals = collect_globals(&analysis.tables, &mut aggregator, filter.as_ref())
        .context("Failed to resolve variable types")?;

    if globals.is_empty() {
        match &common.filter {
            Some(f) => eprintln!("No globals found matching filter: {}", f),
            None => eprintln!("No globals with a fixed address found in binary"),
        }
        return Ok(());
    }

    let output = match common.output {
        OutputFormat::Table => TableFormatter::new(common.no_color, analysis.arch.pointer_size)
            .format_globals(&globals, &analysis.machine.name),
        OutputFormat::Json => {
            JsonFormatter::new(common.pretty).format_globals(&globals, &analysis.machine)
        }
    };
    println!("{}", output);
    Ok(())
}

fn run_cli(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Map { common, all_elements, max_depth } => {
            run_map(&common, all_elements, max_depth)
        }
        Commands::Globals { common } => run_globals(&common),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    run_cli(cli)
}
