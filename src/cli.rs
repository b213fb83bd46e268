use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "dwarf-memmap")]
#[command(
    author,
    version,
    about = "Build address-ordered memory maps of global variables from DWARF debug info"
)]
#[command(
    long_about = "dwarf-memmap reads the DWARF debugging information of an object file, \
resolves the type of every global variable with a fixed address, and prints where each \
variable and each of its fields lives in memory.\n\n\
Example:\n  dwarf-memmap map ./firmware.elf --filter 'uart*'"
)]
pub struct Cli {
    /// Increase diagnostic output (-v debug, -vv trace). RUST_LOG overrides it.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by every subcommand.
#[derive(Args, Clone)]
pub struct CommonArgs {
    /// Path to the binary file to analyze
    #[arg(value_name = "BINARY")]
    pub binary: PathBuf,

    /// Only show variables whose name matches this glob
    #[arg(short, long)]
    pub filter: Option<String>,

    /// Output format (table, json)
    #[arg(short, long, value_enum, default_value = "table")]
    pub output: OutputFormat,

    /// Pretty-print JSON output
    #[arg(long)]
    pub pretty: bool,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,

    /// YAML file with machine pointer sizes and address-class tables
    #[arg(long, value_name = "FILE")]
    pub arch_config: Option<PathBuf>,

    /// Lower bound assumed for array dimensions that only state an upper bound
    #[arg(long, value_name = "N")]
    pub lower_bound: Option<u64>,

    /// Use each compile unit's language default lower bound (0 for C, 1 for Fortran)
    #[arg(long)]
    pub language_bounds: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print every global and its fields in address order
    Map {
        #[command(flatten)]
        common: CommonArgs,

        /// Expand every array element instead of only the first
        #[arg(long)]
        all_elements: bool,

        /// Maximum nesting depth expanded below each global
        #[arg(long, default_value = "16")]
        max_depth: usize,
    },

    /// List global variables with their resolved types
    Globals {
        #[command(flatten)]
        common: CommonArgs,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_arguments() {
        let cli = Cli::parse_from([
            "dwarf-memmap",
            "-vv",
            "map",
            "fw.elf",
            "--filter",
            "uart*",
            "--all-elements",
            "--max-depth",
            "3",
            "-o",
            "json",
            "--language-bounds",
        ]);
        assert_eq!(cli.verbose, 2);
        let Commands::Map { common, all_elements, max_depth } = cli.command else {
            panic!("expected map");
        };
        assert_eq!(common.binary, PathBuf::from("fw.elf"));
        assert_eq!(common.filter.as_deref(), Some("uart*"));
        assert!(common.output == OutputFormat::Json);
        assert!(common.language_bounds);
        assert!(all_elements);
        assert_eq!(max_depth, 3);
    }

    #[test]
    fn globals_defaults() {
        let cli = Cli::parse_from(["dwarf-memmap", "globals", "a.out", "--lower-bound", "0"]);
        let Commands::Globals { common } = cli.command else {
            panic!("expected globals");
        };
        assert!(common.output == OutputFormat::Table);
        assert_eq!(common.lower_bound, Some(0));
        assert!(!common.language_bounds);
        assert!(common.arch_config.is_none());
        assert_eq!(cli.verbose, 0);
    }
}
