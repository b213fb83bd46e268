pub mod arch;
pub mod cli;
pub mod dwarf;
pub mod error;
pub mod loader;
pub mod memmap;
pub mod output;
pub mod types;

pub use arch::{ArchConfig, ArchTable, MachineEntry};
pub use cli::{Cli, Commands, CommonArgs, OutputFormat};
pub use dwarf::{
    DieSource, DieWalker, DwarfContext, MemorySource, TypeAggregator, TypeTables, UnitSection,
    WalkOptions, analyze_source,
};
pub use error::{Error, Result};
pub use loader::{BinaryData, LoadedDwarf, MachineInfo};
pub use memmap::{ArrayElements, GlobalEntry, MapOptions, MemoryMap, collect_globals};
pub use output::{JsonFormatter, TableFormatter};
pub use types::{
    CompileUnitInfo, MapRow, MergedType, SourceLocation, TypeFragment, TypeTag, UnitHeader,
    Variable,
};
