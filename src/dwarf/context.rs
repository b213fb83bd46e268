use crate::arch::{ArchConfig, ArchTable};
use crate::error::Result;
use crate::loader::{LoadedDwarf, MachineInfo};

use super::source::{DieSource, GimliSource};
use super::tables::TypeTables;
use super::walker::{DieWalker, WalkOptions};

/// Entry point for analyzing one loaded object file.
pub struct DwarfContext<'a> {
    loaded: &'a LoadedDwarf<'a>,
}

impl<'a> DwarfContext<'a> {
    pub fn new(loaded: &'a LoadedDwarf<'a>) -> Self {
        Self { loaded }
    }

    pub fn machine(&self) -> &MachineInfo {
        &self.loaded.machine
    }

    /// Architecture configuration for this object from `table`.
    pub fn arch_config(&self, table: &ArchTable) -> ArchConfig {
        table.config_for(&self.loaded.machine)
    }

    /// Runs the walk over every unit of the object and returns the filled tables.
    pub fn analyze(&self, arch: &ArchConfig, options: WalkOptions) -> Result<TypeTables> {
        let source = GimliSource::new(self.loaded)?;
        analyze_source(&source, arch, options)
    }
}

/// Walks any [`DieSource`], e.g. an in-memory tree built by another front end.
pub fn analyze_source<S: DieSource>(
    source: &S,
    arch: &ArchConfig,
    options: WalkOptions,
) -> Result<TypeTables> {
    DieWalker::new(source, arch, options).run()
}
