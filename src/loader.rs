use crate::error::{Error, Result};
use gimli::{Dwarf, DwarfSections, EndianSlice, RunTimeEndian, SectionId};
use memmap2::Mmap;
use object::{Object, ObjectSection};
use serde::Serialize;
use std::borrow::Cow;
use std::fs::File;
use std::path::Path;

pub struct BinaryData {
    pub mmap: Mmap,
}

pub type DwarfSlice<'a> = EndianSlice<'a, RunTimeEndian>;

/// Machine facts read from the object header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MachineInfo {
    /// Lower-case architecture name, e.g. `x86_64` or `msp430`.
    pub name: String,
    pub pointer_size: u8,
    pub big_endian: bool,
}

/// Debug sections of one object file, decompressed where needed.
pub struct LoadedDwarf<'a> {
    sections: DwarfSections<Cow<'a, [u8]>>,
    pub endian: RunTimeEndian,
    pub machine: MachineInfo,
}

impl<'a> LoadedDwarf<'a> {
    /// A `gimli` view borrowing the loaded sections.
    pub fn dwarf(&self) -> Dwarf<DwarfSlice<'_>> {
        self.sections.borrow(|section| EndianSlice::new(section, self.endian))
    }
}

impl BinaryData {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        // SAFETY: The file is opened read-only and we keep the mmap alive
        // for the lifetime of BinaryData.
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self { mmap })
    }

    pub fn load_dwarf(&self) -> Result<LoadedDwarf<'_>> {
        let object = object::File::parse(&*self.mmap)?;

        if !matches!(
            object.format(),
            object::BinaryFormat::Elf | object::BinaryFormat::MachO | object::BinaryFormat::Pe
        ) {
            return Err(Error::UnsupportedFormat);
        }

        let endian =
            if object.is_little_endian() { RunTimeEndian::Little } else { RunTimeEndian::Big };

        let architecture = object.architecture();
        let pointer_size = architecture
            .address_size()
            .map(|size| size.bytes())
            .unwrap_or(if object.is_64() { 8 } else { 4 });
        let machine = MachineInfo {
            name: format!("{:?}", architecture).to_lowercase(),
            pointer_size,
            big_endian: endian == RunTimeEndian::Big,
        };

        let load_section = |id: SectionId| -> Result<Cow<'_, [u8]>> {
            let zdebug_name = id.name().replace(".debug_", ".zdebug_");
            let section = object
                .section_by_name(id.name())
                .or_else(|| object.section_by_name(&zdebug_name));
            match section {
                Some(section) => Ok(section.uncompressed_data()?),
                None => Ok(Cow::Borrowed(&[][..])),
            }
        };

        let sections = DwarfSections::load(load_section)?;

        {
            let dwarf = sections.borrow(|section| EndianSlice::new(section, endian));
            let has_info = dwarf
                .units()
                .next()
                .map_err(|e| Error::Dwarf(e.to_string()))?
                .is_some();
            let has_types = dwarf
                .type_units()
                .next()
                .map_err(|e| Error::Dwarf(e.to_string()))?
                .is_some();
            if !has_info && !has_types {
                return Err(Error::NoDebugInfo);
            }
        }

        tracing::debug!(machine = %machine.name, pointer_size, "loaded debug sections");

        Ok(LoadedDwarf { sections, endian, machine })
    }
}
