use std::rc::Rc;

use globset::GlobMatcher;
use serde::Serialize;

use crate::dwarf::{TypeAggregator, TypeTables};
use crate::error::Result;
use crate::types::{MapRow, MergedType, TypeFragment, Variable};

pub const DEFAULT_MAX_DEPTH: usize = 16;

/// How many elements of an array get their own rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ArrayElements {
    /// Only element `[0]`.
    #[default]
    First,
    /// Every element of arrays with a known count.
    All,
}

#[derive(Debug, Clone)]
pub struct MapOptions {
    pub array_elements: ArrayElements,
    /// Only globals whose name matches are mapped.
    pub filter: Option<GlobMatcher>,
    /// Nesting levels expanded below each global.
    pub max_depth: usize,
}

impl Default for MapOptions {
    fn default() -> Self {
        Self { array_elements: ArrayElements::First, filter: None, max_depth: DEFAULT_MAX_DEPTH }
    }
}

impl MapOptions {
    fn selects(&self, var: &Variable) -> bool {
        self.filter.as_ref().is_none_or(|glob| glob.is_match(&var.name))
    }
}

/// Address-ordered rows for every promoted global and the fields inside it.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MemoryMap {
    rows: Vec<MapRow>,
}

impl MemoryMap {
    pub fn build(
        tables: &TypeTables,
        aggregator: &mut TypeAggregator<'_>,
        options: &MapOptions,
    ) -> Result<Self> {
        let mut builder = RowBuilder { tables, aggregator, options, rows: Vec::new() };

        for var in tables.globals().iter().filter(|v| options.selects(v)) {
            let (Some(address), Some(type_ref)) = (var.location, var.type_ref) else {
                continue;
            };
            let ty = builder.aggregator.resolve(type_ref)?;
            builder.emit(address, &ty, var.name.clone(), 0, None)?;
        }

        let mut rows = builder.rows;
        rows.sort_by_key(|row| row.address);
        tracing::debug!(rows = rows.len(), "memory map built");
        Ok(Self { rows })
    }

    pub fn rows(&self) -> &[MapRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Bit position of a bit-field inside its first byte, and its width.
type BitField = (u64, u64);

struct RowBuilder<'a, 't> {
    tables: &'a TypeTables,
    aggregator: &'a mut TypeAggregator<'t>,
    options: &'a MapOptions,
    rows: Vec<MapRow>,
}

impl RowBuilder<'_, '_> {
    fn emit(
        &mut self,
        address: u64,
        ty: &MergedType,
        path: String,
        depth: usize,
        bits: Option<BitField>,
    ) -> Result<()> {
        self.rows.push(MapRow {
            address,
            type_name: ty.display_name(),
            byte_size: ty.total_size(),
            path: path.clone(),
            bit_offset: bits.map(|(offset, _)| offset),
            bit_size: bits.map(|(_, size)| size),
        });

        // Pointed-to data and code are not part of this object.
        if ty.is_pointer() || ty.is_function() || depth >= self.options.max_depth {
            return Ok(());
        }

        if ty.is_array() {
            if let Some(element) = &ty.sub_info {
                self.emit_elements(address, ty.count, element, &path, depth)?;
            }
        } else if ty.is_aggregate() {
            for &member in &ty.children {
                self.emit_member(address, member, &path, depth)?;
            }
        }
        Ok(())
    }

    fn emit_elements(
        &mut self,
        address: u64,
        count: u64,
        element: &Rc<MergedType>,
        path: &str,
        depth: usize,
    ) -> Result<()> {
        let shown = match self.options.array_elements {
            ArrayElements::First => count.min(1),
            ArrayElements::All => count,
        };
        for index in 0..shown {
            let Some(element_address) =
                index.checked_mul(element.byte_size).and_then(|off| address.checked_add(off))
            else {
                break;
            };
            self.emit(element_address, element, format!("{}[{}]", path, index), depth + 1, None)?;
        }
        Ok(())
    }

    fn emit_member(&mut self, base: u64, member: u64, path: &str, depth: usize) -> Result<()> {
        let tables = self.tables;
        let Some(fragment) = tables.fragment(member) else {
            return Ok(());
        };
        let ty = self.aggregator.resolve(member)?;
        let (offset, bits) = member_offset(fragment);

        // Anonymous members (unnamed unions, base classes) flatten into the parent path.
        let path = match fragment.name.as_deref() {
            Some(name) if !name.is_empty() => format!("{}.{}", path, name),
            _ => path.to_string(),
        };
        self.emit(base.wrapping_add(offset), &ty, path, depth + 1, bits)
    }
}

/// Byte offset of a member within its parent, plus bit-field placement.
fn member_offset(fragment: &TypeFragment) -> (u64, Option<BitField>) {
    if let Some(data_bit_offset) = fragment.data_bit_offset {
        let bits = (fragment.bit_size != 0).then_some((data_bit_offset % 8, fragment.bit_size));
        return (data_bit_offset / 8, bits);
    }
    let location = fragment.data_member_location.unwrap_or(0);
    if fragment.bit_size != 0 {
        let offset = location + fragment.bit_offset / 8;
        return (offset, Some((fragment.bit_offset % 8, fragment.bit_size)));
    }
    (location, None)
}

/// One promoted global with its resolved top-level type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GlobalEntry {
    pub name: String,
    pub address: u64,
    pub type_name: String,
    /// `None` when the variable is an array of unknown length.
    pub byte_size: Option<u64>,
    pub external: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decl_file: Option<u64>,
    pub decl_line: u64,
}

/// Promoted globals sorted by address, without member expansion.
pub fn collect_globals(
    tables: &TypeTables,
    aggregator: &mut TypeAggregator<'_>,
    filter: Option<&GlobMatcher>,
) -> Result<Vec<GlobalEntry>> {
    let mut entries = Vec::new();
    for var in tables.globals() {
        if filter.is_some_and(|glob| !glob.is_match(&var.name)) {
            continue;
        }
        let (Some(address), Some(type_ref)) = (var.location, var.type_ref) else {
            continue;
        };
        let ty = aggregator.resolve(type_ref)?;
        entries.push(GlobalEntry {
            name: var.name.clone(),
            address,
            type_name: ty.display_name(),
            byte_size: ty.total_size(),
            external: var.external,
            decl_file: var.decl.file,
            decl_line: var.decl.line,
        });
    }
    entries.sort_by_key(|e| e.address);
    Ok(entries)
}
