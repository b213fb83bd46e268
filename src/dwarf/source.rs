use gimli::{AttributeValue, DwAt, DwForm, DwTag, Dwarf, Unit, UnitOffset};

use crate::error::{Error, Result};
use crate::loader::{DwarfSlice, LoadedDwarf};
use crate::types::UnitHeader;

/// Set on every offset that belongs to `.debug_types`, keeping those offsets
/// apart from `.debug_info` offsets in the shared tables.
pub const TYPES_SECTION_BIT: u64 = 1 << 63;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitSection {
    Info,
    Types,
}

/// Payload of one attribute after the reader has decoded its form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawValue {
    Unsigned(u64),
    Signed(i64),
    Address(u64),
    Flag(bool),
    String(String),
    Block(Vec<u8>),
    Expr(Vec<u8>),
    /// Offset relative to the start of the owning unit.
    UnitRef(u64),
    /// Offset relative to the start of the section.
    GlobalRef(u64),
    SecOffset(u64),
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAttribute {
    pub name: DwAt,
    pub form: DwForm,
    pub value: RawValue,
}

impl RawAttribute {
    pub fn new(name: DwAt, form: DwForm, value: RawValue) -> Self {
        Self { name, form, value }
    }
}

/// A compilation unit as handed out by a [`DieSource`].
#[derive(Debug, Clone)]
pub struct UnitEntry<D> {
    pub section: UnitSection,
    pub header: UnitHeader,
    pub base_offset: u64,
    pub root: D,
}

/// The record reader the walker runs against.
///
/// Errors from `children` or `attributes` are fatal for the unit being walked.
pub trait DieSource {
    type Die: Copy + std::fmt::Debug;

    fn units(&self, section: UnitSection) -> Result<Vec<UnitEntry<Self::Die>>>;

    fn tag(&self, die: Self::Die) -> Result<DwTag>;

    fn children(&self, die: Self::Die) -> Result<Vec<Self::Die>>;

    fn attributes(&self, die: Self::Die) -> Result<Vec<RawAttribute>>;

    /// Global offset of the record, unique across both sections.
    fn offset(&self, die: Self::Die) -> u64;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GimliDie {
    unit: usize,
    offset: UnitOffset,
}

struct ParsedUnit<'d> {
    section: UnitSection,
    base_offset: u64,
    unit: Unit<DwarfSlice<'d>>,
}

/// [`DieSource`] backed by `gimli` over a loaded object file.
pub struct GimliSource<'d> {
    dwarf: Dwarf<DwarfSlice<'d>>,
    units: Vec<ParsedUnit<'d>>,
}

impl<'d> GimliSource<'d> {
    pub fn new(loaded: &'d LoadedDwarf<'_>) -> Result<Self> {
        let dwarf = loaded.dwarf();
        let mut units = Vec::new();

        let mut headers = dwarf.units();
        while let Some(header) =
            headers.next().map_err(|e| Error::Dwarf(format!("Failed to read unit header: {}", e)))?
        {
            let base_offset =
                header.offset().as_debug_info_offset().map(|o| o.0 as u64).unwrap_or_default();
            let unit = dwarf
                .unit(header)
                .map_err(|e| Error::Dwarf(format!("Failed to parse unit: {}", e)))?;
            units.push(ParsedUnit { section: UnitSection::Info, base_offset, unit });
        }

        let mut headers = dwarf.type_units();
        while let Some(header) = headers
            .next()
            .map_err(|e| Error::Dwarf(format!("Failed to read type unit header: {}", e)))?
        {
            let base_offset = header
                .offset()
                .as_debug_types_offset()
                .map(|o| o.0 as u64 | TYPES_SECTION_BIT)
                .unwrap_or(TYPES_SECTION_BIT);
            let unit = dwarf
                .unit(header)
                .map_err(|e| Error::Dwarf(format!("Failed to parse type unit: {}", e)))?;
            units.push(ParsedUnit { section: UnitSection::Types, base_offset, unit });
        }

        Ok(Self { dwarf, units })
    }

    fn parsed(&self, die: GimliDie) -> &ParsedUnit<'d> {
        &self.units[die.unit]
    }

    fn convert(
        &self,
        unit: &Unit<DwarfSlice<'d>>,
        value: AttributeValue<DwarfSlice<'d>>,
    ) -> Result<RawValue> {
        let raw = match value {
            AttributeValue::Addr(addr) => RawValue::Address(addr),
            AttributeValue::DebugAddrIndex(_) => {
                match self
                    .dwarf
                    .attr_address(unit, value)
                    .map_err(|e| Error::Dwarf(format!("Failed to read indexed address: {}", e)))?
                {
                    Some(addr) => RawValue::Address(addr),
                    None => RawValue::Unsupported,
                }
            }
            AttributeValue::Block(block) => RawValue::Block(block.slice().to_vec()),
            AttributeValue::Exprloc(expr) => RawValue::Expr(expr.0.slice().to_vec()),
            AttributeValue::Data1(v) => RawValue::Unsigned(u64::from(v)),
            AttributeValue::Data2(v) => RawValue::Unsigned(u64::from(v)),
            AttributeValue::Data4(v) => RawValue::Unsigned(u64::from(v)),
            AttributeValue::Data8(v) => RawValue::Unsigned(v),
            AttributeValue::Udata(v) => RawValue::Unsigned(v),
            AttributeValue::Sdata(v) => RawValue::Signed(v),
            AttributeValue::Flag(f) => RawValue::Flag(f),
            AttributeValue::SecOffset(o) => RawValue::SecOffset(o as u64),
            AttributeValue::UnitRef(o) => RawValue::UnitRef(o.0 as u64),
            AttributeValue::DebugInfoRef(o) => RawValue::GlobalRef(o.0 as u64),
            AttributeValue::String(_)
            | AttributeValue::DebugStrRef(_)
            | AttributeValue::DebugStrOffsetsIndex(_)
            | AttributeValue::DebugLineStrRef(_) => {
                let s = self
                    .dwarf
                    .attr_string(unit, value)
                    .map_err(|e| Error::Dwarf(format!("Failed to read string: {}", e)))?;
                RawValue::String(s.to_string_lossy().into_owned())
            }
            _ => RawValue::Unsupported,
        };
        Ok(raw)
    }
}

impl<'d> DieSource for GimliSource<'d> {
    type Die = GimliDie;

    fn units(&self, section: UnitSection) -> Result<Vec<UnitEntry<GimliDie>>> {
        let mut out = Vec::new();
        for (index, parsed) in self.units.iter().enumerate() {
            if parsed.section != section {
                continue;
            }

            let header = &parsed.unit.header;
            let mut tree = parsed
                .unit
                .entries_tree(None)
                .map_err(|e| Error::Dwarf(format!("Failed to create entries tree: {}", e)))?;
            let root =
                tree.root().map_err(|e| Error::Dwarf(format!("Failed to get tree root: {}", e)))?;

            out.push(UnitEntry {
                section,
                header: UnitHeader {
                    version: header.version(),
                    unit_offset: parsed.base_offset,
                    unit_length: header.unit_length() as u64,
                    abbrev_offset: header.debug_abbrev_offset().0 as u64,
                    address_size: header.address_size(),
                },
                base_offset: parsed.base_offset,
                root: GimliDie { unit: index, offset: root.entry().offset() },
            });
        }
        Ok(out)
    }

    fn tag(&self, die: GimliDie) -> Result<DwTag> {
        let entry = self
            .parsed(die)
            .unit
            .entry(die.offset)
            .map_err(|e| Error::Dwarf(format!("Failed to get entry: {}", e)))?;
        Ok(entry.tag())
    }

    fn children(&self, die: GimliDie) -> Result<Vec<GimliDie>> {
        let unit = &self.parsed(die).unit;
        let mut tree = unit
            .entries_tree(Some(die.offset))
            .map_err(|e| Error::Dwarf(format!("Failed to create entries tree: {}", e)))?;
        let root =
            tree.root().map_err(|e| Error::Dwarf(format!("Failed to get tree root: {}", e)))?;

        let mut out = Vec::new();
        let mut children = root.children();
        while let Some(child) = children
            .next()
            .map_err(|e| Error::Dwarf(format!("Failed to iterate children: {}", e)))?
        {
            out.push(GimliDie { unit: die.unit, offset: child.entry().offset() });
        }
        Ok(out)
    }

    fn attributes(&self, die: GimliDie) -> Result<Vec<RawAttribute>> {
        let unit = &self.parsed(die).unit;
        let entry = unit
            .entry(die.offset)
            .map_err(|e| Error::Dwarf(format!("Failed to get entry: {}", e)))?;

        // The abbreviation still knows the encoded form, which the block
        // decoding needs to tell length-prefixed constants from expressions.
        let Some(abbrev) = unit.abbreviations.get(entry.code()) else {
            return Ok(Vec::new());
        };

        let mut out = Vec::with_capacity(abbrev.attributes().len());
        for spec in abbrev.attributes() {
            let value = entry
                .attr_value_raw(spec.name())
                .map_err(|e| Error::Dwarf(format!("Failed to read attribute: {}", e)))?;
            if let Some(value) = value {
                out.push(RawAttribute::new(spec.name(), spec.form(), self.convert(unit, value)?));
            }
        }
        Ok(out)
    }

    fn offset(&self, die: GimliDie) -> u64 {
        self.parsed(die).base_offset + die.offset.0 as u64
    }
}
