//! An in-memory record tree.
//!
//! Useful for analyzing debug information produced by something other than an
//! object file, and for building fixtures without a compiler.

use gimli::{DwAt, DwForm, DwTag};

use super::source::{
    DieSource, RawAttribute, RawValue, TYPES_SECTION_BIT, UnitEntry, UnitSection,
};
use crate::error::{Error, Result};
use crate::types::UnitHeader;

/// Size of a DWARF 4 32-bit unit header; the first record follows it.
const UNIT_HEADER_SIZE: u64 = 11;
const RECORD_STRIDE: u64 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryDie(usize);

#[derive(Debug)]
struct Node {
    unit: usize,
    offset: u64,
    tag: DwTag,
    attributes: Vec<RawAttribute>,
    children: Vec<usize>,
    broken: bool,
}

#[derive(Debug)]
struct MemoryUnit {
    section: UnitSection,
    header: UnitHeader,
    base_offset: u64,
    root: usize,
    next_offset: u64,
}

#[derive(Debug, Default)]
pub struct MemorySource {
    nodes: Vec<Node>,
    units: Vec<MemoryUnit>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a compile unit whose header sits at `unit_offset` within its section.
    pub fn add_unit(
        &mut self,
        section: UnitSection,
        unit_offset: u64,
        address_size: u8,
    ) -> MemoryDie {
        let base_offset = match section {
            UnitSection::Info => unit_offset,
            UnitSection::Types => unit_offset | TYPES_SECTION_BIT,
        };
        let unit = self.units.len();
        let root = self.nodes.len();
        self.nodes.push(Node {
            unit,
            offset: base_offset + UNIT_HEADER_SIZE,
            tag: gimli::DW_TAG_compile_unit,
            attributes: Vec::new(),
            children: Vec::new(),
            broken: false,
        });
        self.units.push(MemoryUnit {
            section,
            header: UnitHeader {
                version: 4,
                unit_offset: base_offset,
                unit_length: 0,
                abbrev_offset: 0,
                address_size,
            },
            base_offset,
            root,
            next_offset: UNIT_HEADER_SIZE + RECORD_STRIDE,
        });
        MemoryDie(root)
    }

    /// Appends a child record; offsets are assigned in creation order.
    pub fn add_child(&mut self, parent: MemoryDie, tag: DwTag) -> MemoryDie {
        let unit_index = self.nodes[parent.0].unit;
        let unit = &mut self.units[unit_index];
        let offset = unit.base_offset + unit.next_offset;
        unit.next_offset += RECORD_STRIDE;

        let index = self.nodes.len();
        self.nodes.push(Node {
            unit: unit_index,
            offset,
            tag,
            attributes: Vec::new(),
            children: Vec::new(),
            broken: false,
        });
        self.nodes[parent.0].children.push(index);
        MemoryDie(index)
    }

    pub fn add_attribute(&mut self, die: MemoryDie, name: DwAt, form: DwForm, value: RawValue) {
        self.nodes[die.0].attributes.push(RawAttribute::new(name, form, value));
    }

    pub fn add_name(&mut self, die: MemoryDie, name: &str) {
        self.add_attribute(
            die,
            gimli::DW_AT_name,
            gimli::DW_FORM_string,
            RawValue::String(name.to_string()),
        );
    }

    pub fn add_udata(&mut self, die: MemoryDie, name: DwAt, value: u64) {
        self.add_attribute(die, name, gimli::DW_FORM_udata, RawValue::Unsigned(value));
    }

    pub fn add_flag(&mut self, die: MemoryDie, name: DwAt) {
        self.add_attribute(die, name, gimli::DW_FORM_flag_present, RawValue::Flag(true));
    }

    pub fn add_exprloc(&mut self, die: MemoryDie, name: DwAt, program: &[u8]) {
        self.add_attribute(die, name, gimli::DW_FORM_exprloc, RawValue::Expr(program.to_vec()));
    }

    /// `DW_AT_type` pointing at `target`.
    pub fn add_type_ref(&mut self, die: MemoryDie, target: MemoryDie) {
        self.add_reference(die, gimli::DW_AT_type, target);
    }

    /// A reference attribute pointing at `target`, encoded unit-relative when
    /// both records share a unit and section-relative otherwise. Section
    /// references keep the `.debug_types` tag of their target.
    pub fn add_reference(&mut self, die: MemoryDie, name: DwAt, target: MemoryDie) {
        let from = &self.nodes[die.0];
        let to = &self.nodes[target.0];
        let (form, value) = if from.unit == to.unit {
            let base = self.units[from.unit].base_offset;
            (gimli::DW_FORM_ref4, RawValue::UnitRef(to.offset - base))
        } else {
            (gimli::DW_FORM_ref_addr, RawValue::GlobalRef(to.offset))
        };
        self.add_attribute(die, name, form, value);
    }

    /// Makes child enumeration of `die` fail, as a corrupt tree would.
    pub fn break_children(&mut self, die: MemoryDie) {
        self.nodes[die.0].broken = true;
    }

    pub fn die_offset(&self, die: MemoryDie) -> u64 {
        self.nodes[die.0].offset
    }
}

impl DieSource for MemorySource {
    type Die = MemoryDie;

    fn units(&self, section: UnitSection) -> Result<Vec<UnitEntry<MemoryDie>>> {
        Ok(self
            .units
            .iter()
            .filter(|u| u.section == section)
            .map(|u| UnitEntry {
                section: u.section,
                header: u.header.clone(),
                base_offset: u.base_offset,
                root: MemoryDie(u.root),
            })
            .collect())
    }

    fn tag(&self, die: MemoryDie) -> Result<DwTag> {
        Ok(self.nodes[die.0].tag)
    }

    fn children(&self, die: MemoryDie) -> Result<Vec<MemoryDie>> {
        let node = &self.nodes[die.0];
        if node.broken {
            return Err(Error::Dwarf(format!(
                "Failed to iterate children of record at {:#x}",
                node.offset
            )));
        }
        Ok(node.children.iter().map(|&i| MemoryDie(i)).collect())
    }

    fn attributes(&self, die: MemoryDie) -> Result<Vec<RawAttribute>> {
        Ok(self.nodes[die.0].attributes.clone())
    }

    fn offset(&self, die: MemoryDie) -> u64 {
        self.nodes[die.0].offset
    }
}
