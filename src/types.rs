use std::rc::Rc;

use bitflags::bitflags;
use serde::Serialize;

bitflags! {
    /// Category bits of a type fragment. Bits compose: a pointer to a
    /// function resolves to `FUNC | POINTER`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
    pub struct TypeTag: u32 {
        const BASE = 1 << 0;
        const ARRAY = 1 << 1;
        const STRUCT = 1 << 2;
        const UNION = 1 << 3;
        const FUNC = 1 << 4;
        const PARAMETER = 1 << 5;
        const TYPEDEF = 1 << 6;
        const CONST = 1 << 7;
        const VOLATILE = 1 << 8;
        const POINTER = 1 << 9;
        const RESTRICT = 1 << 10;
        const ENUM = 1 << 11;
        const REFERENCE = 1 << 12;
        const MEMBER = 1 << 13;
        const ENUMERATOR = 1 << 14;
    }
}

impl Default for TypeTag {
    fn default() -> Self {
        Self::empty()
    }
}

impl TypeTag {
    pub const FUNCTION_POINTER: Self = Self::FUNC.union(Self::POINTER);
}

/// Declaration coordinates. A missing file index is filled with 1 (the
/// primary source file) once the record has been decoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SourceLocation {
    pub file: Option<u64>,
    pub line: u64,
}

/// Type data exactly as attached to one debug record.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TypeFragment {
    pub offset: u64,
    pub tag: TypeTag,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub byte_size: u64,
    pub bit_offset: u64,
    pub bit_size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_bit_offset: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_member_location: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    pub encoding: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upper_bound: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lower_bound: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address_class: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub const_value: Option<i64>,
    /// Offset of the fragment this one refers to through `DW_AT_type`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_ref: Option<u64>,
    /// Members, parameters or enumerators, in record order.
    pub children: Vec<u64>,
    pub decl: SourceLocation,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub declaration: bool,
}

impl TypeFragment {
    pub fn new(offset: u64, tag: TypeTag) -> Self {
        Self { offset, tag, ..Self::default() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Variable {
    pub offset: u64,
    pub name: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub external: bool,
    pub decl: SourceLocation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_ref: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub const_value: Option<u64>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub declaration: bool,
    /// Declaration this record completes (`DW_AT_specification` or
    /// `DW_AT_abstract_origin`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub specification: Option<u64>,
}

impl Variable {
    /// Only variables with an address, a type and a name are globals.
    pub fn is_global(&self) -> bool {
        self.location.is_some() && self.type_ref.is_some() && !self.name.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UnitHeader {
    pub version: u16,
    pub unit_offset: u64,
    pub unit_length: u64,
    pub abbrev_offset: u64,
    pub address_size: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompileUnitInfo {
    pub header: UnitHeader,
    /// Added to unit-relative references to make them global.
    pub base_offset: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub producer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comp_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub low_pc: Option<u64>,
    #[serde(skip)]
    pub(crate) high_pc_raw: Option<u64>,
    #[serde(skip)]
    pub(crate) high_pc_is_length: bool,
}

impl CompileUnitInfo {
    pub fn new(header: UnitHeader, base_offset: u64) -> Self {
        Self { header, base_offset, ..Self::default() }
    }

    /// End of the unit's code range. DWARF 4+ may encode it as a length from `low_pc`.
    pub fn high_pc(&self) -> Option<u64> {
        let raw = self.high_pc_raw?;
        if self.high_pc_is_length {
            self.low_pc.map(|low| low.saturating_add(raw))
        } else {
            Some(raw)
        }
    }
}

/// Fully resolved view of a type produced by merging a chain of fragments.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MergedType {
    pub offset: u64,
    pub tag: TypeTag,
    pub name: String,
    /// No record in the chain had a name; `name` holds the `void` placeholder.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub anonymous: bool,
    pub byte_size: u64,
    pub bit_offset: u64,
    pub bit_size: u64,
    pub encoding: u64,
    pub pointer_depth: u32,
    /// Pointer levels applied on top of an array; the array then describes
    /// the pointee and `count` is not part of this object's size.
    #[serde(skip_serializing_if = "is_zero")]
    pub array_pointer_depth: u32,
    pub count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address_class: Option<u64>,
    pub is_const: bool,
    pub is_restrict: bool,
    pub is_volatile: bool,
    /// Offsets of member/parameter fragments, not copies.
    pub children: Vec<u64>,
    /// Element type of an array descriptor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_info: Option<Rc<MergedType>>,
}

impl MergedType {
    pub fn empty(offset: u64) -> Self {
        Self { offset, ..Self::default() }
    }

    /// The outermost layer is an array.
    pub fn is_array(&self) -> bool {
        self.tag.contains(TypeTag::ARRAY) && self.array_pointer_depth == 0
    }

    /// The outermost layer is a pointer; arrays of pointers are arrays.
    pub fn is_pointer(&self) -> bool {
        (self.pointer_depth > 0 || self.tag.contains(TypeTag::POINTER)) && !self.is_array()
    }

    pub fn is_function(&self) -> bool {
        self.tag.contains(TypeTag::FUNC)
    }

    pub fn is_aggregate(&self) -> bool {
        self.tag.intersects(TypeTag::STRUCT | TypeTag::UNION)
    }

    /// Size of the whole object. An array whose element count was never
    /// resolved has no known size.
    pub fn total_size(&self) -> Option<u64> {
        if !self.is_array() {
            return Some(self.byte_size);
        }
        (self.count > 0).then(|| self.byte_size.saturating_mul(self.count))
    }

    /// C-like spelling such as `const volatile uint8_t *`, `int *[4]` or `int (*)[4]`.
    pub fn display_name(&self) -> String {
        let mut out = String::new();
        if self.is_const {
            out.push_str("const ");
        }
        if self.is_volatile {
            out.push_str("volatile ");
        }
        // Typedef names already spell the whole type.
        if !self.tag.contains(TypeTag::TYPEDEF) {
            if self.tag.contains(TypeTag::STRUCT) {
                out.push_str("struct ");
            } else if self.tag.contains(TypeTag::UNION) {
                out.push_str("union ");
            } else if self.tag.contains(TypeTag::ENUM) {
                out.push_str("enum ");
            }
        }
        if self.anonymous && self.is_aggregate() {
            out.push_str("<anonymous>");
        } else {
            out.push_str(&self.name);
        }
        if self.is_function() {
            out.push_str("()");
        }

        let outer = self.array_pointer_depth.min(self.pointer_depth);
        let inner = self.pointer_depth - outer;
        if inner > 0 {
            out.push(' ');
            out.extend(std::iter::repeat_n('*', inner as usize));
        }
        if outer > 0 {
            out.push_str(if inner > 0 { "(" } else { " (" });
            out.extend(std::iter::repeat_n('*', outer as usize));
            if self.is_restrict {
                out.push_str(" restrict");
            }
            out.push(')');
        } else if self.is_restrict {
            out.push_str(" restrict");
        }
        if self.is_array() || outer > 0 {
            out.push_str(&self.dimension());
        }
        out
    }

    fn dimension(&self) -> String {
        if self.count > 0 { format!("[{}]", self.count) } else { "[]".to_string() }
    }
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}

/// One line of an address-ordered memory map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MapRow {
    pub address: u64,
    pub type_name: String,
    /// `None` for arrays whose element count is unknown.
    pub byte_size: Option<u64>,
    /// Dotted field path such as `config.ports[0].mode`.
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bit_offset: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bit_size: Option<u64>,
}

impl MapRow {
    /// First address past the row, when its size is known.
    pub fn end_address(&self) -> Option<u64> {
        self.byte_size.map(|size| self.address.saturating_add(size))
    }
}
