use gimli::DwAt;

use super::form::{
    FormContext, is_block_form, resolve, resolve_flag, resolve_reference, resolve_seeded,
    resolve_string,
};
use super::source::{RawAttribute, RawValue};
use crate::types::{CompileUnitInfo, TypeFragment, Variable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKind {
    Variable,
    Type,
    Unit,
}

/// The structure a record's attributes are decoded into.
pub enum Target<'a> {
    Variable(&'a mut Variable),
    Type(&'a mut TypeFragment),
    Unit(&'a mut CompileUnitInfo),
}

impl Target<'_> {
    pub fn kind(&self) -> TargetKind {
        match self {
            Target::Variable(_) => TargetKind::Variable,
            Target::Type(_) => TargetKind::Type,
            Target::Unit(_) => TargetKind::Unit,
        }
    }
}

use TargetKind::{Type as T, Unit as U, Variable as V};

/// Which target kinds accept which attributes. Anything not listed is ignored.
const APPLICABILITY: &[(DwAt, &[TargetKind])] = &[
    (gimli::DW_AT_name, &[V, T, U]),
    (gimli::DW_AT_type, &[V, T]),
    (gimli::DW_AT_decl_file, &[V, T]),
    (gimli::DW_AT_decl_line, &[V, T]),
    (gimli::DW_AT_declaration, &[V, T]),
    (gimli::DW_AT_const_value, &[V, T]),
    (gimli::DW_AT_external, &[V]),
    (gimli::DW_AT_location, &[V]),
    (gimli::DW_AT_specification, &[V]),
    (gimli::DW_AT_abstract_origin, &[V]),
    (gimli::DW_AT_byte_size, &[T]),
    (gimli::DW_AT_bit_offset, &[T]),
    (gimli::DW_AT_data_bit_offset, &[T]),
    (gimli::DW_AT_bit_size, &[T]),
    (gimli::DW_AT_data_member_location, &[T]),
    (gimli::DW_AT_encoding, &[T]),
    (gimli::DW_AT_count, &[T]),
    (gimli::DW_AT_upper_bound, &[T]),
    (gimli::DW_AT_lower_bound, &[T]),
    (gimli::DW_AT_address_class, &[T]),
    (gimli::DW_AT_low_pc, &[U]),
    (gimli::DW_AT_high_pc, &[U]),
    (gimli::DW_AT_producer, &[U]),
    (gimli::DW_AT_language, &[U]),
    (gimli::DW_AT_comp_dir, &[U]),
];

pub fn is_applicable(name: DwAt, kind: TargetKind) -> bool {
    APPLICABILITY.iter().any(|(at, kinds)| *at == name && kinds.contains(&kind))
}

/// Writes every applicable attribute into `target`; the rest are skipped.
pub fn decode_attributes(attrs: &[RawAttribute], target: &mut Target<'_>, cx: &FormContext) {
    let kind = target.kind();
    for attr in attrs {
        if !is_applicable(attr.name, kind) {
            tracing::trace!(attr = %attr.name, ?kind, "attribute not applicable");
            continue;
        }
        match target {
            Target::Variable(var) => set_variable_attr(var, attr, cx),
            Target::Type(fragment) => set_type_attr(fragment, attr, cx),
            Target::Unit(info) => set_unit_attr(info, attr, cx),
        }
    }
}

fn set_variable_attr(var: &mut Variable, attr: &RawAttribute, cx: &FormContext) {
    match attr.name {
        gimli::DW_AT_name => var.name = resolve_string(attr).unwrap_or_default().to_string(),
        gimli::DW_AT_type => var.type_ref = resolve_reference(attr, cx),
        gimli::DW_AT_decl_file => var.decl.file = resolve(attr, cx),
        gimli::DW_AT_decl_line => var.decl.line = resolve(attr, cx).unwrap_or(0),
        gimli::DW_AT_declaration => var.declaration = resolve_flag(attr).unwrap_or(false),
        gimli::DW_AT_external => var.external = resolve_flag(attr).unwrap_or(false),
        gimli::DW_AT_const_value => var.const_value = resolve(attr, cx),
        // Data and section-offset forms here are location lists, not addresses.
        gimli::DW_AT_location if is_block_form(attr.form) => var.location = resolve(attr, cx),
        gimli::DW_AT_specification | gimli::DW_AT_abstract_origin => {
            var.specification = var.specification.or(resolve_reference(attr, cx))
        }
        _ => {}
    }
}

fn set_type_attr(fragment: &mut TypeFragment, attr: &RawAttribute, cx: &FormContext) {
    match attr.name {
        gimli::DW_AT_name => fragment.name = resolve_string(attr).map(str::to_string),
        gimli::DW_AT_type => fragment.type_ref = resolve_reference(attr, cx),
        gimli::DW_AT_decl_file => fragment.decl.file = resolve(attr, cx),
        gimli::DW_AT_decl_line => fragment.decl.line = resolve(attr, cx).unwrap_or(0),
        gimli::DW_AT_declaration => fragment.declaration = resolve_flag(attr).unwrap_or(false),
        gimli::DW_AT_const_value => {
            fragment.const_value = match attr.value {
                RawValue::Signed(v) => Some(v),
                _ => resolve(attr, cx).map(|v| v as i64),
            }
        }
        gimli::DW_AT_byte_size => fragment.byte_size = resolve(attr, cx).unwrap_or(0),
        gimli::DW_AT_bit_offset => fragment.bit_offset = resolve(attr, cx).unwrap_or(0),
        gimli::DW_AT_data_bit_offset => fragment.data_bit_offset = resolve(attr, cx),
        gimli::DW_AT_bit_size => fragment.bit_size = resolve(attr, cx).unwrap_or(0),
        gimli::DW_AT_data_member_location => {
            fragment.data_member_location = resolve_seeded(attr, cx, Some(0))
        }
        gimli::DW_AT_encoding => fragment.encoding = resolve(attr, cx).unwrap_or(0),
        gimli::DW_AT_count => fragment.count = resolve(attr, cx),
        gimli::DW_AT_upper_bound => fragment.upper_bound = resolve(attr, cx),
        gimli::DW_AT_lower_bound => fragment.lower_bound = resolve(attr, cx),
        gimli::DW_AT_address_class => fragment.address_class = resolve(attr, cx),
        _ => {}
    }
}

fn set_unit_attr(info: &mut CompileUnitInfo, attr: &RawAttribute, cx: &FormContext) {
    match attr.name {
        gimli::DW_AT_name => info.name = resolve_string(attr).map(str::to_string),
        gimli::DW_AT_producer => info.producer = resolve_string(attr).map(str::to_string),
        gimli::DW_AT_comp_dir => info.comp_dir = resolve_string(attr).map(str::to_string),
        gimli::DW_AT_language => info.language = resolve(attr, cx),
        gimli::DW_AT_low_pc => info.low_pc = resolve(attr, cx),
        gimli::DW_AT_high_pc => {
            info.high_pc_raw = resolve(attr, cx);
            info.high_pc_is_length = !matches!(attr.value, RawValue::Address(_));
        }
        _ => {}
    }
}
