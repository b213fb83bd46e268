use gimli::DwForm;

use super::expr::{evaluate_seeded, read_le};
use super::source::{RawAttribute, RawValue};

/// Per-unit state needed to normalize attribute values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FormContext {
    /// Added to unit-relative references.
    pub unit_base: u64,
}

impl FormContext {
    pub fn new(unit_base: u64) -> Self {
        Self { unit_base }
    }
}

/// Normalizes an attribute to an unsigned value or a global offset.
///
/// Returns `None` for forms that carry no usable number; callers treat the
/// attribute as absent.
pub fn resolve(attr: &RawAttribute, cx: &FormContext) -> Option<u64> {
    resolve_seeded(attr, cx, None)
}

/// Like [`resolve`], but expressions start with `seed` on the stack. Member
/// locations written as `DW_OP_plus_uconst N` expect the base address there.
pub fn resolve_seeded(attr: &RawAttribute, cx: &FormContext, seed: Option<u64>) -> Option<u64> {
    let value = match attr.form {
        gimli::DW_FORM_data1
        | gimli::DW_FORM_data2
        | gimli::DW_FORM_data4
        | gimli::DW_FORM_data8
        | gimli::DW_FORM_udata => unsigned(&attr.value),

        gimli::DW_FORM_sdata | gimli::DW_FORM_implicit_const => match attr.value {
            RawValue::Signed(v) if v >= 0 => Some(v as u64),
            RawValue::Unsigned(v) => Some(v),
            _ => None,
        },

        gimli::DW_FORM_addr
        | gimli::DW_FORM_addrx
        | gimli::DW_FORM_addrx1
        | gimli::DW_FORM_addrx2
        | gimli::DW_FORM_addrx3
        | gimli::DW_FORM_addrx4 => match attr.value {
            RawValue::Address(a) => Some(a),
            _ => None,
        },

        gimli::DW_FORM_ref1
        | gimli::DW_FORM_ref2
        | gimli::DW_FORM_ref4
        | gimli::DW_FORM_ref8
        | gimli::DW_FORM_ref_udata
        | gimli::DW_FORM_ref_addr
        | gimli::DW_FORM_sec_offset => reference(&attr.value, cx),

        gimli::DW_FORM_block1 | gimli::DW_FORM_block2 | gimli::DW_FORM_block4 => {
            match &attr.value {
                RawValue::Block(bytes) => block(bytes, prefix_width(attr.form), seed),
                _ => None,
            }
        }

        gimli::DW_FORM_block | gimli::DW_FORM_exprloc => match &attr.value {
            RawValue::Block(bytes) | RawValue::Expr(bytes) => evaluate_seeded(bytes, seed),
            _ => None,
        },

        _ => None,
    };

    if value.is_none() {
        tracing::trace!(attr = %attr.name, form = %attr.form, "form yields no value");
    }
    value
}

/// Resolves a reference attribute to a global offset.
pub fn resolve_reference(attr: &RawAttribute, cx: &FormContext) -> Option<u64> {
    match attr.form {
        gimli::DW_FORM_ref1
        | gimli::DW_FORM_ref2
        | gimli::DW_FORM_ref4
        | gimli::DW_FORM_ref8
        | gimli::DW_FORM_ref_udata
        | gimli::DW_FORM_ref_addr
        | gimli::DW_FORM_sec_offset => reference(&attr.value, cx),
        _ => None,
    }
}

pub fn resolve_string(attr: &RawAttribute) -> Option<&str> {
    match &attr.value {
        RawValue::String(s) => Some(s.as_str()),
        _ => None,
    }
}

pub fn resolve_flag(attr: &RawAttribute) -> Option<bool> {
    match attr.form {
        gimli::DW_FORM_flag_present => Some(true),
        _ => match attr.value {
            RawValue::Flag(f) => Some(f),
            RawValue::Unsigned(v) => Some(v != 0),
            _ => None,
        },
    }
}

/// True for forms whose payload is a block or an expression.
pub fn is_block_form(form: DwForm) -> bool {
    matches!(
        form,
        gimli::DW_FORM_block
            | gimli::DW_FORM_block1
            | gimli::DW_FORM_block2
            | gimli::DW_FORM_block4
            | gimli::DW_FORM_exprloc
    )
}

fn unsigned(value: &RawValue) -> Option<u64> {
    match *value {
        RawValue::Unsigned(v) => Some(v),
        RawValue::Signed(v) if v >= 0 => Some(v as u64),
        _ => None,
    }
}

fn reference(value: &RawValue, cx: &FormContext) -> Option<u64> {
    match *value {
        RawValue::UnitRef(rel) => Some(cx.unit_base.wrapping_add(rel)),
        RawValue::GlobalRef(off) | RawValue::SecOffset(off) | RawValue::Unsigned(off) => Some(off),
        _ => None,
    }
}

fn prefix_width(form: DwForm) -> usize {
    match form {
        gimli::DW_FORM_block1 => 1,
        gimli::DW_FORM_block2 => 2,
        _ => 4,
    }
}

/// A block is either a constant prefixed with its own byte length, or an
/// expression. It is a constant exactly when the prefix accounts for every
/// remaining byte.
fn block(bytes: &[u8], prefix: usize, seed: Option<u64>) -> Option<u64> {
    if let Some(head) = bytes.get(..prefix) {
        let declared = read_le(head);
        if bytes.len() as u64 == prefix as u64 + declared {
            return Some(read_le(&bytes[prefix..]));
        }
    }
    evaluate_seeded(bytes, seed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attr(form: DwForm, value: RawValue) -> RawAttribute {
        RawAttribute::new(gimli::DW_AT_byte_size, form, value)
    }

    #[test]
    fn data_forms_read_directly() {
        let cx = FormContext::default();
        assert_eq!(resolve(&attr(gimli::DW_FORM_data1, RawValue::Unsigned(4)), &cx), Some(4));
        assert_eq!(resolve(&attr(gimli::DW_FORM_udata, RawValue::Unsigned(300)), &cx), Some(300));
        assert_eq!(resolve(&attr(gimli::DW_FORM_sdata, RawValue::Signed(-1)), &cx), None);
    }

    #[test]
    fn unit_references_become_global() {
        let cx = FormContext::new(0x1000);
        let a = RawAttribute::new(gimli::DW_AT_type, gimli::DW_FORM_ref4, RawValue::UnitRef(0x2a));
        assert_eq!(resolve_reference(&a, &cx), Some(0x102a));
        assert_eq!(resolve(&a, &cx), Some(0x102a));

        let g = RawAttribute::new(
            gimli::DW_AT_type,
            gimli::DW_FORM_ref_addr,
            RawValue::GlobalRef(0x2a),
        );
        assert_eq!(resolve_reference(&g, &cx), Some(0x2a));
    }

    #[test]
    fn section_offsets_stay_global() {
        let cx = FormContext::new(0x1000);
        let a = attr(gimli::DW_FORM_sec_offset, RawValue::SecOffset(0x80));
        assert_eq!(resolve(&a, &cx), Some(0x80));
    }

    #[test]
    fn length_prefixed_block_is_a_constant() {
        let cx = FormContext::default();
        // One-byte prefix declaring two bytes of payload.
        let a = attr(gimli::DW_FORM_block1, RawValue::Block(vec![0x02, 0x34, 0x12]));
        assert_eq!(resolve(&a, &cx), Some(0x1234));

        let a = attr(gimli::DW_FORM_block2, RawValue::Block(vec![0x01, 0x00, 0x7f]));
        assert_eq!(resolve(&a, &cx), Some(0x7f));
    }

    #[test]
    fn other_blocks_are_expressions() {
        let cx = FormContext::default();
        let a = attr(
            gimli::DW_FORM_block1,
            RawValue::Block(vec![gimli::DW_OP_addr.0, 0x00, 0x10, 0x00, 0x20]),
        );
        assert_eq!(resolve(&a, &cx), Some(0x2000_1000));
    }

    #[test]
    fn exprloc_goes_through_the_evaluator() {
        let cx = FormContext::default();
        let a = attr(gimli::DW_FORM_exprloc, RawValue::Expr(vec![gimli::DW_OP_lit5.0]));
        assert_eq!(resolve(&a, &cx), Some(5));

        let fbreg = attr(gimli::DW_FORM_exprloc, RawValue::Expr(vec![gimli::DW_OP_fbreg.0, 0x70]));
        assert_eq!(resolve(&fbreg, &cx), None);
    }

    #[test]
    fn seeded_member_offset() {
        let cx = FormContext::default();
        let a = attr(
            gimli::DW_FORM_block1,
            RawValue::Block(vec![gimli::DW_OP_plus_uconst.0, 0x08]),
        );
        assert_eq!(resolve(&a, &cx), None);
        assert_eq!(resolve_seeded(&a, &cx, Some(0)), Some(8));
    }

    #[test]
    fn unsupported_forms_have_no_value() {
        let cx = FormContext::default();
        let a = attr(gimli::DW_FORM_strp, RawValue::String("x".into()));
        assert_eq!(resolve(&a, &cx), None);
        assert_eq!(resolve_string(&a), Some("x"));
    }

    #[test]
    fn flags() {
        let present = attr(gimli::DW_FORM_flag_present, RawValue::Flag(true));
        assert_eq!(resolve_flag(&present), Some(true));
        let off = attr(gimli::DW_FORM_flag, RawValue::Flag(false));
        assert_eq!(resolve_flag(&off), Some(false));
    }
}
