use gimli::DwOp;
use thiserror::Error;

use super::varint::{decode_signed, decode_unsigned};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExprError {
    #[error("empty expression")]
    Empty,

    #[error("opcode {opcode:#04x} is not implemented")]
    Unimplemented { opcode: u8 },

    #[error("stack underflow at opcode {opcode:#04x}")]
    StackUnderflow { opcode: u8 },

    #[error("truncated operand for opcode {opcode:#04x}")]
    Truncated { opcode: u8 },
}

/// A small stack machine for DWARF location and constant expressions.
///
/// Only the operations needed to recover static addresses and constants are
/// supported. `DW_OP_addr` takes every byte left in the program as its
/// little-endian operand, regardless of the unit's address size.
#[derive(Debug, Default)]
pub struct Evaluator {
    stack: Vec<u64>,
}

impl Evaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, value: u64) {
        self.stack.push(value);
    }

    /// Pops the top of the stack. An empty stack yields `None`.
    pub fn pop(&mut self) -> Option<u64> {
        self.stack.pop()
    }

    pub fn top(&self) -> Option<u64> {
        self.stack.last().copied()
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn evaluate(&mut self, program: &[u8]) -> Result<(), ExprError> {
        if program.is_empty() {
            return Err(ExprError::Empty);
        }

        let mut pc = 0;
        while pc < program.len() {
            let opcode = program[pc];
            pc += 1;
            let rest = &program[pc..];

            if (gimli::DW_OP_lit0.0..=gimli::DW_OP_lit31.0).contains(&opcode) {
                self.push(u64::from(opcode - gimli::DW_OP_lit0.0));
                continue;
            }

            match DwOp(opcode) {
                gimli::DW_OP_addr => {
                    if rest.is_empty() {
                        return Err(ExprError::Truncated { opcode });
                    }
                    self.push(read_le(rest));
                    pc = program.len();
                }
                gimli::DW_OP_plus_uconst => {
                    let base = self.pop().ok_or(ExprError::StackUnderflow { opcode })?;
                    let (addend, used) = decode_unsigned(rest);
                    if used == 0 {
                        return Err(ExprError::Truncated { opcode });
                    }
                    self.push(base.wrapping_add(addend));
                    pc += used;
                }
                gimli::DW_OP_constu => {
                    let (value, used) = decode_unsigned(rest);
                    if used == 0 {
                        return Err(ExprError::Truncated { opcode });
                    }
                    self.push(value);
                    pc += used;
                }
                gimli::DW_OP_consts => {
                    let (value, used) = decode_signed(rest);
                    if used == 0 {
                        return Err(ExprError::Truncated { opcode });
                    }
                    self.push(value as u64);
                    pc += used;
                }
                gimli::DW_OP_const1u
                | gimli::DW_OP_const2u
                | gimli::DW_OP_const4u
                | gimli::DW_OP_const8u => {
                    let width = match DwOp(opcode) {
                        gimli::DW_OP_const1u => 1,
                        gimli::DW_OP_const2u => 2,
                        gimli::DW_OP_const4u => 4,
                        _ => 8,
                    };
                    let operand = rest.get(..width).ok_or(ExprError::Truncated { opcode })?;
                    self.push(read_le(operand));
                    pc += width;
                }
                gimli::DW_OP_dup => {
                    let value = self.top().ok_or(ExprError::StackUnderflow { opcode })?;
                    self.push(value);
                }
                gimli::DW_OP_drop => {
                    self.pop().ok_or(ExprError::StackUnderflow { opcode })?;
                }
                gimli::DW_OP_plus | gimli::DW_OP_minus => {
                    let rhs = self.pop().ok_or(ExprError::StackUnderflow { opcode })?;
                    let lhs = self.pop().ok_or(ExprError::StackUnderflow { opcode })?;
                    let value = if DwOp(opcode) == gimli::DW_OP_plus {
                        lhs.wrapping_add(rhs)
                    } else {
                        lhs.wrapping_sub(rhs)
                    };
                    self.push(value);
                }
                // The value on the stack is the result, not its address.
                gimli::DW_OP_stack_value => {}
                _ => return Err(ExprError::Unimplemented { opcode }),
            }
        }

        Ok(())
    }
}

/// Evaluates `program` on a fresh stack and returns its top-of-stack result.
pub fn evaluate_top(program: &[u8]) -> Option<u64> {
    evaluate_seeded(program, None)
}

/// Like [`evaluate_top`], with `seed` pushed before the program runs.
/// Failures are logged and yield `None`.
pub fn evaluate_seeded(program: &[u8], seed: Option<u64>) -> Option<u64> {
    let mut eval = Evaluator::new();
    if let Some(seed) = seed {
        eval.push(seed);
    }
    match eval.evaluate(program) {
        Ok(()) => eval.pop(),
        Err(e) => {
            tracing::debug!(error = %e, "expression not evaluated");
            None
        }
    }
}

/// Little-endian concatenation of up to eight bytes.
pub(crate) fn read_le(bytes: &[u8]) -> u64 {
    bytes.iter().take(8).rev().fold(0u64, |acc, &b| (acc << 8) | u64::from(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIT5: u8 = gimli::DW_OP_lit5.0;
    const ADDR: u8 = gimli::DW_OP_addr.0;
    const PLUS_UCONST: u8 = gimli::DW_OP_plus_uconst.0;

    #[test]
    fn literal_push_then_pop() {
        let mut eval = Evaluator::new();
        eval.evaluate(&[LIT5]).expect("lit5 evaluates");
        assert_eq!(eval.pop(), Some(5));
        assert_eq!(eval.pop(), None);
    }

    #[test]
    fn address_is_little_endian() {
        let mut eval = Evaluator::new();
        eval.evaluate(&[ADDR, 0x04, 0x03, 0x02, 0x01]).expect("addr evaluates");
        assert_eq!(eval.pop(), Some(0x0102_0304));
    }

    #[test]
    fn plus_uconst_adds_leb_operand() {
        let mut eval = Evaluator::new();
        eval.evaluate(&[gimli::DW_OP_lit3.0, PLUS_UCONST, 0x85, 0x01]).expect("evaluates");
        assert_eq!(eval.pop(), Some(136));
    }

    #[test]
    fn plus_uconst_needs_a_value() {
        let mut eval = Evaluator::new();
        let err = eval.evaluate(&[PLUS_UCONST, 0x04]).unwrap_err();
        assert_eq!(err, ExprError::StackUnderflow { opcode: PLUS_UCONST });
    }

    #[test]
    fn empty_program_fails() {
        let mut eval = Evaluator::new();
        assert_eq!(eval.evaluate(&[]), Err(ExprError::Empty));
        assert_eq!(evaluate_top(&[]), None);
    }

    #[test]
    fn unknown_opcode_fails() {
        // DW_OP_fbreg -8
        let program = [gimli::DW_OP_fbreg.0, 0x78];
        let mut eval = Evaluator::new();
        assert_eq!(
            eval.evaluate(&program),
            Err(ExprError::Unimplemented { opcode: gimli::DW_OP_fbreg.0 })
        );
        assert_eq!(evaluate_top(&program), None);
    }

    #[test]
    fn address_followed_by_stack_value() {
        // The address operand swallows the rest of the program.
        assert_eq!(evaluate_top(&[ADDR, 0x10, 0x20]), Some(0x2010));
    }

    #[test]
    fn fixed_width_constants() {
        assert_eq!(evaluate_top(&[gimli::DW_OP_const2u.0, 0x34, 0x12]), Some(0x1234));
        assert_eq!(evaluate_top(&[gimli::DW_OP_const1u.0]), None);
    }

    #[test]
    fn signed_constant() {
        // DW_OP_consts -2, then add 10
        let program = [gimli::DW_OP_consts.0, 0x7e, gimli::DW_OP_lit10.0, gimli::DW_OP_plus.0];
        assert_eq!(evaluate_top(&program), Some(8));
    }

    #[test]
    fn seeded_evaluation() {
        assert_eq!(evaluate_seeded(&[PLUS_UCONST, 0x08], Some(0x100)), Some(0x108));
        assert_eq!(evaluate_seeded(&[PLUS_UCONST, 0x08], None), None);
    }

    #[test]
    fn arithmetic() {
        let program =
            [gimli::DW_OP_lit7.0, gimli::DW_OP_lit2.0, gimli::DW_OP_minus.0, gimli::DW_OP_dup.0];
        let mut eval = Evaluator::new();
        eval.evaluate(&program).expect("evaluates");
        assert_eq!(eval.depth(), 2);
        assert_eq!(eval.pop(), Some(5));
    }
}
