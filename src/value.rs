//! Concolic values: a symbolic expression paired with a concrete shadow.
//!
//! Every operation on a [`ConcolicValue`] produces a new value whose
//! `concrete` field is computed directly (not by re-interpreting the
//! symbolic tree), so the invariant "concrete equals the symbolic
//! expression evaluated under the current assignment" holds by
//! construction rather than by a separate evaluation pass.

use std::collections::HashMap;
use std::rc::Rc;

use crate::expr::{self, ArithOp, CmpOp, Expr};

#[derive(Clone, Debug)]
pub struct ConcolicValue {
    pub width: u32,
    pub symbolic: Rc<Expr>,
    pub concrete: u64,
}

fn mask(width: u32, value: u64) -> u64 {
    if width >= 64 {
        value
    } else {
        value & ((1u64 << width) - 1)
    }
}

impl ConcolicValue {
    pub fn from_const(value: u64, width: u32) -> Self {
        let concrete = mask(width, value);
        ConcolicValue { width, symbolic: Rc::new(Expr::Const { value: concrete, width }), concrete }
    }

    pub fn from_symbol(name: impl Into<String>, width: u32, concrete_seed: u64) -> Self {
        let concrete = mask(width, concrete_seed);
        ConcolicValue {
            width,
            symbolic: Rc::new(Expr::Symbol { name: name.into(), width }),
            concrete,
        }
    }

    pub fn from_parts(symbolic: Rc<Expr>, concrete: u64) -> Self {
        let width = symbolic.width();
        ConcolicValue { width, symbolic, concrete: mask(width, concrete) }
    }

    /// The concrete shadow, as the spec's `evalValue<T>` operation.
    pub fn eval_value(&self) -> u64 {
        self.concrete
    }

    fn arith(&self, op: ArithOp, rhs: &Self) -> Self {
        debug_assert_eq!(self.width, rhs.width, "arithmetic on mismatched widths");
        let concrete = expr::eval_arith(op, self.concrete, rhs.concrete, self.width);
        let symbolic = Rc::new(Expr::Arith(op, self.symbolic.clone(), rhs.symbolic.clone(), self.width));
        ConcolicValue { width: self.width, symbolic, concrete }
    }

    fn cmp(&self, op: CmpOp, rhs: &Self) -> Self {
        debug_assert_eq!(self.width, rhs.width, "comparison on mismatched widths");
        let value = if expr::eval_cmp(op, self.concrete, rhs.concrete, self.width) { 1 } else { 0 };
        let symbolic = Rc::new(Expr::Cmp(op, self.symbolic.clone(), rhs.symbolic.clone()));
        ConcolicValue { width: 1, symbolic, concrete: value }
    }

    pub fn add(&self, rhs: &Self) -> Self {
        self.arith(ArithOp::Add, rhs)
    }
    pub fn sub(&self, rhs: &Self) -> Self {
        self.arith(ArithOp::Sub, rhs)
    }
    pub fn mul(&self, rhs: &Self) -> Self {
        self.arith(ArithOp::Mul, rhs)
    }
    pub fn udiv(&self, rhs: &Self) -> Self {
        self.arith(ArithOp::UDiv, rhs)
    }
    pub fn sdiv(&self, rhs: &Self) -> Self {
        self.arith(ArithOp::SDiv, rhs)
    }
    pub fn urem(&self, rhs: &Self) -> Self {
        self.arith(ArithOp::URem, rhs)
    }
    pub fn srem(&self, rhs: &Self) -> Self {
        self.arith(ArithOp::SRem, rhs)
    }
    pub fn bvand(&self, rhs: &Self) -> Self {
        self.arith(ArithOp::And, rhs)
    }
    pub fn bvor(&self, rhs: &Self) -> Self {
        self.arith(ArithOp::Or, rhs)
    }
    pub fn bvxor(&self, rhs: &Self) -> Self {
        self.arith(ArithOp::Xor, rhs)
    }
    pub fn shl(&self, rhs: &Self) -> Self {
        self.arith(ArithOp::Shl, rhs)
    }
    pub fn lshr(&self, rhs: &Self) -> Self {
        self.arith(ArithOp::Lshr, rhs)
    }
    pub fn ashr(&self, rhs: &Self) -> Self {
        self.arith(ArithOp::Ashr, rhs)
    }

    pub fn neg(&self) -> Self {
        let concrete = expr::eval_arith(ArithOp::Sub, 0, self.concrete, self.width);
        ConcolicValue {
            width: self.width,
            symbolic: Rc::new(Expr::Neg(self.symbolic.clone(), self.width)),
            concrete,
        }
    }

    pub fn bvnot(&self) -> Self {
        let concrete = mask(self.width, !self.concrete);
        ConcolicValue {
            width: self.width,
            symbolic: Rc::new(Expr::Not(self.symbolic.clone(), self.width)),
            concrete,
        }
    }

    pub fn ult(&self, rhs: &Self) -> Self {
        self.cmp(CmpOp::Ult, rhs)
    }
    pub fn slt(&self, rhs: &Self) -> Self {
        self.cmp(CmpOp::Slt, rhs)
    }
    pub fn ugt(&self, rhs: &Self) -> Self {
        self.cmp(CmpOp::Ugt, rhs)
    }
    pub fn sgt(&self, rhs: &Self) -> Self {
        self.cmp(CmpOp::Sgt, rhs)
    }
    pub fn equal(&self, rhs: &Self) -> Self {
        self.cmp(CmpOp::Eq, rhs)
    }
    pub fn not_equal(&self, rhs: &Self) -> Self {
        self.cmp(CmpOp::Ne, rhs)
    }

    pub fn lnot(&self) -> Self {
        debug_assert_eq!(self.width, 1, "lnot is only defined on width-1 predicates");
        let concrete = if self.concrete == 0 { 1 } else { 0 };
        ConcolicValue { width: 1, symbolic: Rc::new(Expr::BoolNot(self.symbolic.clone())), concrete }
    }

    /// Width-1 predicate asserting this value is true (nonzero / `1`).
    pub fn eq_true(&self) -> Self {
        let one = ConcolicValue::from_const(1, self.width);
        self.cmp(CmpOp::Eq, &one)
    }

    /// Width-1 predicate asserting this value is false (`0`).
    pub fn eq_false(&self) -> Self {
        let zero = ConcolicValue::from_const(0, self.width);
        self.cmp(CmpOp::Eq, &zero)
    }

    /// `len` bits starting at the low-indexed bit position `offset`.
    pub fn extract(&self, offset: u32, len: u32) -> Self {
        debug_assert!(offset + len <= self.width, "extract out of range");
        let concrete = mask(len, self.concrete >> offset);
        ConcolicValue {
            width: len,
            symbolic: Rc::new(Expr::Extract { operand: self.symbolic.clone(), offset, len }),
            concrete,
        }
    }

    /// `self` forms the low-order bits, `other` the high-order bits of
    /// the result (see DESIGN.md: this reading is forced by the §8
    /// extract/concat invariants, not by the one-line prose in §4.1).
    pub fn concat(&self, other: &Self) -> Self {
        let width = self.width + other.width;
        let concrete = mask(width, self.concrete | (other.concrete << self.width));
        ConcolicValue {
            width,
            symbolic: Rc::new(Expr::Concat { lo: self.symbolic.clone(), hi: other.symbolic.clone() }),
            concrete,
        }
    }

    pub fn zext(&self, new_width: u32) -> Self {
        debug_assert!(new_width >= self.width);
        let concrete = mask(new_width, self.concrete);
        ConcolicValue {
            width: new_width,
            symbolic: Rc::new(Expr::Zext { operand: self.symbolic.clone(), width: new_width }),
            concrete,
        }
    }

    pub fn sext(&self, new_width: u32) -> Self {
        debug_assert!(new_width >= self.width);
        let concrete = expr::sign_extend(self.concrete, self.width, new_width);
        ConcolicValue {
            width: new_width,
            symbolic: Rc::new(Expr::Sext { operand: self.symbolic.clone(), width: new_width }),
            concrete,
        }
    }

    pub fn is_concrete(&self) -> bool {
        self.symbolic.is_const()
    }
}

/// Combines `hi`/`lo` in the naming convention used by the §8 invariant
/// text: `hi` is the high-order operand, `lo` the low-order one.
pub fn concat_hi_lo(hi: &ConcolicValue, lo: &ConcolicValue) -> ConcolicValue {
    lo.concat(hi)
}

/// Evaluates a symbolic expression under an explicit name -> value
/// environment, independent of any value's own concrete shadow. Used by
/// tests and by the solver adapter to cross-check a model it extracted.
pub fn eval_symbol_env(expr: &Expr, env: &HashMap<String, u64>) -> u64 {
    match expr {
        Expr::Symbol { name, width } => mask(*width, *env.get(name).unwrap_or(&0)),
        Expr::Const { value, .. } => *value,
        Expr::Neg(op, w) => mask(*w, eval_symbol_env(op, env).wrapping_neg()),
        Expr::Not(op, w) => mask(*w, !eval_symbol_env(op, env)),
        Expr::Arith(op, lhs, rhs, w) => {
            expr::eval_arith(*op, eval_symbol_env(lhs, env), eval_symbol_env(rhs, env), *w)
        }
        Expr::Cmp(op, lhs, rhs) => {
            let w = lhs.width().max(1);
            if expr::eval_cmp(*op, eval_symbol_env(lhs, env), eval_symbol_env(rhs, env), w) {
                1
            } else {
                0
            }
        }
        Expr::BoolNot(op) => {
            if eval_symbol_env(op, env) == 0 {
                1
            } else {
                0
            }
        }
        Expr::Extract { operand, offset, len } => mask(*len, eval_symbol_env(operand, env) >> offset),
        Expr::Concat { lo, hi } => {
            let lo_v = eval_symbol_env(lo, env);
            let hi_v = eval_symbol_env(hi, env);
            mask(lo.width() + hi.width(), lo_v | (hi_v << lo.width()))
        }
        Expr::Zext { operand, width } => mask(*width, eval_symbol_env(operand, env)),
        Expr::Sext { operand, width } => {
            expr::sign_extend(eval_symbol_env(operand, env), operand.width(), *width)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn concat_then_extract_round_trips_the_low_part() {
        let hi = ConcolicValue::from_symbol("hi", 8, 0xab);
        let lo = ConcolicValue::from_symbol("lo", 8, 0xcd);
        let combined = lo.concat(&hi);
        assert_eq!(combined.width, 16);
        assert_eq!(combined.concrete, 0xabcd);
        let extracted_lo = combined.extract(0, 8);
        let extracted_hi = combined.extract(8, 8);
        assert_eq!(extracted_lo.concrete, 0xcd);
        assert_eq!(extracted_hi.concrete, 0xab);
    }

    #[test]
    fn sequential_extracts_compose_into_one_wider_extract() {
        let x = ConcolicValue::from_symbol("x", 32, 0xdead_beef);
        let a = 4;
        let w = 8;
        let w2 = 8;
        let y1 = x.extract(a, w);
        let y2 = x.extract(a + w, w2);
        let combined = y1.concat(&y2);
        let direct = x.extract(a, w + w2);
        assert_eq!(combined.concrete, direct.concrete);
    }

    #[test]
    fn eq_true_and_eq_false_are_exclusive() {
        let v = ConcolicValue::from_symbol("flag", 1, 1);
        assert_eq!(v.eq_true().concrete, 1);
        assert_eq!(v.eq_false().concrete, 0);
    }

    #[test]
    fn sext_preserves_negative_concrete_values() {
        let v = ConcolicValue::from_const(0xff, 8);
        let extended = v.sext(32);
        assert_eq!(extended.concrete, 0xffff_ffff);
    }

    #[test]
    fn eval_symbol_env_matches_concrete_shadow() {
        let a = ConcolicValue::from_symbol("a", 32, 10);
        let b = ConcolicValue::from_symbol("b", 32, 20);
        let sum = a.add(&b);
        let mut env = HashMap::new();
        env.insert("a".to_string(), 10);
        env.insert("b".to_string(), 20);
        assert_eq!(eval_symbol_env(&sum.symbolic, &env), sum.concrete);
    }
}
