//! SMT solver adapter.
//!
//! Owns the process-lifetime `z3::Context`, translates [`Expr`] trees
//! into z3 terms and turns satisfying models back into
//! [`crate::store::Assignment`]s. The translation follows the match-on-op
//! style of the teacher's `generate_z3_bv` in `evm/concolic/concolic_host.rs`
//! (itself mirrored, for the same BV-translation idea applied to a
//! different expression enum, in `libafl`'s `stages/concolic.rs`
//! `generate_mutations`).

use std::collections::HashMap;
use std::rc::Rc;

use rand::Rng;
use tracing::debug;
use z3::ast::{Ast, Bool, Dynamic, BV};
use z3::{Config, Context, SatResult, Solver as Z3Solver};

use crate::error::{Error, Result};
use crate::expr::{fold_constants, ArithOp, CmpOp, Expr};
use crate::value::ConcolicValue;

/// A request to the solver: a conjunction of path constraints plus the
/// expression being asked about (the negated branch condition, or a
/// `from_string` assume-clause).
#[derive(Clone, Debug)]
pub struct Query {
    pub constraints: Vec<ConcolicValue>,
    pub expr: ConcolicValue,
}

/// A satisfying assignment: symbol name -> concrete bytes, little-endian.
pub type Assignment = HashMap<String, Vec<u8>>;

/// Accumulates path constraints for the run currently being explored and
/// applies the minimum required constant-folding simplification to a
/// target expression.
#[derive(Default)]
pub struct ConstraintManager {
    constraints: Vec<Rc<Expr>>,
}

impl ConstraintManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, constraint: Rc<Expr>) {
        self.constraints.push(constraint);
    }

    pub fn simplify(&self, target: &Rc<Expr>) -> Rc<Expr> {
        fold_constants(target)
    }

    pub fn constraints(&self) -> &[Rc<Expr>] {
        &self.constraints
    }

    pub fn clear(&mut self) {
        self.constraints.clear();
    }
}

/// Declares the widths of named symbols so free-form constraint text
/// (from a test-case's constraint field) can be parsed back into an
/// [`Expr`] without re-deriving widths from context.
#[derive(Default, Clone)]
pub struct SymbolEnv {
    widths: HashMap<String, u32>,
}

impl SymbolEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&mut self, name: impl Into<String>, width: u32) {
        self.widths.insert(name.into(), width);
    }

    fn width_of(&self, name: &str) -> Option<u32> {
        self.widths.get(name).copied()
    }
}

pub struct Solver {
    ctx: Context,
}

impl Default for Solver {
    fn default() -> Self {
        Self::new()
    }
}

impl Solver {
    pub fn new() -> Self {
        let cfg = Config::new();
        Solver { ctx: Context::new(&cfg) }
    }

    /// Wraps `concrete` bytes as a concolic value. With `name` set, the
    /// result carries a fresh symbolic unknown seeded by `concrete`; with
    /// `name` unset it is a plain literal (no symbolic unknown at all),
    /// matching `iss.solver.BVC(std::nullopt, byte)` in the original
    /// memory interface for bytes that never became symbolic.
    pub fn bvc(&self, name: Option<&str>, concrete: &[u8]) -> ConcolicValue {
        let width = (concrete.len() as u32) * 8;
        let value = bytes_to_u64(concrete);
        match name {
            Some(name) => ConcolicValue::from_symbol(name.to_string(), width, value),
            None => ConcolicValue::from_const(value, width),
        }
    }

    /// `n` freshly named symbolic bytes, concatenated low-byte first and
    /// seeded from `seed` (falling back to zero past its end).
    pub fn get_symbolic_bytes(&self, name: &str, n: usize, seed: &[u8]) -> ConcolicValue {
        let mut acc: Option<ConcolicValue> = None;
        for i in 0..n {
            let byte = *seed.get(i).unwrap_or(&0);
            let sym = ConcolicValue::from_symbol(format!("{name}[{i}]"), 8, byte as u64);
            acc = Some(match acc {
                None => sym,
                Some(prev) => prev.concat(&sym),
            });
        }
        acc.unwrap_or_else(|| ConcolicValue::from_const(0, 0))
    }

    /// Parses a small infix constraint language into an [`Expr`], as used
    /// to decode a test case's free-form constraint field. Grammar:
    /// `expr := term (('==' | '!=' | '<' | '>' | 's<' | 's>') term)?`,
    /// `term := NUMBER | IDENT | '(' expr ')'`. Declared symbol widths
    /// come from `env`.
    pub fn from_string(&self, env: &SymbolEnv, text: &str) -> Result<ConcolicValue> {
        let mut parser = ConstraintParser { tokens: tokenize(text), pos: 0, env };
        let value = parser.parse_expr()?;
        if parser.pos != parser.tokens.len() {
            return Err(Error::TestCase(format!("trailing tokens in constraint: {text:?}")));
        }
        Ok(value)
    }

    fn translate(&self, expr: &Expr, cache: &mut HashMap<*const Expr, Dynamic<'_>>) -> Dynamic<'_> {
        translate_expr(&self.ctx, expr, cache)
    }

    /// Attempts to satisfy `query.expr` together with `query.constraints`.
    /// Returns `None` on UNSAT or UNKNOWN (an unsatisfiable negation is
    /// not itself an error, see driver.rs).
    pub fn get_assignment(&self, query: &Query) -> Result<Option<Assignment>> {
        let z3_solver = Z3Solver::new(&self.ctx);
        let mut cache: HashMap<*const Expr, Dynamic<'_>> = HashMap::new();
        let mut symbols: HashMap<String, u32> = HashMap::new();
        for c in query.constraints.iter().chain(std::iter::once(&query.expr)) {
            collect_symbol_widths(&c.symbolic, &mut symbols);
            let term = self.translate(&c.symbolic, &mut cache);
            let as_bool = dynamic_as_bool(&self.ctx, &term);
            z3_solver.assert(&as_bool);
        }
        debug!(constraints = query.constraints.len(), "dispatching query to solver");
        match z3_solver.check() {
            SatResult::Sat => {
                let model = z3_solver
                    .get_model()
                    .ok_or_else(|| Error::Solver("sat but no model available".into()))?;
                Ok(Some(extract_assignment(&self.ctx, &model, &symbols)))
            }
            SatResult::Unsat => Ok(None),
            SatResult::Unknown => {
                Err(Error::Solver(z3_solver.get_reason_unknown().unwrap_or_else(|| "unknown".into())))
            }
        }
    }
}

fn bytes_to_u64(bytes: &[u8]) -> u64 {
    let mut acc = 0u64;
    for (i, b) in bytes.iter().take(8).enumerate() {
        acc |= (*b as u64) << (8 * i);
    }
    acc
}

fn collect_symbol_widths(expr: &Expr, out: &mut HashMap<String, u32>) {
    match expr {
        Expr::Symbol { name, width } => {
            out.insert(name.clone(), *width);
        }
        Expr::Const { .. } => {}
        Expr::Neg(op, _) | Expr::Not(op, _) | Expr::BoolNot(op) => collect_symbol_widths(op, out),
        Expr::Arith(_, lhs, rhs, _) | Expr::Cmp(_, lhs, rhs) => {
            collect_symbol_widths(lhs, out);
            collect_symbol_widths(rhs, out);
        }
        Expr::Extract { operand, .. } | Expr::Zext { operand, .. } | Expr::Sext { operand, .. } => {
            collect_symbol_widths(operand, out);
        }
        Expr::Concat { lo, hi } => {
            collect_symbol_widths(lo, out);
            collect_symbol_widths(hi, out);
        }
    }
}

fn dynamic_as_bool<'a>(ctx: &'a Context, term: &Dynamic<'a>) -> Bool<'a> {
    if let Some(b) = term.as_bool() {
        b
    } else if let Some(bv) = term.as_bv() {
        bv._eq(&BV::from_u64(ctx, 1, bv.get_size()))
    } else {
        panic!("translated term is neither a bool nor a bit-vector")
    }
}

fn translate_expr<'a>(
    ctx: &'a Context,
    expr: &Expr,
    cache: &mut HashMap<*const Expr, Dynamic<'a>>,
) -> Dynamic<'a> {
    let key = expr as *const Expr;
    if let Some(cached) = cache.get(&key) {
        return cached.clone();
    }
    let result = match expr {
        Expr::Symbol { name, width } => Dynamic::from(BV::new_const(ctx, name.as_str(), *width)),
        Expr::Const { value, width } => Dynamic::from(BV::from_u64(ctx, *value, *width)),
        Expr::Neg(op, _) => {
            let bv = translate_expr(ctx, op, cache).as_bv().expect("neg operand must be a bit-vector");
            Dynamic::from(bv.bvneg())
        }
        Expr::Not(op, _) => {
            let bv = translate_expr(ctx, op, cache).as_bv().expect("not operand must be a bit-vector");
            Dynamic::from(bv.bvnot())
        }
        Expr::Arith(op, lhs, rhs, _) => {
            let l = translate_expr(ctx, lhs, cache).as_bv().expect("arith lhs must be a bit-vector");
            let r = translate_expr(ctx, rhs, cache).as_bv().expect("arith rhs must be a bit-vector");
            let bv = match op {
                ArithOp::Add => l.bvadd(&r),
                ArithOp::Sub => l.bvsub(&r),
                ArithOp::Mul => l.bvmul(&r),
                ArithOp::UDiv => l.bvudiv(&r),
                ArithOp::SDiv => l.bvsdiv(&r),
                ArithOp::URem => l.bvurem(&r),
                ArithOp::SRem => l.bvsrem(&r),
                ArithOp::And => l.bvand(&r),
                ArithOp::Or => l.bvor(&r),
                ArithOp::Xor => l.bvxor(&r),
                ArithOp::Shl => l.bvshl(&r),
                ArithOp::Lshr => l.bvlshr(&r),
                ArithOp::Ashr => l.bvashr(&r),
            };
            Dynamic::from(bv)
        }
        Expr::Cmp(op, lhs, rhs) => {
            let l = translate_expr(ctx, lhs, cache).as_bv().expect("cmp lhs must be a bit-vector");
            let r = translate_expr(ctx, rhs, cache).as_bv().expect("cmp rhs must be a bit-vector");
            let b = match op {
                CmpOp::Ult => l.bvult(&r),
                CmpOp::Slt => l.bvslt(&r),
                CmpOp::Ugt => l.bvugt(&r),
                CmpOp::Sgt => l.bvsgt(&r),
                CmpOp::Eq => l._eq(&r),
                CmpOp::Ne => l._eq(&r).not(),
            };
            let as_bv = b.ite(&BV::from_u64(ctx, 1, 1), &BV::from_u64(ctx, 0, 1));
            Dynamic::from(as_bv)
        }
        Expr::BoolNot(op) => {
            let inner = translate_expr(ctx, op, cache).as_bv().expect("lnot operand must be a bit-vector");
            let is_zero = inner._eq(&BV::from_u64(ctx, 0, inner.get_size()));
            let as_bv = is_zero.ite(&BV::from_u64(ctx, 1, 1), &BV::from_u64(ctx, 0, 1));
            Dynamic::from(as_bv)
        }
        Expr::Extract { operand, offset, len } => {
            let bv = translate_expr(ctx, operand, cache).as_bv().expect("extract operand must be a bit-vector");
            Dynamic::from(bv.extract(offset + len - 1, *offset))
        }
        Expr::Concat { lo, hi } => {
            let lo_bv = translate_expr(ctx, lo, cache).as_bv().expect("concat lo must be a bit-vector");
            let hi_bv = translate_expr(ctx, hi, cache).as_bv().expect("concat hi must be a bit-vector");
            Dynamic::from(hi_bv.concat(&lo_bv))
        }
        Expr::Zext { operand, width } => {
            let bv = translate_expr(ctx, operand, cache).as_bv().expect("zext operand must be a bit-vector");
            Dynamic::from(bv.zero_ext(width - bv.get_size()))
        }
        Expr::Sext { operand, width } => {
            let bv = translate_expr(ctx, operand, cache).as_bv().expect("sext operand must be a bit-vector");
            Dynamic::from(bv.sign_ext(width - bv.get_size()))
        }
    };
    cache.insert(key, result.clone());
    result
}

fn extract_assignment(ctx: &Context, model: &z3::Model<'_>, symbols: &HashMap<String, u32>) -> Assignment {
    let mut assignment = Assignment::new();
    for (name, width) in symbols {
        let bv = BV::new_const(ctx, name.as_str(), *width);
        let value = model.eval(&bv, true).and_then(|v| v.as_u64()).unwrap_or(0);
        let n_bytes = (*width as usize).div_ceil(8).max(1);
        let mut bytes = Vec::with_capacity(n_bytes);
        for i in 0..n_bytes {
            bytes.push(((value >> (8 * i)) & 0xff) as u8);
        }
        assignment.insert(name.clone(), bytes);
    }
    assignment
}

/// Generates fresh random bytes for symbols the solver could not pin
/// down (free variables not referenced by any constraint still need a
/// concrete value to build the next run's store).
pub fn random_bytes(rng: &mut impl Rng, n: usize) -> Vec<u8> {
    (0..n).map(|_| rng.gen()).collect()
}

#[derive(Clone, Copy, Eq, PartialEq)]
enum Token<'a> {
    Ident(&'a str),
    Number(u64),
    Op(&'a str),
    LParen,
    RParen,
}

fn tokenize(text: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == '(' {
            tokens.push(Token::LParen);
            i += 1;
            continue;
        }
        if c == ')' {
            tokens.push(Token::RParen);
            i += 1;
            continue;
        }
        if "=!<>".contains(c) {
            let two = &text[i..(i + 2).min(text.len())];
            if two == "==" || two == "!=" {
                tokens.push(Token::Op(&text[i..i + 2]));
                i += 2;
                continue;
            }
            if (c == '<' || c == '>') && i + 1 < bytes.len() && bytes[i + 1] as char == ' ' {
                tokens.push(Token::Op(&text[i..i + 1]));
                i += 1;
                continue;
            }
            tokens.push(Token::Op(&text[i..i + 1]));
            i += 1;
            continue;
        }
        if c == 's' && i + 1 < bytes.len() && (bytes[i + 1] as char == '<' || bytes[i + 1] as char == '>') {
            tokens.push(Token::Op(&text[i..i + 2]));
            i += 2;
            continue;
        }
        if c.is_ascii_digit() {
            let start = i;
            while i < bytes.len() && (bytes[i] as char).is_ascii_alphanumeric() {
                i += 1;
            }
            let slice = &text[start..i];
            let value = if let Some(hex) = slice.strip_prefix("0x") {
                u64::from_str_radix(hex, 16).unwrap_or(0)
            } else {
                slice.parse().unwrap_or(0)
            };
            tokens.push(Token::Number(value));
            continue;
        }
        if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < bytes.len() && ((bytes[i] as char).is_alphanumeric() || bytes[i] as char == '_') {
                i += 1;
            }
            tokens.push(Token::Ident(&text[start..i]));
            continue;
        }
        i += 1;
    }
    tokens
}

struct ConstraintParser<'a> {
    tokens: Vec<Token<'a>>,
    pos: usize,
    env: &'a SymbolEnv,
}

impl<'a> ConstraintParser<'a> {
    fn peek(&self) -> Option<Token<'a>> {
        self.tokens.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<Token<'a>> {
        let t = self.peek();
        self.pos += 1;
        t
    }

    fn parse_expr(&mut self) -> Result<ConcolicValue> {
        let lhs = self.parse_term()?;
        if let Some(Token::Op(op)) = self.peek() {
            self.bump();
            let rhs = self.parse_term()?;
            return Ok(match op {
                "==" => lhs.equal(&rhs),
                "!=" => lhs.not_equal(&rhs),
                "<" => lhs.ult(&rhs),
                ">" => lhs.ugt(&rhs),
                "s<" => lhs.slt(&rhs),
                "s>" => lhs.sgt(&rhs),
                other => return Err(Error::TestCase(format!("unknown operator {other:?}"))),
            });
        }
        Ok(lhs)
    }

    fn parse_term(&mut self) -> Result<ConcolicValue> {
        match self.bump() {
            Some(Token::Number(n)) => Ok(ConcolicValue::from_const(n, 32)),
            Some(Token::Ident(name)) => {
                let width = self.env.width_of(name).unwrap_or(32);
                // Width is unknown at parse time for a name with no
                // concrete seed yet; callers that need a concrete shadow
                // re-seed via `Solver::get_symbolic_bytes` beforehand.
                Ok(ConcolicValue::from_symbol(name.to_string(), width, 0))
            }
            Some(Token::LParen) => {
                let inner = self.parse_expr()?;
                match self.bump() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(Error::TestCase("unbalanced parentheses in constraint".into())),
                }
            }
            other => Err(Error::TestCase(format!("unexpected token in constraint: {other:?}"))),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn bvc_without_name_is_a_plain_constant() {
        let solver = Solver::new();
        let v = solver.bvc(None, &[0x2a]);
        assert!(v.is_concrete());
        assert_eq!(v.concrete, 0x2a);
    }

    #[test]
    fn bvc_with_name_is_symbolic() {
        let solver = Solver::new();
        let v = solver.bvc(Some("x"), &[0x2a]);
        assert!(!v.is_concrete());
        assert_eq!(v.concrete, 0x2a);
    }

    #[test]
    fn get_symbolic_bytes_assembles_little_endian() {
        let solver = Solver::new();
        let v = solver.get_symbolic_bytes("buf", 2, &[0xcd, 0xab]);
        assert_eq!(v.width, 16);
        assert_eq!(v.concrete, 0xabcd);
    }

    #[test]
    fn from_string_parses_simple_comparison() {
        let solver = Solver::new();
        let mut env = SymbolEnv::new();
        env.declare("x", 32);
        let parsed = solver.from_string(&env, "x == 10").unwrap();
        assert_eq!(parsed.width, 1);
    }

    #[test]
    fn get_assignment_solves_simple_equality() {
        let solver = Solver::new();
        let x = ConcolicValue::from_symbol("x", 32, 0);
        let ten = ConcolicValue::from_const(10, 32);
        let query = Query { constraints: vec![], expr: x.equal(&ten) };
        let assignment = solver.get_assignment(&query).unwrap();
        let assignment = assignment.expect("x == 10 is satisfiable");
        let bytes = &assignment["x"];
        let value = bytes_to_u64(bytes);
        assert_eq!(value, 10);
    }

    #[test]
    fn get_assignment_reports_unsat() {
        let solver = Solver::new();
        let x = ConcolicValue::from_symbol("x", 8, 0);
        let a = x.equal(&ConcolicValue::from_const(1, 8));
        let b = x.equal(&ConcolicValue::from_const(2, 8));
        let query = Query { constraints: vec![a], expr: b };
        let assignment = solver.get_assignment(&query).unwrap();
        assert!(assignment.is_none());
    }
}
