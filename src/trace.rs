//! Per-run trace: a cursor into the path tree plus the constraint set
//! collected along the way. Mirrors `clover::Trace` in the original
//! `trace.cpp`: `add`/`assume` advance the cursor and grow the
//! constraint set, `reset` rewinds the cursor to the tree root for the
//! next run, and `newQuery` turns a path returned by
//! [`crate::path_tree::random_unnegated`] into a solver [`Query`].

use std::rc::Rc;

use crate::path_tree::{self, Branch, NodeRef, Path};
use crate::solver::{ConstraintManager, Query};
use crate::value::ConcolicValue;

/// Raised when a guest `assume()` call narrows execution for the first
/// time at a spot in the tree. Per the driver's error-handling policy
/// this is not a process error: the current run must unwind cleanly so
/// the driver can solve the recorded negation and restart.
#[derive(Debug, Clone, Copy)]
pub struct AssumeNotification;

impl std::fmt::Display for AssumeNotification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "assume narrowed an unexplored path")
    }
}

impl std::error::Error for AssumeNotification {}

pub struct Trace {
    root: NodeRef,
    cursor: NodeRef,
    constraints: Vec<ConcolicValue>,
    cm: ConstraintManager,
}

impl Trace {
    pub fn new(root: NodeRef) -> Self {
        Trace { cursor: root.clone(), root, constraints: Vec::new(), cm: ConstraintManager::new() }
    }

    pub fn root(&self) -> &NodeRef {
        &self.root
    }

    /// Rewinds the cursor to the tree root and clears this run's
    /// constraint set, ready for the next run.
    pub fn reset(&mut self) {
        self.cursor = self.root.clone();
        self.constraints.clear();
        self.cm.clear();
    }

    /// Records that `bv` evaluated to `condition` at `pc`, growing both
    /// the constraint set and the path tree, and advances the cursor.
    pub fn add(&mut self, condition: bool, bv: &ConcolicValue, pc: u64) {
        let predicate = if condition { bv.eq_true() } else { bv.eq_false() };
        self.constraints.push(predicate.clone());
        self.cm.add(predicate.symbolic.clone());
        let branch = Branch::new(bv.clone(), pc);
        path_tree::add_branch(&mut self.cursor, branch, condition);
    }

    /// Records a guest assumption. Installs a permanently-false-taken
    /// branch for `bv.eqFalse()` (the direction never actually
    /// executed); if this is the first time the tree saw this spot, the
    /// call fails with [`AssumeNotification`] so the caller can unwind.
    pub fn assume(&mut self, bv: &ConcolicValue) -> Result<(), AssumeNotification> {
        let predicate = bv.eq_true();
        self.constraints.push(predicate.clone());
        self.cm.add(predicate.symbolic.clone());
        let negated = bv.eq_false();
        let branch = Branch::new(negated, 0);
        let installed = path_tree::add_branch(&mut self.cursor, branch, false);
        if installed {
            Err(AssumeNotification)
        } else {
            Ok(())
        }
    }

    /// The query for asking the solver about `bv` given everything
    /// asserted so far this run.
    pub fn get_query(&self, bv: &ConcolicValue) -> Query {
        Query { constraints: self.constraints.clone(), expr: bv.clone() }
    }

    /// Turns a path returned by `random_unnegated` into a query for the
    /// negation of its last branch, marking that branch negated as a
    /// side effect so it is never chosen again.
    pub fn new_query(path: &Path) -> Query {
        assert!(!path.is_empty(), "a path from random_unnegated is never empty");
        let query_idx = path.len() - 1;
        let mut constraints = Vec::with_capacity(query_idx);
        for (branch, taken) in path[..query_idx].iter() {
            constraints.push(if *taken { branch.expr.eq_true() } else { branch.expr.eq_false() });
        }
        let (last_branch, last_taken) = &path[query_idx];
        let taken_predicate =
            if *last_taken { last_branch.expr.eq_true() } else { last_branch.expr.eq_false() };
        last_branch.was_negated.set(true);
        Query { constraints, expr: taken_predicate.lnot() }
    }

    pub fn constraints(&self) -> &[ConcolicValue] {
        &self.constraints
    }

    pub fn simplify(&self, target: &Rc<crate::expr::Expr>) -> Rc<crate::expr::Expr> {
        self.cm.simplify(target)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::path_tree::Node;
    use crate::value::ConcolicValue;

    #[test]
    fn assume_signals_only_on_first_visit() {
        let root = Node::new_ref();
        let mut trace = Trace::new(root);
        let cond = ConcolicValue::from_symbol("x", 32, 0).equal(&ConcolicValue::from_const(5, 32));
        assert!(trace.assume(&cond).is_err());

        trace.reset();
        assert!(trace.assume(&cond).is_ok());
    }

    #[test]
    fn new_query_marks_the_last_branch_negated() {
        let root = Node::new_ref();
        let mut trace = Trace::new(root.clone());
        let cond = ConcolicValue::from_symbol("x", 32, 7).equal(&ConcolicValue::from_const(7, 32));
        trace.add(true, &cond, 42);

        let mut rng = rand::rngs::mock::StepRng::new(0, 1);
        let path = path_tree::random_unnegated(&root, &mut rng).expect("one unnegated branch");
        let query = Trace::new_query(&path);
        assert!(path[0].0.was_negated.get());
        assert_eq!(query.expr.width, 1);
    }
}
