//! Execution context: owns the store for the run in flight, the
//! previous run's store (for diagnostics / test-case dumps) and the
//! trace handle used to advance the path tree.

use rand::Rng;

use crate::path_tree::{self, NodeRef};
use crate::solver::{Query, Solver};
use crate::store::ConcreteStore;
use crate::trace::Trace;

pub struct ExecutionContext {
    solver: Solver,
    trace: Trace,
    current: ConcreteStore,
    previous: ConcreteStore,
}

impl ExecutionContext {
    pub fn new(root: NodeRef) -> Self {
        ExecutionContext {
            solver: Solver::new(),
            trace: Trace::new(root),
            current: ConcreteStore::new(),
            previous: ConcreteStore::new(),
        }
    }

    pub fn solver(&self) -> &Solver {
        &self.solver
    }

    pub fn trace(&self) -> &Trace {
        &self.trace
    }

    pub fn trace_mut(&mut self) -> &mut Trace {
        &mut self.trace
    }

    pub fn current_store(&self) -> &ConcreteStore {
        &self.current
    }

    pub fn previous_store(&self) -> &ConcreteStore {
        &self.previous
    }

    /// Installs `store` as the assignment for the next run, demoting the
    /// current one to "previous".
    pub fn setup_new_values(&mut self, store: ConcreteStore) {
        self.previous = std::mem::replace(&mut self.current, store);
        self.trace.reset();
    }

    /// Picks an unexplored leaf of the path tree, negates it, asks the
    /// solver for a satisfying assignment and installs it as the next
    /// run's store. Retries with a different leaf on UNSAT, and gives up
    /// once the tree is fully explored (returns `false`).
    pub fn setup_new_values_from_tree(&mut self, rng: &mut impl Rng) -> crate::error::Result<bool> {
        loop {
            let Some(path) = path_tree::random_unnegated(self.trace.root(), rng) else {
                return Ok(false);
            };
            let query: Query = Trace::new_query(&path);
            match self.solver.get_assignment(&query)? {
                Some(assignment) => {
                    let mut store = ConcreteStore::new();
                    for (name, bytes) in assignment {
                        store.insert(name, bytes);
                    }
                    self.setup_new_values(store);
                    return Ok(true);
                }
                None => continue,
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::path_tree::Node;
    use crate::value::ConcolicValue;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn setup_new_values_from_tree_solves_the_negated_branch() {
        let root = Node::new_ref();
        let mut ctx = ExecutionContext::new(root);
        let x = ConcolicValue::from_symbol("x", 32, 5);
        let cond = x.equal(&ConcolicValue::from_const(5, 32));
        ctx.trace_mut().add(true, &cond, 1);

        let mut rng = StdRng::seed_from_u64(3);
        let found = ctx.setup_new_values_from_tree(&mut rng).unwrap();
        assert!(found);
        let bytes = ctx.current_store().get("x").expect("x was assigned");
        let value = bytes.iter().enumerate().fold(0u64, |acc, (i, b)| acc | ((*b as u64) << (8 * i)));
        assert_ne!(value, 5);
    }

    #[test]
    fn setup_new_values_from_tree_reports_exhaustion() {
        let root = Node::new_ref();
        let mut ctx = ExecutionContext::new(root);
        let mut rng = StdRng::seed_from_u64(3);
        let found = ctx.setup_new_values_from_tree(&mut rng).unwrap();
        assert!(!found);
    }
}
