//! The path-condition tree.
//!
//! A binary tree of branch decisions shared across every run of the
//! exploration loop. Each non-placeholder node owns the branch
//! condition that was evaluated there and a `was_negated` flag flipped
//! exactly once, when that branch is chosen for negation by
//! [`Node::find_unnegated`]. Modelled with `Rc<RefCell<Node>>` rather
//! than the teacher's owned-`Box` trees elsewhere in this workspace,
//! because the trace's cursor and the tree's permanent structure need
//! to alias the same nodes; destruction is done iteratively (see
//! `Drop for Node`) for the same reason the original `Trace::~Trace`
//! walks a queue instead of recursing: release builds of a deep path
//! tree must not blow the stack.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use rand::Rng;

use crate::value::ConcolicValue;

#[derive(Debug)]
pub struct Branch {
    pub expr: ConcolicValue,
    pub was_negated: Cell<bool>,
    pub pc: u64,
}

impl Branch {
    pub fn new(expr: ConcolicValue, pc: u64) -> Rc<Branch> {
        Rc::new(Branch { expr, was_negated: Cell::new(false), pc })
    }
}

pub type NodeRef = Rc<RefCell<Node>>;

/// One step of a root-to-branch path: the branch found there and which
/// edge was taken out of it (`true` = the branch's condition held).
pub type Path = Vec<(Rc<Branch>, bool)>;

#[derive(Default)]
pub struct Node {
    branch: Option<Rc<Branch>>,
    true_branch: Option<NodeRef>,
    false_branch: Option<NodeRef>,
}

impl Node {
    pub fn new_ref() -> NodeRef {
        Rc::new(RefCell::new(Node::default()))
    }

    pub fn is_placeholder(&self) -> bool {
        self.branch.is_none()
    }

    pub fn branch(&self) -> Option<Rc<Branch>> {
        self.branch.clone()
    }

    /// Installs `branch` if this node is still a placeholder. Returns
    /// whether the install happened (a first-time visit to this spot in
    /// the tree), mirroring `Trace::addBranch`'s return value.
    fn install(&mut self, branch: Rc<Branch>) -> bool {
        if self.is_placeholder() {
            self.branch = Some(branch);
            true
        } else {
            false
        }
    }

    fn child_or_insert(&mut self, taken: bool) -> NodeRef {
        let slot = if taken { &mut self.true_branch } else { &mut self.false_branch };
        slot.get_or_insert_with(Node::new_ref).clone()
    }

    /// Depth-first collection of every node whose branch has not yet
    /// been negated, each paired with the root-to-it path. A negated
    /// node is skipped but its children (if any) are still visited, so
    /// deeper un-negated forks past an already-negated ancestor are
    /// still found.
    fn collect_unnegated(node: &NodeRef, prefix: &mut Path, out: &mut Vec<Path>) {
        let (branch, true_child, false_child) = {
            let n = node.borrow();
            (n.branch.clone(), n.true_branch.clone(), n.false_branch.clone())
        };
        let Some(branch) = branch else { return };
        if !branch.was_negated.get() {
            let taken = true_child.is_some();
            let mut path = prefix.clone();
            path.push((branch.clone(), taken));
            out.push(path);
        }
        if let Some(t) = true_child {
            prefix.push((branch.clone(), true));
            Node::collect_unnegated(&t, prefix, out);
            prefix.pop();
        }
        if let Some(f) = false_child {
            prefix.push((branch, false));
            Node::collect_unnegated(&f, prefix, out);
            prefix.pop();
        }
    }
}

/// Walks the tree rooted at `root`, collects every un-negated branch and
/// its root-to-it path, and returns one chosen uniformly at random. The
/// empty result means the tree is fully explored.
pub fn random_unnegated(root: &NodeRef, rng: &mut impl Rng) -> Option<Path> {
    let mut candidates = Vec::new();
    Node::collect_unnegated(root, &mut Vec::new(), &mut candidates);
    if candidates.is_empty() {
        return None;
    }
    let idx = rng.gen_range(0..candidates.len());
    Some(candidates.swap_remove(idx))
}

/// Records `branch` at `cursor`, advancing it into the child selected by
/// `condition` (creating that child if it does not exist yet). Returns
/// whether this was the first time this spot in the tree was visited.
pub fn add_branch(cursor: &mut NodeRef, branch: Rc<Branch>, condition: bool) -> bool {
    let installed = cursor.borrow_mut().install(branch);
    let child = cursor.borrow_mut().child_or_insert(condition);
    *cursor = child;
    installed
}

impl Drop for Node {
    fn drop(&mut self) {
        let mut stack: Vec<NodeRef> = Vec::new();
        if let Some(t) = self.true_branch.take() {
            stack.push(t);
        }
        if let Some(f) = self.false_branch.take() {
            stack.push(f);
        }
        while let Some(rc) = stack.pop() {
            match Rc::try_unwrap(rc) {
                Ok(cell) => {
                    let mut node = cell.into_inner();
                    if let Some(t) = node.true_branch.take() {
                        stack.push(t);
                    }
                    if let Some(f) = node.false_branch.take() {
                        stack.push(f);
                    }
                }
                Err(_still_shared) => {
                    // Another owner (e.g. a live trace cursor) keeps this
                    // subtree alive; it is dropped normally later.
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn cond(name: &str) -> ConcolicValue {
        ConcolicValue::from_symbol(name, 32, 0)
    }

    #[test]
    fn single_branch_is_unnegated_until_explicitly_marked() {
        let root = Node::new_ref();
        let mut cursor = root.clone();
        let branch = Branch::new(cond("x").eq_true(), 1);
        add_branch(&mut cursor, branch, true);

        let mut rng = StdRng::seed_from_u64(1);
        let path = random_unnegated(&root, &mut rng).expect("one unnegated branch");
        assert_eq!(path.len(), 1);
        assert!(path[0].1);

        path[0].0.was_negated.set(true);
        assert!(random_unnegated(&root, &mut rng).is_none());
    }

    #[test]
    fn nested_branches_expose_three_leaves() {
        // Simulates the classic `if x == 0 {} else if x < 10 {} else {}`
        // shape: three runs, one branch negated between each, end with
        // a fully explored tree.
        let root = Node::new_ref();

        // Run 1: x == 0 is true.
        let mut cursor = root.clone();
        let b1 = Branch::new(cond("x").eq_true(), 1);
        add_branch(&mut cursor, b1.clone(), true);

        let mut rng = StdRng::seed_from_u64(7);
        // Negate b1 to explore x != 0.
        let path = random_unnegated(&root, &mut rng).unwrap();
        assert_eq!(path.len(), 1);
        path[0].0.was_negated.set(true);

        // Run 2: x != 0, and x < 10 is true; extends the false child.
        let mut cursor2 = root.clone();
        add_branch(&mut cursor2, b1, false);
        let b2 = Branch::new(cond("x").eq_true(), 2);
        add_branch(&mut cursor2, b2, true);

        let path = random_unnegated(&root, &mut rng).expect("still one frontier left");
        assert_eq!(path.len(), 2);
        path.last().unwrap().0.was_negated.set(true);

        // Run 3: x != 0 and x >= 10; extends the remaining false child.
        let mut cursor3 = root.clone();
        let root_branch = root.borrow().branch().unwrap();
        add_branch(&mut cursor3, root_branch, false);
        let second_branch = cursor3.borrow().branch().unwrap();
        add_branch(&mut cursor3, second_branch, false);

        assert!(random_unnegated(&root, &mut rng).is_none());
    }
}
