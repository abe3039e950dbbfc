//! Pre-order tree traversal.

use crate::tree::{NodeId, Tree};

/// Depth-first pre-order iterator over a subtree.
///
/// Uses an explicit stack, so arbitrarily deep trees never recurse. The
/// traversal is deterministic (children in their current sibling order) and
/// restartable by calling [`Tree::iter`] again. The shared borrow of the
/// tree rules out structural mutation while an iterator is live.
pub struct TreeIter<'a> {
    tree: &'a Tree,
    stack: Vec<NodeId>,
}

impl<'a> TreeIter<'a> {
    pub(crate) fn new(tree: &'a Tree, start: NodeId) -> Self {
        let stack = if tree.node(start).is_ok() {
            vec![start]
        } else {
            Vec::new()
        };
        Self { tree, stack }
    }
}

impl Iterator for TreeIter<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let current = self.stack.pop()?;
        if let Ok(children) = self.tree.children_of(current) {
            // reversed so the first child is popped next
            self.stack.extend(children.iter().rev());
        }
        Some(current)
    }
}
