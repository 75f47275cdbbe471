//! Deep Phase
//!
//! A scratch view overlays the desired tree with its own attachment state:
//! the subtree root starts attached, its descendants start detached and are
//! re-attached one at a time so every node-local rule sees exactly the
//! siblings declared before it. Views only hold an index set, so creating
//! one never copies the tree.

use super::report::ValidationReport;
use super::rules::check_attachment;
use crate::target::{EntityKind, NodeId, TargetTree};
use std::collections::HashSet;
use tracing::trace;

/// Attachment state layered over a read-only tree
#[derive(Debug)]
pub struct ScratchView<'a> {
    tree: &'a TargetTree,
    base: NodeId,
    attached: HashSet<NodeId>,
}

impl<'a> ScratchView<'a> {
    /// View with only `base` attached
    pub fn new(tree: &'a TargetTree, base: NodeId) -> Self {
        let mut attached = HashSet::new();
        attached.insert(base);
        Self {
            tree,
            base,
            attached,
        }
    }

    pub fn base(&self) -> NodeId {
        self.base
    }

    pub fn is_attached(&self, id: NodeId) -> bool {
        self.attached.contains(&id)
    }

    /// Siblings of `id` already attached in this view
    pub fn attached_siblings(&self, id: NodeId) -> Vec<NodeId> {
        match self.tree.parent(id) {
            Some(parent) => self
                .tree
                .children(parent)
                .iter()
                .copied()
                .filter(|s| *s != id && self.is_attached(*s))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Attach `id` to its parent, evaluating the attachment rules.
    ///
    /// A node whose parent is not attached in the view is skipped.
    pub fn attach(&mut self, id: NodeId, report: &mut ValidationReport) {
        let Some(parent) = self.tree.parent(id) else {
            return;
        };
        if !self.is_attached(parent) || self.is_attached(id) {
            return;
        }
        let siblings = self.attached_siblings(id);
        trace!("Attaching {} under {}", self.tree.path(id), self.tree.path(parent));
        check_attachment(self.tree, parent, id, &siblings, report);
        self.attached.insert(id);
    }

    /// Re-attach every descendant of the base in preorder
    pub fn replay(&mut self, report: &mut ValidationReport) {
        for id in self.tree.descendants(self.base) {
            self.attach(id, report);
        }
    }
}

/// Run the deep phase over the whole tree
pub fn check(tree: &TargetTree, report: &mut ValidationReport) {
    let root = tree.root();

    // Top level: only the root's direct children are replayed here
    let mut top = ScratchView::new(tree, root);
    for child in tree.children(root) {
        top.attach(*child, report);
    }

    for child in tree.children(root) {
        let replay = match tree.kind(*child) {
            EntityKind::Disk => !tree.children(*child).is_empty(),
            EntityKind::Logical => true,
            _ => false,
        };
        if replay {
            ScratchView::new(tree, *child).replay(report);
        }
    }
}
