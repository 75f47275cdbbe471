//! Target Tree
//!
//! Arena of entity nodes with strict parent/child ownership. Node ids are
//! indexes into the arena and stay valid for the lifetime of the tree;
//! detached nodes keep their slot but are no longer reachable from the root.

use super::entity::{BootEnvironment, Dataset, Disk, Entity, EntityKind, Logical, Pool};
use serde::{Deserialize, Serialize};

/// Index of a node in a `TargetTree`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone)]
struct Node {
    entity: Entity,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

// =============================================================================
// Target Tree
// =============================================================================

/// One forest (discovered or desired) rooted at a `Target` node
#[derive(Debug, Clone)]
pub struct TargetTree {
    nodes: Vec<Node>,
}

impl Default for TargetTree {
    fn default() -> Self {
        Self::new()
    }
}

impl TargetTree {
    /// Create a tree holding only the root
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                entity: Entity::Target,
                parent: None,
                children: Vec::new(),
            }],
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Number of arena slots, detached nodes included
    pub fn capacity(&self) -> usize {
        self.nodes.len()
    }

    /// Append `entity` as the last child of `parent`.
    ///
    /// No attachment rules run here; the validator checks them explicitly.
    pub fn add(&mut self, parent: NodeId, entity: impl Into<Entity>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            entity: entity.into(),
            parent: Some(parent),
            children: Vec::new(),
        });
        self.nodes[parent.0].children.push(id);
        id
    }

    /// Unlink a node (and with it its subtree) from its parent
    pub fn detach(&mut self, id: NodeId) {
        if let Some(parent) = self.nodes[id.0].parent.take() {
            self.nodes[parent.0].children.retain(|c| *c != id);
        }
    }

    pub fn entity(&self, id: NodeId) -> &Entity {
        &self.nodes[id.0].entity
    }

    pub fn entity_mut(&mut self, id: NodeId) -> &mut Entity {
        &mut self.nodes[id.0].entity
    }

    pub fn kind(&self, id: NodeId) -> EntityKind {
        self.entity(id).kind()
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    /// Whether the node is reachable from the root
    pub fn is_attached(&self, id: NodeId) -> bool {
        let mut current = id;
        while let Some(parent) = self.parent(current) {
            current = parent;
        }
        current == self.root()
    }

    /// `id` followed by all of its descendants, in declaration order
    pub fn preorder(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            out.push(current);
            stack.extend(self.children(current).iter().rev().copied());
        }
        out
    }

    /// All descendants of `id`, excluding `id`
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut nodes = self.preorder(id);
        nodes.remove(0);
        nodes
    }

    /// Nearest ancestor (or self) of the given kind
    pub fn ancestor_of_kind(&self, id: NodeId, kind: EntityKind) -> Option<NodeId> {
        let mut current = Some(id);
        while let Some(node) = current {
            if self.kind(node) == kind {
                return Some(node);
            }
            current = self.parent(node);
        }
        None
    }

    /// Readable location, e.g. `disk c0t0d0 / partition 1 / slice 0`
    pub fn path(&self, id: NodeId) -> String {
        let mut labels = Vec::new();
        let mut current = Some(id);
        while let Some(node) = current {
            if node != self.root() {
                labels.push(self.entity(node).label());
            }
            current = self.parent(node);
        }
        if labels.is_empty() {
            return "target".to_string();
        }
        labels.reverse();
        labels.join(" / ")
    }

    // =========================================================================
    // Typed Lookups
    // =========================================================================

    /// All attached nodes of a kind, in declaration order
    pub fn nodes_of_kind(&self, kind: EntityKind) -> Vec<NodeId> {
        self.preorder(self.root())
            .into_iter()
            .filter(|id| self.kind(*id) == kind)
            .collect()
    }

    pub fn disks(&self) -> Vec<(NodeId, &Disk)> {
        self.children(self.root())
            .iter()
            .filter_map(|id| self.entity(*id).as_disk().map(|d| (*id, d)))
            .collect()
    }

    pub fn find_disk(&self, disk_id: &str) -> Option<(NodeId, &Disk)> {
        self.disks().into_iter().find(|(_, d)| d.id == disk_id)
    }

    /// The `Logical` container, if declared
    pub fn logical(&self) -> Option<NodeId> {
        self.children(self.root())
            .iter()
            .copied()
            .find(|id| self.kind(*id) == EntityKind::Logical)
    }

    /// The `Logical` container, created on first use
    pub fn logical_or_insert(&mut self) -> NodeId {
        match self.logical() {
            Some(id) => id,
            None => {
                let root = self.root();
                self.add(root, Logical::default())
            }
        }
    }

    pub fn logical_entity(&self) -> Option<&Logical> {
        self.logical().and_then(|id| match self.entity(id) {
            Entity::Logical(l) => Some(l),
            _ => None,
        })
    }

    pub fn pools(&self) -> Vec<(NodeId, &Pool)> {
        match self.logical() {
            Some(logical) => self
                .children(logical)
                .iter()
                .filter_map(|id| self.entity(*id).as_pool().map(|p| (*id, p)))
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn find_pool(&self, name: &str) -> Option<(NodeId, &Pool)> {
        self.pools().into_iter().find(|(_, p)| p.name == name)
    }

    /// Pools flagged as root pool
    pub fn root_pools(&self) -> Vec<(NodeId, &Pool)> {
        self.pools().into_iter().filter(|(_, p)| p.is_root).collect()
    }

    /// Datasets declared directly under a pool
    pub fn datasets(&self, pool: NodeId) -> Vec<(NodeId, &Dataset)> {
        self.children(pool)
            .iter()
            .filter_map(|id| self.entity(*id).as_dataset().map(|d| (*id, d)))
            .collect()
    }

    /// Datasets of every pool, in declaration order
    pub fn all_datasets(&self) -> Vec<(NodeId, &Dataset)> {
        self.nodes_of_kind(EntityKind::Dataset)
            .into_iter()
            .filter_map(|id| self.entity(id).as_dataset().map(|d| (id, d)))
            .collect()
    }

    pub fn boot_environments(&self, pool: NodeId) -> Vec<(NodeId, &BootEnvironment)> {
        self.preorder(pool)
            .into_iter()
            .filter_map(|id| self.entity(id).as_boot_environment().map(|b| (id, b)))
            .collect()
    }

    /// Name of the pool owning a node
    pub fn pool_name_of(&self, id: NodeId) -> Option<&str> {
        self.ancestor_of_kind(id, EntityKind::Pool)
            .and_then(|pool| self.entity(pool).as_pool())
            .map(|p| p.name.as_str())
    }

    /// Device id handed to the pool manager for a device node.
    ///
    /// Disks use their id, partitions `<disk>p<index>`, slices `<disk>s<index>`.
    pub fn device_id(&self, id: NodeId) -> Option<String> {
        let disk = self
            .ancestor_of_kind(id, EntityKind::Disk)
            .and_then(|d| self.entity(d).as_disk())?;
        match self.entity(id) {
            Entity::Disk(d) => Some(d.id.clone()),
            Entity::Partition(p) => Some(format!("{}p{}", disk.id, p.index)),
            Entity::Slice(s) => Some(format!("{}s{}", disk.id, s.index)),
            _ => None,
        }
    }

    /// Block size of the disk owning a node
    pub fn block_size_of(&self, id: NodeId) -> u32 {
        self.ancestor_of_kind(id, EntityKind::Disk)
            .and_then(|d| self.entity(d).as_disk())
            .map(|d| d.geometry.block_size.max(1))
            .unwrap_or(crate::domain::size::DEFAULT_BLOCK_SIZE)
    }
}

// =============================================================================
// Targets
// =============================================================================

/// The two parallel forests of a reconciliation run
#[derive(Debug, Clone, Default)]
pub struct Targets {
    /// Probed system truth
    pub discovered: TargetTree,
    /// Goal state
    pub desired: TargetTree,
}

impl Targets {
    pub fn new(discovered: TargetTree, desired: TargetTree) -> Self {
        Self {
            discovered,
            desired,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::size::SizeValue;
    use crate::target::entity::{Partition, PartitionType, PoolMembership, Slice};

    fn sample_tree() -> (TargetTree, NodeId, NodeId, NodeId) {
        let mut tree = TargetTree::new();
        let root = tree.root();
        let disk = tree.add(root, Disk::new("c0t0d0"));
        let part = tree.add(
            disk,
            Partition::new(1, PartitionType::Legacy(191), SizeValue::parse("20g").unwrap()),
        );
        let mut slice = Slice::new(0, SizeValue::parse("19g").unwrap());
        slice.membership = Some(PoolMembership::new("rpool"));
        let slice = tree.add(part, slice);
        let logical = tree.logical_or_insert();
        tree.add(logical, Pool::root("rpool"));
        (tree, disk, part, slice)
    }

    #[test]
    fn test_preorder_is_declaration_order() {
        let (tree, disk, part, slice) = sample_tree();
        let order = tree.preorder(tree.root());
        assert_eq!(&order[1..4], &[disk, part, slice]);
        assert_eq!(tree.descendants(disk), vec![part, slice]);
    }

    #[test]
    fn test_device_ids_and_paths() {
        let (tree, disk, part, slice) = sample_tree();
        assert_eq!(tree.device_id(disk).as_deref(), Some("c0t0d0"));
        assert_eq!(tree.device_id(part).as_deref(), Some("c0t0d0p1"));
        assert_eq!(tree.device_id(slice).as_deref(), Some("c0t0d0s0"));
        assert_eq!(tree.path(slice), "disk c0t0d0 / partition 1 / slice 0");
    }

    #[test]
    fn test_pool_lookups() {
        let (mut tree, ..) = sample_tree();
        let logical = tree.logical_or_insert();
        assert_eq!(tree.logical(), Some(logical));
        assert_eq!(tree.pools().len(), 1);
        assert_eq!(tree.root_pools().len(), 1);
        let (pool, _) = tree.find_pool("rpool").unwrap();
        let ds = tree.add(pool, Dataset::filesystem("export"));
        assert_eq!(tree.pool_name_of(ds), Some("rpool"));
        assert_eq!(tree.datasets(pool).len(), 1);
    }

    #[test]
    fn test_detach_removes_subtree() {
        let (mut tree, disk, part, slice) = sample_tree();
        tree.detach(part);
        assert!(tree.children(disk).is_empty());
        assert!(!tree.is_attached(slice));
        assert!(!tree.preorder(tree.root()).contains(&slice));
    }
}
