//! Topology Builder
//!
//! Groups the devices tagged for a pool into redundancy groups. Group order
//! is the order in which each group key first appears in the tree and member
//! order is declaration order; both are visible to the pool manager.

use crate::domain::ports::VdevSpec;
use crate::error::{Error, Result};
use crate::target::{Action, EntityKind, NodeId, TargetTree, VdevKind};
use indexmap::IndexMap;
use tracing::debug;

// =============================================================================
// Pool Topology
// =============================================================================

/// One derived redundancy group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VdevGroup {
    /// Group key; `None` is the implicit plain group
    pub key: Option<String>,
    /// Whether the kind came from an explicitly declared vdev
    pub explicit: bool,
    pub spec: VdevSpec,
}

/// Derived layout of a pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolTopology {
    pub pool: String,
    pub groups: Vec<VdevGroup>,
}

impl PoolTopology {
    /// Specs in the order handed to `create_pool`
    pub fn vdev_specs(&self) -> Vec<VdevSpec> {
        self.groups.iter().map(|g| g.spec.clone()).collect()
    }

    pub fn member_count(&self) -> usize {
        self.groups.iter().map(|g| g.spec.members.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.member_count() == 0
    }
}

// =============================================================================
// Topology Builder
// =============================================================================

/// Derives pool layouts from device memberships
pub struct TopologyBuilder;

impl TopologyBuilder {
    /// Build the layout of the pool at `pool`
    pub fn build(tree: &TargetTree, pool: NodeId) -> Result<PoolTopology> {
        let pool_name = tree
            .entity(pool)
            .as_pool()
            .map(|p| p.name.clone())
            .ok_or_else(|| {
                Error::Internal(format!("{} is not a pool", tree.path(pool)))
            })?;

        let declared = Self::declared_vdevs(tree, pool);

        let mut groups: IndexMap<Option<String>, Vec<String>> = IndexMap::new();
        for id in tree.preorder(tree.root()) {
            let entity = tree.entity(id);
            let Some(membership) = entity.membership() else {
                continue;
            };
            if membership.pool != pool_name || entity.action() == Some(Action::Delete) {
                continue;
            }
            if let Some(device) = tree.device_id(id) {
                groups
                    .entry(membership.vdev.clone())
                    .or_default()
                    .push(device);
            }
        }

        let groups: Vec<VdevGroup> = groups
            .into_iter()
            .map(|(key, members)| {
                let declared_kind = key.as_ref().and_then(|k| declared.get(k)).copied();
                VdevGroup {
                    explicit: declared_kind.is_some(),
                    spec: VdevSpec {
                        kind: declared_kind.unwrap_or(VdevKind::Plain),
                        members,
                    },
                    key,
                }
            })
            .collect();

        debug!(
            "Pool {} topology: {}",
            pool_name,
            groups
                .iter()
                .map(|g| g.spec.to_string())
                .collect::<Vec<_>>()
                .join(" ")
        );

        Ok(PoolTopology {
            pool: pool_name,
            groups,
        })
    }

    /// Layouts of every pool in the tree
    pub fn build_all(tree: &TargetTree) -> Result<Vec<PoolTopology>> {
        tree.pools()
            .into_iter()
            .map(|(id, _)| Self::build(tree, id))
            .collect()
    }

    /// Explicitly declared vdevs of a pool, by group key
    pub fn declared_vdevs(tree: &TargetTree, pool: NodeId) -> IndexMap<String, VdevKind> {
        tree.children(pool)
            .iter()
            .filter(|id| tree.kind(**id) == EntityKind::Vdev)
            .filter_map(|id| tree.entity(*id).as_vdev())
            .map(|v| (v.name.clone(), v.kind))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::size::SizeValue;
    use crate::target::{Disk, Pool, PoolMembership, Slice, Vdev};

    fn tree_with_pool(name: &str) -> (TargetTree, NodeId) {
        let mut tree = TargetTree::new();
        let logical = tree.logical_or_insert();
        let pool = tree.add(logical, Pool::root(name));
        (tree, pool)
    }

    #[test]
    fn test_untagged_disks_form_plain_group() {
        let (mut tree, pool) = tree_with_pool("rpool");
        let root = tree.root();
        tree.add(root, Disk::new("d1").whole_disk_in(PoolMembership::new("rpool")));
        tree.add(root, Disk::new("d2").whole_disk_in(PoolMembership::new("rpool")));
        tree.add(root, Disk::new("d3").whole_disk_in(PoolMembership::new("tank")));

        let topo = TopologyBuilder::build(&tree, pool).unwrap();
        assert_eq!(topo.groups.len(), 1);
        assert_eq!(topo.groups[0].key, None);
        assert_eq!(
            topo.vdev_specs(),
            vec![VdevSpec {
                kind: VdevKind::Plain,
                members: vec!["d1".into(), "d2".into()],
            }]
        );
    }

    #[test]
    fn test_groups_keep_declaration_order() {
        let (mut tree, pool) = tree_with_pool("tank");
        tree.add(pool, Vdev::new("mirror-1", VdevKind::Mirror));
        tree.add(pool, Vdev::new("logs", VdevKind::Log));
        tree.add(pool, Vdev::new("mirror-0", VdevKind::Mirror));

        let root = tree.root();
        for (disk, group) in [
            ("c1", "mirror-0"),
            ("c2", "mirror-1"),
            ("c3", "mirror-0"),
            ("c4", "logs"),
            ("c5", "mirror-1"),
        ] {
            tree.add(
                root,
                Disk::new(disk).whole_disk_in(PoolMembership::new("tank").in_vdev(group)),
            );
        }

        let topo = TopologyBuilder::build(&tree, pool).unwrap();
        let specs = topo.vdev_specs();
        assert_eq!(specs.len(), 3);
        assert_eq!(specs[0].kind, VdevKind::Mirror);
        assert_eq!(specs[0].members, vec!["c1", "c3"]);
        assert_eq!(specs[1].members, vec!["c2", "c5"]);
        assert_eq!(specs[2].kind, VdevKind::Log);
        assert_eq!(specs[2].members, vec!["c4"]);
        assert_eq!(topo.member_count(), 5);
    }

    #[test]
    fn test_undeclared_group_defaults_to_plain() {
        let (mut tree, pool) = tree_with_pool("tank");
        let root = tree.root();
        tree.add(
            root,
            Disk::new("c1").whole_disk_in(PoolMembership::new("tank").in_vdev("raidz-0")),
        );
        let topo = TopologyBuilder::build(&tree, pool).unwrap();
        assert_eq!(topo.groups[0].spec.kind, VdevKind::Plain);
        assert!(!topo.groups[0].explicit);
    }

    #[test]
    fn test_slices_and_single_member_mirror() {
        let (mut tree, pool) = tree_with_pool("rpool");
        tree.add(pool, Vdev::new("m", VdevKind::Mirror));
        let root = tree.root();
        let disk = tree.add(root, Disk::new("c0t0d0"));
        let mut s0 = Slice::new(0, SizeValue::parse("10g").unwrap());
        s0.membership = Some(PoolMembership::new("rpool").in_vdev("m"));
        tree.add(disk, s0);
        let mut s1 = Slice::new(1, SizeValue::parse("1g").unwrap());
        s1.membership = Some(PoolMembership::new("rpool").in_vdev("m"));
        s1.action = Action::Delete;
        tree.add(disk, s1);

        let topo = TopologyBuilder::build(&tree, pool).unwrap();
        assert_eq!(topo.groups.len(), 1);
        assert_eq!(topo.groups[0].spec.kind, VdevKind::Mirror);
        assert_eq!(topo.groups[0].spec.members, vec!["c0t0d0s0"]);
    }

    #[test]
    fn test_build_rejects_non_pool() {
        let tree = TargetTree::new();
        assert!(TopologyBuilder::build(&tree, tree.root()).is_err());
    }
}
