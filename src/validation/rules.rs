//! Attachment Rules
//!
//! Node-local constraints that only make sense relative to a parent. They
//! are evaluated when a node is attached to its parent in a scratch view,
//! against the siblings attached before it.

use super::report::{ValidationReport, ViolationCode};
use crate::target::{
    Action, Dataset, Disk, Entity, EntityKind, LabelKind, NodeId, Partition, PartitionType,
    Slice, TargetTree,
};

/// Highest legacy partition index (4 primary + 32 logical)
const MAX_LEGACY_PARTITION: u8 = 36;

/// Highest GPT partition index
const MAX_GPT_PARTITION: u8 = 127;

/// Highest VTOC slice index
const MAX_SLICE: u8 = 15;

/// The whole-disk backup slice
const BACKUP_SLICE: u8 = 2;

/// Check attaching `child` below `parent`, given the already attached siblings
pub fn check_attachment(
    tree: &TargetTree,
    parent: NodeId,
    child: NodeId,
    siblings: &[NodeId],
    report: &mut ValidationReport,
) {
    let parent_kind = tree.kind(parent);
    let child_kind = tree.kind(child);

    if !parent_kind.allowed_children().contains(&child_kind) {
        report.record(
            tree,
            child,
            ViolationCode::IllegalParent,
            format!("a {} cannot be placed under a {}", child_kind, parent_kind),
        );
        return;
    }

    match tree.entity(child) {
        Entity::Logical(_) => {
            if siblings.iter().any(|s| tree.kind(*s) == EntityKind::Logical) {
                report.record(
                    tree,
                    child,
                    ViolationCode::DuplicateName,
                    "only one logical section may be declared",
                );
            }
        }
        Entity::Partition(partition) => check_partition(tree, parent, child, partition, siblings, report),
        Entity::Slice(slice) => check_slice(tree, parent, child, slice, siblings, report),
        Entity::Vdev(vdev) => {
            let clash = siblings
                .iter()
                .filter_map(|s| tree.entity(*s).as_vdev())
                .any(|v| v.name == vdev.name);
            if clash {
                report.record(
                    tree,
                    child,
                    ViolationCode::DuplicateName,
                    format!("vdev {} is declared twice in this pool", vdev.name),
                );
            }
        }
        Entity::Dataset(dataset) => check_dataset(tree, child, dataset, siblings, report),
        Entity::BootEnvironment(be) => {
            if be.name.trim().is_empty() || be.name.contains('/') {
                report.record(
                    tree,
                    child,
                    ViolationCode::InvalidName,
                    format!("'{}' is not a valid boot environment name", be.name),
                );
            }
            let clash = siblings
                .iter()
                .filter_map(|s| tree.entity(*s).as_boot_environment())
                .any(|b| b.name == be.name);
            if clash {
                report.record(
                    tree,
                    child,
                    ViolationCode::DuplicateName,
                    format!("boot environment {} is declared twice", be.name),
                );
            }
            if let Some(mountpoint) = &be.mountpoint {
                if !mountpoint.starts_with('/') {
                    report.record(
                        tree,
                        child,
                        ViolationCode::InvalidMountpoint,
                        format!("mountpoint '{}' is not absolute", mountpoint),
                    );
                }
            }
        }
        // Disks and pools are unique tree-wide; the structural phase owns that
        Entity::Disk(_) | Entity::Pool(_) | Entity::Target => {}
    }
}

// =============================================================================
// Partitions and Slices
// =============================================================================

fn check_partition(
    tree: &TargetTree,
    parent: NodeId,
    child: NodeId,
    partition: &Partition,
    siblings: &[NodeId],
    report: &mut ValidationReport,
) {
    let Some(disk) = tree.entity(parent).as_disk() else {
        return;
    };

    let form_matches = match (&partition.part_type, disk.label) {
        (PartitionType::Legacy(_), LabelKind::Gpt) => false,
        (PartitionType::Gpt(_), LabelKind::Mbr) => false,
        _ => true,
    };
    if !form_matches {
        report.record(
            tree,
            child,
            ViolationCode::PartitionTypeMismatch,
            format!(
                "partition type {} does not fit a {} labelled disk",
                partition.part_type, disk.label
            ),
        );
    }

    let (min, max) = match partition.part_type {
        PartitionType::Legacy(_) => (1, MAX_LEGACY_PARTITION),
        PartitionType::Gpt(_) => (0, MAX_GPT_PARTITION),
    };
    if partition.index < min || partition.index > max {
        report.record(
            tree,
            child,
            ViolationCode::IndexOutOfRange,
            format!(
                "partition index {} outside {}..={}",
                partition.index, min, max
            ),
        );
    }

    let same_index = siblings
        .iter()
        .filter_map(|s| tree.entity(*s).as_partition())
        .any(|p| p.index == partition.index);
    if same_index {
        report.record(
            tree,
            child,
            ViolationCode::DuplicateName,
            format!("partition {} is declared twice", partition.index),
        );
    }

    if partition.action == Action::Delete {
        return;
    }

    let block_size = disk.geometry.block_size.max(1);
    let extent = Extent::new(
        partition.start_sector,
        partition.size.with_block_size(block_size).sectors(),
    );
    let others: Vec<Extent> = siblings
        .iter()
        .filter_map(|s| tree.entity(*s).as_partition())
        .filter(|p| p.action != Action::Delete && p.is_logical() == partition.is_logical())
        .map(|p| Extent::new(p.start_sector, p.size.with_block_size(block_size).sectors()))
        .collect();

    check_extent(tree, child, extent, &others, disk.geometry.total_sectors, report);
}

fn check_slice(
    tree: &TargetTree,
    parent: NodeId,
    child: NodeId,
    slice: &Slice,
    siblings: &[NodeId],
    report: &mut ValidationReport,
) {
    if slice.index > MAX_SLICE {
        report.record(
            tree,
            child,
            ViolationCode::IndexOutOfRange,
            format!("slice index {} outside 0..={}", slice.index, MAX_SLICE),
        );
    }

    if slice.index == BACKUP_SLICE && slice.action == Action::Create {
        report.record(
            tree,
            child,
            ViolationCode::ReservedSlice,
            "slice 2 is the backup slice and cannot be created",
        );
    }

    let same_index = siblings
        .iter()
        .filter_map(|s| tree.entity(*s).as_slice())
        .any(|s| s.index == slice.index);
    if same_index {
        report.record(
            tree,
            child,
            ViolationCode::DuplicateName,
            format!("slice {} is declared twice", slice.index),
        );
    }

    if slice.action == Action::Delete {
        return;
    }

    let block_size = tree.block_size_of(parent);
    let container = match tree.entity(parent) {
        Entity::Partition(p) => p.size.with_block_size(block_size).sectors(),
        Entity::Disk(Disk { geometry, .. }) => geometry.total_sectors,
        _ => 0,
    };
    let extent = Extent::new(
        slice.start_sector,
        slice.size.with_block_size(block_size).sectors(),
    );
    let others: Vec<Extent> = siblings
        .iter()
        .filter_map(|s| tree.entity(*s).as_slice())
        .filter(|s| s.action != Action::Delete)
        .map(|s| Extent::new(s.start_sector, s.size.with_block_size(block_size).sectors()))
        .collect();

    check_extent(tree, child, extent, &others, container, report);
}

/// Sector range of a partition or slice
#[derive(Debug, Clone, Copy)]
struct Extent {
    start: Option<u64>,
    sectors: u64,
}

impl Extent {
    fn new(start: Option<u64>, sectors: u64) -> Self {
        Self { start, sectors }
    }

    fn end(&self) -> Option<u64> {
        self.start.map(|s| s.saturating_add(self.sectors))
    }

    fn overlaps(&self, other: &Extent) -> bool {
        match (self.start, self.end(), other.start, other.end()) {
            (Some(a0), Some(a1), Some(b0), Some(b1)) => a0 < b1 && b0 < a1,
            _ => false,
        }
    }
}

/// `container` of zero means the size is unknown and bounds are skipped
fn check_extent(
    tree: &TargetTree,
    child: NodeId,
    extent: Extent,
    others: &[Extent],
    container: u64,
    report: &mut ValidationReport,
) {
    if container > 0 {
        let out_of_bounds = match extent.end() {
            Some(end) => end > container,
            None => {
                let used: u64 = others.iter().map(|o| o.sectors).sum();
                used.saturating_add(extent.sectors) > container
            }
        };
        if out_of_bounds {
            report.record(
                tree,
                child,
                ViolationCode::ExtentOutOfBounds,
                format!("{} sectors do not fit in {} sectors", extent.sectors, container),
            );
        }
    }

    if others.iter().any(|o| o.overlaps(&extent)) {
        report.record(
            tree,
            child,
            ViolationCode::ExtentOverlap,
            "overlaps a sibling declared before it",
        );
    }
}

// =============================================================================
// Datasets
// =============================================================================

fn check_dataset(
    tree: &TargetTree,
    child: NodeId,
    dataset: &Dataset,
    siblings: &[NodeId],
    report: &mut ValidationReport,
) {
    let name_ok = !dataset.name.is_empty()
        && !dataset.name.starts_with('/')
        && !dataset.name.ends_with('/')
        && !dataset.name.contains("//")
        && !dataset.name.contains(char::is_whitespace);
    if !name_ok {
        report.record(
            tree,
            child,
            ViolationCode::InvalidName,
            format!("'{}' is not a valid dataset name", dataset.name),
        );
    }

    let clash = siblings
        .iter()
        .filter_map(|s| tree.entity(*s).as_dataset())
        .any(|d| d.name == dataset.name);
    if clash {
        report.record(
            tree,
            child,
            ViolationCode::DuplicateName,
            format!("dataset {} is declared twice in this pool", dataset.name),
        );
    }

    if dataset.is_volume() {
        if dataset.size.is_none() && dataset.action != Action::Delete {
            report.record(
                tree,
                child,
                ViolationCode::MissingVolumeSize,
                format!("volume {} declares no size", dataset.name),
            );
        }
        if dataset.mountpoint.is_some() {
            report.record(
                tree,
                child,
                ViolationCode::InvalidMountpoint,
                "volumes cannot have a mountpoint",
            );
        }
    } else if let Some(mountpoint) = &dataset.mountpoint {
        let valid = mountpoint.starts_with('/') || mountpoint == "none" || mountpoint == "legacy";
        if !valid {
            report.record(
                tree,
                child,
                ViolationCode::InvalidMountpoint,
                format!("mountpoint '{}' must be absolute, 'none' or 'legacy'", mountpoint),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::size::SizeValue;
    use crate::target::{DiskGeometry, Pool};

    fn gib(n: u64) -> SizeValue {
        SizeValue::parse(&format!("{}g", n)).unwrap()
    }

    fn attach_all(tree: &TargetTree, parent: NodeId) -> ValidationReport {
        let mut report = ValidationReport::new();
        let children = tree.children(parent).to_vec();
        for (i, child) in children.iter().enumerate() {
            check_attachment(tree, parent, *child, &children[..i], &mut report);
        }
        report
    }

    fn gpt_disk(tree: &mut TargetTree, total_gib: u64) -> NodeId {
        let mut disk = Disk::new("c0t0d0");
        disk.label = LabelKind::Gpt;
        disk.geometry = DiskGeometry {
            total_sectors: total_gib * 2 * 1024 * 1024,
            ..Default::default()
        };
        let root = tree.root();
        tree.add(root, disk)
    }

    #[test]
    fn test_illegal_parent() {
        let mut tree = TargetTree::new();
        let disk = gpt_disk(&mut tree, 10);
        tree.add(disk, Pool::new("tank"));
        let report = attach_all(&tree, disk);
        assert!(report.has(ViolationCode::IllegalParent));
    }

    #[test]
    fn test_partition_form_and_index() {
        let mut tree = TargetTree::new();
        let disk = gpt_disk(&mut tree, 100);
        tree.add(disk, Partition::new(1, PartitionType::Legacy(191), gib(1)));
        tree.add(disk, Partition::new(200, PartitionType::Gpt("guid".into()), gib(1)));
        let report = attach_all(&tree, disk);
        assert!(report.has(ViolationCode::PartitionTypeMismatch));
        assert!(report.has(ViolationCode::IndexOutOfRange));
    }

    #[test]
    fn test_partition_bounds_and_overlap() {
        let mut tree = TargetTree::new();
        let disk = gpt_disk(&mut tree, 10);
        let guid = PartitionType::Gpt("6a85cf4d-1dd2-11b2-99a6-080020736631".into());

        let mut p0 = Partition::new(0, guid.clone(), gib(4));
        p0.start_sector = Some(256);
        tree.add(disk, p0);
        let mut p1 = Partition::new(1, guid.clone(), gib(4));
        p1.start_sector = Some(1024);
        tree.add(disk, p1);
        let mut p2 = Partition::new(2, guid.clone(), gib(20));
        p2.start_sector = Some(20 * 1024 * 1024);
        tree.add(disk, p2);

        let report = attach_all(&tree, disk);
        assert_eq!(report.with_code(ViolationCode::ExtentOverlap).len(), 1);
        assert_eq!(report.with_code(ViolationCode::ExtentOutOfBounds).len(), 1);
        assert_eq!(
            report.with_code(ViolationCode::ExtentOverlap)[0].location,
            "disk c0t0d0 / partition 1"
        );
    }

    #[test]
    fn test_deleted_partitions_are_ignored_for_extents() {
        let mut tree = TargetTree::new();
        let disk = gpt_disk(&mut tree, 10);
        let guid = PartitionType::Gpt("g".into());
        let mut old = Partition::new(0, guid.clone(), gib(8));
        old.action = Action::Delete;
        tree.add(disk, old);
        tree.add(disk, Partition::new(1, guid, gib(8)));
        assert!(attach_all(&tree, disk).is_valid());
    }

    #[test]
    fn test_slice_rules() {
        let mut tree = TargetTree::new();
        let root = tree.root();
        let disk = tree.add(root, Disk::new("c0t0d0"));
        let part = tree.add(disk, Partition::new(1, PartitionType::Legacy(191), gib(10)));
        tree.add(part, Slice::new(0, gib(6)));
        tree.add(part, Slice::new(2, gib(1)));
        tree.add(part, Slice::new(0, gib(1)));
        tree.add(part, Slice::new(16, gib(6)));

        let report = attach_all(&tree, part);
        assert!(report.has(ViolationCode::ReservedSlice));
        assert!(report.has(ViolationCode::DuplicateName));
        assert!(report.has(ViolationCode::IndexOutOfRange));
        assert!(report.has(ViolationCode::ExtentOutOfBounds));
    }

    #[test]
    fn test_dataset_rules() {
        let mut tree = TargetTree::new();
        let logical = tree.logical_or_insert();
        let pool = tree.add(logical, Pool::root("rpool"));
        tree.add(pool, Dataset::filesystem("export").mounted_at("/export"));
        tree.add(pool, Dataset::filesystem("export"));
        tree.add(pool, Dataset::filesystem("/abs"));
        tree.add(pool, Dataset::filesystem("data").mounted_at("relative"));
        tree.add(pool, Dataset::volume("swap", None));
        tree.add(pool, Dataset::volume("old", None).with_action(Action::Delete));

        let report = attach_all(&tree, pool);
        assert_eq!(report.with_code(ViolationCode::DuplicateName).len(), 1);
        assert_eq!(report.with_code(ViolationCode::InvalidName).len(), 1);
        assert_eq!(report.with_code(ViolationCode::InvalidMountpoint).len(), 1);
        assert_eq!(report.with_code(ViolationCode::MissingVolumeSize).len(), 1);
    }
}
