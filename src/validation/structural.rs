//! Structural Phase
//!
//! Whole-tree invariants evaluated directly against the desired tree.

use super::report::{ValidationReport, ViolationCode};
use crate::config::ValidatorConfig;
use crate::target::{
    Action, EntityKind, PartitionType, TargetTree, VolumeUse, RESERVED_DATASETS,
};
use crate::topology::TopologyBuilder;
use std::collections::{HashMap, HashSet};

/// Run every structural check
pub fn check(tree: &TargetTree, config: &ValidatorConfig, report: &mut ValidationReport) {
    check_root_pool(tree, report);
    check_boot_environments(tree, report);
    check_whole_disks(tree, report);
    check_active_partition(tree, config, report);
    check_reserved_datasets(tree, report);
    check_unique_names(tree, report);
    check_memberships(tree, report);
    check_vdevs(tree, report);
    check_swap_dump(tree, report);
}

// =============================================================================
// Pools and Boot Environments
// =============================================================================

fn check_root_pool(tree: &TargetTree, report: &mut ValidationReport) {
    let roots = tree.root_pools();
    match roots.len() {
        1 => {}
        0 => report.record_global(ViolationCode::RootPoolCount, "no pool is marked is_root"),
        n => {
            for (id, _) in &roots {
                report.record(
                    tree,
                    *id,
                    ViolationCode::RootPoolCount,
                    format!("{} pools are marked is_root; exactly one is allowed", n),
                );
            }
        }
    }
}

fn check_boot_environments(tree: &TargetTree, report: &mut ValidationReport) {
    let roots = tree.root_pools();
    if let [(root, pool)] = roots.as_slice() {
        if tree.boot_environments(*root).is_empty() {
            report.record(
                tree,
                *root,
                ViolationCode::MissingBootEnvironment,
                format!("root pool {} declares no boot environment", pool.name),
            );
        }
    }

    for be in tree.nodes_of_kind(EntityKind::BootEnvironment) {
        let in_root_pool = tree
            .ancestor_of_kind(be, EntityKind::Pool)
            .and_then(|p| tree.entity(p).as_pool())
            .map(|p| p.is_root)
            .unwrap_or(false);
        if !in_root_pool {
            report.record(
                tree,
                be,
                ViolationCode::BootEnvironmentPlacement,
                "boot environments may only be declared in the root pool",
            );
        }
    }
}

// =============================================================================
// Disks and Partitions
// =============================================================================

fn check_whole_disks(tree: &TargetTree, report: &mut ValidationReport) {
    for (id, disk) in tree.disks() {
        let Some(membership) = disk.membership.as_ref().filter(|_| disk.whole_disk) else {
            continue;
        };
        let owner_is_root = tree
            .find_pool(&membership.pool)
            .map(|(_, p)| p.is_root)
            .unwrap_or(false);
        if owner_is_root {
            continue;
        }
        let live_children = tree
            .children(id)
            .iter()
            .filter(|c| tree.entity(**c).action() != Some(Action::Delete))
            .count();
        if live_children > 0 {
            report.record(
                tree,
                id,
                ViolationCode::WholeDiskConflict,
                format!(
                    "disk is whole-disk owned by pool {} but declares {} partition/slice(s)",
                    membership.pool, live_children
                ),
            );
        }
    }
}

fn check_active_partition(
    tree: &TargetTree,
    config: &ValidatorConfig,
    report: &mut ValidationReport,
) {
    if !config.require_active_partition {
        return;
    }

    let primary = PartitionType::Legacy(config.primary_os_partition_type);
    let candidates: Vec<_> = tree
        .nodes_of_kind(EntityKind::Partition)
        .into_iter()
        .filter_map(|id| tree.entity(id).as_partition().map(|p| (id, p)))
        .filter(|(_, p)| p.part_type == primary && p.action != Action::Delete)
        .collect();

    if candidates.is_empty() {
        return;
    }

    let active = candidates.iter().filter(|(_, p)| p.active).count();
    if active != 1 {
        report.record_global(
            ViolationCode::ActivePartition,
            format!(
                "exactly one partition of type {} must be active, found {}",
                config.primary_os_partition_type, active
            ),
        );
    }
}

// =============================================================================
// Datasets
// =============================================================================

fn check_reserved_datasets(tree: &TargetTree, report: &mut ValidationReport) {
    for (id, dataset) in tree.all_datasets() {
        let Some(reserved) = RESERVED_DATASETS
            .iter()
            .find(|r| r.matches_name(&dataset.name))
        else {
            continue;
        };
        if let Some(conflict) = reserved.declaration_conflict(dataset) {
            report.record(tree, id, ViolationCode::ReservedDataset, conflict);
        }
    }
}

fn check_swap_dump(tree: &TargetTree, report: &mut ValidationReport) {
    let logical = tree.logical_entity().cloned().unwrap_or_default();
    let mut dumps = Vec::new();

    for (id, dataset) in tree.all_datasets() {
        if !dataset.is_volume() || dataset.action == Action::Delete {
            continue;
        }
        match dataset.usage {
            VolumeUse::Swap if logical.no_swap => report.record(
                tree,
                id,
                ViolationCode::SwapDump,
                "swap volume declared while no_swap is set",
            ),
            VolumeUse::Dump if logical.no_dump => report.record(
                tree,
                id,
                ViolationCode::SwapDump,
                "dump volume declared while no_dump is set",
            ),
            VolumeUse::Dump => dumps.push(id),
            _ => {}
        }
    }

    if dumps.len() > 1 {
        for id in dumps {
            report.record(tree, id, ViolationCode::SwapDump, "only one dump volume is allowed");
        }
    }
}

// =============================================================================
// Names and References
// =============================================================================

fn check_unique_names(tree: &TargetTree, report: &mut ValidationReport) {
    let mut disks: HashMap<&str, usize> = HashMap::new();
    for (id, disk) in tree.disks() {
        let seen = disks.entry(disk.id.as_str()).or_insert(0);
        *seen += 1;
        if *seen == 2 {
            report.record(
                tree,
                id,
                ViolationCode::DuplicateName,
                format!("disk {} is declared more than once", disk.id),
            );
        }
    }

    let mut pools: HashSet<&str> = HashSet::new();
    for (id, pool) in tree.pools() {
        if !pools.insert(pool.name.as_str()) {
            report.record(
                tree,
                id,
                ViolationCode::DuplicateName,
                format!("pool {} is declared more than once", pool.name),
            );
        }
    }
}

fn check_memberships(tree: &TargetTree, report: &mut ValidationReport) {
    for id in tree.preorder(tree.root()) {
        let Some(membership) = tree.entity(id).membership() else {
            continue;
        };
        if tree.find_pool(&membership.pool).is_none() {
            report.record(
                tree,
                id,
                ViolationCode::UnknownPool,
                format!("references undeclared pool {}", membership.pool),
            );
        }
    }
}

fn check_vdevs(tree: &TargetTree, report: &mut ValidationReport) {
    for (pool_id, pool) in tree.pools() {
        let Ok(topology) = TopologyBuilder::build(tree, pool_id) else {
            continue;
        };

        if pool.action == Action::Create && topology.is_empty() {
            report.record(
                tree,
                pool_id,
                ViolationCode::EmptyPool,
                format!("pool {} is to be created but has no member devices", pool.name),
            );
        }

        let used: HashSet<&str> = topology
            .groups
            .iter()
            .filter_map(|g| g.key.as_deref())
            .collect();

        for vdev_id in tree.children(pool_id) {
            let Some(vdev) = tree.entity(*vdev_id).as_vdev() else {
                continue;
            };
            if !used.contains(vdev.name.as_str()) {
                report.record(
                    tree,
                    *vdev_id,
                    ViolationCode::EmptyVdev,
                    format!("vdev {} has no member devices", vdev.name),
                );
            }
        }
    }
}
