//! Reconciliation Plan
//!
//! Ordered list of backend steps derived from the desired and discovered
//! trees. Order: partition tables, pools, shared filesystems (parents
//! first) and volumes, boot environments, datasets living inside the boot
//! environment, boot environment activation.

use crate::config::ReconcileConfig;
use crate::domain::ports::{PartitionEntry, VdevSpec};
use crate::error::{Error, Result};
use crate::target::{
    boot_environment_dataset, Action, Dataset, Entity, NodeId, Partition, PartitionType,
    TargetTree, Targets,
};
use crate::topology::TopologyBuilder;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

// =============================================================================
// Operations
// =============================================================================

/// One unit of work against the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    WritePartitionTable {
        disk: String,
        entries: Vec<PartitionEntry>,
    },
    Pool {
        name: String,
        action: Action,
        vdevs: Vec<VdevSpec>,
        /// Mountpoint used for cleanup after a destroy
        mountpoint: Option<String>,
    },
    Filesystem {
        path: String,
        action: Action,
        mountpoint: Option<String>,
        properties: IndexMap<String, String>,
    },
    Volume {
        path: String,
        action: Action,
        size_bytes: u64,
    },
    BootEnvironment {
        pool: String,
        name: String,
        mountpoint: Option<String>,
    },
    ActivateBootEnvironment {
        pool: String,
        name: String,
    },
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::WritePartitionTable { disk, entries } => {
                write!(f, "write partition table on {} ({} entries)", disk, entries.len())
            }
            Operation::Pool {
                name,
                action,
                vdevs,
                ..
            } => {
                let layout: Vec<String> = vdevs.iter().map(|v| v.to_string()).collect();
                write!(f, "{} pool {} {}", action, name, layout.join(" "))
            }
            Operation::Filesystem {
                path,
                action,
                mountpoint,
                ..
            } => write!(
                f,
                "{} filesystem {} at {}",
                action,
                path,
                mountpoint.as_deref().unwrap_or("<inherited>")
            ),
            Operation::Volume {
                path,
                action,
                size_bytes,
            } => write!(f, "{} volume {} ({} bytes)", action, path, size_bytes),
            Operation::BootEnvironment { pool, name, .. } => {
                write!(f, "ensure boot environment {} in {}", name, pool)
            }
            Operation::ActivateBootEnvironment { pool, name } => {
                write!(f, "activate boot environment {} in {}", name, pool)
            }
        }
    }
}

/// Ordered steps of one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub operations: Vec<Operation>,
}

impl Plan {
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Operation> {
        self.operations.iter()
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, op) in self.operations.iter().enumerate() {
            writeln!(f, "{:>3}. {}", i + 1, op)?;
        }
        Ok(())
    }
}

// =============================================================================
// Planner
// =============================================================================

/// Builds plans from a pair of trees
pub struct Planner<'a> {
    config: &'a ReconcileConfig,
}

impl<'a> Planner<'a> {
    pub fn new(config: &'a ReconcileConfig) -> Self {
        Self { config }
    }

    /// Build the plan.
    ///
    /// `synthesized` are extra filesystems placed in `root_pool`.
    pub fn build(
        &self,
        targets: &Targets,
        root_pool: NodeId,
        synthesized: &[Dataset],
    ) -> Result<Plan> {
        let desired = &targets.desired;
        let mut operations = self.partition_tables(desired, &targets.discovered)?;

        for (pool_id, pool) in desired.pools() {
            let topology = TopologyBuilder::build(desired, pool_id)?;
            if pool.action == Action::Create && topology.is_empty() {
                return Err(Error::Configuration(format!(
                    "pool {} has no member devices",
                    pool.name
                )));
            }
            operations.push(Operation::Pool {
                name: pool.name.clone(),
                action: pool.action,
                vdevs: topology.vdev_specs(),
                mountpoint: pool.mountpoint.clone(),
            });
        }

        let declared_bes: Vec<(String, Option<String>)> = desired
            .boot_environments(root_pool)
            .into_iter()
            .map(|(_, be)| (be.name.clone(), be.mountpoint.clone()))
            .collect();
        let host = declared_bes
            .first()
            .map(|(name, _)| name.as_str())
            .unwrap_or(self.config.boot_environment.as_str());

        let mut shared = DatasetSteps::default();
        let mut in_be = DatasetSteps::default();
        for (pool_id, pool) in desired.pools() {
            if pool.action == Action::Delete {
                continue;
            }
            let extra: &[Dataset] = if pool_id == root_pool { synthesized } else { &[] };
            let declared = desired.datasets(pool_id).into_iter().map(|(_, d)| d);

            for dataset in declared.chain(extra.iter()) {
                if !dataset.in_be {
                    shared.push(format!("{}/{}", pool.name, dataset.name), dataset)?;
                    continue;
                }
                if pool_id != root_pool {
                    return Err(Error::Configuration(format!(
                        "{}/{} belongs to a boot environment but {} is not the root pool",
                        pool.name, dataset.name, pool.name
                    )));
                }
                let parent = boot_environment_dataset(&pool.name, host);
                in_be.push(format!("{}/{}", parent, dataset.name), dataset)?;
            }
        }
        let needs_host = !in_be.is_empty();
        operations.extend(shared.into_operations());

        if let Some(pool) = desired
            .entity(root_pool)
            .as_pool()
            .filter(|p| p.action != Action::Delete)
        {
            let mut bes = declared_bes.clone();
            if bes.is_empty() && needs_host {
                bes.push((host.to_string(), None));
            }
            for (name, mountpoint) in &bes {
                operations.push(Operation::BootEnvironment {
                    pool: pool.name.clone(),
                    name: name.clone(),
                    mountpoint: mountpoint.clone(),
                });
            }
            operations.extend(in_be.into_operations());
            if let (true, Some((first, _))) = (self.config.activate_boot_environment, bes.first()) {
                operations.push(Operation::ActivateBootEnvironment {
                    pool: pool.name.clone(),
                    name: first.clone(),
                });
            }
        }

        Ok(Plan { operations })
    }

    /// Partition table writes for disks whose layout changes.
    ///
    /// Preserved partitions keep the extent found on disk; a disk whose
    /// partitions are all preserved and present is left alone.
    fn partition_tables(
        &self,
        desired: &TargetTree,
        discovered: &TargetTree,
    ) -> Result<Vec<Operation>> {
        let mut operations = Vec::new();
        for (disk_id, disk) in desired.disks() {
            let partitions: Vec<&Partition> = desired
                .children(disk_id)
                .iter()
                .filter_map(|c| desired.entity(*c).as_partition())
                .collect();
            if partitions.is_empty() {
                continue;
            }

            let current = discovered
                .find_disk(&disk.id)
                .map(|(id, _)| self.place(discovered, id, Starts::AsFound, &HashMap::new()))
                .unwrap_or_default();
            let found: HashMap<u8, (u64, u64)> = current
                .iter()
                .map(|p| (p.index, (p.start, p.sectors)))
                .collect();

            for partition in partitions.iter().filter(|p| p.action == Action::Preserve) {
                if let (Some((start, _)), Some(declared)) =
                    (found.get(&partition.index), partition.start_sector)
                {
                    if *start != declared {
                        return Err(Error::Configuration(format!(
                            "{}: preserved partition {} starts at sector {}, not {}",
                            disk.id, partition.index, start, declared
                        )));
                    }
                }
            }

            let placed = self.place(desired, disk_id, Starts::Aligned, &found);
            for kept in placed.iter().filter(|p| p.pinned) {
                if let Some(other) = placed
                    .iter()
                    .find(|p| p.index != kept.index && p.overlaps(kept))
                {
                    return Err(Error::Configuration(format!(
                        "{}: partition {} overlaps preserved partition {}",
                        disk.id, other.index, kept.index
                    )));
                }
            }

            let removes_existing = partitions
                .iter()
                .any(|p| p.action == Action::Delete && found.contains_key(&p.index));
            if placed.iter().all(|p| p.pinned) && !removes_existing {
                debug!("Partition table of {} is preserved", disk.id);
                continue;
            }

            let entries: Vec<PartitionEntry> = placed.iter().map(|p| p.entry.clone()).collect();
            let current: Vec<PartitionEntry> = current.into_iter().map(|p| p.entry).collect();
            if entries == current {
                continue;
            }

            let per_cylinder = disk.geometry.sectors_per_cylinder();
            if let Some(kept) = placed.iter().find(|p| {
                p.pinned
                    && matches!(p.entry, PartitionEntry::Legacy { .. })
                    && p.start % per_cylinder != 0
            }) {
                return Err(Error::Configuration(format!(
                    "{}: preserved partition {} starts at sector {}, off a cylinder boundary",
                    disk.id, kept.index, kept.start
                )));
            }

            operations.push(Operation::WritePartitionTable {
                disk: disk.id.clone(),
                entries,
            });
        }
        Ok(operations)
    }

    /// Table entries of a disk, laying out partitions without a start sector
    /// after the previous one
    pub fn partition_entries(&self, tree: &TargetTree, disk: NodeId) -> Vec<PartitionEntry> {
        self.place(tree, disk, Starts::Aligned, &HashMap::new())
            .into_iter()
            .map(|p| p.entry)
            .collect()
    }

    /// Place the partitions of `disk`. Preserved partitions listed in
    /// `found` (index to start and sector count) keep that extent.
    fn place(
        &self,
        tree: &TargetTree,
        disk: NodeId,
        starts: Starts,
        found: &HashMap<u8, (u64, u64)>,
    ) -> Vec<Placement> {
        let Some(geometry) = tree.entity(disk).as_disk().map(|d| &d.geometry) else {
            return Vec::new();
        };
        let block_size = geometry.block_size.max(1);
        let per_cylinder = geometry.sectors_per_cylinder();

        let mut gpt_cursor = self.config.layout.gpt_start_offset;
        let mut legacy_cursor = self.config.layout.legacy_start_offset;
        let mut placed = Vec::new();

        for child in tree.children(disk) {
            let Entity::Partition(partition) = tree.entity(*child) else {
                continue;
            };
            if partition.action == Action::Delete {
                continue;
            }
            let pinned = match partition.action {
                Action::Preserve => found.get(&partition.index).copied(),
                _ => None,
            };
            let sectors = match pinned {
                Some((_, sectors)) => sectors,
                None => partition.size.with_block_size(block_size).sectors(),
            };

            let (start, entry) = match &partition.part_type {
                PartitionType::Gpt(guid) => {
                    let start = pinned
                        .map(|(start, _)| start)
                        .or(partition.start_sector)
                        .unwrap_or(gpt_cursor);
                    let end = start + sectors.saturating_sub(1);
                    gpt_cursor = end + 1;
                    let entry = PartitionEntry::Gpt {
                        type_guid: guid.clone(),
                        start_sector: start,
                        end_sector: end,
                        name: partition.name.clone().unwrap_or_default(),
                    };
                    (start, entry)
                }
                PartitionType::Legacy(type_id) => {
                    let start = match (pinned, partition.start_sector) {
                        (Some((start, _)), _) => start,
                        (None, Some(start)) if starts == Starts::AsFound => start,
                        (None, declared) => {
                            align_up(declared.unwrap_or(legacy_cursor), per_cylinder)
                        }
                    };
                    legacy_cursor = start + sectors;
                    let entry = PartitionEntry::Legacy {
                        type_id: *type_id,
                        start_cylinder: start / per_cylinder,
                        size_sectors: sectors,
                        active: partition.active,
                    };
                    (start, entry)
                }
            };

            placed.push(Placement {
                index: partition.index,
                pinned: pinned.is_some(),
                start,
                sectors,
                entry,
            });
        }
        placed
    }
}

/// How declared start sectors are read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Starts {
    /// Probed table: partitions are where they say they are
    AsFound,
    /// Desired table: legacy starts move up to a cylinder boundary
    Aligned,
}

/// A partition placed on its disk
#[derive(Debug, Clone)]
struct Placement {
    index: u8,
    /// Extent taken over from the discovered table
    pinned: bool,
    start: u64,
    sectors: u64,
    entry: PartitionEntry,
}

impl Placement {
    fn overlaps(&self, other: &Placement) -> bool {
        self.start < other.start + other.sectors && other.start < self.start + self.sectors
    }
}

/// Round up to a cylinder boundary; cylinder 0 holds the table itself
fn align_up(sector: u64, per_cylinder: u64) -> u64 {
    sector.max(1).div_ceil(per_cylinder) * per_cylinder
}

/// Dataset steps sharing one parent: filesystems parent-first, then volumes
#[derive(Debug, Default)]
struct DatasetSteps {
    filesystems: Vec<(usize, Operation)>,
    volumes: Vec<Operation>,
}

impl DatasetSteps {
    fn push(&mut self, path: String, dataset: &Dataset) -> Result<()> {
        if dataset.is_volume() {
            let size = dataset
                .size
                .as_ref()
                .ok_or_else(|| Error::Configuration(format!("volume {} has no size", path)))?;
            self.volumes.push(Operation::Volume {
                path,
                action: dataset.action,
                size_bytes: size.bytes_u64(),
            });
        } else {
            self.filesystems.push((
                dataset.depth(),
                Operation::Filesystem {
                    path,
                    action: dataset.action,
                    mountpoint: dataset.mountpoint.clone(),
                    properties: dataset.properties.clone(),
                },
            ));
        }
        Ok(())
    }

    fn is_empty(&self) -> bool {
        self.filesystems.is_empty() && self.volumes.is_empty()
    }

    fn into_operations(mut self) -> impl Iterator<Item = Operation> {
        self.filesystems.sort_by_key(|(depth, _)| *depth);
        self.filesystems
            .into_iter()
            .map(|(_, op)| op)
            .chain(self.volumes)
    }
}
