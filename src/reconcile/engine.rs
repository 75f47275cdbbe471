//! Instantiation Engine
//!
//! Drives the backend until the physical storage matches the desired tree.
//! All checks that can fail without touching storage run in preflight;
//! execution is strictly sequential and stops at the first backend error.

use super::plan::{Operation, Plan, Planner};
use super::varshare::VarSharePolicy;
use crate::config::ReconcileConfig;
use crate::domain::ports::{ProgressSink, ProgressUpdate, StorageBackendRef};
use crate::error::{Error, Result};
use crate::target::{Action, NodeId, TargetTree, Targets};
use crate::validation::Validator;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};

// =============================================================================
// Reconcile Summary
// =============================================================================

/// Outcome of a completed pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileSummary {
    /// Steps executed
    pub steps: usize,
    /// Steps that changed the system
    pub changed: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

// =============================================================================
// Reconciler
// =============================================================================

/// Reconciles a desired tree against a storage backend
pub struct Reconciler {
    backend: StorageBackendRef,
    config: ReconcileConfig,
}

impl Reconciler {
    pub fn new(backend: StorageBackendRef, config: ReconcileConfig) -> Self {
        Self { backend, config }
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Preflight: locate the root pool, apply the var/share policy, check
    /// volume sizes and build the plan. Makes no backend calls.
    pub fn plan(&self, targets: &Targets) -> Result<Plan> {
        let desired = &targets.desired;
        let root_pool = locate_root_pool(desired)?;
        let synthesized = VarSharePolicy::apply(desired, root_pool)?;

        for (id, dataset) in desired.all_datasets() {
            if dataset.is_volume() && dataset.size.is_none() && dataset.action != Action::Delete {
                return Err(Error::Configuration(format!(
                    "{}: volume declares no size",
                    desired.path(id)
                )));
            }
        }

        let plan = Planner::new(&self.config).build(targets, root_pool, &synthesized)?;
        debug!("Planned {} steps", plan.len());
        Ok(plan)
    }

    /// Plan and execute one reconciliation pass.
    ///
    /// The desired tree is not validated here; use `apply` for that.
    /// Partition tables are diffed against `targets.discovered`, so the
    /// discovered tree must be probed again before a following pass.
    pub fn reconcile(
        &self,
        targets: &Targets,
        progress: &mut dyn ProgressSink,
    ) -> Result<ReconcileSummary> {
        let plan = self.plan(targets)?;
        self.execute(&plan, progress)
    }

    /// Validate the desired tree, then reconcile
    pub fn apply(
        &self,
        targets: &Targets,
        validator: &Validator,
        progress: &mut dyn ProgressSink,
    ) -> Result<ReconcileSummary> {
        validator.validate(&targets.desired).into_result()?;
        self.reconcile(targets, progress)
    }

    /// Execute a plan step by step
    pub fn execute(&self, plan: &Plan, progress: &mut dyn ProgressSink) -> Result<ReconcileSummary> {
        let started_at = Utc::now();
        let total = plan.len().max(1);
        let mut changed = 0;

        info!(
            "Reconciling {} steps against {} backend",
            plan.len(),
            self.backend.name()
        );
        progress.report(ProgressUpdate {
            percent: 0,
            status: "starting".to_string(),
            at: Utc::now(),
        });

        for (i, op) in plan.iter().enumerate() {
            info!("Step {}/{}: {}", i + 1, plan.len(), op);
            if self.execute_operation(op)? {
                changed += 1;
            }
            progress.report(ProgressUpdate {
                percent: ((i + 1) * 100 / total) as u8,
                status: op.to_string(),
                at: Utc::now(),
            });
        }

        info!("Reconciliation complete: {} of {} steps changed the system", changed, plan.len());
        Ok(ReconcileSummary {
            steps: plan.len(),
            changed,
            started_at,
            finished_at: Utc::now(),
        })
    }

    /// Run one operation, returning whether it changed anything
    fn execute_operation(&self, op: &Operation) -> Result<bool> {
        let backend = &self.backend;
        match op {
            Operation::WritePartitionTable { disk, entries } => {
                backend.write_partition_table(disk, entries)?;
                Ok(true)
            }
            Operation::Pool {
                name,
                action,
                vdevs,
                mountpoint,
            } => {
                let default_mount = format!("/{}", name);
                let mount = mountpoint.as_deref().unwrap_or(&default_mount);
                match action {
                    Action::Create => {
                        self.destroy_pool(name, mount)?;
                        backend.create_pool(name, vdevs)?;
                        Ok(true)
                    }
                    Action::Delete => self.destroy_pool(name, mount),
                    Action::Preserve => {
                        if backend.pool_exists(name)? {
                            debug!("Pool {} exists, preserving", name);
                            return Ok(false);
                        }
                        backend.create_pool(name, vdevs)?;
                        Ok(true)
                    }
                }
            }
            Operation::Filesystem {
                path,
                action,
                mountpoint,
                properties,
            } => self.reconcile_dataset(path, *action, mountpoint.as_deref(), || {
                backend.create_filesystem(path, mountpoint.as_deref(), properties)
            }),
            Operation::Volume {
                path,
                action,
                size_bytes,
            } => self.reconcile_dataset(path, *action, None, || {
                backend.create_volume(path, *size_bytes)
            }),
            Operation::BootEnvironment {
                pool,
                name,
                mountpoint,
            } => {
                if backend.boot_environment_exists(pool, name)? {
                    return Ok(false);
                }
                backend.create_boot_environment(pool, name, mountpoint.as_deref())?;
                Ok(true)
            }
            Operation::ActivateBootEnvironment { pool, name } => {
                if backend.active_boot_environment(pool)?.as_deref() == Some(name.as_str()) {
                    return Ok(false);
                }
                backend.activate_boot_environment(pool, name)?;
                Ok(true)
            }
        }
    }

    fn reconcile_dataset(
        &self,
        path: &str,
        action: Action,
        mountpoint: Option<&str>,
        create: impl FnOnce() -> Result<()>,
    ) -> Result<bool> {
        match action {
            Action::Create => {
                self.destroy_dataset(path, mountpoint)?;
                create()?;
                Ok(true)
            }
            Action::Delete => self.destroy_dataset(path, mountpoint),
            Action::Preserve => {
                if self.backend.dataset_exists(path)? {
                    debug!("Dataset {} exists, preserving", path);
                    return Ok(false);
                }
                create()?;
                Ok(true)
            }
        }
    }

    /// Destroy a pool; a missing pool is not an error
    fn destroy_pool(&self, name: &str, mountpoint: &str) -> Result<bool> {
        match self.backend.destroy_pool(name, self.config.force_destroy) {
            Ok(()) => {
                self.cleanup_mountpoint(mountpoint);
                Ok(true)
            }
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Destroy a dataset; a missing dataset is not an error
    fn destroy_dataset(&self, path: &str, mountpoint: Option<&str>) -> Result<bool> {
        match self.backend.destroy_dataset(path) {
            Ok(()) => {
                if let Some(mount) = mountpoint {
                    self.cleanup_mountpoint(mount);
                }
                Ok(true)
            }
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Remove an empty mountpoint directory left under the alternate root.
    ///
    /// Failures are logged and otherwise ignored.
    fn cleanup_mountpoint(&self, mountpoint: &str) {
        let Some(alt_root) = &self.config.alt_root else {
            return;
        };
        if !mountpoint.starts_with('/') {
            return;
        }
        let dir = alt_root.join(mountpoint.trim_start_matches('/'));
        if dir == *alt_root || !dir.is_dir() {
            return;
        }
        if let Err(e) = remove_if_empty(&dir) {
            warn!("Failed to clean up mountpoint {}: {}", dir.display(), e);
        }
    }
}

fn remove_if_empty(dir: &Path) -> std::io::Result<()> {
    if std::fs::read_dir(dir)?.next().is_none() {
        std::fs::remove_dir(dir)?;
        debug!("Removed empty mountpoint {}", dir.display());
    }
    Ok(())
}

/// The single pool flagged as root
fn locate_root_pool(tree: &TargetTree) -> Result<NodeId> {
    let roots = tree.root_pools();
    match roots.as_slice() {
        [(id, _)] => Ok(*id),
        [] => Err(Error::Configuration("no root pool declared".into())),
        many => Err(Error::Configuration(format!(
            "{} root pools declared: {}",
            many.len(),
            many.iter()
                .map(|(_, p)| p.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ))),
    }
}

// =============================================================================
// Progress Sinks
// =============================================================================

/// Forwards progress updates to the log
#[derive(Debug, Default)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn report(&mut self, update: ProgressUpdate) {
        info!("[{:>3}%] {}", update.percent, update.status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendCall, MemoryBackend};
    use crate::domain::ports::{PartitionEntry, StorageBackend, VdevSpec};
    use crate::domain::size::SizeValue;
    use crate::target::{
        BootEnvironment, Dataset, Disk, Entity, EntityKind, LabelKind, Partition, PartitionType,
        Pool, PoolMembership, Vdev, VdevKind,
    };
    use assert_matches::assert_matches;
    use std::sync::Arc;

    fn reconciler(backend: &Arc<MemoryBackend>) -> Reconciler {
        Reconciler::new(backend.clone(), ReconcileConfig::default())
    }

    fn mirror_tree() -> TargetTree {
        let mut tree = TargetTree::new();
        let root = tree.root();
        for id in ["c0t0d0", "c0t1d0"] {
            tree.add(
                root,
                Disk::new(id).whole_disk_in(PoolMembership::new("rpool").in_vdev("mirror-0")),
            );
        }
        let logical = tree.logical_or_insert();
        let pool = tree.add(logical, Pool::root("rpool"));
        tree.add(pool, Vdev::new("mirror-0", VdevKind::Mirror));
        tree.add(pool, Dataset::filesystem("export").mounted_at("/export"));
        tree.add(pool, BootEnvironment::new("solaris"));
        tree
    }

    /// Root pool on GPT partition 0 of c0t0d0, every node preserved
    fn partitioned_tree() -> TargetTree {
        let mut tree = TargetTree::new();
        let root = tree.root();
        let mut disk = Disk::new("c0t0d0");
        disk.label = LabelKind::Gpt;
        disk.geometry.total_sectors = 64 * 1024 * 1024;
        let disk = tree.add(root, disk);
        let mut partition = Partition::new(
            0,
            PartitionType::Gpt("6a85cf4d-1dd2-11b2-99a6-080020736631".into()),
            SizeValue::parse("8g").unwrap(),
        );
        partition.action = Action::Preserve;
        partition.membership = Some(PoolMembership::new("rpool"));
        tree.add(disk, partition);
        let logical = tree.logical_or_insert();
        let pool = tree.add(logical, Pool::root("rpool").with_action(Action::Preserve));
        tree.add(pool, BootEnvironment::new("solaris"));
        tree
    }

    /// Discovered tree as a fresh disk scan reports it after a pass
    fn rescan(desired: &TargetTree, backend: &MemoryBackend) -> TargetTree {
        let mut tree = desired.clone();
        let partitions = tree.nodes_of_kind(EntityKind::Partition);
        for id in partitions {
            let disk = tree.parent(id).unwrap();
            let disk = tree.entity(disk).as_disk().unwrap().id.clone();
            let entries = backend.partition_table(&disk).unwrap_or_default();
            if let Entity::Partition(partition) = tree.entity_mut(id) {
                let index = partition.index as usize;
                if let Some(PartitionEntry::Gpt { start_sector, .. }) = entries.get(index) {
                    partition.start_sector = Some(*start_sector);
                }
            }
        }
        tree
    }

    #[test]
    fn test_mirror_pool_created_before_datasets() {
        let backend = Arc::new(MemoryBackend::new());
        let targets = Targets::new(TargetTree::new(), mirror_tree());
        let mut progress = Vec::new();

        reconciler(&backend).reconcile(&targets, &mut progress).unwrap();

        let calls = backend.calls();
        let create_pool = calls
            .iter()
            .position(|c| {
                *c == BackendCall::CreatePool {
                    name: "rpool".into(),
                    vdevs: vec![VdevSpec {
                        kind: VdevKind::Mirror,
                        members: vec!["c0t0d0".into(), "c0t1d0".into()],
                    }],
                }
            })
            .expect("create_pool was called");
        let first_dataset = calls
            .iter()
            .position(|c| matches!(c, BackendCall::CreateFilesystem { .. }))
            .unwrap();
        assert!(create_pool < first_dataset);
        assert!(backend.dataset_paths().contains(&"rpool/export".to_string()));
        assert_eq!(
            backend.active_boot_environment("rpool").unwrap().as_deref(),
            Some("solaris")
        );
    }

    #[test]
    fn test_progress_is_monotonic() {
        let backend = Arc::new(MemoryBackend::new());
        let targets = Targets::new(TargetTree::new(), mirror_tree());
        let mut progress: Vec<ProgressUpdate> = Vec::new();

        let summary = reconciler(&backend).reconcile(&targets, &mut progress).unwrap();

        assert_eq!(progress.len(), summary.steps + 1);
        assert!(progress.windows(2).all(|w| w[0].percent <= w[1].percent));
        assert_eq!(progress.last().unwrap().percent, 100);
    }

    #[test]
    fn test_var_volume_fails_before_backend_calls() {
        let mut desired = mirror_tree();
        let (pool, _) = desired.find_pool("rpool").unwrap();
        desired.add(pool, Dataset::volume("var", Some(SizeValue::parse("1g").unwrap())));

        let backend = Arc::new(MemoryBackend::new());
        let targets = Targets::new(TargetTree::new(), desired);
        let result = reconciler(&backend).reconcile(&targets, &mut Vec::new());

        assert_matches!(result, Err(Error::Configuration(_)));
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn test_volume_without_size_fails_in_preflight() {
        let mut desired = mirror_tree();
        let (pool, _) = desired.find_pool("rpool").unwrap();
        desired.add(pool, Dataset::volume("swap", None));

        let backend = Arc::new(MemoryBackend::new());
        let targets = Targets::new(TargetTree::new(), desired);
        let err = reconciler(&backend).plan(&targets).unwrap_err();
        assert!(err.is_configuration());
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn test_preserve_run_is_idempotent() {
        let mut desired = mirror_tree();
        let (pool, _) = desired.find_pool("rpool").unwrap();
        if let crate::target::Entity::Pool(p) = desired.entity_mut(pool) {
            p.action = Action::Preserve;
        }
        let ids: Vec<NodeId> = desired.all_datasets().into_iter().map(|(id, _)| id).collect();
        for id in ids {
            if let crate::target::Entity::Dataset(d) = desired.entity_mut(id) {
                d.action = Action::Preserve;
            }
        }

        let backend = Arc::new(MemoryBackend::new());
        let targets = Targets::new(TargetTree::new(), desired);
        let reconciler = reconciler(&backend);

        let first = reconciler.reconcile(&targets, &mut Vec::new()).unwrap();
        assert!(first.changed > 0);
        backend.clear_calls();

        let second = reconciler.reconcile(&targets, &mut Vec::new()).unwrap();
        assert_eq!(second.changed, 0);
        assert!(backend.mutating_calls().is_empty());
    }

    #[test]
    fn test_whole_disk_root_pool_scenario() {
        let mut desired = TargetTree::new();
        let root = desired.root();
        desired.add(root, Disk::new("d1").whole_disk_in(PoolMembership::new("rpool")));
        let logical = desired.logical_or_insert();
        desired.add(logical, Pool::root("rpool"));

        let backend = Arc::new(MemoryBackend::new());
        backend.seed_pool("rpool", vec![]);
        let mut config = ReconcileConfig::default();
        config.activate_boot_environment = false;
        let reconciler = Reconciler::new(backend.clone(), config);

        let targets = Targets::new(TargetTree::new(), desired);
        reconciler.reconcile(&targets, &mut Vec::new()).unwrap();

        let mut noauto = indexmap::IndexMap::new();
        noauto.insert("canmount".to_string(), "noauto".to_string());
        assert_eq!(
            backend.mutating_calls(),
            vec![
                BackendCall::DestroyPool {
                    name: "rpool".into(),
                    force: true,
                },
                BackendCall::CreatePool {
                    name: "rpool".into(),
                    vdevs: vec![VdevSpec {
                        kind: VdevKind::Plain,
                        members: vec!["d1".into()],
                    }],
                },
                BackendCall::CreateFilesystem {
                    path: "rpool/VARSHARE".into(),
                    mountpoint: Some("/var/share".into()),
                    properties: noauto,
                },
                BackendCall::CreateBootEnvironment {
                    pool: "rpool".into(),
                    name: "solaris".into(),
                },
                BackendCall::CreateFilesystem {
                    path: "rpool/ROOT/solaris/var".into(),
                    mountpoint: Some("/var".into()),
                    properties: indexmap::IndexMap::new(),
                },
            ]
        );
        assert!(!backend.dataset_paths().contains(&"rpool/var".to_string()));
    }

    #[test]
    fn test_backend_failure_aborts_with_diagnostic() {
        let backend = Arc::new(MemoryBackend::new());
        backend.fail_on("create_pool", "rpool", "cannot create 'rpool': no such device");
        let targets = Targets::new(TargetTree::new(), mirror_tree());

        let err = reconciler(&backend)
            .reconcile(&targets, &mut Vec::new())
            .unwrap_err();
        assert_matches!(&err, Error::Backend { operation, .. } if operation == "create_pool");
        assert!(err.to_string().contains("no such device"));
        assert!(!backend
            .calls()
            .iter()
            .any(|c| matches!(c, BackendCall::CreateFilesystem { .. })));
    }

    #[test]
    fn test_apply_validates_first() {
        let mut desired = mirror_tree();
        let logical = desired.logical_or_insert();
        desired.add(logical, Pool::root("second"));

        let backend = Arc::new(MemoryBackend::new());
        let targets = Targets::new(TargetTree::new(), desired);
        let result = reconciler(&backend).apply(&targets, &Validator::default(), &mut Vec::new());

        assert_matches!(result, Err(Error::Validation { .. }));
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn test_destroy_cleans_empty_mountpoint() {
        let alt_root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(alt_root.path().join("export")).unwrap();

        let backend = Arc::new(MemoryBackend::new());
        backend.seed_pool("rpool", vec![]);
        backend.seed_dataset("rpool/export");

        let mut desired = mirror_tree();
        let (pool, _) = desired.find_pool("rpool").unwrap();
        if let crate::target::Entity::Pool(p) = desired.entity_mut(pool) {
            p.action = Action::Preserve;
        }
        let ids: Vec<NodeId> = desired.all_datasets().into_iter().map(|(id, _)| id).collect();
        for id in ids {
            if let crate::target::Entity::Dataset(d) = desired.entity_mut(id) {
                d.action = Action::Delete;
            }
        }

        let mut config = ReconcileConfig::default();
        config.alt_root = Some(alt_root.path().to_path_buf());
        let reconciler = Reconciler::new(backend.clone(), config);
        let targets = Targets::new(TargetTree::new(), desired);
        reconciler.reconcile(&targets, &mut Vec::new()).unwrap();

        assert!(!alt_root.path().join("export").exists());
        assert!(!backend.dataset_paths().contains(&"rpool/export".to_string()));
    }

    #[test]
    fn test_partitioned_run_is_idempotent_after_rescan() {
        let desired = partitioned_tree();
        let backend = Arc::new(MemoryBackend::new());
        let reconciler = reconciler(&backend);

        let targets = Targets::new(TargetTree::new(), desired.clone());
        let first = reconciler.reconcile(&targets, &mut Vec::new()).unwrap();
        assert!(first.changed > 0);
        assert_matches!(
            backend.partition_table("c0t0d0").as_deref(),
            Some([PartitionEntry::Gpt {
                start_sector: 256,
                ..
            }])
        );
        backend.clear_calls();

        let targets = Targets::new(rescan(&desired, &backend), desired);
        let second = reconciler.reconcile(&targets, &mut Vec::new()).unwrap();
        assert_eq!(second.changed, 0);
        assert!(backend.mutating_calls().is_empty());
    }

    #[test]
    fn test_preserved_partition_table_is_not_rewritten() {
        let desired = partitioned_tree();
        let mut discovered = desired.clone();
        let partition = discovered.nodes_of_kind(EntityKind::Partition)[0];
        if let Entity::Partition(p) = discovered.entity_mut(partition) {
            p.start_sector = Some(2048);
        }

        let backend = Arc::new(MemoryBackend::new());
        backend.seed_from(&discovered);
        let targets = Targets::new(discovered, desired);
        reconciler(&backend).reconcile(&targets, &mut Vec::new()).unwrap();

        assert!(!backend
            .calls()
            .iter()
            .any(|c| matches!(c, BackendCall::WritePartitionTable { .. })));
        assert!(backend.partition_table("c0t0d0").is_none());
        assert!(!backend
            .mutating_calls()
            .iter()
            .any(|c| matches!(c, BackendCall::CreatePool { .. } | BackendCall::DestroyPool { .. })));
    }
}
