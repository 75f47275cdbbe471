//! In-Memory Backend
//!
//! Models pools, datasets, partition tables and boot environments in
//! process and records every call, so plans can be dry-run and reconcile
//! passes asserted on.

use crate::domain::ports::{PartitionEntry, StorageBackend, VdevSpec};
use crate::error::{Error, Result};
use crate::target::{boot_environment_dataset, TargetTree};
use crate::topology::TopologyBuilder;
use indexmap::{IndexMap, IndexSet};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

// =============================================================================
// Call Log
// =============================================================================

/// One recorded backend call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum BackendCall {
    PoolExists { name: String },
    CreatePool { name: String, vdevs: Vec<VdevSpec> },
    DestroyPool { name: String, force: bool },
    DatasetExists { path: String },
    CreateFilesystem {
        path: String,
        mountpoint: Option<String>,
        properties: IndexMap<String, String>,
    },
    CreateVolume { path: String, size_bytes: u64 },
    DestroyDataset { path: String },
    WritePartitionTable { disk: String, entries: Vec<PartitionEntry> },
    BootEnvironmentExists { pool: String, name: String },
    CreateBootEnvironment { pool: String, name: String },
    ActiveBootEnvironment { pool: String },
    ActivateBootEnvironment { pool: String, name: String },
}

impl BackendCall {
    /// Whether the call changes state
    pub fn is_mutating(&self) -> bool {
        !matches!(
            self,
            BackendCall::PoolExists { .. }
                | BackendCall::DatasetExists { .. }
                | BackendCall::BootEnvironmentExists { .. }
                | BackendCall::ActiveBootEnvironment { .. }
        )
    }
}

// =============================================================================
// Memory Backend
// =============================================================================

#[derive(Debug, Default)]
struct State {
    pools: IndexMap<String, Vec<VdevSpec>>,
    datasets: IndexSet<String>,
    partition_tables: HashMap<String, Vec<PartitionEntry>>,
    boot_environments: IndexMap<String, Vec<String>>,
    active: HashMap<String, String>,
    calls: Vec<BackendCall>,
    /// Injected failures: (operation, target) -> diagnostic
    failures: HashMap<(String, String), String>,
}

impl State {
    fn check_failure(&self, operation: &str, target: &str) -> Result<()> {
        match self
            .failures
            .get(&(operation.to_string(), target.to_string()))
        {
            Some(diagnostic) => Err(Error::backend(operation, target, diagnostic.clone())),
            None => Ok(()),
        }
    }

    fn require_pool(&self, operation: &str, path: &str) -> Result<()> {
        let pool = path.split('/').next().unwrap_or(path);
        if self.pools.contains_key(pool) {
            Ok(())
        } else {
            Err(Error::backend(
                operation,
                path,
                format!("cannot open '{}': no such pool", pool),
            ))
        }
    }
}

/// Backend keeping all state in memory
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<State>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend a pool already exists
    pub fn seed_pool(&self, name: &str, vdevs: Vec<VdevSpec>) {
        self.state.lock().pools.insert(name.to_string(), vdevs);
    }

    /// Pretend a dataset already exists
    pub fn seed_dataset(&self, path: &str) {
        self.state.lock().datasets.insert(path.to_string());
    }

    /// Seed pools, datasets and boot environments from a discovered tree
    pub fn seed_from(&self, discovered: &TargetTree) {
        let mut state = self.state.lock();
        for (pool_id, pool) in discovered.pools() {
            let vdevs = TopologyBuilder::build(discovered, pool_id)
                .map(|t| t.vdev_specs())
                .unwrap_or_default();
            state.pools.insert(pool.name.clone(), vdevs);
            let bes: Vec<String> = discovered
                .boot_environments(pool_id)
                .into_iter()
                .map(|(_, be)| be.name.clone())
                .collect();
            for (_, dataset) in discovered.datasets(pool_id) {
                let parent = match (dataset.in_be, bes.first()) {
                    (true, Some(be)) => boot_environment_dataset(&pool.name, be),
                    _ => pool.name.clone(),
                };
                state.datasets.insert(format!("{}/{}", parent, dataset.name));
            }
            for be in &bes {
                state.datasets.insert(boot_environment_dataset(&pool.name, be));
            }
            if !bes.is_empty() {
                state.boot_environments.insert(pool.name.clone(), bes);
            }
        }
        debug!(
            "memory: seeded {} pools and {} datasets",
            state.pools.len(),
            state.datasets.len()
        );
    }

    /// Make every `operation` on `target` fail with `diagnostic`
    pub fn fail_on(&self, operation: &str, target: &str, diagnostic: &str) {
        self.state.lock().failures.insert(
            (operation.to_string(), target.to_string()),
            diagnostic.to_string(),
        );
    }

    /// Every call so far, in order
    pub fn calls(&self) -> Vec<BackendCall> {
        self.state.lock().calls.clone()
    }

    /// Calls that changed state
    pub fn mutating_calls(&self) -> Vec<BackendCall> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.is_mutating())
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    pub fn pool_names(&self) -> Vec<String> {
        self.state.lock().pools.keys().cloned().collect()
    }

    pub fn pool_layout(&self, name: &str) -> Option<Vec<VdevSpec>> {
        self.state.lock().pools.get(name).cloned()
    }

    pub fn dataset_paths(&self) -> Vec<String> {
        self.state.lock().datasets.iter().cloned().collect()
    }

    pub fn partition_table(&self, disk: &str) -> Option<Vec<PartitionEntry>> {
        self.state.lock().partition_tables.get(disk).cloned()
    }
}

impl StorageBackend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    fn pool_exists(&self, name: &str) -> Result<bool> {
        let mut state = self.state.lock();
        state.calls.push(BackendCall::PoolExists {
            name: name.to_string(),
        });
        Ok(state.pools.contains_key(name))
    }

    fn create_pool(&self, name: &str, vdevs: &[VdevSpec]) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(BackendCall::CreatePool {
            name: name.to_string(),
            vdevs: vdevs.to_vec(),
        });
        state.check_failure("create_pool", name)?;
        if state.pools.contains_key(name) {
            return Err(Error::backend(
                "create_pool",
                name,
                format!("cannot create '{}': pool already exists", name),
            ));
        }
        debug!("memory: created pool {}", name);
        state.pools.insert(name.to_string(), vdevs.to_vec());
        Ok(())
    }

    fn destroy_pool(&self, name: &str, force: bool) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(BackendCall::DestroyPool {
            name: name.to_string(),
            force,
        });
        state.check_failure("destroy_pool", name)?;
        if state.pools.shift_remove(name).is_none() {
            return Err(Error::not_found("pool", name));
        }
        let prefix = format!("{}/", name);
        state.datasets.retain(|d| !d.starts_with(&prefix));
        state.boot_environments.shift_remove(name);
        state.active.remove(name);
        Ok(())
    }

    fn dataset_exists(&self, path: &str) -> Result<bool> {
        let mut state = self.state.lock();
        state.calls.push(BackendCall::DatasetExists {
            path: path.to_string(),
        });
        Ok(state.datasets.contains(path))
    }

    fn create_filesystem(
        &self,
        path: &str,
        mountpoint: Option<&str>,
        properties: &IndexMap<String, String>,
    ) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(BackendCall::CreateFilesystem {
            path: path.to_string(),
            mountpoint: mountpoint.map(str::to_string),
            properties: properties.clone(),
        });
        state.check_failure("create_filesystem", path)?;
        state.require_pool("create_filesystem", path)?;
        if !state.datasets.insert(path.to_string()) {
            return Err(Error::backend(
                "create_filesystem",
                path,
                format!("cannot create '{}': dataset already exists", path),
            ));
        }
        Ok(())
    }

    fn create_volume(&self, path: &str, size_bytes: u64) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(BackendCall::CreateVolume {
            path: path.to_string(),
            size_bytes,
        });
        state.check_failure("create_volume", path)?;
        state.require_pool("create_volume", path)?;
        if !state.datasets.insert(path.to_string()) {
            return Err(Error::backend(
                "create_volume",
                path,
                format!("cannot create '{}': dataset already exists", path),
            ));
        }
        Ok(())
    }

    fn destroy_dataset(&self, path: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(BackendCall::DestroyDataset {
            path: path.to_string(),
        });
        state.check_failure("destroy_dataset", path)?;
        if !state.datasets.shift_remove(path) {
            return Err(Error::not_found("dataset", path));
        }
        let prefix = format!("{}/", path);
        state.datasets.retain(|d| !d.starts_with(&prefix));
        Ok(())
    }

    fn write_partition_table(&self, disk_id: &str, entries: &[PartitionEntry]) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(BackendCall::WritePartitionTable {
            disk: disk_id.to_string(),
            entries: entries.to_vec(),
        });
        state.check_failure("write_partition_table", disk_id)?;
        state
            .partition_tables
            .insert(disk_id.to_string(), entries.to_vec());
        Ok(())
    }

    fn boot_environment_exists(&self, pool: &str, name: &str) -> Result<bool> {
        let mut state = self.state.lock();
        state.calls.push(BackendCall::BootEnvironmentExists {
            pool: pool.to_string(),
            name: name.to_string(),
        });
        Ok(state
            .boot_environments
            .get(pool)
            .is_some_and(|bes| bes.iter().any(|b| b == name)))
    }

    fn create_boot_environment(
        &self,
        pool: &str,
        name: &str,
        _mountpoint: Option<&str>,
    ) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(BackendCall::CreateBootEnvironment {
            pool: pool.to_string(),
            name: name.to_string(),
        });
        state.check_failure("create_boot_environment", name)?;
        state.require_pool("create_boot_environment", pool)?;
        let bes = state.boot_environments.entry(pool.to_string()).or_default();
        if bes.iter().any(|b| b == name) {
            return Err(Error::backend(
                "create_boot_environment",
                name,
                format!("boot environment {} already exists", name),
            ));
        }
        bes.push(name.to_string());
        state.datasets.insert(boot_environment_dataset(pool, name));
        Ok(())
    }

    fn active_boot_environment(&self, pool: &str) -> Result<Option<String>> {
        let mut state = self.state.lock();
        state.calls.push(BackendCall::ActiveBootEnvironment {
            pool: pool.to_string(),
        });
        Ok(state.active.get(pool).cloned())
    }

    fn activate_boot_environment(&self, pool: &str, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(BackendCall::ActivateBootEnvironment {
            pool: pool.to_string(),
            name: name.to_string(),
        });
        state.check_failure("activate_boot_environment", name)?;
        let known = state
            .boot_environments
            .get(pool)
            .is_some_and(|bes| bes.iter().any(|b| b == name));
        if !known {
            return Err(Error::not_found("boot environment", name));
        }
        state.active.insert(pool.to_string(), name.to_string());
        Ok(())
    }
}
