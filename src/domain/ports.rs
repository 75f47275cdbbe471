//! Domain Ports - Core trait definitions for the storage target engine
//!
//! These traits define the boundaries between the reconciliation logic and
//! the systems it drives. Adapters implement them to provide the concrete
//! pool manager, partition writer and progress reporting.

use crate::error::Result;
use crate::target::VdevKind;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// =============================================================================
// Pool Layout
// =============================================================================

/// One redundancy group handed to `create_pool`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VdevSpec {
    /// Redundancy kind
    pub kind: VdevKind,
    /// Member device ids, in declaration order
    pub members: Vec<String>,
}

impl std::fmt::Display for VdevSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{}]", self.kind, self.members.join(","))
    }
}

// =============================================================================
// Partition Table Entries
// =============================================================================

/// One entry of a partition table written to a disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "form", rename_all = "snake_case")]
pub enum PartitionEntry {
    /// GUID partition table entry
    Gpt {
        type_guid: String,
        start_sector: u64,
        end_sector: u64,
        name: String,
    },
    /// Legacy (fdisk style) entry
    Legacy {
        type_id: u8,
        start_cylinder: u64,
        size_sectors: u64,
        active: bool,
    },
}

// =============================================================================
// Storage Backend Port
// =============================================================================

/// Capabilities of the native pool/filesystem manager and partition writer.
///
/// Every call blocks until the underlying operation finishes. Implementations
/// must report a missing pool or dataset on destroy as `Error::NotFound` so
/// callers can tell it apart from a real failure.
pub trait StorageBackend: Send + Sync {
    /// Backend name, for logs
    fn name(&self) -> &str;

    /// Check whether a pool is imported
    fn pool_exists(&self, name: &str) -> Result<bool>;

    /// Create a pool from the given redundancy groups
    fn create_pool(&self, name: &str, vdevs: &[VdevSpec]) -> Result<()>;

    /// Destroy a pool
    fn destroy_pool(&self, name: &str, force: bool) -> Result<()>;

    /// Check whether a dataset exists (full path, e.g. `rpool/export`)
    fn dataset_exists(&self, path: &str) -> Result<bool>;

    /// Create a filesystem dataset
    fn create_filesystem(
        &self,
        path: &str,
        mountpoint: Option<&str>,
        properties: &IndexMap<String, String>,
    ) -> Result<()>;

    /// Create a volume dataset
    fn create_volume(&self, path: &str, size_bytes: u64) -> Result<()>;

    /// Destroy a dataset
    fn destroy_dataset(&self, path: &str) -> Result<()>;

    /// Replace the partition table of a disk
    fn write_partition_table(&self, disk_id: &str, entries: &[PartitionEntry]) -> Result<()>;

    /// Check whether a boot environment exists in a pool
    fn boot_environment_exists(&self, pool: &str, name: &str) -> Result<bool>;

    /// Create a boot environment
    fn create_boot_environment(&self, pool: &str, name: &str, mountpoint: Option<&str>)
        -> Result<()>;

    /// Name of the boot environment activated for the next boot, if any
    fn active_boot_environment(&self, pool: &str) -> Result<Option<String>>;

    /// Activate a boot environment for the next boot
    fn activate_boot_environment(&self, pool: &str, name: &str) -> Result<()>;
}

// =============================================================================
// Progress Port
// =============================================================================

/// Progress estimate emitted once per reconciliation step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressUpdate {
    /// Estimate in percent, never decreasing within a run
    pub percent: u8,
    /// Human readable status
    pub status: String,
    /// When the update was produced
    pub at: DateTime<Utc>,
}

/// Receiver of progress updates, typically the checkpoint orchestrator
pub trait ProgressSink {
    fn report(&mut self, update: ProgressUpdate);
}

/// Collects updates in memory
impl ProgressSink for Vec<ProgressUpdate> {
    fn report(&mut self, update: ProgressUpdate) {
        self.push(update);
    }
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type StorageBackendRef = Arc<dyn StorageBackend>;
