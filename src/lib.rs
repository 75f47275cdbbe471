//! Storage Target - Host Storage Provisioning Core
//!
//! Models the storage layout of an installation target as two parallel
//! trees (discovered and desired), validates the desired tree against
//! platform rules and reconciles it onto disks, pools, datasets and boot
//! environments through a pluggable backend.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                          Target Document (YAML/JSON)                         │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────────┐  │
//! │  │   Discovered    │  │     Desired     │  │        SizeValue            │  │
//! │  │   Target Tree   │  │   Target Tree   │  │   (exact byte counts)       │  │
//! │  └────────┬────────┘  └────────┬────────┘  └─────────────────────────────┘  │
//! │           │                    │                                             │
//! │           │         ┌──────────┴──────────┐                                  │
//! │           │         │      Validator      │  structural + deep phase         │
//! │           │         └──────────┬──────────┘                                  │
//! │           │                    │                                             │
//! │           └──────────┬─────────┘                                             │
//! │                      │                                                       │
//! │        ┌─────────────┴─────────────┐   ┌─────────────────────────────────┐  │
//! │        │  Reconciler (preflight,   │───│  Topology Builder / var policy  │  │
//! │        │  plan, sequential apply)  │   └─────────────────────────────────┘  │
//! │        └─────────────┬─────────────┘                                        │
//! ├──────────────────────┼──────────────────────────────────────────────────────┤
//! │                      │           Storage Backends                            │
//! │  ┌───────────────────┴─────────┐  ┌─────────────────────────────────────┐   │
//! │  │   Command (zpool, zfs,      │  │   Memory (dry runs, tests)          │   │
//! │  │   beadm, sgdisk, fdisk)     │  │                                     │   │
//! │  └─────────────────────────────┘  └─────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`target`]: Entities, the arena tree and the document format
//! - [`validation`]: Structural and deep validation into a report
//! - [`topology`]: Pool layouts derived from device memberships
//! - [`reconcile`]: Preflight, planning and execution
//! - [`backend`]: `StorageBackend` implementations
//! - [`domain`]: Size values and the backend/progress ports
//! - [`config`]: Engine configuration
//! - [`error`]: Error types and handling

pub mod backend;
pub mod config;
pub mod domain;
pub mod error;
pub mod reconcile;
pub mod target;
pub mod topology;
pub mod validation;

// Re-export commonly used types
pub use backend::{create_backend, BackendCall, CommandBackend, MemoryBackend};

pub use config::{EngineConfig, PartitionLayout, ReconcileConfig, ValidatorConfig};

pub use domain::ports::{
    PartitionEntry, ProgressSink, ProgressUpdate, StorageBackend, StorageBackendRef, VdevSpec,
};
pub use domain::size::{SizeUnit, SizeValue};

pub use error::{Error, ErrorKind, Result};

pub use reconcile::{
    LogProgress, Operation, Plan, Planner, ReconcileSummary, Reconciler, VarSharePolicy,
};

pub use target::{
    Action, BootEnvironment, Dataset, DatasetKind, Disk, DiskGeometry, Entity, EntityKind,
    LabelKind, Logical, NodeId, Partition, PartitionType, Pool, PoolMembership, Slice,
    TargetDocument, TargetTree, Targets, Vdev, VdevKind, VolumeUse,
};

pub use topology::{PoolTopology, TopologyBuilder, VdevGroup};

pub use validation::{validate, ValidationReport, Validator, Violation, ViolationCode};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
