//! Engine Configuration
//!
//! Platform constants used by validation and instantiation. Defaults match
//! an x86 boot disk with a legacy fdisk table; every value can be overridden
//! from a YAML config file or the command line.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Legacy partition id of the primary OS (Solaris2)
pub const DEFAULT_PRIMARY_OS_TYPE: u8 = 191;

/// Sectors left free before the first legacy partition
pub const DEFAULT_LEGACY_START_OFFSET: u64 = 63;

/// First sector used for GPT partitions
pub const DEFAULT_GPT_START_OFFSET: u64 = 256;

/// Boot environment created when the root pool declares none
pub const DEFAULT_BOOT_ENVIRONMENT: &str = "solaris";

// =============================================================================
// Validator Configuration
// =============================================================================

/// Platform rules applied by the validator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// The platform boots from an active legacy partition
    pub require_active_partition: bool,
    /// Legacy type id of the primary OS partition
    pub primary_os_partition_type: u8,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            require_active_partition: cfg!(any(target_arch = "x86", target_arch = "x86_64")),
            primary_os_partition_type: DEFAULT_PRIMARY_OS_TYPE,
        }
    }
}

// =============================================================================
// Reconcile Configuration
// =============================================================================

/// Partition layout constants
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionLayout {
    /// Start of the first legacy partition when none is given
    pub legacy_start_offset: u64,
    /// Start of the first GPT partition when none is given
    pub gpt_start_offset: u64,
}

impl Default for PartitionLayout {
    fn default() -> Self {
        Self {
            legacy_start_offset: DEFAULT_LEGACY_START_OFFSET,
            gpt_start_offset: DEFAULT_GPT_START_OFFSET,
        }
    }
}

/// Settings of a reconciliation run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    pub layout: PartitionLayout,
    /// Destroy pools with `-f` when recreating them
    pub force_destroy: bool,
    /// Alternate root the target is mounted under, used for mountpoint cleanup
    pub alt_root: Option<PathBuf>,
    /// Activate the root pool's boot environment after creating it
    pub activate_boot_environment: bool,
    /// Boot environment hosting in-BE datasets when the root pool declares none
    pub boot_environment: String,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            layout: PartitionLayout::default(),
            force_destroy: true,
            alt_root: None,
            activate_boot_environment: true,
            boot_environment: DEFAULT_BOOT_ENVIRONMENT.to_string(),
        }
    }
}

// =============================================================================
// Engine Configuration
// =============================================================================

/// Top-level configuration file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub validator: ValidatorConfig,
    pub reconcile: ReconcileConfig,
}

impl EngineConfig {
    /// Load from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.validator.primary_os_partition_type, 191);
        assert_eq!(config.reconcile.layout.legacy_start_offset, 63);
        assert!(config.reconcile.force_destroy);
        assert!(config.reconcile.alt_root.is_none());
        assert_eq!(config.reconcile.boot_environment, "solaris");
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = EngineConfig::from_yaml_str(
            "validator:\n  require_active_partition: false\nreconcile:\n  layout:\n    legacy_start_offset: 2048\n",
        )
        .unwrap();
        assert!(!config.validator.require_active_partition);
        assert_eq!(config.validator.primary_os_partition_type, 191);
        assert_eq!(config.reconcile.layout.legacy_start_offset, 2048);
        assert_eq!(config.reconcile.layout.gpt_start_offset, 256);
        assert!(config.reconcile.activate_boot_environment);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("engine.yaml");
        std::fs::write(&path, "reconcile:\n  alt_root: /a\n").unwrap();
        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.reconcile.alt_root, Some(PathBuf::from("/a")));
    }
}
