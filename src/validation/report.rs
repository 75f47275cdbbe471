//! Validation Report
//!
//! Violations are collected into a report value; nothing is raised while
//! the scan runs.

use crate::error::{Error, Result};
use crate::target::{NodeId, TargetTree};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What rule a violation broke
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationCode {
    // Structural invariants
    RootPoolCount,
    MissingBootEnvironment,
    BootEnvironmentPlacement,
    WholeDiskConflict,
    ActivePartition,
    ReservedDataset,
    DuplicateName,
    UnknownPool,
    EmptyVdev,
    EmptyPool,
    SwapDump,
    // Attachment rules
    IllegalParent,
    IndexOutOfRange,
    PartitionTypeMismatch,
    ReservedSlice,
    ExtentOutOfBounds,
    ExtentOverlap,
    MissingVolumeSize,
    InvalidMountpoint,
    InvalidName,
}

impl std::fmt::Display for ViolationCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            ViolationCode::RootPoolCount => "root-pool-count",
            ViolationCode::MissingBootEnvironment => "missing-boot-environment",
            ViolationCode::BootEnvironmentPlacement => "boot-environment-placement",
            ViolationCode::WholeDiskConflict => "whole-disk-conflict",
            ViolationCode::ActivePartition => "active-partition",
            ViolationCode::ReservedDataset => "reserved-dataset",
            ViolationCode::DuplicateName => "duplicate-name",
            ViolationCode::UnknownPool => "unknown-pool",
            ViolationCode::EmptyVdev => "empty-vdev",
            ViolationCode::EmptyPool => "empty-pool",
            ViolationCode::SwapDump => "swap-dump",
            ViolationCode::IllegalParent => "illegal-parent",
            ViolationCode::IndexOutOfRange => "index-out-of-range",
            ViolationCode::PartitionTypeMismatch => "partition-type-mismatch",
            ViolationCode::ReservedSlice => "reserved-slice",
            ViolationCode::ExtentOutOfBounds => "extent-out-of-bounds",
            ViolationCode::ExtentOverlap => "extent-overlap",
            ViolationCode::MissingVolumeSize => "missing-volume-size",
            ViolationCode::InvalidMountpoint => "invalid-mountpoint",
            ViolationCode::InvalidName => "invalid-name",
        };
        write!(f, "{}", text)
    }
}

/// One broken rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub code: ViolationCode,
    /// Offending node, when the rule is node-specific
    pub node: Option<NodeId>,
    /// Readable location of the node
    pub location: String,
    pub message: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.code, self.location, self.message)
    }
}

/// Outcome of validating a tree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    /// True when no violation was recorded
    pub valid: bool,
    pub violations: Vec<Violation>,
    pub checked_at: DateTime<Utc>,
}

impl Default for ValidationReport {
    fn default() -> Self {
        Self::new()
    }
}

impl ValidationReport {
    pub fn new() -> Self {
        Self {
            valid: true,
            violations: Vec::new(),
            checked_at: Utc::now(),
        }
    }

    /// Record a violation against a node
    pub fn record(
        &mut self,
        tree: &TargetTree,
        node: NodeId,
        code: ViolationCode,
        message: impl Into<String>,
    ) {
        self.push(Violation {
            code,
            node: Some(node),
            location: tree.path(node),
            message: message.into(),
        });
    }

    /// Record a violation of a whole-tree rule
    pub fn record_global(&mut self, code: ViolationCode, message: impl Into<String>) {
        self.push(Violation {
            code,
            node: None,
            location: "target".to_string(),
            message: message.into(),
        });
    }

    pub fn push(&mut self, violation: Violation) {
        self.valid = false;
        self.violations.push(violation);
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn len(&self) -> usize {
        self.violations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }

    /// Violations with a given code
    pub fn with_code(&self, code: ViolationCode) -> Vec<&Violation> {
        self.violations.iter().filter(|v| v.code == code).collect()
    }

    pub fn has(&self, code: ViolationCode) -> bool {
        self.violations.iter().any(|v| v.code == code)
    }

    /// One line per violation
    pub fn summary(&self) -> String {
        self.violations
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Turn a failed report into `Error::Validation`
    pub fn into_result(self) -> Result<()> {
        if self.valid {
            Ok(())
        } else {
            Err(Error::Validation {
                count: self.violations.len(),
                summary: self.summary(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::Disk;

    #[test]
    fn test_report_collects() {
        let mut tree = TargetTree::new();
        let root = tree.root();
        let disk = tree.add(root, Disk::new("c0t0d0"));

        let mut report = ValidationReport::new();
        assert!(report.is_valid());

        report.record(&tree, disk, ViolationCode::WholeDiskConflict, "first");
        report.record_global(ViolationCode::RootPoolCount, "second");

        assert!(!report.is_valid());
        assert_eq!(report.len(), 2);
        assert!(report.has(ViolationCode::RootPoolCount));
        assert_eq!(report.with_code(ViolationCode::WholeDiskConflict)[0].location, "disk c0t0d0");
        assert_eq!(
            report.summary(),
            "[whole-disk-conflict] disk c0t0d0: first; [root-pool-count] target: second"
        );
    }

    #[test]
    fn test_into_result() {
        assert!(ValidationReport::new().into_result().is_ok());

        let mut report = ValidationReport::new();
        report.record_global(ViolationCode::EmptyPool, "pool tank has no devices");
        match report.into_result() {
            Err(Error::Validation { count, .. }) => assert_eq!(count, 1),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
