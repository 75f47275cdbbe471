//! Validation Module
//!
//! Checks a desired tree before anything is instantiated:
//! - Structural phase: whole-tree invariants (root pool, boot environments,
//!   whole-disk ownership, active partition, reserved datasets)
//! - Deep phase: node-local attachment rules replayed on scratch views
//!
//! Validation never mutates the tree and never raises; every violation is
//! collected into a `ValidationReport`.

pub mod report;
pub mod rules;
pub mod scratch;
pub mod structural;

pub use report::*;
pub use scratch::ScratchView;

use crate::config::ValidatorConfig;
use crate::target::TargetTree;
use tracing::{debug, info, warn};

/// Validates desired trees against platform rules
#[derive(Debug, Clone, Default)]
pub struct Validator {
    config: ValidatorConfig,
}

impl Validator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Run both phases and return the collected report
    pub fn validate(&self, tree: &TargetTree) -> ValidationReport {
        let mut report = ValidationReport::new();

        structural::check(tree, &self.config, &mut report);
        debug!("Structural phase found {} violations", report.len());

        scratch::check(tree, &mut report);

        if report.is_valid() {
            info!("Target validated ({} nodes)", tree.capacity());
        } else {
            for violation in &report.violations {
                warn!("{}", violation);
            }
            info!("Target invalid: {} violations", report.len());
        }

        report
    }
}

/// Validate with the default platform rules
pub fn validate(tree: &TargetTree) -> ValidationReport {
    Validator::default().validate(tree)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::size::SizeValue;
    use crate::target::{
        BootEnvironment, Dataset, Disk, Partition, PartitionType, Pool, PoolMembership, Slice,
    };

    fn valid_tree() -> TargetTree {
        let mut tree = TargetTree::new();
        let root = tree.root();
        let disk = tree.add(root, Disk::new("c0t0d0"));
        let mut part = Partition::new(1, PartitionType::Legacy(191), SizeValue::parse("20g").unwrap());
        part.active = true;
        let part = tree.add(disk, part);
        let mut slice = Slice::new(0, SizeValue::parse("19g").unwrap());
        slice.membership = Some(PoolMembership::new("rpool"));
        tree.add(part, slice);

        let logical = tree.logical_or_insert();
        let pool = tree.add(logical, Pool::root("rpool"));
        tree.add(pool, Dataset::filesystem("export").mounted_at("/export"));
        tree.add(pool, BootEnvironment::new("solaris"));
        tree
    }

    #[test]
    fn test_valid_tree() {
        let report = validate(&valid_tree());
        assert!(report.is_valid(), "{}", report.summary());
        assert!(report.into_result().is_ok());
    }

    #[test]
    fn test_no_root_pool_is_invalid() {
        let mut tree = TargetTree::new();
        let logical = tree.logical_or_insert();
        tree.add(logical, Pool::new("tank").with_action(crate::target::Action::Preserve));
        let report = validate(&tree);
        assert!(!report.is_valid());
        assert!(report.has(ViolationCode::RootPoolCount));
    }

    #[test]
    fn test_two_root_pools_are_invalid() {
        let mut tree = valid_tree();
        let logical = tree.logical_or_insert();
        let second = tree.add(logical, Pool::root("rpool2"));
        tree.add(second, BootEnvironment::new("be2"));
        let root = tree.root();
        tree.add(root, Disk::new("c1t0d0").whole_disk_in(PoolMembership::new("rpool2")));

        let report = validate(&tree);
        assert_eq!(report.with_code(ViolationCode::RootPoolCount).len(), 2);
    }

    #[test]
    fn test_both_phases_report() {
        let mut tree = valid_tree();
        let (pool, _) = tree.find_pool("rpool").unwrap();
        tree.add(pool, Dataset::volume("var", None));

        let report = validate(&tree);
        assert!(report.has(ViolationCode::ReservedDataset));
        assert!(report.has(ViolationCode::MissingVolumeSize));
    }

    #[test]
    fn test_validation_does_not_mutate() {
        let tree = valid_tree();
        let before = tree.preorder(tree.root());
        let _ = validate(&tree);
        assert_eq!(tree.preorder(tree.root()), before);
    }
}
