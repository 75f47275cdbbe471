//! var/share Dataset Policy
//!
//! Every root pool gets a per-boot-environment `var` and a shared
//! `VARSHARE`. Declared datasets that use either name or mountpoint must
//! match the reserved declaration exactly; missing ones are synthesized.

use crate::error::{Error, Result};
use crate::target::{Action, Dataset, NodeId, TargetTree, RESERVED_DATASETS};
use tracing::debug;

/// Checks and completes the reserved datasets of a root pool
pub struct VarSharePolicy;

impl VarSharePolicy {
    /// Validate declared reserved datasets and return the ones to synthesize
    /// under `root_pool`.
    ///
    /// Nothing is synthesized for a root pool that is being deleted.
    pub fn apply(tree: &TargetTree, root_pool: NodeId) -> Result<Vec<Dataset>> {
        let pool = tree.entity(root_pool).as_pool().ok_or_else(|| {
            Error::Internal(format!("{} is not a pool", tree.path(root_pool)))
        })?;

        let mut synthesized = Vec::new();
        for reserved in &RESERVED_DATASETS {
            let mut found = false;

            for (id, dataset) in tree.all_datasets() {
                if dataset.action == Action::Delete {
                    continue;
                }
                let by_name = reserved.matches_name(&dataset.name);
                let by_mount = reserved.matches_mountpoint(dataset.mountpoint.as_deref());
                if !by_name && !by_mount {
                    continue;
                }

                if let Some(conflict) = reserved.declaration_conflict(dataset) {
                    return Err(Error::Configuration(format!(
                        "{}: {}",
                        tree.path(id),
                        conflict
                    )));
                }
                let owner = tree.pool_name_of(id).unwrap_or_default();
                if owner != pool.name {
                    return Err(Error::Configuration(format!(
                        "{}: '{}' must live in root pool {}, not {}",
                        tree.path(id),
                        dataset.name,
                        pool.name,
                        owner
                    )));
                }
                found = true;
            }

            if !found && pool.action != Action::Delete {
                debug!("Synthesizing {}/{}", pool.name, reserved.name);
                let mut dataset = Dataset::filesystem(reserved.name)
                    .mounted_at(reserved.mountpoint)
                    .with_action(Action::Preserve);
                dataset.in_be = reserved.in_be;
                for (key, value) in reserved.properties {
                    dataset
                        .properties
                        .insert((*key).to_string(), (*value).to_string());
                }
                synthesized.push(dataset);
            }
        }

        Ok(synthesized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::Pool;
    use assert_matches::assert_matches;

    fn root_pool_tree() -> (TargetTree, NodeId) {
        let mut tree = TargetTree::new();
        let logical = tree.logical_or_insert();
        let pool = tree.add(logical, Pool::root("rpool"));
        (tree, pool)
    }

    #[test]
    fn test_synthesizes_missing_datasets() {
        let (tree, pool) = root_pool_tree();
        let out = VarSharePolicy::apply(&tree, pool).unwrap();
        assert_eq!(out.len(), 2);

        assert_eq!(out[0].name, "var");
        assert_eq!(out[0].mountpoint.as_deref(), Some("/var"));
        assert!(out[0].in_be);
        assert_eq!(out[0].action, Action::Preserve);

        assert_eq!(out[1].name, "VARSHARE");
        assert_eq!(out[1].mountpoint.as_deref(), Some("/var/share"));
        assert!(!out[1].in_be);
        assert_eq!(out[1].properties.get("canmount").map(String::as_str), Some("noauto"));
    }

    #[test]
    fn test_correct_declarations_are_kept() {
        let (mut tree, pool) = root_pool_tree();
        let mut var = Dataset::filesystem("var").mounted_at("/var");
        var.in_be = true;
        tree.add(pool, var);
        tree.add(pool, Dataset::filesystem("share").mounted_at("/var/share"));

        assert!(VarSharePolicy::apply(&tree, pool).unwrap().is_empty());
    }

    #[test]
    fn test_var_volume_is_rejected() {
        let (mut tree, pool) = root_pool_tree();
        tree.add(
            pool,
            Dataset::volume("var", Some(crate::domain::size::SizeValue::parse("1g").unwrap())),
        );
        assert_matches!(VarSharePolicy::apply(&tree, pool), Err(Error::Configuration(_)));
    }

    #[test]
    fn test_wrong_pairings_are_rejected() {
        let (mut tree, pool) = root_pool_tree();
        tree.add(pool, Dataset::filesystem("logs").mounted_at("/var"));
        assert_matches!(VarSharePolicy::apply(&tree, pool), Err(Error::Configuration(msg)) if msg.contains("reserved"));

        let (mut tree, pool) = root_pool_tree();
        let mut share = Dataset::filesystem("VARSHARE").mounted_at("/var/share");
        share.in_be = true;
        tree.add(pool, share);
        assert_matches!(VarSharePolicy::apply(&tree, pool), Err(Error::Configuration(_)));
    }

    #[test]
    fn test_reserved_dataset_outside_root_pool() {
        let (mut tree, pool) = root_pool_tree();
        let logical = tree.logical_or_insert();
        let tank = tree.add(logical, Pool::new("tank"));
        tree.add(tank, Dataset::filesystem("VARSHARE").mounted_at("/var/share"));
        assert_matches!(
            VarSharePolicy::apply(&tree, pool),
            Err(Error::Configuration(msg)) if msg.contains("root pool rpool")
        );
    }
}
