//! Target Documents
//!
//! Serialized form of the target forests. Each node is an `Entity` tagged by
//! `kind` with a nested `children` list. Documents load from YAML or JSON.

use super::entity::Entity;
use super::tree::{NodeId, TargetTree, Targets};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// One node of a serialized forest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityNode {
    #[serde(flatten)]
    pub entity: Entity,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<EntityNode>,
}

impl EntityNode {
    pub fn leaf(entity: impl Into<Entity>) -> Self {
        Self {
            entity: entity.into(),
            children: Vec::new(),
        }
    }

    pub fn with_children(entity: impl Into<Entity>, children: Vec<EntityNode>) -> Self {
        Self {
            entity: entity.into(),
            children,
        }
    }
}

/// Desired and discovered forests as stored on disk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetDocument {
    /// Top-level nodes of the desired forest
    #[serde(default)]
    pub desired: Vec<EntityNode>,
    /// Top-level nodes of the discovered forest
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub discovered: Vec<EntityNode>,
}

impl TargetDocument {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Load a document; `.json` files are read as JSON, anything else as YAML
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        debug!("Loading target document {}", path.display());
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::from_json_str(&text),
            _ => Self::from_yaml_str(&text),
        }
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Build both forests
    pub fn into_targets(self) -> Result<Targets> {
        Ok(Targets::new(
            build_tree(self.discovered)?,
            build_tree(self.desired)?,
        ))
    }

    /// Snapshot both forests
    pub fn from_targets(targets: &Targets) -> Self {
        Self {
            desired: export_tree(&targets.desired),
            discovered: export_tree(&targets.discovered),
        }
    }
}

/// Build a tree from top-level nodes
pub fn build_tree(nodes: Vec<EntityNode>) -> Result<TargetTree> {
    let mut tree = TargetTree::new();
    let root = tree.root();
    for node in nodes {
        insert_node(&mut tree, root, node)?;
    }
    Ok(tree)
}

fn insert_node(tree: &mut TargetTree, parent: NodeId, node: EntityNode) -> Result<()> {
    if matches!(node.entity, Entity::Target) {
        return Err(Error::Document(format!(
            "'target' may only appear as the implicit root (found under {})",
            tree.path(parent)
        )));
    }
    let id = tree.add(parent, node.entity);
    for child in node.children {
        insert_node(tree, id, child)?;
    }
    Ok(())
}

/// Export the attached nodes of a tree
pub fn export_tree(tree: &TargetTree) -> Vec<EntityNode> {
    tree.children(tree.root())
        .iter()
        .map(|id| export_node(tree, *id))
        .collect()
}

fn export_node(tree: &TargetTree, id: NodeId) -> EntityNode {
    EntityNode {
        entity: tree.entity(id).clone(),
        children: tree
            .children(id)
            .iter()
            .map(|child| export_node(tree, *child))
            .collect(),
    }
}
