//! Target Entities
//!
//! Node payloads of the target tree. `Entity` is a closed tagged union; its
//! serde tag is the registry that maps a document `kind` to the payload type.

use crate::domain::size::{SizeValue, DEFAULT_BLOCK_SIZE};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

// =============================================================================
// Shared Attribute Types
// =============================================================================

/// What reconciliation should do with an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Destroy any same-named entity, then create it fresh
    #[default]
    Create,
    /// Destroy if present
    Delete,
    /// Create only if absent
    Preserve,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Create => write!(f, "create"),
            Action::Delete => write!(f, "delete"),
            Action::Preserve => write!(f, "preserve"),
        }
    }
}

/// Disk label kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelKind {
    #[default]
    None,
    /// Legacy fdisk style table
    Mbr,
    Gpt,
}

impl std::fmt::Display for LabelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LabelKind::None => write!(f, "none"),
            LabelKind::Mbr => write!(f, "mbr"),
            LabelKind::Gpt => write!(f, "gpt"),
        }
    }
}

/// Redundancy kind of a vdev
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VdevKind {
    #[default]
    #[serde(alias = "none")]
    Plain,
    Mirror,
    #[serde(alias = "raidz1")]
    Raidz,
    Raidz2,
    Raidz3,
    Log,
    Spare,
    Cache,
}

impl VdevKind {
    /// Keyword used by the pool manager, `None` for plain stripes
    pub fn keyword(&self) -> Option<&'static str> {
        match self {
            VdevKind::Plain => None,
            VdevKind::Mirror => Some("mirror"),
            VdevKind::Raidz => Some("raidz"),
            VdevKind::Raidz2 => Some("raidz2"),
            VdevKind::Raidz3 => Some("raidz3"),
            VdevKind::Log => Some("log"),
            VdevKind::Spare => Some("spare"),
            VdevKind::Cache => Some("cache"),
        }
    }
}

impl std::fmt::Display for VdevKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.keyword().unwrap_or("plain"))
    }
}

/// Pool a device is tagged for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolMembership {
    /// Pool name
    pub pool: String,
    /// Vdev group key; absent means the implicit plain group
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vdev: Option<String>,
}

impl PoolMembership {
    pub fn new(pool: impl Into<String>) -> Self {
        Self {
            pool: pool.into(),
            vdev: None,
        }
    }

    pub fn in_vdev(mut self, vdev: impl Into<String>) -> Self {
        self.vdev = Some(vdev.into());
        self
    }
}

// =============================================================================
// Physical Entities
// =============================================================================

/// Disk geometry as reported by the probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskGeometry {
    /// Logical block size in bytes
    pub block_size: u32,
    /// Sectors per cylinder
    pub cylinder_size: u64,
    pub heads: u32,
    pub sectors_per_track: u32,
    /// Total addressable sectors, zero when unknown
    pub total_sectors: u64,
}

impl Default for DiskGeometry {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            cylinder_size: 0,
            heads: 0,
            sectors_per_track: 0,
            total_sectors: 0,
        }
    }
}

impl DiskGeometry {
    /// Sectors per cylinder, derived from heads and sectors/track if not given
    pub fn sectors_per_cylinder(&self) -> u64 {
        if self.cylinder_size > 0 {
            self.cylinder_size
        } else {
            (self.heads as u64 * self.sectors_per_track as u64).max(1)
        }
    }
}

/// A physical disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Disk {
    /// Device identifier (e.g. `c0t0d0`)
    pub id: String,
    #[serde(default)]
    pub geometry: DiskGeometry,
    #[serde(default)]
    pub label: LabelKind,
    /// Whole disk handed to the pool manager
    #[serde(default)]
    pub whole_disk: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub membership: Option<PoolMembership>,
    #[serde(default)]
    pub boot_disk: bool,
}

impl Disk {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            geometry: DiskGeometry::default(),
            label: LabelKind::None,
            whole_disk: false,
            membership: None,
            boot_disk: false,
        }
    }

    pub fn whole_disk_in(mut self, membership: PoolMembership) -> Self {
        self.whole_disk = true;
        self.membership = Some(membership);
        self
    }
}

/// Partition type, either a legacy one-byte id or a GPT type GUID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PartitionType {
    Legacy(u8),
    Gpt(String),
}

impl std::fmt::Display for PartitionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PartitionType::Legacy(id) => write!(f, "{}", id),
            PartitionType::Gpt(guid) => write!(f, "{}", guid),
        }
    }
}

/// A partition on a disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Partition {
    pub index: u8,
    #[serde(rename = "type")]
    pub part_type: PartitionType,
    /// Start sector; laid out after the previous partition when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_sector: Option<u64>,
    pub size: SizeValue,
    /// Active (bootable) flag
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub membership: Option<PoolMembership>,
}

impl Partition {
    pub fn new(index: u8, part_type: PartitionType, size: SizeValue) -> Self {
        Self {
            index,
            part_type,
            start_sector: None,
            size,
            active: false,
            action: Action::Create,
            name: None,
            membership: None,
        }
    }

    /// Logical partitions live inside the extended partition
    pub fn is_logical(&self) -> bool {
        self.index > 4 && matches!(self.part_type, PartitionType::Legacy(_))
    }
}

/// A slice (VTOC entry) on a disk or inside a partition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slice {
    pub index: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_sector: Option<u64>,
    pub size: SizeValue,
    /// Usage tag (e.g. `root`, `swap`, `usr`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default)]
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub membership: Option<PoolMembership>,
}

impl Slice {
    pub fn new(index: u8, size: SizeValue) -> Self {
        Self {
            index,
            start_sector: None,
            size,
            tag: None,
            action: Action::Create,
            membership: None,
        }
    }
}

// =============================================================================
// Logical Entities
// =============================================================================

/// Container of the pool-side subtree
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Logical {
    /// No swap volume may be declared
    pub no_swap: bool,
    /// No dump volume may be declared
    pub no_dump: bool,
}

/// A storage pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool {
    pub name: String,
    #[serde(default)]
    pub is_root: bool,
    #[serde(default)]
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mountpoint: Option<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub properties: IndexMap<String, String>,
}

impl Pool {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_root: false,
            action: Action::Create,
            mountpoint: None,
            properties: IndexMap::new(),
        }
    }

    pub fn root(name: impl Into<String>) -> Self {
        Self {
            is_root: true,
            ..Self::new(name)
        }
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.action = action;
        self
    }
}

/// An explicitly declared redundancy group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vdev {
    /// Group key matched against device memberships
    pub name: String,
    #[serde(default, rename = "redundancy")]
    pub kind: VdevKind,
}

impl Vdev {
    pub fn new(name: impl Into<String>, kind: VdevKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Dataset flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetKind {
    #[default]
    Filesystem,
    Volume,
}

impl std::fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatasetKind::Filesystem => write!(f, "filesystem"),
            DatasetKind::Volume => write!(f, "volume"),
        }
    }
}

/// Special use of a volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeUse {
    #[default]
    None,
    Swap,
    Dump,
}

/// A filesystem or volume inside a pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    /// Path relative to the pool (e.g. `export/home`)
    pub name: String,
    #[serde(default, rename = "type")]
    pub kind: DatasetKind,
    /// Volume size; required for volumes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<SizeValue>,
    #[serde(default, rename = "use")]
    pub usage: VolumeUse,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mountpoint: Option<String>,
    /// Lives inside each boot environment rather than being shared
    #[serde(default)]
    pub in_be: bool,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub properties: IndexMap<String, String>,
    #[serde(default)]
    pub action: Action,
}

impl Dataset {
    pub fn filesystem(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: DatasetKind::Filesystem,
            size: None,
            usage: VolumeUse::None,
            mountpoint: None,
            in_be: false,
            properties: IndexMap::new(),
            action: Action::Create,
        }
    }

    pub fn volume(name: impl Into<String>, size: Option<SizeValue>) -> Self {
        Self {
            kind: DatasetKind::Volume,
            size,
            ..Self::filesystem(name)
        }
    }

    pub fn mounted_at(mut self, mountpoint: impl Into<String>) -> Self {
        self.mountpoint = Some(mountpoint.into());
        self
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.action = action;
        self
    }

    pub fn is_volume(&self) -> bool {
        self.kind == DatasetKind::Volume
    }

    /// Number of path components below the pool
    pub fn depth(&self) -> usize {
        self.name.split('/').filter(|c| !c.is_empty()).count()
    }
}

/// A boot environment in the root pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootEnvironment {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mountpoint: Option<String>,
}

impl BootEnvironment {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mountpoint: None,
        }
    }
}

/// Container dataset holding one child per boot environment
pub const BOOT_ENVIRONMENT_CONTAINER: &str = "ROOT";

/// Root dataset of boot environment `name` in `pool`
pub fn boot_environment_dataset(pool: &str, name: &str) -> String {
    format!("{}/{}/{}", pool, BOOT_ENVIRONMENT_CONTAINER, name)
}

// =============================================================================
// Entity Union
// =============================================================================

/// Kind of a tree node, without payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Target,
    Logical,
    Disk,
    Partition,
    Slice,
    Pool,
    Vdev,
    Dataset,
    BootEnvironment,
}

/// Document tags, one per kind
const KIND_TAGS: [(EntityKind, &str); 9] = [
    (EntityKind::Target, "target"),
    (EntityKind::Logical, "logical"),
    (EntityKind::Disk, "disk"),
    (EntityKind::Partition, "partition"),
    (EntityKind::Slice, "slice"),
    (EntityKind::Pool, "pool"),
    (EntityKind::Vdev, "vdev"),
    (EntityKind::Dataset, "dataset"),
    (EntityKind::BootEnvironment, "boot_environment"),
];

impl EntityKind {
    /// Tag used in target documents
    pub fn tag(&self) -> &'static str {
        KIND_TAGS
            .iter()
            .find(|(kind, _)| kind == self)
            .map(|(_, tag)| *tag)
            .unwrap_or("unknown")
    }

    /// Look up a kind by its document tag
    pub fn from_tag(tag: &str) -> Option<Self> {
        KIND_TAGS
            .iter()
            .find(|(_, t)| t.eq_ignore_ascii_case(tag))
            .map(|(kind, _)| *kind)
    }

    /// Kinds that may be attached directly below this kind
    pub fn allowed_children(&self) -> &'static [EntityKind] {
        match self {
            EntityKind::Target => &[EntityKind::Disk, EntityKind::Logical],
            EntityKind::Disk => &[EntityKind::Partition, EntityKind::Slice],
            EntityKind::Partition => &[EntityKind::Slice],
            EntityKind::Logical => &[EntityKind::Pool],
            EntityKind::Pool => &[
                EntityKind::Vdev,
                EntityKind::Dataset,
                EntityKind::BootEnvironment,
            ],
            EntityKind::Slice
            | EntityKind::Vdev
            | EntityKind::Dataset
            | EntityKind::BootEnvironment => &[],
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// Payload of a target tree node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Entity {
    Target,
    Logical(Logical),
    Disk(Disk),
    Partition(Partition),
    Slice(Slice),
    Pool(Pool),
    Vdev(Vdev),
    Dataset(Dataset),
    BootEnvironment(BootEnvironment),
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Target => EntityKind::Target,
            Entity::Logical(_) => EntityKind::Logical,
            Entity::Disk(_) => EntityKind::Disk,
            Entity::Partition(_) => EntityKind::Partition,
            Entity::Slice(_) => EntityKind::Slice,
            Entity::Pool(_) => EntityKind::Pool,
            Entity::Vdev(_) => EntityKind::Vdev,
            Entity::Dataset(_) => EntityKind::Dataset,
            Entity::BootEnvironment(_) => EntityKind::BootEnvironment,
        }
    }

    /// Short identifying label, e.g. `partition 1` or `pool rpool`
    pub fn label(&self) -> String {
        match self {
            Entity::Target => "target".to_string(),
            Entity::Logical(_) => "logical".to_string(),
            Entity::Disk(d) => format!("disk {}", d.id),
            Entity::Partition(p) => format!("partition {}", p.index),
            Entity::Slice(s) => format!("slice {}", s.index),
            Entity::Pool(p) => format!("pool {}", p.name),
            Entity::Vdev(v) => format!("vdev {}", v.name),
            Entity::Dataset(d) => format!("{} {}", d.kind, d.name),
            Entity::BootEnvironment(b) => format!("boot environment {}", b.name),
        }
    }

    /// Pool membership of a device entity
    pub fn membership(&self) -> Option<&PoolMembership> {
        match self {
            Entity::Disk(d) => d.membership.as_ref(),
            Entity::Partition(p) => p.membership.as_ref(),
            Entity::Slice(s) => s.membership.as_ref(),
            _ => None,
        }
    }

    /// Reconciliation action, for entities that carry one
    pub fn action(&self) -> Option<Action> {
        match self {
            Entity::Partition(p) => Some(p.action),
            Entity::Slice(s) => Some(s.action),
            Entity::Pool(p) => Some(p.action),
            Entity::Dataset(d) => Some(d.action),
            _ => None,
        }
    }

    pub fn as_disk(&self) -> Option<&Disk> {
        match self {
            Entity::Disk(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_partition(&self) -> Option<&Partition> {
        match self {
            Entity::Partition(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_slice(&self) -> Option<&Slice> {
        match self {
            Entity::Slice(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_pool(&self) -> Option<&Pool> {
        match self {
            Entity::Pool(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_vdev(&self) -> Option<&Vdev> {
        match self {
            Entity::Vdev(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_dataset(&self) -> Option<&Dataset> {
        match self {
            Entity::Dataset(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_boot_environment(&self) -> Option<&BootEnvironment> {
        match self {
            Entity::BootEnvironment(b) => Some(b),
            _ => None,
        }
    }
}

macro_rules! entity_from {
    ($($variant:ident),*) => {
        $(
            impl From<$variant> for Entity {
                fn from(value: $variant) -> Self {
                    Entity::$variant(value)
                }
            }
        )*
    };
}

entity_from!(Logical, Disk, Partition, Slice, Pool, Vdev, Dataset, BootEnvironment);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_tags_round_trip() {
        for (kind, tag) in KIND_TAGS {
            assert_eq!(kind.tag(), tag);
            assert_eq!(EntityKind::from_tag(tag), Some(kind));
        }
        assert_eq!(EntityKind::from_tag("zvol"), None);
    }

    #[test]
    fn test_vdev_kind_keywords() {
        assert_eq!(VdevKind::Plain.keyword(), None);
        assert_eq!(format!("{}", VdevKind::Plain), "plain");
        assert_eq!(format!("{}", VdevKind::Raidz2), "raidz2");
        let kind: VdevKind = serde_json::from_str("\"none\"").unwrap();
        assert_eq!(kind, VdevKind::Plain);
    }

    #[test]
    fn test_entity_tagged_serde() {
        let entity = Entity::from(Dataset::volume("swap", Some(SizeValue::parse("2g").unwrap())));
        let json = serde_json::to_value(&entity).unwrap();
        assert_eq!(json["kind"], "dataset");
        assert_eq!(json["type"], "volume");

        let back: Entity = serde_json::from_value(json).unwrap();
        assert_eq!(back, entity);
    }

    #[test]
    fn test_partition_type_forms() {
        let legacy: PartitionType = serde_json::from_str("191").unwrap();
        assert_eq!(legacy, PartitionType::Legacy(191));
        let gpt: PartitionType =
            serde_json::from_str("\"6a85cf4d-1dd2-11b2-99a6-080020736631\"").unwrap();
        assert!(matches!(gpt, PartitionType::Gpt(_)));
    }

    #[test]
    fn test_geometry_cylinder_fallback() {
        let geometry = DiskGeometry {
            heads: 255,
            sectors_per_track: 63,
            ..Default::default()
        };
        assert_eq!(geometry.sectors_per_cylinder(), 16065);
    }
}
