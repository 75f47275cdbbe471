//! Reserved Datasets
//!
//! `var` lives inside every boot environment; `VARSHARE` (also accepted as
//! `share`) is shared between boot environments and never auto-mounted.

use super::entity::Dataset;

/// A dataset whose placement is fixed by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservedDataset {
    /// Name used when the dataset is synthesized
    pub name: &'static str,
    /// Other names that refer to the same dataset
    pub aliases: &'static [&'static str],
    pub mountpoint: &'static str,
    pub in_be: bool,
    /// Properties set when the dataset is synthesized
    pub properties: &'static [(&'static str, &'static str)],
}

pub const VAR_DATASET: ReservedDataset = ReservedDataset {
    name: "var",
    aliases: &[],
    mountpoint: "/var",
    in_be: true,
    properties: &[],
};

pub const VARSHARE_DATASET: ReservedDataset = ReservedDataset {
    name: "VARSHARE",
    aliases: &["share"],
    mountpoint: "/var/share",
    in_be: false,
    properties: &[("canmount", "noauto")],
};

pub const RESERVED_DATASETS: [ReservedDataset; 2] = [VAR_DATASET, VARSHARE_DATASET];

impl ReservedDataset {
    pub fn matches_name(&self, name: &str) -> bool {
        self.name == name || self.aliases.contains(&name)
    }

    pub fn matches_mountpoint(&self, mountpoint: Option<&str>) -> bool {
        mountpoint.map(|m| m.trim_end_matches('/')) == Some(self.mountpoint)
    }

    /// Describe how a dataset carrying a reserved name or mountpoint deviates
    /// from the reserved declaration, if it does
    pub fn declaration_conflict(&self, dataset: &Dataset) -> Option<String> {
        if dataset.is_volume() {
            return Some(format!(
                "'{}' is reserved for a filesystem but is declared as a volume",
                dataset.name
            ));
        }
        if !self.matches_name(&dataset.name) {
            return Some(format!(
                "mountpoint {} is reserved for dataset '{}', not '{}'",
                self.mountpoint, self.name, dataset.name
            ));
        }
        if !self.matches_mountpoint(dataset.mountpoint.as_deref()) {
            return Some(format!(
                "'{}' must be mounted at {} (declared {})",
                dataset.name,
                self.mountpoint,
                dataset.mountpoint.as_deref().unwrap_or("<inherited>")
            ));
        }
        if dataset.in_be != self.in_be {
            return Some(format!(
                "'{}' must have in_be = {}",
                dataset.name, self.in_be
            ));
        }
        None
    }
}

/// The reserved dataset a dataset refers to by name or mountpoint
pub fn reserved_for(dataset: &Dataset) -> Option<&'static ReservedDataset> {
    RESERVED_DATASETS.iter().find(|r| {
        r.matches_name(&dataset.name) || r.matches_mountpoint(dataset.mountpoint.as_deref())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matching() {
        assert!(VARSHARE_DATASET.matches_name("share"));
        assert!(VARSHARE_DATASET.matches_name("VARSHARE"));
        assert!(!VAR_DATASET.matches_name("VAR"));
        assert!(VAR_DATASET.matches_mountpoint(Some("/var/")));
        assert!(!VAR_DATASET.matches_mountpoint(None));
    }

    #[test]
    fn test_declaration_conflicts() {
        let mut var = Dataset::filesystem("var").mounted_at("/var");
        var.in_be = true;
        assert_eq!(VAR_DATASET.declaration_conflict(&var), None);

        var.in_be = false;
        assert!(VAR_DATASET.declaration_conflict(&var).is_some());

        let volume = Dataset::volume("var", None);
        assert!(VAR_DATASET
            .declaration_conflict(&volume)
            .unwrap()
            .contains("volume"));

        let misnamed = Dataset::filesystem("logs").mounted_at("/var");
        assert_eq!(reserved_for(&misnamed), Some(&VAR_DATASET));
        assert!(VAR_DATASET.declaration_conflict(&misnamed).is_some());

        assert_eq!(reserved_for(&Dataset::filesystem("export")), None);
    }
}
