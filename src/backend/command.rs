//! Command Backend
//!
//! Drives the native tools: `zpool` and `zfs` for pools and datasets,
//! `beadm` for boot environments, `sgdisk` for GPT tables and `fdisk` for
//! legacy tables. Tool output on failure is passed through verbatim.

use crate::domain::ports::{PartitionEntry, StorageBackend, VdevSpec};
use crate::error::{Error, Result};
use indexmap::IndexMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use tracing::{debug, warn};

/// Sectors per cylinder assumed for legacy tables (255 heads, 63 sectors)
pub const DEFAULT_CYLINDER_SECTORS: u64 = 255 * 63;

/// Resolved tool locations
#[derive(Debug, Clone)]
pub struct ToolPaths {
    pub zpool: PathBuf,
    pub zfs: PathBuf,
    pub beadm: Option<PathBuf>,
    pub sgdisk: Option<PathBuf>,
    pub fdisk: Option<PathBuf>,
}

impl ToolPaths {
    /// Look every tool up on `PATH`
    pub fn detect() -> Result<Self> {
        let required = |tool: &str| {
            which::which(tool).map_err(|e| Error::BackendUnavailable {
                backend: "command".to_string(),
                reason: format!("{} not found: {}", tool, e),
            })
        };
        let optional = |tool: &str| {
            let found = which::which(tool).ok();
            if found.is_none() {
                warn!("{} not found on PATH; related operations will fail", tool);
            }
            found
        };

        Ok(Self {
            zpool: required("zpool")?,
            zfs: required("zfs")?,
            beadm: optional("beadm"),
            sgdisk: optional("sgdisk"),
            fdisk: optional("fdisk"),
        })
    }
}

/// Backend running the platform's storage tools
#[derive(Debug, Clone)]
pub struct CommandBackend {
    tools: ToolPaths,
    /// Device directory prefixed to disk ids for partitioning tools
    device_dir: PathBuf,
    cylinder_sectors: u64,
}

impl CommandBackend {
    pub fn new(tools: ToolPaths) -> Self {
        Self {
            tools,
            device_dir: PathBuf::from("/dev/rdsk"),
            cylinder_sectors: DEFAULT_CYLINDER_SECTORS,
        }
    }

    /// Backend using the tools found on `PATH`
    pub fn detect() -> Result<Self> {
        Ok(Self::new(ToolPaths::detect()?))
    }

    pub fn with_device_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.device_dir = dir.into();
        self
    }

    pub fn with_cylinder_sectors(mut self, sectors: u64) -> Self {
        self.cylinder_sectors = sectors.max(1);
        self
    }

    fn run(
        &self,
        operation: &str,
        target: &str,
        program: &Path,
        args: &[String],
    ) -> Result<Output> {
        debug!("Running {} {}", program.display(), args.join(" "));
        Command::new(program)
            .args(args)
            .output()
            .map_err(|e| Error::backend(operation, target, e.to_string()))
    }

    /// Run and require success
    fn run_checked(
        &self,
        operation: &str,
        target: &str,
        program: &Path,
        args: &[String],
    ) -> Result<String> {
        let output = self.run(operation, target, program, args)?;
        if !output.status.success() {
            return Err(Error::backend(operation, target, diagnostic(&output)));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn tool<'a>(&self, path: &'a Option<PathBuf>, name: &str) -> Result<&'a Path> {
        path.as_deref().ok_or_else(|| Error::BackendUnavailable {
            backend: "command".to_string(),
            reason: format!("{} is not installed", name),
        })
    }

    fn beadm_list(&self) -> Result<Vec<BeListing>> {
        let beadm = self.tool(&self.tools.beadm, "beadm")?;
        let out = self.run_checked("list_boot_environments", "", beadm, &args(&["list", "-H"]))?;
        Ok(parse_beadm_list(&out))
    }

    fn write_gpt(&self, disk: &str, device: &str, entries: &[PartitionEntry]) -> Result<()> {
        let sgdisk = self.tool(&self.tools.sgdisk, "sgdisk")?;
        self.run_checked(
            "write_partition_table",
            disk,
            sgdisk,
            &args(&["--zap-all", device]),
        )?;
        if entries.is_empty() {
            return Ok(());
        }
        let mut argv = sgdisk_args(entries);
        argv.push(device.to_string());
        self.run_checked("write_partition_table", disk, sgdisk, &argv)?;
        Ok(())
    }

    fn write_legacy(&self, disk: &str, device: &str, entries: &[PartitionEntry]) -> Result<()> {
        let fdisk = self.tool(&self.tools.fdisk, "fdisk")?;
        let spec = fdisk_spec(entries, self.cylinder_sectors);

        let mut child = Command::new(fdisk)
            .args(["-F", "/dev/stdin", device])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::backend("write_partition_table", disk, e.to_string()))?;
        // stdin is closed at the end of the match so fdisk sees EOF
        let written = match child.stdin.take() {
            Some(mut stdin) => stdin.write_all(spec.as_bytes()),
            None => Ok(()),
        };
        let output = child
            .wait_with_output()
            .map_err(|e| Error::backend("write_partition_table", disk, e.to_string()))?;
        if !output.status.success() {
            return Err(Error::backend("write_partition_table", disk, diagnostic(&output)));
        }
        if let Err(e) = written {
            return Err(Error::backend(
                "write_partition_table",
                disk,
                format!("writing table to {}: {}", fdisk.display(), e),
            ));
        }
        Ok(())
    }
}

impl StorageBackend for CommandBackend {
    fn name(&self) -> &str {
        "command"
    }

    fn pool_exists(&self, name: &str) -> Result<bool> {
        let output = self.run(
            "pool_exists",
            name,
            &self.tools.zpool,
            &args(&["list", "-H", "-o", "name", name]),
        )?;
        if output.status.success() {
            return Ok(true);
        }
        let diag = diagnostic(&output);
        if is_missing(&diag) {
            Ok(false)
        } else {
            Err(Error::backend("pool_exists", name, diag))
        }
    }

    fn create_pool(&self, name: &str, vdevs: &[VdevSpec]) -> Result<()> {
        self.run_checked("create_pool", name, &self.tools.zpool, &zpool_create_args(name, vdevs))?;
        Ok(())
    }

    fn destroy_pool(&self, name: &str, force: bool) -> Result<()> {
        let mut argv = args(&["destroy"]);
        if force {
            argv.push("-f".to_string());
        }
        argv.push(name.to_string());
        let output = self.run("destroy_pool", name, &self.tools.zpool, &argv)?;
        if output.status.success() {
            return Ok(());
        }
        let diag = diagnostic(&output);
        if is_missing(&diag) {
            Err(Error::not_found("pool", name))
        } else {
            Err(Error::backend("destroy_pool", name, diag))
        }
    }

    fn dataset_exists(&self, path: &str) -> Result<bool> {
        let output = self.run(
            "dataset_exists",
            path,
            &self.tools.zfs,
            &args(&["list", "-H", "-o", "name", path]),
        )?;
        if output.status.success() {
            return Ok(true);
        }
        let diag = diagnostic(&output);
        if is_missing(&diag) {
            Ok(false)
        } else {
            Err(Error::backend("dataset_exists", path, diag))
        }
    }

    fn create_filesystem(
        &self,
        path: &str,
        mountpoint: Option<&str>,
        properties: &IndexMap<String, String>,
    ) -> Result<()> {
        self.run_checked(
            "create_filesystem",
            path,
            &self.tools.zfs,
            &zfs_create_filesystem_args(path, mountpoint, properties),
        )?;
        Ok(())
    }

    fn create_volume(&self, path: &str, size_bytes: u64) -> Result<()> {
        let argv = vec![
            "create".to_string(),
            "-p".to_string(),
            "-V".to_string(),
            size_bytes.to_string(),
            path.to_string(),
        ];
        self.run_checked("create_volume", path, &self.tools.zfs, &argv)?;
        Ok(())
    }

    fn destroy_dataset(&self, path: &str) -> Result<()> {
        let output = self.run(
            "destroy_dataset",
            path,
            &self.tools.zfs,
            &args(&["destroy", "-r", path]),
        )?;
        if output.status.success() {
            return Ok(());
        }
        let diag = diagnostic(&output);
        if is_missing(&diag) {
            Err(Error::not_found("dataset", path))
        } else {
            Err(Error::backend("destroy_dataset", path, diag))
        }
    }

    fn write_partition_table(&self, disk_id: &str, entries: &[PartitionEntry]) -> Result<()> {
        let gpt = entries.iter().any(|e| matches!(e, PartitionEntry::Gpt { .. }));
        if gpt {
            let device = self.device_dir.join(disk_id);
            self.write_gpt(disk_id, &device.to_string_lossy(), entries)
        } else {
            let device = self.device_dir.join(format!("{}p0", disk_id));
            self.write_legacy(disk_id, &device.to_string_lossy(), entries)
        }
    }

    fn boot_environment_exists(&self, _pool: &str, name: &str) -> Result<bool> {
        Ok(self.beadm_list()?.iter().any(|be| be.name == name))
    }

    fn create_boot_environment(&self, pool: &str, name: &str, mountpoint: Option<&str>) -> Result<()> {
        let beadm = self.tool(&self.tools.beadm, "beadm")?;
        self.run_checked(
            "create_boot_environment",
            name,
            beadm,
            &args(&["create", "-p", pool, name]),
        )?;
        if let Some(mountpoint) = mountpoint {
            self.run_checked(
                "mount_boot_environment",
                name,
                beadm,
                &args(&["mount", name, mountpoint]),
            )?;
        }
        Ok(())
    }

    fn active_boot_environment(&self, _pool: &str) -> Result<Option<String>> {
        Ok(self
            .beadm_list()?
            .into_iter()
            .find(|be| be.active_on_reboot)
            .map(|be| be.name))
    }

    fn activate_boot_environment(&self, _pool: &str, name: &str) -> Result<()> {
        let beadm = self.tool(&self.tools.beadm, "beadm")?;
        self.run_checked(
            "activate_boot_environment",
            name,
            beadm,
            &args(&["activate", name]),
        )?;
        Ok(())
    }
}

// =============================================================================
// Argument Builders and Parsers
// =============================================================================

fn args(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Tool diagnostic: stderr, or stdout when stderr is empty
fn diagnostic(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if stderr.is_empty() {
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    } else {
        stderr
    }
}

fn is_missing(diagnostic: &str) -> bool {
    diagnostic.contains("no such pool") || diagnostic.contains("does not exist")
}

/// `zpool create` arguments; plain groups list members without a keyword
pub fn zpool_create_args(name: &str, vdevs: &[VdevSpec]) -> Vec<String> {
    let mut argv = args(&["create", "-f", name]);
    for vdev in vdevs {
        if let Some(keyword) = vdev.kind.keyword() {
            argv.push(keyword.to_string());
        }
        argv.extend(vdev.members.iter().cloned());
    }
    argv
}

/// `zfs create` arguments for a filesystem
pub fn zfs_create_filesystem_args(
    path: &str,
    mountpoint: Option<&str>,
    properties: &IndexMap<String, String>,
) -> Vec<String> {
    let mut argv = args(&["create", "-p"]);
    if let Some(mountpoint) = mountpoint {
        argv.push("-o".to_string());
        argv.push(format!("mountpoint={}", mountpoint));
    }
    for (key, value) in properties {
        argv.push("-o".to_string());
        argv.push(format!("{}={}", key, value));
    }
    argv.push(path.to_string());
    argv
}

/// `sgdisk` arguments creating each GPT entry, numbered from 1
pub fn sgdisk_args(entries: &[PartitionEntry]) -> Vec<String> {
    let mut argv = Vec::new();
    let gpt = entries.iter().filter_map(|e| match e {
        PartitionEntry::Gpt {
            type_guid,
            start_sector,
            end_sector,
            name,
        } => Some((type_guid, start_sector, end_sector, name)),
        PartitionEntry::Legacy { .. } => None,
    });
    for (i, (guid, start, end, name)) in gpt.enumerate() {
        let number = i + 1;
        argv.push(format!("--new={}:{}:{}", number, start, end));
        argv.push(format!("--typecode={}:{}", number, guid));
        if !name.is_empty() {
            argv.push(format!("--change-name={}:{}", number, name));
        }
    }
    argv
}

/// `fdisk -F` table: `id act bhead bsect bcyl ehead esect ecyl rsect numsect`
pub fn fdisk_spec(entries: &[PartitionEntry], cylinder_sectors: u64) -> String {
    let mut spec = String::new();
    for entry in entries {
        if let PartitionEntry::Legacy {
            type_id,
            start_cylinder,
            size_sectors,
            active,
        } = entry
        {
            let act = if *active { 128 } else { 0 };
            let rsect = (start_cylinder * cylinder_sectors).max(1);
            spec.push_str(&format!(
                "{} {} 0 0 0 0 0 0 {} {}\n",
                type_id, act, rsect, size_sectors
            ));
        }
    }
    spec
}

/// One line of `beadm list -H`
#[derive(Debug, Clone, PartialEq, Eq)]
struct BeListing {
    name: String,
    active_on_reboot: bool,
}

/// Parse `beadm list -H` (`name;uuid;flags;mountpoint;space;policy;created`)
fn parse_beadm_list(output: &str) -> Vec<BeListing> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.trim().split(';');
            let name = fields.next().filter(|n| !n.is_empty())?;
            let flags = fields.nth(1).unwrap_or("");
            Some(BeListing {
                name: name.to_string(),
                active_on_reboot: flags.contains('R'),
            })
        })
        .collect()
}
