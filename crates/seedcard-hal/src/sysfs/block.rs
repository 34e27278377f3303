//! Helpers related to block devices in sysfs.

use crate::{HalError, HalResult};
use std::fs;
use std::path::{Path, PathBuf};

/// Reads the block device size from `<sysfs dir>/size`.
///
/// The `size` file is expressed in 512-byte sectors.
pub fn block_device_size_bytes(sys_block_dev_dir: &Path) -> HalResult<u64> {
    let sectors_str = fs::read_to_string(sys_block_dev_dir.join("size"))?;
    let sectors: u64 = sectors_str
        .trim()
        .parse()
        .map_err(|e| HalError::Parse(format!("{}: {e}", sys_block_dev_dir.display())))?;
    Ok(sectors.saturating_mul(512))
}

#[derive(Debug, Clone)]
pub struct BlockDeviceInfo {
    pub name: String,
    pub dev_path: PathBuf,
    pub size_bytes: u64,
    pub vendor: Option<String>,
    pub model: Option<String>,
    pub removable: bool,
    pub read_only: bool,
}

/// Removable, writable whole disks: the SD card candidates.
pub fn removable_disks_in(sys_block_root: &Path) -> HalResult<Vec<BlockDeviceInfo>> {
    let mut disks: Vec<_> = scan_block_devices_in(sys_block_root)?
        .into_iter()
        .filter(|d| d.removable && !d.read_only)
        .collect();
    disks.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(disks)
}

pub fn scan_block_devices_in(sys_block_root: &Path) -> HalResult<Vec<BlockDeviceInfo>> {
    let mut out = Vec::new();
    let entries = fs::read_dir(sys_block_root)?;
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if should_skip_block_device(&name) {
            continue;
        }
        let sysfs_path = sys_block_root.join(&name);
        let size_bytes = match block_device_size_bytes(&sysfs_path) {
            Ok(v) => v,
            Err(_) => continue,
        };
        if size_bytes == 0 {
            continue;
        }

        out.push(BlockDeviceInfo {
            dev_path: PathBuf::from("/dev").join(&name),
            size_bytes,
            vendor: read_trimmed(sysfs_path.join("device/vendor")),
            model: read_trimmed(sysfs_path.join("device/model")),
            removable: read_flag(sysfs_path.join("removable")),
            read_only: read_flag(sysfs_path.join("ro")),
            name,
        });
    }
    Ok(out)
}

/// A partition as listed under `/sys/class/block`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionEntry {
    pub name: String,
    pub disk: String,
    pub number: u32,
}

/// Lists partitions and the whole disk each belongs to.
///
/// A partition `sdb1` shows up both as `<root>/sdb1` (with a `partition`
/// file) and as the subdirectory `<root>/sdb/sdb1` of its disk.
pub fn scan_partitions_in(sys_class_block: &Path) -> HalResult<Vec<PartitionEntry>> {
    let mut disks = Vec::new();
    let mut parts = Vec::new();
    for entry in fs::read_dir(sys_class_block)?.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        let path = sys_class_block.join(&name);
        match read_trimmed(path.join("partition")).and_then(|v| v.parse::<u32>().ok()) {
            Some(number) => parts.push((name, number)),
            None => disks.push(name),
        }
    }

    let mut out = Vec::new();
    for (name, number) in parts {
        let parent = disks
            .iter()
            .find(|disk| sys_class_block.join(disk.as_str()).join(&name).exists());
        match parent {
            Some(disk) => out.push(PartitionEntry {
                name,
                disk: disk.clone(),
                number,
            }),
            None => log::debug!("partition {} has no parent disk in sysfs", name),
        }
    }
    out.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(out)
}

/// Encodes `<root>/<name>/dev` ("major:minor") as one number.
pub fn dev_number(sys_class_block: &Path, name: &str) -> HalResult<u64> {
    let path = sys_class_block.join(name).join("dev");
    let raw = read_trimmed(path.clone())
        .ok_or_else(|| HalError::InvalidDevice(format!("no sysfs entry for {name}")))?;
    let (major, minor) = raw
        .split_once(':')
        .ok_or_else(|| HalError::Parse(format!("{}: {raw}", path.display())))?;
    let parse = |v: &str| {
        v.parse::<u64>()
            .map_err(|e| HalError::Parse(format!("{}: {e}", path.display())))
    };
    Ok((parse(major)? << 20) | parse(minor)?)
}

fn read_trimmed(path: PathBuf) -> Option<String> {
    fs::read_to_string(path)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn read_flag(path: PathBuf) -> bool {
    read_trimmed(path)
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0)
        == 1
}

fn should_skip_block_device(name: &str) -> bool {
    name.starts_with("loop")
        || name.starts_with("ram")
        || name.starts_with("zram")
        || name.starts_with("dm-")
        || name.starts_with("md")
        || name.starts_with("sr")
}
