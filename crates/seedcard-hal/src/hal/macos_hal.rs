//! macOS HAL implementation on top of `diskutil` and the BSD device nodes.

use super::mount_ops::single_new_entry;
use super::{BlockDevice, DeviceOps, MountOps, VolumeHandle, VolumeInfo, VolumeOps};
use crate::device::DevicePath;
use crate::process::checked_output;
use crate::{HalError, HalResult};
use nix::fcntl::{Flock, FlockArg};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

const DISKUTIL: &str = "diskutil";
const DISKUTIL_TIMEOUT: Duration = Duration::from_secs(60);
const VOLUMES: &str = "/Volumes";

#[derive(Debug, Clone, Default)]
pub struct MacosHal;

impl MacosHal {
    pub fn new() -> Self {
        Self
    }
}

fn device_io(path: &Path, source: io::Error) -> HalError {
    HalError::DeviceIo {
        path: path.to_path_buf(),
        source,
    }
}

/// `disk4s1` -> `(4, 1)`.
fn parse_slice_name(name: &str) -> Option<(u64, u32)> {
    let rest = name.strip_prefix("disk")?;
    let (disk, slice) = rest.split_once('s')?;
    Some((disk.parse().ok()?, slice.parse().ok()?))
}

/// Device nodes listed as mount sources by `mount`.
fn mounted_sources(mount_output: &str) -> Vec<String> {
    mount_output
        .lines()
        .filter_map(|line| line.split(" on ").next())
        .map(|s| s.trim().to_string())
        .filter(|s| s.starts_with("/dev/"))
        .collect()
}

/// Non-symlink entries of `/Volumes`, sorted.
fn mounted_volumes() -> HalResult<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in fs::read_dir(VOLUMES)?.flatten() {
        if entry.file_type().map(|t| t.is_symlink()).unwrap_or(true) {
            continue;
        }
        out.push(entry.path());
    }
    out.sort();
    Ok(out)
}

struct MacVolume {
    info: VolumeInfo,
    _flock: Option<Flock<File>>,
}

impl VolumeHandle for MacVolume {
    fn volume(&self) -> &VolumeInfo {
        &self.info
    }

    fn lock(&mut self) -> HalResult<()> {
        let file = File::open(&self.info.id).map_err(|source| HalError::LockFailed {
            volume: self.info.id.clone(),
            source,
        })?;
        let lock = Flock::lock(file, FlockArg::LockExclusiveNonblock).map_err(|(_, errno)| {
            HalError::LockFailed {
                volume: self.info.id.clone(),
                source: io::Error::from(errno),
            }
        })?;
        self._flock = Some(lock);
        Ok(())
    }

    fn dismount(&mut self) -> HalResult<()> {
        let mut mount = Command::new("mount");
        let output = checked_output("mount", &mut mount, DISKUTIL_TIMEOUT)?;
        let mounted = mounted_sources(&String::from_utf8_lossy(&output.stdout));
        if !mounted.iter().any(|s| s == &self.info.id) {
            return Ok(());
        }
        log::info!("⏏️  Unmounting {}", self.info.id);
        let mut cmd = Command::new(DISKUTIL);
        cmd.args(["unmount", "force"]).arg(&self.info.id);
        checked_output(DISKUTIL, &mut cmd, DISKUTIL_TIMEOUT).map_err(|e| {
            HalError::DismountFailed {
                volume: self.info.id.clone(),
                reason: e.to_string(),
            }
        })?;
        Ok(())
    }
}

impl VolumeOps for MacosHal {
    fn disk_number(&self, device: &DevicePath) -> HalResult<u64> {
        device
            .disk_index()
            .ok_or_else(|| HalError::InvalidDevice(device.to_string()))
    }

    fn enumerate_volumes(&self) -> HalResult<Vec<VolumeInfo>> {
        let mut volumes = Vec::new();
        for entry in fs::read_dir("/dev")?.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some((disk_number, partition_number)) = parse_slice_name(&name) {
                volumes.push(VolumeInfo {
                    id: format!("/dev/{name}"),
                    disk_number,
                    partition_number,
                });
            }
        }
        volumes.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(volumes)
    }

    fn open_volume(&self, volume: &VolumeInfo) -> HalResult<Box<dyn VolumeHandle>> {
        Ok(Box::new(MacVolume {
            info: volume.clone(),
            _flock: None,
        }))
    }
}

struct MacDevice {
    path: PathBuf,
    file: File,
}

impl Write for MacDevice {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl BlockDevice for MacDevice {
    fn path(&self) -> &Path {
        &self.path
    }

    fn sync(&mut self) -> HalResult<()> {
        self.file.sync_all().map_err(|e| device_io(&self.path, e))
    }

    fn rescan(&mut self) -> HalResult<()> {
        // diskarbitrationd re-probes the disk once the raw node is closed.
        log::debug!("no explicit rescan on macOS for {}", self.path.display());
        Ok(())
    }
}

impl DeviceOps for MacosHal {
    fn open_device(&self, device: &DevicePath) -> HalResult<Box<dyn BlockDevice>> {
        let path = device.raw_path();
        let mut opts = OpenOptions::new();
        opts.write(true);
        if device.is_image_file() {
            opts.create(true).truncate(true);
        }
        let file = opts.open(&path).map_err(|e| device_io(&path, e))?;
        Ok(Box::new(MacDevice { path, file }))
    }

    fn partition_ready(&self, device: &DevicePath, partition: u32) -> HalResult<bool> {
        Ok(device
            .partition_node(partition)
            .map_or(true, |node| node.exists()))
    }
}

impl MountOps for MacosHal {
    fn mount_partition(&self, device: &DevicePath, partition: u32) -> HalResult<PathBuf> {
        let node = device
            .partition_node(partition)
            .ok_or_else(|| HalError::InvalidDevice(device.to_string()))?;
        let before = mounted_volumes()?;
        log::info!("📂 Mounting {}", node.display());
        let mut cmd = Command::new(DISKUTIL);
        cmd.arg("mountDisk").arg(&node);
        checked_output(DISKUTIL, &mut cmd, DISKUTIL_TIMEOUT)?;
        let after = mounted_volumes()?;
        let found = single_new_entry(&node.display().to_string(), &before, &after)?;
        log::info!("  Mounted as {}", found.display());
        Ok(found)
    }

    fn unmount_disk(&self, device: &DevicePath) -> HalResult<()> {
        log::info!("⏏️  Unmounting {}", device);
        let mut cmd = Command::new(DISKUTIL);
        cmd.arg("unmountDisk").arg(device.path());
        checked_output(DISKUTIL, &mut cmd, DISKUTIL_TIMEOUT)?;
        Ok(())
    }
}
