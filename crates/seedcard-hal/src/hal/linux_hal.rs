//! Linux HAL implementation using sysfs, procfs, ioctls and udisks.

use super::{BlockDevice, DeviceOps, DiskSummary, MountOps, VolumeHandle, VolumeInfo, VolumeOps};
use crate::device::DevicePath;
use crate::process::output_with_timeout;
use crate::procfs::mountinfo::{mounts_of_source, parse_mountinfo};
use crate::sysfs::block::{dev_number, removable_disks_in, scan_partitions_in};
use crate::{HalError, HalResult};
use nix::fcntl::{Flock, FlockArg};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::{FileTypeExt, OpenOptionsExt};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

const SYS_CLASS_BLOCK: &str = "/sys/class/block";
const SYS_BLOCK: &str = "/sys/block";
const MOUNTINFO: &str = "/proc/self/mountinfo";
const UDISKSCTL: &str = "udisksctl";
const UDISKS_TIMEOUT: Duration = Duration::from_secs(30);

// BLKRRPART: _IO(0x12, 95)
nix::ioctl_none!(blkrrpart, 0x12, 95);

/// Real HAL implementation for Linux systems.
#[derive(Debug, Clone)]
pub struct LinuxHal {
    sys_class_block: PathBuf,
}

impl Default for LinuxHal {
    fn default() -> Self {
        Self {
            sys_class_block: PathBuf::from(SYS_CLASS_BLOCK),
        }
    }
}

impl LinuxHal {
    pub fn new() -> Self {
        Self::default()
    }

    fn mount_entries(&self) -> HalResult<Vec<crate::procfs::mountinfo::MountInfo>> {
        Ok(parse_mountinfo(&fs::read_to_string(MOUNTINFO)?))
    }
}

fn map_nix_err(err: nix::errno::Errno) -> HalError {
    use nix::errno::Errno;
    match err {
        Errno::EBUSY => HalError::DiskBusy,
        Errno::EACCES | Errno::EPERM => HalError::PermissionDenied,
        other => HalError::Nix(other),
    }
}

fn device_io(path: &Path, source: io::Error) -> HalError {
    HalError::DeviceIo {
        path: path.to_path_buf(),
        source,
    }
}

struct LinuxVolume {
    info: VolumeInfo,
    // Released when dropped.
    _flock: Option<Flock<File>>,
}

impl VolumeHandle for LinuxVolume {
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
        let entries = parse_mountinfo(&fs::read_to_string(MOUNTINFO)?);
        for mount_point in mounts_of_source(&entries, Path::new(&self.info.id)) {
            log::info!("⏏️  Unmounting {} from {}", self.info.id, mount_point.display());
            nix::mount::umount2(&mount_point, nix::mount::MntFlags::empty()).map_err(|e| {
                HalError::DismountFailed {
                    volume: self.info.id.clone(),
                    reason: format!("{}: {}", mount_point.display(), map_nix_err(e)),
                }
            })?;
        }
        Ok(())
    }
}

impl VolumeOps for LinuxHal {
    fn disk_number(&self, device: &DevicePath) -> HalResult<u64> {
        dev_number(&self.sys_class_block, &device.name())
    }

    fn enumerate_volumes(&self) -> HalResult<Vec<VolumeInfo>> {
        let mut volumes = Vec::new();
        for part in scan_partitions_in(&self.sys_class_block)? {
            let disk_number = match dev_number(&self.sys_class_block, &part.disk) {
                Ok(n) => n,
                Err(err) => {
                    log::debug!("skipping {}: {}", part.name, err);
                    continue;
                }
            };
            volumes.push(VolumeInfo {
                id: format!("/dev/{}", part.name),
                disk_number,
                partition_number: part.number,
            });
        }
        Ok(volumes)
    }

    fn open_volume(&self, volume: &VolumeInfo) -> HalResult<Box<dyn VolumeHandle>> {
        Ok(Box::new(LinuxVolume {
            info: volume.clone(),
            _flock: None,
        }))
    }

    // BLKRRPART fails with EBUSY while any partition fd is open. The O_EXCL
    // open in `open_device` is what keeps the disk ours during the write.
    fn keep_locks_during_write(&self) -> bool {
        false
    }
}

struct LinuxDevice {
    path: PathBuf,
    file: File,
}

impl Write for LinuxDevice {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl BlockDevice for LinuxDevice {
    fn path(&self) -> &Path {
        &self.path
    }

    fn sync(&mut self) -> HalResult<()> {
        self.file
            .sync_all()
            .map_err(|e| device_io(&self.path, e))
    }

    fn rescan(&mut self) -> HalResult<()> {
        let meta = self.file.metadata().map_err(|e| device_io(&self.path, e))?;
        if !meta.file_type().is_block_device() {
            log::debug!("{} is not a block device; no partition table to reload", self.path.display());
            return Ok(());
        }
        // SAFETY: the fd is owned by `self.file` and stays open for the call.
        unsafe { blkrrpart(self.file.as_raw_fd()) }
            .map_err(|e| device_io(&self.path, io::Error::from(e)))?;
        Ok(())
    }
}

impl DeviceOps for LinuxHal {
    fn open_device(&self, device: &DevicePath) -> HalResult<Box<dyn BlockDevice>> {
        let path = device.raw_path();
        let mut opts = OpenOptions::new();
        opts.write(true);
        if device.is_image_file() {
            opts.create(true).truncate(true);
        } else {
            // O_EXCL on a block device fails with EBUSY while anything has it mounted.
            opts.custom_flags(libc::O_EXCL);
        }
        let file = opts.open(&path).map_err(|e| device_io(&path, e))?;
        Ok(Box::new(LinuxDevice { path, file }))
    }

    fn partition_ready(&self, device: &DevicePath, partition: u32) -> HalResult<bool> {
        Ok(device
            .partition_node(partition)
            .map_or(true, |node| node.exists()))
    }

    fn removable_disks(&self) -> HalResult<Vec<DiskSummary>> {
        Ok(removable_disks_in(Path::new(SYS_BLOCK))?
            .into_iter()
            .map(|d| DiskSummary {
                path: d.dev_path,
                size_bytes: d.size_bytes,
                model: match (d.vendor, d.model) {
                    (Some(v), Some(m)) => Some(format!("{v} {m}")),
                    (v, m) => m.or(v),
                },
            })
            .collect())
    }
}

impl MountOps for LinuxHal {
    fn mount_partition(&self, device: &DevicePath, partition: u32) -> HalResult<PathBuf> {
        let node = device
            .partition_node(partition)
            .ok_or_else(|| HalError::InvalidDevice(device.to_string()))?;
        log::info!("📂 Mounting {}", node.display());

        let mut cmd = Command::new(UDISKSCTL);
        cmd.arg("mount").arg("-b").arg(&node);
        let output = output_with_timeout(UDISKSCTL, &mut cmd, UDISKS_TIMEOUT)?;
        // "already mounted" comes back on stderr with a failing exit code.
        let text = format!(
            "{}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        match super::mount_ops::parse_udisksctl_mount(&text) {
            Some(path) => {
                log::info!("  Mounted as {}", path.display());
                Ok(path)
            }
            None => Err(HalError::MountFailed {
                device: node.display().to_string(),
                output: text.trim().to_string(),
            }),
        }
    }

    fn unmount_disk(&self, device: &DevicePath) -> HalResult<()> {
        let entries = self.mount_entries()?;
        let disk = device.name();
        for part in scan_partitions_in(&self.sys_class_block)?
            .into_iter()
            .filter(|p| p.disk == disk)
        {
            let node = PathBuf::from("/dev").join(&part.name);
            if mounts_of_source(&entries, &node).is_empty() {
                continue;
            }
            log::info!("⏏️  Unmounting {}", node.display());
            let mut cmd = Command::new(UDISKSCTL);
            cmd.args(["unmount", "-f", "-b"]).arg(&node);
            crate::process::checked_output(UDISKSCTL, &mut cmd, UDISKS_TIMEOUT)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn hal_with_sysfs(root: &Path) -> LinuxHal {
        for (name, dev) in [("sdb", "8:16"), ("sda", "8:0")] {
            fs::create_dir_all(root.join(name)).unwrap();
            fs::write(root.join(name).join("dev"), format!("{dev}\n")).unwrap();
        }
        for (disk, part, num) in [("sdb", "sdb1", 1), ("sdb", "sdb2", 2), ("sda", "sda1", 1)] {
            fs::create_dir_all(root.join(part)).unwrap();
            fs::write(root.join(part).join("partition"), format!("{num}\n")).unwrap();
            fs::create_dir_all(root.join(disk).join(part)).unwrap();
        }
        LinuxHal {
            sys_class_block: root.to_path_buf(),
        }
    }

    #[test]
    fn partition_handles_are_not_held_across_rescan() {
        assert!(!LinuxHal::new().keep_locks_during_write());
    }

    #[test]
    fn volumes_for_disk_maps_partitions_by_dev_number() {
        let tmp = tempdir().unwrap();
        let hal = hal_with_sysfs(tmp.path());
        let device = DevicePath::parse("/dev/sdb").unwrap();

        let all = hal.volumes_for_disk(&device, None).unwrap();
        let ids: Vec<_> = all.iter().map(|v| v.id.as_str()).collect();
        assert_eq!(ids, vec!["/dev/sdb1", "/dev/sdb2"]);

        let boot = hal.volumes_for_disk(&device, Some(1)).unwrap();
        assert_eq!(boot.len(), 1);
        assert_eq!(boot[0].partition_number, 1);
    }

    #[test]
    fn image_file_device_roundtrips_bytes() {
        let tmp = tempdir().unwrap();
        let target = tmp.path().join("target.img");
        let device = DevicePath::parse(&target).unwrap();

        let hal = LinuxHal::new();
        let mut dev = hal.open_device(&device).unwrap();
        dev.write_all(b"seed content").unwrap();
        dev.sync().unwrap();
        dev.rescan().unwrap();
        drop(dev);

        assert_eq!(fs::read(&target).unwrap(), b"seed content");
        assert!(hal.partition_ready(&device, 1).unwrap());
    }

    #[test]
    fn partition_ready_checks_node() {
        let hal = LinuxHal::new();
        let device = DevicePath::parse("/dev/sdzz").unwrap();
        assert!(!hal.partition_ready(&device, 1).unwrap());
    }
}
