//! Volume enumeration, locking and dismounting.

use crate::device::DevicePath;
use crate::HalResult;
use std::fmt;

/// One OS volume and the disk it lives on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeInfo {
    /// OS identifier: a volume GUID path on Windows, a partition node elsewhere.
    pub id: String,
    pub disk_number: u64,
    /// 1-based partition number on the backing disk.
    pub partition_number: u32,
}

impl fmt::Display for VolumeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (disk {}, partition {})",
            self.id, self.disk_number, self.partition_number
        )
    }
}

/// An open volume. Dropping the handle closes it, which releases any lock.
pub trait VolumeHandle: Send {
    fn volume(&self) -> &VolumeInfo;

    /// Take exclusive access; nobody else may open or remount the volume
    /// while the lock is held.
    fn lock(&mut self) -> HalResult<()>;

    /// Detach the filesystem. Only valid after [`VolumeHandle::lock`].
    fn dismount(&mut self) -> HalResult<()>;
}

/// Maps volumes to disks and hands out lockable handles.
pub trait VolumeOps {
    /// Disk number the OS uses for `device`, comparable with
    /// [`VolumeInfo::disk_number`].
    fn disk_number(&self, device: &DevicePath) -> HalResult<u64>;

    /// Every volume the OS knows about, on any disk.
    fn enumerate_volumes(&self) -> HalResult<Vec<VolumeInfo>>;

    fn open_volume(&self, volume: &VolumeInfo) -> HalResult<Box<dyn VolumeHandle>>;

    /// Whether volume handles stay open until the write and rescan are done.
    ///
    /// Linux will not reread a partition table while any partition of the
    /// disk is open, so there the handles close right after dismount and the
    /// exclusive whole-disk open keeps other users out instead.
    fn keep_locks_during_write(&self) -> bool {
        true
    }

    /// Volumes backed by `device`, optionally narrowed to one partition.
    fn volumes_for_disk(
        &self,
        device: &DevicePath,
        partition: Option<u32>,
    ) -> HalResult<Vec<VolumeInfo>> {
        if device.is_image_file() {
            return Ok(Vec::new());
        }
        let disk = self.disk_number(device)?;
        let volumes = self
            .enumerate_volumes()?
            .into_iter()
            .filter(|v| v.disk_number == disk)
            .filter(|v| partition.map_or(true, |p| v.partition_number == p))
            .collect();
        Ok(volumes)
    }
}
