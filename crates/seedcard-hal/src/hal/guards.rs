use crate::device::DevicePath;
use crate::{HalResult, MountOps, VolumeHandle, VolumeInfo, VolumeOps};
use std::path::{Path, PathBuf};

/// Holds every volume of a disk locked and dismounted for a raw write.
///
/// Locks are released when the guard is released or dropped, whichever comes
/// first. If acquisition fails partway, the volumes already locked are
/// released before the error is returned. Backends that report
/// [`VolumeOps::keep_locks_during_write`] as false have each handle closed as
/// soon as its volume is dismounted.
pub struct VolumeGuard {
    device: DevicePath,
    volumes: Vec<VolumeInfo>,
    handles: Vec<Box<dyn VolumeHandle>>,
    active: bool,
}

impl VolumeGuard {
    /// Open, lock, then dismount each volume backed by `device`, in that order.
    pub fn acquire<H: VolumeOps + ?Sized>(hal: &H, device: &DevicePath) -> HalResult<Self> {
        let volumes = hal.volumes_for_disk(device, None)?;
        let keep = hal.keep_locks_during_write();
        let mut guard = Self {
            device: device.clone(),
            volumes: Vec::with_capacity(volumes.len()),
            handles: Vec::with_capacity(volumes.len()),
            active: true,
        };

        for volume in &volumes {
            // On error `guard` drops here and closes what it holds.
            let mut handle = hal.open_volume(volume)?;
            handle.lock()?;
            handle.dismount()?;
            guard.volumes.push(volume.clone());
            if keep {
                log::info!("🔒 Locked volume {}", volume);
                guard.handles.push(handle);
            } else {
                log::info!("⏏️  Dismounted volume {}", volume);
            }
        }

        if guard.volumes.is_empty() {
            log::debug!("no mounted volumes on {}", device);
        }
        Ok(guard)
    }

    pub fn device(&self) -> &DevicePath {
        &self.device
    }

    /// Every volume that was locked and dismounted, held or not.
    pub fn volumes(&self) -> Vec<VolumeInfo> {
        self.volumes.clone()
    }

    /// Number of volume handles still open.
    pub fn held(&self) -> usize {
        self.handles.len()
    }

    /// Close every handle now, dropping the locks.
    pub fn release(mut self) {
        self.close_all();
    }

    fn close_all(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        for handle in self.handles.drain(..) {
            log::debug!("unlocking volume {}", handle.volume());
        }
    }
}

impl Drop for VolumeGuard {
    fn drop(&mut self) {
        if self.active && !self.handles.is_empty() {
            log::warn!(
                "volume guard for {} dropped while holding {} lock(s); releasing",
                self.device,
                self.handles.len()
            );
        }
        self.close_all();
    }
}

/// RAII guard that unmounts a disk when dropped.
pub struct MountGuard<'a, H: MountOps + ?Sized> {
    hal: &'a H,
    device: DevicePath,
    mount_point: PathBuf,
    active: bool,
}

impl<'a, H: MountOps + ?Sized> MountGuard<'a, H> {
    /// Mount partition `partition` of `device`.
    pub fn mount(hal: &'a H, device: &DevicePath, partition: u32) -> HalResult<Self> {
        let mount_point = hal.mount_partition(device, partition)?;
        Ok(Self {
            hal,
            device: device.clone(),
            mount_point,
            active: true,
        })
    }

    /// Prevent automatic unmounting and return the mount point.
    pub fn release(mut self) -> PathBuf {
        self.active = false;
        self.mount_point.clone()
    }

    pub fn mount_point(&self) -> &Path {
        &self.mount_point
    }
}

impl<'a, H: MountOps + ?Sized> Drop for MountGuard<'a, H> {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        if let Err(err) = self.hal.unmount_disk(&self.device) {
            log::warn!("mount guard failed to unmount {}: {}", self.device, err);
        }
    }
}
