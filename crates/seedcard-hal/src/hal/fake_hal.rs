//! Fake HAL implementation for testing.
//!
//! Records every operation and simulates volumes, locks, a capacity-limited
//! device and partition readiness, so flash flows can be exercised without
//! root privileges or real hardware.

use super::{BlockDevice, DeviceOps, MountOps, VolumeHandle, VolumeInfo, VolumeOps};
use crate::device::DevicePath;
use crate::{HalError, HalResult};
use std::collections::{HashMap, HashSet};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Operation records for testing and verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    OpenVolume { id: String },
    LockVolume { id: String },
    DismountVolume { id: String },
    CloseVolume { id: String },
    OpenDevice { path: PathBuf },
    Sync { path: PathBuf },
    Rescan { path: PathBuf },
    CloseDevice { path: PathBuf },
    Mount { device: PathBuf, partition: u32 },
    Unmount { device: PathBuf },
}

#[derive(Debug, Default)]
struct FakeHalState {
    operations: Vec<Operation>,
    volumes: Vec<VolumeInfo>,
    locked: HashSet<String>,
    fail_lock: HashSet<String>,
    disk_numbers: HashMap<PathBuf, u64>,
    capacity: HashMap<PathBuf, u64>,
    devices: HashMap<PathBuf, Vec<u8>>,
    partitions_not_ready: bool,
    release_after_dismount: bool,
    busy_rescan_while_locked: bool,
}

/// Fake HAL implementation that records operations without executing them.
#[derive(Debug, Clone, Default)]
pub struct FakeHal {
    state: Arc<Mutex<FakeHalState>>,
}

impl FakeHal {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeHalState> {
        lock_state(&self.state)
    }

    /// Get all recorded operations.
    pub fn operations(&self) -> Vec<Operation> {
        self.state().operations.clone()
    }

    /// Check if a specific operation was recorded.
    pub fn has_operation(&self, check: impl Fn(&Operation) -> bool) -> bool {
        self.state().operations.iter().any(check)
    }

    /// Register a volume on disk `disk_number`.
    pub fn add_volume(&self, id: &str, disk_number: u64, partition_number: u32) {
        self.state().volumes.push(VolumeInfo {
            id: id.to_string(),
            disk_number,
            partition_number,
        });
    }

    /// Give a Linux-style device a disk number so its volumes can be matched.
    pub fn set_disk_number(&self, device: impl Into<PathBuf>, disk_number: u64) {
        self.state().disk_numbers.insert(device.into(), disk_number);
    }

    /// Make locking `id` fail.
    pub fn fail_lock_on(&self, id: &str) {
        self.state().fail_lock.insert(id.to_string());
    }

    pub fn is_locked(&self, id: &str) -> bool {
        self.state().locked.contains(id)
    }

    /// Limit how many bytes the device at `path` accepts.
    pub fn set_device_capacity(&self, path: impl Into<PathBuf>, bytes: u64) {
        self.state().capacity.insert(path.into(), bytes);
    }

    /// Bytes written so far to the device at `path`.
    pub fn device_bytes(&self, path: &Path) -> Vec<u8> {
        self.state().devices.get(path).cloned().unwrap_or_default()
    }

    /// Make [`DeviceOps::partition_ready`] report `false` forever.
    pub fn never_settle(&self) {
        self.state().partitions_not_ready = true;
    }

    /// Close volume handles as soon as they are dismounted, as on Linux.
    pub fn release_volumes_after_dismount(&self) {
        self.state().release_after_dismount = true;
    }

    /// Make rescan fail with [`HalError::DiskBusy`] while any volume of the
    /// disk is still locked, the way the Linux kernel refuses BLKRRPART.
    pub fn reject_rescan_while_locked(&self) {
        self.state().busy_rescan_while_locked = true;
    }

    fn record_operation(&self, op: Operation) {
        self.state().operations.push(op);
    }
}

fn lock_state(state: &Mutex<FakeHalState>) -> MutexGuard<'_, FakeHalState> {
    // A panicking test thread must not poison every later assertion.
    state.lock().unwrap_or_else(|e| e.into_inner())
}

struct FakeVolumeHandle {
    info: VolumeInfo,
    state: Arc<Mutex<FakeHalState>>,
    locked: bool,
}

impl VolumeHandle for FakeVolumeHandle {
    fn volume(&self) -> &VolumeInfo {
        &self.info
    }

    fn lock(&mut self) -> HalResult<()> {
        let mut state = lock_state(&self.state);
        state.operations.push(Operation::LockVolume {
            id: self.info.id.clone(),
        });
        if state.fail_lock.contains(&self.info.id) || state.locked.contains(&self.info.id) {
            return Err(HalError::LockFailed {
                volume: self.info.id.clone(),
                source: io::Error::new(io::ErrorKind::PermissionDenied, "volume in use"),
            });
        }
        state.locked.insert(self.info.id.clone());
        self.locked = true;
        Ok(())
    }

    fn dismount(&mut self) -> HalResult<()> {
        lock_state(&self.state)
            .operations
            .push(Operation::DismountVolume {
                id: self.info.id.clone(),
            });
        Ok(())
    }
}

impl Drop for FakeVolumeHandle {
    fn drop(&mut self) {
        let mut state = lock_state(&self.state);
        if self.locked {
            state.locked.remove(&self.info.id);
        }
        state.operations.push(Operation::CloseVolume {
            id: self.info.id.clone(),
        });
    }
}

impl VolumeOps for FakeHal {
    fn disk_number(&self, device: &DevicePath) -> HalResult<u64> {
        if let Some(index) = device.disk_index() {
            return Ok(index);
        }
        self.state()
            .disk_numbers
            .get(device.path())
            .copied()
            .ok_or_else(|| HalError::InvalidDevice(device.to_string()))
    }

    fn enumerate_volumes(&self) -> HalResult<Vec<VolumeInfo>> {
        Ok(self.state().volumes.clone())
    }

    fn open_volume(&self, volume: &VolumeInfo) -> HalResult<Box<dyn VolumeHandle>> {
        self.record_operation(Operation::OpenVolume {
            id: volume.id.clone(),
        });
        Ok(Box::new(FakeVolumeHandle {
            info: volume.clone(),
            state: Arc::clone(&self.state),
            locked: false,
        }))
    }

    fn keep_locks_during_write(&self) -> bool {
        !self.state().release_after_dismount
    }
}

struct FakeDevice {
    path: PathBuf,
    disk: Option<u64>,
    state: Arc<Mutex<FakeHalState>>,
    pos: u64,
}

impl Write for FakeDevice {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = lock_state(&self.state);
        let capacity = state.capacity.get(&self.path).copied().unwrap_or(u64::MAX);
        let room = capacity.saturating_sub(self.pos);
        let n = (buf.len() as u64).min(room) as usize;
        if n == 0 {
            return Ok(0);
        }
        let bytes = state.devices.entry(self.path.clone()).or_default();
        let start = self.pos as usize;
        let end = start + n;
        if bytes.len() < end {
            bytes.resize(end, 0);
        }
        bytes[start..end].copy_from_slice(&buf[..n]);
        self.pos += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl BlockDevice for FakeDevice {
    fn path(&self) -> &Path {
        &self.path
    }

    fn sync(&mut self) -> HalResult<()> {
        lock_state(&self.state).operations.push(Operation::Sync {
            path: self.path.clone(),
        });
        Ok(())
    }

    fn rescan(&mut self) -> HalResult<()> {
        let mut state = lock_state(&self.state);
        state.operations.push(Operation::Rescan {
            path: self.path.clone(),
        });
        let busy = state.busy_rescan_while_locked
            && state
                .volumes
                .iter()
                .any(|v| Some(v.disk_number) == self.disk && state.locked.contains(&v.id));
        if busy {
            return Err(HalError::DiskBusy);
        }
        Ok(())
    }
}

impl Drop for FakeDevice {
    fn drop(&mut self) {
        lock_state(&self.state)
            .operations
            .push(Operation::CloseDevice {
                path: self.path.clone(),
            });
    }
}

impl DeviceOps for FakeHal {
    fn open_device(&self, device: &DevicePath) -> HalResult<Box<dyn BlockDevice>> {
        let path = device.raw_path();
        let disk = self.disk_number(device).ok();
        {
            let mut state = self.state();
            state.operations.push(Operation::OpenDevice { path: path.clone() });
            state.devices.insert(path.clone(), Vec::new());
        }
        Ok(Box::new(FakeDevice {
            path,
            disk,
            state: Arc::clone(&self.state),
            pos: 0,
        }))
    }

    fn partition_ready(&self, _device: &DevicePath, _partition: u32) -> HalResult<bool> {
        Ok(!self.state().partitions_not_ready)
    }
}

impl MountOps for FakeHal {
    fn mount_partition(&self, device: &DevicePath, partition: u32) -> HalResult<PathBuf> {
        self.record_operation(Operation::Mount {
            device: device.path().to_path_buf(),
            partition,
        });
        let name = match device.partition_node(partition) {
            Some(node) => node
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            None => format!("{}-part{}", device.name(), partition),
        };
        Ok(PathBuf::from("/media/fake").join(name))
    }

    fn unmount_disk(&self, device: &DevicePath) -> HalResult<()> {
        self.record_operation(Operation::Unmount {
            device: device.path().to_path_buf(),
        });
        Ok(())
    }
}
