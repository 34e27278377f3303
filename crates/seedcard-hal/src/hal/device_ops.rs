//! Raw block device access for image writes.

use crate::device::DevicePath;
use crate::{HalError, HalResult};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// A removable disk offered as a flash target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskSummary {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub model: Option<String>,
}

/// A whole disk opened for direct writing.
pub trait BlockDevice: Write + Send {
    fn path(&self) -> &Path;

    /// Flush OS caches down to the media.
    fn sync(&mut self) -> HalResult<()>;

    /// Ask the OS to re-read the partition table.
    fn rescan(&mut self) -> HalResult<()>;
}

/// Trait for opening target devices and watching their partitions appear.
pub trait DeviceOps {
    fn open_device(&self, device: &DevicePath) -> HalResult<Box<dyn BlockDevice>>;

    /// Whether partition `partition` of `device` is visible to the OS yet.
    fn partition_ready(&self, device: &DevicePath, partition: u32) -> HalResult<bool>;

    /// Removable, writable disks present right now.
    fn removable_disks(&self) -> HalResult<Vec<DiskSummary>> {
        Err(HalError::Unsupported("listing removable disks".to_string()))
    }
}

/// True when `err` means the device has no room left.
pub fn is_device_full(err: &io::Error) -> bool {
    #[cfg(unix)]
    {
        if err.raw_os_error() == Some(libc::ENOSPC) {
            return true;
        }
    }
    #[cfg(windows)]
    {
        // ERROR_HANDLE_DISK_FULL, ERROR_DISK_FULL
        if matches!(err.raw_os_error(), Some(39) | Some(112)) {
            return true;
        }
    }
    err.kind() == io::ErrorKind::WriteZero
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_zero_counts_as_full() {
        let err = io::Error::new(io::ErrorKind::WriteZero, "no room");
        assert!(is_device_full(&err));
    }

    #[cfg(unix)]
    #[test]
    fn enospc_counts_as_full() {
        let err = io::Error::from_raw_os_error(libc::ENOSPC);
        assert!(is_device_full(&err));
        assert!(!is_device_full(&io::Error::from_raw_os_error(libc::EIO)));
    }
}
