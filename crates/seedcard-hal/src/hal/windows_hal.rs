//! Windows HAL implementation: volume GUID paths, FSCTL locks and physical drives.
//!
//! Requires an elevated process.

use super::{BlockDevice, DeviceOps, MountOps, VolumeHandle, VolumeInfo, VolumeOps};
use crate::device::DevicePath;
use crate::{HalError, HalResult};
use std::ffi::c_void;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::windows::fs::OpenOptionsExt;
use std::os::windows::io::AsRawHandle;
use std::path::{Path, PathBuf};
use windows_sys::Win32::Foundation::{HANDLE, INVALID_HANDLE_VALUE};
use windows_sys::Win32::Storage::FileSystem::{
    FindFirstVolumeW, FindNextVolumeW, FindVolumeClose, FILE_SHARE_READ, FILE_SHARE_WRITE,
};
use windows_sys::Win32::System::IO::DeviceIoControl;

// CTL_CODE(FILE_DEVICE_FILE_SYSTEM, 6, METHOD_BUFFERED, FILE_ANY_ACCESS)
const FSCTL_LOCK_VOLUME: u32 = 0x0009_0018;
// CTL_CODE(FILE_DEVICE_FILE_SYSTEM, 8, METHOD_BUFFERED, FILE_ANY_ACCESS)
const FSCTL_DISMOUNT_VOLUME: u32 = 0x0009_0020;
// CTL_CODE(IOCTL_DISK_BASE, 0x50, METHOD_BUFFERED, FILE_ANY_ACCESS)
const IOCTL_DISK_UPDATE_PROPERTIES: u32 = 0x0007_0140;
// CTL_CODE(IOCTL_STORAGE_BASE, 0x0420, METHOD_BUFFERED, FILE_ANY_ACCESS)
const IOCTL_STORAGE_GET_DEVICE_NUMBER: u32 = 0x002d_1080;

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
struct StorageDeviceNumber {
    _device_type: u32,
    device_number: u32,
    partition_number: u32,
}

#[derive(Debug, Clone, Default)]
pub struct WindowsHal;

impl WindowsHal {
    pub fn new() -> Self {
        Self
    }
}

fn raw(file: &File) -> HANDLE {
    file.as_raw_handle() as HANDLE
}

/// Buffered control code with no input and an optional output struct.
fn ioctl<T>(file: &File, code: u32, out: Option<&mut T>) -> io::Result<u32> {
    let mut returned = 0u32;
    let (ptr, len) = match out {
        Some(out) => (out as *mut T as *mut c_void, std::mem::size_of::<T>() as u32),
        None => (std::ptr::null_mut(), 0),
    };
    // SAFETY: `file` keeps the handle open; `ptr`/`len` describe a live `T` or nothing.
    let ok = unsafe {
        DeviceIoControl(
            raw(file),
            code,
            std::ptr::null(),
            0,
            ptr,
            len,
            &mut returned,
            std::ptr::null_mut(),
        )
    };
    if ok == 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(returned)
}

fn open_shared(path: &str, write: bool) -> io::Result<File> {
    OpenOptions::new()
        .read(true)
        .write(write)
        .share_mode(FILE_SHARE_READ | FILE_SHARE_WRITE)
        .open(path)
}

fn wide_to_string(buf: &[u16]) -> String {
    let end = buf.iter().position(|&c| c == 0).unwrap_or(buf.len());
    String::from_utf16_lossy(&buf[..end])
}

/// `\\?\Volume{GUID}\` names, without the trailing backslash that makes them
/// unopenable.
fn volume_names() -> HalResult<Vec<String>> {
    let mut buf = [0u16; 260];
    // SAFETY: `buf` is writable for its full length.
    let find = unsafe { FindFirstVolumeW(buf.as_mut_ptr(), buf.len() as u32) };
    if find == INVALID_HANDLE_VALUE {
        return Err(io::Error::last_os_error().into());
    }
    let mut out = Vec::new();
    loop {
        out.push(wide_to_string(&buf).trim_end_matches('\\').to_string());
        // SAFETY: `find` came from FindFirstVolumeW and is closed below.
        if unsafe { FindNextVolumeW(find, buf.as_mut_ptr(), buf.len() as u32) } == 0 {
            break;
        }
    }
    // SAFETY: closes the search handle opened above exactly once.
    unsafe { FindVolumeClose(find) };
    Ok(out)
}

struct WindowsVolume {
    info: VolumeInfo,
    file: File,
}

impl VolumeHandle for WindowsVolume {
    fn volume(&self) -> &VolumeInfo {
        &self.info
    }

    fn lock(&mut self) -> HalResult<()> {
        // Without the lock a dismounted volume may be remounted by any process.
        ioctl::<()>(&self.file, FSCTL_LOCK_VOLUME, None).map_err(|source| {
            HalError::LockFailed {
                volume: self.info.id.clone(),
                source,
            }
        })?;
        Ok(())
    }

    fn dismount(&mut self) -> HalResult<()> {
        ioctl::<()>(&self.file, FSCTL_DISMOUNT_VOLUME, None).map_err(|e| {
            HalError::DismountFailed {
                volume: self.info.id.clone(),
                reason: e.to_string(),
            }
        })?;
        Ok(())
    }
}

impl VolumeOps for WindowsHal {
    fn disk_number(&self, device: &DevicePath) -> HalResult<u64> {
        device
            .disk_index()
            .ok_or_else(|| HalError::InvalidDevice(device.to_string()))
    }

    fn enumerate_volumes(&self) -> HalResult<Vec<VolumeInfo>> {
        let mut volumes = Vec::new();
        for name in volume_names()? {
            let file = match open_shared(&name, false) {
                Ok(f) => f,
                Err(err) => {
                    log::debug!("cannot open {}: {}", name, err);
                    continue;
                }
            };
            let mut number = StorageDeviceNumber::default();
            match ioctl(&file, IOCTL_STORAGE_GET_DEVICE_NUMBER, Some(&mut number)) {
                Ok(n) if n as usize == std::mem::size_of::<StorageDeviceNumber>() => {
                    volumes.push(VolumeInfo {
                        id: name,
                        disk_number: u64::from(number.device_number),
                        partition_number: number.partition_number,
                    });
                }
                Ok(n) => log::debug!("{}: unexpected device number length {}", name, n),
                // Spanned volumes and empty card readers land here.
                Err(err) => log::debug!("{}: no device number: {}", name, err),
            }
        }
        Ok(volumes)
    }

    fn open_volume(&self, volume: &VolumeInfo) -> HalResult<Box<dyn VolumeHandle>> {
        let file = open_shared(&volume.id, true).map_err(|source| HalError::LockFailed {
            volume: volume.id.clone(),
            source,
        })?;
        Ok(Box::new(WindowsVolume {
            info: volume.clone(),
            file,
        }))
    }
}

struct WindowsDevice {
    path: PathBuf,
    file: File,
}

impl Write for WindowsDevice {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl BlockDevice for WindowsDevice {
    fn path(&self) -> &Path {
        &self.path
    }

    fn sync(&mut self) -> HalResult<()> {
        self.file.sync_all().map_err(|source| HalError::DeviceIo {
            path: self.path.clone(),
            source,
        })
    }

    fn rescan(&mut self) -> HalResult<()> {
        if self.path.to_string_lossy().starts_with(r"\\.\") {
            ioctl::<()>(&self.file, IOCTL_DISK_UPDATE_PROPERTIES, None).map_err(|source| {
                HalError::DeviceIo {
                    path: self.path.clone(),
                    source,
                }
            })?;
        }
        Ok(())
    }
}

impl DeviceOps for WindowsHal {
    fn open_device(&self, device: &DevicePath) -> HalResult<Box<dyn BlockDevice>> {
        let path = device.raw_path();
        let mut opts = OpenOptions::new();
        opts.read(true).write(true);
        if device.is_image_file() {
            opts.create(true).truncate(true);
        } else {
            opts.share_mode(FILE_SHARE_READ | FILE_SHARE_WRITE);
        }
        let file = opts.open(&path).map_err(|source| HalError::DeviceIo {
            path: path.clone(),
            source,
        })?;
        Ok(Box::new(WindowsDevice { path, file }))
    }

    fn partition_ready(&self, device: &DevicePath, partition: u32) -> HalResult<bool> {
        if device.is_image_file() {
            return Ok(true);
        }
        Ok(self.volumes_for_disk(device, Some(partition))?.len() == 1)
    }
}

impl MountOps for WindowsHal {
    fn mount_partition(&self, device: &DevicePath, partition: u32) -> HalResult<PathBuf> {
        let mut volumes = self.volumes_for_disk(device, Some(partition))?;
        if volumes.len() != 1 {
            return Err(HalError::VolumeCount {
                disk: self.disk_number(device)?,
                partition,
                found: volumes.len(),
            });
        }
        Ok(PathBuf::from(volumes.remove(0).id))
    }

    fn unmount_disk(&self, _device: &DevicePath) -> HalResult<()> {
        // Volumes stay dismounted only while locked; see VolumeGuard.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wide_strings_stop_at_nul() {
        let mut buf: Vec<u16> = r"\\?\Volume{1234}\".encode_utf16().collect();
        buf.extend([0, 0x41, 0x42]);
        assert_eq!(wide_to_string(&buf), r"\\?\Volume{1234}\");
    }

    #[test]
    fn storage_device_number_layout() {
        assert_eq!(std::mem::size_of::<StorageDeviceNumber>(), 12);
    }
}
