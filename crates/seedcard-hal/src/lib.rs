//! seedcard hardware abstraction layer.
//!
//! Everything the flash pipeline asks of the host OS goes through the traits
//! in [`hal`]: mapping volumes to disks, locking and dismounting them, raw
//! device writes and partition rescans, and mounting the result.

pub mod device;
pub mod hal;
pub mod process;
pub mod procfs;
pub mod sysfs;

pub use device::{DeviceKind, DevicePath};
pub use hal::*;
pub use seedcard_error::{HalError, HalResult};

/// The backend for the OS this binary was built for.
#[cfg(target_os = "linux")]
pub fn native_hal() -> HalResult<Box<dyn PlatformHal>> {
    Ok(Box::new(LinuxHal::new()))
}

/// The backend for the OS this binary was built for.
#[cfg(target_os = "macos")]
pub fn native_hal() -> HalResult<Box<dyn PlatformHal>> {
    Ok(Box::new(MacosHal::new()))
}

/// The backend for the OS this binary was built for.
#[cfg(windows)]
pub fn native_hal() -> HalResult<Box<dyn PlatformHal>> {
    Ok(Box::new(WindowsHal::new()))
}

#[cfg(not(any(target_os = "linux", target_os = "macos", windows)))]
pub fn native_hal() -> HalResult<Box<dyn PlatformHal>> {
    Err(HalError::Unsupported(std::env::consts::OS.to_string()))
}
