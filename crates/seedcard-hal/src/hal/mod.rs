//! HAL trait definitions and implementations.
//!
//! This module defines the capability traits the flash pipeline needs from
//! the host OS and provides one backend per platform plus an in-memory fake.

pub mod device_ops;
pub mod fake_hal;
pub mod guards;
#[cfg(target_os = "linux")]
pub mod linux_hal;
#[cfg(target_os = "macos")]
pub mod macos_hal;
pub mod mount_ops;
pub mod volume_ops;
#[cfg(windows)]
pub mod windows_hal;

pub use device_ops::{is_device_full, BlockDevice, DeviceOps, DiskSummary};
pub use fake_hal::{FakeHal, Operation};
pub use guards::{MountGuard, VolumeGuard};
#[cfg(target_os = "linux")]
pub use linux_hal::LinuxHal;
#[cfg(target_os = "macos")]
pub use macos_hal::MacosHal;
pub use mount_ops::MountOps;
pub use volume_ops::{VolumeHandle, VolumeInfo, VolumeOps};
#[cfg(windows)]
pub use windows_hal::WindowsHal;

/// Complete HAL combining all platform operation traits.
pub trait PlatformHal: VolumeOps + DeviceOps + MountOps + Send + Sync {}

/// Automatically implement PlatformHal for any type implementing all required traits.
impl<T> PlatformHal for T where T: VolumeOps + DeviceOps + MountOps + Send + Sync {}
