//! Target device paths and partition node naming.

use crate::{HalError, HalResult};
use std::fmt;
use std::path::{Path, PathBuf};

const WINDOWS_PHYSICAL_PREFIX: &str = r"\\.\physicaldrive";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    /// `/dev/sdX`, `/dev/vdX`, `/dev/hdX`, `/dev/xvdX`
    Scsi,
    /// `/dev/mmcblkN`
    Mmc,
    /// `/dev/nvmeXnY`
    Nvme,
    /// `/dev/diskN` (macOS)
    Darwin,
    /// `\\.\PHYSICALDRIVEN`
    WindowsPhysical,
    /// A plain file standing in for a device.
    ImageFile,
}

/// A whole-disk target, as named by the host OS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevicePath {
    path: PathBuf,
    kind: DeviceKind,
    index: Option<u64>,
}

impl DevicePath {
    /// Classifies `raw`. Anything outside `/dev` that is not a Windows
    /// physical drive is treated as an image file target.
    pub fn parse(raw: impl AsRef<Path>) -> HalResult<Self> {
        let raw = raw.as_ref();
        let text = raw.to_string_lossy();
        let lower = text.to_ascii_lowercase();

        if let Some(rest) = lower.strip_prefix(WINDOWS_PHYSICAL_PREFIX) {
            let index = parse_index(rest).ok_or_else(|| invalid(&text))?;
            return Ok(Self {
                path: raw.to_path_buf(),
                kind: DeviceKind::WindowsPhysical,
                index: Some(index),
            });
        }

        let Some(name) = text.strip_prefix("/dev/") else {
            return Ok(Self {
                path: raw.to_path_buf(),
                kind: DeviceKind::ImageFile,
                index: None,
            });
        };

        if let Some(rest) = name.strip_prefix("mmcblk") {
            let index = parse_index(rest).ok_or_else(|| invalid(&text))?;
            return Ok(Self {
                path: raw.to_path_buf(),
                kind: DeviceKind::Mmc,
                index: Some(index),
            });
        }

        if let Some(rest) = name.strip_prefix("nvme") {
            let (ctrl, ns) = rest.split_once('n').ok_or_else(|| invalid(&text))?;
            let ctrl = parse_index(ctrl).ok_or_else(|| invalid(&text))?;
            parse_index(ns).ok_or_else(|| invalid(&text))?;
            return Ok(Self {
                path: raw.to_path_buf(),
                kind: DeviceKind::Nvme,
                index: Some(ctrl),
            });
        }

        // rdiskN is the unbuffered alias of diskN; keep the buffered name.
        let darwin = name
            .strip_prefix("rdisk")
            .or_else(|| name.strip_prefix("disk"));
        if let Some(rest) = darwin {
            let index = parse_index(rest).ok_or_else(|| invalid(&text))?;
            return Ok(Self {
                path: PathBuf::from(format!("/dev/disk{index}")),
                kind: DeviceKind::Darwin,
                index: Some(index),
            });
        }

        for prefix in ["sd", "vd", "hd", "xvd"] {
            if let Some(rest) = name.strip_prefix(prefix) {
                if !rest.is_empty() && rest.chars().all(|c| c.is_ascii_lowercase()) {
                    return Ok(Self {
                        path: raw.to_path_buf(),
                        kind: DeviceKind::Scsi,
                        index: None,
                    });
                }
            }
        }

        Err(invalid(&text))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    pub fn is_image_file(&self) -> bool {
        self.kind == DeviceKind::ImageFile
    }

    /// Disk number for Windows physical drives and macOS disks.
    pub fn disk_index(&self) -> Option<u64> {
        match self.kind {
            DeviceKind::WindowsPhysical | DeviceKind::Darwin => self.index,
            _ => None,
        }
    }

    /// Last path component, e.g. `sdb` or `mmcblk0`.
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.path.to_string_lossy().to_string())
    }

    /// Device node for partition `num` (1-based).
    ///
    /// Windows exposes partitions as volumes rather than nodes, and image
    /// files have none, so both return `None`.
    pub fn partition_node(&self, num: u32) -> Option<PathBuf> {
        let disk = self.path.to_string_lossy();
        match self.kind {
            DeviceKind::Scsi => Some(PathBuf::from(format!("{disk}{num}"))),
            DeviceKind::Mmc | DeviceKind::Nvme => Some(PathBuf::from(format!("{disk}p{num}"))),
            DeviceKind::Darwin => Some(PathBuf::from(format!("{disk}s{num}"))),
            DeviceKind::WindowsPhysical | DeviceKind::ImageFile => None,
        }
    }

    /// Path to open for the raw write. macOS `rdiskN` bypasses the buffer
    /// cache and is several times faster than `diskN`.
    pub fn raw_path(&self) -> PathBuf {
        match (self.kind, self.index) {
            (DeviceKind::Darwin, Some(index)) => PathBuf::from(format!("/dev/rdisk{index}")),
            _ => self.path.clone(),
        }
    }
}

impl fmt::Display for DevicePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

fn parse_index(digits: &str) -> Option<u64> {
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

fn invalid(text: &str) -> HalError {
    HalError::InvalidDevice(text.to_string())
}
