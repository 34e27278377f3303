//! Mount operations trait and the output parsers behind it.

use crate::device::DevicePath;
use crate::{HalError, HalResult};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::PathBuf;

/// Trait for mounting the freshly written partitions.
pub trait MountOps {
    /// Mount partition `partition` (1-based) of `device` and return where it
    /// is reachable.
    ///
    /// On Windows the returned path is the volume GUID path
    /// (`\\?\Volume{...}`) rather than a drive letter.
    fn mount_partition(&self, device: &DevicePath, partition: u32) -> HalResult<PathBuf>;

    /// Unmount every partition on `device`.
    fn unmount_disk(&self, device: &DevicePath) -> HalResult<()>;
}

// "Mounted /dev/sdh2 at /media/<user>/<GUID>." (older udisks adds the dot)
static UDISKS_MOUNTED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^Mounted \S+ at (.+?)\.?\s*$").expect("valid regex"));

// "... Device /dev/sdh2 is already mounted at `/media/<user>/<GUID>'."
static UDISKS_ALREADY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"is already mounted at `([^']+)'").expect("valid regex"));

/// Extracts the mount point from `udisksctl mount` output, including the
/// "already mounted" error.
pub fn parse_udisksctl_mount(output: &str) -> Option<PathBuf> {
    UDISKS_MOUNTED
        .captures(output)
        .or_else(|| UDISKS_ALREADY.captures(output))
        .map(|caps| PathBuf::from(&caps[1]))
}

/// Returns the single entry present in `after` but not in `before`.
///
/// `diskutil` does not say where it mounted a volume, so callers snapshot
/// `/Volumes` around the mount. Zero or several new entries are an error.
pub fn single_new_entry(
    device: &str,
    before: &[PathBuf],
    after: &[PathBuf],
) -> HalResult<PathBuf> {
    let mut fresh = after.iter().filter(|p| !before.contains(p));
    match (fresh.next(), fresh.next()) {
        (Some(path), None) => Ok(path.clone()),
        (None, _) => Err(HalError::MountFailed {
            device: device.to_string(),
            output: "no new volume appeared".to_string(),
        }),
        (Some(_), Some(_)) => Err(HalError::MountFailed {
            device: device.to_string(),
            output: "more than one new volume appeared".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_udisksctl_variants() {
        let data = [
            "Mounted /dev/sdh2 at /media/<user>/<GUID>.\n",
            "Mounted /dev/sdh2 at /media/<user>/<GUID>\n",
            "Error mounting /dev/sdh2: GDBus.Error:org.freedesktop.UDisks2.Error.AlreadyMounted: Device /dev/sdh2 is already mounted at `/media/<user>/<GUID>'",
        ];
        for input in data {
            assert_eq!(
                parse_udisksctl_mount(input),
                Some(PathBuf::from("/media/<user>/<GUID>")),
                "{input:?}"
            );
        }
    }

    #[test]
    fn udisksctl_garbage_yields_none() {
        assert_eq!(parse_udisksctl_mount("Error looking up object for device"), None);
    }

    #[test]
    fn single_new_entry_requires_exactly_one() {
        let before = vec![PathBuf::from("/Volumes/Macintosh HD")];
        let one = vec![
            PathBuf::from("/Volumes/Macintosh HD"),
            PathBuf::from("/Volumes/boot"),
        ];
        assert_eq!(
            single_new_entry("disk4s1", &before, &one).unwrap(),
            PathBuf::from("/Volumes/boot")
        );

        assert!(single_new_entry("disk4s1", &before, &before).is_err());

        let two = vec![
            PathBuf::from("/Volumes/Macintosh HD"),
            PathBuf::from("/Volumes/boot"),
            PathBuf::from("/Volumes/rootfs"),
        ];
        assert!(single_new_entry("disk4s1", &before, &two).is_err());
    }
}
