use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type HalResult<T> = Result<T, HalError>;
pub type SeedResult<T> = Result<T, SeedError>;

/// Failures talking to the host OS: volumes, raw devices and helper commands.
#[derive(Error, Debug)]
pub enum HalError {
    #[error("Disk is busy (mounted or in use)")]
    DiskBusy,

    #[error("Permission denied")]
    PermissionDenied,

    #[error("Invalid device path: {0}")]
    InvalidDevice(String),

    #[error("Not supported on this platform: {0}")]
    Unsupported(String),

    #[error("Device I/O failed on {}: {source}", path.display())]
    DeviceIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to lock volume {volume}: {source}")]
    LockFailed {
        volume: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to dismount volume {volume}: {reason}")]
    DismountFailed { volume: String, reason: String },

    #[error("Failed to mount {device}: {output}")]
    MountFailed { device: String, output: String },

    #[error("Expected exactly one volume for partition {partition} of disk {disk}, found {found}")]
    VolumeCount {
        disk: u64,
        partition: u32,
        found: usize,
    },

    #[error("Command not found: {0}")]
    CommandNotFound(String),

    #[error("Command failed: {program} (exit={code:?}): {stderr}")]
    CommandFailed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Command timed out: {program} after {timeout_secs}s")]
    CommandTimeout { program: String, timeout_secs: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[cfg(unix)]
    #[error("nix errno: {0}")]
    Nix(#[from] nix::errno::Errno),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("{0}")]
    Other(String),
}

/// Rejections raised before any device is touched.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("MBR boot signature missing (found {found:02x?}, expected [55, aa])")]
    MissingSignature { found: [u8; 2] },

    #[error("Image too small to hold an MBR ({len} bytes)")]
    Truncated { len: u64 },

    #[error("Partition {0} does not exist")]
    NoSuchPartition(usize),

    #[error("Partitions {first} and {second} overlap")]
    PartitionOverlap { first: usize, second: usize },

    #[error("Partition {index} ends at byte {end}, past the image end ({image_size})")]
    PartitionOutOfRange {
        index: usize,
        end: u64,
        image_size: u64,
    },

    #[error("Invalid option: {0}")]
    Option(String),
}

#[derive(Error, Debug)]
pub enum SeedError {
    #[error(transparent)]
    Hal(#[from] HalError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Access of {len} bytes at offset {offset} exceeds window of {size} bytes")]
    OutOfRange { offset: u64, len: u64, size: u64 },

    #[error("Startup hook anchor not found after scanning {scanned} bytes of the root partition")]
    PatchNotFound { scanned: u64 },

    #[error("Startup hook is {len} bytes, it must fit in a {block}-byte block")]
    PatchTooLarge { len: usize, block: usize },

    #[error("Boot partition is full while writing {name}")]
    OutOfSpace { name: String },

    #[error("Cannot create {name} on the boot partition: name collides with an existing entry")]
    NameCollision { name: String },

    #[error("FAT error on {name}: {source}")]
    Fat {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("Short write on {}: {written} of {requested} bytes at offset {offset}", device.display())]
    ShortWrite {
        device: PathBuf,
        offset: u64,
        requested: usize,
        written: usize,
    },

    #[error("Missing --yes-i-know flag. This operation is destructive!")]
    MissingYesIKnow,

    #[error("Configuration error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hal_errors_convert_into_seed_errors() {
        let err: SeedError = HalError::DiskBusy.into();
        assert!(matches!(err, SeedError::Hal(HalError::DiskBusy)));
    }

    #[test]
    fn missing_signature_reports_found_bytes() {
        let err = ValidationError::MissingSignature { found: [0x00, 0x12] };
        assert!(err.to_string().contains("[00, 12]"));
    }

    #[test]
    fn short_write_message_names_device() {
        let err = SeedError::ShortWrite {
            device: PathBuf::from("/dev/sdz"),
            offset: 4096,
            requested: 65536,
            written: 0,
        };
        let msg = err.to_string();
        assert!(msg.contains("/dev/sdz"));
        assert!(msg.contains("0 of 65536"));
    }
}
