//! Chunked raw write of an image onto a block device.

use seedcard_error::{HalError, SeedError, SeedResult};
use seedcard_hal::{is_device_full, BlockDevice};
use std::io::{self, Read};

/// Streams an image onto a device in fixed-size chunks and checks every one.
#[derive(Debug, Clone, Copy)]
pub struct DeviceWriter {
    chunk_size: usize,
}

impl DeviceWriter {
    pub fn new(chunk_size: usize) -> Self {
        Self { chunk_size }
    }

    /// Writes `total` bytes from `source`, then syncs and rescans the device.
    ///
    /// `on_progress` sees `(written, total)` after every chunk.
    pub fn flash(
        &self,
        source: &mut dyn Read,
        total: u64,
        device: &mut dyn BlockDevice,
        mut on_progress: impl FnMut(u64, u64),
    ) -> SeedResult<u64> {
        log::info!(
            "💾 Writing {} bytes to {} in {} KiB chunks",
            total,
            device.path().display(),
            self.chunk_size / 1024
        );
        let mut buf = vec![0u8; self.chunk_size];
        let mut written = 0u64;
        let mut last_decile = 0u64;

        while written < total {
            let want = (total - written).min(self.chunk_size as u64) as usize;
            read_full(source, &mut buf[..want])?;
            write_chunk(device, &buf[..want], written)?;
            written += want as u64;

            on_progress(written, total);
            let decile = written * 10 / total;
            if decile > last_decile {
                last_decile = decile;
                log::info!("💾 {}%", decile * 10);
            }
        }

        device.sync()?;
        device.rescan()?;
        log::info!("✅ Wrote {} bytes to {}", written, device.path().display());
        Ok(written)
    }
}

fn read_full(source: &mut dyn Read, buf: &mut [u8]) -> SeedResult<()> {
    source.read_exact(buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            SeedError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "image ended before its recorded size",
            ))
        } else {
            SeedError::Io(e)
        }
    })
}

/// One write call per chunk; anything short of the full chunk is fatal.
fn write_chunk(device: &mut dyn BlockDevice, chunk: &[u8], offset: u64) -> SeedResult<()> {
    let short = |device: &dyn BlockDevice, written: usize| SeedError::ShortWrite {
        device: device.path().to_path_buf(),
        offset,
        requested: chunk.len(),
        written,
    };
    loop {
        match device.write(chunk) {
            Ok(n) if n == chunk.len() => return Ok(()),
            Ok(n) => return Err(short(device, n)),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if is_device_full(&e) => {
                log::debug!("device full at offset {}: {}", offset, e);
                return Err(short(device, 0));
            }
            Err(source) => {
                return Err(HalError::DeviceIo {
                    path: device.path().to_path_buf(),
                    source,
                }
                .into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seedcard_hal::{DeviceOps, DevicePath, FakeHal, Operation};
    use std::io::{Cursor, Write};
    use std::path::{Path, PathBuf};

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn copies_every_byte_and_rescans() {
        let hal = FakeHal::new();
        let device = DevicePath::parse("/dev/sdz").unwrap();
        let image = pattern(300 * 1024);
        let mut dev = hal.open_device(&device).unwrap();

        let mut seen = Vec::new();
        let n = DeviceWriter::new(64 * 1024)
            .flash(
                &mut Cursor::new(image.clone()),
                image.len() as u64,
                dev.as_mut(),
                |w, _| seen.push(w),
            )
            .unwrap();
        drop(dev);

        assert_eq!(n, image.len() as u64);
        assert_eq!(hal.device_bytes(Path::new("/dev/sdz")), image);
        assert_eq!(seen.len(), 5);
        assert_eq!(*seen.last().unwrap(), image.len() as u64);

        let ops = hal.operations();
        let sync = ops.iter().position(|op| matches!(op, Operation::Sync { .. }));
        let rescan = ops.iter().position(|op| matches!(op, Operation::Rescan { .. }));
        assert!(sync.unwrap() < rescan.unwrap());
    }

    #[test]
    fn full_device_is_a_short_write() {
        let hal = FakeHal::new();
        let device = DevicePath::parse("/dev/sdz").unwrap();
        hal.set_device_capacity("/dev/sdz", 100 * 1024);
        let mut dev = hal.open_device(&device).unwrap();

        let err = DeviceWriter::new(64 * 1024)
            .flash(&mut Cursor::new(pattern(256 * 1024)), 256 * 1024, dev.as_mut(), |_, _| {})
            .unwrap_err();
        match err {
            SeedError::ShortWrite {
                offset,
                requested,
                written,
                ..
            } => {
                assert_eq!(offset, 64 * 1024);
                assert_eq!(requested, 64 * 1024);
                assert_eq!(written, 36 * 1024);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(!hal.has_operation(|op| matches!(op, Operation::Rescan { .. })));
    }

    struct Flaky {
        path: PathBuf,
        interrupts: usize,
        enospc: bool,
        data: Vec<u8>,
    }

    impl Write for Flaky {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.interrupts > 0 {
                self.interrupts -= 1;
                return Err(io::Error::from(io::ErrorKind::Interrupted));
            }
            if self.enospc {
                return Err(io::Error::from_raw_os_error(libc_enospc()));
            }
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl BlockDevice for Flaky {
        fn path(&self) -> &Path {
            &self.path
        }

        fn sync(&mut self) -> seedcard_error::HalResult<()> {
            Ok(())
        }

        fn rescan(&mut self) -> seedcard_error::HalResult<()> {
            Ok(())
        }
    }

    #[cfg(unix)]
    fn libc_enospc() -> i32 {
        28
    }

    #[cfg(windows)]
    fn libc_enospc() -> i32 {
        112
    }

    #[test]
    fn interrupted_writes_are_retried() {
        let mut dev = Flaky {
            path: PathBuf::from("/dev/flaky"),
            interrupts: 3,
            enospc: false,
            data: Vec::new(),
        };
        let image = pattern(128 * 1024);
        DeviceWriter::new(64 * 1024)
            .flash(&mut Cursor::new(image.clone()), image.len() as u64, &mut dev, |_, _| {})
            .unwrap();
        assert_eq!(dev.data, image);
    }

    #[test]
    fn enospc_is_reported_as_short_write() {
        let mut dev = Flaky {
            path: PathBuf::from("/dev/flaky"),
            interrupts: 0,
            enospc: true,
            data: Vec::new(),
        };
        let err = DeviceWriter::new(64 * 1024)
            .flash(&mut Cursor::new(pattern(4096)), 4096, &mut dev, |_, _| {})
            .unwrap_err();
        assert!(matches!(
            err,
            SeedError::ShortWrite {
                offset: 0,
                written: 0,
                ..
            }
        ));
    }

    #[test]
    fn truncated_source_is_an_io_error() {
        let mut dev = Flaky {
            path: PathBuf::from("/dev/flaky"),
            interrupts: 0,
            enospc: false,
            data: Vec::new(),
        };
        let err = DeviceWriter::new(64 * 1024)
            .flash(&mut Cursor::new(pattern(1000)), 4096, &mut dev, |_, _| {})
            .unwrap_err();
        assert!(matches!(err, SeedError::Io(_)));
    }
}
