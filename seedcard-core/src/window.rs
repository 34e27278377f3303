//! A fixed byte range of a larger store, addressed from zero.

use crate::mbr::PartitionRange;
use seedcard_error::{SeedError, SeedResult};
use std::io::{self, Read, Seek, SeekFrom, Write};

/// Presents `[offset, offset + size)` of `inner` as a disk of its own.
///
/// Positional access through [`read_at`](Self::read_at) and
/// [`write_at`](Self::write_at) never touches bytes outside the window. The
/// `Read`/`Write`/`Seek` impls keep a cursor relative to the window so a
/// filesystem driver can mount one partition of an image.
#[derive(Debug)]
pub struct BoundedDiskWindow<T> {
    inner: T,
    offset: u64,
    size: u64,
    pos: u64,
}

impl<T: Read + Write + Seek> BoundedDiskWindow<T> {
    pub fn new(inner: T, offset: u64, size: u64) -> Self {
        Self {
            inner,
            offset,
            size,
            pos: 0,
        }
    }

    pub fn for_partition(inner: T, range: PartitionRange) -> Self {
        Self::new(inner, range.offset, range.len)
    }

    pub fn len(&self) -> u64 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    fn check_bounds(&self, offset: u64, len: usize) -> SeedResult<()> {
        let len = len as u64;
        match offset.checked_add(len) {
            Some(end) if end <= self.size => Ok(()),
            _ => Err(SeedError::OutOfRange {
                offset,
                len,
                size: self.size,
            }),
        }
    }

    /// Fills `buf` from window offset `offset`.
    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> SeedResult<()> {
        self.check_bounds(offset, buf.len())?;
        self.inner.seek(SeekFrom::Start(self.offset + offset))?;
        self.inner.read_exact(buf)?;
        Ok(())
    }

    /// Writes all of `buf` at window offset `offset`.
    pub fn write_at(&mut self, offset: u64, buf: &[u8]) -> SeedResult<()> {
        self.check_bounds(offset, buf.len())?;
        self.inner.seek(SeekFrom::Start(self.offset + offset))?;
        self.inner.write_all(buf)?;
        Ok(())
    }
}

impl<T: Read + Write + Seek> Read for BoundedDiskWindow<T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.size.saturating_sub(self.pos);
        let n = (buf.len() as u64).min(remaining) as usize;
        if n == 0 {
            return Ok(0);
        }
        self.inner.seek(SeekFrom::Start(self.offset + self.pos))?;
        let read = self.inner.read(&mut buf[..n])?;
        self.pos += read as u64;
        Ok(read)
    }
}

impl<T: Read + Write + Seek> Write for BoundedDiskWindow<T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let remaining = self.size.saturating_sub(self.pos);
        if !buf.is_empty() && remaining == 0 {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "write past end of partition window",
            ));
        }
        let n = (buf.len() as u64).min(remaining) as usize;
        self.inner.seek(SeekFrom::Start(self.offset + self.pos))?;
        let written = self.inner.write(&buf[..n])?;
        self.pos += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<T: Read + Write + Seek> Seek for BoundedDiskWindow<T> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(p) => Some(p),
            SeekFrom::End(d) => self.size.checked_add_signed(d),
            SeekFrom::Current(d) => self.pos.checked_add_signed(d),
        };
        match target {
            Some(p) if p <= self.size => {
                self.pos = p;
                Ok(p)
            }
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek outside partition window",
            )),
        }
    }
}
