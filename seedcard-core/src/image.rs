//! The working copy of an OS image that gets patched and flashed.

use crate::mbr::PartitionTable;
use crate::window::BoundedDiskWindow;
use seedcard_error::{SeedError, SeedResult};
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// `<stem>-mod.<ext>` next to `source`.
pub fn working_copy_path(source: &Path) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let name = match source.extension() {
        Some(ext) => format!("{}-mod.{}", stem, ext.to_string_lossy()),
        None => format!("{}-mod", stem),
    };
    source.with_file_name(name)
}

/// Reads and validates the partition table of an image without modifying it.
pub fn inspect(path: &Path) -> SeedResult<PartitionTable> {
    let mut file = File::open(path)?;
    let size = file.seek(SeekFrom::End(0))?;
    let table = PartitionTable::read_from(&mut file)?;
    table.validate(size)?;
    Ok(table)
}

#[derive(Debug)]
pub struct DiskImage {
    path: PathBuf,
    file: File,
    size: u64,
    table: PartitionTable,
}

impl DiskImage {
    /// Opens an image read-write after validating its MBR.
    pub fn open(path: &Path) -> SeedResult<Self> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        let size = file.seek(SeekFrom::End(0))?;
        let table = PartitionTable::read_from(&mut file)?;
        table.validate(size)?;
        log::debug!(
            "{}: {} bytes, disk signature {:08x}",
            path.display(),
            size,
            table.disk_signature
        );
        Ok(Self {
            path: path.to_path_buf(),
            file,
            size,
            table,
        })
    }

    /// Copies `source` to `dest` and opens the copy. The source is validated
    /// first and never opened for writing.
    pub fn stage(source: &Path, dest: &Path) -> SeedResult<Self> {
        inspect(source)?;
        if fs::canonicalize(source).ok() == fs::canonicalize(dest).ok() && dest.exists() {
            return Err(SeedError::Config(format!(
                "working copy {} would overwrite the source image",
                dest.display()
            )));
        }
        log::info!("📄 Staging {} -> {}", source.display(), dest.display());
        fs::copy(source, dest)?;
        Self::open(dest)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn table(&self) -> &PartitionTable {
        &self.table
    }

    /// Partition `index` (1-based) as its own zero-based disk.
    pub fn partition_window(&mut self, index: usize) -> SeedResult<BoundedDiskWindow<&mut File>> {
        let range = self.table.partition(index)?;
        Ok(BoundedDiskWindow::for_partition(&mut self.file, range))
    }

    /// The whole image positioned at byte zero.
    pub fn reader(&mut self) -> SeedResult<&mut File> {
        self.file.seek(SeekFrom::Start(0))?;
        Ok(&mut self.file)
    }

    pub fn sync(&self) -> SeedResult<()> {
        self.file.sync_all()?;
        Ok(())
    }
}
