//! Classic MBR partition table parsing.
//!
//! Only the four primary entries are read. CHS fields are ignored; the
//! images this tool handles are addressed purely by LBA.

use seedcard_error::{SeedResult, ValidationError};
use std::io::{Read, Seek, SeekFrom};

pub const SECTOR_SIZE: u64 = 512;
pub const MBR_SIZE: usize = 512;
pub const BOOTABLE: u8 = 0x80;

const DISK_SIGNATURE_OFFSET: usize = 440;
const TABLE_OFFSET: usize = 446;
const ENTRY_SIZE: usize = 16;
const BOOT_SIGNATURE_OFFSET: usize = 510;
const BOOT_SIGNATURE: [u8; 2] = [0x55, 0xAA];

/// One primary partition slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PartitionEntry {
    pub status: u8,
    pub kind: u8,
    pub lba_start: u32,
    pub lba_len: u32,
}

impl PartitionEntry {
    pub fn new(kind: u8, lba_start: u32, lba_len: u32) -> Self {
        Self {
            status: 0,
            kind,
            lba_start,
            lba_len,
        }
    }

    pub fn bootable(mut self) -> Self {
        self.status = BOOTABLE;
        self
    }

    pub fn is_bootable(&self) -> bool {
        self.status == BOOTABLE
    }

    pub fn is_empty(&self) -> bool {
        self.kind == 0 || self.lba_len == 0
    }

    pub fn byte_offset(&self) -> u64 {
        u64::from(self.lba_start) * SECTOR_SIZE
    }

    pub fn byte_len(&self) -> u64 {
        u64::from(self.lba_len) * SECTOR_SIZE
    }

    fn decode(raw: &[u8]) -> Self {
        Self {
            status: raw[0],
            kind: raw[4],
            lba_start: u32::from_le_bytes([raw[8], raw[9], raw[10], raw[11]]),
            lba_len: u32::from_le_bytes([raw[12], raw[13], raw[14], raw[15]]),
        }
    }

    fn encode(&self) -> [u8; ENTRY_SIZE] {
        let mut raw = [0u8; ENTRY_SIZE];
        raw[0] = self.status;
        raw[4] = self.kind;
        raw[8..12].copy_from_slice(&self.lba_start.to_le_bytes());
        raw[12..16].copy_from_slice(&self.lba_len.to_le_bytes());
        raw
    }
}

/// Byte range of a partition inside the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionRange {
    pub offset: u64,
    pub len: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PartitionTable {
    pub disk_signature: u32,
    entries: [PartitionEntry; 4],
}

impl PartitionTable {
    pub fn new(disk_signature: u32, entries: [PartitionEntry; 4]) -> Self {
        Self {
            disk_signature,
            entries,
        }
    }

    /// Parses the first sector of a disk.
    pub fn parse(sector: &[u8]) -> Result<Self, ValidationError> {
        if sector.len() < MBR_SIZE {
            return Err(ValidationError::Truncated {
                len: sector.len() as u64,
            });
        }
        let found = [
            sector[BOOT_SIGNATURE_OFFSET],
            sector[BOOT_SIGNATURE_OFFSET + 1],
        ];
        if found != BOOT_SIGNATURE {
            return Err(ValidationError::MissingSignature { found });
        }

        let mut entries = [PartitionEntry::default(); 4];
        for (i, entry) in entries.iter_mut().enumerate() {
            let start = TABLE_OFFSET + i * ENTRY_SIZE;
            *entry = PartitionEntry::decode(&sector[start..start + ENTRY_SIZE]);
        }
        let sig = &sector[DISK_SIGNATURE_OFFSET..DISK_SIGNATURE_OFFSET + 4];
        Ok(Self {
            disk_signature: u32::from_le_bytes([sig[0], sig[1], sig[2], sig[3]]),
            entries,
        })
    }

    /// Reads and parses the MBR at the start of `reader`.
    pub fn read_from<R: Read + Seek>(reader: &mut R) -> SeedResult<Self> {
        let len = reader.seek(SeekFrom::End(0))?;
        if len < MBR_SIZE as u64 {
            return Err(ValidationError::Truncated { len }.into());
        }
        reader.seek(SeekFrom::Start(0))?;
        let mut sector = [0u8; MBR_SIZE];
        reader.read_exact(&mut sector)?;
        Ok(Self::parse(&sector)?)
    }

    /// Serializes the table into a fresh boot sector (zeroed boot code).
    pub fn to_sector(&self) -> [u8; MBR_SIZE] {
        let mut sector = [0u8; MBR_SIZE];
        sector[DISK_SIGNATURE_OFFSET..DISK_SIGNATURE_OFFSET + 4]
            .copy_from_slice(&self.disk_signature.to_le_bytes());
        for (i, entry) in self.entries.iter().enumerate() {
            let start = TABLE_OFFSET + i * ENTRY_SIZE;
            sector[start..start + ENTRY_SIZE].copy_from_slice(&entry.encode());
        }
        sector[BOOT_SIGNATURE_OFFSET..].copy_from_slice(&BOOT_SIGNATURE);
        sector
    }

    pub fn entries(&self) -> &[PartitionEntry; 4] {
        &self.entries
    }

    /// Partition `index` (1-based) as a byte range.
    pub fn partition(&self, index: usize) -> Result<PartitionRange, ValidationError> {
        let entry = index
            .checked_sub(1)
            .and_then(|i| self.entries.get(i))
            .filter(|e| !e.is_empty())
            .ok_or(ValidationError::NoSuchPartition(index))?;
        Ok(PartitionRange {
            offset: entry.byte_offset(),
            len: entry.byte_len(),
        })
    }

    /// Rejects overlapping partitions and partitions past `image_size`.
    pub fn validate(&self, image_size: u64) -> Result<(), ValidationError> {
        let used: Vec<(usize, &PartitionEntry)> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| !e.is_empty())
            .map(|(i, e)| (i + 1, e))
            .collect();

        for &(index, entry) in &used {
            let end = entry.byte_offset() + entry.byte_len();
            if end > image_size {
                return Err(ValidationError::PartitionOutOfRange {
                    index,
                    end,
                    image_size,
                });
            }
        }

        for (pos, &(first, a)) in used.iter().enumerate() {
            for &(second, b) in &used[pos + 1..] {
                let a_end = a.byte_offset() + a.byte_len();
                let b_end = b.byte_offset() + b.byte_len();
                if a.byte_offset() < b_end && b.byte_offset() < a_end {
                    return Err(ValidationError::PartitionOverlap { first, second });
                }
            }
        }
        Ok(())
    }
}
