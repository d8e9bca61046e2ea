//! Memory-mapped record file: an append-growable byte region with a
//! fixed-size record allocator carved out of it.
//!
//! The allocator hands out integer indices, never pointers, so remapping the
//! file on growth cannot invalidate anything a caller holds.

use crate::{Error, Result};
use memmap2::MmapMut;
use std::fs::{File, OpenOptions};
use std::path::Path;

/// Size of the persisted next-index counter at the allocator base.
const COUNTER_SIZE: usize = 8;

/// Smallest mapping we ever create: enough for an (invalid) bucket count and
/// the allocator counter, so a fresh file can be mapped and then rejected by
/// `start` validation instead of failing to map at all.
const BOOTSTRAP_SIZE: u64 = 12;

/// A file on disk mapped into a contiguous writable region.
pub(crate) struct MemoryFile {
    file: File,
    map: MmapMut,
}

impl MemoryFile {
    /// Opens (creating if absent) and maps the file at `path`.
    pub(crate) fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;

        if file.metadata()?.len() < BOOTSTRAP_SIZE {
            file.set_len(BOOTSTRAP_SIZE)?;
        }

        let map = unsafe { MmapMut::map_mut(&file)? };

        Ok(Self { file, map })
    }

    /// Length of the mapped region.
    pub(crate) fn len(&self) -> usize {
        self.map.len()
    }

    /// Grows the file to `new_len` bytes and re-derives the mapping.
    ///
    /// Any slice previously returned by `read`/`slice_mut` is invalidated.
    pub(crate) fn resize(&mut self, new_len: usize) -> Result<()> {
        debug_assert!(new_len >= self.map.len());

        self.map.flush()?;
        self.file.set_len(new_len as u64)?;
        self.map = unsafe { MmapMut::map_mut(&self.file)? };

        Ok(())
    }

    /// Flushes dirty pages to disk.
    pub(crate) fn sync(&self) -> Result<()> {
        self.map.flush()?;
        Ok(())
    }

    pub(crate) fn read(&self, offset: usize, len: usize) -> &[u8] {
        &self.map[offset..offset + len]
    }

    pub(crate) fn slice_mut(&mut self, offset: usize, len: usize) -> &mut [u8] {
        &mut self.map[offset..offset + len]
    }

    pub(crate) fn write(&mut self, offset: usize, bytes: &[u8]) {
        self.map[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    pub(crate) fn read_u32(&self, offset: usize) -> u32 {
        u32::from_le_bytes(self.read(offset, 4).try_into().expect("4-byte read"))
    }

    pub(crate) fn write_u32(&mut self, offset: usize, value: u32) {
        self.write(offset, &value.to_le_bytes());
    }

    pub(crate) fn read_u64(&self, offset: usize) -> u64 {
        u64::from_le_bytes(self.read(offset, 8).try_into().expect("8-byte read"))
    }

    pub(crate) fn write_u64(&mut self, offset: usize, value: u64) {
        self.write(offset, &value.to_le_bytes());
    }
}

/// Allocator of fixed-size record slots starting at a base offset.
///
/// The next-index counter lives in memory between syncs; `sync` persists it
/// at the base and flushes, which is what makes a block durable.
pub(crate) struct RecordAllocator {
    base: usize,
    record_size: usize,
    count: u64,
}

impl RecordAllocator {
    /// Initializes a fresh allocator region, zeroing the counter.
    pub(crate) fn create(
        file: &mut MemoryFile,
        base: usize,
        record_size: usize,
    ) -> Result<Self> {
        if file.len() < base + COUNTER_SIZE {
            file.resize(base + COUNTER_SIZE)?;
        }
        file.write_u64(base, 0);

        Ok(Self {
            base,
            record_size,
            count: 0,
        })
    }

    /// Validates the persisted counter against the file size.
    pub(crate) fn start(file: &MemoryFile, base: usize, record_size: usize) -> Result<Self> {
        if file.len() < base + COUNTER_SIZE {
            return Err(Error::CorruptedDatabase);
        }

        let count = file.read_u64(base);
        let end = usize::try_from(count)
            .ok()
            .and_then(|count| count.checked_mul(record_size))
            .and_then(|records| records.checked_add(base + COUNTER_SIZE))
            .ok_or(Error::CorruptedDatabase)?;

        if end > file.len() {
            return Err(Error::CorruptedDatabase);
        }

        Ok(Self {
            base,
            record_size,
            count,
        })
    }

    /// Reserves a new record slot and returns its index, growing the file
    /// when the slot would not fit the current mapping.
    pub(crate) fn allocate(&mut self, file: &mut MemoryFile) -> Result<u32> {
        // u32::MAX is the null chain terminator.
        let index = u32::try_from(self.count)
            .ok()
            .filter(|index| *index != u32::MAX)
            .ok_or(Error::TableFull)?;

        self.count += 1;

        let end = self.base + COUNTER_SIZE + self.count as usize * self.record_size;
        if end > file.len() {
            file.resize(end.max(file.len().saturating_mul(2)))?;
        }

        Ok(index)
    }

    /// Byte offset of the record slot at `index`.
    pub(crate) fn offset(&self, index: u32) -> usize {
        self.base + COUNTER_SIZE + index as usize * self.record_size
    }

    /// Number of records allocated so far.
    pub(crate) fn count(&self) -> u64 {
        self.count
    }

    /// Persists the counter and flushes the whole mapping.
    pub(crate) fn sync(&self, file: &mut MemoryFile) -> Result<()> {
        file.write_u64(self.base, self.count);
        file.sync()
    }
}
