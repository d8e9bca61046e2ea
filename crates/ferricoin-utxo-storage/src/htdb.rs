//! Separate-chaining hash table over fixed-size records.
//!
//! Record slot layout: `key (32) || next (4, LE) || value`. Bucket heads live
//! in the [`TableHeader`]; chains are walked by record index.

use crate::header::{Key, TableHeader, KEY_SIZE, NULL_INDEX};
use crate::memory_file::{MemoryFile, RecordAllocator};
use crate::Result;

const NEXT_SIZE: usize = 4;

/// On-disk hash map keyed by a fixed-width digest.
pub(crate) struct RecordMap {
    header: TableHeader,
    allocator: RecordAllocator,
    value_size: usize,
}

impl RecordMap {
    /// Initializes a new table: sizes the file for the bucket array plus the
    /// allocator prefix, then writes both.
    pub(crate) fn create(file: &mut MemoryFile, buckets: u32, value_size: usize) -> Result<Self> {
        let header_size = TableHeader::size_for(buckets);
        let initial_size = header_size + 8;
        if file.len() < initial_size {
            file.resize(initial_size)?;
        }

        let header = TableHeader::create(file, buckets)?;
        let allocator =
            RecordAllocator::create(file, header_size, Self::record_size_for(value_size))?;

        Ok(Self {
            header,
            allocator,
            value_size,
        })
    }

    /// Opens an existing table, validating header and allocator state.
    pub(crate) fn start(file: &MemoryFile, value_size: usize) -> Result<Self> {
        let header = TableHeader::start(file)?;
        let allocator =
            RecordAllocator::start(file, header.size(), Self::record_size_for(value_size))?;

        Ok(Self {
            header,
            allocator,
            value_size,
        })
    }

    /// Returns a read-only view of the value bytes stored under `key`.
    ///
    /// A bucket collision does not imply a key collision, so the full key is
    /// compared at every chain link. With duplicate keys the most recently
    /// stored record wins (it sits earlier in the chain).
    pub(crate) fn get<'a>(&self, file: &'a MemoryFile, key: &Key) -> Option<&'a [u8]> {
        let mut index = self.header.read_head(file, self.header.bucket_index(key));

        while index != NULL_INDEX {
            // Treat an index beyond the allocated range as a broken chain.
            if index as u64 >= self.allocator.count() {
                return None;
            }

            let offset = self.allocator.offset(index);
            if file.read(offset, KEY_SIZE) == key {
                return Some(file.read(offset + KEY_SIZE + NEXT_SIZE, self.value_size));
            }

            index = file.read_u32(offset + KEY_SIZE);
        }

        None
    }

    /// Stores a new record under `key`, letting `write_value` fill the value
    /// slot, then publishes it at the head of its bucket chain.
    ///
    /// The bucket head update comes last so that a concurrent reader sees
    /// either the old chain or the fully initialized record.
    pub(crate) fn store(
        &mut self,
        file: &mut MemoryFile,
        key: &Key,
        write_value: impl FnOnce(&mut [u8]),
    ) -> Result<()> {
        let bucket = self.header.bucket_index(key);
        let index = self.allocator.allocate(file)?;
        let offset = self.allocator.offset(index);

        file.write(offset, key);
        let head = self.header.read_head(file, bucket);
        file.write_u32(offset + KEY_SIZE, head);
        write_value(file.slice_mut(offset + KEY_SIZE + NEXT_SIZE, self.value_size));

        self.header.write_head(file, bucket, index);

        Ok(())
    }

    /// Removes the most recent record stored under `key` by repointing its
    /// predecessor (or the bucket head) at its successor.
    ///
    /// Returns `false` if the key is absent. The freed slot is leaked;
    /// reclamation is left to offline compaction.
    pub(crate) fn unlink(&mut self, file: &mut MemoryFile, key: &Key) -> bool {
        let bucket = self.header.bucket_index(key);
        let mut previous: Option<u32> = None;
        let mut index = self.header.read_head(file, bucket);

        while index != NULL_INDEX {
            if index as u64 >= self.allocator.count() {
                return false;
            }

            let offset = self.allocator.offset(index);
            let next = file.read_u32(offset + KEY_SIZE);

            if file.read(offset, KEY_SIZE) == key {
                match previous {
                    Some(previous) => {
                        let previous_offset = self.allocator.offset(previous);
                        file.write_u32(previous_offset + KEY_SIZE, next);
                    }
                    None => self.header.write_head(file, bucket, next),
                }
                return true;
            }

            previous = Some(index);
            index = next;
        }

        false
    }

    /// Persists the record counter and flushes the mapping.
    pub(crate) fn sync(&self, file: &mut MemoryFile) -> Result<()> {
        self.allocator.sync(file)
    }

    pub(crate) fn buckets(&self) -> u32 {
        self.header.buckets()
    }

    /// Total records ever allocated, unlinked ones included.
    pub(crate) fn rows(&self) -> u64 {
        self.allocator.count()
    }

    fn record_size_for(value_size: usize) -> usize {
        KEY_SIZE + NEXT_SIZE + value_size
    }
}
