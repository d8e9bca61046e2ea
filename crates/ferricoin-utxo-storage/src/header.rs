//! Hash-table header: the bucket array at the head of the record file.

use crate::memory_file::MemoryFile;
use crate::{Error, Result};

/// Chain terminator stored in bucket heads and record next fields.
pub(crate) const NULL_INDEX: u32 = u32::MAX;

/// Width of a key digest.
pub(crate) const KEY_SIZE: usize = 32;

/// Key digests are sha256 outputs.
pub(crate) type Key = [u8; KEY_SIZE];

const BUCKET_COUNT_SIZE: usize = 4;
const BUCKET_SIZE: usize = 4;

/// Fixed array of `buckets` record indices at file offset zero, preceded by
/// the bucket count itself. The count is fixed at create time.
pub(crate) struct TableHeader {
    buckets: u32,
}

impl TableHeader {
    /// Writes the bucket count and nulls every bucket.
    pub(crate) fn create(file: &mut MemoryFile, buckets: u32) -> Result<Self> {
        assert!(buckets > 0, "bucket count must be non-zero");
        debug_assert!(file.len() >= Self::size_for(buckets));

        file.write_u32(0, buckets);
        for bucket in 0..buckets {
            file.write_u32(Self::bucket_offset(bucket), NULL_INDEX);
        }

        Ok(Self { buckets })
    }

    /// Validates the stored bucket count against the file size.
    pub(crate) fn start(file: &MemoryFile) -> Result<Self> {
        if file.len() < BUCKET_COUNT_SIZE {
            return Err(Error::CorruptedDatabase);
        }

        let buckets = file.read_u32(0);
        if buckets == 0 || file.len() < Self::size_for(buckets) {
            return Err(Error::CorruptedDatabase);
        }

        Ok(Self { buckets })
    }

    /// Number of buckets in the array.
    pub(crate) fn buckets(&self) -> u32 {
        self.buckets
    }

    /// Serialized size of a header with `buckets` buckets.
    pub(crate) fn size_for(buckets: u32) -> usize {
        BUCKET_COUNT_SIZE + buckets as usize * BUCKET_SIZE
    }

    /// Serialized size of this header.
    pub(crate) fn size(&self) -> usize {
        Self::size_for(self.buckets)
    }

    /// Bucket a key chains under. Stable across restarts.
    ///
    /// Keys are sha256 digests, so the low eight bytes are already uniformly
    /// distributed and a remainder is an adequate bucket function.
    pub(crate) fn bucket_index(&self, key: &Key) -> u32 {
        let prefix = u64::from_le_bytes(key[..8].try_into().expect("8-byte prefix"));
        (prefix % self.buckets as u64) as u32
    }

    /// Head record index of the given bucket chain.
    pub(crate) fn read_head(&self, file: &MemoryFile, bucket: u32) -> u32 {
        debug_assert!(bucket < self.buckets);
        file.read_u32(Self::bucket_offset(bucket))
    }

    /// Repoints the given bucket chain at `index`.
    pub(crate) fn write_head(&self, file: &mut MemoryFile, bucket: u32, index: u32) {
        debug_assert!(bucket < self.buckets);
        file.write_u32(Self::bucket_offset(bucket), index);
    }

    fn bucket_offset(bucket: u32) -> usize {
        BUCKET_COUNT_SIZE + bucket as usize * BUCKET_SIZE
    }
}
