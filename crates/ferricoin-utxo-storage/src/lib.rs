//! Persistent spent-output index backing double-spend checks.
//!
//! One memory-mapped file maps `(prev_txid, vout)` to the input that spent
//! the output: `sha256(txid || vout_le)` keys a separate-chaining hash table
//! whose 36-byte values hold `(spending_txid || vin_le)`. Presence of a
//! record means the output is spent on the committed chain; absence means
//! unspent or nonexistent.
//!
//! Readers run lock-free under a sequence lock; writers are serialized into
//! a single strand and make a block durable with one `sync` at the end of
//! its turn. An advisory lock on the database directory keeps a second
//! process out.

mod error;
mod header;
mod htdb;
mod memory_file;
mod seqlock;

pub use error::{Error, Result};
pub use seqlock::{SeqLock, WriteTurn};

use crate::htdb::RecordMap;
use crate::memory_file::MemoryFile;
use bitcoin::hashes::{sha256, Hash};
use bitcoin::{Block, OutPoint, Txid};
use ferricoin_primitives::{InPoint, SpentIndex};
use fs2::FileExt;
use parking_lot::Mutex;
use std::cell::UnsafeCell;
use std::fs::{File, OpenOptions};
use std::path::Path;

/// Spent-output table file inside the database directory.
const UTXO_FILE_NAME: &str = "utxo_db";

/// Lock file guarding the database directory.
const LOCK_FILE_NAME: &str = "db-lock";

/// Record value width: spending txid plus input index.
const VALUE_SIZE: usize = 32 + 4;

/// Rows-per-bucket ratio above which `sync` starts complaining.
const LOAD_FACTOR_WARN: u64 = 4;

/// Creation-time options for the spent-output index.
#[derive(Debug, Clone)]
pub struct UtxoDbOptions {
    /// Number of hash-table buckets. Fixed once the file is created; the
    /// load factor may exceed 1 since chains tolerate it.
    pub buckets: u32,
}

impl Default for UtxoDbOptions {
    fn default() -> Self {
        // Sized for a full mainnet UTXO set. A deployment choice, not a
        // consensus parameter.
        Self {
            buckets: 228_110_589,
        }
    }
}

/// Statistics about the index. Load factor is `rows / buckets`.
#[derive(Debug, Clone, Copy)]
pub struct StatInfo {
    /// Number of hash-table buckets.
    pub buckets: u32,
    /// Total record rows, unlinked ones included.
    pub rows: u64,
}

struct Inner {
    file: MemoryFile,
    map: RecordMap,
}

/// The spent-output database.
pub struct UtxoDb {
    inner: UnsafeCell<Inner>,
    /// Readers retry around write turns instead of taking a lock.
    seqlock: SeqLock,
    /// Serializes writers into a single strand.
    write_lock: Mutex<()>,
    /// Advisory directory lock, held for the lifetime of the database.
    _lock_file: File,
}

// Readers only dereference the interior through the seqlock protocol and
// discard anything observed across a write turn; writers are serialized by
// `write_lock`. See `SeqLock` for the ordering argument.
unsafe impl Send for UtxoDb {}
unsafe impl Sync for UtxoDb {}

impl UtxoDb {
    /// Initializes a new database in `dir`, clobbering a previous table.
    ///
    /// Fails with [`Error::DirectoryLocked`] if another process holds the
    /// directory.
    pub fn create(dir: &Path, options: UtxoDbOptions) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let lock_file = acquire_directory_lock(dir)?;

        let mut file = MemoryFile::open(&dir.join(UTXO_FILE_NAME))?;
        let map = RecordMap::create(&mut file, options.buckets, VALUE_SIZE)?;
        map.sync(&mut file)?;

        tracing::info!(
            "Created spent-output index with {} buckets",
            options.buckets
        );

        Ok(Self::assemble(file, map, lock_file))
    }

    /// Opens an existing database in `dir`, validating the stored header.
    pub fn start(dir: &Path) -> Result<Self> {
        let lock_file = acquire_directory_lock(dir)?;

        let file = MemoryFile::open(&dir.join(UTXO_FILE_NAME))?;
        let map = RecordMap::start(&file, VALUE_SIZE)?;

        tracing::info!(
            "Opened spent-output index: {} buckets, {} rows",
            map.buckets(),
            map.rows()
        );

        Ok(Self::assemble(file, map, lock_file))
    }

    fn assemble(file: MemoryFile, map: RecordMap, lock_file: File) -> Self {
        Self {
            inner: UnsafeCell::new(Inner { file, map }),
            seqlock: SeqLock::new(),
            write_lock: Mutex::new(()),
            _lock_file: lock_file,
        }
    }

    /// Returns the input that spent `outpoint`, or `None` if the output is
    /// unspent or unknown.
    pub fn get(&self, outpoint: &OutPoint) -> Option<InPoint> {
        let key = outpoint_to_key(outpoint);

        self.seqlock.read(|| {
            let inner = unsafe { &*self.inner.get() };
            inner.map.get(&inner.file, &key).map(decode_inpoint)
        })
    }

    /// Marks `outpoint` as spent by `spender`. Re-storing an already spent
    /// outpoint overwrites the previous record.
    pub fn store(&self, outpoint: &OutPoint, spender: &InPoint) -> Result<()> {
        let key = outpoint_to_key(outpoint);
        self.with_writer(|inner| {
            // Keep one record per key.
            inner.map.unlink(&mut inner.file, &key);
            store_record(inner, &key, spender)
        })
    }

    /// Clears the spend record of `outpoint`. Must succeed whenever the
    /// outpoint was previously stored.
    pub fn remove(&self, outpoint: &OutPoint) -> Result<()> {
        let key = outpoint_to_key(outpoint);
        self.with_writer(|inner| {
            if inner.map.unlink(&mut inner.file, &key) {
                Ok(())
            } else {
                Err(Error::UnspentOutput(*outpoint))
            }
        })
    }

    /// Makes everything stored so far durable.
    pub fn sync(&self) -> Result<()> {
        let _writer = self.write_lock.lock();
        let inner = unsafe { &mut *self.inner.get() };

        let rows = inner.map.rows();
        let buckets = inner.map.buckets() as u64;
        if rows > buckets.saturating_mul(LOAD_FACTOR_WARN) {
            tracing::warn!(
                "Spent-output index load factor above {LOAD_FACTOR_WARN}: \
                 {rows} rows over {buckets} buckets"
            );
        }

        inner.map.sync(&mut inner.file)
    }

    /// Applies the spend records of a connected block in one durable writer
    /// turn: every non-coinbase input marks its previous output spent, then
    /// the table is synced once.
    pub fn apply_block(&self, block: &Block) -> Result<()> {
        self.with_writer(|inner| {
            let mut stored = 0usize;

            for tx in &block.txdata {
                if tx.is_coinbase() {
                    continue;
                }
                let txid = tx.compute_txid();
                for (vin, input) in tx.input.iter().enumerate() {
                    let key = outpoint_to_key(&input.previous_output);
                    inner.map.unlink(&mut inner.file, &key);
                    store_record(inner, &key, &InPoint::new(txid, vin as u32))?;
                    stored += 1;
                }
            }

            inner.map.sync(&mut inner.file)?;

            tracing::debug!("Marked {stored} outputs spent");
            Ok(())
        })
    }

    /// Undoes [`Self::apply_block`] during a reorganization: every spend
    /// record the block introduced is removed, then the table is synced.
    pub fn revert_block(&self, block: &Block) -> Result<()> {
        self.with_writer(|inner| {
            let mut removed = 0usize;

            for tx in block.txdata.iter().rev() {
                if tx.is_coinbase() {
                    continue;
                }
                for input in tx.input.iter().rev() {
                    let key = outpoint_to_key(&input.previous_output);
                    if !inner.map.unlink(&mut inner.file, &key) {
                        return Err(Error::UnspentOutput(input.previous_output));
                    }
                    removed += 1;
                }
            }

            inner.map.sync(&mut inner.file)?;

            tracing::debug!("Cleared {removed} spend records");
            Ok(())
        })
    }

    /// Returns bucket and row counts for diagnostics.
    pub fn statinfo(&self) -> StatInfo {
        self.seqlock.read(|| {
            let inner = unsafe { &*self.inner.get() };
            StatInfo {
                buckets: inner.map.buckets(),
                rows: inner.map.rows(),
            }
        })
    }

    fn with_writer<T>(&self, mutate: impl FnOnce(&mut Inner) -> Result<T>) -> Result<T> {
        let _writer = self.write_lock.lock();
        let _turn = self.seqlock.write_turn();
        let inner = unsafe { &mut *self.inner.get() };
        mutate(inner)
    }
}

impl SpentIndex for UtxoDb {
    fn spending_input(&self, outpoint: &OutPoint) -> Option<InPoint> {
        self.get(outpoint)
    }
}

fn store_record(inner: &mut Inner, key: &[u8; 32], spender: &InPoint) -> Result<()> {
    let value = encode_inpoint(spender);
    inner
        .map
        .store(&mut inner.file, key, |slot| slot.copy_from_slice(&value))
}

fn acquire_directory_lock(dir: &Path) -> Result<File> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(dir.join(LOCK_FILE_NAME))?;

    file.try_lock_exclusive()
        .map_err(|_| Error::DirectoryLocked)?;

    Ok(file)
}

/// Fingerprint key of an outpoint: `sha256(txid || vout_le)`.
///
/// The output index on its own has almost no bit-distribution evenness, so
/// the pair is re-hashed to keep bucket assignment uniform.
pub fn outpoint_to_key(outpoint: &OutPoint) -> [u8; 32] {
    let mut point = [0u8; 36];
    point[..32].copy_from_slice(&outpoint.txid.to_byte_array());
    point[32..].copy_from_slice(&outpoint.vout.to_le_bytes());

    sha256::Hash::hash(&point).to_byte_array()
}

fn encode_inpoint(inpoint: &InPoint) -> [u8; VALUE_SIZE] {
    let mut value = [0u8; VALUE_SIZE];
    value[..32].copy_from_slice(&inpoint.txid.to_byte_array());
    value[32..].copy_from_slice(&inpoint.vin.to_le_bytes());
    value
}

fn decode_inpoint(value: &[u8]) -> InPoint {
    let txid = Txid::from_byte_array(value[..32].try_into().expect("36-byte record value"));
    let vin = u32::from_le_bytes(value[32..].try_into().expect("36-byte record value"));
    InPoint::new(txid, vin)
}
