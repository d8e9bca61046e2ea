//! Error types for the spent-output storage.

use bitcoin::OutPoint;

/// Errors that can occur while operating the spent-output index.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Mapping, resize or flush failure. Fatal: the writer must shut down.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Another process holds the database directory.
    #[error("database directory is locked by another process")]
    DirectoryLocked,

    /// The stored bucket count or record counter does not match the file.
    #[error("database file is corrupted or was never created")]
    CorruptedDatabase,

    /// The record index space is exhausted.
    #[error("record table is full")]
    TableFull,

    /// Removing a spend record for an output that is not marked spent.
    #[error("output is not marked spent: {0}")]
    UnspentOutput(OutPoint),
}

pub type Result<T> = std::result::Result<T, Error>;
