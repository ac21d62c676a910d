mod journal;

pub use journal::{Journal, JournalConfig, JournalEntry, StoredMessage};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("RocksDB error: {0}")]
    RocksDbError(#[from] rocksdb::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] bincode::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Journal error: {0}")]
    JournalError(String),
}

pub type Result<T> = std::result::Result<T, PersistenceError>;
