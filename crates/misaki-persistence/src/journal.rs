use crate::{PersistenceError, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rocksdb::{Options, WriteBatch, WriteOptions, DB};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use tracing::{debug, info};
use uuid::Uuid;

/// Configuration for the message journal
#[derive(Debug, Clone)]
pub struct JournalConfig {
    pub data_dir: PathBuf,
    /// fsync every append before acknowledging it
    pub sync_writes: bool,
}

impl Default for JournalConfig {
    fn default() -> Self {
        JournalConfig {
            data_dir: PathBuf::from("./data"),
            sync_writes: true,
        }
    }
}

/// A message as it was accepted by the broker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: Uuid,
    pub queue: String,
    pub body: String,
    pub group_id: String,
    pub dedup_id: String,
    pub enqueued_at: DateTime<Utc>,
}

/// Journal entry types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournalEntry {
    /// Message accepted into a queue
    Stored { message: StoredMessage },

    /// Message deleted by a consumer
    Deleted {
        queue: String,
        id: Uuid,
        timestamp: DateTime<Utc>,
    },
}

/// Append-only journal of queue mutations, keyed by sequence number.
///
/// Deliveries are not journaled: after a restart every undeleted message is
/// visible again.
pub struct Journal {
    db: DB,
    sequence_number: Mutex<u64>,
    sync_writes: bool,
}

impl Journal {
    /// Create or open the journal under `data_dir/journal`
    pub fn open(config: JournalConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let path = config.data_dir.join("journal");

        let mut opts = Options::default();
        opts.create_if_missing(true);

        let db = DB::open(&opts, &path)?;

        let mut iter = db.raw_iterator();
        iter.seek_to_last();

        let sequence_number = match iter.key() {
            Some(key) if iter.valid() => decode_key(key)? + 1,
            _ => 0,
        };

        info!("Opened journal at {:?} (next sequence {})", path, sequence_number);

        Ok(Journal {
            db,
            sequence_number: Mutex::new(sequence_number),
            sync_writes: config.sync_writes,
        })
    }

    /// Append entry, returning its sequence number
    pub fn append(&self, entry: &JournalEntry) -> Result<u64> {
        let mut seq = self.sequence_number.lock();
        let seq_num = *seq;

        let value = bincode::serialize(entry)?;
        let mut write_options = WriteOptions::default();
        write_options.set_sync(self.sync_writes);

        self.db.put_opt(seq_num.to_be_bytes(), value, &write_options)?;

        *seq += 1;
        Ok(seq_num)
    }

    /// All entries in sequence order
    pub fn replay(&self) -> Result<Vec<(u64, JournalEntry)>> {
        let mut entries = Vec::new();
        let mut iter = self.db.raw_iterator();
        iter.seek_to_first();

        while iter.valid() {
            if let (Some(key), Some(value)) = (iter.key(), iter.value()) {
                let seq = decode_key(key)?;
                let entry: JournalEntry = bincode::deserialize(value)?;
                entries.push((seq, entry));
            }
            iter.next();
        }
        iter.status()?;

        Ok(entries)
    }

    /// Messages stored and never deleted, in enqueue order
    pub fn recover(&self) -> Result<Vec<StoredMessage>> {
        let mut live: HashMap<Uuid, (u64, StoredMessage)> = HashMap::new();

        for (seq, entry) in self.replay()? {
            match entry {
                JournalEntry::Stored { message } => {
                    live.insert(message.id, (seq, message));
                }
                JournalEntry::Deleted { id, .. } => {
                    live.remove(&id);
                }
            }
        }

        let mut messages: Vec<(u64, StoredMessage)> = live.into_values().collect();
        messages.sort_by_key(|(seq, _)| *seq);
        Ok(messages.into_iter().map(|(_, message)| message).collect())
    }

    /// Drop every entry belonging to a deleted message. Returns entries removed.
    pub fn compact(&self) -> Result<usize> {
        let entries = self.replay()?;

        let deleted: HashSet<Uuid> = entries
            .iter()
            .filter_map(|(_, entry)| match entry {
                JournalEntry::Deleted { id, .. } => Some(*id),
                JournalEntry::Stored { .. } => None,
            })
            .collect();

        let mut batch = WriteBatch::default();
        let mut removed = 0;
        for (seq, entry) in &entries {
            let id = match entry {
                JournalEntry::Stored { message } => message.id,
                JournalEntry::Deleted { id, .. } => *id,
            };
            if deleted.contains(&id) {
                batch.delete(seq.to_be_bytes());
                removed += 1;
            }
        }

        if removed > 0 {
            self.db.write(batch)?;
            debug!("Compacted {} journal entries", removed);
        }

        Ok(removed)
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

fn decode_key(key: &[u8]) -> Result<u64> {
    let bytes: [u8; 8] = key
        .try_into()
        .map_err(|_| PersistenceError::JournalError("Invalid key format".to_string()))?;
    Ok(u64::from_be_bytes(bytes))
}
