//! Queue broker for misaki.
//!
//! The broker keeps named at-least-once queues in a [`MessageStore`],
//! journals them to RocksDB and serves the framed TCP protocol from
//! `misaki-protocol`. [`LocalQueue`] exposes the same store in-process.

pub mod broker;
pub mod config;
pub mod local;
pub mod metrics;
pub mod queue;

pub use broker::Broker;
pub use config::BrokerConfig;
pub use local::LocalQueue;
pub use queue::{DeleteOutcome, EnqueueOutcome, MessageStore, QueueDepth, QueueSettings};

use misaki_persistence::PersistenceError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Message body of {0} bytes exceeds the limit")]
    BodyTooLarge(usize),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

pub type Result<T> = std::result::Result<T, BrokerError>;
