//! Queue access for producers and consumers.
//!
//! [`QueueService`] is the seam between the trigger/dispatch code and the
//! durable queue. [`BrokerQueue`] talks to a `misaki-broker` over TCP; the
//! broker crate also provides an in-process implementation with the same
//! semantics.

mod broker_queue;
mod config;

pub use broker_queue::BrokerQueue;
pub use config::QueueConfig;

use async_trait::async_trait;
use misaki_protocol::{DeliveredMessage, ProtocolError};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Protocol error: {0}")]
    ProtocolError(#[from] ProtocolError),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Timeout")]
    Timeout,

    #[error("Invalid queue configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, QueueError>;

/// Opaque per-delivery handle; required to delete a received message
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReceiptToken(String);

impl ReceiptToken {
    pub fn new(token: impl Into<String>) -> Self {
        ReceiptToken(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReceiptToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A received message, owned by the caller until deleted or dropped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedMessage {
    pub body: String,
    pub receipt_token: ReceiptToken,
    pub origin_queue: String,
    pub receive_count: u32,
}

impl QueuedMessage {
    /// Validate a delivery: body and receipt are both required
    pub fn from_delivered(origin_queue: &str, delivered: DeliveredMessage) -> Result<Self> {
        let body = delivered.body.ok_or_else(|| {
            QueueError::MalformedMessage(format!("message {} has no body", delivered.message_id))
        })?;
        let receipt = delivered.receipt.ok_or_else(|| {
            QueueError::MalformedMessage(format!(
                "message {} has no receipt",
                delivered.message_id
            ))
        })?;

        Ok(QueuedMessage {
            body,
            receipt_token: ReceiptToken::new(receipt),
            origin_queue: origin_queue.to_string(),
            receive_count: delivered.receive_count,
        })
    }
}

/// Durable at-least-once queue, safe to share between tasks
#[async_trait]
pub trait QueueService: Send + Sync {
    /// Name of the queue this client is bound to
    fn queue_name(&self) -> &str;

    /// Store `payload` for later delivery. Every call uses a fresh
    /// deduplication id so identical payloads are never coalesced.
    async fn enqueue(&self, payload: &str) -> Result<()>;

    /// Wait up to `timeout` for a message. `Ok(None)` means nothing arrived
    /// and the caller should simply ask again.
    async fn receive_blocking(&self, timeout: Duration) -> Result<Option<QueuedMessage>>;

    /// Acknowledge a delivery. Deleting an expired or already-deleted
    /// receipt succeeds.
    async fn delete(&self, token: &ReceiptToken) -> Result<()>;
}
