mod message;
mod codec;

pub use message::{
    Message, MessageType, EnqueueRequest, ReceiveRequest, DeleteRequest, AckResponse,
    NackResponse, DeliveredMessage,
};
pub use codec::MessageCodec;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid message type: {0}")]
    InvalidMessageType(u8),

    #[error("Message too large: {0} bytes")]
    MessageTooLarge(usize),

    #[error("Empty frame")]
    EmptyFrame,

    #[error("Serialization error: {0}")]
    SerializationError(#[from] bincode::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Maximum frame size: 1MB
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Maximum message body accepted by the broker: 256KB
pub const MAX_BODY_SIZE: usize = 256 * 1024;

/// Fresh random identifier for deduplication and message groups
pub fn fresh_label() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
