use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Message types for the TCP protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Enqueue = 1,
    Receive = 2,
    Delete = 3,
    Ack = 4,
    Nack = 5,
}

impl MessageType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(MessageType::Enqueue),
            2 => Some(MessageType::Receive),
            3 => Some(MessageType::Delete),
            4 => Some(MessageType::Ack),
            5 => Some(MessageType::Nack),
            _ => None,
        }
    }

    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

/// Protocol messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// Store a message body
    Enqueue(EnqueueRequest),

    /// Long-poll for the next visible message
    Receive(ReceiveRequest),

    /// Acknowledge a delivery by its receipt
    Delete(DeleteRequest),

    /// Positive acknowledgment
    Ack(AckResponse),

    /// Negative acknowledgment
    Nack(NackResponse),
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Enqueue(_) => MessageType::Enqueue,
            Message::Receive(_) => MessageType::Receive,
            Message::Delete(_) => MessageType::Delete,
            Message::Ack(_) => MessageType::Ack,
            Message::Nack(_) => MessageType::Nack,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnqueueRequest {
    pub queue: String,
    pub body: String,
    /// Enqueues repeating a recent id are acknowledged but not stored again
    pub dedup_id: String,
    /// Messages sharing a group are delivered one at a time, in order
    pub group_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiveRequest {
    pub queue: String,
    /// Long-poll duration; the broker caps it at its own maximum
    pub wait_secs: u32,
    /// Overrides the broker's default visibility timeout
    pub visibility_timeout_secs: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub queue: String,
    pub receipt: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveredMessage {
    pub message_id: Uuid,
    pub body: Option<String>,
    pub receipt: Option<String>,
    /// How many times this message has been handed out, this delivery included
    pub receive_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AckResponse {
    /// Set on a Receive that found a message
    pub message: Option<DeliveredMessage>,
    pub detail: Option<String>,
}

impl AckResponse {
    pub fn empty() -> Self {
        AckResponse {
            message: None,
            detail: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NackResponse {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_conversion() {
        assert_eq!(MessageType::from_u8(1), Some(MessageType::Enqueue));
        assert_eq!(MessageType::from_u8(5), Some(MessageType::Nack));
        assert_eq!(MessageType::from_u8(0), None);
        assert_eq!(MessageType::from_u8(99), None);

        assert_eq!(MessageType::Enqueue.as_u8(), 1);
        assert_eq!(MessageType::Delete.as_u8(), 3);
    }
}
