use crate::{QueueConfig, QueueError, QueueService, QueuedMessage, ReceiptToken, Result};
use misaki_protocol::{
    fresh_label, AckResponse, DeleteRequest, EnqueueRequest, Message, MessageCodec,
    ReceiveRequest,
};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

use std::time::Duration;
use tracing::debug;

/// Deadline for enqueue/delete, and slack added on top of a long poll
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Queue client for a `misaki-broker`.
///
/// Each call opens its own connection, so one instance can be shared freely
/// between concurrent request handlers.
#[derive(Debug, Clone)]
pub struct BrokerQueue {
    broker_address: String,
    queue: String,
    visibility_timeout_secs: Option<u32>,
}

impl BrokerQueue {
    pub fn new(broker_address: impl Into<String>, queue: impl Into<String>) -> Self {
        BrokerQueue {
            broker_address: broker_address.into(),
            queue: queue.into(),
            visibility_timeout_secs: None,
        }
    }

    pub fn from_config(config: &QueueConfig) -> Result<Self> {
        config.validate()?;
        Ok(BrokerQueue {
            broker_address: config.broker_address.clone(),
            queue: config.name.clone(),
            visibility_timeout_secs: config.visibility_timeout_secs,
        })
    }

    /// Send one request and wait for its Ack, bounded by `deadline`
    async fn request(&self, message: Message, deadline: Duration) -> Result<AckResponse> {
        tokio::time::timeout(deadline, self.exchange(message))
            .await
            .map_err(|_| QueueError::Timeout)?
    }

    async fn exchange(&self, message: Message) -> Result<AckResponse> {
        let stream = TcpStream::connect(&self.broker_address)
            .await
            .map_err(|e| QueueError::ConnectionError(e.to_string()))?;

        let mut framed = Framed::new(stream, MessageCodec);
        framed.send(message).await?;

        match framed.next().await {
            Some(Ok(Message::Ack(ack))) => Ok(ack),
            Some(Ok(Message::Nack(nack))) => Err(QueueError::ServerError(nack.error)),
            Some(Ok(other)) => Err(QueueError::UnexpectedResponse(format!(
                "{:?}",
                other.message_type()
            ))),
            Some(Err(e)) => Err(e.into()),
            None => Err(QueueError::ConnectionError("Connection closed".to_string())),
        }
    }
}

#[async_trait]
impl QueueService for BrokerQueue {
    fn queue_name(&self) -> &str {
        &self.queue
    }

    async fn enqueue(&self, payload: &str) -> Result<()> {
        let message = Message::Enqueue(EnqueueRequest {
            queue: self.queue.clone(),
            body: payload.to_string(),
            dedup_id: fresh_label(),
            group_id: fresh_label(),
        });

        let ack = self.request(message, REQUEST_TIMEOUT).await?;
        debug!("Enqueued to {}: {:?}", self.queue, ack.detail);
        Ok(())
    }

    async fn receive_blocking(&self, timeout: Duration) -> Result<Option<QueuedMessage>> {
        let wait_secs = u32::try_from(timeout.as_secs()).unwrap_or(u32::MAX);
        let message = Message::Receive(ReceiveRequest {
            queue: self.queue.clone(),
            wait_secs,
            visibility_timeout_secs: self.visibility_timeout_secs,
        });

        let ack = self.request(message, timeout.saturating_add(REQUEST_TIMEOUT)).await?;
        ack.message
            .map(|delivered| QueuedMessage::from_delivered(&self.queue, delivered))
            .transpose()
    }

    async fn delete(&self, token: &ReceiptToken) -> Result<()> {
        let message = Message::Delete(DeleteRequest {
            queue: self.queue.clone(),
            receipt: token.as_str().to_string(),
        });

        let ack = self.request(message, REQUEST_TIMEOUT).await?;
        if let Some(detail) = ack.detail {
            debug!("Delete of {} on {}: {}", token, self.queue, detail);
        }
        Ok(())
    }
}
