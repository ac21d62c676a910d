use crate::{MessageStore, QueueSettings};
use misaki_client::{QueueError, QueueService, QueuedMessage, ReceiptToken, Result};
use misaki_protocol::fresh_label;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// [`QueueService`] over an in-process [`MessageStore`]
#[derive(Clone)]
pub struct LocalQueue {
    store: Arc<MessageStore>,
    queue: String,
}

impl LocalQueue {
    pub fn new(store: Arc<MessageStore>, queue: impl Into<String>) -> Self {
        LocalQueue {
            store,
            queue: queue.into(),
        }
    }

    /// Fresh in-memory store with default settings
    pub fn in_memory(queue: impl Into<String>) -> Result<Self> {
        Self::with_settings(queue, QueueSettings::default())
    }

    pub fn with_settings(queue: impl Into<String>, settings: QueueSettings) -> Result<Self> {
        let store = MessageStore::in_memory(settings)
            .map_err(|e| QueueError::ServerError(e.to_string()))?;
        Ok(LocalQueue::new(Arc::new(store), queue))
    }

    pub fn store(&self) -> Arc<MessageStore> {
        self.store.clone()
    }
}

#[async_trait]
impl QueueService for LocalQueue {
    fn queue_name(&self) -> &str {
        &self.queue
    }

    async fn enqueue(&self, payload: &str) -> Result<()> {
        self.store
            .enqueue(&self.queue, payload, &fresh_label(), &fresh_label())
            .map_err(|e| QueueError::ServerError(e.to_string()))?;
        Ok(())
    }

    async fn receive_blocking(&self, timeout: Duration) -> Result<Option<QueuedMessage>> {
        self.store
            .receive(&self.queue, timeout, None)
            .await
            .map(|delivered| QueuedMessage::from_delivered(&self.queue, delivered))
            .transpose()
    }

    async fn delete(&self, token: &ReceiptToken) -> Result<()> {
        self.store
            .delete(&self.queue, token.as_str())
            .map_err(|e| QueueError::ServerError(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_identical_payloads_are_not_coalesced() {
        let queue = LocalQueue::in_memory("misaki").unwrap();
        queue.enqueue(r#"{"command_name":"ping"}"#).await.unwrap();
        queue.enqueue(r#"{"command_name":"ping"}"#).await.unwrap();

        assert_eq!(queue.store().depth("misaki").visible, 2);
    }

    #[tokio::test]
    async fn test_receive_then_delete() {
        let queue = LocalQueue::in_memory("misaki").unwrap();
        queue.enqueue("hello").await.unwrap();

        let msg = queue
            .receive_blocking(Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg.body, "hello");
        assert_eq!(msg.origin_queue, "misaki");

        queue.delete(&msg.receipt_token).await.unwrap();
        // Idempotent
        queue.delete(&msg.receipt_token).await.unwrap();
        assert!(queue
            .receive_blocking(Duration::from_millis(10))
            .await
            .unwrap()
            .is_none());
    }
}
