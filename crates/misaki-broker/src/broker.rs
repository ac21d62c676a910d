use crate::{
    config::BrokerConfig, metrics::BrokerMetrics, queue::MessageStore, DeleteOutcome,
    EnqueueOutcome,
};
use misaki_persistence::Journal;
use misaki_protocol::{
    AckResponse, DeleteRequest, EnqueueRequest, Message, MessageCodec, NackResponse,
    ReceiveRequest,
};

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Queue broker server
pub struct Broker {
    config: Arc<BrokerConfig>,
    store: Arc<MessageStore>,
    metrics: Arc<BrokerMetrics>,
    shutdown: CancellationToken,
}

impl Broker {
    pub fn new(config: BrokerConfig) -> anyhow::Result<Self> {
        let store = if config.persistence.in_memory {
            warn!("Persistence disabled, messages will not survive a restart");
            MessageStore::in_memory(config.queue_settings())?
        } else {
            let journal = Journal::open(config.journal_config())?;
            let metrics = Arc::new(BrokerMetrics::new()?);
            MessageStore::recover(config.queue_settings(), journal, metrics)?
        };

        Ok(Broker::with_store(config, Arc::new(store)))
    }

    /// Serve an existing store; used by tests and embedders
    pub fn with_store(config: BrokerConfig, store: Arc<MessageStore>) -> Self {
        let metrics = store.metrics();
        Broker {
            config: Arc::new(config),
            store,
            metrics,
            shutdown: CancellationToken::new(),
        }
    }

    /// Bind the configured address and serve until shutdown
    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        let addr = self.config.listen_address();
        let listener = TcpListener::bind(&addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from `listener` until shutdown
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> anyhow::Result<()> {
        info!("Broker listening on {}", listener.local_addr()?);

        // Start background tasks
        let broker = self.clone();
        tokio::spawn(async move {
            broker.background_tasks().await;
        });

        // Accept connections
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            debug!("New connection from {}", addr);
                            let broker = self.clone();
                            tokio::spawn(async move {
                                if let Err(e) = broker.handle_connection(stream, addr).await {
                                    error!("Connection error: {}", e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = self.shutdown.cancelled() => {
                    info!("Shutting down broker");
                    break;
                }
            }
        }

        if let Err(e) = self.store.flush() {
            error!("Failed to flush journal: {}", e);
        }

        Ok(())
    }

    /// Handle a client connection
    async fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) -> anyhow::Result<()> {
        let mut framed = Framed::new(stream, MessageCodec);
        self.metrics.connections_open.inc();

        let result = async {
            while let Some(result) = framed.next().await {
                match result {
                    Ok(message) => {
                        let response = tokio::select! {
                            response = self.handle_message(message) => response,
                            _ = self.shutdown.cancelled() => break,
                        };
                        framed.send(response).await?;
                    }
                    Err(e) => {
                        warn!("Protocol error from {}: {}", addr, e);
                        let nack = Message::Nack(NackResponse {
                            error: e.to_string(),
                        });
                        // Framing is lost after a bad frame, so close
                        let _ = framed.send(nack).await;
                        break;
                    }
                }
            }
            Ok::<(), anyhow::Error>(())
        }
        .await;

        self.metrics.connections_open.dec();
        debug!("Connection from {} closed", addr);
        result
    }

    /// Handle a protocol message
    async fn handle_message(&self, message: Message) -> Message {
        match message {
            Message::Enqueue(req) => self.handle_enqueue(req),
            Message::Receive(req) => self.handle_receive(req).await,
            Message::Delete(req) => self.handle_delete(req),
            other => Message::Nack(NackResponse {
                error: format!("Unsupported message type {:?}", other.message_type()),
            }),
        }
    }

    fn handle_enqueue(&self, req: EnqueueRequest) -> Message {
        match self
            .store
            .enqueue(&req.queue, &req.body, &req.dedup_id, &req.group_id)
        {
            Ok(EnqueueOutcome::Stored(id)) => Message::Ack(AckResponse {
                message: None,
                detail: Some(format!("stored {}", id)),
            }),
            Ok(EnqueueOutcome::Duplicate) => Message::Ack(AckResponse {
                message: None,
                detail: Some("duplicate".to_string()),
            }),
            Err(e) => {
                error!("Failed to enqueue on {}: {}", req.queue, e);
                Message::Nack(NackResponse {
                    error: format!("Failed to enqueue: {}", e),
                })
            }
        }
    }

    async fn handle_receive(&self, req: ReceiveRequest) -> Message {
        let wait = Duration::from_secs(u64::from(req.wait_secs));
        let visibility = req
            .visibility_timeout_secs
            .filter(|secs| *secs > 0)
            .map(|secs| Duration::from_secs(u64::from(secs)));

        let message = self.store.receive(&req.queue, wait, visibility).await;
        Message::Ack(AckResponse {
            message,
            detail: None,
        })
    }

    fn handle_delete(&self, req: DeleteRequest) -> Message {
        match self.store.delete(&req.queue, &req.receipt) {
            Ok(DeleteOutcome::Deleted) => Message::Ack(AckResponse::empty()),
            Ok(DeleteOutcome::Stale) => Message::Ack(AckResponse {
                message: None,
                detail: Some("stale receipt".to_string()),
            }),
            Err(e) => {
                error!("Failed to delete on {}: {}", req.queue, e);
                Message::Nack(NackResponse {
                    error: format!("Failed to delete: {}", e),
                })
            }
        }
    }

    /// Background tasks (journal compaction, metrics)
    async fn background_tasks(&self) {
        let mut metrics_interval = tokio::time::interval(Duration::from_secs(10));
        let mut compaction_interval = tokio::time::interval(Duration::from_secs(
            self.config.persistence.compaction_interval_secs,
        ));

        loop {
            tokio::select! {
                _ = metrics_interval.tick() => {
                    self.update_metrics();
                }
                _ = compaction_interval.tick() => {
                    match self.store.compact() {
                        Ok(0) => {}
                        Ok(removed) => debug!("Compacted {} journal entries", removed),
                        Err(e) => error!("Journal compaction failed: {}", e),
                    }
                }
                _ = self.shutdown.cancelled() => {
                    break;
                }
            }
        }
    }

    fn update_metrics(&self) {
        for (queue, depth) in self.store.depths() {
            self.metrics.update_queue_depth(&queue, depth);
        }
    }

    /// Get metrics registry
    pub fn metrics(&self) -> Arc<BrokerMetrics> {
        self.update_metrics();
        self.metrics.clone()
    }

    pub fn store(&self) -> Arc<MessageStore> {
        self.store.clone()
    }

    /// Shutdown the broker
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
