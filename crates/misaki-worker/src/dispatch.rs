//! The consumer side of the pipeline.
//!
//! Each iteration receives at most one message, deletes it *before* running
//! anything, then decodes, executes and reports. A command that crashes the
//! executor mid-run is therefore never retried: delivery is at most once
//! after the delete succeeds. Receive failures back off exponentially; empty
//! receives do not touch the backoff.

use crate::executor::CommandExecutor;
use crate::notifier::{Notification, Notifier};
use misaki_client::{QueueService, QueuedMessage};
use misaki_core::{BackoffMediator, Envelope, ExecutionResult};

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How chat envelopes are matched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatFilter {
    /// Text that must start a message addressed to us
    pub prefix: String,
    /// Only react in this channel when set
    pub channel: Option<String>,
}

impl Default for ChatFilter {
    fn default() -> Self {
        ChatFilter {
            prefix: "misaki ".to_string(),
            channel: None,
        }
    }
}

/// What one pass of the loop did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Iteration {
    /// A command ran; its result was handed to the notifier
    Executed(ExecutionResult),
    /// A message was consumed but named nothing to run
    Skipped,
    /// The long poll came back empty
    Empty,
    /// Receive failed; the loop waited and increased its backoff
    ReceiveFailed,
    /// Shutdown was requested
    Cancelled,
}

pub struct DispatchLoop {
    queue: Arc<dyn QueueService>,
    executor: CommandExecutor,
    notifier: Arc<dyn Notifier>,
    backoff: BackoffMediator,
    wait_time: Duration,
    chat: ChatFilter,
    shutdown: CancellationToken,
}

impl DispatchLoop {
    pub fn new(
        queue: Arc<dyn QueueService>,
        executor: CommandExecutor,
        notifier: Arc<dyn Notifier>,
        backoff: BackoffMediator,
    ) -> Self {
        DispatchLoop {
            queue,
            executor,
            notifier,
            backoff,
            wait_time: Duration::from_secs(20),
            chat: ChatFilter::default(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Long-poll duration of each receive
    pub fn with_wait_time(mut self, wait_time: Duration) -> Self {
        self.wait_time = wait_time;
        self
    }

    pub fn with_chat_filter(mut self, chat: ChatFilter) -> Self {
        self.chat = chat;
        self
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn backoff(&self) -> &BackoffMediator {
        &self.backoff
    }

    /// Token that stops [`DispatchLoop::run`]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Process jobs one at a time until shutdown
    pub async fn run(mut self) {
        info!(
            "Dispatching from queue {} (wait {:?})",
            self.queue.queue_name(),
            self.wait_time
        );

        while !self.shutdown.is_cancelled() {
            if self.poll_once().await == Iteration::Cancelled {
                break;
            }
        }

        info!("Dispatch loop stopped");
    }

    /// One receive and, when a message arrives, one execution
    pub async fn poll_once(&mut self) -> Iteration {
        let received = tokio::select! {
            received = self.queue.receive_blocking(self.wait_time) => received,
            _ = self.shutdown.cancelled() => return Iteration::Cancelled,
        };

        match received {
            Ok(Some(message)) => self.handle(message).await,
            Ok(None) => {
                debug!("No messages on {}", self.queue.queue_name());
                Iteration::Empty
            }
            Err(e) => {
                error!(
                    "Receive from {} failed: {} (retrying in {:?})",
                    self.queue.queue_name(),
                    e,
                    self.backoff.current()
                );
                tokio::select! {
                    _ = self.backoff.wait() => {}
                    _ = self.shutdown.cancelled() => return Iteration::Cancelled,
                }
                self.backoff.increment();
                Iteration::ReceiveFailed
            }
        }
    }

    async fn handle(&mut self, message: QueuedMessage) -> Iteration {
        // Delete before execution: a job is never run twice once acknowledged
        if let Err(e) = self.queue.delete(&message.receipt_token).await {
            warn!("Failed to delete message {}: {}", message.receipt_token, e);
        }
        self.backoff.reset();

        let envelope = match Envelope::decode(&message.body) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!("Dropping malformed message from {}: {}", message.origin_queue, e);
                return Iteration::Skipped;
            }
        };

        let (command_name, notification) = match envelope {
            Envelope::Job(job) => (job.command_name, None),
            Envelope::Chat(chat) => {
                if !chat.is_in_channel(self.chat.channel.as_deref()) {
                    debug!("Ignoring chat message in #{}", chat.channel_name);
                    return Iteration::Skipped;
                }
                let Some(name) = chat.command_name(&self.chat.prefix) else {
                    return Iteration::Skipped;
                };
                (
                    name.to_string(),
                    Some((chat.channel_id.clone(), chat.timestamp.clone())),
                )
            }
        };

        info!("command: {}", command_name);
        let result = self.executor.run(&command_name).await;

        let text = result.to_string();
        let notification = match notification {
            Some((channel, thread_ts)) => Notification::new(text).in_thread(channel, thread_ts),
            None => Notification::new(text),
        };

        if let Err(e) = self.notifier.post(&notification).await {
            error!("Failed to post result of {}: {}", command_name, e);
        }

        Iteration::Executed(result)
    }
}
