use crate::{metrics::BrokerMetrics, BrokerError, Result};
use misaki_persistence::{Journal, JournalEntry, StoredMessage};
use misaki_protocol::{fresh_label, DeliveredMessage, MAX_BODY_SIZE};

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tokio::time::Instant;
use uuid::Uuid;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Longest a long poll sleeps before re-checking for expired receipts
const POLL_RECHECK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSettings {
    /// How long a received message stays hidden before redelivery
    pub visibility_timeout: Duration,
    /// How long a dedup id suppresses repeats
    pub dedup_window: Duration,
    /// Upper bound on a single long poll
    pub max_wait: Duration,
}

impl Default for QueueSettings {
    fn default() -> Self {
        QueueSettings {
            visibility_timeout: Duration::from_secs(30),
            dedup_window: Duration::from_secs(300),
            max_wait: Duration::from_secs(20),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Stored(Uuid),
    /// Dedup id seen inside the window; nothing stored
    Duplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// Receipt unknown, expired and re-issued, or already used
    Stale,
}

/// Visible and in-flight counts for one queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueDepth {
    pub visible: usize,
    pub in_flight: usize,
}

#[derive(Debug)]
struct Lease {
    receipt: String,
    visible_at: Instant,
}

#[derive(Debug)]
struct Entry {
    message: StoredMessage,
    receive_count: u32,
    lease: Option<Lease>,
}

impl Entry {
    fn is_hidden(&self, now: Instant) -> bool {
        matches!(&self.lease, Some(lease) if lease.visible_at > now)
    }
}

#[derive(Default)]
struct QueueState {
    entries: VecDeque<Entry>,
    dedup: HashMap<String, Instant>,
}

impl QueueState {
    fn prune_dedup(&mut self, now: Instant, window: Duration) {
        self.dedup
            .retain(|_, seen| now.saturating_duration_since(*seen) < window);
    }

    /// Lease the oldest visible message whose group has nothing in flight
    fn lease_next(&mut self, now: Instant, visibility: Duration) -> Option<(DeliveredMessage, bool)> {
        let busy_groups: HashSet<&str> = self
            .entries
            .iter()
            .filter(|entry| entry.is_hidden(now))
            .map(|entry| entry.message.group_id.as_str())
            .collect();

        let position = self.entries.iter().position(|entry| {
            !entry.is_hidden(now) && !busy_groups.contains(entry.message.group_id.as_str())
        })?;

        let entry = &mut self.entries[position];
        let redelivered = entry.lease.is_some();
        let receipt = fresh_label();

        entry.receive_count += 1;
        entry.lease = Some(Lease {
            receipt: receipt.clone(),
            visible_at: now + visibility,
        });

        Some((
            DeliveredMessage {
                message_id: entry.message.id,
                body: Some(entry.message.body.clone()),
                receipt: Some(receipt),
                receive_count: entry.receive_count,
            },
            redelivered,
        ))
    }

    /// Earliest instant at which a hidden message becomes visible again
    fn next_expiry(&self, now: Instant) -> Option<Instant> {
        self.entries
            .iter()
            .filter_map(|entry| entry.lease.as_ref())
            .map(|lease| lease.visible_at)
            .filter(|at| *at > now)
            .min()
    }

    fn depth(&self, now: Instant) -> QueueDepth {
        let in_flight = self.entries.iter().filter(|e| e.is_hidden(now)).count();
        QueueDepth {
            visible: self.entries.len() - in_flight,
            in_flight,
        }
    }
}

#[derive(Default)]
struct NamedQueue {
    state: Mutex<QueueState>,
    arrivals: Notify,
}

/// At-least-once message store with per-receive visibility timeouts.
///
/// Messages stay in the store until deleted with the receipt of their most
/// recent delivery. A message whose receipt expires becomes visible again and
/// is delivered with a higher receive count. Within one group only a single
/// message is in flight at a time.
pub struct MessageStore {
    queues: RwLock<HashMap<String, Arc<NamedQueue>>>,
    /// Woken whenever a queue is created
    created: Notify,
    journal: Option<Journal>,
    settings: QueueSettings,
    metrics: Arc<BrokerMetrics>,
}

impl MessageStore {
    /// Store that forgets everything on drop
    pub fn in_memory(settings: QueueSettings) -> Result<Self> {
        Ok(MessageStore {
            queues: RwLock::new(HashMap::new()),
            created: Notify::new(),
            journal: None,
            settings,
            metrics: Arc::new(BrokerMetrics::new()?),
        })
    }

    /// Store backed by `journal`; undeleted messages are restored as visible
    pub fn recover(
        settings: QueueSettings,
        journal: Journal,
        metrics: Arc<BrokerMetrics>,
    ) -> Result<Self> {
        let recovered = journal.recover()?;
        let removed = journal.compact()?;
        info!(
            "Recovered {} messages from journal ({} stale entries compacted)",
            recovered.len(),
            removed
        );

        let store = MessageStore {
            queues: RwLock::new(HashMap::new()),
            created: Notify::new(),
            journal: Some(journal),
            settings,
            metrics,
        };

        for message in recovered {
            let queue = store.queue_for_enqueue(&message.queue);
            queue.state.lock().entries.push_back(Entry {
                message,
                receive_count: 0,
                lease: None,
            });
        }

        Ok(store)
    }

    pub fn settings(&self) -> QueueSettings {
        self.settings
    }

    pub fn metrics(&self) -> Arc<BrokerMetrics> {
        self.metrics.clone()
    }

    fn existing_queue(&self, name: &str) -> Option<Arc<NamedQueue>> {
        self.queues.read().get(name).cloned()
    }

    /// Only enqueue creates queues, so receive and delete with arbitrary
    /// names cannot grow the map
    fn queue_for_enqueue(&self, name: &str) -> Arc<NamedQueue> {
        if let Some(queue) = self.existing_queue(name) {
            return queue;
        }
        let queue = self
            .queues
            .write()
            .entry(name.to_string())
            .or_default()
            .clone();
        self.created.notify_waiters();
        queue
    }

    /// Wait until `name` exists or `deadline` passes
    async fn wait_for_queue(&self, name: &str, deadline: Instant) -> Option<Arc<NamedQueue>> {
        loop {
            let created = self.created.notified();
            tokio::pin!(created);
            created.as_mut().enable();

            if let Some(queue) = self.existing_queue(name) {
                return Some(queue);
            }
            if Instant::now() >= deadline {
                return None;
            }

            tokio::select! {
                _ = &mut created => {}
                _ = tokio::time::sleep_until(deadline) => {}
            }
        }
    }

    pub fn enqueue(
        &self,
        queue_name: &str,
        body: &str,
        dedup_id: &str,
        group_id: &str,
    ) -> Result<EnqueueOutcome> {
        if body.len() > MAX_BODY_SIZE {
            return Err(BrokerError::BodyTooLarge(body.len()));
        }

        let queue = self.queue_for_enqueue(queue_name);
        let now = Instant::now();

        let id = {
            let mut state = queue.state.lock();
            state.prune_dedup(now, self.settings.dedup_window);

            if state.dedup.contains_key(dedup_id) {
                debug!("Duplicate enqueue on {} (dedup id {})", queue_name, dedup_id);
                self.metrics.inc_messages(queue_name, "duplicate");
                return Ok(EnqueueOutcome::Duplicate);
            }

            let message = StoredMessage {
                id: Uuid::new_v4(),
                queue: queue_name.to_string(),
                body: body.to_string(),
                group_id: group_id.to_string(),
                dedup_id: dedup_id.to_string(),
                enqueued_at: Utc::now(),
            };

            // Journal before the message becomes visible
            if let Some(journal) = &self.journal {
                journal.append(&JournalEntry::Stored {
                    message: message.clone(),
                })?;
            }

            let id = message.id;
            state.dedup.insert(dedup_id.to_string(), now);
            state.entries.push_back(Entry {
                message,
                receive_count: 0,
                lease: None,
            });
            id
        };

        self.metrics.inc_messages(queue_name, "enqueued");
        queue.arrivals.notify_waiters();
        debug!("Stored message {} on {}", id, queue_name);

        Ok(EnqueueOutcome::Stored(id))
    }

    /// Lease one message, waiting up to `wait` (capped by the configured
    /// maximum) for one to become available.
    pub async fn receive(
        &self,
        queue_name: &str,
        wait: Duration,
        visibility_timeout: Option<Duration>,
    ) -> Option<DeliveredMessage> {
        let visibility = visibility_timeout.unwrap_or(self.settings.visibility_timeout);
        let deadline = Instant::now() + wait.min(self.settings.max_wait);
        let queue = self.wait_for_queue(queue_name, deadline).await?;

        loop {
            // Register for wakeups before looking, so an enqueue that lands
            // between the check and the sleep is not missed
            let notified = queue.arrivals.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let now = Instant::now();
            let next_expiry = {
                let mut state = queue.state.lock();
                if let Some((delivered, redelivered)) = state.lease_next(now, visibility) {
                    drop(state);
                    self.metrics.inc_messages(queue_name, "received");
                    if redelivered {
                        warn!(
                            "Redelivering message {} on {} (receive count {})",
                            delivered.message_id, queue_name, delivered.receive_count
                        );
                        self.metrics.inc_messages(queue_name, "redelivered");
                    }
                    return Some(delivered);
                }
                state.next_expiry(now)
            };

            if now >= deadline {
                return None;
            }

            let wake_at = next_expiry
                .unwrap_or(deadline)
                .min(deadline)
                .min(now + POLL_RECHECK);

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    /// Remove the message leased under `receipt`
    pub fn delete(&self, queue_name: &str, receipt: &str) -> Result<DeleteOutcome> {
        let Some(queue) = self.existing_queue(queue_name) else {
            debug!("Delete on unknown queue {}: {}", queue_name, receipt);
            return Ok(DeleteOutcome::Stale);
        };

        let removed = {
            let mut state = queue.state.lock();
            let position = state.entries.iter().position(|entry| {
                matches!(&entry.lease, Some(lease) if lease.receipt == receipt)
            });

            let Some(position) = position else {
                debug!("Stale receipt on {}: {}", queue_name, receipt);
                return Ok(DeleteOutcome::Stale);
            };

            if let Some(journal) = &self.journal {
                let id = state.entries[position].message.id;
                journal.append(&JournalEntry::Deleted {
                    queue: queue_name.to_string(),
                    id,
                    timestamp: Utc::now(),
                })?;
            }

            state.entries.remove(position)
        };

        if let Some(entry) = removed {
            debug!("Deleted message {} from {}", entry.message.id, queue_name);
        }
        self.metrics.inc_messages(queue_name, "deleted");

        Ok(DeleteOutcome::Deleted)
    }

    pub fn depth(&self, queue_name: &str) -> QueueDepth {
        self.queues
            .read()
            .get(queue_name)
            .map(|queue| queue.state.lock().depth(Instant::now()))
            .unwrap_or_default()
    }

    /// Depth of every queue seen so far, sorted by name
    pub fn depths(&self) -> Vec<(String, QueueDepth)> {
        let now = Instant::now();
        let mut depths: Vec<(String, QueueDepth)> = self
            .queues
            .read()
            .iter()
            .map(|(name, queue)| (name.clone(), queue.state.lock().depth(now)))
            .collect();
        depths.sort_by(|a, b| a.0.cmp(&b.0));
        depths
    }

    /// Rewrite the journal without deleted messages
    pub fn compact(&self) -> Result<usize> {
        match &self.journal {
            Some(journal) => Ok(journal.compact()?),
            None => Ok(0),
        }
    }

    pub fn flush(&self) -> Result<()> {
        if let Some(journal) = &self.journal {
            journal.flush()?;
        }
        Ok(())
    }
}
