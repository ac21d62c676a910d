use crate::{QueueError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// `host:port` of the broker
    pub broker_address: String,
    /// Queue name, shared by the server and the executor
    pub name: String,
    /// Long-poll duration of one receive
    pub wait_time_secs: u64,
    /// Broker default applies when unset
    pub visibility_timeout_secs: Option<u32>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig {
            broker_address: "127.0.0.1:7878".to_string(),
            name: "misaki".to_string(),
            wait_time_secs: 20,
            visibility_timeout_secs: None,
        }
    }
}

impl QueueConfig {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(QueueError::InvalidConfig("empty queue name".to_string()));
        }
        if self.broker_address.trim().is_empty() {
            return Err(QueueError::InvalidConfig("empty broker address".to_string()));
        }
        // A zero wait turns the dispatch loop into a busy poll
        if self.wait_time_secs == 0 {
            return Err(QueueError::InvalidConfig(
                "wait_time_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn wait_time(&self) -> Duration {
        Duration::from_secs(self.wait_time_secs)
    }
}
