use crate::queue::QueueSettings;
use misaki_persistence::JournalConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub broker: NetworkConfig,
    pub persistence: PersistenceConfig,
    pub queue: QueueConfig,
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Keep messages in memory only
    pub in_memory: bool,
    pub data_dir: PathBuf,
    pub sync_writes: bool,
    pub compaction_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub visibility_timeout_secs: u64,
    pub dedup_window_secs: u64,
    pub max_wait_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub prometheus_port: u16,
    pub log_level: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            host: "0.0.0.0".to_string(),
            port: 7878,
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        PersistenceConfig {
            in_memory: false,
            data_dir: PathBuf::from("./data"),
            sync_writes: true,
            compaction_interval_secs: 60,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig {
            visibility_timeout_secs: 30,
            dedup_window_secs: 300,
            max_wait_secs: 20,
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        MonitoringConfig {
            prometheus_port: 9091,
            log_level: "info".to_string(),
        }
    }
}

impl BrokerConfig {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: BrokerConfig = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.queue.visibility_timeout_secs == 0 {
            anyhow::bail!("queue.visibility_timeout_secs must be positive");
        }
        if self.queue.max_wait_secs == 0 {
            anyhow::bail!("queue.max_wait_secs must be positive");
        }
        if self.persistence.compaction_interval_secs == 0 {
            anyhow::bail!("persistence.compaction_interval_secs must be positive");
        }
        Ok(())
    }

    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.broker.host, self.broker.port)
    }

    pub fn queue_settings(&self) -> QueueSettings {
        QueueSettings {
            visibility_timeout: Duration::from_secs(self.queue.visibility_timeout_secs),
            dedup_window: Duration::from_secs(self.queue.dedup_window_secs),
            max_wait: Duration::from_secs(self.queue.max_wait_secs),
        }
    }

    pub fn journal_config(&self) -> JournalConfig {
        JournalConfig {
            data_dir: self.persistence.data_dir.clone(),
            sync_writes: self.persistence.sync_writes,
        }
    }
}
