use crate::dispatch::ChatFilter;
use misaki_client::{QueueConfig, QueueError};
use misaki_core::{
    BackoffMediator, Command, CommandRegistry, CoreError, DEFAULT_INITIAL_BACKOFF_SECS,
    DEFAULT_MAXIMUM_BACKOFF_SECS,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Command(#[from] CoreError),

    #[error("notifier.webhook_url must be set")]
    MissingWebhook,
}

/// Executor configuration. Sections it does not know (`server`) are ignored,
/// so the server and executor can share one file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub queue: QueueConfig,
    pub notifier: NotifierConfig,
    pub backoff: BackoffConfig,
    pub commands: Vec<Command>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    pub webhook_url: String,
    /// Chat messages must start with this to trigger a command
    pub chat_prefix: String,
    /// Only react to chat messages in this channel
    pub channel: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub initial_secs: u64,
    pub maximum_secs: u64,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        NotifierConfig {
            webhook_url: String::new(),
            chat_prefix: ChatFilter::default().prefix,
            channel: None,
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        BackoffConfig {
            initial_secs: DEFAULT_INITIAL_BACKOFF_SECS,
            maximum_secs: DEFAULT_MAXIMUM_BACKOFF_SECS,
        }
    }
}

impl ExecutorConfig {
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Startup checks; any error here is fatal
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.queue.validate()?;
        if self.notifier.webhook_url.trim().is_empty() {
            return Err(ConfigError::MissingWebhook);
        }
        self.backoff()?;
        for command in &self.commands {
            command.validate()?;
        }
        Ok(())
    }

    pub fn registry(&self) -> Result<CommandRegistry, ConfigError> {
        Ok(CommandRegistry::new(self.commands.clone())?)
    }

    pub fn backoff(&self) -> Result<BackoffMediator, ConfigError> {
        Ok(BackoffMediator::from_secs(
            self.backoff.initial_secs,
            self.backoff.maximum_secs,
        )?)
    }

    pub fn chat_filter(&self) -> ChatFilter {
        ChatFilter {
            prefix: self.notifier.chat_prefix.clone(),
            channel: self
                .notifier
                .channel
                .clone()
                .filter(|channel| !channel.is_empty()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const SHARED_CONFIG: &str = r#"
queue:
  broker_address: "10.0.0.5:7878"
  name: deploys
notifier:
  webhook_url: "https://hooks.example.com/T000"
  channel: ops
server:
  listen: "0.0.0.0:8080"
commands:
  - name: deploy
    memo: deploy site
    programs: [[git, pull], [make, deploy]]
    output: true
  - name: ping
    programs: [[echo, hi]]
"#;

    #[test]
    fn test_parse_shared_file() {
        let config = ExecutorConfig::from_yaml(SHARED_CONFIG).unwrap();
        config.validate().unwrap();

        assert_eq!(config.queue.name, "deploys");
        assert_eq!(config.queue.wait_time_secs, 20);
        assert_eq!(config.commands.len(), 2);
        assert!(config.commands[0].capture_output);
        assert!(!config.commands[1].capture_output);

        let filter = config.chat_filter();
        assert_eq!(filter.prefix, "misaki ");
        assert_eq!(filter.channel.as_deref(), Some("ops"));

        let backoff = config.backoff().unwrap();
        assert_eq!(backoff.initial(), Duration::from_secs(1));
        assert_eq!(backoff.maximum(), Duration::from_secs(300));
    }

    #[test]
    fn test_missing_webhook_is_fatal() {
        let config = ExecutorConfig::default();
        assert!(matches!(config.validate(), Err(ConfigError::MissingWebhook)));
    }

    #[test]
    fn test_empty_step_is_fatal() {
        let yaml = r#"
notifier: { webhook_url: "http://localhost/hook" }
commands:
  - { name: broken, programs: [[]] }
"#;
        let config = ExecutorConfig::from_yaml(yaml).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Command(CoreError::EmptyStep { .. }))
        ));
    }

    #[test]
    fn test_invalid_backoff_is_fatal() {
        let mut config = ExecutorConfig::default();
        config.notifier.webhook_url = "http://localhost/hook".to_string();
        config.backoff.initial_secs = 600;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Command(CoreError::InvalidBackoff { .. }))
        ));
    }
}
