use misaki_client::{QueueConfig, QueueError};
use misaki_core::{Command, CommandRegistry, CoreError};
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
}

/// Trigger server configuration; shares its file with the executor
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub queue: QueueConfig,
    pub server: ListenConfig,
    pub commands: Vec<Command>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenConfig {
    pub listen: String,
}

impl Default for ListenConfig {
    fn default() -> Self {
        ListenConfig {
            listen: "0.0.0.0:8080".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&contents)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.queue.validate()?;
        for command in &self.commands {
            command.validate()?;
        }
        Ok(())
    }

    pub fn registry(&self) -> Result<CommandRegistry, ConfigError> {
        Ok(CommandRegistry::new(self.commands.clone())?)
    }
}
