use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum NotifierError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to encode notification: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Webhook rejected notification with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// One message for the notification channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_ts: Option<String>,
}

impl Notification {
    pub fn new(text: impl Into<String>) -> Self {
        Notification {
            text: text.into(),
            channel: None,
            thread_ts: None,
        }
    }

    /// Reply in the thread of the chat message that triggered the run
    pub fn in_thread(mut self, channel: impl Into<String>, thread_ts: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self.thread_ts = Some(thread_ts.into());
        self
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn post(&self, notification: &Notification) -> Result<(), NotifierError>;
}

/// Slack-style incoming webhook: the JSON goes in the `payload` form field
pub struct SlackNotifier {
    client: reqwest::Client,
    webhook_url: String,
}

impl SlackNotifier {
    pub fn new(webhook_url: impl Into<String>) -> Result<Self, NotifierError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(SlackNotifier {
            client,
            webhook_url: webhook_url.into(),
        })
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn post(&self, notification: &Notification) -> Result<(), NotifierError> {
        let payload = serde_json::to_string(notification)?;

        let response = self
            .client
            .post(&self.webhook_url)
            .form(&[("payload", payload.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifierError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        debug!("Posted notification ({} bytes)", payload.len());
        Ok(())
    }
}
