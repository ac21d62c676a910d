use crate::Result;
use serde::{Deserialize, Serialize};

/// Request to run one named command; the sole payload of a queue message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub command_name: String,
}

impl Job {
    pub fn new(command_name: impl Into<String>) -> Self {
        Job {
            command_name: command_name.into(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Chat event forwarded to the queue by a chat integration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub text: String,
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub channel_name: String,
    /// Message timestamp, used as the thread to reply into
    #[serde(default)]
    pub timestamp: String,
}

impl ChatMessage {
    /// The command addressed by this message, if it starts with `prefix`
    pub fn command_name<'a>(&'a self, prefix: &str) -> Option<&'a str> {
        self.text.strip_prefix(prefix).filter(|name| !name.is_empty())
    }

    /// `channel` of `None` accepts every channel
    pub fn is_in_channel(&self, channel: Option<&str>) -> bool {
        match channel {
            Some(channel) if !channel.is_empty() => self.channel_name == channel,
            _ => true,
        }
    }
}

/// Anything the dispatch loop knows how to decode from a queue body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Envelope {
    Job(Job),
    Chat(ChatMessage),
}

impl Envelope {
    pub fn decode(body: &str) -> Result<Self> {
        Ok(serde_json::from_str(body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_wire_format() {
        let job = Job::new("deploy");
        assert_eq!(job.to_json().unwrap(), r#"{"command_name":"deploy"}"#);
    }

    #[test]
    fn test_decode_job() {
        let envelope = Envelope::decode(r#"{"command_name":"deploy"}"#).unwrap();
        assert_eq!(envelope, Envelope::Job(Job::new("deploy")));
    }

    #[test]
    fn test_decode_chat_message() {
        let body = r#"{"text":"misaki deploy","channel_id":"C1","channel_name":"ops","timestamp":"1700000000.0001"}"#;
        match Envelope::decode(body).unwrap() {
            Envelope::Chat(msg) => {
                assert_eq!(msg.command_name("misaki "), Some("deploy"));
                assert!(msg.is_in_channel(Some("ops")));
                assert!(!msg.is_in_channel(Some("general")));
                assert!(msg.is_in_channel(None));
            }
            other => panic!("Expected chat envelope, got {:?}", other),
        }
    }

    #[test]
    fn test_chat_without_prefix_is_ignored() {
        let msg = ChatMessage {
            text: "hello there".to_string(),
            channel_id: String::new(),
            channel_name: String::new(),
            timestamp: String::new(),
        };
        assert_eq!(msg.command_name("misaki "), None);
        assert_eq!(
            ChatMessage { text: "misaki ".to_string(), ..msg }.command_name("misaki "),
            None
        );
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(Envelope::decode("not json").is_err());
        assert!(Envelope::decode(r#"{"unrelated": 1}"#).is_err());
    }
}
