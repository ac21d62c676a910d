//! HTTP trigger server for misaki: accepts command requests and queues
//! them for the executor.

pub mod api;
pub mod config;
pub mod trigger;

pub use api::{create_router, AppState};
pub use config::{ConfigError, ServerConfig};
pub use trigger::{origin_matches, TriggerProducer, TriggerRequest};
