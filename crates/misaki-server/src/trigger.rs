use axum::http::{Method, StatusCode};
use misaki_client::QueueService;
use misaki_core::Job;
use std::sync::Arc;
use tracing::{error, info, warn};

/// The parts of an HTTP request the producer looks at
#[derive(Debug, Clone)]
pub struct TriggerRequest {
    pub method: Method,
    pub host: Option<String>,
    pub origin: Option<String>,
    pub command_name: Option<String>,
}

/// Turns trigger requests into queued jobs. Never runs anything itself.
pub struct TriggerProducer {
    queue: Arc<dyn QueueService>,
}

impl TriggerProducer {
    pub fn new(queue: Arc<dyn QueueService>) -> Self {
        TriggerProducer { queue }
    }

    pub async fn handle(&self, request: TriggerRequest) -> (StatusCode, String) {
        if request.method != Method::POST {
            return (StatusCode::BAD_REQUEST, String::new());
        }

        if !origin_matches(request.host.as_deref(), request.origin.as_deref()) {
            warn!(
                "Rejected cross-origin trigger from {:?} (host {:?})",
                request.origin, request.host
            );
            return (StatusCode::FORBIDDEN, String::new());
        }

        let command_name = match request.command_name {
            Some(name) if !name.is_empty() => name,
            _ => return (StatusCode::BAD_REQUEST, "missing command name".to_string()),
        };

        info!("command: {}", command_name);

        let payload = match Job::new(command_name).to_json() {
            Ok(payload) => payload,
            Err(e) => return internal_error(e),
        };

        match self.queue.enqueue(&payload).await {
            Ok(()) => (StatusCode::OK, "OK".to_string()),
            Err(e) => internal_error(e),
        }
    }
}

fn internal_error(e: impl std::fmt::Display) -> (StatusCode, String) {
    error!("Failed to enqueue job: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("internal server error: {}", e),
    )
}

/// A missing `Origin` is accepted; a present one must be this host over
/// http or https
pub fn origin_matches(host: Option<&str>, origin: Option<&str>) -> bool {
    let Some(origin) = origin else {
        return true;
    };
    let host = host.unwrap_or_default();
    origin == format!("http://{}", host) || origin == format!("https://{}", host)
}
