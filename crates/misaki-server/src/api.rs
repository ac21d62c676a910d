//! HTTP surface of the trigger server.

use crate::trigger::{TriggerProducer, TriggerRequest};
use axum::{
    extract::{FromRequest, Multipart, Path, Request, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::{Html, IntoResponse},
    routing::{any, get},
    Form, Json, Router,
};
use misaki_core::CommandRegistry;
use serde::Deserialize;
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub producer: Arc<TriggerProducer>,
    pub registry: Arc<CommandRegistry>,
}

#[derive(Debug, Deserialize)]
pub struct CommandForm {
    #[serde(default)]
    command: Option<String>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/app.js", get(app_js))
        .route("/app.css", get(app_css))
        .route("/commands", get(list_commands))
        .route("/request", any(request_by_form))
        .route("/request/", any(request_empty_path))
        .route("/request/*name", any(request_by_path))
        .route("/health", get(health_check))
        .with_state(state)
}

fn header_value(headers: &HeaderMap, name: header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn trigger_request(method: Method, headers: &HeaderMap, command_name: Option<String>) -> TriggerRequest {
    TriggerRequest {
        method,
        host: header_value(headers, header::HOST),
        origin: header_value(headers, header::ORIGIN),
        command_name,
    }
}

fn is_multipart(headers: &HeaderMap) -> bool {
    header_value(headers, header::CONTENT_TYPE)
        .is_some_and(|content_type| content_type.starts_with("multipart/form-data"))
}

/// The `command` field of a urlencoded or multipart form body
async fn form_command(request: Request) -> Option<String> {
    if !is_multipart(request.headers()) {
        let Form(form) = Form::<CommandForm>::from_request(request, &()).await.ok()?;
        return form.command;
    }

    let mut multipart = Multipart::from_request(request, &()).await.ok()?;
    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() == Some("command") {
            return field.text().await.ok();
        }
    }
    None
}

async fn request_by_form(State(state): State<AppState>, request: Request) -> impl IntoResponse {
    let method = request.method().clone();
    let headers = request.headers().clone();
    let command_name = form_command(request).await;
    state
        .producer
        .handle(trigger_request(method, &headers, command_name))
        .await
}

async fn request_empty_path(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
) -> impl IntoResponse {
    state
        .producer
        .handle(trigger_request(method, &headers, Some(String::new())))
        .await
}

async fn request_by_path(
    State(state): State<AppState>,
    Path(name): Path<String>,
    method: Method,
    headers: HeaderMap,
) -> impl IntoResponse {
    state
        .producer
        .handle(trigger_request(method, &headers, Some(name)))
        .await
}

async fn list_commands(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.registry.commands().to_vec())
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "healthy" }))
}

async fn index() -> impl IntoResponse {
    Html(include_str!("../assets/app.html"))
}

async fn app_js() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/javascript; charset=utf-8")],
        include_str!("../assets/app.js"),
    )
}

async fn app_css() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/css; charset=utf-8")],
        include_str!("../assets/app.css"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use misaki_broker::LocalQueue;
    use misaki_client::QueueService;
    use misaki_core::Command;
    use std::time::Duration;
    use tower::ServiceExt;

    fn app() -> (Router, LocalQueue) {
        let queue = LocalQueue::in_memory("misaki").unwrap();
        let registry = CommandRegistry::new(vec![
            Command::new("deploy", vec![vec!["make".to_string(), "deploy".to_string()]])
                .with_memo("deploy site")
                .with_output(true),
        ])
        .unwrap();

        let state = AppState {
            producer: Arc::new(TriggerProducer::new(Arc::new(queue.clone()))),
            registry: Arc::new(registry),
        };
        (create_router(state), queue)
    }

    fn form_post(uri: &str, origin: Option<&str>, body: &str) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::HOST, "misaki.local")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
        if let Some(origin) = origin {
            builder = builder.header(header::ORIGIN, origin);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn next_body(queue: &LocalQueue) -> Option<String> {
        queue
            .receive_blocking(Duration::from_millis(10))
            .await
            .unwrap()
            .map(|msg| msg.body)
    }

    #[tokio::test]
    async fn test_form_request_enqueues() {
        let (app, queue) = app();

        let response = app
            .oneshot(form_post("/request", Some("http://misaki.local"), "command=deploy"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "OK");

        assert_eq!(next_body(&queue).await.as_deref(), Some(r#"{"command_name":"deploy"}"#));
    }

    #[tokio::test]
    async fn test_path_request_enqueues() {
        let (app, queue) = app();

        let response = app
            .oneshot(form_post("/request/deploy", Some("https://misaki.local"), ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(next_body(&queue).await.as_deref(), Some(r#"{"command_name":"deploy"}"#));
    }

    #[tokio::test]
    async fn test_multipart_form_request_enqueues() {
        let (app, queue) = app();

        let body = "--XBOUND\r\n\
                    Content-Disposition: form-data; name=\"command\"\r\n\
                    \r\n\
                    deploy\r\n\
                    --XBOUND--\r\n";
        let request = Request::builder()
            .method("POST")
            .uri("/request")
            .header(header::HOST, "misaki.local")
            .header(header::ORIGIN, "http://misaki.local")
            .header(header::CONTENT_TYPE, "multipart/form-data; boundary=XBOUND")
            .body(Body::from(body))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(next_body(&queue).await.as_deref(), Some(r#"{"command_name":"deploy"}"#));
    }

    #[tokio::test]
    async fn test_empty_path_name_is_bad_request() {
        let (app, queue) = app();

        let response = app
            .oneshot(form_post("/request/", None, ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_text(response).await, "missing command name");
        assert_eq!(next_body(&queue).await, None);
    }

    #[tokio::test]
    async fn test_path_name_may_contain_slashes() {
        let (app, queue) = app();

        let response = app
            .oneshot(form_post("/request/site/deploy", None, ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            next_body(&queue).await.as_deref(),
            Some(r#"{"command_name":"site/deploy"}"#)
        );
    }

    #[tokio::test]
    async fn test_foreign_origin_forbidden() {
        let (app, queue) = app();

        let response = app
            .oneshot(form_post("/request", Some("http://evil.example"), "command=deploy"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(next_body(&queue).await, None);
    }

    #[tokio::test]
    async fn test_missing_origin_accepted() {
        let (app, _) = app();

        let response = app
            .oneshot(form_post("/request", None, "command=deploy"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_get_request_is_bad_request() {
        let (app, queue) = app();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/request?command=deploy")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(next_body(&queue).await, None);
    }

    #[tokio::test]
    async fn test_missing_command_field() {
        let (app, _) = app();

        let response = app
            .oneshot(form_post("/request", None, "other=1"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_text(response).await, "missing command name");
    }

    #[tokio::test]
    async fn test_list_commands() {
        let (app, _) = app();

        let response = app
            .oneshot(Request::builder().uri("/commands").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let listing: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(
            listing,
            serde_json::json!([{
                "name": "deploy",
                "memo": "deploy site",
                "programs": [["make", "deploy"]],
                "output": true
            }])
        );
    }

    #[tokio::test]
    async fn test_assets_served() {
        let (app, _) = app();

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("/app.js"));

        let response = app
            .oneshot(Request::builder().uri("/app.css").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/css; charset=utf-8"
        );
    }
}
