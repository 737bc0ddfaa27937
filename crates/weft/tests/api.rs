//! Router-level integration tests against the in-memory store.

use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use futures::StreamExt;
use serde_json::{Value, json};
use tower::util::ServiceExt;

use weft::agent::{
    AgentDefinition, AgentError, AgentEventStream, AgentInput, AgentRunner, RunOptions,
};
use weft::api::{AppState, create_router};
use weft::attachments::AttachmentService;
use weft::config::{StoreMode, WeftConfig};
use weft::server::ChatServer;
use weft::store::{MemoryStore, ThreadStore};

/// Runner that answers every turn with an empty event stream.
struct IdleRunner;

#[async_trait]
impl AgentRunner for IdleRunner {
    async fn run(
        &self,
        _agent: AgentDefinition,
        _input: Vec<AgentInput>,
        _options: RunOptions,
    ) -> Result<AgentEventStream, AgentError> {
        Ok(futures::stream::empty().boxed())
    }
}

struct TestApp {
    router: Router,
    store: Arc<MemoryStore>,
    _upload_dir: tempfile::TempDir,
}

fn test_app() -> TestApp {
    let upload_dir = tempfile::tempdir().unwrap();
    let config = WeftConfig {
        store: StoreMode::Memory,
        upload_dir: Some(upload_dir.path().to_path_buf()),
        public_base_url: Some("http://localhost:8787".to_string()),
        ..Default::default()
    };

    let store = Arc::new(MemoryStore::new());
    let attachments = Arc::new(AttachmentService::new(
        store.clone() as Arc<dyn ThreadStore>,
        upload_dir.path().to_path_buf(),
        config.public_base_url(),
    ));
    let server = Arc::new(ChatServer::new(
        store.clone() as Arc<dyn ThreadStore>,
        Arc::new(IdleRunner),
        attachments.clone(),
        config.model.clone(),
        config.instructions.clone(),
        config.tool_output_style(),
    ));
    let state = AppState {
        server,
        store: store.clone() as Arc<dyn ThreadStore>,
        attachments,
        config: Arc::new(config),
    };

    TestApp {
        router: create_router(state),
        store,
        _upload_dir: upload_dir,
    }
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn chat_request(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/chat")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

#[tokio::test]
async fn health_reports_resolved_config() {
    let app = test_app();
    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["store"], "memory");
    assert_eq!(body["tool_output_mode"], "function");
}

#[tokio::test]
async fn handshake_upload_binds_bytes_and_clears_upload_url() {
    let app = test_app();

    // Phase one: create the metadata record over the chat endpoint.
    let response = app
        .router
        .clone()
        .oneshot(chat_request(json!({
            "op": "attachments.create",
            "params": {"name": "notes.txt", "mime_type": "text/plain"},
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let attachment = body_json(response).await;
    let id = attachment["id"].as_str().unwrap().to_string();
    assert!(id.starts_with("file_"));
    assert_eq!(
        attachment["upload_url"].as_str().unwrap(),
        format!("http://localhost:8787/files/{id}")
    );

    // Phase two: PUT the bytes.
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri(format!("/files/{id}"))
                .body(Body::from("hello weft"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({"ok": true}));

    let bound = app.store.load_attachment(&id).await.unwrap();
    assert!(bound.upload_url.is_none());

    // Download round-trip.
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/files/{id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/plain"
    );
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"hello weft");
}

#[tokio::test]
async fn empty_handshake_upload_is_rejected() {
    let app = test_app();
    let response = app
        .router
        .clone()
        .oneshot(chat_request(json!({
            "op": "attachments.create",
            "params": {"name": "empty.txt", "mime_type": "text/plain"},
        })))
        .await
        .unwrap();
    let id = body_json(response).await["id"].as_str().unwrap().to_string();

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri(format!("/files/{id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn upload_for_unknown_attachment_is_404() {
    let app = test_app();
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/files/file_nope")
                .body(Body::from("data"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let body = body_json(response).await;
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn missing_file_download_is_404() {
    let app = test_app();
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/files/file_ghost")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn items_list_answers_json() {
    let app = test_app();
    let response = app
        .router
        .clone()
        .oneshot(chat_request(json!({
            "op": "items.list",
            "params": {"thread_id": "t-fresh", "limit": 10, "order": "asc"},
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let page = body_json(response).await;
    assert_eq!(page["data"], json!([]));
    assert_eq!(page["has_more"], false);
}

#[tokio::test]
async fn malformed_chat_body_is_400() {
    let app = test_app();
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/chat")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{\"op\": \"threads.unknown\"}"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn user_turn_streams_sse_events() {
    let app = test_app();
    let response = app
        .router
        .clone()
        .oneshot(chat_request(json!({
            "op": "threads.create",
            "params": {"input": {"content": [{"type": "text", "text": "hi"}]}},
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream")
    );

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("thread.created"));
    assert!(text.contains("thread.item.added"));
}
