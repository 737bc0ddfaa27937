//! HTTP request handlers.

use std::convert::Infallible;

use axum::Json;
use axum::body::Body;
use axum::extract::{Multipart, Path, State};
use axum::http::header;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::StreamExt;
use serde::Serialize;
use serde_json::{Value, json};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::instrument;

use weft_protocol::items::{Attachment, generate_attachment_id};

use crate::config::StoreMode;
use crate::convert::ToolOutputStyle;
use crate::server::ProcessResult;

use super::error::{ApiError, ApiResult};
use super::state::AppState;

/// The chat endpoint: one raw request in, SSE event stream or JSON out.
#[instrument(skip(state, body))]
pub async fn chat(State(state): State<AppState>, body: Bytes) -> ApiResult<Response> {
    match state.server.clone().process(&body).await? {
        ProcessResult::Json(value) => Ok(Json(value).into_response()),
        ProcessResult::Stream(stream) => {
            let sse_stream = stream.map(|event| {
                let data = match event {
                    Ok(event) => serde_json::to_string(&event).unwrap_or_else(|err| {
                        error_frame("serialization_error", &err.to_string())
                    }),
                    Err(err) => error_frame(err.code(), &err.to_string()),
                };
                Ok::<_, Infallible>(Event::default().data(data))
            });
            Ok(Sse::new(sse_stream)
                .keep_alive(KeepAlive::default())
                .into_response())
        }
    }
}

fn error_frame(code: &str, message: &str) -> String {
    json!({"type": "error", "code": code, "message": message}).to_string()
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub store: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sqlite_path: Option<String>,
    pub model: String,
    pub tool_output_mode: &'static str,
    pub upload_dir: String,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let config = &state.config;
    Json(HealthResponse {
        status: "ok",
        store: config.store.to_string(),
        sqlite_path: (config.store == StoreMode::Sqlite)
            .then(|| config.sqlite_path().display().to_string()),
        model: config.model.clone(),
        tool_output_mode: match config.tool_output_style() {
            ToolOutputStyle::Function => "function",
            ToolOutputStyle::Text => "text",
        },
        upload_dir: config.upload_dir().display().to_string(),
    })
}

/// Direct multipart upload: bytes and metadata arrive together.
#[instrument(skip(state, multipart))]
pub async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<Attachment>> {
    let max_size = state.config.max_upload_size();

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::BadRequest(err.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let Some(filename) = field.file_name().map(str::to_string) else {
            return Err(ApiError::BadRequest("missing filename".to_string()));
        };
        let mime_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();

        let attachment_id = generate_attachment_id(&mime_type);
        let path = state.attachments.blob_path(&attachment_id, &filename);

        let mut file = tokio::fs::File::create(&path).await?;
        let mut total = 0usize;
        loop {
            let chunk = field
                .chunk()
                .await
                .map_err(|err| ApiError::BadRequest(err.to_string()))?;
            let Some(chunk) = chunk else { break };
            total += chunk.len();
            if total > max_size {
                drop(file);
                let _ = tokio::fs::remove_file(&path).await;
                return Err(ApiError::PayloadTooLarge { limit: max_size });
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        drop(file);

        if total == 0 {
            let _ = tokio::fs::remove_file(&path).await;
            return Err(ApiError::BadRequest("empty upload".to_string()));
        }

        let attachment = state
            .attachments
            .finish_direct_upload(&attachment_id, &filename, &mime_type, &path)
            .await?;
        return Ok(Json(attachment));
    }

    Err(ApiError::BadRequest("missing file field".to_string()))
}

/// Handshake upload: raw bytes for an attachment record created earlier
/// via `attachments.create`.
#[instrument(skip(state, body))]
pub async fn upload_file_by_id(
    State(state): State<AppState>,
    Path(attachment_id): Path<String>,
    body: Body,
) -> ApiResult<Json<Value>> {
    let attachment = state.store.load_attachment(&attachment_id).await?;
    let max_size = state.config.max_upload_size();
    let path = state.attachments.blob_path(&attachment_id, &attachment.name);

    let mut file = tokio::fs::File::create(&path).await?;
    let mut total = 0usize;
    let mut stream = body.into_data_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|err| ApiError::BadRequest(err.to_string()))?;
        total += chunk.len();
        if total > max_size {
            drop(file);
            let _ = tokio::fs::remove_file(&path).await;
            return Err(ApiError::PayloadTooLarge { limit: max_size });
        }
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    drop(file);

    if total == 0 {
        let _ = tokio::fs::remove_file(&path).await;
        return Err(ApiError::BadRequest("empty upload".to_string()));
    }

    state
        .attachments
        .finish_handshake_upload(&attachment_id, &path)
        .await?;
    Ok(Json(json!({"ok": true})))
}

/// Serve an attachment's blob with its stored MIME type and name.
#[instrument(skip(state))]
pub async fn get_file(
    State(state): State<AppState>,
    Path(attachment_id): Path<String>,
) -> ApiResult<Response> {
    let attachment = state.store.load_attachment(&attachment_id).await?;
    let path = state
        .store
        .get_attachment_file(&attachment_id)
        .await?
        .filter(|path| path.exists())
        .ok_or_else(|| ApiError::NotFound(format!("attachment file missing: {attachment_id}")))?;

    let file = tokio::fs::File::open(&path).await?;
    let body = Body::from_stream(ReaderStream::new(file));
    Response::builder()
        .header(header::CONTENT_TYPE, attachment.mime_type.as_str())
        .header(
            header::CONTENT_DISPOSITION,
            format!("inline; filename=\"{}\"", attachment.name),
        )
        .body(body)
        .map_err(|err| ApiError::internal(err.to_string()))
}
