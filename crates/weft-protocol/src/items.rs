//! Thread, item, and attachment data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::widgets::WidgetNode;

/// Metadata record for one conversation thread.
///
/// Threads are created lazily: loading an unknown id creates and persists a
/// fresh record. Deletion is always explicit and cascades to items.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadMetadata {
    pub id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metadata: Value,
}

impl ThreadMetadata {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            created_at: Utc::now(),
            title: None,
            metadata: Value::Null,
        }
    }
}

/// Sort direction for paginated listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub fn sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// One page of a forward-paginated listing.
///
/// `after` is the id of the last element, suitable for passing back as the
/// exclusive cursor of the next page; absent when the page is empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub has_more: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
}

/// One unit of conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ThreadItem {
    UserMessage(UserMessageItem),
    AssistantMessage(AssistantMessageItem),
    ClientToolCall(ClientToolCallItem),
    Widget(WidgetItem),
    System(SystemItem),
    Error(ErrorItem),
}

impl ThreadItem {
    pub fn id(&self) -> &str {
        match self {
            Self::UserMessage(item) => &item.id,
            Self::AssistantMessage(item) => &item.id,
            Self::ClientToolCall(item) => &item.id,
            Self::Widget(item) => &item.id,
            Self::System(item) => &item.id,
            Self::Error(item) => &item.id,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            Self::UserMessage(item) => item.created_at,
            Self::AssistantMessage(item) => item.created_at,
            Self::ClientToolCall(item) => item.created_at,
            Self::Widget(item) => item.created_at,
            Self::System(item) => item.created_at,
            Self::Error(item) => item.created_at,
        }
    }

    /// Stable discriminant used as the indexed `type` column.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::UserMessage(_) => "user_message",
            Self::AssistantMessage(_) => "assistant_message",
            Self::ClientToolCall(_) => "client_tool_call",
            Self::Widget(_) => "widget",
            Self::System(_) => "system",
            Self::Error(_) => "error",
        }
    }
}

/// A user turn: text and tag parts plus resolved attachment records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserMessageItem {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub content: Vec<UserContent>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub inference_options: InferenceOptions,
}

/// Content part of a user message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UserContent {
    Text { text: String },
    /// A structured reference embedded in the message (rendered for the
    /// model as `Tag <label>: <json>`).
    Tag { text: String, data: Value },
}

/// Per-request inference overrides carried on a user message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InferenceOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
}

/// A forced tool selection, by dotted capability name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolChoice {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantMessageItem {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub content: Vec<AssistantContent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssistantContent {
    Text { text: String },
}

/// Status of a client-executed tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Pending,
    Completed,
}

/// A model-requested action executed by the client, whose output arrives
/// asynchronously. At most one call per thread is pending at a time under
/// normal operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientToolCallItem {
    pub id: String,
    pub created_at: DateTime<Utc>,
    /// Dotted capability name, e.g. `sandbox.python.run`.
    pub name: String,
    pub arguments: Value,
    pub call_id: String,
    pub status: ToolCallStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
}

/// A rendered tool-result card with its plain-text fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WidgetItem {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub widget: WidgetNode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copy_text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemItem {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorItem {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub code: String,
    pub message: String,
}

/// Attachment kind tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    File,
    Image,
}

/// Metadata record for an uploaded file or image.
///
/// The binary blob is tracked separately from this record (two-phase:
/// create metadata, receive bytes, bind path). `upload_url` exists only
/// during the handshake-upload window and is cleared once bytes land.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    #[serde(rename = "type")]
    pub kind: AttachmentKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_url: Option<String>,
}

/// Generate a thread-item id: a short kind prefix plus a random component.
pub fn generate_item_id(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::new_v4().simple())
}

/// Generate an attachment id from the MIME type.
///
/// Direct uploads and handshake uploads both use this, so ids are
/// indistinguishable by origin.
pub fn generate_attachment_id(mime_type: &str) -> String {
    let prefix = if mime_type.starts_with("image/") {
        "img"
    } else {
        "file"
    };
    format!("{prefix}_{}", Uuid::new_v4().simple())
}

pub fn attachment_kind_for(mime_type: &str) -> AttachmentKind {
    if mime_type.starts_with("image/") {
        AttachmentKind::Image
    } else {
        AttachmentKind::File
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_union_round_trips_with_type_tag() {
        let item = ThreadItem::ClientToolCall(ClientToolCallItem {
            id: "ctc_1".to_string(),
            created_at: Utc::now(),
            name: "sandbox.python.run".to_string(),
            arguments: serde_json::json!({"code": "print(1)"}),
            call_id: "call_1".to_string(),
            status: ToolCallStatus::Pending,
            output: None,
        });

        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value["type"], "client_tool_call");
        assert_eq!(value["status"], "pending");

        let back: ThreadItem = serde_json::from_value(value).unwrap();
        assert_eq!(back.id(), "ctc_1");
        assert_eq!(back.type_name(), "client_tool_call");
    }

    #[test]
    fn attachment_id_prefix_follows_mime_type() {
        assert!(generate_attachment_id("image/png").starts_with("img_"));
        assert!(generate_attachment_id("application/pdf").starts_with("file_"));
    }
}
