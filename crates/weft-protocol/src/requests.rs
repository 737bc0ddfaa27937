//! Inbound request union for the chat endpoint.
//!
//! A request is a single JSON object tagged by dotted `op`. Thread-mutating
//! operations answer with an event stream; the rest answer with one JSON
//! document.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::items::{InferenceOptions, SortOrder, UserContent};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum WeftRequest {
    #[serde(rename = "threads.create")]
    ThreadsCreate { params: ThreadsCreateParams },

    #[serde(rename = "threads.add_user_message")]
    AddUserMessage { params: AddUserMessageParams },

    #[serde(rename = "threads.add_client_tool_output")]
    AddClientToolOutput { params: AddClientToolOutputParams },

    #[serde(rename = "threads.custom_action")]
    CustomAction { params: CustomActionParams },

    #[serde(rename = "threads.list")]
    ThreadsList { params: ListParams },

    #[serde(rename = "threads.retrieve")]
    ThreadsRetrieve { params: ThreadRefParams },

    #[serde(rename = "threads.delete")]
    ThreadsDelete { params: ThreadRefParams },

    #[serde(rename = "items.list")]
    ItemsList { params: ItemsListParams },

    #[serde(rename = "attachments.create")]
    AttachmentsCreate { params: AttachmentsCreateParams },

    #[serde(rename = "attachments.delete")]
    AttachmentsDelete { params: AttachmentsDeleteParams },
}

/// Inbound user message: content parts plus attachment ids to resolve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserMessageInput {
    pub content: Vec<UserContent>,
    #[serde(default)]
    pub attachments: Vec<String>,
    #[serde(default)]
    pub inference_options: InferenceOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadsCreateParams {
    pub input: UserMessageInput,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddUserMessageParams {
    pub thread_id: String,
    pub input: UserMessageInput,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddClientToolOutputParams {
    pub thread_id: String,
    pub result: Value,
}

/// A UI-originated action, dispatched by `type` tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionPayload {
    #[serde(rename = "type")]
    pub action_type: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomActionParams {
    pub thread_id: String,
    /// The widget item the action originated from, when any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
    pub action: ActionPayload,
}

fn default_limit() -> usize {
    20
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListParams {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub order: SortOrder,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadRefParams {
    pub thread_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemsListParams {
    pub thread_id: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub order: SortOrder,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentsCreateParams {
    pub name: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentsDeleteParams {
    pub attachment_id: String,
}
