//! Thread history to model-input conversion.
//!
//! Reduces a thread's stored items to the linear unit sequence the model
//! runtime consumes: attachment inlining, tool-call/output pairing,
//! prompt-size redaction, and the screenshot special case (only the latest
//! completed screenshot is re-attached as an image; older ones degrade to
//! text so history stays bounded).

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Map, Value, json};

use weft_protocol::items::{
    Attachment, AttachmentKind, ClientToolCallItem, ThreadItem, ToolCallStatus, UserContent,
    UserMessageItem,
};

use crate::agent::{AgentContent, AgentInput, MessageRole};
use crate::error::ServerError;
use crate::store::ThreadStore;
use crate::tools::SCREENSHOT_TOOL;

/// How completed tool calls are represented in model input.
///
/// `Function` uses the provider's native function-call history; `Text`
/// inlines the exchange as plain text, which round-trips more reliably
/// through OpenAI-compatible third-party endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolOutputStyle {
    Function,
    Text,
}

pub struct ItemConverter {
    store: Arc<dyn ThreadStore>,
    style: ToolOutputStyle,
}

impl ItemConverter {
    pub fn new(store: Arc<dyn ThreadStore>, style: ToolOutputStyle) -> Self {
        Self { store, style }
    }

    /// Linearize the item history into model-input units.
    pub async fn to_agent_input(
        &self,
        items: &[ThreadItem],
    ) -> Result<Vec<AgentInput>, ServerError> {
        let latest_screenshot = items.iter().rev().find_map(|item| match item {
            ThreadItem::ClientToolCall(call)
                if call.status != ToolCallStatus::Pending && call.name == SCREENSHOT_TOOL =>
            {
                Some(call.call_id.clone())
            }
            _ => None,
        });

        let mut input = Vec::new();
        for item in items {
            match item {
                ThreadItem::UserMessage(message) => {
                    input.push(self.user_message_input(message).await?);
                }
                ThreadItem::AssistantMessage(message) => {
                    let content = message
                        .content
                        .iter()
                        .map(|part| match part {
                            weft_protocol::items::AssistantContent::Text { text } => {
                                AgentContent::OutputText { text: text.clone() }
                            }
                        })
                        .collect();
                    input.push(AgentInput::Message {
                        role: MessageRole::Assistant,
                        content,
                    });
                }
                ThreadItem::ClientToolCall(call) => {
                    input.extend(self.client_tool_call_input(call, latest_screenshot.as_deref())?);
                }
                ThreadItem::System(system) => {
                    input.push(AgentInput::Message {
                        role: MessageRole::System,
                        content: vec![AgentContent::InputText {
                            text: system.content.clone(),
                        }],
                    });
                }
                // Widgets and error markers carry no model-facing content.
                ThreadItem::Widget(_) | ThreadItem::Error(_) => {}
            }
        }
        Ok(input)
    }

    async fn user_message_input(
        &self,
        message: &UserMessageItem,
    ) -> Result<AgentInput, ServerError> {
        let mut content = Vec::with_capacity(message.content.len() + message.attachments.len());
        for part in &message.content {
            match part {
                UserContent::Text { text } => {
                    content.push(AgentContent::InputText { text: text.clone() });
                }
                UserContent::Tag { text, data } => {
                    content.push(AgentContent::InputText {
                        text: format!("Tag {text}: {}", serde_json::to_string(data)?),
                    });
                }
            }
        }
        for attachment in &message.attachments {
            content.push(self.attachment_content(attachment).await?);
        }
        Ok(AgentInput::Message {
            role: MessageRole::User,
            content,
        })
    }

    /// Inline an attachment's bytes. A missing blob is fatal for the
    /// request: the model call cannot proceed without the referenced
    /// content.
    async fn attachment_content(
        &self,
        attachment: &Attachment,
    ) -> Result<AgentContent, ServerError> {
        let path = self
            .store
            .get_attachment_file(&attachment.id)
            .await?
            .filter(|path| path.exists())
            .ok_or_else(|| ServerError::MissingAttachment(attachment.id.clone()))?;

        let data = tokio::fs::read(&path).await?;
        let encoded = BASE64.encode(&data);
        if attachment.kind == AttachmentKind::Image {
            Ok(AgentContent::InputImage {
                detail: "auto".to_string(),
                image_url: format!("data:{};base64,{encoded}", attachment.mime_type),
            })
        } else {
            Ok(AgentContent::InputFile {
                filename: attachment.name.clone(),
                file_data: encoded,
            })
        }
    }

    fn client_tool_call_input(
        &self,
        call: &ClientToolCallItem,
        latest_screenshot: Option<&str>,
    ) -> Result<Vec<AgentInput>, ServerError> {
        if call.status == ToolCallStatus::Pending {
            return Ok(Vec::new());
        }

        let redacted = redact_tool_output(call.output.as_ref().unwrap_or(&Value::Null));
        let mut inputs = match self.style {
            ToolOutputStyle::Function => vec![
                AgentInput::FunctionCall {
                    call_id: call.call_id.clone(),
                    name: call.name.clone(),
                    arguments: serde_json::to_string(&call.arguments)?,
                },
                AgentInput::FunctionCallOutput {
                    call_id: call.call_id.clone(),
                    output: serde_json::to_string(&redacted)?,
                },
            ],
            ToolOutputStyle::Text => {
                let payload = json!({
                    "name": call.name,
                    "arguments": call.arguments,
                    "output": redacted,
                    "call_id": call.call_id,
                });
                vec![AgentInput::Message {
                    role: MessageRole::User,
                    content: vec![AgentContent::InputText {
                        text: format!(
                            "Tool execution result (tool already completed):\n{}",
                            serde_json::to_string(&payload)?
                        ),
                    }],
                }]
            }
        };

        if let Some(screenshot) = screenshot_message(call, latest_screenshot) {
            inputs.push(screenshot);
        }
        Ok(inputs)
    }
}

/// Replace embedded base64 image data with a placeholder plus a byte count,
/// recursively across nested maps and arrays.
pub fn redact_tool_output(output: &Value) -> Value {
    match output {
        Value::Object(map) => {
            let mut redacted = Map::with_capacity(map.len());
            for (key, value) in map {
                if key == "imageBase64"
                    && let Value::String(data) = value
                {
                    redacted.insert(
                        key.clone(),
                        Value::String(format!("[base64 omitted: {} chars]", data.len())),
                    );
                    redacted.insert("imageBytes".to_string(), json!(data.len() * 3 / 4));
                    continue;
                }
                redacted.insert(key.clone(), redact_tool_output(value));
            }
            Value::Object(redacted)
        }
        Value::Array(entries) => Value::Array(entries.iter().map(redact_tool_output).collect()),
        other => other.clone(),
    }
}

/// The trailing observation message for the gated latest screenshot call.
fn screenshot_message(
    call: &ClientToolCallItem,
    latest_screenshot: Option<&str>,
) -> Option<AgentInput> {
    if call.name != SCREENSHOT_TOOL {
        return None;
    }
    if let Some(latest) = latest_screenshot
        && call.call_id != latest
    {
        return None;
    }
    let output = call.output.as_ref()?.as_object()?;
    let image_base64 = output.get("imageBase64")?.as_str()?;
    if image_base64.trim().is_empty() {
        return None;
    }

    let mime = output
        .get("mime")
        .and_then(Value::as_str)
        .filter(|mime| !mime.trim().is_empty())
        .unwrap_or("image/png");

    let mut metadata = Map::new();
    metadata.insert("tool".to_string(), Value::String(call.name.clone()));
    metadata.insert(
        "note".to_string(),
        Value::String("Coordinates are pixels; origin is top-left of the screenshot.".to_string()),
    );
    if let Some(screen_size) = output.get("screenSize").filter(|v| v.is_object()) {
        metadata.insert("screenSize".to_string(), screen_size.clone());
    }
    if let Some(cursor) = output.get("cursorPosition").filter(|v| v.is_object()) {
        metadata.insert("cursorPosition".to_string(), cursor.clone());
    }

    Some(AgentInput::Message {
        role: MessageRole::User,
        content: vec![
            AgentContent::InputText {
                text: format!(
                    "Desktop screenshot (observation):\n{}",
                    Value::Object(metadata)
                ),
            },
            AgentContent::InputImage {
                detail: "auto".to_string(),
                image_url: format!("data:{mime};base64,{image_base64}"),
            },
        ],
    })
}
