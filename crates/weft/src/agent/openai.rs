//! OpenAI-compatible Responses API runner.
//!
//! Streams one model turn over SSE and translates the provider's event
//! shapes into thread events. A function call whose name is in the agent's
//! stop set becomes a pending client tool call and ends the turn; the
//! output arrives later through the tool-output request path.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use reqwest_eventsource::{Event, EventSource, RequestBuilderExt};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use weft_protocol::events::{ItemUpdate, ThreadEvent};
use weft_protocol::items::{
    AssistantContent, AssistantMessageItem, ClientToolCallItem, ThreadItem, ToolCallStatus,
    generate_item_id,
};

use crate::tools::safe_to_dotted;

use super::{AgentDefinition, AgentError, AgentEventStream, AgentInput, AgentRunner, RunOptions};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct ResponsesRunner {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl ResponsesRunner {
    pub fn new(base_url: Option<String>, api_key: Option<String>) -> Self {
        let base_url = base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        Self {
            client: reqwest::Client::new(),
            base_url,
            api_key,
        }
    }

    fn build_request(
        &self,
        agent: &AgentDefinition,
        input: &[AgentInput],
        options: &RunOptions,
    ) -> reqwest::RequestBuilder {
        let model = options.model.clone().unwrap_or_else(|| agent.model.clone());
        let tools: Vec<Value> = agent
            .tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.parameters,
                })
            })
            .collect();

        let mut body = json!({
            "model": model,
            "instructions": agent.instructions,
            "input": input,
            "tools": tools,
            "stream": true,
        });
        if let Some(choice) = &options.tool_choice {
            body["tool_choice"] = json!({"type": "function", "name": choice});
        }

        let mut request = self
            .client
            .post(format!("{}/responses", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        request
    }
}

#[async_trait]
impl AgentRunner for ResponsesRunner {
    async fn run(
        &self,
        agent: AgentDefinition,
        input: Vec<AgentInput>,
        options: RunOptions,
    ) -> Result<AgentEventStream, AgentError> {
        let request = self.build_request(&agent, &input, &options);
        let source = request
            .eventsource()
            .map_err(|err| AgentError::Transport(err.to_string()))?;

        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(relay_turn(source, agent.stop_at_tools, tx));
        Ok(ReceiverStream::new(rx).boxed())
    }
}

/// Assistant message being assembled from deltas, keyed by provider item id.
struct OpenMessage {
    item_id: String,
    text: String,
}

async fn relay_turn(
    mut source: EventSource,
    stop_at_tools: Vec<String>,
    tx: mpsc::Sender<Result<ThreadEvent, AgentError>>,
) {
    let mut open_messages: HashMap<String, OpenMessage> = HashMap::new();

    while let Some(event) = source.next().await {
        let message = match event {
            Ok(Event::Open) => continue,
            Ok(Event::Message(message)) => message,
            Err(reqwest_eventsource::Error::StreamEnded) => break,
            Err(err) => {
                let _ = tx.send(Err(AgentError::Transport(err.to_string()))).await;
                break;
            }
        };

        let data: Value = match serde_json::from_str(&message.data) {
            Ok(data) => data,
            Err(err) => {
                debug!("skipping non-JSON stream frame: {err}");
                continue;
            }
        };
        let kind = data
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or(message.event.as_str());

        let done = match kind {
            "response.output_item.added" => {
                handle_item_added(&data, &mut open_messages, &tx).await
            }
            "response.output_text.delta" => {
                handle_text_delta(&data, &mut open_messages, &tx).await
            }
            "response.output_item.done" => {
                handle_item_done(&data, &stop_at_tools, &mut open_messages, &tx).await
            }
            "response.completed" => true,
            "response.failed" | "error" => {
                let detail = data
                    .pointer("/response/error/message")
                    .or_else(|| data.pointer("/error/message"))
                    .and_then(Value::as_str)
                    .unwrap_or("model run failed");
                let _ = tx
                    .send(Err(AgentError::Protocol(detail.to_string())))
                    .await;
                true
            }
            _ => false,
        };
        if done {
            break;
        }
    }

    source.close();
}

async fn handle_item_added(
    data: &Value,
    open_messages: &mut HashMap<String, OpenMessage>,
    tx: &mpsc::Sender<Result<ThreadEvent, AgentError>>,
) -> bool {
    let item = &data["item"];
    if item["type"] != "message" {
        return false;
    }
    let provider_id = item["id"].as_str().unwrap_or_default().to_string();
    let message = AssistantMessageItem {
        id: generate_item_id("msg"),
        created_at: Utc::now(),
        content: Vec::new(),
    };
    open_messages.insert(
        provider_id,
        OpenMessage {
            item_id: message.id.clone(),
            text: String::new(),
        },
    );
    tx.send(Ok(ThreadEvent::ItemAdded {
        item: ThreadItem::AssistantMessage(message),
    }))
    .await
    .is_err()
}

async fn handle_text_delta(
    data: &Value,
    open_messages: &mut HashMap<String, OpenMessage>,
    tx: &mpsc::Sender<Result<ThreadEvent, AgentError>>,
) -> bool {
    let provider_id = data["item_id"].as_str().unwrap_or_default();
    let delta = data["delta"].as_str().unwrap_or_default().to_string();
    let Some(open) = open_messages.get_mut(provider_id) else {
        return false;
    };
    open.text.push_str(&delta);
    let content_index = data["content_index"].as_u64().unwrap_or(0) as usize;
    tx.send(Ok(ThreadEvent::ItemUpdated {
        item_id: open.item_id.clone(),
        update: ItemUpdate::TextDelta {
            content_index,
            delta,
        },
    }))
    .await
    .is_err()
}

async fn handle_item_done(
    data: &Value,
    stop_at_tools: &[String],
    open_messages: &mut HashMap<String, OpenMessage>,
    tx: &mpsc::Sender<Result<ThreadEvent, AgentError>>,
) -> bool {
    let item = &data["item"];
    match item["type"].as_str() {
        Some("message") => {
            let provider_id = item["id"].as_str().unwrap_or_default();
            let Some(open) = open_messages.remove(provider_id) else {
                return false;
            };
            let message = AssistantMessageItem {
                id: open.item_id,
                created_at: Utc::now(),
                content: vec![AssistantContent::Text { text: open.text }],
            };
            tx.send(Ok(ThreadEvent::ItemDone {
                item: ThreadItem::AssistantMessage(message),
            }))
            .await
            .is_err()
        }
        Some("function_call") => {
            let safe_name = item["name"].as_str().unwrap_or_default();
            let dotted = safe_to_dotted(safe_name)
                .map(str::to_string)
                .unwrap_or_else(|| safe_name.to_string());
            let arguments = item["arguments"]
                .as_str()
                .map(|raw| serde_json::from_str(raw).unwrap_or(Value::Null))
                .unwrap_or(Value::Null);
            let call = ClientToolCallItem {
                id: generate_item_id("ctc"),
                created_at: Utc::now(),
                name: dotted,
                arguments,
                call_id: item["call_id"].as_str().unwrap_or_default().to_string(),
                status: ToolCallStatus::Pending,
                output: None,
            };
            let send_failed = tx
                .send(Ok(ThreadEvent::ItemAdded {
                    item: ThreadItem::ClientToolCall(call),
                }))
                .await
                .is_err();
            if send_failed {
                return true;
            }
            // The turn ends here; the client owns execution from now on.
            let stops = stop_at_tools.iter().any(|stop| stop == safe_name);
            if !stops {
                warn!(tool = safe_name, "function call outside stop set; ending turn anyway");
            }
            true
        }
        _ => false,
    }
}
