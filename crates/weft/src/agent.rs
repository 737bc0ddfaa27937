//! Model-calling collaborator interface.
//!
//! The orchestrator only ever sees this narrow surface: hand over an agent
//! definition, linearized input units, and per-run overrides; get back a
//! stream of thread events. [`openai::ResponsesRunner`] is the production
//! implementation; tests script their own.

pub mod openai;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use weft_protocol::events::ThreadEvent;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("model endpoint request failed: {0}")]
    Transport(String),

    #[error("malformed model response: {0}")]
    Protocol(String),
}

/// Static configuration of the agent for one run.
#[derive(Debug, Clone)]
pub struct AgentDefinition {
    pub name: String,
    pub instructions: String,
    pub model: String,
    pub tools: Vec<ToolSpec>,
    /// Safe tool names at which the run stops and waits for client output.
    pub stop_at_tools: Vec<String>,
}

/// A function tool surfaced to the model.
#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Per-request overrides.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub model: Option<String>,
    /// Safe tool name the model is forced to call, when set.
    pub tool_choice: Option<String>,
}

/// One model-input unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentInput {
    Message {
        role: MessageRole,
        content: Vec<AgentContent>,
    },
    FunctionCall {
        call_id: String,
        name: String,
        arguments: String,
    },
    FunctionCallOutput {
        call_id: String,
        output: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// Content part of a model-input message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentContent {
    InputText { text: String },
    OutputText { text: String },
    InputImage { detail: String, image_url: String },
    InputFile { filename: String, file_data: String },
}

pub type AgentEventStream = BoxStream<'static, Result<ThreadEvent, AgentError>>;

/// External model-calling collaborator.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    async fn run(
        &self,
        agent: AgentDefinition,
        input: Vec<AgentInput>,
        options: RunOptions,
    ) -> Result<AgentEventStream, AgentError>;
}
