//! Request orchestration.
//!
//! One inbound request becomes either a JSON document or a single ordered
//! event stream. Streaming requests run on a spawned relay task writing
//! into a bounded channel; when the caller disconnects the channel closes
//! and the relay stops forwarding, with no compensating rollback of state
//! already persisted.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde_json::{Map, Value, json};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use weft_protocol::events::{ItemUpdate, ThreadEvent};
use weft_protocol::items::{
    SortOrder, ThreadItem, ThreadMetadata, ToolCallStatus, UserMessageItem, WidgetItem,
    generate_item_id,
};
use weft_protocol::requests::{ActionPayload, UserMessageInput, WeftRequest};

use crate::agent::{AgentDefinition, AgentRunner, RunOptions};
use crate::attachments::AttachmentService;
use crate::convert::{ItemConverter, ToolOutputStyle};
use crate::error::ServerError;
use crate::store::ThreadStore;
use crate::tools;
use crate::widgets::{build_tool_widget, format_tool_result_message, sanitize_tool_payload};

/// Bounded history window converted for each model turn.
const HISTORY_PAGE_LIMIT: usize = 200;
/// How far back the tool-output path scans for the pending call.
const PENDING_SCAN_LIMIT: usize = 50;

pub type EventStream = BoxStream<'static, Result<ThreadEvent, ServerError>>;

/// Outcome of processing one request.
pub enum ProcessResult {
    Stream(EventStream),
    Json(Value),
}

impl std::fmt::Debug for ProcessResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessResult::Stream(_) => f.write_str("ProcessResult::Stream(..)"),
            ProcessResult::Json(v) => f.debug_tuple("ProcessResult::Json").field(v).finish(),
        }
    }
}

/// A streaming request, dispatched on the relay task.
enum StreamJob {
    UserTurn {
        thread_id: String,
        input: Option<UserMessageInput>,
        announce: bool,
    },
    ToolOutput {
        thread_id: String,
        result: Value,
    },
    Action {
        thread_id: String,
        item_id: Option<String>,
        action: ActionPayload,
    },
}

struct EventSink {
    tx: mpsc::Sender<Result<ThreadEvent, ServerError>>,
}

impl EventSink {
    /// Returns false when the receiver is gone (caller disconnected).
    async fn send(&self, event: ThreadEvent) -> bool {
        self.tx.send(Ok(event)).await.is_ok()
    }

    async fn fail(&self, err: ServerError) {
        let _ = self.tx.send(Err(err)).await;
    }
}

pub struct ChatServer {
    store: Arc<dyn ThreadStore>,
    runner: Arc<dyn AgentRunner>,
    attachments: Arc<AttachmentService>,
    converter: ItemConverter,
    model: String,
    instructions: String,
    /// Widget payloads by item id for toggle re-renders. Process-lifetime
    /// and non-authoritative: a miss only suppresses the re-render, and a
    /// caller-supplied payload refills it.
    tool_payloads: DashMap<String, Map<String, Value>>,
}

impl ChatServer {
    pub fn new(
        store: Arc<dyn ThreadStore>,
        runner: Arc<dyn AgentRunner>,
        attachments: Arc<AttachmentService>,
        model: String,
        instructions: String,
        tool_output_style: ToolOutputStyle,
    ) -> Self {
        let converter = ItemConverter::new(store.clone(), tool_output_style);
        Self {
            store,
            runner,
            attachments,
            converter,
            model,
            instructions,
            tool_payloads: DashMap::new(),
        }
    }

    fn agent_definition(&self) -> AgentDefinition {
        AgentDefinition {
            name: "weft".to_string(),
            instructions: self.instructions.clone(),
            model: self.model.clone(),
            tools: tools::agent_tools(),
            stop_at_tools: tools::stop_at_tool_names(),
        }
    }

    /// Parse and dispatch one raw request body.
    pub async fn process(self: Arc<Self>, body: &[u8]) -> Result<ProcessResult, ServerError> {
        let request: WeftRequest = serde_json::from_slice(body)
            .map_err(|err| ServerError::InvalidRequest(err.to_string()))?;

        match request {
            WeftRequest::ThreadsCreate { params } => {
                Ok(ProcessResult::Stream(self.spawn_stream(StreamJob::UserTurn {
                    thread_id: generate_item_id("thr"),
                    input: Some(params.input),
                    announce: true,
                })))
            }
            WeftRequest::AddUserMessage { params } => {
                Ok(ProcessResult::Stream(self.spawn_stream(StreamJob::UserTurn {
                    thread_id: params.thread_id,
                    input: Some(params.input),
                    announce: false,
                })))
            }
            WeftRequest::AddClientToolOutput { params } => {
                Ok(ProcessResult::Stream(self.spawn_stream(StreamJob::ToolOutput {
                    thread_id: params.thread_id,
                    result: params.result,
                })))
            }
            WeftRequest::CustomAction { params } => {
                Ok(ProcessResult::Stream(self.spawn_stream(StreamJob::Action {
                    thread_id: params.thread_id,
                    item_id: params.item_id,
                    action: params.action,
                })))
            }
            WeftRequest::ThreadsList { params } => {
                let page = self
                    .store
                    .load_threads(params.after.as_deref(), params.limit, params.order)
                    .await?;
                Ok(ProcessResult::Json(serde_json::to_value(page)?))
            }
            WeftRequest::ThreadsRetrieve { params } => {
                let thread = self.store.load_thread(&params.thread_id).await?;
                Ok(ProcessResult::Json(serde_json::to_value(thread)?))
            }
            WeftRequest::ThreadsDelete { params } => {
                self.store.delete_thread(&params.thread_id).await?;
                Ok(ProcessResult::Json(json!({"ok": true})))
            }
            WeftRequest::ItemsList { params } => {
                let page = self
                    .store
                    .load_thread_items(
                        &params.thread_id,
                        params.after.as_deref(),
                        params.limit,
                        params.order,
                    )
                    .await?;
                Ok(ProcessResult::Json(serde_json::to_value(page)?))
            }
            WeftRequest::AttachmentsCreate { params } => {
                let attachment = self
                    .attachments
                    .create_attachment(&params.name, &params.mime_type)
                    .await?;
                Ok(ProcessResult::Json(serde_json::to_value(attachment)?))
            }
            WeftRequest::AttachmentsDelete { params } => {
                self.attachments
                    .delete_attachment(&params.attachment_id)
                    .await?;
                Ok(ProcessResult::Json(json!({"ok": true})))
            }
        }
    }

    fn spawn_stream(self: Arc<Self>, job: StreamJob) -> EventStream {
        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            let sink = EventSink { tx };
            let outcome = match job {
                StreamJob::UserTurn {
                    thread_id,
                    input,
                    announce,
                } => self.run_user_turn(&thread_id, input, announce, &sink).await,
                StreamJob::ToolOutput { thread_id, result } => {
                    self.run_tool_output(&thread_id, result, &sink).await
                }
                StreamJob::Action {
                    thread_id,
                    item_id,
                    action,
                } => self.run_action(&thread_id, item_id, action, &sink).await,
            };
            if let Err(err) = outcome {
                warn!(error = %err, "request stream failed");
                sink.fail(err).await;
            }
        });
        ReceiverStream::new(rx).boxed()
    }

    async fn run_user_turn(
        &self,
        thread_id: &str,
        input: Option<UserMessageInput>,
        announce: bool,
        sink: &EventSink,
    ) -> Result<(), ServerError> {
        let thread = self.store.load_thread(thread_id).await?;
        if announce
            && !sink
                .send(ThreadEvent::ThreadCreated {
                    thread: thread.clone(),
                })
                .await
        {
            return Ok(());
        }

        let mut options = RunOptions::default();
        if let Some(input) = input {
            let message = self.build_user_message(input).await?;
            if let Some(model) = &message.inference_options.model {
                options.model = Some(model.clone());
            }
            if let Some(choice) = &message.inference_options.tool_choice {
                let safe = tools::dotted_to_safe(&choice.id)
                    .map(str::to_string)
                    .unwrap_or_else(|| choice.id.clone());
                options.tool_choice = Some(safe);
            }

            let item = ThreadItem::UserMessage(message);
            self.store.add_thread_item(&thread.id, &item).await?;
            if !sink.send(ThreadEvent::ItemAdded { item }).await {
                return Ok(());
            }
        }

        self.respond(&thread, options, sink).await
    }

    async fn build_user_message(
        &self,
        input: UserMessageInput,
    ) -> Result<UserMessageItem, ServerError> {
        let mut attachments = Vec::with_capacity(input.attachments.len());
        for attachment_id in &input.attachments {
            attachments.push(self.store.load_attachment(attachment_id).await?);
        }
        Ok(UserMessageItem {
            id: generate_item_id("msg"),
            created_at: Utc::now(),
            content: input.content,
            attachments,
            inference_options: input.inference_options,
        })
    }

    /// Run one model turn over the thread's recent history and relay the
    /// collaborator's events verbatim, persisting item events as they pass.
    async fn respond(
        &self,
        thread: &ThreadMetadata,
        options: RunOptions,
        sink: &EventSink,
    ) -> Result<(), ServerError> {
        let history = self
            .store
            .load_thread_items(&thread.id, None, HISTORY_PAGE_LIMIT, SortOrder::Asc)
            .await?;
        let agent_input = self.converter.to_agent_input(&history.data).await?;

        let mut events = self
            .runner
            .run(self.agent_definition(), agent_input, options)
            .await
            .map_err(|err| ServerError::Agent(err.to_string()))?;

        while let Some(event) = events.next().await {
            let event = event.map_err(|err| ServerError::Agent(err.to_string()))?;
            match &event {
                ThreadEvent::ItemAdded { item } => {
                    self.store.add_thread_item(&thread.id, item).await?;
                }
                ThreadEvent::ItemDone { item } => {
                    self.store.save_item(&thread.id, item).await?;
                }
                _ => {}
            }
            if !sink.send(event).await {
                // Caller gone: stop relaying, no further side effects.
                return Ok(());
            }
        }
        Ok(())
    }

    /// Out-of-band tool output: complete the pending call, render its
    /// widget, then let the model continue with the updated history.
    async fn run_tool_output(
        &self,
        thread_id: &str,
        result: Value,
        sink: &EventSink,
    ) -> Result<(), ServerError> {
        let thread = self.store.load_thread(thread_id).await?;
        let recent = self
            .store
            .load_thread_items(&thread.id, None, PENDING_SCAN_LIMIT, SortOrder::Desc)
            .await?;
        let mut call = recent
            .data
            .into_iter()
            .find_map(|item| match item {
                ThreadItem::ClientToolCall(call) if call.status == ToolCallStatus::Pending => {
                    Some(call)
                }
                _ => None,
            })
            .ok_or_else(|| {
                ServerError::Protocol(format!(
                    "no pending client tool call in thread {}",
                    thread.id
                ))
            })?;

        call.output = Some(result);
        call.status = ToolCallStatus::Completed;
        self.store
            .save_item(&thread.id, &ThreadItem::ClientToolCall(call.clone()))
            .await?;

        let status = tool_output_status(call.output.as_ref());
        info!(thread_id = %thread.id, tool = %call.name, status, "client tool output received");

        let payload = json!({
            "tool": call.name,
            "params": call.arguments,
            "result": call.output,
            "status": status,
            "callId": call.call_id,
            "source": "weft",
        });
        if !self
            .emit_widget_item(&thread, sanitize_tool_payload(&payload), sink)
            .await?
        {
            return Ok(());
        }

        self.respond(&thread, RunOptions::default(), sink).await
    }

    /// Persist and announce a new widget item for a tool payload.
    async fn emit_widget_item(
        &self,
        thread: &ThreadMetadata,
        payload: Map<String, Value>,
        sink: &EventSink,
    ) -> Result<bool, ServerError> {
        let item_id = generate_item_id("msg");
        self.tool_payloads.insert(item_id.clone(), payload.clone());

        let widget = build_tool_widget(&payload, false);
        let copy_text = format_tool_result_message(&payload);
        let item = ThreadItem::Widget(WidgetItem {
            id: item_id,
            created_at: Utc::now(),
            widget,
            copy_text: Some(copy_text),
        });
        self.store.add_thread_item(&thread.id, &item).await?;
        Ok(sink.send(ThreadEvent::ItemAdded { item }).await)
    }

    /// UI-originated actions. Toggles re-render an existing widget in
    /// place; tool/tool_result actions synthesize a new widget item without
    /// a follow-up model turn.
    async fn run_action(
        &self,
        thread_id: &str,
        item_id: Option<String>,
        action: ActionPayload,
        sink: &EventSink,
    ) -> Result<(), ServerError> {
        match action.action_type.as_str() {
            "tool.toggle" | "agent.tool.toggle" => {
                let Some(sender_id) = item_id else {
                    return Ok(());
                };
                let payload = action.payload.as_object();
                let expanded = payload
                    .and_then(|map| map.get("expanded"))
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                // A caller-supplied payload wins over the cache, so stale
                // entries never block a UI-driven replay.
                let inline = payload
                    .and_then(|map| map.get("toolPayload"))
                    .and_then(Value::as_object)
                    .cloned();
                let tool_payload = inline.or_else(|| {
                    self.tool_payloads
                        .get(&sender_id)
                        .map(|entry| entry.clone())
                });
                let Some(tool_payload) = tool_payload else {
                    return Ok(());
                };
                self.tool_payloads
                    .insert(sender_id.clone(), tool_payload.clone());

                let widget = build_tool_widget(&tool_payload, expanded);
                sink.send(ThreadEvent::ItemUpdated {
                    item_id: sender_id,
                    update: ItemUpdate::WidgetRootUpdated { widget },
                })
                .await;
                Ok(())
            }
            "tool" | "tool_result" => {
                let thread = self.store.load_thread(thread_id).await?;
                self.emit_widget_item(&thread, sanitize_tool_payload(&action.payload), sink)
                    .await?;
                Ok(())
            }
            other => {
                warn!(action = other, "ignoring unrecognized action type");
                Ok(())
            }
        }
    }
}

fn tool_output_status(output: Option<&Value>) -> &'static str {
    if let Some(Value::Object(map)) = output {
        let not_ok = map.get("ok").is_some_and(|value| value == &Value::Bool(false));
        let has_error = map.get("error").is_some_and(|value| !value.is_null());
        if not_ok || has_error {
            return "error";
        }
    }
    "success"
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    use async_trait::async_trait;
    use chrono::Utc;
    use tokio::sync::Mutex;

    use weft_protocol::items::{
        AssistantContent, AssistantMessageItem, ClientToolCallItem, InferenceOptions, UserContent,
    };

    use crate::agent::{AgentError, AgentEventStream, AgentInput};
    use crate::store::MemoryStore;

    struct ScriptedRunner {
        batches: Mutex<VecDeque<Vec<ThreadEvent>>>,
        calls: Mutex<Vec<(Vec<AgentInput>, RunOptions)>>,
    }

    impl ScriptedRunner {
        fn new(batches: Vec<Vec<ThreadEvent>>) -> Self {
            Self {
                batches: Mutex::new(batches.into()),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl AgentRunner for ScriptedRunner {
        async fn run(
            &self,
            _agent: AgentDefinition,
            input: Vec<AgentInput>,
            options: RunOptions,
        ) -> Result<AgentEventStream, AgentError> {
            self.calls.lock().await.push((input, options));
            let batch = self.batches.lock().await.pop_front().unwrap_or_default();
            Ok(futures::stream::iter(batch.into_iter().map(Ok)).boxed())
        }
    }

    struct Fixture {
        server: Arc<ChatServer>,
        store: Arc<MemoryStore>,
        runner: Arc<ScriptedRunner>,
        _upload_dir: tempfile::TempDir,
    }

    fn fixture(batches: Vec<Vec<ThreadEvent>>) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let runner = Arc::new(ScriptedRunner::new(batches));
        let upload_dir = tempfile::tempdir().unwrap();
        let attachments = Arc::new(AttachmentService::new(
            store.clone(),
            upload_dir.path().to_path_buf(),
            "http://localhost:8787".to_string(),
        ));
        let server = Arc::new(ChatServer::new(
            store.clone(),
            runner.clone(),
            attachments,
            "gpt-test".to_string(),
            "test instructions".to_string(),
            ToolOutputStyle::Function,
        ));
        Fixture {
            server,
            store,
            runner,
            _upload_dir: upload_dir,
        }
    }

    fn assistant_message(id: &str, text: &str) -> ThreadItem {
        ThreadItem::AssistantMessage(AssistantMessageItem {
            id: id.to_string(),
            created_at: Utc::now(),
            content: vec![AssistantContent::Text {
                text: text.to_string(),
            }],
        })
    }

    fn pending_call(thread_item_id: &str, call_id: &str) -> ThreadItem {
        ThreadItem::ClientToolCall(ClientToolCallItem {
            id: thread_item_id.to_string(),
            created_at: Utc::now(),
            name: "sandbox.python.run".to_string(),
            arguments: json!({"code": "6*7"}),
            call_id: call_id.to_string(),
            status: ToolCallStatus::Pending,
            output: None,
        })
    }

    fn user_message(id: &str, text: &str) -> ThreadItem {
        ThreadItem::UserMessage(UserMessageItem {
            id: id.to_string(),
            created_at: Utc::now(),
            content: vec![UserContent::Text {
                text: text.to_string(),
            }],
            attachments: Vec::new(),
            inference_options: InferenceOptions::default(),
        })
    }

    async fn collect(result: ProcessResult) -> Vec<Result<ThreadEvent, ServerError>> {
        match result {
            ProcessResult::Stream(mut stream) => {
                let mut events = Vec::new();
                while let Some(event) = stream.next().await {
                    events.push(event);
                }
                events
            }
            ProcessResult::Json(value) => panic!("expected stream, got {value}"),
        }
    }

    async fn thread_items(store: &MemoryStore, thread_id: &str) -> Vec<ThreadItem> {
        store
            .load_thread_items(thread_id, None, 100, SortOrder::Asc)
            .await
            .unwrap()
            .data
    }

    #[tokio::test]
    async fn tool_output_happy_path() {
        let fx = fixture(vec![vec![ThreadEvent::ItemAdded {
            item: assistant_message("msg_a1", "it printed 42"),
        }]]);
        fx.store.load_thread("t1").await.unwrap();
        fx.store
            .add_thread_item("t1", &user_message("msg_u1", "run 6*7"))
            .await
            .unwrap();
        fx.store
            .add_thread_item("t1", &pending_call("ctc_1", "c1"))
            .await
            .unwrap();

        let body = serde_json::to_vec(&json!({
            "op": "threads.add_client_tool_output",
            "params": {"thread_id": "t1", "result": {"ok": true, "value": 42}},
        }))
        .unwrap();
        let events = collect(fx.server.clone().process(&body).await.unwrap()).await;
        let events: Vec<ThreadEvent> = events.into_iter().map(Result::unwrap).collect();

        // Pending call is now completed with the submitted output.
        let call = fx.store.load_item("t1", "ctc_1").await.unwrap();
        match call {
            ThreadItem::ClientToolCall(call) => {
                assert_eq!(call.status, ToolCallStatus::Completed);
                assert_eq!(call.output, Some(json!({"ok": true, "value": 42})));
            }
            other => panic!("unexpected item: {other:?}"),
        }

        // A widget item summarizing the call was appended with status success.
        let items = thread_items(&fx.store, "t1").await;
        let widget = items
            .iter()
            .find_map(|item| match item {
                ThreadItem::Widget(widget) => Some(widget),
                _ => None,
            })
            .expect("widget item appended");
        let transcript = widget.copy_text.as_deref().unwrap();
        assert!(transcript.contains("status:success"));
        assert!(transcript.contains("tool:sandbox.python.run"));

        // The follow-up model turn saw the completed call in history.
        let calls = fx.runner.calls.lock().await;
        assert_eq!(calls.len(), 1);
        let saw_completed_call = calls[0].0.iter().any(|unit| {
            matches!(unit, AgentInput::FunctionCallOutput { call_id, .. } if call_id == "c1")
        });
        assert!(saw_completed_call, "input units: {:?}", calls[0].0);

        // Stream carried the widget and the relayed assistant message.
        assert!(events.iter().any(|event| matches!(
            event,
            ThreadEvent::ItemAdded { item: ThreadItem::Widget(_) }
        )));
        assert!(events.iter().any(|event| matches!(
            event,
            ThreadEvent::ItemAdded { item: ThreadItem::AssistantMessage(_) }
        )));
    }

    #[tokio::test]
    async fn tool_output_without_pending_call_is_a_protocol_error() {
        let fx = fixture(Vec::new());
        fx.store.load_thread("t1").await.unwrap();
        fx.store
            .add_thread_item("t1", &user_message("msg_u1", "hello"))
            .await
            .unwrap();

        let body = serde_json::to_vec(&json!({
            "op": "threads.add_client_tool_output",
            "params": {"thread_id": "t1", "result": {"ok": true}},
        }))
        .unwrap();
        let events = collect(fx.server.clone().process(&body).await.unwrap()).await;

        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Err(ServerError::Protocol(_))));

        // No mutation: the thread still holds exactly the seeded message.
        let items = thread_items(&fx.store, "t1").await;
        assert_eq!(items.len(), 1);
        assert!(fx.runner.calls.lock().await.is_empty());
    }

    #[tokio::test]
    async fn error_output_derives_error_status() {
        let fx = fixture(vec![Vec::new()]);
        fx.store.load_thread("t1").await.unwrap();
        fx.store
            .add_thread_item("t1", &pending_call("ctc_1", "c1"))
            .await
            .unwrap();

        let body = serde_json::to_vec(&json!({
            "op": "threads.add_client_tool_output",
            "params": {"thread_id": "t1", "result": {"ok": false, "error": "denied"}},
        }))
        .unwrap();
        collect(fx.server.clone().process(&body).await.unwrap()).await;

        let items = thread_items(&fx.store, "t1").await;
        let widget = items
            .iter()
            .find_map(|item| match item {
                ThreadItem::Widget(widget) => Some(widget),
                _ => None,
            })
            .unwrap();
        assert!(widget.copy_text.as_deref().unwrap().contains("status:error"));
    }

    #[tokio::test]
    async fn user_turn_persists_message_and_relays_runner_events() {
        let fx = fixture(vec![vec![ThreadEvent::ItemAdded {
            item: assistant_message("msg_a1", "hi there"),
        }]]);

        let body = serde_json::to_vec(&json!({
            "op": "threads.create",
            "params": {"input": {"content": [{"type": "text", "text": "hi"}]}},
        }))
        .unwrap();
        let events = collect(fx.server.clone().process(&body).await.unwrap()).await;
        let events: Vec<ThreadEvent> = events.into_iter().map(Result::unwrap).collect();

        let thread_id = match &events[0] {
            ThreadEvent::ThreadCreated { thread } => thread.id.clone(),
            other => panic!("expected thread.created first, got {other:?}"),
        };
        assert!(matches!(
            &events[1],
            ThreadEvent::ItemAdded { item: ThreadItem::UserMessage(_) }
        ));
        assert!(matches!(
            &events[2],
            ThreadEvent::ItemAdded { item: ThreadItem::AssistantMessage(_) }
        ));

        let items = thread_items(&fx.store, &thread_id).await;
        assert_eq!(items.len(), 2);
    }

    #[tokio::test]
    async fn inference_overrides_reach_the_runner() {
        let fx = fixture(vec![Vec::new()]);
        let body = serde_json::to_vec(&json!({
            "op": "threads.add_user_message",
            "params": {
                "thread_id": "t1",
                "input": {
                    "content": [{"type": "text", "text": "shot please"}],
                    "inference_options": {
                        "model": "gpt-custom",
                        "tool_choice": {"id": "sandbox.desktop.screenshot"},
                    },
                },
            },
        }))
        .unwrap();
        collect(fx.server.clone().process(&body).await.unwrap()).await;

        let calls = fx.runner.calls.lock().await;
        let options = &calls[0].1;
        assert_eq!(options.model.as_deref(), Some("gpt-custom"));
        // Dotted capability names map to the safe identifier.
        assert_eq!(
            options.tool_choice.as_deref(),
            Some("sandbox_desktop_screenshot")
        );
    }

    #[tokio::test]
    async fn tool_action_synthesizes_widget_without_model_turn() {
        let fx = fixture(Vec::new());
        let body = serde_json::to_vec(&json!({
            "op": "threads.custom_action",
            "params": {
                "thread_id": "t1",
                "action": {"type": "tool", "payload": {"tool": "x", "status": "success"}},
            },
        }))
        .unwrap();
        let events = collect(fx.server.clone().process(&body).await.unwrap()).await;
        let events: Vec<ThreadEvent> = events.into_iter().map(Result::unwrap).collect();

        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            ThreadEvent::ItemAdded { item: ThreadItem::Widget(_) }
        ));
        assert!(fx.runner.calls.lock().await.is_empty());
    }

    #[tokio::test]
    async fn toggle_rerenders_from_cache_without_new_items() {
        let fx = fixture(Vec::new());

        // Seed the cache through the action path that creates the widget.
        let body = serde_json::to_vec(&json!({
            "op": "threads.custom_action",
            "params": {
                "thread_id": "t1",
                "action": {"type": "tool", "payload": {"tool": "x", "status": "success"}},
            },
        }))
        .unwrap();
        let events = collect(fx.server.clone().process(&body).await.unwrap()).await;
        let widget_id = match events[0].as_ref().unwrap() {
            ThreadEvent::ItemAdded { item } => item.id().to_string(),
            other => panic!("unexpected event: {other:?}"),
        };
        let items_before = thread_items(&fx.store, "t1").await.len();

        let body = serde_json::to_vec(&json!({
            "op": "threads.custom_action",
            "params": {
                "thread_id": "t1",
                "item_id": widget_id,
                "action": {"type": "agent.tool.toggle", "payload": {"expanded": true}},
            },
        }))
        .unwrap();
        let events = collect(fx.server.clone().process(&body).await.unwrap()).await;
        let events: Vec<ThreadEvent> = events.into_iter().map(Result::unwrap).collect();

        assert_eq!(events.len(), 1);
        match &events[0] {
            ThreadEvent::ItemUpdated {
                item_id,
                update: ItemUpdate::WidgetRootUpdated { widget },
            } => {
                assert_eq!(item_id, &widget_id);
                // Expanded cards carry the detail column.
                let value = serde_json::to_value(widget).unwrap();
                assert_eq!(value["children"].as_array().unwrap().len(), 2);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(thread_items(&fx.store, "t1").await.len(), items_before);
    }

    #[tokio::test]
    async fn toggle_trusts_inline_payload_over_missing_cache() {
        let fx = fixture(Vec::new());
        let body = serde_json::to_vec(&json!({
            "op": "threads.custom_action",
            "params": {
                "thread_id": "t1",
                "item_id": "msg_unseen",
                "action": {
                    "type": "tool.toggle",
                    "payload": {
                        "expanded": true,
                        "toolPayload": {"tool": "replay", "status": "success"},
                    },
                },
            },
        }))
        .unwrap();
        let events = collect(fx.server.clone().process(&body).await.unwrap()).await;
        let events: Vec<ThreadEvent> = events.into_iter().map(Result::unwrap).collect();
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], ThreadEvent::ItemUpdated { .. }));
    }

    #[tokio::test]
    async fn toggle_without_payload_or_cache_renders_nothing() {
        let fx = fixture(Vec::new());
        let body = serde_json::to_vec(&json!({
            "op": "threads.custom_action",
            "params": {
                "thread_id": "t1",
                "item_id": "msg_unknown",
                "action": {"type": "agent.tool.toggle", "payload": {"expanded": true}},
            },
        }))
        .unwrap();
        let events = collect(fx.server.clone().process(&body).await.unwrap()).await;
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn malformed_body_is_rejected_before_any_mutation() {
        let fx = fixture(Vec::new());
        let err = fx
            .server
            .clone()
            .process(b"{\"op\": \"nope\"}")
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::InvalidRequest(_)));
        let threads = fx.store.load_threads(None, 10, SortOrder::Asc).await.unwrap();
        assert!(threads.data.is_empty());
    }
}
