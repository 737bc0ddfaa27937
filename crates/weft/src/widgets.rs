//! Tool-result widget formatting.
//!
//! Pure mappings from a normalized tool payload to (a) a renderable card
//! and (b) a machine-parsable plain-text transcript for clients that cannot
//! render structured widgets.
//!
//! Field lookup is presence-based: the canonical camelCase key wins, then
//! the snake_case fallback, then the generic fallback. Falsy-but-present
//! values (`0`, `false`, `""`) are preserved, never treated as absent.

use serde_json::{Map, Value, json};

use weft_protocol::widgets::{
    ActionConfig, Badge, BoxNode, Button, Caption, Card, Col, Divider, Icon, Markdown, Padding,
    Row, Spacer, Text, WidgetNode,
};

/// The six normalized fields of a tool payload.
#[derive(Debug, Clone)]
pub struct ToolPayloadFields {
    pub tool: String,
    pub params: Option<Value>,
    pub result: Option<Value>,
    pub status: Option<String>,
    pub call_id: Option<String>,
    pub source: Option<String>,
}

fn take_field(payload: &Map<String, Value>, primary: &str, fallback: &str) -> Option<Value> {
    if payload.contains_key(primary) {
        payload.get(primary).cloned()
    } else {
        payload.get(fallback).cloned()
    }
}

fn as_display_string(value: Option<&Value>) -> Option<String> {
    match value {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) => Some(text.clone()),
        Some(other) => Some(other.to_string()),
    }
}

pub fn extract_tool_payload(payload: &Map<String, Value>) -> ToolPayloadFields {
    let tool = as_display_string(take_field(payload, "tool", "name").as_ref())
        .unwrap_or_else(|| "tool".to_string());
    ToolPayloadFields {
        tool,
        params: take_field(payload, "params", "arguments"),
        result: take_field(payload, "result", "output"),
        status: as_display_string(payload.get("status")),
        call_id: as_display_string(take_field(payload, "callId", "call_id").as_ref()),
        source: as_display_string(payload.get("source")),
    }
}

/// Normalize an arbitrary action payload into a JSON object.
pub fn sanitize_tool_payload(payload: &Value) -> Map<String, Value> {
    match payload {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other.clone());
            map
        }
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_none_or(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(entries) => !entries.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn format_tool_title(tool: &str, payload: &Map<String, Value>) -> String {
    match as_display_string(payload.get("action")) {
        Some(action) if tool.is_empty() => action,
        Some(action) => format!("{tool}.{action}"),
        None => tool.to_string(),
    }
}

fn format_time_caption(payload: &Map<String, Value>) -> Option<String> {
    let time_value = ["time", "timestamp", "created_at"]
        .iter()
        .filter_map(|key| payload.get(*key))
        .find(|value| is_truthy(value));
    let elapsed_value = ["elapsed", "elapsedMs", "duration", "durationMs"]
        .iter()
        .filter_map(|key| payload.get(*key))
        .find(|value| is_truthy(value));

    let time_text = match time_value {
        Some(Value::String(text)) if !text.trim().is_empty() => text.trim().to_string(),
        Some(Value::Number(number)) => number.to_string(),
        _ => String::new(),
    };

    let elapsed_text = match elapsed_value {
        Some(Value::Number(number)) => {
            let elapsed_ms = number.as_f64().unwrap_or(0.0);
            if elapsed_ms < 10_000.0 {
                format!("{elapsed_ms:.0}ms")
            } else {
                format!("{:.1}s", elapsed_ms / 1000.0)
            }
        }
        Some(Value::String(text)) if !text.trim().is_empty() => text.trim().to_string(),
        _ => String::new(),
    };

    match (time_text.is_empty(), elapsed_text.is_empty()) {
        (false, false) => Some(format!("{time_text} • {elapsed_text}")),
        (false, true) => Some(time_text),
        (true, false) => Some(elapsed_text),
        (true, true) => None,
    }
}

fn plain_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn format_tool_input_markdown(params: Option<&Value>) -> Option<String> {
    match params {
        Some(Value::Object(map)) => {
            if let Some(Value::String(code)) = map.get("code")
                && !code.trim().is_empty()
            {
                return Some(format!("```python\n{}\n```", code.trim_end()));
            }
            let text = Value::Object(map.clone()).to_string();
            (text != "{}").then(|| format!("```json\n{text}\n```"))
        }
        Some(value) if is_truthy(value) => Some(format!("```\n{}\n```", plain_text(value))),
        _ => None,
    }
}

fn stream_text(value: Option<&Value>) -> String {
    match value {
        Some(Value::Array(entries)) => entries.iter().map(plain_text).collect::<String>(),
        Some(Value::String(text)) => text.clone(),
        _ => String::new(),
    }
}

fn format_tool_output_markdown(result: Option<&Value>) -> Option<String> {
    match result {
        Some(Value::Object(map)) => {
            let mut lines: Vec<String> = Vec::new();
            let stdout = stream_text(map.get("stdout"));
            let stderr = stream_text(map.get("stderr"));

            if !stdout.trim().is_empty() {
                lines.push("**Stdout**".to_string());
                lines.push(format!("```\n{}\n```", stdout.trim_end()));
            }
            if !stderr.trim().is_empty() {
                lines.push("**Stderr**".to_string());
                lines.push(format!("```\n{}\n```", stderr.trim_end()));
            }
            if let Some(error) = map.get("error").filter(|error| is_truthy(error)) {
                lines.push("**Error**".to_string());
                lines.push(format!("```json\n{error}\n```"));
            }

            (!lines.is_empty()).then(|| lines.join("\n"))
        }
        Some(value) if !value.is_null() => Some(format!("```json\n{value}\n```")),
        _ => None,
    }
}

fn format_tool_detail_sections(payload: &Map<String, Value>) -> Vec<String> {
    let fields = extract_tool_payload(payload);
    let mut lines: Vec<String> = Vec::new();

    match fields.params.as_ref() {
        Some(Value::Object(map)) => {
            if let Some(Value::String(code)) = map.get("code")
                && !code.trim().is_empty()
            {
                lines.push("```python".to_string());
                lines.push(code.trim_end().to_string());
                lines.push("```".to_string());
            } else {
                let text = Value::Object(map.clone()).to_string();
                if text != "{}" {
                    lines.push("Params:".to_string());
                    lines.push("```json".to_string());
                    lines.push(text);
                    lines.push("```".to_string());
                }
            }
        }
        Some(value) if is_truthy(value) => {
            lines.push("Params:".to_string());
            lines.push("```".to_string());
            lines.push(plain_text(value));
            lines.push("```".to_string());
        }
        _ => {}
    }

    match fields.result.as_ref() {
        Some(Value::Object(map)) => {
            let stdout = stream_text(map.get("stdout"));
            let stderr = stream_text(map.get("stderr"));

            if !stdout.trim().is_empty() {
                lines.push("Stdout:".to_string());
                lines.push("```".to_string());
                lines.push(stdout.trim_end().to_string());
                lines.push("```".to_string());
            }
            if !stderr.trim().is_empty() {
                lines.push("Stderr:".to_string());
                lines.push("```".to_string());
                lines.push(stderr.trim_end().to_string());
                lines.push("```".to_string());
            }
            if let Some(error) = map.get("error").filter(|error| is_truthy(error)) {
                lines.push("Error:".to_string());
                lines.push("```".to_string());
                lines.push(error.to_string());
                lines.push("```".to_string());
            }
        }
        Some(value) if !value.is_null() => {
            lines.push("Result:".to_string());
            lines.push("```".to_string());
            lines.push(value.to_string());
            lines.push("```".to_string());
        }
        _ => {}
    }

    lines
}

/// Plain-text transcript of a tool result: machine-parsable `key:value`
/// header lines, a blank line, then the detail blocks.
pub fn format_tool_result_message(payload: &Map<String, Value>) -> String {
    let fields = extract_tool_payload(payload);
    let mut lines = vec!["type:tool".to_string(), format!("tool:{}", fields.tool)];
    if let Some(status) = &fields.status {
        lines.push(format!("status:{status}"));
    }
    if let Some(call_id) = &fields.call_id {
        lines.push(format!("call_id:{call_id}"));
    }
    if let Some(source) = &fields.source {
        lines.push(format!("source:{source}"));
    }

    let detail_lines = format_tool_detail_sections(payload);
    if !detail_lines.is_empty() {
        lines.push(String::new());
        lines.extend(detail_lines);
    }

    lines.join("\n").trim().to_string()
}

fn status_badge_color(status: &str) -> &'static str {
    match status {
        "success" => "success",
        "error" | "failed" => "danger",
        "running" | "pending" => "warning",
        _ => "secondary",
    }
}

/// Build the tool-result card.
pub fn build_tool_widget(payload: &Map<String, Value>, expanded: bool) -> WidgetNode {
    let fields = extract_tool_payload(payload);
    let tool_title = format_tool_title(&fields.tool, payload);
    let status_value = fields.status.clone().unwrap_or_else(|| {
        let has_result = fields.result.as_ref().is_some_and(|value| !value.is_null());
        if has_result { "unknown" } else { "running" }.to_string()
    });

    let toggle_label = if expanded { "Collapse" } else { "Details" };
    let toggle_action = ActionConfig {
        action_type: "agent.tool.toggle".to_string(),
        payload: json!({
            "id": fields.call_id.clone().unwrap_or_else(|| fields.tool.clone()),
            "expanded": !expanded,
            "toolPayload": Value::Object(payload.clone()),
        }),
    };

    let mut header_children = vec![
        WidgetNode::Box(BoxNode {
            children: vec![WidgetNode::Icon(Icon {
                name: "square-code".to_string(),
                size: Some("lg".to_string()),
            })],
            background: Some("alpha-10".to_string()),
            radius: Some("sm".to_string()),
            padding: Some(Padding::Uniform(1.5)),
        }),
        WidgetNode::Text(Text {
            value: tool_title,
            size: Some("sm".to_string()),
            weight: Some("semibold".to_string()),
            max_lines: Some(1),
            truncate: Some(true),
            ..Default::default()
        }),
        WidgetNode::Spacer(Spacer {}),
    ];
    if let Some(time_caption) = format_time_caption(payload) {
        header_children.push(WidgetNode::Caption(Caption {
            value: time_caption,
        }));
    }
    header_children.push(WidgetNode::Badge(Badge {
        label: status_value.clone(),
        color: Some(status_badge_color(&status_value).to_string()),
    }));
    header_children.push(WidgetNode::Button(Button {
        label: toggle_label.to_string(),
        variant: Some("outline".to_string()),
        size: Some("xs".to_string()),
        on_click_action: Some(toggle_action),
    }));

    let header = WidgetNode::Row(Row {
        children: header_children,
        gap: Some(3.0),
        align: Some("center".to_string()),
        wrap: Some("nowrap".to_string()),
        width: Some("100%".to_string()),
    });

    let mut children = vec![header];
    if expanded {
        let input_markdown = format_tool_input_markdown(fields.params.as_ref());
        let output_markdown = format_tool_output_markdown(fields.result.as_ref());
        let output_placeholder = match status_value.as_str() {
            "running" | "pending" => "Running…",
            _ => "No output yet",
        };

        let mut detail_children = vec![
            WidgetNode::Divider(Divider { spacing: Some(2.0) }),
            WidgetNode::Caption(Caption {
                value: "Input".to_string(),
            }),
        ];
        detail_children.push(match input_markdown {
            Some(markdown) => WidgetNode::Markdown(Markdown { value: markdown }),
            None => WidgetNode::Text(Text {
                value: "(no input)".to_string(),
                size: Some("sm".to_string()),
                color: Some("secondary".to_string()),
                ..Default::default()
            }),
        });
        detail_children.push(WidgetNode::Caption(Caption {
            value: "Output".to_string(),
        }));
        detail_children.push(match output_markdown {
            Some(markdown) => WidgetNode::Markdown(Markdown { value: markdown }),
            None => WidgetNode::Text(Text {
                value: output_placeholder.to_string(),
                size: Some("sm".to_string()),
                color: Some("secondary".to_string()),
                ..Default::default()
            }),
        });

        children.push(WidgetNode::Col(Col {
            children: detail_children,
            gap: Some(2.0),
            width: Some("100%".to_string()),
            padding: Some(Padding::top(2.0)),
        }));
    }

    WidgetNode::Card(Card {
        children,
        padding: Some(Padding::Uniform(6.0)),
        background: Some("surface".to_string()),
        size: Some("full".to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn falsy_results_are_preserved() {
        for (raw, rendered) in [(json!(0), "0"), (json!(false), "false"), (json!(""), "\"\"")] {
            let fields = extract_tool_payload(&payload(json!({"tool": "calc", "result": raw})));
            assert_eq!(fields.result, Some(raw.clone()), "result {raw} lost");

            let message =
                format_tool_result_message(&payload(json!({"tool": "calc", "result": raw})));
            assert!(
                message.contains(&format!("Result:\n```\n{rendered}\n```")),
                "transcript for {raw}: {message}"
            );
        }
    }

    #[test]
    fn canonical_keys_take_precedence() {
        let fields = extract_tool_payload(&payload(json!({
            "tool": "primary",
            "name": "secondary",
            "callId": "cid-1",
            "call_id": "cid-2",
        })));
        assert_eq!(fields.tool, "primary");
        assert_eq!(fields.call_id.as_deref(), Some("cid-1"));
    }

    #[test]
    fn snake_case_fallbacks_apply() {
        let fields = extract_tool_payload(&payload(json!({
            "name": "my_tool",
            "arguments": {"x": 1},
            "output": 42,
            "call_id": "cid-3",
        })));
        assert_eq!(fields.tool, "my_tool");
        assert_eq!(fields.params, Some(json!({"x": 1})));
        assert_eq!(fields.result, Some(json!(42)));
        assert_eq!(fields.call_id.as_deref(), Some("cid-3"));
    }

    #[test]
    fn missing_tool_falls_back_to_generic_name() {
        let fields = extract_tool_payload(&payload(json!({"result": 1})));
        assert_eq!(fields.tool, "tool");
    }

    #[test]
    fn transcript_header_is_machine_parsable() {
        let message = format_tool_result_message(&payload(json!({
            "tool": "sandbox.python.run",
            "status": "success",
            "callId": "c1",
            "source": "weft",
            "result": {"stdout": "42\n"},
        })));
        let lines: Vec<&str> = message.lines().collect();
        assert_eq!(lines[0], "type:tool");
        assert_eq!(lines[1], "tool:sandbox.python.run");
        assert_eq!(lines[2], "status:success");
        assert_eq!(lines[3], "call_id:c1");
        assert_eq!(lines[4], "source:weft");
        assert_eq!(lines[5], "");
        assert!(message.contains("Stdout:\n```\n42\n```"));
    }

    #[test]
    fn code_params_render_as_python_block() {
        let message = format_tool_result_message(&payload(json!({
            "tool": "sandbox.python.run",
            "params": {"code": "print(1)\n"},
        })));
        assert!(message.contains("```python\nprint(1)\n```"));
        assert!(!message.contains("Params:"));
    }

    #[test]
    fn stdout_stderr_and_error_render_as_separate_blocks() {
        let message = format_tool_result_message(&payload(json!({
            "tool": "x",
            "result": {
                "stdout": ["a", "b\n"],
                "stderr": "warning\n",
                "error": {"kind": "boom"},
            },
        })));
        assert!(message.contains("Stdout:\n```\nab\n```"));
        assert!(message.contains("Stderr:\n```\nwarning\n```"));
        assert!(message.contains("Error:\n```\n{\"kind\":\"boom\"}\n```"));
    }

    #[test]
    fn widget_header_badge_tracks_status_class() {
        for (status, color) in [
            ("success", "success"),
            ("failed", "danger"),
            ("running", "warning"),
            ("weird", "secondary"),
        ] {
            let widget =
                build_tool_widget(&payload(json!({"tool": "t", "status": status})), false);
            let value = serde_json::to_value(&widget).unwrap();
            let header = &value["children"][0]["children"];
            let badge = header
                .as_array()
                .unwrap()
                .iter()
                .find(|node| node["type"] == "badge")
                .unwrap();
            assert_eq!(badge["label"], status);
            assert_eq!(badge["color"], color);
        }
    }

    #[test]
    fn collapsed_widget_has_no_detail_column() {
        let map = payload(json!({"tool": "t", "status": "success", "result": 1}));
        let collapsed = serde_json::to_value(build_tool_widget(&map, false)).unwrap();
        assert_eq!(collapsed["children"].as_array().unwrap().len(), 1);

        let expanded = serde_json::to_value(build_tool_widget(&map, true)).unwrap();
        assert_eq!(expanded["children"].as_array().unwrap().len(), 2);
        assert_eq!(expanded["children"][1]["type"], "col");
    }

    #[test]
    fn toggle_action_carries_inverted_state_and_payload() {
        let map = payload(json!({"tool": "t", "callId": "c9"}));
        let widget = serde_json::to_value(build_tool_widget(&map, false)).unwrap();
        let header = widget["children"][0]["children"].as_array().unwrap();
        let button = header.iter().find(|node| node["type"] == "button").unwrap();
        let action = &button["onClickAction"];
        assert_eq!(action["type"], "agent.tool.toggle");
        assert_eq!(action["payload"]["id"], "c9");
        assert_eq!(action["payload"]["expanded"], true);
        assert_eq!(action["payload"]["toolPayload"]["tool"], "t");
    }

    #[test]
    fn time_caption_formats_elapsed_milliseconds() {
        assert_eq!(
            format_time_caption(&payload(json!({"elapsed": 420}))),
            Some("420ms".to_string())
        );
        assert_eq!(
            format_time_caption(&payload(json!({"elapsedMs": 12500}))),
            Some("12.5s".to_string())
        );
        assert_eq!(
            format_time_caption(&payload(json!({"time": "12:01", "duration": 80}))),
            Some("12:01 • 80ms".to_string())
        );
        assert_eq!(format_time_caption(&payload(json!({"tool": "t"}))), None);
    }
}
