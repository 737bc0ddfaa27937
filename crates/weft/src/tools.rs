//! Client tool registry.
//!
//! Tools are executed by the UI client, not by the model runtime: the agent
//! run stops at the first call and the output arrives later as an
//! out-of-band tool-output request. Model-facing names are "safe"
//! (underscore) identifiers; thread items and the UI speak the dotted
//! capability names.

use serde_json::{Value, json};

use crate::agent::ToolSpec;

/// Dotted name of the screenshot capability. Only the most recent completed
/// call of this tool is re-inlined as an image on later turns.
pub const SCREENSHOT_TOOL: &str = "sandbox.desktop.screenshot";

/// `(safe, dotted)` name pairs for every client tool.
pub const TOOL_NAME_MAP: &[(&str, &str)] = &[
    ("sandbox_desktop_start", "sandbox.desktop.start"),
    ("sandbox_desktop_stop", "sandbox.desktop.stop"),
    ("sandbox_desktop_set_timeout", "sandbox.desktop.setTimeout"),
    ("sandbox_python_run", "sandbox.python.run"),
    ("sandbox_desktop_click", "sandbox.desktop.click"),
    ("sandbox_desktop_type", "sandbox.desktop.type"),
    ("sandbox_desktop_press", "sandbox.desktop.press"),
    ("sandbox_desktop_wait", "sandbox.desktop.wait"),
    ("sandbox_desktop_scroll", "sandbox.desktop.scroll"),
    ("sandbox_desktop_move_mouse", "sandbox.desktop.moveMouse"),
    ("sandbox_desktop_drag", "sandbox.desktop.drag"),
    ("sandbox_desktop_screenshot", "sandbox.desktop.screenshot"),
    ("ui_open_tab", "ui.openTab"),
    ("ui_notify", "ui.notify"),
    ("ui_open_desktop_panel", "ui.openDesktopPanel"),
    ("ui_open_python_panel", "ui.openPythonPanel"),
];

pub fn safe_to_dotted(safe: &str) -> Option<&'static str> {
    TOOL_NAME_MAP
        .iter()
        .find(|(s, _)| *s == safe)
        .map(|(_, d)| *d)
}

pub fn dotted_to_safe(dotted: &str) -> Option<&'static str> {
    TOOL_NAME_MAP
        .iter()
        .find(|(_, d)| *d == dotted)
        .map(|(s, _)| *s)
}

/// Safe names of every client tool; the agent run stops at all of them.
pub fn stop_at_tool_names() -> Vec<String> {
    TOOL_NAME_MAP
        .iter()
        .map(|(safe, _)| (*safe).to_string())
        .collect()
}

fn spec(name: &str, description: &str, properties: Value, required: &[&str]) -> ToolSpec {
    ToolSpec {
        name: name.to_string(),
        description: description.to_string(),
        parameters: json!({
            "type": "object",
            "properties": properties,
            "required": required,
        }),
    }
}

/// Tool definitions handed to the model runtime.
pub fn agent_tools() -> Vec<ToolSpec> {
    let thread_id = json!({"type": "string", "description": "Target thread; defaults to the current one"});
    vec![
        spec(
            "sandbox_desktop_start",
            "Open a sandboxed desktop for this thread",
            json!({
                "threadId": thread_id,
                "viewOnly": {"type": "boolean"},
                "requireAuth": {"type": "boolean"},
            }),
            &[],
        ),
        spec(
            "sandbox_desktop_stop",
            "Stop the thread's desktop",
            json!({"threadId": thread_id}),
            &[],
        ),
        spec(
            "sandbox_desktop_set_timeout",
            "Set the desktop idle timeout",
            json!({"threadId": thread_id, "timeoutSeconds": {"type": "integer"}}),
            &["timeoutSeconds"],
        ),
        spec(
            "sandbox_python_run",
            "Run Python code in the sandbox",
            json!({
                "threadId": thread_id,
                "code": {"type": "string"},
                "timeoutSeconds": {"type": "integer"},
            }),
            &["code"],
        ),
        spec(
            "sandbox_desktop_click",
            "Click at screen coordinates",
            json!({
                "threadId": thread_id,
                "x": {"type": "integer"},
                "y": {"type": "integer"},
                "button": {"type": "string"},
                "double": {"type": "boolean"},
            }),
            &["x", "y"],
        ),
        spec(
            "sandbox_desktop_type",
            "Type text into the focused element",
            json!({
                "threadId": thread_id,
                "text": {"type": "string"},
                "chunkSize": {"type": "integer"},
                "delayInMs": {"type": "integer"},
            }),
            &["text"],
        ),
        spec(
            "sandbox_desktop_press",
            "Press a key combination",
            json!({
                "threadId": thread_id,
                "keys": {"type": "array", "items": {"type": "string"}},
            }),
            &["keys"],
        ),
        spec(
            "sandbox_desktop_wait",
            "Wait before the next desktop action",
            json!({"threadId": thread_id, "ms": {"type": "integer"}}),
            &["ms"],
        ),
        spec(
            "sandbox_desktop_scroll",
            "Scroll the desktop",
            json!({
                "threadId": thread_id,
                "direction": {"type": "string"},
                "amount": {"type": "integer"},
            }),
            &[],
        ),
        spec(
            "sandbox_desktop_move_mouse",
            "Move the mouse cursor",
            json!({
                "threadId": thread_id,
                "x": {"type": "integer"},
                "y": {"type": "integer"},
            }),
            &["x", "y"],
        ),
        spec(
            "sandbox_desktop_drag",
            "Drag from one point to another",
            json!({
                "threadId": thread_id,
                "fromX": {"type": "integer"},
                "fromY": {"type": "integer"},
                "toX": {"type": "integer"},
                "toY": {"type": "integer"},
            }),
            &["fromX", "fromY", "toX", "toY"],
        ),
        spec(
            "sandbox_desktop_screenshot",
            "Capture a screenshot of the desktop",
            json!({
                "threadId": thread_id,
                "includeCursor": {"type": "boolean"},
                "includeScreenSize": {"type": "boolean"},
            }),
            &[],
        ),
        spec(
            "ui_open_tab",
            "Switch the workspace to a panel tab",
            json!({"tab": {"type": "string"}}),
            &["tab"],
        ),
        spec(
            "ui_notify",
            "Show a status notification",
            json!({"level": {"type": "string"}, "message": {"type": "string"}}),
            &["level", "message"],
        ),
        spec(
            "ui_open_desktop_panel",
            "Open the desktop stream panel",
            json!({"streamUrl": {"type": "string"}, "viewOnly": {"type": "boolean"}}),
            &["streamUrl"],
        ),
        spec(
            "ui_open_python_panel",
            "Open the python panel",
            json!({}),
            &[],
        ),
    ]
}
