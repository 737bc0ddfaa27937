//! Thread event stream.
//!
//! Events are the units of the `/chat` SSE stream: persisted-item events
//! (`thread.item.added` / `thread.item.done`) interleaved with ephemeral
//! update events that are never stored.

use serde::{Deserialize, Serialize};

use crate::items::{ThreadItem, ThreadMetadata};
use crate::widgets::WidgetNode;

/// One event on a thread's stream, tagged by dotted `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ThreadEvent {
    /// A new thread came into existence for this request.
    #[serde(rename = "thread.created")]
    ThreadCreated { thread: ThreadMetadata },

    /// An item was appended to the thread (persisted).
    #[serde(rename = "thread.item.added")]
    ItemAdded { item: ThreadItem },

    /// An in-place update to a previously announced item (not persisted).
    #[serde(rename = "thread.item.updated")]
    ItemUpdated { item_id: String, update: ItemUpdate },

    /// The final form of an item (persisted, replacing the added form).
    #[serde(rename = "thread.item.done")]
    ItemDone { item: ThreadItem },

    /// A terminal error for this request's stream.
    #[serde(rename = "error")]
    Error { code: String, message: String },
}

/// In-place item updates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ItemUpdate {
    /// Incremental assistant text.
    #[serde(rename = "assistant_message.text_delta")]
    TextDelta { content_index: usize, delta: String },

    /// The widget tree of an item was replaced wholesale.
    #[serde(rename = "widget.root_updated")]
    WidgetRootUpdated { widget: WidgetNode },
}
