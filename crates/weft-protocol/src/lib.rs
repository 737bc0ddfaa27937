//! Wire protocol types for the weft chat service.
//!
//! This crate defines the formats spoken on the client boundary:
//!
//! ```text
//! UI client <--[requests / SSE thread events]--> weft service
//! ```
//!
//! ## Design Principles
//!
//! 1. **Items are persistent, events are ephemeral.** Thread items are stored
//!    by the service; events drive the UI but widget re-renders are never
//!    persisted as conversation content.
//! 2. **The item union is closed.** Every consumer matches exhaustively over
//!    [`items::ThreadItem`]; adding a variant is a compile-visible change.
//! 3. **Widgets are data.** A widget is a renderable node tree plus a
//!    plain-text fallback, not markup.

pub mod events;
pub mod items;
pub mod requests;
pub mod widgets;

pub use events::{ItemUpdate, ThreadEvent};
pub use items::{
    Attachment, AttachmentKind, Page, SortOrder, ThreadItem, ThreadMetadata, ToolCallStatus,
    generate_attachment_id, generate_item_id,
};
pub use requests::WeftRequest;
pub use widgets::{ActionConfig, WidgetNode};
