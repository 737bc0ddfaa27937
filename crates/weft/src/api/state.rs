//! Application state shared across handlers.

use std::sync::Arc;

use crate::attachments::AttachmentService;
use crate::config::WeftConfig;
use crate::server::ChatServer;
use crate::store::ThreadStore;

#[derive(Clone)]
pub struct AppState {
    pub server: Arc<ChatServer>,
    pub store: Arc<dyn ThreadStore>,
    pub attachments: Arc<AttachmentService>,
    pub config: Arc<WeftConfig>,
}
