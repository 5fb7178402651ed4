//! API module
//!
//! Contains the HTTP request handlers and the state shared across them.

pub mod chat;

use std::sync::Arc;

use crate::chat::DeliveryMode;
use crate::invoker::GenerationBackend;

/// State shared by every request handler
///
/// The backend handle is the only shared resource; it is stateless per call
/// and safe for concurrent use.
#[derive(Clone)]
pub struct ServerState {
    /// Upstream generation backend
    pub backend: Arc<dyn GenerationBackend>,
    /// Delivery mode used for every request
    pub delivery_mode: DeliveryMode,
    /// Whether an upstream API key is configured (reported by the health probe)
    pub has_api_key: bool,
}
