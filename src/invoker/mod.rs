//! Generation invoker
//!
//! Wraps the upstream language-model backend behind one trait with two
//! delivery modes: a blocking call that resolves the full answer, and a
//! streaming call that yields partial-text increments. The bridge drives
//! either mode through the same state machine, so backends plug in without
//! touching the framing logic.

pub mod gemini;
pub mod types;

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use serde_json::Value;
use thiserror::Error;

use crate::chat::normalize::fragment_text_from_value;
use crate::chat::Conversation;

pub use gemini::GeminiBackend;

/// Errors from the upstream generation backend
#[derive(Error, Debug)]
pub enum UpstreamError {
    /// The backend call failed or the subscription was interrupted
    #[error("Upstream invocation failed: {0}")]
    Invocation(String),

    /// The backend answered but no text could be extracted
    ///
    /// Non-fatal: callers substitute a fixed apology string instead of
    /// failing the request.
    #[error("Upstream returned an empty response")]
    EmptyResponse,
}

/// The fully resolved answer text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationResult {
    /// Complete answer; in streaming mode, the concatenation of every
    /// increment delivered to the client
    pub text: String,
}

/// A lazy, finite, non-restartable sequence of partial-text increments
///
/// Increments may be empty strings (consumers skip them); the full answer is
/// the ordered concatenation of all increments. Output already yielded
/// before an interruption remains valid.
pub type IncrementStream = Pin<Box<dyn Stream<Item = Result<String, UpstreamError>> + Send>>;

/// An upstream generation backend
///
/// Implementations hold no per-conversation state and must be safe for
/// concurrent use by simultaneous requests.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Call the backend once and wait for the complete answer
    async fn invoke_blocking(
        &self,
        conversation: &Conversation,
    ) -> Result<GenerationResult, UpstreamError>;

    /// Open a live subscription yielding one increment per partial chunk
    async fn invoke_streaming(
        &self,
        conversation: &Conversation,
    ) -> Result<IncrementStream, UpstreamError>;
}

/// Normalize an upstream completion payload into plain text
///
/// Applied in order: a plain string passes through; a `content` field is
/// flattened (string, or array of fragments per the inbound fragment rules);
/// a `text` field is used directly; anything else falls back to its JSON
/// serialization.
pub fn normalize_completion(value: &Value) -> String {
    if let Value::String(text) = value {
        return text.clone();
    }
    if let Some(content) = value.get("content") {
        return match content {
            Value::String(text) => text.clone(),
            Value::Array(elements) => elements
                .iter()
                .filter_map(fragment_text_from_value)
                .collect(),
            other => other.to_string(),
        };
    }
    if let Some(Value::String(text)) = value.get("text") {
        return text.clone();
    }
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_string_passthrough() {
        assert_eq!(normalize_completion(&json!("Hello!")), "Hello!");
    }

    #[test]
    fn test_string_content_field() {
        assert_eq!(normalize_completion(&json!({"content": "Hi"})), "Hi");
    }

    #[test]
    fn test_array_content_flattened() {
        let value = json!({"content": [
            {"type": "text", "text": "Hel"},
            {"type": "image", "url": "x"},
            {"type": "text", "text": "lo"},
        ]});
        assert_eq!(normalize_completion(&value), "Hello");
    }

    #[test]
    fn test_text_field_fallback() {
        assert_eq!(normalize_completion(&json!({"text": "fallback"})), "fallback");
    }

    #[test]
    fn test_unknown_shape_serialized() {
        let normalized = normalize_completion(&json!({"candidates": []}));
        assert!(normalized.contains("candidates"));
    }
}
