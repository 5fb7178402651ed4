//! Message normalization
//!
//! Converts the loosely-typed UI message format sent by chat clients into a
//! canonical ordered sequence of role-tagged turns. Clients encode message
//! content in several shapes (a flat `content` string, a structured value,
//! or a `parts` array of typed fragments); every shape funnels through one
//! extraction path here so the rest of the pipeline only sees plain text.

use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

/// Role of a message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRole {
    /// Message from the user
    User,
    /// Message from the assistant/AI
    Assistant,
}

impl MessageRole {
    /// Convert the role to its string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

/// One inbound message as supplied by the client
///
/// Untrusted, arbitrary shape. Every field is optional; messages that carry
/// no role are skipped during normalization.
#[derive(Debug, Clone, Deserialize)]
pub struct RawInboundMessage {
    /// Sender role ("user", "human", "assistant", "ai", ...)
    pub role: Option<String>,
    /// Flat content: a string, an array of fragments, or any other value
    #[serde(default)]
    pub content: Option<Value>,
    /// Ordered fragment list (takes priority over `content` when non-empty)
    #[serde(default)]
    pub parts: Option<Vec<Fragment>>,
}

/// One fragment of a `parts`-style message
///
/// Closed union over the shapes clients actually send. Variant order matters
/// for untagged deserialization: the type-tagged object is tried first, then
/// a bare `{text}` object, then a plain string. Anything else falls into
/// `Other` and contributes no text.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Fragment {
    /// Type-tagged fragment, e.g. `{"type": "text", "text": "..."}`
    Tagged {
        /// Fragment type ("text" fragments carry content; others may not)
        #[serde(rename = "type")]
        kind: String,
        /// Text payload, when the fragment carries one
        #[serde(default)]
        text: Option<String>,
    },
    /// Bare object exposing only a text field: `{"text": "..."}`
    TextOnly {
        /// Text payload
        text: String,
    },
    /// Plain string fragment
    Plain(String),
    /// Any other value; contributes no text
    Other(Value),
}

impl Fragment {
    /// Extract the text carried by this fragment, if any
    pub fn text(&self) -> Option<&str> {
        match self {
            Fragment::Tagged { text, .. } => text.as_deref(),
            Fragment::TextOnly { text } => Some(text),
            Fragment::Plain(text) => Some(text),
            Fragment::Other(_) => None,
        }
    }
}

/// A normalized, role-tagged unit of conversation text
///
/// Turns with empty text are allowed out of `normalize` (rule 6 below); the
/// conversation assembler drops them before generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalTurn {
    /// Who produced this turn
    pub role: MessageRole,
    /// The turn's text content
    pub text: String,
}

/// Normalize inbound messages into canonical turns
///
/// Per message, in priority order:
/// 1. skip it entirely when no role is present;
/// 2. a non-empty `parts` array: concatenate fragment text in order;
/// 3. a string `content`: passthrough;
/// 4. an array `content`: concatenate per-element fragment text;
/// 5. any other non-null `content`: its JSON serialization;
/// 6. neither: empty text (dropped later by the assembler).
///
/// Output order equals input order after skip-filtering.
pub fn normalize(messages: &[RawInboundMessage]) -> Vec<CanonicalTurn> {
    messages
        .iter()
        .filter_map(|message| {
            let role = match message.role.as_deref() {
                Some(role) => map_role(role),
                None => {
                    warn!("Skipping inbound message without a role");
                    return None;
                }
            };
            Some(CanonicalTurn {
                role,
                text: extract_text(message),
            })
        })
        .collect()
}

/// Map a client role string onto a canonical role
///
/// Unknown roles are non-fatal: they default to `User` with a warning.
fn map_role(role: &str) -> MessageRole {
    match role {
        "user" | "human" => MessageRole::User,
        "assistant" | "ai" => MessageRole::Assistant,
        other => {
            warn!(role = %other, "Unknown message role, defaulting to user");
            MessageRole::User
        }
    }
}

fn extract_text(message: &RawInboundMessage) -> String {
    if let Some(parts) = &message.parts {
        if !parts.is_empty() {
            return parts.iter().filter_map(Fragment::text).collect();
        }
    }

    match &message.content {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(elements)) => elements
            .iter()
            .filter_map(|element| fragment_text_from_value(element))
            .collect(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

/// Apply the fragment extraction rules to a raw JSON value
///
/// Used for array-shaped `content` fields and for upstream response parts,
/// which share the fragment encoding.
pub fn fragment_text_from_value(value: &Value) -> Option<String> {
    serde_json::from_value::<Fragment>(value.clone())
        .ok()
        .and_then(|fragment| fragment.text().map(str::to_string))
}
