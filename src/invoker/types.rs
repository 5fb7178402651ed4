//! Gemini API wire types
//!
//! Structs that mirror the Gemini API JSON request/response format. Response
//! parts are kept as raw JSON values so the generic completion-normalization
//! rules apply to whatever shape the API returns.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request structure for the Gemini API
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    /// Optional system instruction prefixed to the conversation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<RequestContent>,
    /// Ordered conversation contents
    pub contents: Vec<RequestContent>,
}

/// One role-tagged content item of a request
#[derive(Serialize, Debug)]
pub struct RequestContent {
    /// Role of this content ("user" or "model"); absent on system instructions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Content parts (one text part per turn)
    pub parts: Vec<RequestPart>,
}

/// A single text part of a request
#[derive(Serialize, Debug)]
pub struct RequestPart {
    /// The text content
    pub text: String,
}

/// Top-level Gemini API response (full or streamed chunk)
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    /// Candidate answers from the model
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    /// Optional feedback about the prompt (e.g., if it was blocked)
    #[serde(default)]
    pub prompt_feedback: Option<PromptFeedback>,
}

/// A single candidate response from the model
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    /// The content of this candidate; may be absent on terminal stream chunks
    #[serde(default)]
    pub content: Option<Content>,
    /// Why the model stopped generating (if applicable)
    #[serde(default)]
    #[allow(dead_code)] // Part of API response format, may be used in future
    pub finish_reason: Option<String>,
}

/// Content structure containing parts of the response
#[derive(Deserialize, Debug)]
pub struct Content {
    /// Content parts, kept untyped for generic text extraction
    #[serde(default)]
    pub parts: Vec<Value>,
}

/// Feedback about the prompt (e.g., if it was blocked)
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PromptFeedback {
    /// Reason the prompt was blocked (if applicable)
    #[serde(default)]
    pub block_reason: Option<String>,
}
