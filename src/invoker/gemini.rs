//! Gemini generation backend
//!
//! Direct HTTP client for the Gemini API implementing both delivery modes:
//! `generateContent` for blocking calls and `streamGenerateContent` (SSE)
//! for token-incremental calls. Constructed once at startup and shared by
//! every request; it holds no per-conversation state.

use async_stream::stream;
use async_trait::async_trait;
use futures_util::StreamExt;
use tracing::{debug, error};

use crate::chat::normalize::{fragment_text_from_value, MessageRole};
use crate::chat::Conversation;
use crate::invoker::types::{GenerateRequest, GenerateResponse, RequestContent, RequestPart};
use crate::invoker::{GenerationBackend, GenerationResult, IncrementStream, UpstreamError};

const GEMINI_API_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Gemini API backend
pub struct GeminiBackend {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiBackend {
    /// Create a backend against the production API endpoint
    pub fn new(api_key: String, model: String) -> Self {
        Self::with_base_url(api_key, model, GEMINI_API_BASE_URL.to_string())
    }

    /// Create a backend against a custom base URL (for testing)
    pub fn with_base_url(api_key: String, model: String, base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            base_url,
        }
    }

    fn build_request(&self, conversation: &Conversation) -> GenerateRequest {
        GenerateRequest {
            system_instruction: Some(RequestContent {
                role: None,
                parts: vec![RequestPart {
                    text: conversation.system_directive().to_string(),
                }],
            }),
            contents: conversation
                .turns()
                .iter()
                .map(|turn| RequestContent {
                    role: Some(
                        match turn.role {
                            MessageRole::User => "user",
                            MessageRole::Assistant => "model",
                        }
                        .to_string(),
                    ),
                    parts: vec![RequestPart {
                        text: turn.text.clone(),
                    }],
                })
                .collect(),
        }
    }

    async fn send_request(&self, url: &str, body: &GenerateRequest) -> Result<reqwest::Response, UpstreamError> {
        if self.api_key.is_empty() {
            return Err(UpstreamError::Invocation("API key is empty".to_string()));
        }

        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                UpstreamError::Invocation(format!("Failed to send HTTP request to Gemini API: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let status_code = status.as_u16();
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error body".to_string());

            error!(
                status_code = status_code,
                error_body = %error_body,
                "Gemini API returned error status"
            );

            if status_code == 429 {
                return Err(UpstreamError::Invocation(format!(
                    "Gemini API rate limit exceeded (HTTP {}): {}",
                    status_code, error_body
                )));
            }

            return Err(UpstreamError::Invocation(format!(
                "Gemini API returned error status {}: {}",
                status_code, error_body
            )));
        }

        Ok(response)
    }
}

/// Extract the text carried by one response chunk
///
/// Empty text is a valid result here; blocking callers decide whether an
/// empty total constitutes `EmptyResponse`.
fn chunk_text(parsed: &GenerateResponse) -> Result<String, UpstreamError> {
    if let Some(feedback) = &parsed.prompt_feedback {
        if let Some(reason) = &feedback.block_reason {
            return Err(UpstreamError::Invocation(format!(
                "Gemini API blocked the prompt: {}",
                reason
            )));
        }
    }

    Ok(parsed
        .candidates
        .first()
        .and_then(|candidate| candidate.content.as_ref())
        .map(|content| {
            content
                .parts
                .iter()
                .filter_map(fragment_text_from_value)
                .collect()
        })
        .unwrap_or_default())
}

#[async_trait]
impl GenerationBackend for GeminiBackend {
    async fn invoke_blocking(
        &self,
        conversation: &Conversation,
    ) -> Result<GenerationResult, UpstreamError> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );
        let body = self.build_request(conversation);

        debug!(
            model = %self.model,
            turns = conversation.turns().len(),
            "Calling Gemini API (blocking)"
        );

        let response = self.send_request(&url, &body).await?;
        let response_body = response.text().await.map_err(|e| {
            UpstreamError::Invocation(format!(
                "Failed to read response body from Gemini API: {}",
                e
            ))
        })?;

        let parsed: GenerateResponse = serde_json::from_str(&response_body).map_err(|e| {
            UpstreamError::Invocation(format!(
                "Failed to parse JSON response from Gemini API: {}",
                e
            ))
        })?;

        let text = chunk_text(&parsed)?;
        if text.is_empty() {
            return Err(UpstreamError::EmptyResponse);
        }

        debug!(
            response_len = text.len(),
            "Successfully received response from Gemini API"
        );

        Ok(GenerationResult { text })
    }

    async fn invoke_streaming(
        &self,
        conversation: &Conversation,
    ) -> Result<IncrementStream, UpstreamError> {
        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse&key={}",
            self.base_url, self.model, self.api_key
        );
        let body = self.build_request(conversation);

        debug!(
            model = %self.model,
            turns = conversation.turns().len(),
            "Calling Gemini API (streaming)"
        );

        let response = self.send_request(&url, &body).await?;
        let mut bytes = response.bytes_stream();

        // One SSE `data: {json}` line per chunk; lines may be split across
        // network reads, so buffer until a newline is seen.
        let increments = stream! {
            let mut buffer = String::new();
            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(UpstreamError::Invocation(format!(
                            "Gemini API stream interrupted: {}",
                            e
                        )));
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(newline) = buffer.find('\n') {
                    let line = buffer[..newline].trim_end_matches('\r').to_string();
                    buffer.drain(..=newline);

                    let Some(payload) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    match serde_json::from_str::<GenerateResponse>(payload) {
                        Ok(parsed) => match chunk_text(&parsed) {
                            Ok(text) => yield Ok(text),
                            Err(e) => {
                                yield Err(e);
                                return;
                            }
                        },
                        Err(e) => {
                            yield Err(UpstreamError::Invocation(format!(
                                "Failed to parse stream chunk from Gemini API: {}",
                                e
                            )));
                            return;
                        }
                    }
                }
            }
        };

        Ok(Box::pin(increments))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::conversation::assemble;
    use crate::chat::normalize::CanonicalTurn;
    use mockito::{Matcher, Server};
    use serial_test::serial;

    fn test_conversation() -> Conversation {
        assemble(vec![CanonicalTurn {
            role: MessageRole::User,
            text: "test prompt".to_string(),
        }])
        .unwrap()
    }

    fn backend(base_url: &str) -> GeminiBackend {
        GeminiBackend::with_base_url(
            "test-key".to_string(),
            "gemini-2.5-flash".to_string(),
            base_url.to_string(),
        )
    }

    #[tokio::test]
    async fn test_invoke_blocking_empty_api_key() {
        let backend = GeminiBackend::new(String::new(), "gemini-2.5-flash".to_string());
        let result = backend.invoke_blocking(&test_conversation()).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("API key is empty"));
    }

    #[tokio::test]
    #[serial]
    async fn test_invoke_blocking_success() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/models/gemini-2.5-flash:generateContent")
            .match_query(Matcher::AllOf(vec![Matcher::UrlEncoded(
                "key".into(),
                "test-key".into(),
            )]))
            .match_header("content-type", "application/json")
            .with_status(200)
            .with_body(
                r#"{
                    "candidates": [{
                        "content": {
                            "parts": [{"text": "This is a test response"}],
                            "role": "model"
                        }
                    }]
                }"#,
            )
            .create_async()
            .await;

        let result = backend(&server.url())
            .invoke_blocking(&test_conversation())
            .await;

        mock.assert_async().await;
        assert_eq!(result.unwrap().text, "This is a test response");
    }

    #[tokio::test]
    #[serial]
    async fn test_invoke_blocking_sends_system_instruction() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/models/gemini-2.5-flash:generateContent")
            .match_query(Matcher::AllOf(vec![Matcher::UrlEncoded(
                "key".into(),
                "test-key".into(),
            )]))
            .match_body(Matcher::PartialJsonString(
                r#"{"systemInstruction":{"parts":[{"text":"You are a helpful AI assistant."}]}}"#
                    .to_string(),
            ))
            .with_status(200)
            .with_body(r#"{"candidates": [{"content": {"parts": [{"text": "ok"}]}}]}"#)
            .create_async()
            .await;

        let result = backend(&server.url())
            .invoke_blocking(&test_conversation())
            .await;

        mock.assert_async().await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    #[serial]
    async fn test_invoke_blocking_empty_candidates() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/models/gemini-2.5-flash:generateContent")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"candidates": []}"#)
            .create_async()
            .await;

        let result = backend(&server.url())
            .invoke_blocking(&test_conversation())
            .await;

        mock.assert_async().await;
        assert!(matches!(result, Err(UpstreamError::EmptyResponse)));
    }

    #[tokio::test]
    #[serial]
    async fn test_invoke_blocking_blocked_prompt() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/models/gemini-2.5-flash:generateContent")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(
                r#"{
                    "candidates": [],
                    "promptFeedback": {"blockReason": "SAFETY"}
                }"#,
            )
            .create_async()
            .await;

        let result = backend(&server.url())
            .invoke_blocking(&test_conversation())
            .await;

        mock.assert_async().await;
        let error_msg = result.unwrap_err().to_string();
        assert!(
            error_msg.contains("blocked the prompt"),
            "Error message should contain 'blocked the prompt', got: {}",
            error_msg
        );
    }

    #[tokio::test]
    #[serial]
    async fn test_invoke_blocking_rate_limit() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/models/gemini-2.5-flash:generateContent")
            .match_query(Matcher::Any)
            .with_status(429)
            .with_body(r#"{"error": "Rate limit exceeded"}"#)
            .create_async()
            .await;

        let result = backend(&server.url())
            .invoke_blocking(&test_conversation())
            .await;

        mock.assert_async().await;
        let error_msg = result.unwrap_err().to_string();
        assert!(error_msg.contains("rate limit") || error_msg.contains("429"));
    }

    #[tokio::test]
    #[serial]
    async fn test_invoke_blocking_invalid_json() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/models/gemini-2.5-flash:generateContent")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("This is not JSON")
            .create_async()
            .await;

        let result = backend(&server.url())
            .invoke_blocking(&test_conversation())
            .await;

        mock.assert_async().await;
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Failed to parse JSON"));
    }

    #[tokio::test]
    #[serial]
    async fn test_invoke_streaming_yields_increments() {
        let mut server = Server::new_async().await;
        let body = concat!(
            "data: {\"candidates\": [{\"content\": {\"parts\": [{\"text\": \"Hel\"}]}}]}\r\n",
            "\r\n",
            "data: {\"candidates\": [{\"content\": {\"parts\": [{\"text\": \"lo\"}]}}]}\r\n",
            "\r\n",
        );
        let mock = server
            .mock("POST", "/models/gemini-2.5-flash:streamGenerateContent")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("alt".into(), "sse".into()),
                Matcher::UrlEncoded("key".into(), "test-key".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(body)
            .create_async()
            .await;

        let stream = backend(&server.url())
            .invoke_streaming(&test_conversation())
            .await
            .unwrap();
        let increments: Vec<String> = stream
            .map(|increment| increment.unwrap())
            .collect::<Vec<_>>()
            .await;

        mock.assert_async().await;
        assert_eq!(increments, vec!["Hel".to_string(), "lo".to_string()]);
    }

    #[tokio::test]
    #[serial]
    async fn test_invoke_streaming_error_status() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/models/gemini-2.5-flash:streamGenerateContent")
            .match_query(Matcher::Any)
            .with_status(500)
            .with_body("upstream exploded")
            .create_async()
            .await;

        let result = backend(&server.url())
            .invoke_streaming(&test_conversation())
            .await;

        mock.assert_async().await;
        assert!(matches!(result, Err(UpstreamError::Invocation(_))));
    }

    #[tokio::test]
    #[serial]
    async fn test_invoke_streaming_malformed_chunk() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/models/gemini-2.5-flash:streamGenerateContent")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("data: not json\n\n")
            .create_async()
            .await;

        let stream = backend(&server.url())
            .invoke_streaming(&test_conversation())
            .await
            .unwrap();
        let results: Vec<Result<String, UpstreamError>> = stream.collect().await;

        mock.assert_async().await;
        assert_eq!(results.len(), 1);
        assert!(results[0].is_err());
    }
}
