//! Chat API endpoint
//!
//! Handles `POST /api/chat`: validates the inbound payload, normalizes it
//! into a conversation, and hands it to a stream bridge whose frames become
//! the chunked response body. Validation failures are reported as structured
//! JSON errors before any frame is written; once streaming starts, failures
//! are framed inside the stream instead.

use std::convert::Infallible;

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::Response,
    Json,
};
use serde::Deserialize;
use serde_json::Value;
use tokio_stream::{wrappers::ReceiverStream, StreamExt};
use tracing::{info, warn};

use crate::api::ServerState;
use crate::chat::{assemble, normalize, FrameWriter, RawInboundMessage, StreamBridge};
use crate::error::AppError;

/// Request body for the chat endpoint
///
/// `messages` is kept as a raw value so shape violations produce the
/// endpoint's own 400 body rather than an extractor rejection.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    /// Client-supplied conversation history
    #[serde(default)]
    pub messages: Option<Value>,
}

/// POST /api/chat - Stream a model answer for the supplied conversation
pub async fn chat(
    State(state): State<ServerState>,
    Json(request): Json<ChatRequest>,
) -> Result<Response, AppError> {
    let messages = match request.messages {
        Some(Value::Array(messages)) => messages,
        _ => {
            return Err(AppError::InvalidInput(
                "Invalid request: messages must be an array".to_string(),
            ))
        }
    };

    info!(message_count = messages.len(), "Received chat request");

    let raw_messages: Vec<RawInboundMessage> = messages
        .into_iter()
        .filter_map(|value| match serde_json::from_value(value) {
            Ok(message) => Some(message),
            Err(e) => {
                warn!(error = %e, "Skipping undecodable inbound message");
                None
            }
        })
        .collect();

    let turns = normalize(&raw_messages);
    let conversation = assemble(turns)?;

    let (writer, rx) = FrameWriter::channel();
    let bridge = StreamBridge::new(
        state.backend.clone(),
        state.delivery_mode,
        conversation,
        writer,
    );
    tokio::spawn(bridge.run());

    let body_stream = ReceiverStream::new(rx).map(Ok::<_, Infallible>);

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(Body::from_stream(body_stream))
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to build stream response: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{Conversation, DeliveryMode, ProtocolEvent};
    use crate::invoker::{
        GenerationBackend, GenerationResult, IncrementStream, UpstreamError,
    };
    use async_trait::async_trait;
    use axum::response::IntoResponse;
    use serde_json::json;
    use std::sync::Arc;

    struct FixedBackend {
        reply: String,
    }

    #[async_trait]
    impl GenerationBackend for FixedBackend {
        async fn invoke_blocking(
            &self,
            _conversation: &Conversation,
        ) -> Result<GenerationResult, UpstreamError> {
            Ok(GenerationResult {
                text: self.reply.clone(),
            })
        }

        async fn invoke_streaming(
            &self,
            _conversation: &Conversation,
        ) -> Result<IncrementStream, UpstreamError> {
            let reply = self.reply.clone();
            Ok(Box::pin(async_stream::stream! {
                yield Ok::<String, UpstreamError>(reply);
            }))
        }
    }

    fn test_state(mode: DeliveryMode) -> ServerState {
        ServerState {
            backend: Arc::new(FixedBackend {
                reply: "Hello!".to_string(),
            }),
            delivery_mode: mode,
            has_api_key: true,
        }
    }

    async fn body_events(response: Response) -> Vec<ProtocolEvent> {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = String::from_utf8(bytes.to_vec()).unwrap();
        body.split("\n\n")
            .filter(|frame| !frame.is_empty())
            .map(|frame| {
                serde_json::from_str(frame.trim_start_matches("data: "))
                    .expect("frame should parse as a protocol event")
            })
            .collect()
    }

    #[tokio::test]
    async fn test_chat_rejects_non_array_messages() {
        let request = ChatRequest {
            messages: Some(json!("not-an-array")),
        };
        let result = chat(State(test_state(DeliveryMode::Batch)), Json(request)).await;
        match result {
            Err(AppError::InvalidInput(message)) => {
                assert_eq!(message, "Invalid request: messages must be an array");
            }
            other => panic!("Expected InvalidInput, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_chat_rejects_missing_messages() {
        let request = ChatRequest { messages: None };
        let result = chat(State(test_state(DeliveryMode::Batch)), Json(request)).await;
        assert!(matches!(result, Err(AppError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_chat_rejects_empty_conversation() {
        let request = ChatRequest {
            messages: Some(json!([{"role": "user", "content": "   "}])),
        };
        let result = chat(State(test_state(DeliveryMode::Batch)), Json(request)).await;
        assert!(matches!(result, Err(AppError::EmptyConversation)));
    }

    #[tokio::test]
    async fn test_chat_streams_full_lifecycle() {
        let request = ChatRequest {
            messages: Some(json!([{"role": "user", "content": "Hi"}])),
        };
        let response = chat(State(test_state(DeliveryMode::Batch)), Json(request))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/event-stream"
        );

        let events = body_events(response).await;
        let types: Vec<&str> = events
            .iter()
            .map(|event| match event {
                ProtocolEvent::MessageStart { .. } => "message-start",
                ProtocolEvent::TextDelta { .. } => "text-delta",
                ProtocolEvent::MessageDelta { .. } => "message-delta",
                ProtocolEvent::Message { .. } => "message",
                ProtocolEvent::MessageStop => "message-stop",
                ProtocolEvent::Error { .. } => "error",
            })
            .collect();
        assert_eq!(
            types,
            vec![
                "message-start",
                "text-delta",
                "message-delta",
                "message",
                "message-stop"
            ]
        );
        assert!(matches!(
            &events[1],
            ProtocolEvent::TextDelta { delta, .. } if delta == "Hello!"
        ));
        assert!(matches!(
            &events[3],
            ProtocolEvent::Message { content, .. } if content == "Hello!"
        ));
    }

    #[tokio::test]
    async fn test_chat_error_body_shape() {
        let request = ChatRequest {
            messages: Some(json!({})),
        };
        let response = chat(State(test_state(DeliveryMode::Batch)), Json(request))
            .await
            .unwrap_err()
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "Invalid request: messages must be an array");
    }
}
