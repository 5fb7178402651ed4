//! Stream bridge
//!
//! Drives the generation invoker and re-emits its output as the ordered
//! event protocol. The lifecycle is a fixed state machine:
//! `Idle -> Started -> Streaming -> Completing -> Stopped`, with `Failed`
//! reachable from any state once `message-start` has gone out. Both delivery
//! modes run through the same machine; only the delta-production step
//! differs.

use std::sync::Arc;

use futures_util::StreamExt;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::chat::protocol::{DeltaContent, FrameWriter, ProtocolEvent};
use crate::chat::Conversation;
use crate::invoker::{GenerationBackend, UpstreamError};

/// Fixed reply substituted when the upstream answer contains no text
pub const FALLBACK_REPLY: &str =
    "I'm sorry, I wasn't able to generate a response. Please try again.";

/// How generated text is pulled from the backend
///
/// Both modes produce the identical external event shape; batch sends the
/// whole answer as one delta, incremental sends one delta per token chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// One blocking call, one `text-delta` carrying the entire answer
    Batch,
    /// A live subscription, one `text-delta` per non-empty increment
    Incremental,
}

/// Lifecycle states, logged on every transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BridgeState {
    Idle,
    Started,
    Streaming,
    Completing,
    Stopped,
    Failed,
}

/// How a streaming phase ended
enum StreamOutcome {
    /// Source exhausted; the accumulated text is the full answer
    Complete,
    /// Upstream failed after `message-start`; an error frame must follow
    Failed(UpstreamError),
    /// The client went away; stop pulling and emit nothing further
    Disconnected,
}

/// One request's bridge between the generation backend and the frame channel
///
/// Created fresh per request; holds no state shared with other requests.
pub struct StreamBridge {
    backend: Arc<dyn GenerationBackend>,
    mode: DeliveryMode,
    conversation: Conversation,
    writer: FrameWriter,
}

impl StreamBridge {
    /// Create a bridge for one validated conversation
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        mode: DeliveryMode,
        conversation: Conversation,
        writer: FrameWriter,
    ) -> Self {
        Self {
            backend,
            mode,
            conversation,
            writer,
        }
    }

    /// Run the request to completion, consuming the bridge
    ///
    /// The frame channel closes when this returns, which ends the HTTP body.
    pub async fn run(self) {
        let message_id = Uuid::new_v4().to_string();
        let mut state = BridgeState::Idle;

        if self
            .writer
            .write(&ProtocolEvent::MessageStart {
                id: message_id.clone(),
            })
            .await
            .is_err()
        {
            warn!(message_id = %message_id, "Client disconnected before first frame");
            return;
        }
        state = transition(state, BridgeState::Started, &message_id);
        state = transition(state, BridgeState::Streaming, &message_id);

        let mut accumulated = String::new();
        let outcome = match self.mode {
            DeliveryMode::Batch => self.stream_batch(&message_id, &mut accumulated).await,
            DeliveryMode::Incremental => {
                self.stream_incremental(&message_id, &mut accumulated).await
            }
        };

        match outcome {
            StreamOutcome::Complete => {
                state = transition(state, BridgeState::Completing, &message_id);
                let completion = [
                    ProtocolEvent::MessageDelta {
                        delta: DeltaContent {
                            content: String::new(),
                        },
                    },
                    ProtocolEvent::Message {
                        id: message_id.clone(),
                        content: accumulated.clone(),
                    },
                    ProtocolEvent::MessageStop,
                ];
                for event in &completion {
                    if self.writer.write(event).await.is_err() {
                        warn!(message_id = %message_id, "Client disconnected during completion");
                        return;
                    }
                }
                transition(state, BridgeState::Stopped, &message_id);
                debug!(
                    message_id = %message_id,
                    content_len = accumulated.len(),
                    "Message streamed to completion"
                );
            }
            StreamOutcome::Failed(e) => {
                transition(state, BridgeState::Failed, &message_id);
                error!(
                    message_id = %message_id,
                    error = %e,
                    "Upstream generation failed mid-stream"
                );
                // No message-stop after an error frame.
                if self
                    .writer
                    .write(&ProtocolEvent::Error {
                        message: e.to_string(),
                    })
                    .await
                    .is_err()
                {
                    warn!(message_id = %message_id, "Client disconnected before error frame");
                }
            }
            StreamOutcome::Disconnected => {
                warn!(
                    message_id = %message_id,
                    delivered_len = accumulated.len(),
                    "Client disconnected mid-stream, abandoning request"
                );
            }
        }
    }

    async fn stream_batch(&self, message_id: &str, accumulated: &mut String) -> StreamOutcome {
        let text = match self.backend.invoke_blocking(&self.conversation).await {
            Ok(result) => result.text,
            Err(UpstreamError::EmptyResponse) => {
                warn!(message_id = %message_id, "Upstream returned no text, substituting fallback reply");
                FALLBACK_REPLY.to_string()
            }
            Err(e) => return StreamOutcome::Failed(e),
        };

        accumulated.push_str(&text);
        match self
            .writer
            .write(&ProtocolEvent::TextDelta {
                id: Some(message_id.to_string()),
                delta: text,
            })
            .await
        {
            Ok(()) => StreamOutcome::Complete,
            Err(_) => StreamOutcome::Disconnected,
        }
    }

    async fn stream_incremental(
        &self,
        message_id: &str,
        accumulated: &mut String,
    ) -> StreamOutcome {
        let mut increments = match self.backend.invoke_streaming(&self.conversation).await {
            Ok(stream) => stream,
            Err(e) => return StreamOutcome::Failed(e),
        };

        // Pull-based loop: one increment awaited, one frame written. The
        // awaited write is the backpressure point; dropping the stream on
        // disconnect releases the upstream subscription.
        while let Some(increment) = increments.next().await {
            let increment = match increment {
                Ok(increment) => increment,
                Err(e) => return StreamOutcome::Failed(e),
            };
            if increment.is_empty() {
                continue;
            }
            accumulated.push_str(&increment);
            if self
                .writer
                .write(&ProtocolEvent::TextDelta {
                    id: Some(message_id.to_string()),
                    delta: increment,
                })
                .await
                .is_err()
            {
                return StreamOutcome::Disconnected;
            }
        }

        if accumulated.is_empty() {
            warn!(message_id = %message_id, "Stream ended with no text, substituting fallback reply");
            accumulated.push_str(FALLBACK_REPLY);
            if self
                .writer
                .write(&ProtocolEvent::TextDelta {
                    id: Some(message_id.to_string()),
                    delta: FALLBACK_REPLY.to_string(),
                })
                .await
                .is_err()
            {
                return StreamOutcome::Disconnected;
            }
        }

        StreamOutcome::Complete
    }
}

fn transition(from: BridgeState, to: BridgeState, message_id: &str) -> BridgeState {
    debug!(
        message_id = %message_id,
        from = ?from,
        to = ?to,
        "Bridge state transition"
    );
    to
}
