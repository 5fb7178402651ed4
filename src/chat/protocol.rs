//! Outbound event protocol
//!
//! Defines the frame types streamed back to chat clients and the writer that
//! serializes them. Each frame is one self-describing JSON payload behind a
//! `data: ` marker, terminated by a blank line, so a streaming client can
//! parse events incrementally without buffering the whole body.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::error;

/// Marker prefix carried by every outbound frame
pub const FRAME_MARKER: &str = "data: ";

/// Bound on in-flight frames between the bridge and the HTTP body
///
/// The awaited send on a full channel is the backpressure point: a slow
/// client throttles upstream consumption instead of growing a buffer.
pub const FRAME_CHANNEL_CAPACITY: usize = 32;

/// One event of the outbound stream protocol
///
/// A successful request emits exactly
/// `message-start, text-delta+, message-delta, message, message-stop`;
/// a mid-stream failure emits `message-start, text-delta*, error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ProtocolEvent {
    /// Opens a message; carries the freshly generated message id
    MessageStart {
        /// Unique id for the message being streamed
        id: String,
    },
    /// One increment of generated text
    TextDelta {
        /// Id of the message this delta belongs to
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        /// The text increment
        delta: String,
    },
    /// Completion marker emitted once the generation source is exhausted
    MessageDelta {
        /// Empty-content payload (no-op marker)
        delta: DeltaContent,
    },
    /// The fully accumulated message
    Message {
        /// Id of the completed message
        id: String,
        /// Concatenation of every text delta emitted for this message
        content: String,
    },
    /// Closes a successfully streamed message; nothing follows it
    MessageStop,
    /// Terminal failure frame; nothing follows it, and no stop is emitted
    Error {
        /// Human-readable diagnostic
        message: String,
    },
}

/// Content payload of a `message-delta` frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaContent {
    /// Always empty; present for client-side shape compatibility
    pub content: String,
}

/// The outbound channel rejected a write (client disconnected)
#[derive(Error, Debug)]
#[error("outbound channel closed")]
pub struct ChannelWriteFailure;

/// Serializes protocol events onto the outbound channel
///
/// One event maps to one atomic send; two events are never interleaved.
/// There is no explicit flush capability on the channel, so delivery relies
/// on the transport writing each chunk as it arrives.
pub struct FrameWriter {
    tx: mpsc::Sender<String>,
}

impl FrameWriter {
    /// Create a writer over an existing frame channel sender
    pub fn new(tx: mpsc::Sender<String>) -> Self {
        Self { tx }
    }

    /// Create a bounded frame channel and a writer over its send side
    pub fn channel() -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        (Self::new(tx), rx)
    }

    /// Write one event as a single frame
    ///
    /// Blocks when the channel is full, which is what propagates client
    /// backpressure to the bridge's pull loop.
    pub async fn write(&self, event: &ProtocolEvent) -> Result<(), ChannelWriteFailure> {
        let payload = serde_json::to_string(event).map_err(|e| {
            error!(error = %e, "Failed to serialize protocol event");
            ChannelWriteFailure
        })?;
        let frame = format!("{}{}\n\n", FRAME_MARKER, payload);
        self.tx.send(frame).await.map_err(|_| ChannelWriteFailure)
    }
}
