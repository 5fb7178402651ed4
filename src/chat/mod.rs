//! Chat module
//!
//! Message normalization, conversation assembly, the outbound event
//! protocol, and the stream bridge that ties them together.

pub mod bridge;
pub mod conversation;
pub mod normalize;
pub mod protocol;

pub use bridge::{DeliveryMode, StreamBridge, FALLBACK_REPLY};
pub use conversation::{assemble, Conversation, SYSTEM_DIRECTIVE};
pub use normalize::{normalize, CanonicalTurn, Fragment, MessageRole, RawInboundMessage};
pub use protocol::{FrameWriter, ProtocolEvent};
