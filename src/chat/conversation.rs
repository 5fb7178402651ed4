//! Conversation assembly
//!
//! Builds the validated conversation handed to the generation backend. The
//! assembler owns the single emptiness check: turns whose trimmed text is
//! empty are dropped here, and a conversation with zero remaining turns is
//! rejected before any upstream call is made.

use crate::chat::normalize::CanonicalTurn;
use crate::error::AppError;

/// Fixed system directive prepended to every generation request
///
/// Not stored in the turn sequence and not counted toward the emptiness
/// check.
pub const SYSTEM_DIRECTIVE: &str = "You are a helpful AI assistant.";

/// A validated, ordered conversation ready for generation
#[derive(Debug, Clone)]
pub struct Conversation {
    turns: Vec<CanonicalTurn>,
}

impl Conversation {
    /// The dialogue turns, in original client order
    pub fn turns(&self) -> &[CanonicalTurn] {
        &self.turns
    }

    /// The fixed system directive that prefixes this conversation
    pub fn system_directive(&self) -> &'static str {
        SYSTEM_DIRECTIVE
    }
}

/// Assemble canonical turns into a validated conversation
///
/// Drops turns with no text after trimming and preserves the relative order
/// of the rest. Fails with [`AppError::EmptyConversation`] when nothing
/// usable remains.
pub fn assemble(turns: Vec<CanonicalTurn>) -> Result<Conversation, AppError> {
    let turns: Vec<CanonicalTurn> = turns
        .into_iter()
        .filter(|turn| !turn.text.trim().is_empty())
        .collect();

    if turns.is_empty() {
        return Err(AppError::EmptyConversation);
    }

    Ok(Conversation { turns })
}
