//! Validation helpers for live-session payloads.

use thiserror::Error;

use crate::dto::ws::{InboundKind, InboundMessage};

/// Reasons an inbound frame is refused before reaching the hub. The display
/// text is what the originating connection receives.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InboundRejection {
    #[error("message content must not be empty")]
    Empty,
    #[error("you exceeded the character limit ({max} characters max)")]
    TooLong { max: usize },
    #[error("a message id is required for this action")]
    MissingId,
}

/// Trim `message.content` in place and check it against the kind's constraints.
///
/// Content length is counted in characters, not bytes.
pub fn sanitize_inbound(
    message: &mut InboundMessage,
    max_chars: usize,
) -> Result<(), InboundRejection> {
    let trimmed = message.content.trim();
    if trimmed.len() != message.content.len() {
        message.content = trimmed.to_owned();
    }

    match message.event {
        InboundKind::Message | InboundKind::Edit => {
            if message.content.is_empty() {
                return Err(InboundRejection::Empty);
            }
            if message.content.chars().count() > max_chars {
                return Err(InboundRejection::TooLong { max: max_chars });
            }
        }
        InboundKind::Delete | InboundKind::Typing => {}
    }

    match message.event {
        InboundKind::Edit | InboundKind::Delete if message.id.is_none() => {
            Err(InboundRejection::MissingId)
        }
        _ => Ok(()),
    }
}
