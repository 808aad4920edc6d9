//! Shared envelope model and JSON codec for the realtime chat transport.
//!
//! This crate owns the wire representation exchanged between the chat client
//! and the server. Every message is a JSON object discriminated by a `type`
//! field; source references on assistant replies stay flexible
//! (`serde_json::Value`) because the server does not commit to a schema for
//! them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error returned by [`decode_envelope`].
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The raw text is not a JSON object with exactly one known `type`
    /// discriminator, or a required field is missing or has the wrong shape.
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
    /// The envelope parsed but a required field failed validation.
    #[error("invalid envelope field `{field}`: {reason}")]
    InvalidField {
        /// Name of the offending field.
        field: &'static str,
        /// Why the field was rejected.
        reason: &'static str,
    },
}

/// Kind of chat session the caller is requesting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionType {
    /// One-on-one session with the AI expert.
    AiExpert,
    /// Community room session.
    Community,
    /// Document-grounded chat session.
    Doc,
}

/// Topic category attached to a session at negotiation time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatCategory {
    /// Catch-all topic.
    #[default]
    General,
    /// Specialized medical topics.
    Specialized,
    /// Feeding and nutrition.
    Nutrition,
    /// Behavioral questions.
    Behavior,
    /// Psychological development.
    Psychology,
    /// Schooling and education.
    Education,
}

/// A single typed message on the chat wire protocol.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    /// Session establishment frame. Sent by the client with the requested
    /// category; echoed back by the server as the acknowledgment, carrying
    /// the assigned session id.
    SessionInit {
        /// Requested (or acknowledged) topic category.
        category: ChatCategory,
        /// Server-assigned session id; present only on the ack.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    /// Outbound user text.
    Chat {
        /// The user's message text.
        message: String,
    },
    /// Inbound assistant reply.
    AiResponse {
        /// Reply text; must be non-empty.
        message: String,
        /// Server-side timestamp; must be non-empty.
        timestamp: String,
        /// Opaque source references, order-preserving, schema unspecified.
        sources: Vec<Value>,
        /// Session type label the server attached, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_type: Option<String>,
    },
    /// Inbound typing indicator.
    Typing {
        /// Whether the assistant is currently composing a reply.
        is_typing: bool,
    },
    /// Inbound server-reported error.
    Error {
        /// Human-readable error description.
        error: String,
    },
    /// Keepalive frame, exchanged in both directions and absorbed before
    /// chat state is touched.
    Heartbeat,
}

/// Encode an envelope into its JSON wire text.
#[must_use]
pub fn encode_envelope(envelope: &Envelope) -> String {
    // Safety: a closed enum of plain serde variants cannot fail to
    // serialize; serde_json only errors on non-string map keys and
    // trait-object payloads, neither of which appear here.
    serde_json::to_string(envelope).unwrap_or_default()
}

/// Decode wire text into an envelope.
///
/// # Errors
///
/// Returns [`CodecError::Malformed`] for anything that does not parse as
/// exactly one known variant (unknown `type`, missing required field, wrong
/// JSON shape) and [`CodecError::InvalidField`] when a field parses but
/// fails validation. There is no partial or best-effort result.
pub fn decode_envelope(raw: &str) -> Result<Envelope, CodecError> {
    let envelope: Envelope = serde_json::from_str(raw)?;
    validate(&envelope)?;
    Ok(envelope)
}

fn validate(envelope: &Envelope) -> Result<(), CodecError> {
    match envelope {
        Envelope::AiResponse {
            message, timestamp, ..
        } => {
            if message.trim().is_empty() {
                return Err(CodecError::InvalidField {
                    field: "message",
                    reason: "must be non-empty",
                });
            }
            if timestamp.trim().is_empty() {
                return Err(CodecError::InvalidField {
                    field: "timestamp",
                    reason: "must be non-empty",
                });
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
