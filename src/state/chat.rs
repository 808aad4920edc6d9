#[cfg(test)]
#[path = "chat_test.rs"]
mod chat_test;

use envelopes::Envelope;

/// Who authored a message in the log.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Text the local user sent.
    User,
    /// Text the assistant sent back.
    Assistant,
}

/// A single role-tagged entry in the message log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// Chat state visible to the caller: the accumulated message log, the
/// typing indicator, and the last surfaced error.
///
/// Mutated only by [`ChatState::apply`], [`ChatState::push_user`], and the
/// explicit clear operations, so replaying the same envelope sequence
/// always produces the same state.
#[derive(Clone, Debug, Default)]
pub struct ChatState {
    /// Ordered, append-only message log; insertion order is significant.
    pub messages: Vec<ChatMessage>,
    /// Whether the assistant is currently composing a reply.
    pub typing: bool,
    /// Last error surfaced to the caller, if any.
    pub last_error: Option<String>,
}

impl ChatState {
    /// Apply one decoded inbound envelope.
    ///
    /// `error` deliberately leaves the log and the typing flag alone so the
    /// UI can keep showing the last known values next to the error.
    pub fn apply(&mut self, envelope: &Envelope) {
        match envelope {
            Envelope::AiResponse { message, .. } => {
                self.messages.push(ChatMessage {
                    role: Role::Assistant,
                    content: message.clone(),
                });
                self.typing = false;
                self.last_error = None;
            }
            Envelope::Typing { is_typing } => {
                self.typing = *is_typing;
            }
            Envelope::Error { error } => {
                self.last_error = Some(error.clone());
            }
            // Outbound-only and keepalive variants never reach the log.
            Envelope::SessionInit { .. } | Envelope::Chat { .. } | Envelope::Heartbeat => {}
        }
    }

    /// Record outbound user text accepted by the negotiator.
    ///
    /// Appended before server acknowledgment; there is no reconciliation if
    /// the server later reports a failure for this exact message.
    pub fn push_user(&mut self, text: &str) {
        self.messages.push(ChatMessage {
            role: Role::User,
            content: text.to_owned(),
        });
    }

    /// Empty the message log. Typing flag and error are untouched.
    pub fn clear_messages(&mut self) {
        self.messages.clear();
    }

    /// Empty the message log and drop the surfaced error.
    pub fn clear_history(&mut self) {
        self.messages.clear();
        self.last_error = None;
    }
}
