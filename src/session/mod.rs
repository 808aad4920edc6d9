//! Session negotiation and event dispatch.
//!
//! ARCHITECTURE
//! ============
//! [`ChatSession`] is an IO-free state machine. The transport loop (or a
//! test) feeds it [`SessionEvent`]s in delivery order; it mutates chat
//! state through the reducer and answers with [`SessionAction`]s for the
//! socket owner to execute. There is exactly one writer at a time, so no
//! locking happens inside this module.


use std::time::{Duration, Instant};

use envelopes::{ChatCategory, CodecError, Envelope, SessionType, decode_envelope, encode_envelope};

use crate::error::ClientError;
use crate::reconnect::{ReconnectPolicy, ReconnectState};
use crate::state::chat::ChatState;

/// Caller-supplied parameters identifying what kind of chat to start.
///
/// Immutable once negotiation succeeds, except for `session_id`, which the
/// server assigns through the acknowledgment frame.
#[derive(Clone, Debug)]
pub struct SessionDescriptor {
    /// Server-assigned id; absent until negotiation succeeds.
    pub session_id: Option<String>,
    /// Kind of session being requested.
    pub session_type: SessionType,
    /// Topic category sent in the init frame.
    pub category: ChatCategory,
}

impl SessionDescriptor {
    /// Descriptor for a new, not-yet-negotiated session.
    #[must_use]
    pub fn new(session_type: SessionType, category: ChatCategory) -> Self {
        Self {
            session_id: None,
            session_type,
            category,
        }
    }
}

/// Negotiation lifecycle of the session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SessionPhase {
    /// No transport yet (initial state, and the state between reconnect
    /// attempts).
    #[default]
    Uninitialized,
    /// Transport is open and the init frame is in flight; awaiting ack.
    Negotiating,
    /// Ack received; `chat` envelopes may be sent.
    Ready,
    /// Closed by explicit caller disconnect or a clean server close.
    Ended,
    /// Terminal failure; a fresh connect is required.
    Failed,
}

/// Transport-level event fed into [`ChatSession::handle_event`].
#[derive(Clone, Debug)]
pub enum SessionEvent {
    /// The physical socket finished connecting.
    Opened,
    /// A raw text frame arrived.
    FrameReceived(String),
    /// The socket closed.
    Closed {
        /// Close code, if the peer sent one.
        code: Option<u16>,
        /// Close reason, if the peer sent one.
        reason: Option<String>,
    },
    /// Socket-level failure: network, TLS, server reset.
    TransportError(String),
}

/// Instruction returned to the driver that owns the socket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionAction {
    /// Write this encoded envelope to the transport.
    SendFrame(String),
    /// Re-open the transport after this delay.
    Reconnect(Duration),
}

/// The client-side chat session state machine.
pub struct ChatSession {
    descriptor: SessionDescriptor,
    policy: ReconnectPolicy,
    phase: SessionPhase,
    chat: ChatState,
    reconnect: ReconnectState,
    /// Set by the caller's disconnect; suppresses reconnection on the next
    /// close and turns it into a clean `Ended`.
    intentional_close: bool,
    last_heartbeat_at: Option<Instant>,
}

impl ChatSession {
    /// New session in `Uninitialized`, ready to receive an `Opened` event.
    #[must_use]
    pub fn new(descriptor: SessionDescriptor, policy: ReconnectPolicy) -> Self {
        Self {
            descriptor,
            policy,
            phase: SessionPhase::default(),
            chat: ChatState::default(),
            reconnect: ReconnectState::default(),
            intentional_close: false,
            last_heartbeat_at: None,
        }
    }

    /// Feed one transport event, in delivery order.
    ///
    /// Events arriving after the session reached `Ended` or `Failed` are
    /// discarded; late frames from a closing socket must never mutate
    /// state.
    pub fn handle_event(&mut self, event: SessionEvent) -> Vec<SessionAction> {
        if matches!(self.phase, SessionPhase::Ended | SessionPhase::Failed) {
            return Vec::new();
        }

        match event {
            SessionEvent::Opened => self.on_opened(),
            SessionEvent::FrameReceived(raw) => self.on_frame(&raw),
            SessionEvent::Closed { code, reason } => self.on_closed(code, reason.as_deref()),
            SessionEvent::TransportError(cause) => self.on_transport_error(&cause),
        }
    }

    fn on_opened(&mut self) -> Vec<SessionAction> {
        self.reconnect.reset();
        self.last_heartbeat_at = Some(Instant::now());
        self.phase = SessionPhase::Negotiating;

        let init = Envelope::SessionInit {
            category: self.descriptor.category,
            session_id: None,
        };
        vec![SessionAction::SendFrame(encode_envelope(&init))]
    }

    fn on_frame(&mut self, raw: &str) -> Vec<SessionAction> {
        // A frame can still trickle in from a connection that already got
        // scheduled for replacement; it belongs to no live session.
        if self.phase == SessionPhase::Uninitialized {
            return Vec::new();
        }

        let envelope = match decode_envelope(raw) {
            Ok(envelope) => envelope,
            Err(error) => return self.on_decode_error(&error),
        };

        if envelope == Envelope::Heartbeat {
            self.last_heartbeat_at = Some(Instant::now());
            if self.phase == SessionPhase::Negotiating {
                self.complete_negotiation(None);
            }
            return Vec::new();
        }

        if self.phase == SessionPhase::Negotiating {
            let session_id = match &envelope {
                Envelope::SessionInit { session_id, .. } => session_id.clone(),
                _ => None,
            };
            self.complete_negotiation(session_id);
        }

        self.chat.apply(&envelope);
        Vec::new()
    }

    /// Any valid inbound frame after init functions as the acknowledgment;
    /// an explicit `session_init` ack additionally assigns the session id.
    fn complete_negotiation(&mut self, session_id: Option<String>) {
        if session_id.is_some() {
            self.descriptor.session_id = session_id;
        }
        self.phase = SessionPhase::Ready;
        tracing::info!(session_id = ?self.descriptor.session_id, "chat session ready");
    }

    fn on_decode_error(&mut self, error: &CodecError) -> Vec<SessionAction> {
        if self.phase == SessionPhase::Negotiating {
            // A malformed first frame means the handshake cannot be trusted.
            tracing::warn!(%error, "negotiation ack rejected");
            return self.after_interruption(format!("negotiation failed: {error}"));
        }

        // Malformed frames on an established session are tolerated: drop
        // the frame, surface the violation, keep the channel.
        tracing::warn!(%error, "inbound frame rejected");
        self.chat.last_error = Some(error.to_string());
        Vec::new()
    }

    fn on_closed(&mut self, code: Option<u16>, reason: Option<&str>) -> Vec<SessionAction> {
        if self.intentional_close {
            tracing::info!(?code, "chat session ended");
            self.phase = SessionPhase::Ended;
            return Vec::new();
        }

        let cause = match (code, reason) {
            (Some(code), Some(reason)) if !reason.is_empty() => {
                format!("connection closed unexpectedly ({code}: {reason})")
            }
            (Some(code), _) => format!("connection closed unexpectedly ({code})"),
            _ => "connection closed unexpectedly".to_owned(),
        };
        self.after_interruption(cause)
    }

    fn on_transport_error(&mut self, cause: &str) -> Vec<SessionAction> {
        if self.intentional_close {
            self.phase = SessionPhase::Ended;
            return Vec::new();
        }
        self.after_interruption(format!("transport failure: {cause}"))
    }

    /// Consult the reconnection policy after an unexpected interruption.
    fn after_interruption(&mut self, cause: String) -> Vec<SessionAction> {
        match self.policy.next_delay(&mut self.reconnect) {
            Some(delay) => {
                tracing::warn!(
                    attempt = self.reconnect.attempt,
                    max_attempts = self.policy.max_attempts,
                    ?delay,
                    %cause,
                    "scheduling reconnect"
                );
                self.phase = SessionPhase::Uninitialized;
                self.chat.last_error = Some(cause);
                vec![SessionAction::Reconnect(delay)]
            }
            None => {
                tracing::warn!(%cause, "reconnect attempts exhausted");
                self.phase = SessionPhase::Failed;
                self.chat.last_error = Some(
                    ClientError::ReconnectExhausted(self.policy.max_attempts).to_string(),
                );
                Vec::new()
            }
        }
    }

    /// Accept outbound user text.
    ///
    /// Fails with [`ClientError::SessionNotReady`] outside `Ready`; nothing
    /// is queued on failure. On success the text is appended to the log
    /// optimistically and the encoded `chat` frame is returned for the
    /// transport to write.
    pub fn send_chat(&mut self, text: &str) -> Result<String, ClientError> {
        if self.phase != SessionPhase::Ready {
            return Err(ClientError::SessionNotReady);
        }

        self.chat.push_user(text);
        Ok(encode_envelope(&Envelope::Chat {
            message: text.to_owned(),
        }))
    }

    /// Mark the upcoming close as caller-initiated so it ends the session
    /// instead of scheduling a reconnect.
    pub fn begin_disconnect(&mut self) {
        self.intentional_close = true;
    }

    /// Immediately end the session without waiting for a close event.
    pub fn force_ended(&mut self) {
        self.intentional_close = true;
        if self.phase != SessionPhase::Failed {
            self.phase = SessionPhase::Ended;
        }
    }

    /// True when the server has been silent past `timeout`.
    #[must_use]
    pub fn heartbeat_expired(&self, timeout: Duration) -> bool {
        self.last_heartbeat_at
            .is_some_and(|at| at.elapsed() > timeout)
    }

    /// Current negotiation phase.
    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// The descriptor this session was started with (id filled in on ack).
    #[must_use]
    pub fn descriptor(&self) -> &SessionDescriptor {
        &self.descriptor
    }

    /// Server-assigned session id, if negotiation assigned one.
    #[must_use]
    pub fn ws_session_id(&self) -> Option<&str> {
        self.descriptor.session_id.as_deref()
    }

    /// Read-only view of the reduced chat state.
    #[must_use]
    pub fn chat(&self) -> &ChatState {
        &self.chat
    }

    /// Whether the caller has requested disconnection.
    #[must_use]
    pub fn is_intentional_close(&self) -> bool {
        self.intentional_close
    }

    /// Empty the message log; connection and descriptor are unaffected.
    pub fn clear_messages(&mut self) {
        self.chat.clear_messages();
    }

    /// Empty the message log and drop the surfaced error.
    pub fn clear_history(&mut self) {
        self.chat.clear_history();
    }
}
