use envelopes::CodecError;

/// Error taxonomy for the chat client.
///
/// Nothing here is fatal to the process: the worst outcome is a session in
/// [`crate::SessionPhase::Failed`] that requires a fresh connect.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Socket-level failure: network, TLS, server reset.
    #[error("transport failure: {0}")]
    Transport(String),

    /// A write was attempted while the socket was not open.
    #[error("websocket is not connected")]
    NotConnected,

    /// An inbound frame was malformed or of unknown type. Non-fatal on an
    /// established session; the frame is dropped and the error surfaced.
    #[error("protocol violation: {0}")]
    Protocol(#[from] CodecError),

    /// The caller sent before negotiation completed. Reported
    /// synchronously; the message is never queued or retried.
    #[error("session is not ready to send")]
    SessionNotReady,

    /// The handshake did not produce an acknowledgment.
    #[error("session negotiation failed: {0}")]
    NegotiationFailed(String),

    /// The reconnection policy ran out of attempts.
    #[error("gave up reconnecting after {0} attempts")]
    ReconnectExhausted(u32),
}
