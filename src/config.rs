use std::time::Duration;

use crate::reconnect::ReconnectPolicy;

/// Connection settings for a [`crate::ChatClient`].
///
/// The endpoint URL, session type, and category are supplied by the
/// surrounding application; this struct only carries what the client loop
/// itself needs.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// WebSocket endpoint, e.g. `ws://127.0.0.1:8000/ws/chat/`.
    pub url: String,
    /// How often a keepalive heartbeat is written while the socket is open.
    pub heartbeat_interval: Duration,
    /// How long the server may stay silent before the connection is
    /// recycled through the reconnect path.
    pub heartbeat_timeout: Duration,
    /// Backoff policy applied after unexpected closes.
    pub reconnect: ReconnectPolicy,
}

impl ClientConfig {
    /// Config with the protocol's default keepalive and backoff settings.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(60),
            reconnect: ReconnectPolicy::default(),
        }
    }
}
