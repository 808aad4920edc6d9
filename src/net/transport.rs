//! The transport channel: one physical websocket connection.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::error::ClientError;

/// Lifecycle of the physical connection.
///
/// Owned exclusively by [`Transport`]; everything else reads a mirror. The
/// status transitions synchronously with each event returned from
/// [`Transport::next_event`], before any downstream consumer runs, so
/// observers never see a stale value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// No connection attempted yet.
    #[default]
    Idle,
    /// Connect in progress.
    Connecting,
    /// Connected; frames may flow.
    Open,
    /// Closed, cleanly or not.
    Closed,
    /// Dead after a socket-level failure.
    Errored,
}

/// Raw socket event surfaced to the session state machine.
///
/// Exactly one event is emitted per underlying socket event, and no
/// `FrameReceived` is ever emitted before the transport was opened.
#[derive(Clone, Debug)]
pub enum TransportEvent {
    /// A complete text frame arrived.
    FrameReceived(String),
    /// The peer closed the connection, or the stream ended.
    Closed {
        /// Close code, if the peer sent one.
        code: Option<u16>,
        /// Close reason, if the peer sent one.
        reason: Option<String>,
    },
    /// Socket-level failure.
    TransportError(String),
}

/// Owns the one physical websocket connection for a logical session.
pub struct Transport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    status: ConnectionStatus,
}

impl Transport {
    /// Connect to `url`. The returned transport is already `Open`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] when the TCP connect, TLS setup,
    /// or websocket handshake fails.
    pub async fn open(url: &str) -> Result<Self, ClientError> {
        let (stream, _) = connect_async(url)
            .await
            .map_err(|error| ClientError::Transport(error.to_string()))?;

        Ok(Self {
            stream,
            status: ConnectionStatus::Open,
        })
    }

    /// Current connection status.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// Write one text frame.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotConnected`] when the status is not `Open`
    /// and [`ClientError::Transport`] when the write itself fails.
    pub async fn send(&mut self, text: String) -> Result<(), ClientError> {
        if self.status != ConnectionStatus::Open {
            return Err(ClientError::NotConnected);
        }

        let result = self.stream.send(Message::Text(text.into())).await;
        match result {
            Ok(()) => Ok(()),
            Err(error) => {
                self.status = ConnectionStatus::Errored;
                Err(ClientError::Transport(error.to_string()))
            }
        }
    }

    /// Start the close handshake. Idempotent.
    pub async fn close(&mut self) {
        if self.status == ConnectionStatus::Open {
            let _ = self.stream.close(None).await;
        }
        self.status = ConnectionStatus::Closed;
    }

    /// Wait for the next socket event.
    ///
    /// Ping, pong, and binary frames are absorbed at this layer; callers
    /// only ever see text frames, closes, and errors. Once the connection
    /// stopped being `Open` this keeps returning `Closed`.
    pub async fn next_event(&mut self) -> TransportEvent {
        if self.status != ConnectionStatus::Open {
            return TransportEvent::Closed {
                code: None,
                reason: None,
            };
        }

        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return TransportEvent::FrameReceived(text.to_string());
                }
                Some(Ok(Message::Close(frame))) => {
                    self.status = ConnectionStatus::Closed;
                    let (code, reason) = match frame {
                        Some(frame) => (
                            Some(u16::from(frame.code)),
                            Some(frame.reason.to_string()),
                        ),
                        None => (None, None),
                    };
                    return TransportEvent::Closed { code, reason };
                }
                Some(Ok(_)) => {}
                Some(Err(error)) => {
                    self.status = ConnectionStatus::Errored;
                    return TransportEvent::TransportError(error.to_string());
                }
                None => {
                    self.status = ConnectionStatus::Closed;
                    return TransportEvent::Closed {
                        code: None,
                        reason: None,
                    };
                }
            }
        }
    }
}
