//! Client library for the realtime chat websocket protocol.
//!
//! The crate is split along the protocol layers:
//!
//! - [`net::transport`] owns the one physical websocket connection and
//!   surfaces raw socket events.
//! - [`session`] is the IO-free state machine that negotiates a session,
//!   routes decoded envelopes into chat state, and decides when to
//!   reconnect. Tests drive it with synthetic events instead of a socket.
//! - [`state::chat`] is the pure reducer for the message log, typing
//!   indicator, and last surfaced error.
//! - [`reconnect`] is the exponential-backoff policy applied after
//!   unexpected disconnects.
//! - [`net::client`] wires the pieces together behind [`ChatClient`], the
//!   handle UI collaborators consume.
//!
//! The wire format itself (the typed JSON envelope) lives in the
//! `envelopes` crate shared with server-side tooling.

mod config;
mod error;
pub mod net;
pub mod reconnect;
pub mod session;
pub mod state;

pub use config::ClientConfig;
pub use envelopes::{ChatCategory, CodecError, Envelope, SessionType};
pub use error::ClientError;
pub use net::client::ChatClient;
pub use net::transport::{ConnectionStatus, Transport, TransportEvent};
pub use reconnect::{ReconnectPolicy, ReconnectState};
pub use session::{ChatSession, SessionAction, SessionDescriptor, SessionEvent, SessionPhase};
pub use state::chat::{ChatMessage, ChatState, Role};
