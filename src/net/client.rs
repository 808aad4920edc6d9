//! The caller-facing chat client handle and its event loop.
//!
//! [`ChatClient::connect`] spawns one task that owns the transport and is
//! the sole writer of session state; the handle's methods are brief locked
//! reads and synchronous commands. `send_message` and `disconnect` are
//! fire-and-forget: outcomes arrive through the observables, not return
//! values.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, watch};

use envelopes::{Envelope, encode_envelope};

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::net::transport::{ConnectionStatus, Transport, TransportEvent};
use crate::session::{ChatSession, SessionAction, SessionDescriptor, SessionEvent, SessionPhase};
use crate::state::chat::ChatMessage;

enum Command {
    SendFrame(String),
    Disconnect,
    ForceDisconnect,
}

/// Handle for one logical chat session.
///
/// Cheap to share behind references; dropping it does not stop the session
/// loop, call [`ChatClient::disconnect`] for that.
pub struct ChatClient {
    session: Arc<Mutex<ChatSession>>,
    commands: mpsc::UnboundedSender<Command>,
    status_rx: watch::Receiver<ConnectionStatus>,
    phase_rx: watch::Receiver<SessionPhase>,
    version: Arc<watch::Sender<u64>>,
}

impl ChatClient {
    /// Open a session and spawn its event loop.
    ///
    /// Negotiation proceeds in the background: await
    /// [`ChatClient::wait_until_ready`] or poll the observables. Must be
    /// called within a tokio runtime.
    #[must_use]
    pub fn connect(config: ClientConfig, descriptor: SessionDescriptor) -> Self {
        let session = Arc::new(Mutex::new(ChatSession::new(descriptor, config.reconnect)));
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Idle);
        let (phase_tx, phase_rx) = watch::channel(SessionPhase::Uninitialized);
        let (version_tx, _) = watch::channel(0_u64);
        let version = Arc::new(version_tx);

        tokio::spawn(run_loop(
            config,
            Arc::clone(&session),
            command_rx,
            status_tx,
            phase_tx,
            Arc::clone(&version),
        ));

        Self {
            session,
            commands,
            status_rx,
            phase_rx,
            version,
        }
    }

    /// Send user text over the session.
    ///
    /// # Errors
    ///
    /// Fails synchronously with [`ClientError::SessionNotReady`] while the
    /// session is not `Ready`; the text is neither queued nor retried. The
    /// accepted message is appended to the log optimistically, before the
    /// server acknowledges it.
    pub fn send_message(&self, text: &str) -> Result<(), ClientError> {
        let frame = self.lock().send_chat(text)?;
        bump_version(&self.version);
        self.commands
            .send(Command::SendFrame(frame))
            .map_err(|_| ClientError::NotConnected)
    }

    /// Gracefully end the session: close handshake, then `Ended`.
    pub fn disconnect(&self) {
        self.lock().begin_disconnect();
        let _ = self.commands.send(Command::Disconnect);
    }

    /// Tear the session down immediately. Frames still in flight are
    /// discarded, never applied to state.
    pub fn force_disconnect(&self) {
        self.lock().begin_disconnect();
        let _ = self.commands.send(Command::ForceDisconnect);
    }

    /// Empty the message log; connection and session id are unaffected.
    pub fn clear_messages(&self) {
        self.lock().clear_messages();
        bump_version(&self.version);
    }

    /// Empty the message log and drop the surfaced error.
    pub fn clear_history(&self) {
        self.lock().clear_history();
        bump_version(&self.version);
    }

    /// Snapshot of the message log.
    #[must_use]
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.lock().chat().messages.clone()
    }

    /// Last surfaced error, if any.
    #[must_use]
    pub fn error(&self) -> Option<String> {
        self.lock().chat().last_error.clone()
    }

    /// Whether the assistant is currently composing a reply.
    #[must_use]
    pub fn is_typing(&self) -> bool {
        self.lock().chat().typing
    }

    /// Server-assigned session id, once negotiation completed.
    #[must_use]
    pub fn ws_session_id(&self) -> Option<String> {
        self.lock().ws_session_id().map(ToOwned::to_owned)
    }

    /// Current transport status (mirror of the channel's own field).
    #[must_use]
    pub fn connection_status(&self) -> ConnectionStatus {
        *self.status_rx.borrow()
    }

    /// True while the physical socket is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection_status() == ConnectionStatus::Open
    }

    /// Current session phase.
    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        *self.phase_rx.borrow()
    }

    /// True while connecting or negotiating.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        matches!(
            self.phase(),
            SessionPhase::Uninitialized | SessionPhase::Negotiating
        )
    }

    /// Resolve once the session reaches `Ready`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NegotiationFailed`] when the session ends or
    /// fails before becoming ready.
    pub async fn wait_until_ready(&self) -> Result<(), ClientError> {
        let mut rx = self.phase_rx.clone();
        loop {
            match *rx.borrow_and_update() {
                SessionPhase::Ready => return Ok(()),
                SessionPhase::Ended => {
                    return Err(ClientError::NegotiationFailed(
                        "session ended before becoming ready".to_owned(),
                    ));
                }
                SessionPhase::Failed => {
                    return Err(ClientError::NegotiationFailed(
                        self.error()
                            .unwrap_or_else(|| "session failed before becoming ready".to_owned()),
                    ));
                }
                SessionPhase::Uninitialized | SessionPhase::Negotiating => {}
            }
            if rx.changed().await.is_err() {
                return Err(ClientError::NotConnected);
            }
        }
    }

    /// Subscribe to state-change notifications for a render loop.
    ///
    /// The receiver carries an opaque change counter and latches updates:
    /// a change that lands while the consumer is busy rendering is still
    /// reported by the next `changed().await` on the receiver. Spurious
    /// wakeups are possible.
    #[must_use]
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, ChatSession> {
        // Session mutations cannot panic mid-update; recover the guard.
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn lock_session(session: &Arc<Mutex<ChatSession>>) -> MutexGuard<'_, ChatSession> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

fn bump_version(version: &watch::Sender<u64>) {
    version.send_modify(|v| *v = v.wrapping_add(1));
}

fn publish(
    session: &Arc<Mutex<ChatSession>>,
    phase_tx: &watch::Sender<SessionPhase>,
    version: &watch::Sender<u64>,
) {
    let phase = lock_session(session).phase();
    phase_tx.send_replace(phase);
    bump_version(version);
}

fn to_session_event(event: TransportEvent) -> SessionEvent {
    match event {
        TransportEvent::FrameReceived(raw) => SessionEvent::FrameReceived(raw),
        TransportEvent::Closed { code, reason } => SessionEvent::Closed { code, reason },
        TransportEvent::TransportError(cause) => SessionEvent::TransportError(cause),
    }
}

enum LoopOutcome {
    Retry(std::time::Duration),
    Stop,
}

async fn run_loop(
    config: ClientConfig,
    session: Arc<Mutex<ChatSession>>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    status_tx: watch::Sender<ConnectionStatus>,
    phase_tx: watch::Sender<SessionPhase>,
    version: Arc<watch::Sender<u64>>,
) {
    loop {
        status_tx.send_replace(ConnectionStatus::Connecting);
        bump_version(&version);

        let mut transport = match Transport::open(&config.url).await {
            Ok(transport) => transport,
            Err(error) => {
                tracing::warn!(%error, url = %config.url, "websocket connect failed");
                status_tx.send_replace(ConnectionStatus::Errored);
                let actions = lock_session(&session)
                    .handle_event(SessionEvent::TransportError(error.to_string()));
                publish(&session, &phase_tx, &version);
                match reconnect_delay(&actions) {
                    Some(delay) => {
                        if wait_out_backoff(delay, &session, &mut commands, &status_tx, &phase_tx, &version).await {
                            continue;
                        }
                        return;
                    }
                    None => return,
                }
            }
        };

        status_tx.send_replace(ConnectionStatus::Open);
        let actions = lock_session(&session).handle_event(SessionEvent::Opened);
        publish(&session, &phase_tx, &version);
        run_send_actions(&mut transport, &actions).await;

        let outcome = drive_connection(
            &config,
            &session,
            &mut commands,
            &mut transport,
            &status_tx,
            &phase_tx,
            &version,
        )
        .await;
        transport.close().await;

        match outcome {
            LoopOutcome::Retry(delay) => {
                if wait_out_backoff(delay, &session, &mut commands, &status_tx, &phase_tx, &version).await {
                    continue;
                }
                return;
            }
            LoopOutcome::Stop => return,
        }
    }
}

/// Process events on an open connection until it terminates.
async fn drive_connection(
    config: &ClientConfig,
    session: &Arc<Mutex<ChatSession>>,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    transport: &mut Transport,
    status_tx: &watch::Sender<ConnectionStatus>,
    phase_tx: &watch::Sender<SessionPhase>,
    version: &watch::Sender<u64>,
) -> LoopOutcome {
    let start = tokio::time::Instant::now() + config.heartbeat_interval;
    let mut heartbeat = tokio::time::interval_at(start, config.heartbeat_interval);

    loop {
        tokio::select! {
            event = transport.next_event() => {
                // Mirror the status before the session observes the event.
                status_tx.send_replace(transport.status());
                let terminal = matches!(
                    event,
                    TransportEvent::Closed { .. } | TransportEvent::TransportError(_)
                );
                let actions = lock_session(session).handle_event(to_session_event(event));
                publish(session, phase_tx, version);

                let mut retry_after = None;
                for action in &actions {
                    if let SessionAction::Reconnect(delay) = action {
                        retry_after = Some(*delay);
                    }
                }
                run_send_actions(transport, &actions).await;

                // A reconnect decision can come out of a frame too (a
                // rejected negotiation ack); the current socket is done
                // either way.
                if let Some(delay) = retry_after {
                    transport.close().await;
                    status_tx.send_replace(ConnectionStatus::Closed);
                    return LoopOutcome::Retry(delay);
                }
                if terminal {
                    return LoopOutcome::Stop;
                }
            }

            command = commands.recv() => {
                match command {
                    Some(Command::SendFrame(frame)) => {
                        if let Err(error) = transport.send(frame).await {
                            tracing::warn!(%error, "frame write failed");
                        }
                    }
                    Some(Command::Disconnect) => {
                        // The closure surfaces as a Closed event on the
                        // next iteration and ends the session cleanly.
                        transport.close().await;
                    }
                    Some(Command::ForceDisconnect) | None => {
                        transport.close().await;
                        status_tx.send_replace(ConnectionStatus::Closed);
                        lock_session(session).force_ended();
                        publish(session, phase_tx, version);
                        return LoopOutcome::Stop;
                    }
                }
            }

            _ = heartbeat.tick() => {
                if lock_session(session).heartbeat_expired(config.heartbeat_timeout) {
                    tracing::warn!("heartbeat timeout, recycling connection");
                    transport.close().await;
                } else if let Err(error) =
                    transport.send(encode_envelope(&Envelope::Heartbeat)).await
                {
                    tracing::warn!(%error, "heartbeat write failed");
                }
            }
        }
    }
}

async fn run_send_actions(transport: &mut Transport, actions: &[SessionAction]) {
    for action in actions {
        if let SessionAction::SendFrame(frame) = action {
            if let Err(error) = transport.send(frame.clone()).await {
                tracing::warn!(%error, "frame write failed");
            }
        }
    }
}

fn reconnect_delay(actions: &[SessionAction]) -> Option<std::time::Duration> {
    actions.iter().find_map(|action| match action {
        SessionAction::Reconnect(delay) => Some(*delay),
        SessionAction::SendFrame(_) => None,
    })
}

/// Sleep out a reconnect delay while staying responsive to disconnects.
///
/// Returns `true` to retry the connection, `false` when the caller ended
/// the session during the backoff.
async fn wait_out_backoff(
    delay: std::time::Duration,
    session: &Arc<Mutex<ChatSession>>,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    status_tx: &watch::Sender<ConnectionStatus>,
    phase_tx: &watch::Sender<SessionPhase>,
    version: &watch::Sender<u64>,
) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            () = &mut sleep => return true,
            command = commands.recv() => {
                match command {
                    // A send can only have raced the disconnect; the frame
                    // has no connection to go to.
                    Some(Command::SendFrame(_)) => {}
                    Some(Command::Disconnect | Command::ForceDisconnect) | None => {
                        lock_session(session).force_ended();
                        status_tx.send_replace(ConnectionStatus::Closed);
                        publish(session, phase_tx, version);
                        return false;
                    }
                }
            }
        }
    }
}
