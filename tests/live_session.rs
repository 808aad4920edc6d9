//! End-to-end exercise of the client against a loopback websocket server.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

use chatlink::{
    ChatClient, ClientConfig, ClientError, ConnectionStatus, Role, SessionDescriptor, SessionPhase,
};
use envelopes::{ChatCategory, Envelope, SessionType, decode_envelope, encode_envelope};

type ServerSocket = WebSocketStream<TcpStream>;

async fn next_envelope(ws: &mut ServerSocket) -> Envelope {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a client frame")
            .expect("client stream ended")
            .expect("websocket error");
        if let Message::Text(text) = message {
            let envelope = decode_envelope(text.as_str()).expect("client sent invalid envelope");
            if envelope != Envelope::Heartbeat {
                return envelope;
            }
        }
    }
}

async fn send(ws: &mut ServerSocket, envelope: &Envelope) {
    ws.send(Message::Text(encode_envelope(envelope).into()))
        .await
        .expect("server send");
}

async fn wait_for<F: Fn() -> bool>(what: &str, check: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

#[tokio::test]
async fn full_session_round_trip() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        let mut ws = tokio_tungstenite::accept_async(stream)
            .await
            .expect("handshake");

        let init = next_envelope(&mut ws).await;
        let Envelope::SessionInit { category, .. } = init else {
            panic!("expected session_init, got {init:?}");
        };
        assert_eq!(category, ChatCategory::Nutrition);
        send(
            &mut ws,
            &Envelope::SessionInit {
                category,
                session_id: Some("abc123".to_owned()),
            },
        )
        .await;

        let chat = next_envelope(&mut ws).await;
        let Envelope::Chat { message } = chat else {
            panic!("expected chat, got {chat:?}");
        };
        assert_eq!(message, "How much formula?");

        send(&mut ws, &Envelope::Typing { is_typing: true }).await;
        send(
            &mut ws,
            &Envelope::AiResponse {
                message: "2-3 oz per feeding".to_owned(),
                timestamp: "2024-01-01T00:00:00Z".to_owned(),
                sources: Vec::new(),
                session_type: None,
            },
        )
        .await;

        // Drain until the client closes.
        while let Some(Ok(message)) = ws.next().await {
            if matches!(message, Message::Close(_)) {
                break;
            }
        }
    });

    let client = ChatClient::connect(
        ClientConfig::new(format!("ws://{addr}")),
        SessionDescriptor::new(SessionType::AiExpert, ChatCategory::Nutrition),
    );

    tokio::time::timeout(Duration::from_secs(5), client.wait_until_ready())
        .await
        .expect("negotiation timed out")
        .expect("negotiation failed");
    assert_eq!(client.ws_session_id().as_deref(), Some("abc123"));
    assert!(client.is_connected());
    assert!(!client.is_loading());

    client.send_message("How much formula?").expect("send");

    wait_for("the assistant reply", || {
        client
            .messages()
            .last()
            .is_some_and(|m| m.role == Role::Assistant)
    })
    .await;

    let messages = client.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[0].content, "How much formula?");
    assert_eq!(messages[1].content, "2-3 oz per feeding");
    assert!(!client.is_typing());
    assert!(client.error().is_none());

    client.disconnect();
    wait_for("the session to end", || {
        client.phase() == SessionPhase::Ended
    })
    .await;

    server.await.expect("server task");
}

#[tokio::test]
async fn send_before_ready_fails_synchronously() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");

    // Accept the socket but never acknowledge the init frame.
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        let mut ws = tokio_tungstenite::accept_async(stream)
            .await
            .expect("handshake");
        while let Some(Ok(message)) = ws.next().await {
            if matches!(message, Message::Close(_)) {
                break;
            }
        }
    });

    let client = ChatClient::connect(
        ClientConfig::new(format!("ws://{addr}")),
        SessionDescriptor::new(SessionType::AiExpert, ChatCategory::General),
    );

    let error = client.send_message("too early").expect_err("not ready");
    assert!(matches!(error, ClientError::SessionNotReady));
    assert!(client.messages().is_empty());

    client.force_disconnect();
    wait_for("the session to end", || {
        client.phase() == SessionPhase::Ended
    })
    .await;
    server.await.expect("server task");
}

#[tokio::test]
async fn malformed_frame_is_tolerated_after_negotiation() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        let mut ws = tokio_tungstenite::accept_async(stream)
            .await
            .expect("handshake");

        let init = next_envelope(&mut ws).await;
        let Envelope::SessionInit { category, .. } = init else {
            panic!("expected session_init, got {init:?}");
        };
        send(
            &mut ws,
            &Envelope::SessionInit {
                category,
                session_id: Some("s-1".to_owned()),
            },
        )
        .await;

        ws.send(Message::Text(r#"{"type":"unknown_type"}"#.into()))
            .await
            .expect("send garbage");
        send(
            &mut ws,
            &Envelope::AiResponse {
                message: "still here".to_owned(),
                timestamp: "2024-01-01T00:00:00Z".to_owned(),
                sources: Vec::new(),
                session_type: None,
            },
        )
        .await;

        while let Some(Ok(message)) = ws.next().await {
            if matches!(message, Message::Close(_)) {
                break;
            }
        }
    });

    let client = ChatClient::connect(
        ClientConfig::new(format!("ws://{addr}")),
        SessionDescriptor::new(SessionType::Doc, ChatCategory::Education),
    );

    tokio::time::timeout(Duration::from_secs(5), client.wait_until_ready())
        .await
        .expect("negotiation timed out")
        .expect("negotiation failed");

    // The malformed frame surfaces as an error; the next valid frame still
    // lands in the log and clears it.
    wait_for("the follow-up reply", || !client.messages().is_empty()).await;
    assert_eq!(client.messages()[0].content, "still here");
    assert!(client.error().is_none());
    assert!(client.is_connected());

    client.disconnect();
    server.await.expect("server task");
}

#[tokio::test]
async fn garbage_negotiation_reply_reconnects_and_recovers() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");

    let server = tokio::spawn(async move {
        // First connection: answer the init frame with garbage and keep
        // the socket open. The client must not stay wedged on it.
        let (stream, _) = listener.accept().await.expect("accept");
        let mut first = tokio_tungstenite::accept_async(stream)
            .await
            .expect("handshake");
        let _init = next_envelope(&mut first).await;
        first
            .send(Message::Text("garbage".into()))
            .await
            .expect("send garbage");

        // Second connection: acknowledge properly.
        let (stream, _) = listener.accept().await.expect("second accept");
        let mut second = tokio_tungstenite::accept_async(stream)
            .await
            .expect("second handshake");
        let init = next_envelope(&mut second).await;
        let Envelope::SessionInit { category, .. } = init else {
            panic!("expected session_init, got {init:?}");
        };
        send(
            &mut second,
            &Envelope::SessionInit {
                category,
                session_id: Some("retry-1".to_owned()),
            },
        )
        .await;

        while let Some(Ok(message)) = second.next().await {
            if matches!(message, Message::Close(_)) {
                break;
            }
        }
    });

    let mut config = ClientConfig::new(format!("ws://{addr}"));
    config.reconnect.base_delay = Duration::from_millis(10);

    let client = ChatClient::connect(
        config,
        SessionDescriptor::new(SessionType::AiExpert, ChatCategory::General),
    );

    tokio::time::timeout(Duration::from_secs(5), client.wait_until_ready())
        .await
        .expect("reconnect timed out")
        .expect("negotiation failed");
    assert_eq!(client.ws_session_id().as_deref(), Some("retry-1"));
    assert!(client.is_connected());

    client.disconnect();
    server.await.expect("server task");
}

#[tokio::test]
async fn change_notifications_are_latched_between_polls() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        let mut ws = tokio_tungstenite::accept_async(stream)
            .await
            .expect("handshake");

        let init = next_envelope(&mut ws).await;
        let Envelope::SessionInit { category, .. } = init else {
            panic!("expected session_init, got {init:?}");
        };
        send(
            &mut ws,
            &Envelope::SessionInit {
                category,
                session_id: Some("s-2".to_owned()),
            },
        )
        .await;
        send(
            &mut ws,
            &Envelope::AiResponse {
                message: "welcome".to_owned(),
                timestamp: "2024-01-01T00:00:00Z".to_owned(),
                sources: Vec::new(),
                session_type: None,
            },
        )
        .await;

        while let Some(Ok(message)) = ws.next().await {
            if matches!(message, Message::Close(_)) {
                break;
            }
        }
    });

    let client = ChatClient::connect(
        ClientConfig::new(format!("ws://{addr}")),
        SessionDescriptor::new(SessionType::Community, ChatCategory::General),
    );
    let mut changes = client.changes();

    tokio::time::timeout(Duration::from_secs(5), client.wait_until_ready())
        .await
        .expect("negotiation timed out")
        .expect("negotiation failed");
    wait_for("the welcome reply", || !client.messages().is_empty()).await;

    // Everything above happened while nobody was awaiting the receiver;
    // the updates must still be observable rather than lost.
    assert!(changes.has_changed().expect("session loop alive"));
    changes.borrow_and_update();
    assert!(!changes.has_changed().expect("session loop alive"));

    // A later mutation marks the receiver again.
    client.clear_messages();
    assert!(changes.has_changed().expect("session loop alive"));

    client.disconnect();
    server.await.expect("server task");
}

#[tokio::test]
async fn connect_failure_exhausts_reconnects_into_failed() {
    // Nothing is listening on this port; grab one and drop the listener.
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let mut config = ClientConfig::new(format!("ws://{addr}"));
    config.reconnect.base_delay = Duration::from_millis(5);
    config.reconnect.max_delay = Duration::from_millis(10);
    config.reconnect.max_attempts = 2;

    let client = ChatClient::connect(
        config,
        SessionDescriptor::new(SessionType::AiExpert, ChatCategory::General),
    );

    let error = tokio::time::timeout(Duration::from_secs(5), client.wait_until_ready())
        .await
        .expect("should settle quickly")
        .expect_err("negotiation must fail");
    assert!(matches!(error, ClientError::NegotiationFailed(_)));
    assert_eq!(client.phase(), SessionPhase::Failed);
    assert_eq!(
        client.error().as_deref(),
        Some("gave up reconnecting after 2 attempts")
    );
    assert!(!client.is_connected());
    assert_eq!(client.connection_status(), ConnectionStatus::Errored);
}
