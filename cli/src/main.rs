use std::time::Duration;

use chatlink::{ChatClient, ClientConfig, Role, SessionDescriptor, SessionPhase};
use clap::Parser;
use envelopes::{ChatCategory, SessionType};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("timed out waiting for the session to become ready")]
    ConnectTimeout,
    #[error("chat client error: {0}")]
    Client(#[from] chatlink::ClientError),
    #[error("stdin read failed: {0}")]
    Stdin(#[from] std::io::Error),
}

#[derive(Parser, Debug)]
#[command(name = "chatlink-cli", about = "Interactive websocket chat client")]
struct Cli {
    #[arg(long, env = "CHAT_WS_URL", default_value = "ws://127.0.0.1:8000/ws/chat/")]
    url: String,

    #[arg(
        long,
        env = "CHAT_SESSION_TYPE",
        default_value = "ai_expert",
        value_parser = parse_session_type
    )]
    session_type: SessionType,

    #[arg(
        long,
        env = "CHAT_CATEGORY",
        default_value = "general",
        value_parser = parse_category
    )]
    category: ChatCategory,

    /// Seconds to wait for negotiation before giving up.
    #[arg(long, default_value_t = 10)]
    connect_timeout: u64,
}

fn parse_session_type(raw: &str) -> Result<SessionType, String> {
    match raw {
        "ai_expert" => Ok(SessionType::AiExpert),
        "community" => Ok(SessionType::Community),
        "doc" => Ok(SessionType::Doc),
        _ => Err(format!("unknown session type: {raw}")),
    }
}

fn parse_category(raw: &str) -> Result<ChatCategory, String> {
    match raw {
        "general" => Ok(ChatCategory::General),
        "specialized" => Ok(ChatCategory::Specialized),
        "nutrition" => Ok(ChatCategory::Nutrition),
        "behavior" => Ok(ChatCategory::Behavior),
        "psychology" => Ok(ChatCategory::Psychology),
        "education" => Ok(ChatCategory::Education),
        _ => Err(format!("unknown category: {raw}")),
    }
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let descriptor = SessionDescriptor::new(cli.session_type, cli.category);
    let client = ChatClient::connect(ClientConfig::new(&cli.url), descriptor);

    tokio::time::timeout(
        Duration::from_secs(cli.connect_timeout),
        client.wait_until_ready(),
    )
    .await
    .map_err(|_| CliError::ConnectTimeout)??;

    match client.ws_session_id() {
        Some(id) => eprintln!("connected (session {id})"),
        None => eprintln!("connected"),
    }

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    let mut changes = client.changes();
    let mut rendered = 0_usize;
    let mut typing_shown = false;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                let text = line.trim();
                if text.is_empty() {
                    continue;
                }
                if let Err(error) = client.send_message(text) {
                    eprintln!("send failed: {error}");
                }
                rendered = render_new(&client, rendered, &mut typing_shown);
            }

            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                rendered = render_new(&client, rendered, &mut typing_shown);
                if matches!(client.phase(), SessionPhase::Ended | SessionPhase::Failed) {
                    if let Some(error) = client.error() {
                        eprintln!("session error: {error}");
                    }
                    break;
                }
            }
        }
    }

    client.disconnect();
    Ok(())
}

/// Print log entries past `already`, returning the new rendered count.
fn render_new(client: &ChatClient, already: usize, typing_shown: &mut bool) -> usize {
    let messages = client.messages();
    for message in messages.iter().skip(already) {
        match message.role {
            Role::User => println!("you: {}", message.content),
            Role::Assistant => println!("assistant: {}", message.content),
        }
    }

    let typing = client.is_typing();
    if typing && !*typing_shown {
        eprintln!("assistant is typing...");
    }
    *typing_shown = typing;

    messages.len()
}
