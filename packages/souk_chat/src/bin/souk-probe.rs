//! Log in as one user, print what the server pushes, and send stdin lines to
//! a peer. Handy for poking a messaging server by hand.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use souk_chat::protocol::ServerEvent;
use souk_chat::{
    ClientConfig, DeliveryOutcome, Event, EventKind, HttpChatApi, Identity, LogEntry,
    MessagingClient, PeerId, Subscription, WebSocketConnector,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(name = "souk-probe")]
#[command(about = "Talk to a Souk messaging server from the terminal")]
struct Args {
    /// Path to souk.toml (defaults and SOUK_* env vars apply either way)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// User id to log in as
    #[arg(short, long)]
    user: String,

    /// Bearer token for the handshake and REST calls
    #[arg(short, long)]
    token: String,

    /// Open a conversation with this peer and send stdin lines to it
    #[arg(short, long)]
    peer: Option<String>,

    /// Verbose logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_directive = if args.debug {
        "souk_chat=debug,souk_probe=debug,info"
    } else {
        "souk_chat=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();

    let config = ClientConfig::load(args.config.as_deref()).context("Failed to load config")?;
    let identity = Identity::new(args.user.as_str(), args.token.as_str());
    let api = Arc::new(
        HttpChatApi::new(&config.server.api_base_url, &identity.token)
            .context("Failed to build REST client")?,
    );
    let connector = Arc::new(WebSocketConnector::new(&config.server.ws_url));

    info!(url = %config.server.ws_url, user = %identity.user_id, "connecting");
    let client = MessagingClient::login(config, identity, connector, api)
        .await
        .context("Login failed")?;
    let _printers = print_events(&client);

    if let Err(e) = client.notifications().refresh().await {
        eprintln!("(could not load notifications: {e})");
    } else {
        println!("{} unread notifications", client.notifications().unread_count());
    }
    match client.roster().sync_unread_total().await {
        Ok(total) => println!("{total} unread messages"),
        Err(e) => eprintln!("(could not load unread messages: {e})"),
    }

    let peer = args.peer.map(PeerId::from);
    if let Some(peer) = &peer {
        client
            .open_conversation(peer)
            .await
            .with_context(|| format!("Failed to open conversation with {peer}"))?;
        for entry in client.reconciler().entries(peer) {
            match entry {
                LogEntry::Message(m) => println!("[{}] {}: {}", m.sent_at.format("%H:%M"), m.sender_id, m.text),
                LogEntry::Pending(p) => println!("[pending] {}", p.text),
            }
        }
    }

    let mut outcomes = client.reconciler().outcomes();
    let mut connected = client.connection().connected_flag();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                match &peer {
                    Some(peer) => {
                        client.typing().input_changed(peer, "");
                        client.reconciler().send(peer, &line);
                    }
                    None => eprintln!("(no --peer given, not sending)"),
                }
            }
            outcome = outcomes.recv() => match outcome {
                Ok(DeliveryOutcome::Sent { temp_id, message, .. }) => {
                    println!("✓ {temp_id} delivered as {}", message.server_id);
                }
                Ok(DeliveryOutcome::Failed(failure)) => println!("✗ {failure}"),
                Err(e) => eprintln!("(missed delivery outcomes: {e})"),
            },
            changed = connected.changed() => {
                if changed.is_err() || !*connected.borrow() {
                    eprintln!("connection lost");
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    client.logout();
    Ok(())
}

fn print_events(client: &MessagingClient) -> Vec<Subscription> {
    let connection = client.connection();
    vec![
        connection.subscribe(EventKind::NewMessage, |event| {
            if let Event::Server(ServerEvent::NewMessage(incoming)) = event {
                println!("{}: {}", incoming.sender_id, incoming.message.text);
            }
            Ok(())
        }),
        connection.subscribe(EventKind::UserTyping, |event| {
            if let Event::Server(ServerEvent::UserTyping(typing)) = event {
                let verb = if typing.is_typing { "is typing" } else { "stopped typing" };
                println!("({} {verb})", typing.user_id);
            }
            Ok(())
        }),
        connection.subscribe(EventKind::UserStatus, |event| {
            if let Event::Server(ServerEvent::UserStatus(status)) = event {
                println!("({} is {})", status.user_id, status.status);
            }
            Ok(())
        }),
        connection.subscribe(EventKind::NotificationCreated, |event| {
            if let Event::Server(ServerEvent::NotificationCreated(created)) = event {
                println!("(notification {})", created.notification.kind.as_str());
            }
            Ok(())
        }),
    ]
}
