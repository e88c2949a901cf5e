use std::{collections::HashSet, sync::Arc};

use anyhow::Result;
use clap::{Parser, ValueEnum};
use client_core::{load_settings, ClientEvent, ConsultationClient};
use shared::domain::{ConsultationId, Participant, SenderType, UserId};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::error::RecvError,
    task::JoinHandle,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Role {
    Client,
    Designer,
}

impl From<Role> for SenderType {
    fn from(role: Role) -> Self {
        match role {
            Role::Client => SenderType::Client,
            Role::Designer => SenderType::Designer,
        }
    }
}

#[derive(Parser, Debug)]
struct Args {
    /// Relay socket endpoint; http(s) URLs are rewritten to ws(s).
    #[arg(long)]
    relay_url: Option<String>,
    #[arg(long)]
    api_url: Option<String>,
    #[arg(long)]
    user_id: String,
    #[arg(long, value_enum, default_value_t = Role::Client)]
    sender_type: Role,
    #[arg(long)]
    name: String,
    /// Consultation to open on start.
    #[arg(long)]
    consultation: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let mut settings = load_settings();
    if let Some(relay_url) = args.relay_url {
        settings.relay_url = relay_url;
    }
    if let Some(api_url) = args.api_url {
        settings.api_base_url = api_url;
    }
    let participant = Participant {
        user_id: UserId(args.user_id),
        sender_type: args.sender_type.into(),
        display_name: args.name,
    };

    let client = ConsultationClient::new(settings, participant)?;
    let printer = spawn_printer(Arc::clone(&client));
    client.open()?;

    if let Some(consultation) = args.consultation {
        if let Err(err) = client
            .select_consultation(ConsultationId(consultation))
            .await
        {
            eprintln!("{err:#}");
        }
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };
        let line = line.trim();
        match line.split_once(' ').unwrap_or((line, "")) {
            ("/quit", _) => break,
            ("/switch", id) if !id.trim().is_empty() => {
                if let Err(err) = client
                    .select_consultation(ConsultationId::from(id.trim()))
                    .await
                {
                    eprintln!("{err:#}");
                }
            }
            ("/leave", _) => client.leave_consultation(),
            ("/typing", _) => {
                client.start_typing();
            }
            ("/stop-typing", _) => {
                client.stop_typing();
            }
            ("", _) => {}
            _ => match client.send(line).await {
                Ok(receipt) => info!(route = ?receipt.route, message_id = %receipt.message_id, "sent"),
                Err(err) => {
                    eprintln!("send failed: {err}");
                    if let Some(body) = err.restored_body() {
                        eprintln!("unsent: {body}");
                    }
                }
            },
        }
    }

    client.close();
    printer.abort();
    Ok(())
}

fn spawn_printer(client: Arc<ConsultationClient>) -> JoinHandle<()> {
    let mut events = client.subscribe_events();
    tokio::spawn(async move {
        let mut shown = HashSet::new();
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event stream lagged");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            match event {
                ClientEvent::ConnectionChanged(state) => println!("* connection {state}"),
                ClientEvent::MessagesUpdated { .. } => {
                    for message in client.messages() {
                        if message.is_pending() || !shown.insert(message.id.clone()) {
                            continue;
                        }
                        println!(
                            "[{}] {}: {}",
                            message.created_at.format("%H:%M"),
                            if message.sender_name.is_empty() {
                                message.sender_type.to_string()
                            } else {
                                message.sender_name.clone()
                            },
                            message.body
                        );
                    }
                }
                ClientEvent::TypingUpdated { names, .. } if names.is_empty() => {}
                ClientEvent::TypingUpdated { names, .. } => {
                    println!("* {} typing...", names.join(", "));
                }
                ClientEvent::SendFailed { error, .. } => println!("! {error}"),
                ClientEvent::Error(error) => println!("! {error}"),
            }
        }
    })
}
