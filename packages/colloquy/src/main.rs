use std::io::Write as _;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::prelude::*;

use colloquy::{ChatClient, ClientEvent, ClientHandle, load_config};
use colloquy_wire::Feedback;

#[derive(Parser)]
#[command(name = "colloquy")]
#[command(about = "Terminal client for a streaming chat backend")]
struct Cli {
    /// Config directory holding config.toml (defaults to cwd)
    #[arg(long)]
    config_dir: Option<PathBuf>,

    /// WebSocket endpoint, overriding the config file
    #[arg(long)]
    url: Option<String>,

    /// Provider to prompt with, overriding the config file
    #[arg(long)]
    provider: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_directive = if cli.debug {
        "colloquy=debug,info"
    } else {
        "colloquy=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();

    let config_dir = match cli.config_dir {
        Some(dir) => dir,
        None => std::env::current_dir().context("cannot determine working directory")?,
    };
    let mut config = load_config(&config_dir)?;
    if let Some(url) = cli.url {
        config.server_url = url;
    }
    if let Some(provider) = cli.provider {
        config.provider = provider;
    }

    info!(url = %config.server_url, "starting client");
    let handle = ChatClient::spawn(&config);

    // Print streamed output as it arrives.
    let mut events = handle.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => print_event(event),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    eprintln!("[{n} events dropped]");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    handle.connect().await?;
    repl(&handle).await?;

    handle.shutdown().await.ok();
    printer.abort();
    Ok(())
}

fn print_event(event: ClientEvent) {
    match event {
        ClientEvent::Connection(state) => eprintln!("[connection: {state:?}]"),
        ClientEvent::AssistantStarted => {}
        ClientEvent::Delta(chunk) => {
            print!("{chunk}");
            let _ = std::io::stdout().flush();
        }
        ClientEvent::TurnCompleted { server_id } => match server_id {
            Some(id) => println!("\n[done, message {id}]"),
            None => println!("\n[done]"),
        },
        ClientEvent::StreamError(message) => eprintln!("\n[error: {message}]"),
        ClientEvent::ConversationCreated(id) => eprintln!("[conversation {id}]"),
        ClientEvent::ConversationDeleted(id) => eprintln!("[deleted {id}]"),
        ClientEvent::TitleChanged { id, title } => eprintln!("[renamed {id}: {title}]"),
        ClientEvent::ProvidersUpdated
        | ClientEvent::ModelsUpdated
        | ClientEvent::HistoryUpdated
        | ClientEvent::ConversationLoaded => {}
    }
}

/// Read lines from stdin until EOF or `/quit`. Slash commands drive the
/// client; anything else is submitted as a prompt.
async fn repl(handle: &ClientHandle) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if !line.starts_with('/') {
            handle.submit_prompt(line).await?;
            continue;
        }

        let (command, rest) = match line.split_once(' ') {
            Some((c, r)) => (c, r.trim()),
            None => (line, ""),
        };
        match command {
            "/quit" | "/exit" => break,
            "/connect" => handle.connect().await?,
            "/disconnect" => handle.disconnect().await?,
            "/new" => handle.start_new_conversation().await?,
            "/replay" => handle.replay().await?,
            "/history" => {
                // Subscribe before sending so the update cannot slip past.
                let mut updates = handle.subscribe();
                handle.request_history(50, 0).await?;
                let arrived = tokio::time::timeout(std::time::Duration::from_secs(5), async {
                    loop {
                        match updates.recv().await {
                            Ok(ClientEvent::HistoryUpdated) => break true,
                            Ok(_) => {}
                            Err(_) => break false,
                        }
                    }
                })
                .await;
                if !matches!(arrived, Ok(true)) {
                    eprintln!("[no history response]");
                    continue;
                }
                let snap = handle.snapshot().await?;
                for item in &snap.history {
                    println!("{}  {}  [{}]", item.id, item.title, item.message_count);
                }
            }
            "/select" => {
                if rest.is_empty() {
                    eprintln!("usage: /select <conversation-id>");
                } else {
                    handle.select_conversation(rest).await?;
                }
            }
            "/delete" => {
                if rest.is_empty() {
                    eprintln!("usage: /delete <conversation-id>");
                } else {
                    handle.delete_conversation(rest).await?;
                }
            }
            "/rename" => match rest.split_once(' ') {
                Some((id, title)) if !title.trim().is_empty() => {
                    handle.rename_conversation(id, title.trim()).await?;
                }
                _ => eprintln!("usage: /rename <conversation-id> <title>"),
            },
            "/rate" => match parse_rate(rest) {
                Some(feedback) => handle.send_feedback(feedback).await?,
                None => eprintln!("usage: /rate <message-id> <-1|0|1>"),
            },
            "/provider" => {
                if rest.is_empty() {
                    eprintln!("usage: /provider <name>");
                } else {
                    handle.set_provider(rest).await?;
                }
            }
            "/model" => {
                let model = (!rest.is_empty()).then(|| rest.to_string());
                handle.set_model(model).await?;
            }
            "/state" => {
                let snap = handle.snapshot().await?;
                println!("{}", serde_json::to_string_pretty(&snap)?);
            }
            "/metrics" => {
                println!("{}", serde_json::to_string_pretty(&handle.metrics())?);
            }
            other => eprintln!("unknown command: {other}"),
        }
    }
    Ok(())
}

fn parse_rate(rest: &str) -> Option<Feedback> {
    let (id, vote) = rest.split_once(' ')?;
    let message_id = id.trim().parse().ok()?;
    let vote = vote.trim().parse().ok()?;
    Some(Feedback::vote(message_id, vote))
}
