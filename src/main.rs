use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use observation_sync::{http, AppState, Config, SyncEvent, TranscriptionSyncClient};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "observation-sync", version, about = "Real-time transcription sync for classroom observation")]
struct Cli {
    /// Configuration file (extension optional)
    #[arg(long, default_value = "config/observation-sync")]
    config: String,

    /// Override the observation server base URL
    #[arg(long)]
    server: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Probe the observation server
    Status,
    /// Record and print the live transcript
    Record {
        /// Use the push channel (falls back to polling)
        #[arg(long)]
        socket: bool,
        /// Use polling only
        #[arg(long, conflicts_with = "socket")]
        polling: bool,
        /// Stop after this many seconds instead of waiting for Ctrl-C
        #[arg(long)]
        duration_secs: Option<u64>,
    },
    /// Clear the server transcript
    Clear,
    /// Append text to the server transcript (debug helper)
    Inject { text: String },
    /// Run the stub observation server
    StubServer {
        #[arg(long)]
        bind: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let mut cfg = Config::load(&cli.config)?;
    if let Some(server) = cli.server {
        cfg.server.base_url = server;
    }

    match cli.command {
        Command::Status => {
            let client = TranscriptionSyncClient::new(cfg, observation_sync::NoopObserver);
            if client.check_server_reachable().await {
                println!("reachable: {}", client.config().server.base_url);
            } else {
                bail!("observation server at {} is unreachable", client.config().server.base_url);
            }
        }
        Command::Record {
            socket,
            polling,
            duration_secs,
        } => {
            let prefer_socket = socket || (!polling && cfg.client.prefer_socket);
            record(cfg, prefer_socket, duration_secs.map(Duration::from_secs)).await?;
        }
        Command::Clear => {
            let client = TranscriptionSyncClient::new(cfg, observation_sync::NoopObserver);
            client.clear_transcript().await;
            println!("cleared");
        }
        Command::Inject { text } => {
            let client = TranscriptionSyncClient::new(cfg, observation_sync::NoopObserver);
            if !client.inject_test_text(&text).await {
                bail!("observation server did not accept the text");
            }
        }
        Command::StubServer { bind, port } => {
            let addr = format!(
                "{}:{}",
                bind.unwrap_or(cfg.stub.bind),
                port.unwrap_or(cfg.stub.port)
            );
            let listener = TcpListener::bind(&addr)
                .await
                .with_context(|| format!("Failed to bind {}", addr))?;
            http::serve(listener, AppState::new()).await?;
        }
    }

    Ok(())
}

async fn record(cfg: Config, prefer_socket: bool, duration: Option<Duration>) -> Result<()> {
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let mut client = TranscriptionSyncClient::new(cfg, events_tx);

    let session = client.start_recording(prefer_socket).await?;
    info!("Recording {} over {} (Ctrl-C to stop)", session.id, session.transport);

    let stop = async {
        match duration {
            Some(duration) => tokio::time::sleep(duration).await,
            None => {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!("Failed to listen for Ctrl-C: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        }
    };
    tokio::pin!(stop);

    loop {
        tokio::select! {
            _ = &mut stop => break,
            event = events_rx.recv() => match event {
                Some(event) => render(&event),
                None => break,
            },
        }
    }

    client.stop_recording().await;
    while let Ok(event) = events_rx.try_recv() {
        render(&event);
    }

    let snapshot = client.snapshot().await;
    println!("{}", serde_json::to_string_pretty(&snapshot.stats)?);
    client.dispose().await;

    Ok(())
}

fn render(event: &SyncEvent) {
    match event {
        SyncEvent::Transcript(fragment) => {
            println!("[{}] {}", fragment.classification, fragment.full_text);
        }
        SyncEvent::Cleared => println!("(transcript cleared)"),
        SyncEvent::State(snapshot) => {
            let transport = snapshot
                .session
                .as_ref()
                .map(|s| s.transport.to_string())
                .unwrap_or_else(|| "-".to_string());
            println!(
                "-- {} (recording: {}, transport: {})",
                snapshot.connection,
                snapshot.is_recording(),
                transport
            );
        }
        SyncEvent::TransientError { message } => eprintln!("!! {}", message),
        SyncEvent::TransientCleared => eprintln!("!! recovered"),
        SyncEvent::SessionLost { reason } => eprintln!("!! session lost: {}", reason),
    }
}
