use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use chatbox::channel::{LiveChannel, ReconnectPolicy};
use chatbox::interface;
use chatbox::session::Session;
use chatbox::transport::{HttpTransport, TransportConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env first so a RUST_LOG set there reaches the subscriber.
    let dotenv = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    if let Err(e) = dotenv {
        // It's not fatal if .env doesn't exist, but good to know
        info!("No .env file found or failed to load: {}", e);
    }

    let session = login().await?;
    info!(
        "Logged in as {} against {}",
        session.identity, session.base_url
    );

    let reconnect = match std::env::var("CHATBOX_RECONNECT").as_deref() {
        Ok("backoff") => ReconnectPolicy::Backoff {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
        },
        _ => ReconnectPolicy::Never,
    };

    let transport = Arc::new(HttpTransport::new(TransportConfig::default())?);
    let channel = LiveChannel::new(transport.clone(), session, reconnect);

    let download_dir = match std::env::var("CHATBOX_DOWNLOAD_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(_) => std::env::current_dir()?,
    };

    let terminal = interface::terminal::Terminal::new(channel, transport, download_dir);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        res = terminal.run() => {
            res?;
        }
    }

    Ok(())
}

/// Collect identity and host from the environment or by prompting, and keep
/// asking until they validate.
async fn login() -> anyhow::Result<Session> {
    let mut identity = std::env::var("CHATBOX_IDENTITY").ok();
    let mut host = std::env::var("CHATBOX_HOST").ok();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let host_value = match host.take() {
            Some(value) => value,
            None => prompt(&mut lines, "Enter server IP:").await?,
        };
        let identity_value = match identity.take() {
            Some(value) => value,
            None => prompt(&mut lines, "Enter your username:").await?,
        };

        match Session::new(identity_value, host_value) {
            Ok(session) => return Ok(session),
            Err(e) => println!("{}", e),
        }
    }
}

async fn prompt(
    lines: &mut tokio::io::Lines<BufReader<tokio::io::Stdin>>,
    label: &str,
) -> anyhow::Result<String> {
    println!("{}", label);
    match lines.next_line().await? {
        Some(line) => Ok(line),
        None => anyhow::bail!("stdin closed during login"),
    }
}
