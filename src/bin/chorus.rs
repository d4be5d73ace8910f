//! Chorus - interactive client for a chorus server
//!
//! Every line typed on stdin is sent to the server. Every broadcast the
//! server relays is printed with a local timestamp.
//!
//! # Usage
//!
//! ```text
//! chorus                          # connect to ws://127.0.0.1:8765
//! chorus --url ws://10.0.0.5:9000 # connect elsewhere
//! chorus --no-reconnect           # exit when the connection drops
//! ```

use std::env;
use std::io::{self, BufRead};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use chorus_client::{ChatClient, ClientConfig, ClientEvent, DEFAULT_URL};

/// Buffered lines waiting to be sent
const LINE_BUFFER: usize = 64;

/// Chorus client - chat with everyone connected to a chorus server
#[derive(Parser, Debug)]
#[command(name = "chorus", version, about)]
struct Args {
    /// Server WebSocket URL
    #[arg(short, long, default_value = DEFAULT_URL)]
    url: String,

    /// Exit instead of reconnecting when the connection drops
    #[arg(long)]
    no_reconnect: bool,

    /// Initial reconnect delay in milliseconds
    #[arg(long, default_value_t = 1000)]
    retry_initial_ms: u64,

    /// Maximum reconnect delay in milliseconds
    #[arg(long, default_value_t = 30_000)]
    retry_max_ms: u64,
}

/// Log directives used when `RUST_LOG` is unset or unparseable
const DEFAULT_LOG_FILTER: &str = "chorus_client=warn";

/// Builds the log filter from `RUST_LOG`, falling back to the defaults.
fn log_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Forwards non-empty input lines until EOF or the receiver goes away.
///
/// Runs on its own OS thread so a read blocked on a terminal never keeps
/// the runtime from shutting down.
fn spawn_line_reader<R>(input: R, lines: mpsc::Sender<String>) -> thread::JoinHandle<()>
where
    R: BufRead + Send + 'static,
{
    thread::spawn(move || {
        for line in input.lines() {
            let Ok(line) = line else { break };
            if line.is_empty() {
                continue;
            }
            if lines.blocking_send(line).is_err() {
                break;
            }
        }
        debug!("Input closed");
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // stdout carries chat lines only
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(log_filter(env::var(EnvFilter::DEFAULT_ENV).ok().as_deref()))
        .init();

    let config = ClientConfig {
        url: args.url,
        reconnect: !args.no_reconnect,
        retry_initial_delay: Duration::from_millis(args.retry_initial_ms),
        retry_max_delay: Duration::from_millis(args.retry_max_ms),
        ..Default::default()
    };

    let cancel_token = CancellationToken::new();
    let (line_tx, line_rx) = mpsc::channel(LINE_BUFFER);
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();

    // Dropping the sender on EOF ends the client; the thread is never joined
    spawn_line_reader(io::BufReader::new(io::stdin()), line_tx);

    let ctrl_c_token = cancel_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted");
            ctrl_c_token.cancel();
        }
    });

    let client = ChatClient::new(config, line_rx, event_tx, cancel_token);
    let client_task = tokio::spawn(client.run());

    while let Some(event) = event_rx.recv().await {
        let stamp = Local::now().format("%H:%M:%S");
        match event {
            ClientEvent::Connected => eprintln!("[{stamp}] connected"),
            ClientEvent::Message(incoming) => println!("[{stamp}] {}", incoming.raw),
            ClientEvent::Disconnected { reason } => eprintln!("[{stamp}] disconnected: {reason}"),
            ClientEvent::Reconnecting { delay } => {
                eprintln!("[{stamp}] reconnecting in {}ms", delay.as_millis());
            }
        }
    }

    client_task
        .await
        .context("Client task failed")?
        .context("Connection to server failed")?;
    Ok(())
}
