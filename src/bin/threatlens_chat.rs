//! Terminal client for the Threatlens relay
//!
//! Streams a chat reply or a country threat analysis to stdout as it
//! arrives. Ctrl+C stops the stream and keeps the partial text.

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use threatlens::analysis::{chat_request, CountryProfile, Threat};
use threatlens::client::{RelayClient, RelayClientConfig, SessionReport, SessionState, StreamConsumer};
use threatlens::completion::ChatMessage;

/// Threatlens relay client
#[derive(Parser)]
#[command(name = "threatlens-chat", version)]
struct Cli {
    /// Relay origin (overrides THREATLENS_RELAY_URL)
    #[arg(long, global = true)]
    relay_url: Option<String>,

    /// Model identifier (overrides THREATLENS_MODEL)
    #[arg(long, global = true)]
    model: Option<String>,

    /// Seconds without data before a stream is abandoned, 0 to wait forever
    #[arg(long, global = true)]
    idle_timeout: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ask a free-form question.
    Chat {
        /// Optional system prompt.
        #[arg(short, long)]
        system: Option<String>,

        /// Sampling temperature.
        #[arg(short, long)]
        temperature: Option<f32>,

        /// Question text.
        #[arg(required = true)]
        prompt: Vec<String>,
    },
    /// Stream a threat analysis for one country.
    Analyze {
        /// ISO country code.
        #[arg(long)]
        code: String,

        /// Country name.
        #[arg(long)]
        name: String,

        #[arg(long, default_value = "Unknown")]
        capital: String,

        #[arg(long, default_value = "Unknown")]
        continent: String,

        /// JSON file holding an array of threat events.
        #[arg(long)]
        threats: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "threatlens=warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = RelayClientConfig::from_env()?;
    if let Some(url) = cli.relay_url {
        config.base_url = url;
    }
    if let Some(model) = cli.model {
        config.model = model;
    }
    if let Some(secs) = cli.idle_timeout {
        config.idle_timeout = (secs > 0).then(|| Duration::from_secs(secs));
    }

    let client = RelayClient::new(reqwest::Client::new(), config);

    let report = match cli.command {
        Command::Chat {
            system,
            temperature,
            prompt,
        } => run_chat(client, system, temperature, prompt.join(" ")).await,
        Command::Analyze {
            code,
            name,
            capital,
            continent,
            threats,
        } => {
            let country = CountryProfile {
                code,
                name,
                capital,
                continent,
            };
            let threats = match threats {
                Some(path) => load_threats(&path)?,
                None => Vec::new(),
            };
            run_analysis(client, country, threats).await
        }
    };

    println!();
    match report.state {
        SessionState::Completed => {
            if report.skipped_frames > 0 {
                eprintln!("[skipped {} malformed frames]", report.skipped_frames);
            }
            Ok(())
        }
        SessionState::Stopped => {
            eprintln!("[stopped]");
            Ok(())
        }
        _ => {
            let message = report
                .error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "stream failed".to_string());
            eprintln!("error: {message}");
            std::process::exit(1);
        }
    }
}

async fn run_chat(
    client: RelayClient,
    system: Option<String>,
    temperature: Option<f32>,
    prompt: String,
) -> SessionReport {
    let mut messages = Vec::new();
    if let Some(system) = system {
        messages.push(ChatMessage::system(system));
    }
    messages.push(ChatMessage::user(prompt));

    let mut request = chat_request(client.model(), messages);
    if let Some(temperature) = temperature {
        request = request.with_temperature(temperature);
    }
    let session = client.start(request);

    let cancel = session.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let done = CancellationToken::new();
    let echo = tokio::spawn(echo_text(session.subscribe_text(), done.clone()));

    let report = session.finish().await;
    done.cancel();
    let _ = echo.await;
    report
}

async fn run_analysis(
    client: RelayClient,
    country: CountryProfile,
    threats: Vec<Threat>,
) -> SessionReport {
    let mut consumer = StreamConsumer::new(client);

    let stop = consumer.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stop.stop();
        }
    });

    let done = CancellationToken::new();
    let echo = tokio::spawn(echo_text(consumer.subscribe_analysis(), done.clone()));

    let report = consumer.analyze_threats(&country, &threats).await;
    done.cancel();
    let _ = echo.await;
    report
}

/// Print each new suffix of the growing text buffer
async fn echo_text(mut text: watch::Receiver<String>, done: CancellationToken) {
    let mut stdout = std::io::stdout();
    let mut printed = 0;

    loop {
        let finished = tokio::select! {
            changed = text.changed() => changed.is_err(),
            _ = done.cancelled() => true,
        };

        let current = text.borrow_and_update().clone();
        if current.len() < printed {
            printed = 0;
        }
        if let Some(delta) = current.get(printed..) {
            let _ = write!(stdout, "{delta}");
            let _ = stdout.flush();
            printed = current.len();
        }

        if finished {
            break;
        }
    }
}

fn load_threats(path: &PathBuf) -> Result<Vec<Threat>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid threat list in {}", path.display()))
}
