use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;
use clap::Parser;
use tracing::info;

use vector_voice::audio::{CpalSink, CpalSource, PlaybackScheduler};
use vector_voice::config::AppConfig;
use vector_voice::realtime::{ConnectionState, RealtimeCallbacks, RealtimeClient};

/// Vector voice client - spoken career assessment over the realtime API
#[derive(Parser, Debug)]
#[command(name = "vector-voice")]
#[command(version, about, long_about = None)]
struct Cli {
    /// API key (falls back to OPENAI_API_KEY)
    #[arg(long = "api-key", value_name = "KEY")]
    api_key: Option<String>,

    /// Realtime model id
    #[arg(short = 'm', long = "model", value_name = "MODEL")]
    model: Option<String>,

    /// Assistant voice id
    #[arg(long = "voice", value_name = "VOICE")]
    voice: Option<String>,

    /// Path to a system instructions file
    #[arg(short = 'i', long = "instructions", value_name = "FILE")]
    instructions: Option<PathBuf>,

    /// Start with the microphone muted
    #[arg(long = "muted")]
    muted: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vector_voice=info".into()),
        )
        .init();

    // Initialize crypto provider for TLS connections before any are made
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();
    let config = AppConfig::load(cli.api_key, cli.model, cli.voice, cli.instructions)?;

    info!(
        "starting session (model {}, voice {})",
        config.model, config.voice
    );

    let sink = Arc::new(CpalSink::open()?);
    let scheduler = PlaybackScheduler::new(sink);

    let callbacks = RealtimeCallbacks::default()
        .with_status(Arc::new(|state| {
            Box::pin(async move {
                println!("-- status: {state}");
            })
        }))
        .with_log(Arc::new(|message, severity| {
            Box::pin(async move {
                println!("[{severity}] {message}");
            })
        }))
        .with_user_speaking(Arc::new(|speaking| {
            Box::pin(async move {
                if speaking {
                    println!("-- you are speaking");
                }
            })
        }))
        .with_assistant_speaking(Arc::new(|speaking| {
            Box::pin(async move {
                println!(
                    "-- assistant {}",
                    if speaking { "speaking" } else { "listening" }
                );
            })
        }))
        .with_structured_payload(Arc::new(|value| {
            Box::pin(async move {
                match serde_json::to_string_pretty(&value) {
                    Ok(pretty) => println!("== profile ==\n{pretty}"),
                    Err(_) => println!("== profile ==\n{value}"),
                }
            })
        }));

    let client = Arc::new(RealtimeClient::new(
        config.realtime_config(),
        callbacks,
        Box::new(CpalSource::new()),
        scheduler,
    )?);

    if cli.muted {
        client.set_muted(true).await;
    }

    client.connect().await?;

    // Run until the user interrupts or the transport ends the session.
    let poll_client = client.clone();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
        }
        _ = async {
            loop {
                tokio::time::sleep(std::time::Duration::from_millis(250)).await;
                if poll_client.state() == ConnectionState::Disconnected {
                    break;
                }
            }
        } => {
            info!("session ended by remote");
        }
    }

    client.disconnect().await;
    Ok(())
}
