mod bootstrap;
mod capabilities;
mod directory;
mod provider;
mod transport;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use tracing::info;

use herald_core::config::{AppConfig, ConfigOverrides, LoadOptions, LogFormat};

use crate::transport::{ChatTransport, NoopTransport, ReconnectPolicy, TransportRunner};

#[derive(Debug, Parser)]
#[command(
    name = "herald-server",
    about = "Conversational command front-end with an admission-controlled AI fallback"
)]
struct Cli {
    #[arg(long, help = "Path to the TOML config file")]
    config: Option<PathBuf>,
    #[arg(long, help = "Override the log level (trace, debug, info, warn, error)")]
    log_level: Option<String>,
    #[arg(long, help = "Override the log format (compact, pretty, json)")]
    log_format: Option<String>,
}

fn parse_log_format(raw: &str) -> Option<LogFormat> {
    match raw {
        "compact" => Some(LogFormat::Compact),
        "pretty" => Some(LogFormat::Pretty),
        "json" => Some(LogFormat::Json),
        _ => None,
    }
}

fn init_logging(config: &AppConfig) {
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        LogFormat::Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        LogFormat::Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(LoadOptions {
        config_path: cli.config,
        require_file: false,
        overrides: ConfigOverrides {
            log_level: cli.log_level,
            log_format: cli.log_format.as_deref().and_then(parse_log_format),
            ..ConfigOverrides::default()
        },
    })?;
    init_logging(&config);

    let app = bootstrap::bootstrap(config)?;

    let transport: Arc<dyn ChatTransport> = Arc::new(NoopTransport);
    info!(
        event_name = "system.server.transport_mode",
        transport_mode = "noop",
        "no platform transport configured; serving tick loop only"
    );

    let runner =
        TransportRunner::new(transport.clone(), app.runtime.clone(), ReconnectPolicy::default());
    let pump = tokio::spawn(async move { runner.run().await });

    let tick_runtime = app.runtime.clone();
    let tick_transport = transport.clone();
    let tick_interval = app.config.pipeline.tick_interval_secs;
    let ticker = tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(tick_interval));
        loop {
            interval.tick().await;
            let (notices, dispatches) = {
                let mut runtime = tick_runtime.lock().await;
                runtime.tick(Utc::now()).await
            };
            for message in &notices {
                if let Err(err) = tick_transport.deliver(message).await {
                    tracing::warn!(error = %err, "expiry notice delivery failed");
                }
            }
            for pending in dispatches {
                // Provider round-trips run between lock acquisitions so a
                // slow model never stalls inbound traffic or the next tick.
                let raw = pending.fetch().await;
                let outbound = {
                    let mut runtime = tick_runtime.lock().await;
                    runtime.absorb_completion(pending, raw, Utc::now()).await
                };
                if let Some(message) = outbound {
                    if let Err(err) = tick_transport.deliver(&message).await {
                        tracing::warn!(error = %err, "deferred reply delivery failed");
                    }
                }
            }
        }
    });

    info!(event_name = "system.server.started", "herald-server started");
    wait_for_shutdown().await?;
    info!(event_name = "system.server.stopping", "herald-server stopping");

    ticker.abort();
    pump.abort();
    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
