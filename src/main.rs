// ABOUTME: Main entry point for the redibot relay
// ABOUTME: Initializes logging and config, builds the store connector, and runs the dispatcher

use anyhow::{Context, Result};
use clap::Parser;
use redibot::{
    config::Config, health, metrics, platform::StdioTransport, ChatTransport, ConnectorRegistry,
    Dispatcher, Relay,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "redibot", version, about = "Relay chat commands to Redis endpoints")]
struct Args {
    /// Path to config.toml (defaults to ./config.toml, then the user config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Read commands from stdin and write replies to stdout instead of Slack
    #[arg(long)]
    stdio: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    std::panic::set_hook(Box::new(|panic_info| {
        tracing::error!(panic = %panic_info, "redibot panicked");
        eprintln!("{}", panic_info);
        eprintln!("{:?}", std::backtrace::Backtrace::force_capture());
    }));

    // Logs go to stderr; stdout carries replies in stdio mode
    let json_layer = args
        .json_logs
        .then(|| tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr));
    let text_layer = (!args.json_logs)
        .then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(json_layer)
        .with(text_layer)
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting redibot");

    dotenvy::dotenv().ok();
    let config = Config::load_from(args.config.as_deref())?;

    let connectors = ConnectorRegistry::default();
    let connector = connectors
        .create(&config.store.backend, &config.store.options)
        .with_context(|| {
            format!(
                "Failed to create '{}' store connector (available: {})",
                config.store.backend,
                connectors.available().join(", ")
            )
        })?;

    let pool_config = config.pool.to_pool_config();
    tracing::info!(
        backend = %config.store.backend,
        max_idle = pool_config.max_idle,
        max_active = pool_config.max_active,
        health_enabled = config.health.enabled,
        allowed_users = config.dispatcher.allowed_users.len(),
        "Configuration loaded"
    );

    let relay = Arc::new(Relay::new(connector, pool_config));

    let transport: Arc<dyn ChatTransport> = if args.stdio {
        Arc::new(StdioTransport::new())
    } else {
        slack_transport(&config).await?
    };

    let dispatcher = Dispatcher::new(
        Arc::clone(&transport),
        relay,
        config.dispatcher.to_dispatcher_config(),
    );
    let shutdown = dispatcher.shutdown_token();

    let health_shutdown = CancellationToken::new();
    let health_task = if config.health.enabled {
        let handle = metrics::init_metrics()?;
        let addr = config.health.bind_address();
        let token = health_shutdown.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = health::start_health_server(&addr, handle, token).await {
                tracing::error!(error = %e, "Health server stopped");
            }
        }))
    } else {
        None
    };

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("Shutdown signal received");
        signal_token.cancel();
    });

    tracing::info!(transport = transport.transport_id(), "Bot ready");
    let outcome = dispatcher.run().await;

    health_shutdown.cancel();
    if let Some(task) = health_task {
        let _ = task.await;
    }

    match outcome {
        Ok(()) => {
            tracing::info!("redibot stopped");
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, "Dispatcher failed");
            std::process::exit(1);
        }
    }
}

#[cfg(feature = "slack")]
async fn slack_transport(config: &Config) -> Result<Arc<dyn ChatTransport>> {
    let slack = config.slack_config()?;
    let transport = redibot::platform::SlackTransport::new(slack).await?;
    Ok(Arc::new(transport))
}

#[cfg(not(feature = "slack"))]
async fn slack_transport(_config: &Config) -> Result<Arc<dyn ChatTransport>> {
    anyhow::bail!("Built without Slack support; run with --stdio")
}

/// Resolves on Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
