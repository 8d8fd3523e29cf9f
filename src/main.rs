use anyhow::{Context, Result};
use clap::Parser;
use dotenv::dotenv;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;

mod cli;

use cli::{Cli, Commands};
use sftpgate::auth::AuthService;
use sftpgate::config::Config;
use sftpgate::events::EventBus;
use sftpgate::namespace::UploadClock;
use sftpgate::server::GatewayServer;
use sftpgate::sessions::{IDLE_TIMEOUT, SessionRegistry};
use sftpgate::storage::{ObjectStore, S3Store};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();

    let config = Arc::new(Config::from_env().context("invalid configuration")?);
    init_tracing(&config);

    match cli.command {
        Commands::Serve => serve(config).await,
    }
}

fn init_tracing(config: &Config) {
    let default = if config.log_enabled {
        config.log_level.clone()
    } else {
        "off".to_string()
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .init();
}

async fn serve(config: Arc<Config>) -> Result<()> {
    let store: Arc<dyn ObjectStore> = Arc::new(S3Store::new(&config).await);
    let events = EventBus::new(256);
    spawn_event_log(&events);

    let registry = SessionRegistry::new(events.clone(), IDLE_TIMEOUT);
    let clock = Arc::new(UploadClock::new());
    let auth = Arc::new(AuthService::new(
        Arc::clone(&store),
        events.clone(),
        Arc::clone(&config),
    ));

    let mut server = GatewayServer::new(
        Arc::clone(&config),
        store,
        events,
        Arc::clone(&registry),
        clock,
        auth,
    );

    tokio::select! {
        result = server.run() => {
            result.context("server terminated")?;
        }
        _ = shutdown_signal() => {
            tracing::info!("shutting down");
            registry.disconnect_all().await;
        }
    }
    Ok(())
}

/// Mirror every bus event into the operator log.
fn spawn_event_log(events: &EventBus) {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => tracing::info!(event = event.name(), "{event:?}"),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event log fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
