use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use thiserror::Error;
use tokio::signal;
use tracing::{error, info, warn};

use turm_server::config::{ConfigError, ConfigLoader};
use turm_server::gateway::{CommandGateway, ServerError};
use turm_server::logging::init_tracing;
use turm_server::port::{SerialTransport, TokioSerialTransport};
use turm_server::session::{DeviceSession, SessionError};

// Command-line arguments
#[derive(Parser, Debug)]
#[command(
    version,
    about = "HTTP gateway for a serial-attached device.",
    long_about = "Owns one serial connection and exposes version, status and command submission over HTTP for a browser client."
)]
struct Args {
    /// Configuration file (TOML, or JSON by extension).
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Override `server.port`.
    #[arg(short, long)]
    port: Option<u16>,
}

/// Failures after configuration was accepted.
#[derive(Debug, Error)]
enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Server(#[from] ServerError),
}

const EXIT_CONFIG: u8 = 1;
const EXIT_STARTUP: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    eprintln!("turm-server v{}", env!("CARGO_PKG_VERSION"));

    let mut config = match ConfigLoader::load(args.config.as_deref()) {
        Ok(loader) => {
            eprintln!("configuration loaded from {}", loader.config_path.display());
            loader.into_config()
        }
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };
    if let Some(port) = args.port {
        config.server.get_or_insert_with(Default::default).port = Some(i64::from(port));
    }

    if let Err(e) = init_tracing(&config.logging) {
        eprintln!("Error: {e}");
        return ExitCode::from(EXIT_CONFIG);
    }
    if let Err(e) = config.validate() {
        error!(error = %e, "invalid configuration");
        return ExitCode::from(EXIT_CONFIG);
    }

    match run(&config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %turm_server::gateway::error_chain(&e), "startup failed");
            ExitCode::from(EXIT_STARTUP)
        }
    }
}

async fn run(config: &turm_server::Config) -> Result<(), StartupError> {
    let transport: Arc<dyn SerialTransport> = Arc::new(TokioSerialTransport::new());
    let session = DeviceSession::create_instance(config.serial()?, transport).await?;

    let gateway = CommandGateway::create_instance(Arc::clone(&session)).await?;
    gateway.init(config.server()?)?;
    let addr = gateway.start().await?;
    eprintln!("listening on http://{addr}");

    shutdown_signal().await;

    if let Err(e) = gateway.stop().await {
        warn!(error = %e, "HTTP server did not stop cleanly");
    }
    if !session.is_disabled() {
        if let Err(e) = session.close().await {
            warn!(error = %e, "serial session not closed");
        }
    }
    info!("shutdown complete");
    Ok(())
}

// --- Graceful Shutdown Handler ---
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

    info!("signal received, starting graceful shutdown");
}
