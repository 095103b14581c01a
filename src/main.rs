//! scan-relay - remote session service for 3D scanners.
//!
//! This binary builds the scanner session, starts the HTTP server and tears
//! the session down on shutdown.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use scan_relay::{
    config::{Config, DeviceKind},
    engine::{
        BuiltinAlgorithms, CaptureDevice, FileProjectStore, SimulatedScanner, StandardMeshCodec,
    },
    server::{create_router_with_state, AppState, RouterConfig},
    session::{ScannerSession, SessionEngines},
};

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();

    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    print_banner();

    info!("Configuration:");
    match config.device {
        DeviceKind::Simulated => info!(
            "  Device: simulated ({}x{} depth grid)",
            config.simulated_grid, config.simulated_grid
        ),
        DeviceKind::None => warn!("  Device: NONE - capture calls will fail"),
    }
    match &config.save_path {
        Some(path) => info!("  Save path: {}", path.display()),
        None => info!("  Save path: not set (PUT /session/save-path to configure)"),
    }
    if let Some(timeout) = config.operation_timeout_secs {
        info!("  Operation timeout: {}s", timeout);
    }

    let session = match build_session(&config).await {
        Ok(session) => Arc::new(session),
        Err(e) => {
            error!("Failed to create scanner session: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let app_state = AppState::new(Arc::clone(&session));
    let router = create_router_with_state(app_state, build_router_config(&config));

    let addr = config.bind_address();

    info!("");
    info!("────────────────────────────────────────────────────────────────");
    info!("  Server listening on: http://{}", addr);
    info!("");
    info!("  Try these endpoints:");
    info!("    curl http://{}/health", addr);
    info!("    curl -X POST http://{}/deferred-captures", addr);
    info!("    curl http://{}/deferred-captures/1/mesh", addr);
    info!("────────────────────────────────────────────────────────────────");
    info!("");

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            return ExitCode::FAILURE;
        }
    };

    let served = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    let report = session.free_all().await;
    info!(
        "Session torn down: {} model(s) freed, {} capture(s) cleared, {} failure(s)",
        report.freed_models.len(),
        report.cleared_captures,
        report.failures.len()
    );

    if let Err(e) = served {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

/// Build the session from the configured device and bundled engines.
async fn build_session(config: &Config) -> Result<ScannerSession, scan_relay::SessionError> {
    let device: Option<Arc<dyn CaptureDevice>> = match config.device {
        DeviceKind::Simulated => {
            let scanner = SimulatedScanner::with_grid_size(config.simulated_grid);
            Some(Arc::new(scanner) as Arc<dyn CaptureDevice>)
        }
        DeviceKind::None => None,
    };

    let engines = SessionEngines {
        codec: Arc::new(StandardMeshCodec::new()),
        store: Arc::new(FileProjectStore::new()),
        algorithms: Arc::new(BuiltinAlgorithms::new()),
    };

    let mut session = ScannerSession::new(device, engines)?;
    if let Some(timeout) = config.operation_timeout() {
        session = session.with_operation_timeout(timeout);
    }
    session.set_save_path(config.save_path.clone()).await?;
    Ok(session)
}

/// Print the startup banner.
fn print_banner() {
    let version = env!("CARGO_PKG_VERSION");
    info!("");
    info!("███████╗ ██████╗ █████╗ ███╗   ██╗    ██████╗ ███████╗██╗      █████╗ ██╗   ██╗");
    info!("██╔════╝██╔════╝██╔══██╗████╗  ██║    ██╔══██╗██╔════╝██║     ██╔══██╗╚██╗ ██╔╝");
    info!("███████╗██║     ███████║██╔██╗ ██║    ██████╔╝█████╗  ██║     ███████║ ╚████╔╝ ");
    info!("╚════██║██║     ██╔══██║██║╚██╗██║    ██╔══██╗██╔══╝  ██║     ██╔══██║  ╚██╔╝  ");
    info!("███████║╚██████╗██║  ██║██║ ╚████║    ██║  ██║███████╗███████╗██║  ██║   ██║   ");
    info!("╚══════╝ ╚═════╝╚═╝  ╚═╝╚═╝  ╚═══╝    ╚═╝  ╚═╝╚══════╝╚══════╝╚═╝  ╚═╝   ╚═╝   ");
    info!("");
    info!("                                  v{}", version);
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "scan_relay=debug,tower_http=debug"
    } else {
        "scan_relay=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Build RouterConfig from the application Config.
fn build_router_config(config: &Config) -> RouterConfig {
    let mut router_config = RouterConfig::new();

    if let Some(ref origins) = config.cors_origins {
        router_config = router_config.with_cors_origins(origins.clone());
    }

    router_config.with_tracing(!config.no_tracing)
}

/// Resolve when the process receives Ctrl-C.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to install Ctrl-C handler: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
