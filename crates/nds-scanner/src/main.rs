mod control;
mod gateway_client;
mod scanner;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nds_core::backend::{BackendClient, BackendResult};
use nds_core::config::BackendConfig;
use nds_core::model::RemoteServer;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::gateway_client::GatewayClient;
use crate::scanner::{Scanner, ScannerConfig};

#[derive(Parser)]
#[command(name = "nds-scanner", about = "NDS Scanner node")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scan loop plus its lifecycle control endpoints.
    Serve {
        #[arg(long, default_value = "0.0.0.0:7002")]
        bind: String,
        #[arg(long, default_value = "ws://127.0.0.1:7001/ws")]
        gateway_ws_url: String,
        #[arg(long)]
        backend_url: Option<String>,
        #[arg(long, default_value_t = false)]
        log_to_file: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Serve {
            bind,
            gateway_ws_url,
            backend_url,
            log_to_file,
        } => {
            init_logging(log_to_file)?;
            serve(bind, gateway_ws_url, backend_url).await
        }
    }
}

fn init_logging(log_to_file: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if log_to_file {
        let dir = nds_core::config::log_dir("scanner");
        std::fs::create_dir_all(&dir).context("creating scanner log directory")?;
        let file_appender = tracing_appender::rolling::daily(dir, "scanner.log");
        let (writer, guard) = tracing_appender::non_blocking(file_appender);
        Box::leak(Box::new(guard));
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(writer))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
    Ok(())
}

async fn serve(bind: String, gateway_ws_url: String, backend_url: Option<String>) -> Result<()> {
    let backend_cfg = BackendConfig::from_env().with_overrides(backend_url);
    let backend = BackendClient::new(backend_cfg);
    let gateway = GatewayClient::new(gateway_ws_url);

    let node_id = std::env::var("NDS_SCANNER_ID").unwrap_or_else(|_| "scanner-1".to_string());
    let servers = fetch_assigned_servers(&backend, &node_id).await;
    tracing::info!(count = servers.len(), "loaded assigned remote servers");

    let scanner = Arc::new(Scanner::new(gateway, backend, servers, ScannerConfig::default()));
    let run_handle = {
        let scanner = scanner.clone();
        tokio::spawn(async move { scanner.run().await })
    };

    let app_state = control::AppState {
        scanner: scanner.clone(),
        started_at: std::time::Instant::now(),
    };
    let app = control::router(app_state);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("binding scanner control listener on {bind}"))?;
    tracing::info!(%bind, "nds-scanner listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("scanner control server error")?;

    scanner
        .stop_handle()
        .store(true, std::sync::atomic::Ordering::SeqCst);
    let _ = run_handle.await;
    Ok(())
}

async fn fetch_assigned_servers(backend: &BackendClient, node_id: &str) -> Vec<RemoteServer> {
    match backend.get_assigned_servers(node_id).await {
        BackendResult::Ok(value) => serde_json::from_value(value).unwrap_or_default(),
        BackendResult::RateLimited => {
            tracing::warn!("backend rate-limited the server roster request");
            Vec::new()
        }
        BackendResult::ServerError(code) => {
            tracing::error!(code, "backend server error fetching roster");
            Vec::new()
        }
        BackendResult::ClientError(code) => {
            tracing::error!(code, "backend rejected roster request");
            Vec::new()
        }
        BackendResult::ConnectError(err) => {
            tracing::error!(%err, "could not reach backend for roster");
            Vec::new()
        }
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
