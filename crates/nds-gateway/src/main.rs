mod api;
mod client;
mod control;
mod pool;
mod transport;
mod zip_introspect;

use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nds_core::backend::{BackendClient, BackendResult};
use nds_core::config::{BackendConfig, DuplexConfig, PoolConfig};
use nds_core::model::RemoteServer;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "nds-gateway", about = "NDS Gateway node")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the Gateway's control HTTP + duplex WebSocket server.
    Serve {
        #[arg(long, default_value = "0.0.0.0:7001")]
        bind: String,
        #[arg(long)]
        backend_url: Option<String>,
        #[arg(long, default_value_t = false)]
        log_to_file: bool,
    },
    /// Print the pool status this node would report, without serving.
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            bind,
            backend_url,
            log_to_file,
        } => {
            init_logging(log_to_file)?;
            serve(bind, backend_url).await
        }
        Commands::Status => {
            init_logging(false)?;
            tracing::info!("nds-gateway status: no running instance to query from the CLI directly; use GET /status");
            Ok(())
        }
    }
}

fn init_logging(log_to_file: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if log_to_file {
        let dir = nds_core::config::log_dir("gateway");
        std::fs::create_dir_all(&dir).context("creating gateway log directory")?;
        let file_appender = tracing_appender::rolling::daily(dir, "gateway.log");
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

async fn serve(bind: String, backend_url: Option<String>) -> Result<()> {
    let backend_cfg = BackendConfig::from_env().with_overrides(backend_url);
    let backend = BackendClient::new(backend_cfg);

    let node_id = std::env::var("NDS_GATEWAY_ID").unwrap_or_else(|_| "gateway-1".to_string());
    let servers = fetch_assigned_servers(&backend, &node_id).await;
    tracing::info!(count = servers.len(), "loaded assigned remote servers");

    let ctx = api::GatewayContext {
        servers: Arc::new(servers),
        pools: Arc::new(pool::PoolRegistry::new(PoolConfig::from_env())),
        duplex_cfg: DuplexConfig::default(),
    };
    let service = Arc::new(control::ServiceState {
        started_at: std::time::Instant::now(),
        requests_served: AtomicU64::new(0),
    });
    let app_state = control::AppState { ctx, service };
    let app = control::router(app_state);

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("binding gateway listener on {bind}"))?;
    tracing::info!(%bind, "nds-gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("gateway server error")?;
    Ok(())
}

async fn fetch_assigned_servers(backend: &BackendClient, node_id: &str) -> HashMap<String, RemoteServer> {
    match backend.get_assigned_servers(node_id).await {
        BackendResult::Ok(value) => serde_json::from_value::<Vec<RemoteServer>>(value)
            .map(|list| list.into_iter().map(|s| (s.id.clone(), s)).collect())
            .unwrap_or_default(),
        BackendResult::RateLimited => {
            tracing::warn!("backend rate-limited the server roster request");
            HashMap::new()
        }
        BackendResult::ServerError(code) => {
            tracing::error!(code, "backend server error fetching roster");
            HashMap::new()
        }
        BackendResult::ClientError(code) => {
            tracing::error!(code, "backend rejected roster request");
            HashMap::new()
        }
        BackendResult::ConnectError(err) => {
            tracing::error!(%err, "could not reach backend for roster");
            HashMap::new()
        }
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
