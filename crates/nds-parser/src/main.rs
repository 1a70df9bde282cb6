mod control;
mod decode;
mod gateway_client;
mod queue;
mod store;
mod worker;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nds_core::backend::{BackendClient, BackendResult};
use nds_core::config::{BackendConfig, RedisConfig, StoreConfig};
use nds_core::model::RemoteServer;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::decode::ReferenceDecoder;
use crate::gateway_client::GatewayClient;
use crate::queue::TaskQueue;
use crate::store::AnalyticalStoreClient;
use crate::worker::WorkerPool;

#[derive(Parser)]
#[command(name = "nds-parser", about = "NDS Parser node")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the worker pool against the task queue until shut down.
    Serve {
        #[arg(long, default_value = "0.0.0.0:7003")]
        bind: String,
        #[arg(long, default_value = "ws://127.0.0.1:7001/ws")]
        gateway_ws_url: String,
        #[arg(long)]
        backend_url: Option<String>,
        #[arg(long)]
        redis_url: Option<String>,
        #[arg(long)]
        concurrency: Option<usize>,
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
            redis_url,
            concurrency,
            log_to_file,
        } => {
            init_logging(log_to_file)?;
            serve(bind, gateway_ws_url, backend_url, redis_url, concurrency).await
        }
    }
}

fn init_logging(log_to_file: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if log_to_file {
        let dir = nds_core::config::log_dir("parser");
        std::fs::create_dir_all(&dir).context("creating parser log directory")?;
        let file_appender = tracing_appender::rolling::daily(dir, "parser.log");
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

async fn serve(
    bind: String,
    gateway_ws_url: String,
    backend_url: Option<String>,
    redis_url: Option<String>,
    concurrency: Option<usize>,
) -> Result<()> {
    let backend_cfg = BackendConfig::from_env().with_overrides(backend_url);
    let backend = Arc::new(BackendClient::new(backend_cfg));
    let gateway = Arc::new(GatewayClient::new(gateway_ws_url));

    let mut redis_cfg = RedisConfig::from_env();
    if let Some(url) = redis_url {
        redis_cfg.url = url;
    }
    let queue = Arc::new(
        TaskQueue::connect(&redis_cfg)
            .await
            .context("connecting to redis task queue")?,
    );

    let store_cfg = StoreConfig::from_env();
    let store = Arc::new(AnalyticalStoreClient::new(&store_cfg));
    store
        .probe()
        .await
        .context("analytical store connectivity probe failed")?;

    let node_id = std::env::var("NDS_PARSER_ID").unwrap_or_else(|_| "parser-1".to_string());
    let servers = fetch_assigned_servers(&backend, &node_id).await;
    for server in &servers {
        queue.register_source(&server.id).await;
    }
    tracing::info!(count = servers.len(), "registered source queues");

    let concurrency = concurrency.unwrap_or_else(num_cpus::get);
    let decoder = Arc::new(ReferenceDecoder);
    let pool = Arc::new(WorkerPool::new(queue, gateway, backend, store, decoder, concurrency));

    let app_state = control::AppState {
        pool: pool.clone(),
        started_at: std::time::Instant::now(),
    };
    let app = control::router(app_state);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("binding parser control listener on {bind}"))?;
    tracing::info!(%bind, concurrency, "nds-parser worker pool starting");

    tokio::select! {
        _ = pool.run() => {},
        result = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()) => {
            result.context("parser control server error")?;
        }
    }
    pool.stop_handle().store(true, std::sync::atomic::Ordering::SeqCst);
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
