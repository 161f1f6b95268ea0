use std::sync::Arc;

use mcp_workflowy_gateway::cache::{CacheBackend, CachePolicy, FileBackend, MemoryBackend, ResponseCache};
use mcp_workflowy_gateway::config::{CacheMode, ServerConfig, Transport};
use mcp_workflowy_gateway::credentials::{ConnectorTokenCodec, CredentialResolver, MemoryTokenStore};
use mcp_workflowy_gateway::dedup::{RequestDeduplicator, SWEEP_INTERVAL};
use mcp_workflowy_gateway::handlers::tools::ToolRegistry;
use mcp_workflowy_gateway::handlers::Dispatcher;
use mcp_workflowy_gateway::http;
use mcp_workflowy_gateway::server::StdioServer;
use mcp_workflowy_gateway::upstream::HttpUpstreamClient;
use mockable::DefaultClock;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    // stdout carries the stdio protocol; logs go to stderr.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

fn build_dispatcher(config: &ServerConfig) -> Result<Dispatcher, String> {
    let clock = Arc::new(DefaultClock);

    let upstream = HttpUpstreamClient::new(&config.upstream_url, config.upstream_timeout)
        .map_err(|e| e.to_string())?;
    let registry = ToolRegistry::workflowy().map_err(|e| e.to_string())?;
    let resolver = CredentialResolver::new(
        config.auth.api_keys.clone(),
        config.default_credentials.clone(),
        Arc::new(ConnectorTokenCodec),
        Arc::new(MemoryTokenStore::new()),
        clock.clone(),
    );

    let dispatcher = Dispatcher::new(
        registry,
        resolver,
        Arc::new(upstream),
        Arc::new(RequestDeduplicator::default()),
    )
    .with_options(config.dispatch_options());

    let backend: Option<Arc<dyn CacheBackend>> = match config.cache {
        CacheMode::Memory => Some(Arc::new(MemoryBackend::new())),
        CacheMode::File => {
            info!(dir = %config.cache_dir.display(), "using file cache");
            Some(Arc::new(FileBackend::new(config.cache_dir.clone())))
        }
        CacheMode::Off => None,
    };

    Ok(match backend {
        Some(backend) => dispatcher.with_cache(ResponseCache::new(backend, CachePolicy::default(), clock)),
        None => dispatcher,
    })
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    init_tracing();

    let config = match ServerConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    let dispatcher = match build_dispatcher(&config) {
        Ok(d) => d,
        Err(e) => {
            error!("startup failed: {e}");
            std::process::exit(1);
        }
    };
    let _sweeper = dispatcher.dedup().spawn_sweeper(SWEEP_INTERVAL);

    info!(
        transport = ?config.transport,
        environment = ?config.environment,
        require_auth = config.auth.required,
        "starting {}",
        env!("CARGO_PKG_NAME")
    );

    let result = match config.transport {
        Transport::Stdio => StdioServer::new(dispatcher).run().await,
        Transport::Http => http::serve(config.http_addr, dispatcher).await,
    };
    if let Err(e) = result {
        error!("fatal error: {e}");
        std::process::exit(1);
    }
}
