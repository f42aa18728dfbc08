use anyhow::{anyhow, Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use xchain_router::adapters::simulated::{SimulatedChainAdapter, SimulatedChainConfig};
use xchain_router::adapters::ChainAdapter;
use xchain_router::config::RouterConfig;
use xchain_router::registry::DeploymentRegistry;
use xchain_router::router::{create_api_router, ExecutionRouter, RouterFactory};
use xchain_router::security::keys::KeyStore;
use xchain_router::security::SecurityLayer;
use xchain_router::telemetry::{TelemetrySink, TracingSink};

static ROUTER: RouterFactory = RouterFactory::new();

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing().context("initialize tracing subscriber")?;

    if let Err(err) = run().await {
        tracing::error!(error = ?err, "fatal router error");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> Result<()> {
    let config = Arc::new(RouterConfig::load().context("load configuration from environment")?);

    let router = ROUTER
        .get_or_init(|| {
            let config = config.clone();
            async move {
                let sink: Arc<dyn TelemetrySink> = Arc::new(TracingSink);
                let registry = Arc::new(DeploymentRegistry::new(
                    config.max_history_length,
                    config.min_executions_for_stats,
                    config.stats_relevance_period_ms,
                ));
                let keys = Arc::new(KeyStore::new(
                    config.key_rotation_interval_ms,
                    config.key_storage_mode,
                ));
                let security = Arc::new(SecurityLayer::new(
                    config.clone(),
                    registry.clone(),
                    keys,
                    sink.clone(),
                ));
                Arc::new(ExecutionRouter::new(config, registry, security, sink))
            }
        })
        .await;

    // Built-in simulated backends; real chain clients register through the
    // same trait.
    for chain_id in &config.allowed_chains {
        let adapter: Arc<dyn ChainAdapter> = Arc::new(SimulatedChainAdapter::new(
            SimulatedChainConfig::new(chain_id),
        ));
        router
            .register_adapter(adapter)
            .await
            .with_context(|| format!("register adapter for {chain_id}"))?;
    }

    let _maintenance = ExecutionRouter::spawn_maintenance(&router);
    info!(
        chains = config.allowed_chains.len(),
        polling_ms = config.polling_interval_ms,
        "cross-chain execution router online"
    );

    // Start HTTP API server
    let api_router = create_api_router(router.clone());
    let api_addr: std::net::SocketAddr = config
        .listen_addr
        .parse()
        .with_context(|| format!("parse listen address {}", config.listen_addr))?;

    info!(address = %api_addr, "HTTP API server starting");
    let _api_handle = tokio::spawn(async move {
        let listener = match tokio::net::TcpListener::bind(&api_addr).await {
            Ok(listener) => listener,
            Err(err) => {
                warn!(error = %err, "failed to bind API server address");
                return;
            }
        };
        if let Err(e) = axum::serve(listener, api_router).await {
            warn!(error = %e, "API server error");
        }
    });

    let mut ticker = tokio::time::interval(Duration::from_secs(30));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let stats = router.stats();
                let system = router.system_health().await;
                info!(
                    total_executions = stats.total_executions,
                    successful = stats.successful_executions,
                    failed = stats.failed_executions,
                    success_rate = stats.success_rate,
                    avg_execution_ms = ?stats.avg_execution_time_ms,
                    system_status = %system.status,
                    retry_queue = router.retry_queue().len().await,
                    "router heartbeat"
                );
            }
            res = tokio::signal::ctrl_c() => {
                if let Err(err) = res {
                    warn!(error = %err, "ctrl_c listener error");
                }
                info!("Shutdown signal received, exiting");
                break;
            }
        }
    }
    Ok(())
}

fn init_tracing() -> Result<()> {
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,hyper=warn".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(env_filter))
        .with_target(false)
        .try_init()
        .map_err(|err| anyhow!("tracing subscriber init: {err}"))
}
