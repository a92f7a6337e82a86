//! Layer lifecycle API service.
//!
//! HTTP server publishing climate risk layers to GeoServer and serving
//! their metadata.

use anyhow::Result;
use clap::Parser;
use std::{env, net::SocketAddr, sync::Arc, time::Duration};
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use geoserver_client::{GeoServerClient, PublishBackend};
use layer_api::{
    bootstrap::bootstrap_boundaries, config::LayerApiConfig, router, AppState,
    LayerLifecycleManager, ReadinessInitializer,
};
use storage::{Catalog, MemoryMetadataCache, MetadataCache, MetadataStore, RedisMetadataCache};

#[derive(Parser, Debug)]
#[command(name = "layer-api")]
#[command(about = "Climate risk layer lifecycle server")]
struct Args {
    /// Listen address
    #[arg(short, long, default_value = "0.0.0.0:8000")]
    listen: String,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Number of tokio worker threads (default: number of CPU cores)
    #[arg(long)]
    worker_threads: Option<usize>,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let mut runtime_builder = tokio::runtime::Builder::new_multi_thread();
    runtime_builder.enable_all();

    let worker_threads = args.worker_threads.or_else(|| {
        env::var("TOKIO_WORKER_THREADS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
    });
    if let Some(threads) = worker_threads {
        runtime_builder.worker_threads(threads);
    }

    let runtime = runtime_builder.build()?;
    runtime.block_on(async_main(args))?;
    Ok(())
}

async fn async_main(args: Args) -> Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let prometheus_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()?;
    info!("Prometheus metrics exporter initialized");

    let config = LayerApiConfig::from_env();
    info!(
        geoserver = %config.geoserver.base_url,
        workspace = %config.geoserver.workspace,
        redis = config.redis_url.is_some(),
        "Starting layer API server"
    );

    let client = GeoServerClient::new(config.geoserver.clone())?;
    let backend: Arc<dyn PublishBackend> = Arc::new(client.clone());
    let store: Arc<dyn MetadataStore> = Arc::new(Catalog::connect(&config.database_url).await?);

    let cache: Arc<dyn MetadataCache> = match &config.redis_url {
        Some(url) => Arc::new(RedisMetadataCache::new(url.clone())),
        None => {
            let memory = Arc::new(MemoryMetadataCache::new(config.cache_max_entries));
            spawn_cache_sweeper(Arc::clone(&memory), config.cache_sweep_interval);
            memory
        }
    };
    if let Err(e) = cache.initialize().await {
        warn!(error = %e, "Metadata cache unavailable, reads fall through to the database");
    }

    let readiness = ReadinessInitializer::new(Arc::clone(&backend), config.readiness.clone());
    let manager = LayerLifecycleManager::new(
        backend,
        store,
        Arc::clone(&cache),
        readiness.subscribe(),
        config.cache_ttl,
    );
    readiness.start();

    if config.bootstrap_boundaries {
        let manager = Arc::clone(&manager);
        let mut ready = readiness.subscribe();
        let dirs = config.boundaries_dirs.clone();
        tokio::spawn(async move {
            if ready.wait_for(|s| s.is_ready()).await.is_ok() {
                bootstrap_boundaries(&manager, &dirs).await;
            }
        });
    }

    let state = Arc::new(
        AppState::new(manager, Arc::clone(&readiness), cache)
            .with_proxy(client)
            .with_prometheus(prometheus_handle),
    );
    let app = router(Arc::clone(&state));

    let addr: SocketAddr = args.listen.parse()?;
    info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down");
    state.shutdown().await;

    Ok(())
}

fn spawn_cache_sweeper(cache: Arc<MemoryMetadataCache>, every: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every.max(Duration::from_secs(1)));
        interval.tick().await;
        loop {
            interval.tick().await;
            let removed = cache.sweep_expired().await;
            if removed > 0 {
                debug!(removed = removed, "Swept expired cache entries");
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
