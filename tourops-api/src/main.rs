use anyhow::Context;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tourops_api::{app, metrics::QueueMetrics, state::AppState, state::AuthConfig, worker};
use tourops_core::{ConnectivityMonitor, MemoryStore, RealtimeStore};
use tourops_store::{Config, EventBus, RedisStore, SqliteQueueStorage, StoreBackend};
use tourops_sync::SyncEngine;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tourops_api=debug,tourops_sync=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting TourOps sync API on port {}", config.server.port);

    let store: Arc<dyn RealtimeStore> = match config.store.backend {
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory realtime store; data is lost on restart");
            // sync.transaction_max_retries only applies to Redis.
            Arc::new(MemoryStore::new())
        }
        StoreBackend::Redis => {
            let url = config
                .store
                .redis_url
                .as_deref()
                .context("store.redis_url is required for the redis backend")?;
            let redis = RedisStore::new(url)
                .await
                .context("Failed to connect to Redis")?
                .with_transaction_retries(config.sync.transaction_max_retries);
            Arc::new(redis)
        }
    };

    if let Some(dir) = config
        .queue
        .database_url
        .strip_prefix("sqlite://")
        .and_then(|file| Path::new(file).parent())
        .filter(|dir| !dir.as_os_str().is_empty())
    {
        std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    let queue_storage = SqliteQueueStorage::new(&config.queue.database_url)
        .await
        .context("Failed to open queue database")?;
    queue_storage.migrate().await.context("Queue migrations failed")?;

    let events = EventBus::default();
    let connectivity = Arc::new(ConnectivityMonitor::default());
    let engine = Arc::new(
        SyncEngine::new(
            store,
            connectivity.clone(),
            Arc::new(queue_storage),
            Arc::new(events.clone()),
            config.sync.settings(),
        )
        .await?,
    );
    tracing::info!("Queue restored: {:?}", engine.queue_counts());

    let _worker = worker::start_replay_worker(
        engine.clone(),
        connectivity.subscribe(),
        config.sync.replay_interval(),
    );

    let app_state = AppState {
        engine,
        connectivity,
        events,
        metrics: Arc::new(QueueMetrics::new()?),
        auth: AuthConfig {
            secret: config.auth.jwt_secret.clone(),
        },
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app(app_state)).await?;
    Ok(())
}
