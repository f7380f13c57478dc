//! Feed provider service
//!
//! Loads configuration, wires the trigger manager to Postgres, the
//! coordination store and the configured event source, then serves the
//! health endpoints until shutdown or a change-feed failure.

use std::sync::Arc;

use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use shared::{db, Config, CoordinationStore, MemoryCoordination, RedisCoordination};
use tokio::signal;

use feed_provider::health::{self, AppState};
use feed_provider::{
    adapter, build_event_source, reconcile, FailoverCoordinator, HttpRouterClient, PgTriggerStore,
    SourceHandle, TriggerManager,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    shared::init_tracing();

    tracing::info!("Starting feed provider...");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;

    // Create database connection pool
    let db_pool = db::create_pool(&config.database)
        .await
        .context("Failed to create database pool")?;

    // Check database health
    db::check_health(&db_pool)
        .await
        .context("Database health check failed")?;

    // Apply schema migrations (trigger table, change-feed notification)
    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .context("Failed to run database migrations")?;

    // Coordination store for active/standby failover; a deployment without
    // Redis runs standalone and always considers itself active.
    let coordination: Arc<dyn CoordinationStore> = match &config.redis.url {
        Some(url) => {
            let store = RedisCoordination::connect(url)
                .await
                .context("Failed to connect to Redis")?;
            tracing::info!("Connected to Redis");
            Arc::new(store)
        }
        None => {
            tracing::warn!("REDIS_URL not set; running without failover coordination");
            MemoryCoordination::new()
        }
    };

    // Event-source adapter selected by configuration
    let (source_handle, source_events) = SourceHandle::channel();
    let event_source = build_event_source(&config.provider.event_provider, source_handle)
        .context("Failed to build event source")?;
    tracing::info!(provider = %config.provider.event_provider, "Event source ready");

    let store = Arc::new(PgTriggerStore::new(db_pool.clone()));
    let router = Arc::new(
        HttpRouterClient::new(&config.provider.router_host)
            .context("Failed to create router client")?,
    );

    let manager = Arc::new(TriggerManager::new(
        config.provider.worker.clone(),
        config.provider.host.clone(),
        config.provider.retry_attempts,
        store,
        router,
        event_source,
    ));

    let failover = FailoverCoordinator::new(
        coordination,
        config.redis.shard_key(&config.provider.worker),
    );
    failover
        .start(manager.clone())
        .await
        .context("Failed to start failover coordination")?;

    // Subscribe to the change feed before the initial scan so updates
    // arriving mid-scan are not lost
    let listener = reconcile::connect_change_feed(&db_pool).await?;
    let feed_handle = tokio::spawn({
        let manager = manager.clone();
        async move { reconcile::run_change_feed(manager, listener).await }
    });

    tokio::spawn({
        let manager = manager.clone();
        async move { adapter::run_source_events(manager, source_events).await }
    });

    manager
        .init_all_triggers()
        .await
        .context("Failed to initialize triggers")?;

    let app_state = web::Data::new(AppState {
        manager: manager.clone(),
        endpoint_auth: config.provider.endpoint_auth.clone(),
    });
    let server = HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .configure(health::configure)
    })
    .bind(("0.0.0.0", config.provider.port))
    .context("Failed to bind HTTP listener")?
    .run();
    let server_handle = server.handle();
    tokio::spawn(server);

    tracing::info!(
        port = config.provider.port,
        worker = %config.provider.worker,
        host = %config.provider.host,
        "Feed provider running"
    );

    // Wait for either shutdown signal OR change-feed failure
    tokio::select! {
        result = signal::ctrl_c() => {
            result.context("Failed to listen for shutdown signal")?;
            tracing::info!("Shutdown signal received, stopping feed provider...");

            if let Err(e) = failover.handover(&manager).await {
                tracing::error!("Failed to hand over active role: {:#}", e);
            }
            server_handle.stop(true).await;
        }
        result = feed_handle => {
            match result {
                Ok(Ok(())) => {
                    tracing::warn!("Change feed exited cleanly (unexpected)");
                }
                Ok(Err(e)) => {
                    tracing::error!("Change feed failed: {:#}", e);
                    return Err(e.context("Change feed failed"));
                }
                Err(e) => {
                    tracing::error!("Change feed task panicked: {}", e);
                    anyhow::bail!("Change feed task panicked: {}", e);
                }
            }
        }
    }

    Ok(())
}
