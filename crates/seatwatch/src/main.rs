use anyhow::Context;
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;
use crate::db::{KeyValueStore, MemoryStore, StateRepository, StoreManager};
use crate::monitor::{
    BusNotifier, EventBus, LogNotifier, MonitoringScheduler, Notifiers, ProfileResolver,
    ProgressiveSearch, StatusReconciler, WebhookNotifier,
};
use crate::page::{HttpFetcher, PageFetcher, SessionPool};
use crate::server::create_router;
use crate::types::AppState;

mod config;
mod db;
mod monitor;
mod page;
mod server;
mod types;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("seatwatch=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    let config = match AppConfig::path_from_env() {
        Some(path) => {
            info!(path = %path.display(), "Loading configuration");
            AppConfig::load(&path)?
        }
        None => AppConfig::default(),
    };

    let store: Arc<dyn KeyValueStore> = if config.database_path.trim().is_empty() {
        warn!("No database path configured, monitor state will not survive a restart");
        Arc::new(MemoryStore::default())
    } else {
        Arc::new(
            StoreManager::new(&config.database_path)
                .with_context(|| format!("could not open database {}", config.database_path))?,
        )
    };
    let repository = StateRepository::new(store, config.activity_retention());
    let bus = EventBus::default();

    let mut notifiers = Notifiers::default()
        .with(Arc::new(LogNotifier))
        .with(Arc::new(BusNotifier::new(bus.clone())));
    if let Some(url) = config.notifications.webhook_url.as_deref() {
        notifiers = notifiers.with(Arc::new(WebhookNotifier::new(url)?));
    }
    info!(sinks = notifiers.len(), "Notification sinks ready");

    let fetcher: Arc<dyn PageFetcher> =
        Arc::new(HttpFetcher::new(&config.user_agent, config.request_timeout())?);
    let sessions = Arc::new(SessionPool::new(fetcher.clone(), config.session_settings()));
    let resolver = ProfileResolver::with_overrides(config.portal_overrides.clone());
    let reconciler = StatusReconciler::new(repository.clone(), bus.clone(), Arc::new(notifiers));
    let scheduler = MonitoringScheduler::new(
        sessions,
        resolver.clone(),
        ProgressiveSearch::new(config.search_config()),
        reconciler,
        repository.clone(),
        bus.clone(),
        config.inter_course_delay(),
    );

    if scheduler.resume()? {
        info!("Resumed monitoring from saved state");
    }

    let app_state = Arc::new(AppState {
        scheduler,
        repository,
        bus,
        fetcher,
        session_settings: config.session_settings(),
        resolver,
        started_at: Utc::now(),
    });

    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("could not bind {address}"))?;
    info!(address = %address, "Server listening");

    axum::serve(listener, create_router(app_state))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Could not listen for shutdown signal");
            }
            info!("Shutting down");
        })
        .await?;

    Ok(())
}
