//! Wiring & DI for the webhook ingestion server. Verifies and deduplicates envelopes,
//! keeps per-chat profiles and answers debounced bursts through the engine.

use anyhow::Context;
use dotenv::dotenv;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use whatsbridge::adapters::backend::HttpBusinessBackend;
use whatsbridge::adapters::engine_api::EngineApiClient;
use whatsbridge::adapters::http::ingest::{self, IngestPolicy, IngestState};
use whatsbridge::adapters::persistence::ProfileJsonStore;
use whatsbridge::ports::{BusinessPort, EngineControlPort};
use whatsbridge::shared::config::{AppConfig, DEFAULT_SHUTDOWN_GRACE_SECS};
use whatsbridge::shared::shutdown::{cancel_pair, shutdown_signal};
use whatsbridge::usecases::dedupe::{DEFAULT_SWEEP_EVERY, DedupeCache};
use whatsbridge::usecases::filters::FilterChain;
use whatsbridge::usecases::{ProfileStore, Router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let env_loaded = dotenv();
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    match &env_loaded {
        Ok(path) => info!(path = %path.display(), "loaded .env"),
        Err(_) => info!(cwd = %cwd.display(), "no .env found (check CWD)"),
    }

    let cfg = AppConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "config invalid, using defaults");
        AppConfig::default()
    });
    let settings = cfg.server_settings();

    if settings.require_sig && settings.secret.is_none() {
        if !settings.allow_no_secret_dev {
            anyhow::bail!(
                "WHATSBRIDGE_WEBHOOK_SECRET is required when signatures are enforced \
                 (set WHATSBRIDGE_SERVER_ALLOW_NO_SECRET_DEV=true for local testing)"
            );
        }
        warn!("signatures required but no secret configured; accepting unsigned requests (dev)");
    }

    let (cancel_tx, cancel_rx) = cancel_pair();

    // --- Dedupe ---
    let dedupe = Arc::new(DedupeCache::new(settings.dedupe_window));
    let sweeper = dedupe.spawn_sweeper(DEFAULT_SWEEP_EVERY, cancel_rx.clone());

    // --- Profiles, engine control, business backend ---
    let profiles = Arc::new(ProfileStore::new(
        Arc::new(ProfileJsonStore::new(&settings.profiles_base)),
        settings.profiles_base.clone(),
    ));
    let engine: Arc<dyn EngineControlPort> = Arc::new(EngineApiClient::new(settings.engine_url.clone())?);
    let backend: Arc<dyn BusinessPort> =
        Arc::new(HttpBusinessBackend::new(settings.backend_url.clone())?);
    info!(
        engine = %settings.engine_url,
        backend = %settings.backend_url,
        profiles = %settings.profiles_base.display(),
        "downstream services"
    );

    // --- Router + aggregation ---
    let router = Router::new(
        Arc::clone(&engine),
        backend,
        profiles,
        FilterChain::standard(),
        settings.pacing.clone(),
        cancel_rx.clone(),
    );
    router.start_aggregator(settings.agg_window);
    info!(
        window_ms = settings.agg_window.as_millis() as u64,
        dedupe_secs = settings.dedupe_window.as_secs(),
        "aggregation ready"
    );

    // --- Ingestion endpoint ---
    let state = Arc::new(IngestState {
        policy: IngestPolicy::from_settings(&settings),
        dedupe,
        router,
        engine,
    });
    let listener = TcpListener::bind(&settings.addr)
        .await
        .with_context(|| format!("bind ingestion server on {}", settings.addr))?;
    info!(
        addr = %settings.addr,
        require_sig = settings.require_sig,
        use_timestamp = settings.use_timestamp,
        body_limit = settings.body_limit,
        "whserver listening"
    );
    let server = tokio::spawn(ingest::serve(listener, state, cancel_rx));

    shutdown_signal().await;
    info!("shutdown requested");
    let _ = cancel_tx.send(true);

    let grace = Duration::from_secs(DEFAULT_SHUTDOWN_GRACE_SECS);
    let drained = tokio::time::timeout(grace, async {
        if let Ok(Err(e)) = server.await {
            warn!(error = %e, "ingestion server stopped with error");
        }
        let _ = sweeper.await;
    })
    .await;
    if drained.is_err() {
        warn!(grace_secs = grace.as_secs(), "shutdown grace elapsed, exiting");
    }
    Ok(())
}
