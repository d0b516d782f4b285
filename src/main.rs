//! Wiring & DI for the engine. Bootstrap adapters, start the event loop and the control
//! surface, then wait for a shutdown signal. No business logic here.

use anyhow::Context;
use dotenv::dotenv;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use whatsbridge::adapters::http::control::{self, ControlState};
use whatsbridge::adapters::persistence::{FolderSink, SqliteHistory};
use whatsbridge::adapters::protocol::HttpProtocolGateway;
use whatsbridge::adapters::webhook::WebhookDelivery;
use whatsbridge::domain::events::{GroupEvent, MessageEvent, PresenceEvent, ReceiptEvent};
use whatsbridge::domain::{DomainError, Envelope};
use whatsbridge::ports::{Capabilities, EnvelopeSink, EventHandlers, ProtocolGateway, WebhookPort};
use whatsbridge::shared::config::{AppConfig, DEFAULT_SHUTDOWN_GRACE_SECS, ForwardMode};
use whatsbridge::shared::shutdown::{cancel_pair, shutdown_signal};
use whatsbridge::usecases::Engine;

/// Raw events buffered between the control surface and the event loop.
const EVENT_QUEUE: usize = 1024;

/// One structured log line per handled event.
struct LoggingHandlers;

#[async_trait::async_trait]
impl EventHandlers for LoggingHandlers {
    async fn on_message(&self, env: &Envelope, _raw: &MessageEvent) -> Result<(), DomainError> {
        info!(
            chat = %env.chat_id,
            name = %env.chat_name,
            from = %env.sender_id,
            id = %env.message_id,
            media = env.media.as_ref().and_then(|m| m.kind).map(|k| k.as_str()).unwrap_or(""),
            "[IN] {}",
            env.text
        );
        Ok(())
    }

    async fn on_receipt(&self, env: &Envelope, _raw: &ReceiptEvent) -> Result<(), DomainError> {
        info!(
            chat = %env.chat_id,
            receipt_type = %env.receipt_type,
            ids = env.message_ids.len(),
            "[RCPT]"
        );
        Ok(())
    }

    async fn on_presence(&self, env: &Envelope, _raw: &PresenceEvent) -> Result<(), DomainError> {
        info!(from = %env.sender_id, extra = ?env.extra, "presence");
        Ok(())
    }

    async fn on_group_update(&self, env: &Envelope, _raw: &GroupEvent) -> Result<(), DomainError> {
        info!(chat = %env.chat_id, name = %env.chat_name, "group update");
        Ok(())
    }

    async fn on_error(&self, err: &DomainError) {
        warn!(error = %err, "side effect failed");
    }
}

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
    let settings = cfg.engine_settings();
    let (cancel_tx, cancel_rx) = cancel_pair();

    // --- History store (fatal when it cannot open) ---
    let history = Arc::new(
        SqliteHistory::connect(&settings.data_dir)
            .await
            .map_err(|e| anyhow::anyhow!("history store: {}", e))?,
    );
    info!(path = %history.path().display(), "history store ready");

    // --- Protocol gateway sidecar ---
    let gateway: Arc<dyn ProtocolGateway> = Arc::new(HttpProtocolGateway::new(
        settings.gateway_url.clone(),
        Capabilities {
            status: settings.enable_status,
        },
    )?);
    info!(url = %settings.gateway_url, status = settings.enable_status, "protocol gateway");

    let mut engine = Engine::new(gateway, history, cancel_rx.clone())
        .with_handlers(Arc::new(LoggingHandlers))
        .with_forward_extra(settings.forward_extra.clone());

    // --- Forwarding: folder sink + webhook ---
    match settings.forward_mode {
        ForwardMode::Folder => {
            let sink: Arc<dyn EnvelopeSink> = Arc::new(FolderSink::new(
                &settings.out_folder,
                settings.sink_max_bytes,
                settings.host_id.clone(),
            ));
            info!(
                base = %settings.out_folder.display(),
                max_bytes = settings.sink_max_bytes,
                host = %settings.host_id,
                "folder sink enabled"
            );
            engine = engine.with_sink(sink);
        }
        ForwardMode::Off => info!("folder sink disabled"),
    }
    if let Some(webhook) = &settings.webhook {
        let delivery: Arc<dyn WebhookPort> =
            Arc::new(WebhookDelivery::new(webhook, cancel_rx.clone())?);
        info!(
            url = %webhook.url,
            signed = !webhook.secret.is_empty(),
            headers = webhook.headers.len(),
            "webhook enabled"
        );
        engine = engine.with_webhook(delivery);
    }
    let engine = Arc::new(engine);

    // --- Event loop: raw events arrive through POST /events ---
    let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);
    let event_loop = tokio::spawn(Arc::clone(&engine).run(events_rx));

    // --- Control surface ---
    let listener = TcpListener::bind(&settings.control_addr)
        .await
        .with_context(|| format!("bind control surface on {}", settings.control_addr))?;
    info!(addr = %settings.control_addr, "control surface listening");
    let state = Arc::new(ControlState {
        engine,
        events: events_tx,
    });
    let server = tokio::spawn(control::serve(listener, state, cancel_rx.clone()));

    shutdown_signal().await;
    info!("shutdown requested");
    let _ = cancel_tx.send(true);

    let grace = Duration::from_secs(DEFAULT_SHUTDOWN_GRACE_SECS);
    let drained = tokio::time::timeout(grace, async {
        if let Ok(Err(e)) = server.await {
            warn!(error = %e, "control surface stopped with error");
        }
        let _ = event_loop.await;
    })
    .await;
    if drained.is_err() {
        warn!(grace_secs = grace.as_secs(), "shutdown grace elapsed, exiting");
    }
    Ok(())
}
