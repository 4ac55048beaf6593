/**
 * ATELIER KERNEL - Point d'entrée du superviseur d'atelier
 *
 * RÔLE : Orchestration config, contexte usine, cache résilient, canal
 * télémétrie MQTT et API HTTP.
 *
 * ARCHITECTURE : Télémétrie -> store (un seul écrivain) -> API de lecture.
 * Le cache résilient sert les assets et l'instantané amont hors-ligne.
 */

use anyhow::Context;
use atelier_kernel::cache::{CacheResilienceManager, CacheStorage, HttpFetcher, Url};
use atelier_kernel::config::load_config;
use atelier_kernel::context::{event_handler, new_state, FactoryContext};
use atelier_kernel::health::HealthTracker;
use atelier_kernel::http::{build_router, AppState};
use atelier_kernel::sync::SYNC_TAG;
use atelier_kernel::telemetry::{ConnectionState, Endpoint, MqttTransport, TelemetryChannel};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Charger les variables d'environnement depuis .env (si présent)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("atelier_kernel=info")),
        )
        .init();

    let cfg = load_config().await;

    // contexte usine
    let health = HealthTracker::new();
    let ctx = FactoryContext::from_layout(&cfg.layout, health.clone(), OffsetDateTime::now_utc())
        .context("invalid plant layout")?;
    info!("[kernel] tracking {} machines on {} lines", ctx.store.len(), ctx.store.all_lines().len());
    let ctx = new_state(ctx);

    // cache résilient : install puis activation (purge des anciennes époques)
    let origin = Url::parse(&cfg.cache.origin)
        .with_context(|| format!("invalid cache origin {}", cfg.cache.origin))?;
    let cache = Arc::new(CacheResilienceManager::new(
        Arc::new(CacheStorage::new()),
        Arc::new(HttpFetcher::default()),
        cfg.cache.version.clone(),
        origin,
    ));
    match cache.install(&cfg.cache.manifest).await {
        Ok(()) => cache.activate(),
        Err(e) => warn!("[kernel] cache install failed, running without offline assets: {e}"),
    }

    let app_state = AppState::new(ctx.clone(), cache);

    // canal télémétrie
    let mut channel = TelemetryChannel::new(MqttTransport, cfg.telemetry.reconnect_delay());
    channel.on_message(event_handler(ctx.clone()));
    let channel = channel.spawn(Endpoint::from_mqtt(&cfg.mqtt));
    health.attach_channel(channel.subscribe(), channel.stats());

    // resync à chaque retour en ligne
    let sync = app_state.sync.clone();
    let mut states = channel.subscribe();
    tokio::spawn(async move {
        let mut was_open = false;
        while states.changed().await.is_ok() {
            let open = *states.borrow_and_update() == ConnectionState::Open;
            if open && !was_open {
                sync.trigger(SYNC_TAG).await;
            }
            was_open = open;
        }
    });

    // HTTP
    let app = build_router(app_state);
    let listener = TcpListener::bind(cfg.http.bind.as_str())
        .await
        .with_context(|| format!("failed to bind {}", cfg.http.bind))?;
    info!("[kernel] listening on http://{}", cfg.http.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("[kernel] shutting down");
        })
        .await
        .context("http server failed")?;

    channel.teardown().await;
    Ok(())
}
