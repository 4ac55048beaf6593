/**
 * API REST ATELIER - Surface de lecture du kernel pour les dashboards
 *
 * RÔLE :
 * Expose les instantanés du store (machines, lignes, risques), les
 * notifications, le déclenchement du resync et un proxy d'assets
 * qui passe par le cache résilient.
 *
 * FONCTIONNEMENT :
 * - Serveur Axum avec middleware auth API key
 * - Routes : /health, /system, /machines, /lines, /assessments,
 *   /notifications, /sync, /cache, /offline
 * - Le store n'est jamais muté ici, sauf via le resync qui repasse
 *   par le handler d'événements
 *
 * SÉCURITÉ :
 * - Header x-api-key obligatoire sur toutes routes sauf /health*
 * - ATELIER_API_KEY absente = tout refusé
 */

use crate::cache::{CacheError, CacheRequest, CacheResilienceManager, EpochInfo, Fetcher, ResponseSource};
use crate::context::{FactoryContext, Shared};
use crate::health::KernelHealth;
use crate::maintenance::{assess, assess_all, RiskAssessment};
use crate::models::{Machine, ProductionLine};
use crate::notifications::{ActionOutcome, Notification};
use crate::sync::{BackgroundSync, SyncOutcome};
use axum::body::Body;
use axum::extract::{Path, RawQuery, Request, State};
use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::warn;

pub const API_KEY_ENV: &str = "ATELIER_API_KEY";
pub const SOURCE_HEADER: &str = "x-atelier-source";

async fn require_api_key(req: Request, next: Next) -> Result<Response, StatusCode> {
    if req.uri().path().starts_with("/health") {
        return Ok(next.run(req).await);
    }

    let expected = std::env::var(API_KEY_ENV).unwrap_or_default();
    if expected.is_empty() {
        warn!("[http] {API_KEY_ENV} not set - API access denied");
        return Err(StatusCode::UNAUTHORIZED);
    }

    let ok = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == expected)
        .unwrap_or(false);

    if !ok {
        warn!("[http] rejected {} {}: bad api key", req.method(), req.uri().path());
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

pub struct AppState<F: Fetcher> {
    pub ctx: Shared<FactoryContext>,
    pub cache: Arc<CacheResilienceManager<F>>,
    pub sync: BackgroundSync<F>,
}

impl<F: Fetcher> Clone for AppState<F> {
    fn clone(&self) -> Self {
        Self { ctx: self.ctx.clone(), cache: self.cache.clone(), sync: self.sync.clone() }
    }
}

impl<F: Fetcher> AppState<F> {
    pub fn new(ctx: Shared<FactoryContext>, cache: Arc<CacheResilienceManager<F>>) -> Self {
        let sync = BackgroundSync::new(cache.clone(), ctx.clone());
        Self { ctx, cache, sync }
    }
}

#[derive(Debug, Serialize)]
struct LineView {
    #[serde(flatten)]
    line: ProductionLine,
    machines: Vec<Machine>,
}

#[derive(Debug, Serialize)]
struct CacheView {
    version: String,
    active_epoch: Option<String>,
    epochs: Vec<EpochInfo>,
}

pub fn build_router<F: Fetcher>(app_state: AppState<F>) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health::<F>))
        .route("/machines", get(list_machines::<F>))
        .route("/machines/{id}", get(get_machine::<F>))
        .route("/machines/{id}/assessment", get(get_assessment::<F>))
        .route("/assessments", get(list_assessments::<F>))
        .route("/lines", get(list_lines::<F>))
        .route("/lines/{id}", get(get_line::<F>))
        .route("/notifications", get(list_notifications::<F>))
        .route("/notifications/{action}", post(notification_action::<F>))
        .route("/sync/{tag}", post(trigger_sync::<F>))
        .route("/cache", get(get_cache::<F>))
        .route("/offline/{*path}", get(offline_asset::<F>))
        .with_state(app_state)
        .layer(middleware::from_fn(require_api_key))
}

// GET /system/health
async fn get_system_health<F: Fetcher>(State(app): State<AppState<F>>) -> Json<KernelHealth> {
    let epoch = app.cache.active_epoch();
    let ctx = app.ctx.lock();
    Json(ctx.health.get_health(&ctx.store, epoch))
}

// GET /machines
async fn list_machines<F: Fetcher>(State(app): State<AppState<F>>) -> Json<Vec<Machine>> {
    let machines = app.ctx.lock().store.machines().cloned().collect();
    Json(machines)
}

// GET /machines/{id}
async fn get_machine<F: Fetcher>(
    State(app): State<AppState<F>>,
    Path(id): Path<String>,
) -> Result<Json<Machine>, StatusCode> {
    let machine = app.ctx.lock().store.snapshot(&id);
    machine.map(Json).ok_or(StatusCode::NOT_FOUND)
}

// GET /machines/{id}/assessment
async fn get_assessment<F: Fetcher>(
    State(app): State<AppState<F>>,
    Path(id): Path<String>,
) -> Result<Json<RiskAssessment>, StatusCode> {
    let machine = app.ctx.lock().store.snapshot(&id).ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(assess(&machine, OffsetDateTime::now_utc())))
}

// GET /assessments
async fn list_assessments<F: Fetcher>(State(app): State<AppState<F>>) -> Json<Vec<RiskAssessment>> {
    let assessments = assess_all(&app.ctx.lock().store, OffsetDateTime::now_utc());
    Json(assessments)
}

// GET /lines
async fn list_lines<F: Fetcher>(State(app): State<AppState<F>>) -> Json<Vec<LineView>> {
    let ctx = app.ctx.lock();
    let views = ctx
        .store
        .all_lines()
        .iter()
        .map(|line| line_view(&ctx, line))
        .collect();
    Json(views)
}

// GET /lines/{id}
async fn get_line<F: Fetcher>(
    State(app): State<AppState<F>>,
    Path(id): Path<String>,
) -> Result<Json<LineView>, StatusCode> {
    let ctx = app.ctx.lock();
    let line = ctx.store.line(&id).ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(line_view(&ctx, line)))
}

fn line_view(ctx: &FactoryContext, line: &ProductionLine) -> LineView {
    LineView {
        line: line.clone(),
        machines: line
            .member_machine_ids
            .iter()
            .filter_map(|id| ctx.store.snapshot(id))
            .collect(),
    }
}

// GET /notifications
async fn list_notifications<F: Fetcher>(State(app): State<AppState<F>>) -> Json<Vec<Notification>> {
    let current = app.ctx.lock().notifications.current();
    Json(current)
}

// POST /notifications/{action}
async fn notification_action<F: Fetcher>(
    State(app): State<AppState<F>>,
    Path(action): Path<String>,
) -> Json<ActionOutcome> {
    let outcome = app.ctx.lock().notifications.handle_action(&action);
    Json(outcome)
}

// POST /sync/{tag}
async fn trigger_sync<F: Fetcher>(
    State(app): State<AppState<F>>,
    Path(tag): Path<String>,
) -> (StatusCode, Json<SyncOutcome>) {
    let outcome = app.sync.trigger(&tag).await;
    let code = match outcome {
        SyncOutcome::Completed { .. } => StatusCode::OK,
        SyncOutcome::Failed { .. } => StatusCode::BAD_GATEWAY,
        SyncOutcome::UnknownTag { .. } => StatusCode::NOT_FOUND,
    };
    (code, Json(outcome))
}

// GET /cache
async fn get_cache<F: Fetcher>(State(app): State<AppState<F>>) -> Json<CacheView> {
    Json(CacheView {
        version: app.cache.version().to_string(),
        active_epoch: app.cache.active_epoch(),
        epochs: app.cache.storage().epochs(),
    })
}

// GET /offline/{*path} (asset servi via le cache résilient)
async fn offline_asset<F: Fetcher>(
    State(app): State<AppState<F>>,
    Path(path): Path<String>,
    RawQuery(query): RawQuery,
) -> Response {
    let mut target = format!("/{}", path.trim_start_matches('/'));
    if let Some(q) = query {
        target.push('?');
        target.push_str(&q);
    }

    let url = match app.cache.resolve(&target) {
        Ok(url) => url,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    match app.cache.handle(&CacheRequest::get(url)).await {
        Ok(managed) => {
            let source = match managed.source {
                ResponseSource::Cache => "cache",
                ResponseSource::Network => "network",
                ResponseSource::Placeholder => "placeholder",
            };
            let status = StatusCode::from_u16(managed.status).unwrap_or(StatusCode::BAD_GATEWAY);
            let mut response = Response::new(Body::from(managed.body));
            *response.status_mut() = status;
            let headers = response.headers_mut();
            for (name, value) in &managed.headers {
                if let (Ok(name), Ok(value)) = (HeaderName::try_from(name.as_str()), HeaderValue::from_str(value)) {
                    headers.insert(name, value);
                }
            }
            headers.insert(SOURCE_HEADER, HeaderValue::from_static(source));
            response
        }
        Err(e @ CacheError::Offline { .. }) => (StatusCode::GATEWAY_TIMEOUT, e.to_string()).into_response(),
        Err(e @ CacheError::InvalidUrl { .. }) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
        Err(e) => (
            StatusCode::BAD_GATEWAY,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            e.to_string(),
        )
            .into_response(),
    }
}
