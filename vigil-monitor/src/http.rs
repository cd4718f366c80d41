/**
 * API REST VIGIL - Interface de consultation du monitor
 *
 * RÔLE :
 * Expose l'état consolidé de la flotte aux dashboards et outils admin.
 * Même vues que le snapshot MQTT, en mode pull.
 *
 * FONCTIONNEMENT :
 * - Serveur Axum sur port 8080 avec middleware auth API key
 * - Routes : /health, /system/health, /hosts, /hosts/{id}
 * - Sérialisation JSON automatique des réponses
 *
 * SÉCURITÉ :
 * - Header x-api-key obligatoire sur toutes routes sauf /health
 * - Validation côté middleware avant traitement métier
 */

use crate::health::{HealthTracker, MonitorHealth};
use crate::models::{to_view, HostRegistry, HostView};
use crate::state::Shared;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::{routing::get, Json, Router};

async fn require_api_key(req: Request, next: Next) -> Result<Response, StatusCode> {
    let path = req.uri().path();

    // Health check toujours accessible
    if path.starts_with("/health") {
        return Ok(next.run(req).await);
    }

    let expected = std::env::var("VIGIL_API_KEY").unwrap_or_default();
    if expected.is_empty() {
        eprintln!("SECURITY: VIGIL_API_KEY not set - API access denied");
        return Err(StatusCode::UNAUTHORIZED);
    }

    let ok = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == expected)
        .unwrap_or(false);

    if !ok {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

#[derive(Clone)]
pub struct AppState {
    pub registry: Shared<HostRegistry>,
    pub health_tracker: HealthTracker,
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .route("/hosts", get(get_hosts))
        .route("/hosts/{id}", get(get_host))
        .with_state(app_state)
        .layer(middleware::from_fn(require_api_key))
}

// GET /hosts (liste, ordre de configuration)
async fn get_hosts(State(app): State<AppState>) -> Json<Vec<HostView>> {
    Json(app.registry.lock().views())
}

// GET /hosts/:id (détail)
async fn get_host(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<HostView>, StatusCode> {
    let reg = app.registry.lock();
    let Some(h) = reg.records.get(&id) else { return Err(StatusCode::NOT_FOUND); };
    Ok(Json(to_view(h)))
}

// GET /system/health (santé du monitor lui-même)
async fn get_system_health(State(app): State<AppState>) -> Json<MonitorHealth> {
    Json(app.health_tracker.get_health(&app.registry))
}
