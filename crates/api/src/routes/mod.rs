mod admin;
mod snapshots;
mod stats;

use axum::extract::State;
use axum::{
    Json, Router,
    http::{StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chatrank_domain::response_cache::CachedPayload;
use serde::Serialize;

use crate::{middleware as app_middleware, observability, state::AppState};

pub fn router(state: AppState) -> Router {
    let admin = Router::new()
        .route("/api/admin/rollover/:year/:month", post(admin::rollover))
        .route_layer(middleware::from_fn(
            app_middleware::require_trusted_bot_middleware,
        ));

    let gated = Router::new()
        .route("/health", get(health))
        .route("/api/channels", get(stats::channels))
        .route("/api/ranking/monthly/:year/:month", get(stats::ranking_monthly))
        .route("/api/ranking/total", get(stats::ranking_total))
        .route("/api/stats/history/total", get(stats::history_total))
        .route("/api/stats/history/:year/:month", get(stats::history_monthly))
        .route("/api/stats/heatmap/total", get(stats::heatmap_total))
        .route("/api/stats/heatmap/:year/:month", get(stats::heatmap_monthly))
        .route(
            "/api/stats/channels_distribution/total",
            get(stats::distribution_total),
        )
        .route(
            "/api/stats/channels_distribution/:year/:month",
            get(stats::distribution_monthly),
        )
        .route("/api/stats/analysis/total", get(stats::analysis_total))
        .route("/api/stats/analysis/:year/:month", get(stats::analysis_monthly))
        .route("/api/users/search", get(stats::search_users))
        .route(
            "/api/snapshots",
            get(snapshots::list_snapshots).post(snapshots::create_snapshot),
        )
        .route(
            "/api/snapshots/:snapshot_id",
            get(snapshots::get_snapshot).delete(snapshots::delete_snapshot),
        )
        .merge(admin)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            app_middleware::access_gate_middleware,
        ));

    Router::new()
        .route("/metrics", get(metrics))
        .merge(gated)
        .layer(middleware::from_fn(app_middleware::metrics_layer))
        .layer(app_middleware::timeout_layer())
        .layer(app_middleware::trace_layer())
        .layer(app_middleware::set_request_id_layer())
        .layer(app_middleware::propagate_request_id_layer())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    environment: String,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        environment: state.config.app_env.clone(),
    })
}

async fn metrics() -> Response {
    match observability::render_metrics() {
        Some(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        None => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

/// Writes a cached JSON body with a `Cache-Control` header matching its TTL.
fn cached_json(endpoint: &'static str, cached: CachedPayload) -> Response {
    observability::register_cache_lookup(endpoint, cached.status);
    let headers = [
        ("content-type", "application/json".to_string()),
        (
            "cache-control",
            format!("public, max-age={}", cached.ttl.as_secs()),
        ),
        ("x-cache", cached.status.as_str().to_ascii_uppercase()),
    ];
    (headers, cached.payload).into_response()
}
