mod devices;
mod entries;
mod health;
mod treatments;
mod ws;

use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::{Error, Result};
use crate::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health::healthz))
        .route(
            "/api/v1/entries",
            get(entries::list_entries).post(entries::create_entries),
        )
        .route("/api/v1/entries/current", get(entries::current))
        .route("/api/v1/entries/{oid}", get(entries::get_entry))
        .route(
            "/api/v1/treatments",
            get(treatments::list_treatments).post(treatments::create_treatments),
        )
        .route(
            "/api/v1/treatments/{oid}",
            get(treatments::get_treatment)
                .put(treatments::update_treatment)
                .delete(treatments::delete_treatment),
        )
        .route("/api/v1/devices", get(devices::list_devices))
        .route("/stream", get(ws::upgrade))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Pulls the bearer token out of either the `Authorization` header or the
/// legacy `api-secret` header, resolves the subject, and checks it against
/// `required` (a `resource:action` permission string).
pub(crate) fn authorize(state: &AppState, headers: &HeaderMap, required: &str) -> Result<()> {
    let token = headers
        .get("api-secret")
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            headers
                .get(axum::http::header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
        });

    let subject = state.auth.resolve(token);
    if state.auth.is_permitted(&subject, required) {
        Ok(())
    } else {
        Err(Error::unauthorized(format!("subject lacks permission {required}")))
    }
}
