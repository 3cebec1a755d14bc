use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::error::Result;
use crate::http::authorize;
use crate::AppState;

/// Lists interned device names and their assigned ids, for operators
/// checking what the ingestion pipeline has seen.
pub async fn list_devices(State(state): State<AppState>, headers: HeaderMap) -> Result<impl IntoResponse> {
    authorize(&state, &headers, "api:devices:read")?;
    let names: Vec<_> = (0..state.devices.len() as u32)
        .map(|id| json!({ "id": id, "name": state.devices.name(id) }))
        .collect();
    Ok(Json(names))
}
