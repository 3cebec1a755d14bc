use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{Error, ErrorKind, Result};
use crate::http::authorize;
use crate::store::Treatment;
use crate::AppState;

fn treatment_to_json(t: &Treatment) -> Value {
    let mut obj = Map::new();
    obj.insert("_id".to_string(), Value::String(t.oid.clone()));
    obj.insert(
        "created_at".to_string(),
        Value::String(t.created_time.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)),
    );
    obj.insert("eventType".to_string(), Value::String(t.kind.clone()));
    obj.insert(
        "eventTime".to_string(),
        Value::String(t.event_time.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)),
    );
    for (k, v) in &t.fields {
        obj.insert(k.clone(), v.clone());
    }
    Value::Object(obj)
}

#[derive(Debug, Deserialize)]
pub struct ListTreatmentsQuery {
    count: Option<usize>,
}

pub async fn list_treatments(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListTreatmentsQuery>,
) -> Result<impl IntoResponse> {
    authorize(&state, &headers, "api:treatments:read")?;
    let treatments = state.query.latest_treatments(query.count)?;
    let rendered: Vec<Value> = treatments.iter().map(treatment_to_json).collect();
    Ok(Json(rendered))
}

pub async fn get_treatment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(oid): Path<String>,
) -> Result<impl IntoResponse> {
    authorize(&state, &headers, "api:treatments:read")?;
    let treatment = state.query.treatment_by_oid(&oid)?;
    Ok(Json(treatment_to_json(&treatment)))
}

fn treatment_from_wire(mut body: Map<String, Value>) -> Result<Treatment> {
    let kind = body
        .remove("eventType")
        .and_then(|v| v.as_str().map(str::to_string))
        .ok_or_else(|| Error::new(ErrorKind::InvalidArgument, "treatment missing eventType"))?;
    let event_time = match body.remove("eventTime") {
        Some(Value::String(s)) => DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| Error::new(ErrorKind::InvalidArgument, format!("bad eventTime: {e}")))?,
        _ => Utc::now(),
    };
    body.remove("_id");
    body.remove("created_at");

    Ok(Treatment {
        oid: String::new(),
        event_time,
        kind,
        created_time: Utc::now(),
        fields: body,
    })
}

pub async fn create_treatments(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse> {
    authorize(&state, &headers, "api:treatments:create")?;

    let items: Vec<Value> = match body {
        Value::Array(items) => items,
        single => vec![single],
    };

    let mut incoming = Vec::with_capacity(items.len());
    for item in items {
        let obj = match item {
            Value::Object(obj) => obj,
            _ => return Err(Error::new(ErrorKind::InvalidArgument, "treatment must be a JSON object")),
        };
        incoming.push(treatment_from_wire(obj)?);
    }

    let accepted = state.query.create_treatments(incoming);
    let rendered: Vec<Value> = accepted.iter().map(treatment_to_json).collect();
    Ok((axum::http::StatusCode::CREATED, Json(rendered)))
}

pub async fn update_treatment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(oid): Path<String>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse> {
    authorize(&state, &headers, "api:treatments:update")?;
    let obj = match body {
        Value::Object(obj) => obj,
        _ => return Err(Error::new(ErrorKind::InvalidArgument, "treatment must be a JSON object")),
    };
    let treatment = treatment_from_wire(obj)?;
    let updated = state.query.update_treatment(&oid, treatment)?;
    Ok(Json(treatment_to_json(&updated)))
}

pub async fn delete_treatment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(oid): Path<String>,
) -> Result<impl IntoResponse> {
    authorize(&state, &headers, "api:treatments:delete")?;
    state.query.delete_treatment(&oid)?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}
