use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{Error, ErrorKind, Result};
use crate::http::authorize;
use crate::store::{Entry, EntryKind, Trend};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ListEntriesQuery {
    count: Option<usize>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

fn kind_from_query(s: &str) -> Result<EntryKind> {
    match s {
        "sgv" => Ok(EntryKind::Sgv),
        "mbg" => Ok(EntryKind::Mbg),
        "cal" => Ok(EntryKind::Cal),
        other => Err(Error::new(ErrorKind::InvalidArgument, format!("unknown entry type {other}"))),
    }
}

fn entry_to_json(entry: &Entry, state: &AppState) -> Value {
    json!({
        "_id": entry.oid,
        "type": entry.kind.as_str(),
        "sgv": entry.mgdl,
        "direction": entry.trend.as_str(),
        "device": state.devices.name(entry.device_id).unwrap_or_else(|| "unknown".to_string()),
        "dateString": entry.event_time.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        "sysTime": entry.created_time.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
    })
}

pub async fn list_entries(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListEntriesQuery>,
) -> Result<impl IntoResponse> {
    authorize(&state, &headers, "api:entries:read")?;
    let kind = query.kind.map(|k| kind_from_query(&k)).transpose()?;
    let entries = state.query.latest_entries(query.count, kind)?;
    let rendered: Vec<Value> = entries.iter().map(|e| entry_to_json(e, &state)).collect();
    Ok(Json(rendered))
}

pub async fn current(State(state): State<AppState>, headers: HeaderMap) -> Result<impl IntoResponse> {
    authorize(&state, &headers, "api:entries:read")?;
    let entry = state
        .query
        .latest_sgv()
        .ok_or_else(|| Error::not_found("no sgv entries stored"))?;
    Ok(Json(vec![entry_to_json(&entry, &state)]))
}

pub async fn get_entry(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(oid): Path<String>,
) -> Result<impl IntoResponse> {
    authorize(&state, &headers, "api:entries:read")?;
    let entry = state.query.entry_by_oid(&oid)?;
    Ok(Json(entry_to_json(&entry, &state)))
}

#[derive(Debug, Deserialize)]
struct NewEntryWire {
    #[serde(default)]
    kind: Option<String>,
    #[serde(alias = "sgv")]
    mgdl: i32,
    #[serde(default, alias = "direction")]
    trend: Option<String>,
    #[serde(default)]
    device: Option<String>,
    #[serde(alias = "dateString")]
    event_time: DateTime<Utc>,
}

fn trend_from_request(s: Option<&str>) -> Trend {
    match s {
        Some("DoubleUp") => Trend::DoubleUp,
        Some("SingleUp") => Trend::SingleUp,
        Some("FortyFiveUp") => Trend::FortyFiveUp,
        Some("Flat") => Trend::Flat,
        Some("FortyFiveDown") => Trend::FortyFiveDown,
        Some("SingleDown") => Trend::SingleDown,
        Some("DoubleDown") => Trend::DoubleDown,
        Some("NotComputable") => Trend::NotComputable,
        Some("RateOutOfRange") => Trend::RateOutOfRange,
        _ => Trend::None,
    }
}

pub async fn create_entries(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse> {
    authorize(&state, &headers, "api:entries:create")?;

    let wire: Vec<NewEntryWire> = match body {
        Value::Array(_) => serde_json::from_value(body),
        single => serde_json::from_value(Value::Array(vec![single])),
    }
    .map_err(|e| Error::new(ErrorKind::InvalidArgument, format!("malformed entry payload: {e}")))?;

    let mut incoming = Vec::with_capacity(wire.len());
    for w in wire {
        let kind = match w.kind.as_deref() {
            Some(k) => kind_from_query(k)?,
            None => EntryKind::Sgv,
        };
        incoming.push(Entry {
            oid: String::new(),
            kind,
            mgdl: w.mgdl,
            trend: trend_from_request(w.trend.as_deref()),
            device_id: state.devices.intern(w.device.as_deref().unwrap_or("unknown")),
            event_time: w.event_time,
            created_time: Utc::now(),
        });
    }

    let accepted = state.query.create_entries(incoming);
    for entry in &accepted {
        state.realtime.publish(entry, &state.devices);
    }
    let rendered: Vec<Value> = accepted.iter().map(|e| entry_to_json(e, &state)).collect();
    Ok((axum::http::StatusCode::CREATED, Json(rendered)))
}
