use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::sync::Mutex;

use crate::error::{Error, ErrorKind, Result};
use crate::store::{Entry, EntryKind, Trend};

/// Known vendor regions and their API hosts, or `None` if `region` isn't
/// in the table.
fn known_region_host(region: &str) -> Option<&'static str> {
    Some(match region {
        "us" => "api.libreview.io",
        "eu" => "api-eu.libreview.io",
        "eu2" => "api-eu2.libreview.io",
        "ae" => "api-ae.libreview.io",
        "ap" => "api-ap.libreview.io",
        "au" => "api-au.libreview.io",
        "ca" => "api-ca.libreview.io",
        "de" => "api-de.libreview.io",
        "fr" => "api-fr.libreview.io",
        "jp" => "api-jp.libreview.io",
        "la" => "api-la.libreview.io",
        _ => return None,
    })
}

/// The initial region to contact before any authentication has happened.
/// An unknown region string falls back to `"us"`.
fn region_host(region: &str) -> &'static str {
    known_region_host(region).unwrap_or_else(|| known_region_host("us").unwrap())
}

/// The host a redirect should send us to. An unknown target region falls
/// back to `"eu2"`, distinct from `region_host`'s `"us"` fallback for the
/// pre-authentication case (spec: "unknown region defaults to `us`
/// initially and `eu2` after a redirect with an unknown target").
fn redirect_region_host(region: Option<&str>) -> &'static str {
    region
        .and_then(known_region_host)
        .unwrap_or_else(|| known_region_host("eu2").unwrap())
}

#[derive(Debug, Clone, Default)]
struct Session {
    host: &'static str,
    auth_ticket: String,
    auth_ticket_expires: Option<DateTime<Utc>>,
    user_id: String,
    account_id: String,
    patient_id: Option<String>,
}

/// Authenticates with the upstream vendor, re-authenticating on ticket
/// expiry or regional redirect, and retrieves recent glucose samples.
pub struct VendorPoller {
    http: reqwest::Client,
    username: String,
    password: String,
    session: Mutex<Session>,
}

#[derive(Deserialize)]
struct LoginResponse {
    status: i32,
    data: Option<LoginData>,
}

#[derive(Deserialize)]
struct LoginData {
    #[serde(default)]
    redirect: bool,
    region: Option<String>,
    #[serde(rename = "authTicket")]
    auth_ticket: Option<AuthTicket>,
    user: Option<LoginUser>,
}

#[derive(Deserialize)]
struct AuthTicket {
    token: String,
    #[serde(rename = "expires")]
    expires: i64,
}

#[derive(Deserialize)]
struct LoginUser {
    id: String,
}

#[derive(Deserialize)]
struct ConnectionsResponse {
    data: Vec<ConnectionEntry>,
}

#[derive(Deserialize)]
struct ConnectionEntry {
    #[serde(rename = "patientId")]
    patient_id: String,
}

#[derive(Deserialize)]
struct GraphResponse {
    data: GraphData,
}

#[derive(Deserialize)]
struct GraphData {
    connection: ConnectionGraph,
    #[serde(rename = "graphData")]
    graph_data: Vec<GraphSample>,
}

#[derive(Deserialize)]
struct ConnectionGraph {
    #[serde(rename = "glucoseMeasurement")]
    glucose_measurement: Option<GlucoseMeasurement>,
}

#[derive(Deserialize)]
struct GraphSample {
    #[serde(rename = "ValueInMgPerDl")]
    value_in_mgdl: i32,
    #[serde(rename = "Timestamp")]
    timestamp: String,
}

#[derive(Deserialize)]
struct GlucoseMeasurement {
    #[serde(rename = "ValueInMgPerDl")]
    value_in_mgdl: i32,
    #[serde(rename = "TrendArrow")]
    trend_arrow: Option<i32>,
    #[serde(rename = "Timestamp")]
    timestamp: String,
}

fn trend_from_vendor(code: Option<i32>) -> Trend {
    match code {
        Some(1) => Trend::SingleDown,
        Some(2) => Trend::FortyFiveDown,
        Some(3) => Trend::Flat,
        Some(4) => Trend::FortyFiveUp,
        Some(5) => Trend::SingleUp,
        _ => Trend::None,
    }
}

/// Parses `"M/D/YYYY h:mm:ss AM"` as a UTC instant (the vendor never sends
/// a timezone offset and its samples are known to already be UTC).
fn parse_vendor_time(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, "%-m/%-d/%Y %-I:%M:%S %p")
        .ok()
        .map(|naive| DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
}

impl VendorPoller {
    pub fn new(initial_region: &str, username: String, password: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            username,
            password,
            session: Mutex::new(Session {
                host: region_host(initial_region),
                ..Default::default()
            }),
        }
    }

    fn headers(&self, ticket: Option<&str>, account_id: Option<&str>) -> reqwest::header::HeaderMap {
        use reqwest::header::{HeaderMap, HeaderValue};
        let mut headers = HeaderMap::new();
        headers.insert("Accept", HeaderValue::from_static("application/json, text/plain, */*"));
        headers.insert(
            "Content-Type",
            HeaderValue::from_static("application/json;charset=UTF-8"),
        );
        headers.insert(
            "User-Agent",
            HeaderValue::from_static(
                "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15",
            ),
        );
        headers.insert("version", HeaderValue::from_static("4.12.0"));
        headers.insert("product", HeaderValue::from_static("llu.ios"));
        if let Some(ticket) = ticket {
            if let Ok(v) = HeaderValue::from_str(&format!("Bearer {ticket}")) {
                headers.insert("Authorization", v);
            }
        }
        if let Some(account_id) = account_id {
            if let Ok(v) = HeaderValue::from_str(account_id) {
                headers.insert("Account-Id", v);
            }
        }
        headers
    }

    /// Authenticates, following at most one regional redirect. A second
    /// redirect to the same region is treated as a fatal loop.
    async fn authenticate(&self) -> Result<()> {
        let host = self.session.lock().unwrap().host;
        self.authenticate_against(host, false).await
    }

    async fn authenticate_against(&self, host: &'static str, already_redirected: bool) -> Result<()> {
        let url = format!("https://{host}/llu/auth/login");
        let body = serde_json::json!({ "email": self.username, "password": self.password });

        let response = self
            .http
            .post(&url)
            .headers(self.headers(None, None))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::new(ErrorKind::Transport, e.to_string()))?;

        if response.status().as_u16() == 911 {
            return Err(Error::new(ErrorKind::DownForMaintenance, "vendor reports maintenance"));
        }

        let parsed: LoginResponse = response
            .json()
            .await
            .map_err(|e| Error::new(ErrorKind::Transport, format!("bad login response: {e}")))?;

        match parsed.status {
            0 => {}
            2 | 4 => return Err(Error::new(ErrorKind::AuthnFailed, "vendor rejected credentials")),
            _ => return Err(Error::new(ErrorKind::AuthnFailed, "vendor returned unknown status")),
        }

        let data = parsed
            .data
            .ok_or_else(|| Error::new(ErrorKind::AuthnFailed, "login response missing data"))?;

        if data.redirect {
            if already_redirected {
                return Err(Error::new(ErrorKind::AuthnFailed, "redirect loop"));
            }
            let next_host = redirect_region_host(data.region.as_deref());
            return Box::pin(self.authenticate_against(next_host, true)).await;
        }

        let ticket = data
            .auth_ticket
            .ok_or_else(|| Error::new(ErrorKind::AuthnFailed, "login response missing auth ticket"))?;
        let user = data
            .user
            .ok_or_else(|| Error::new(ErrorKind::AuthnFailed, "login response missing user"))?;

        let account_id = {
            let mut hasher = Sha256::new();
            hasher.update(user.id.as_bytes());
            hex::encode(hasher.finalize())
        };

        let mut session = self.session.lock().unwrap();
        session.host = host;
        session.auth_ticket = ticket.token;
        session.auth_ticket_expires = DateTime::from_timestamp(ticket.expires, 0);
        session.user_id = user.id;
        session.account_id = account_id;
        Ok(())
    }

    fn needs_reauth(&self) -> bool {
        let session = self.session.lock().unwrap();
        session.auth_ticket.is_empty()
            || session
                .auth_ticket_expires
                .map(|exp| Utc::now() >= exp)
                .unwrap_or(true)
    }

    async fn discover_patient(&self) -> Result<()> {
        let (host, ticket, account_id) = {
            let session = self.session.lock().unwrap();
            (session.host, session.auth_ticket.clone(), session.account_id.clone())
        };

        let url = format!("https://{host}/llu/connections");
        let response = self
            .http
            .get(&url)
            .headers(self.headers(Some(&ticket), Some(&account_id)))
            .send()
            .await
            .map_err(|e| Error::new(ErrorKind::Transport, e.to_string()))?;

        if response.status().as_u16() == 911 {
            return Err(Error::new(ErrorKind::DownForMaintenance, "vendor reports maintenance"));
        }

        let parsed: ConnectionsResponse = response
            .json()
            .await
            .map_err(|e| Error::new(ErrorKind::Transport, format!("bad connections response: {e}")))?;

        let patient_id = parsed
            .data
            .into_iter()
            .next()
            .map(|c| c.patient_id)
            .ok_or_else(|| Error::new(ErrorKind::Transport, "no connections for this account"))?;

        self.session.lock().unwrap().patient_id = Some(patient_id);
        Ok(())
    }

    /// Fetches recent samples, filtered to `eventTime > last_seen`. An empty
    /// `last_seen` accepts everything in the graph response.
    pub async fn fetch_recent(&self, last_seen: Option<DateTime<Utc>>) -> Result<Vec<Entry>> {
        if self.needs_reauth() {
            self.authenticate().await?;
        }
        if self.session.lock().unwrap().patient_id.is_none() {
            self.discover_patient().await?;
        }

        let (host, ticket, account_id, patient_id) = {
            let session = self.session.lock().unwrap();
            (
                session.host,
                session.auth_ticket.clone(),
                session.account_id.clone(),
                session
                    .patient_id
                    .clone()
                    .ok_or_else(|| Error::new(ErrorKind::Transport, "no patient discovered"))?,
            )
        };

        let url = format!("https://{host}/llu/connections/{patient_id}/graph");
        let response = self
            .http
            .get(&url)
            .headers(self.headers(Some(&ticket), Some(&account_id)))
            .send()
            .await
            .map_err(|e| Error::new(ErrorKind::Transport, e.to_string()))?;

        if response.status().as_u16() == 911 {
            return Err(Error::new(ErrorKind::DownForMaintenance, "vendor reports maintenance"));
        }

        let parsed: GraphResponse = response
            .json()
            .await
            .map_err(|e| Error::new(ErrorKind::Transport, format!("bad graph response: {e}")))?;

        let mut entries = Vec::new();
        for sample in parsed.data.graph_data {
            if let Some(event_time) = parse_vendor_time(&sample.timestamp) {
                entries.push(self.to_entry(sample.value_in_mgdl, Trend::None, event_time));
            }
        }
        if let Some(latest) = parsed.data.connection.glucose_measurement {
            if let Some(event_time) = parse_vendor_time(&latest.timestamp) {
                entries.push(self.to_entry(
                    latest.value_in_mgdl,
                    trend_from_vendor(latest.trend_arrow),
                    event_time,
                ));
            }
        }

        if let Some(cutoff) = last_seen {
            entries.retain(|e| e.event_time > cutoff);
        }

        Ok(entries)
    }

    fn to_entry(&self, mgdl: i32, trend: Trend, event_time: DateTime<Utc>) -> Entry {
        Entry {
            oid: String::new(),
            kind: EntryKind::Sgv,
            mgdl,
            trend,
            device_id: 0, // resolved to the "llu ingester" id by the ingestion pipeline
            event_time,
            created_time: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_region_falls_back_to_us() {
        assert_eq!(region_host("not-a-region"), region_host("us"));
    }

    #[test]
    fn redirect_to_unknown_region_falls_back_to_eu2() {
        assert_eq!(redirect_region_host(Some("not-a-region")), region_host("eu2"));
        assert_eq!(redirect_region_host(None), region_host("eu2"));
    }

    #[test]
    fn redirect_to_known_region_uses_its_host() {
        assert_eq!(redirect_region_host(Some("ap")), region_host("ap"));
    }

    #[test]
    fn parses_vendor_timestamp_as_utc() {
        let parsed = parse_vendor_time("11/28/2024 9:30:00 AM").unwrap();
        assert_eq!(parsed.to_rfc3339(), "2024-11-28T09:30:00+00:00");
    }

    #[test]
    fn trend_mapping_matches_vendor_codes() {
        assert_eq!(trend_from_vendor(Some(3)), Trend::Flat);
        assert_eq!(trend_from_vendor(Some(5)), Trend::SingleUp);
        assert_eq!(trend_from_vendor(None), Trend::None);
    }
}
