use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::devices::DeviceRegistry;
use super::model::{Entry, EntryKind, Treatment, Trend};

/// Encodes/decodes a list of stored records to/from the on-disk JSON
/// format used by each shard file, and maps between the external wire
/// record and the compact in-memory record. Decoding is lenient: a
/// missing `device` resolves to `"unknown"`; a treatment record missing
/// `_id`, `created_at`, or `eventType` is dropped with a warning.
pub struct ShardCodec;

#[derive(Debug, Serialize, Deserialize)]
struct EntryWire {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "type")]
    kind: String,
    sgv: i32,
    direction: String,
    #[serde(default = "unknown_device")]
    device: String,
    #[serde(rename = "dateString")]
    date_string: DateTime<Utc>,
    #[serde(rename = "sysTime")]
    sys_time: DateTime<Utc>,
}

fn unknown_device() -> String {
    "unknown".to_string()
}

fn kind_from_wire(s: &str) -> EntryKind {
    match s {
        "mbg" => EntryKind::Mbg,
        "cal" => EntryKind::Cal,
        _ => EntryKind::Sgv,
    }
}

fn trend_from_wire(s: &str) -> Trend {
    match s {
        "DoubleUp" => Trend::DoubleUp,
        "SingleUp" => Trend::SingleUp,
        "FortyFiveUp" => Trend::FortyFiveUp,
        "Flat" => Trend::Flat,
        "FortyFiveDown" => Trend::FortyFiveDown,
        "SingleDown" => Trend::SingleDown,
        "DoubleDown" => Trend::DoubleDown,
        "NotComputable" => Trend::NotComputable,
        "RateOutOfRange" => Trend::RateOutOfRange,
        _ => Trend::None,
    }
}

impl ShardCodec {
    pub fn encode_entries(entries: &[Entry], devices: &DeviceRegistry) -> Vec<u8> {
        let wire: Vec<EntryWire> = entries
            .iter()
            .map(|e| EntryWire {
                id: e.oid.clone(),
                kind: e.kind.as_str().to_string(),
                sgv: e.mgdl,
                direction: e.trend.as_str().to_string(),
                device: devices.name(e.device_id).unwrap_or_else(unknown_device),
                date_string: e.event_time,
                sys_time: e.created_time,
            })
            .collect();
        serde_json::to_vec(&wire).expect("entry wire records always serialize")
    }

    pub fn decode_entries(bytes: &[u8], devices: &DeviceRegistry) -> Vec<Entry> {
        let wire: Vec<Value> = match serde_json::from_slice(bytes) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("shard codec: could not parse entry shard: {e}");
                return Vec::new();
            }
        };

        wire.into_iter()
            .filter_map(|value| match serde_json::from_value::<EntryWire>(value) {
                Ok(w) => Some(Entry {
                    oid: w.id,
                    kind: kind_from_wire(&w.kind),
                    mgdl: w.sgv,
                    trend: trend_from_wire(&w.direction),
                    device_id: devices.intern(&w.device),
                    event_time: w.date_string,
                    created_time: w.sys_time,
                }),
                Err(e) => {
                    tracing::warn!("shard codec: dropping malformed entry: {e}");
                    None
                }
            })
            .collect()
    }

    pub fn encode_treatments(treatments: &[Treatment]) -> Vec<u8> {
        let wire: Vec<Value> = treatments
            .iter()
            .map(|t| {
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
            })
            .collect();
        serde_json::to_vec(&wire).expect("treatment wire records always serialize")
    }

    pub fn decode_treatments(bytes: &[u8]) -> Vec<Treatment> {
        let wire: Vec<Value> = match serde_json::from_slice(bytes) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("shard codec: could not parse treatment shard: {e}");
                return Vec::new();
            }
        };

        wire.into_iter()
            .filter_map(|value| {
                let mut obj = match value {
                    Value::Object(obj) => obj,
                    _ => return None,
                };
                let id = obj.remove("_id").and_then(|v| v.as_str().map(str::to_string));
                let created_at = obj.remove("created_at").and_then(|v| v.as_str().map(str::to_string));
                let event_type = obj.remove("eventType").and_then(|v| v.as_str().map(str::to_string));
                let event_time = obj.remove("eventTime").and_then(|v| v.as_str().map(str::to_string));

                let (id, created_at, event_type) = match (id, created_at, event_type) {
                    (Some(i), Some(c), Some(e)) => (i, c, e),
                    _ => {
                        tracing::warn!("shard codec: dropping treatment missing _id/created_at/eventType");
                        return None;
                    }
                };

                let created_time = parse_rfc3339(&created_at)?;
                let event_time = event_time
                    .and_then(|s| parse_rfc3339(&s))
                    .unwrap_or(created_time);

                Some(Treatment {
                    oid: id,
                    event_time,
                    kind: event_type,
                    created_time,
                    fields: obj,
                })
            })
            .collect()
    }
}

fn parse_rfc3339(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(oid: &str, mgdl: i32, device_id: u32, secs: i64) -> Entry {
        Entry {
            oid: oid.to_string(),
            kind: EntryKind::Sgv,
            mgdl,
            trend: Trend::Flat,
            device_id,
            event_time: Utc.timestamp_opt(secs, 0).unwrap(),
            created_time: Utc.timestamp_opt(secs + 5, 0).unwrap(),
        }
    }

    #[test]
    fn entry_round_trip() {
        let devices = DeviceRegistry::new();
        let device_id = devices.intern("G6 Native / G5 Native");
        let entries = vec![entry("674708e0575df739a9711a40", 105, device_id, 1_700_000_000)];

        let encoded = ShardCodec::encode_entries(&entries, &devices);
        let decoded = ShardCodec::decode_entries(&encoded, &devices);

        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].oid, entries[0].oid);
        assert_eq!(decoded[0].mgdl, 105);
        assert_eq!(decoded[0].device_id, device_id);
    }

    #[test]
    fn entry_decode_defaults_missing_device_to_unknown() {
        let devices = DeviceRegistry::new();
        let json = br#"[{"_id":"674708e0575df739a9711a40","type":"sgv","sgv":105,
            "direction":"Flat","dateString":"2024-11-27T11:50:21Z","sysTime":"2024-11-27T11:56:16Z"}]"#;
        let decoded = ShardCodec::decode_entries(json, &devices);
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].device_id, 0);
    }

    #[test]
    fn treatment_round_trip_preserves_open_fields() {
        let mut fields = Map::new();
        fields.insert("insulin".to_string(), serde_json::json!(4.5));
        fields.insert("notes".to_string(), serde_json::json!("pre-meal bolus"));

        let treatments = vec![Treatment {
            oid: "674708e0575df739a9711a41".to_string(),
            event_time: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            kind: "Bolus".to_string(),
            created_time: Utc.timestamp_opt(1_700_000_010, 0).unwrap(),
            fields,
        }];

        let encoded = ShardCodec::encode_treatments(&treatments);
        let decoded = ShardCodec::decode_treatments(&encoded);

        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].kind, "Bolus");
        assert_eq!(decoded[0].fields.get("insulin"), Some(&serde_json::json!(4.5)));
        assert!(!decoded[0].fields.contains_key("_id"));
    }

    #[test]
    fn treatment_missing_required_head_is_dropped() {
        let json = br#"[{"created_at":"2024-11-27T11:50:21Z","eventType":"Note"}]"#;
        let decoded = ShardCodec::decode_treatments(json);
        assert!(decoded.is_empty());
    }
}
