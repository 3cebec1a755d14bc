use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::sync::broadcast;

use crate::store::{DeviceRegistry, Entry};

/// Fan-out hub for live glucose updates. Every accepted entry is published
/// once here; each connected websocket session holds its own receiver and
/// renders the delta independently.
pub struct RealtimeHub {
    sender: broadcast::Sender<Value>,
}

impl Default for RealtimeHub {
    fn default() -> Self {
        Self::new()
    }
}

impl RealtimeHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(256);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Value> {
        self.sender.subscribe()
    }

    /// Publishes a single accepted entry as a `delta:true` frame, the shape
    /// every connected session expects after its initial history snapshot.
    pub fn publish(&self, entry: &Entry, devices: &DeviceRegistry) {
        let frame = json!({
            "delta": true,
            "sgvs": [entry_to_wire(entry, devices)],
            "treatments": [],
            "devicestatus": [],
            "profiles": [],
        });
        // No receivers is the common case between browser sessions; the
        // send failing just means nobody is listening right now.
        let _ = self.sender.send(frame);
    }

    /// Renders up to `history_hours * 60` of the newest entries at or after
    /// `now - history_hours`, oldest first, for a session's initial snapshot.
    pub fn history_snapshot(
        entries: &[Entry],
        now: DateTime<Utc>,
        history_hours: i64,
        devices: &DeviceRegistry,
    ) -> Value {
        let cutoff = now - chrono::Duration::hours(history_hours.max(0));
        let limit = (history_hours.max(0) as usize).saturating_mul(60);

        let mut recent: Vec<&Entry> = entries.iter().filter(|e| e.event_time >= cutoff).collect();
        recent.sort_by_key(|e| e.event_time);
        if recent.len() > limit {
            let skip = recent.len() - limit;
            recent = recent.split_off(skip);
        }

        let sgvs: Vec<Value> = recent.iter().map(|e| entry_to_wire(e, devices)).collect();
        json!({
            "status": "ok",
            "sgvs": sgvs,
            "treatments": [],
            "devicestatus": [],
            "profiles": [],
        })
    }
}

fn entry_to_wire(entry: &Entry, devices: &DeviceRegistry) -> Value {
    json!({
        "_id": entry.oid,
        "type": "sgv",
        "mgdl": entry.mgdl,
        "mills": entry.event_time.timestamp_millis(),
        "device": devices.name(entry.device_id).unwrap_or_else(|| "unknown".to_string()),
        "direction": entry.trend.as_str(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{EntryKind, Trend};

    fn entry(event_time: DateTime<Utc>, mgdl: i32) -> Entry {
        Entry {
            oid: "abc".into(),
            kind: EntryKind::Sgv,
            mgdl,
            trend: Trend::Flat,
            device_id: 1,
            event_time,
            created_time: event_time,
        }
    }

    #[test]
    fn history_snapshot_excludes_older_than_window() {
        let devices = DeviceRegistry::new();
        devices.intern("placeholder"); // id 1, matching `entry()`'s fixed device_id
        let now = Utc::now();
        let entries = vec![
            entry(now - chrono::Duration::hours(5), 90),
            entry(now - chrono::Duration::minutes(10), 120),
        ];
        let snapshot = RealtimeHub::history_snapshot(&entries, now, 1, &devices);
        let sgvs = snapshot["sgvs"].as_array().unwrap();
        assert_eq!(sgvs.len(), 1);
        assert_eq!(sgvs[0]["mgdl"], 120);
        assert_eq!(sgvs[0]["device"], "placeholder");
    }

    #[test]
    fn publish_reaches_subscriber() {
        let devices = DeviceRegistry::new();
        let hub = RealtimeHub::new();
        let mut rx = hub.subscribe();
        hub.publish(&entry(Utc::now(), 140), &devices);
        let frame = rx.try_recv().expect("frame delivered");
        assert_eq!(frame["delta"], true);
        assert_eq!(frame["sgvs"][0]["mgdl"], 140);
    }
}
