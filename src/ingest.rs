use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::error::ErrorKind;
use crate::realtime::RealtimeHub;
use crate::store::{DeviceRegistry, Entry, EntryKind, EntryStore};
use crate::vendor::VendorPoller;

const DEVICE_NAME: &str = "llu ingester";

/// Runs the vendor poll loop: fetch since the last accepted sample, hand
/// new entries to the store, and fan them out to connected sessions.
pub fn spawn(
    poller: Arc<VendorPoller>,
    store: Arc<EntryStore>,
    devices: Arc<DeviceRegistry>,
    hub: Arc<RealtimeHub>,
    interval_secs: u64,
) {
    tokio::spawn(async move {
        let device_id = devices.intern(DEVICE_NAME);
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
        loop {
            interval.tick().await;
            if let Err(e) = run_once(&poller, &store, &hub, &devices, device_id).await {
                match e.kind {
                    ErrorKind::AuthnFailed => {
                        tracing::warn!("ingest: vendor authentication failed: {}", e.message);
                    }
                    ErrorKind::DownForMaintenance => {
                        tracing::warn!("ingest: vendor reports maintenance, will retry");
                    }
                    _ => {
                        tracing::warn!("ingest: poll failed: {}", e.message);
                    }
                }
            }
        }
    });
}

async fn run_once(
    poller: &VendorPoller,
    store: &Arc<EntryStore>,
    hub: &RealtimeHub,
    devices: &DeviceRegistry,
    device_id: u32,
) -> crate::error::Result<()> {
    let last_seen = store
        .latest_before(Utc::now(), 1, |e: &Entry| e.kind == EntryKind::Sgv)
        .into_iter()
        .next()
        .map(|e| e.event_time);

    let mut fetched = poller.fetch_recent(last_seen).await?;
    if fetched.is_empty() {
        return Ok(());
    }

    for entry in fetched.iter_mut() {
        entry.device_id = device_id;
        entry.created_time = Utc::now();
    }
    fetched.sort_by_key(|e| e.event_time);

    let accepted = store.add(fetched);
    if let Some(newest) = accepted.iter().max_by_key(|e| e.event_time) {
        hub.publish(newest, devices);
    }
    tracing::info!("ingest: accepted {} new entries", accepted.len());
    Ok(())
}
