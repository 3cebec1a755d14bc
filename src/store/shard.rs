use chrono::{DateTime, Datelike, TimeZone, Utc};
use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use tokio_util::task::TaskTracker;

use crate::error::{Error, Result};
use crate::store::object::ObjectStoreGateway;
use crate::store::model::ShardRecord;

/// Adapts a record type to its wire encoding. `Entry` needs the shared
/// `DeviceRegistry` to resolve device ids to names; `Treatment` does not —
/// this indirection is what lets `TimeShardStore<R>` stay generic over
/// both without caring which.
pub trait ShardSerde<R>: Send + Sync {
    fn encode(&self, records: &[R]) -> Vec<u8>;
    fn decode(&self, bytes: &[u8]) -> Vec<R>;
}

#[derive(Default)]
struct DirtyState {
    day: bool,
    month: bool,
    years: HashSet<i32>,
}

impl DirtyState {
    fn is_clean(&self) -> bool {
        !self.day && !self.month && self.years.is_empty()
    }

    fn take(&mut self) -> DirtyState {
        std::mem::take(self)
    }
}

enum DirtyTarget {
    Day,
    Month,
    Year(i32),
}

fn classify(t: DateTime<Utc>, now: DateTime<Utc>) -> DirtyTarget {
    if t >= start_of_day(now) {
        DirtyTarget::Day
    } else if t >= start_of_month(now) {
        DirtyTarget::Month
    } else {
        DirtyTarget::Year(t.year())
    }
}

fn start_of_day(t: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(t.year(), t.month(), t.day(), 0, 0, 0)
        .unwrap()
}

fn start_of_month(t: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(t.year(), t.month(), 1, 0, 0, 0).unwrap()
}

fn start_of_year(t: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(t.year(), 1, 1, 0, 0, 0).unwrap()
}

/// Generic append-mostly in-memory time-ordered store with partitioned
/// persistence into day/month/year shards. One instance holds entries,
/// another holds treatments (see `EntryStore`/`TreatmentStore` aliases).
pub struct TimeShardStore<R: ShardRecord> {
    ns: &'static str,
    suffix: &'static str,
    records: RwLock<Vec<R>>,
    dirty: std::sync::Mutex<DirtyState>,
    serde: Arc<dyn ShardSerde<R>>,
    object_store: Arc<dyn ObjectStoreGateway>,
    tracker: TaskTracker,
}

impl<R: ShardRecord> TimeShardStore<R> {
    pub fn new(
        ns: &'static str,
        suffix: &'static str,
        serde: Arc<dyn ShardSerde<R>>,
        object_store: Arc<dyn ObjectStoreGateway>,
        tracker: TaskTracker,
    ) -> Arc<Self> {
        Arc::new(Self {
            ns,
            suffix,
            records: RwLock::new(Vec::new()),
            dirty: std::sync::Mutex::new(DirtyState::default()),
            serde,
            object_store,
            tracker,
        })
    }

    fn shard_key(&self, window: &str, key: &str) -> String {
        format!("{}-{window}/{key}{}.json", self.ns, self.suffix)
    }

    /// Loads `prevYear`, `year`, `month`, `day` shards active at boot time,
    /// in that order. "Not found" and errors are both non-fatal: invariant
    /// 3 guarantees this sequence yields total order without re-sorting.
    pub async fn boot(&self) -> Result<()> {
        let now = Utc::now();
        let keys = [
            self.shard_key("year", &format!("{:04}", now.year() - 1)),
            self.shard_key("year", &format!("{:04}", now.year())),
            self.shard_key("month", &now.format("%Y-%m").to_string()),
            self.shard_key("day", &now.format("%Y-%m-%d").to_string()),
        ];

        let mut loaded = Vec::new();
        for key in &keys {
            match self.object_store.get(key).await {
                Ok(Some(bytes)) => {
                    let mut records = self.serde.decode(&bytes);
                    tracing::info!("boot: loaded {} records from {key}", records.len());
                    loaded.append(&mut records);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("boot: could not load {key}: {e}");
                }
            }
        }

        *self.records.write().unwrap() = loaded;
        Ok(())
    }

    pub fn by_oid(&self, oid: &str) -> Option<R> {
        let records = self.records.read().unwrap();
        records.iter().rev().find(|r| r.oid() == oid).cloned()
    }

    /// Up to `n` records with `eventTime <= cutoff` that satisfy `filter`,
    /// newest first.
    pub fn latest_before(&self, cutoff: DateTime<Utc>, n: usize, filter: impl Fn(&R) -> bool) -> Vec<R> {
        let records = self.records.read().unwrap();
        records
            .iter()
            .rev()
            .filter(|r| r.event_time() <= cutoff && filter(r))
            .take(n)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Generates missing oids, appends, flags dirty windows, re-sorts only
    /// if insertion would break sort order, and schedules an async flush.
    /// Returns the input with oids filled.
    pub fn add(self: &Arc<Self>, mut incoming: Vec<R>) -> Vec<R> {
        if incoming.is_empty() {
            return incoming;
        }

        let now = Utc::now();
        let mut targets = Vec::with_capacity(incoming.len());

        {
            let mut records = self.records.write().unwrap();
            let mut running_max = records.last().map(|r| r.event_time());
            let mut need_resort = false;

            for record in incoming.iter_mut() {
                if record.oid().is_empty() {
                    record.set_oid(crate::store::oid::generate());
                }

                if let Some(last) = records.last() {
                    if record.event_time() <= last.event_time() + chrono::Duration::seconds(10) {
                        tracing::warn!(
                            "potential duplicate: oid={} eventTime={}",
                            record.oid(),
                            record.event_time()
                        );
                    }
                }

                // Compare against the running max seen so far in this batch, not
                // just the store's pre-call max: an internally out-of-order batch
                // (e.g. [t=200, t=100]) must also trigger a re-sort.
                if let Some(max) = running_max {
                    if record.event_time() < max {
                        need_resort = true;
                    }
                }
                running_max = Some(match running_max {
                    Some(max) if max > record.event_time() => max,
                    _ => record.event_time(),
                });

                targets.push(classify(record.event_time(), now));
                records.push(record.clone());
            }

            if need_resort {
                records.sort_by_key(|r| r.event_time());
            }
        }

        self.mark_dirty(targets);
        self.schedule_flush();

        incoming
    }

    /// Treatments only: replace the record at `oid`. Marks dirty windows
    /// for both the old and new `eventTime` if it changed, and re-sorts.
    pub fn update(self: &Arc<Self>, oid: &str, mut new_record: R) -> Result<R> {
        new_record.set_oid(oid.to_string());
        let now = Utc::now();
        let mut targets = Vec::new();

        {
            let mut records = self.records.write().unwrap();
            let idx = records
                .iter()
                .position(|r| r.oid() == oid)
                .ok_or_else(|| Error::not_found(format!("no record with oid {oid}")))?;

            let old_time = records[idx].event_time();
            let new_time = new_record.event_time();
            records[idx] = new_record.clone();

            targets.push(classify(new_time, now));
            if old_time != new_time {
                targets.push(classify(old_time, now));
                records.sort_by_key(|r| r.event_time());
            }
        }

        self.mark_dirty(targets);
        self.schedule_flush();
        Ok(new_record)
    }

    /// Treatments only: remove the record at `oid`, marking its window dirty.
    pub fn delete(self: &Arc<Self>, oid: &str) -> Result<()> {
        let now = Utc::now();
        let target = {
            let mut records = self.records.write().unwrap();
            let idx = records
                .iter()
                .position(|r| r.oid() == oid)
                .ok_or_else(|| Error::not_found(format!("no record with oid {oid}")))?;
            let removed = records.remove(idx);
            classify(removed.event_time(), now)
        };

        self.mark_dirty(vec![target]);
        self.schedule_flush();
        Ok(())
    }

    fn mark_dirty(&self, targets: Vec<DirtyTarget>) {
        let mut dirty = self.dirty.lock().unwrap();
        for target in targets {
            match target {
                DirtyTarget::Day => dirty.day = true,
                DirtyTarget::Month => dirty.month = true,
                DirtyTarget::Year(y) => {
                    dirty.years.insert(y);
                }
            }
        }
    }

    fn schedule_flush(self: &Arc<Self>) {
        let store = Arc::clone(self);
        self.tracker.spawn(async move {
            store.flush_once().await;
        });
    }

    /// Snapshots and clears the dirty flags, then materialises and uploads
    /// only the shards those flags named. Upload errors are logged but do
    /// not re-dirty the flag (see open question in the design ledger).
    async fn flush_once(self: Arc<Self>) {
        let snapshot = {
            let mut dirty = self.dirty.lock().unwrap();
            if dirty.is_clean() {
                return;
            }
            dirty.take()
        };

        let r = Utc::now();
        let records: Vec<R> = self.records.read().unwrap().clone();

        if snapshot.day {
            let key = self.shard_key("day", &r.format("%Y-%m-%d").to_string());
            let day_records: Vec<R> = records
                .iter()
                .filter(|rec| rec.event_time() >= start_of_day(r))
                .cloned()
                .collect();
            self.upload(&key, &day_records).await;
        }

        if snapshot.month {
            let key = self.shard_key("month", &r.format("%Y-%m").to_string());
            let month_records: Vec<R> = records
                .iter()
                .filter(|rec| {
                    rec.event_time() >= start_of_month(r) && rec.event_time() < start_of_day(r)
                })
                .cloned()
                .collect();
            self.upload(&key, &month_records).await;
        }

        for year in snapshot.years {
            let key = self.shard_key("year", &format!("{year:04}"));
            let year_records: Vec<R> = if year == r.year() {
                records
                    .iter()
                    .filter(|rec| {
                        rec.event_time() >= start_of_year(r) && rec.event_time() < start_of_month(r)
                    })
                    .cloned()
                    .collect()
            } else {
                records
                    .iter()
                    .filter(|rec| rec.event_time().year() == year)
                    .cloned()
                    .collect()
            };
            self.upload(&key, &year_records).await;
        }
    }

    async fn upload(&self, key: &str, records: &[R]) {
        let bytes = self.serde.encode(records);
        if let Err(e) = self.object_store.put(key, bytes).await {
            tracing::error!("flush: upload of {key} failed: {e}");
        } else {
            tracing::debug!("flush: uploaded {} records to {key}", records.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::codec::ShardCodec;
    use crate::store::devices::DeviceRegistry;
    use crate::store::model::{Entry, EntryKind, Trend};
    use crate::store::object::MemoryObjectStore;

    struct EntryAdapter {
        devices: Arc<DeviceRegistry>,
    }

    impl ShardSerde<Entry> for EntryAdapter {
        fn encode(&self, records: &[Entry]) -> Vec<u8> {
            ShardCodec::encode_entries(records, &self.devices)
        }
        fn decode(&self, bytes: &[u8]) -> Vec<Entry> {
            ShardCodec::decode_entries(bytes, &self.devices)
        }
    }

    fn entry(event_secs: i64, mgdl: i32) -> Entry {
        Entry {
            oid: String::new(),
            kind: EntryKind::Sgv,
            mgdl,
            trend: Trend::Flat,
            device_id: 0,
            event_time: Utc.timestamp_opt(event_secs, 0).unwrap(),
            created_time: Utc::now(),
        }
    }

    fn test_store() -> Arc<TimeShardStore<Entry>> {
        let devices = Arc::new(DeviceRegistry::new());
        let object_store = Arc::new(MemoryObjectStore::new());
        TimeShardStore::new(
            "ns",
            "",
            Arc::new(EntryAdapter { devices }),
            object_store,
            TaskTracker::new(),
        )
    }

    #[tokio::test]
    async fn add_on_empty_store_fills_oids() {
        let store = test_store();
        let accepted = store.add(vec![entry(1_700_000_000, 100)]);
        assert_eq!(accepted.len(), 1);
        assert!(!accepted[0].oid.is_empty());
    }

    #[tokio::test]
    async fn add_keeps_records_sorted_by_event_time() {
        let store = test_store();
        store.add(vec![entry(1_700_000_100, 100)]);
        store.add(vec![entry(1_700_000_000, 90)]); // out-of-order insert forces resort

        let newest = store.latest_before(Utc.timestamp_opt(2_000_000_000, 0).unwrap(), 10, |_| true);
        let times: Vec<i64> = newest.iter().map(|e| e.event_time.timestamp()).collect();
        let mut sorted = times.clone();
        sorted.sort();
        sorted.reverse();
        assert_eq!(times, sorted);
    }

    #[tokio::test]
    async fn add_sorts_an_internally_out_of_order_batch() {
        let store = test_store();
        // A single batch with disorder inside it, not across calls: the
        // store's pre-call max (none, here) never flags this unsorted.
        store.add(vec![entry(1_700_000_200, 100), entry(1_700_000_100, 90)]);

        let newest = store.latest_before(Utc.timestamp_opt(2_000_000_000, 0).unwrap(), 10, |_| true);
        let times: Vec<i64> = newest.iter().map(|e| e.event_time.timestamp()).collect();
        let mut sorted = times.clone();
        sorted.sort();
        sorted.reverse();
        assert_eq!(times, sorted);
    }

    #[tokio::test]
    async fn by_oid_finds_accepted_record() {
        let store = test_store();
        let accepted = store.add(vec![entry(1_700_000_000, 100)]);
        let oid = accepted[0].oid.clone();
        let found = store.by_oid(&oid).expect("record present");
        assert_eq!(found.mgdl, 100);
    }

    #[tokio::test]
    async fn latest_before_excludes_future_entries() {
        let store = test_store();
        let now = Utc::now();
        store.add(vec![entry(now.timestamp() - 60, 90)]);
        store.add(vec![entry(now.timestamp() + 3600, 999)]); // future entry

        let latest = store.latest_before(now, 1, |_| true);
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].mgdl, 90);
    }
}
