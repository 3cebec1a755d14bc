use chrono::Utc;
use std::sync::Arc;

use crate::error::{Error, ErrorKind, Result};
use crate::store::{Entry, EntryKind, EntryStore, Treatment, TreatmentStore};

const MIN_COUNT: usize = 1;
const MAX_COUNT: usize = 50_000;
const DEFAULT_COUNT: usize = 20;

/// Stateless read/write surface over the entry and treatment stores. The
/// HTTP layer is a thin wrapper around these methods; nothing here knows
/// about axum.
pub struct QueryFacade {
    entries: Arc<EntryStore>,
    treatments: Arc<TreatmentStore>,
}

impl QueryFacade {
    pub fn new(entries: Arc<EntryStore>, treatments: Arc<TreatmentStore>) -> Self {
        Self { entries, treatments }
    }

    fn resolve_count(requested: Option<usize>) -> Result<usize> {
        let count = requested.unwrap_or(DEFAULT_COUNT);
        if count < MIN_COUNT || count > MAX_COUNT {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!("count must be between {MIN_COUNT} and {MAX_COUNT}"),
            ));
        }
        Ok(count)
    }

    pub fn entry_by_oid(&self, oid: &str) -> Result<Entry> {
        self.entries
            .by_oid(oid)
            .ok_or_else(|| Error::not_found(format!("no entry with oid {oid}")))
    }

    pub fn latest_sgv(&self) -> Option<Entry> {
        self.entries
            .latest_before(Utc::now(), 1, |e| e.kind == EntryKind::Sgv)
            .into_iter()
            .next()
    }

    /// Up to `count` (default 20, capped to [1, 50000]) entries filtered by
    /// `kind` (all kinds if `None`), newest first, never including the
    /// future.
    pub fn latest_entries(&self, count: Option<usize>, kind: Option<EntryKind>) -> Result<Vec<Entry>> {
        let count = Self::resolve_count(count)?;
        Ok(self
            .entries
            .latest_before(Utc::now(), count, |e| kind.is_none_or(|k| e.kind == k)))
    }

    /// Accepts new entries, filling `oid`/`createdTime` for any that are
    /// missing them, and returns them with those fields populated.
    pub fn create_entries(&self, mut incoming: Vec<Entry>) -> Vec<Entry> {
        let now = Utc::now();
        for entry in incoming.iter_mut() {
            entry.created_time = now;
        }
        self.entries.add(incoming)
    }

    /// Newest `count` entries of any kind, used to build a realtime
    /// session's initial history snapshot.
    pub fn recent_entries(&self, count: usize) -> Vec<Entry> {
        self.entries.latest_before(Utc::now(), count, |_| true)
    }

    pub fn latest_treatments(&self, count: Option<usize>) -> Result<Vec<Treatment>> {
        let count = Self::resolve_count(count)?;
        Ok(self.treatments.latest_before(Utc::now(), count, |_| true))
    }

    pub fn treatment_by_oid(&self, oid: &str) -> Result<Treatment> {
        self.treatments
            .by_oid(oid)
            .ok_or_else(|| Error::not_found(format!("no treatment with oid {oid}")))
    }

    pub fn create_treatments(&self, mut incoming: Vec<Treatment>) -> Vec<Treatment> {
        let now = Utc::now();
        for treatment in incoming.iter_mut() {
            treatment.created_time = now;
        }
        self.treatments.add(incoming)
    }

    pub fn update_treatment(&self, oid: &str, treatment: Treatment) -> Result<Treatment> {
        self.treatments.update(oid, treatment)
    }

    pub fn delete_treatment(&self, oid: &str) -> Result<()> {
        self.treatments.delete(oid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::devices::DeviceRegistry;
    use crate::store::object::MemoryObjectStore;
    use crate::store::{new_entry_store, new_treatment_store};
    use tokio_util::task::TaskTracker;

    fn facade() -> QueryFacade {
        let devices = Arc::new(DeviceRegistry::new());
        let object_store = Arc::new(MemoryObjectStore::new());
        let tracker = TaskTracker::new();
        let entries = new_entry_store(devices, object_store.clone(), tracker.clone());
        let treatments = new_treatment_store(object_store, tracker);
        QueryFacade::new(entries, treatments)
    }

    fn entry(mgdl: i32) -> Entry {
        Entry {
            oid: String::new(),
            kind: EntryKind::Sgv,
            mgdl,
            trend: crate::store::Trend::Flat,
            device_id: 0,
            event_time: Utc::now(),
            created_time: Utc::now(),
        }
    }

    #[test]
    fn rejects_count_outside_bounds() {
        let facade = facade();
        assert!(facade.latest_entries(Some(0), None).is_err());
        assert!(facade.latest_entries(Some(50_001), None).is_err());
        assert!(facade.latest_entries(Some(20), None).is_ok());
    }

    #[test]
    fn create_entries_fills_oid_and_created_time() {
        let facade = facade();
        let accepted = facade.create_entries(vec![entry(100)]);
        assert_eq!(accepted.len(), 1);
        assert!(!accepted[0].oid.is_empty());
    }

    #[test]
    fn latest_sgv_returns_newest_sgv_only() {
        let facade = facade();
        facade.create_entries(vec![entry(90)]);
        facade.create_entries(vec![entry(140)]);
        let latest = facade.latest_sgv().expect("an sgv exists");
        assert_eq!(latest.mgdl, 140);
    }
}
