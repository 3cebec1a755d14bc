use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A glucose sample kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Sgv,
    Mbg,
    Cal,
}

impl Default for EntryKind {
    fn default() -> Self {
        EntryKind::Sgv
    }
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Sgv => "sgv",
            EntryKind::Mbg => "mbg",
            EntryKind::Cal => "cal",
        }
    }
}

/// The CGM's directional classification of the current glucose change rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trend {
    #[serde(rename = "NONE")]
    None,
    DoubleUp,
    SingleUp,
    FortyFiveUp,
    Flat,
    FortyFiveDown,
    SingleDown,
    DoubleDown,
    NotComputable,
    RateOutOfRange,
}

impl Trend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trend::None => "NONE",
            Trend::DoubleUp => "DoubleUp",
            Trend::SingleUp => "SingleUp",
            Trend::FortyFiveUp => "FortyFiveUp",
            Trend::Flat => "Flat",
            Trend::FortyFiveDown => "FortyFiveDown",
            Trend::SingleDown => "SingleDown",
            Trend::DoubleDown => "DoubleDown",
            Trend::NotComputable => "NotComputable",
            Trend::RateOutOfRange => "RateOutOfRange",
        }
    }
}

/// A glucose sample held in memory and, eventually, in a shard file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    pub oid: String,
    #[serde(default)]
    pub kind: EntryKind,
    pub mgdl: i32,
    pub trend: Trend,
    pub device_id: u32,
    pub event_time: DateTime<Utc>,
    pub created_time: DateTime<Utc>,
}

/// A clinical event. The head participates in the time index; `fields`
/// carries insulin/carbs/notes/etc. verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Treatment {
    pub oid: String,
    pub event_time: DateTime<Utc>,
    pub kind: String,
    pub created_time: DateTime<Utc>,
    #[serde(default)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

/// The shared shape `TimeShardStore<R>` needs from a record type: a unique
/// id it can assign, and the timestamp the index orders by.
pub trait ShardRecord: Clone + Send + Sync + 'static {
    fn oid(&self) -> &str;
    fn set_oid(&mut self, oid: String);
    fn event_time(&self) -> DateTime<Utc>;
}

impl ShardRecord for Entry {
    fn oid(&self) -> &str {
        &self.oid
    }
    fn set_oid(&mut self, oid: String) {
        self.oid = oid;
    }
    fn event_time(&self) -> DateTime<Utc> {
        self.event_time
    }
}

impl ShardRecord for Treatment {
    fn oid(&self) -> &str {
        &self.oid
    }
    fn set_oid(&mut self, oid: String) {
        self.oid = oid;
    }
    fn event_time(&self) -> DateTime<Utc> {
        self.event_time
    }
}
