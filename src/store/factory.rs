use std::sync::Arc;
use tokio_util::task::TaskTracker;

use crate::store::codec::ShardCodec;
use crate::store::devices::DeviceRegistry;
use crate::store::model::{Entry, Treatment};
use crate::store::object::ObjectStoreGateway;
use crate::store::shard::{ShardSerde, TimeShardStore};

pub type EntryStore = TimeShardStore<Entry>;
pub type TreatmentStore = TimeShardStore<Treatment>;

struct EntrySerde {
    devices: Arc<DeviceRegistry>,
}

impl ShardSerde<Entry> for EntrySerde {
    fn encode(&self, records: &[Entry]) -> Vec<u8> {
        ShardCodec::encode_entries(records, &self.devices)
    }
    fn decode(&self, bytes: &[u8]) -> Vec<Entry> {
        ShardCodec::decode_entries(bytes, &self.devices)
    }
}

struct TreatmentSerde;

impl ShardSerde<Treatment> for TreatmentSerde {
    fn encode(&self, records: &[Treatment]) -> Vec<u8> {
        ShardCodec::encode_treatments(records)
    }
    fn decode(&self, bytes: &[u8]) -> Vec<Treatment> {
        ShardCodec::decode_treatments(bytes)
    }
}

pub fn new_entry_store(
    devices: Arc<DeviceRegistry>,
    object_store: Arc<dyn ObjectStoreGateway>,
    tracker: TaskTracker,
) -> Arc<EntryStore> {
    TimeShardStore::new("ns", "", Arc::new(EntrySerde { devices }), object_store, tracker)
}

pub fn new_treatment_store(
    object_store: Arc<dyn ObjectStoreGateway>,
    tracker: TaskTracker,
) -> Arc<TreatmentStore> {
    TimeShardStore::new("ns", "-treatments", Arc::new(TreatmentSerde), object_store, tracker)
}
