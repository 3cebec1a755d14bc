pub mod codec;
pub mod devices;
pub mod factory;
pub mod model;
pub mod object;
pub mod oid;
pub mod shard;

pub use devices::DeviceRegistry;
pub use factory::{new_entry_store, new_treatment_store, EntryStore, TreatmentStore};
pub use model::{Entry, EntryKind, Treatment, Trend};
pub use object::ObjectStoreGateway;
pub use shard::TimeShardStore;
