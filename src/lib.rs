pub mod auth;
pub mod config;
pub mod error;
pub mod http;
pub mod ingest;
pub mod query;
pub mod realtime;
pub mod store;
pub mod vendor;

use std::sync::Arc;

use auth::AuthorityTable;
use config::Config;
use query::QueryFacade;
use realtime::RealtimeHub;
use store::DeviceRegistry;

#[derive(Clone)]
pub struct AppState {
    pub query: Arc<QueryFacade>,
    pub devices: Arc<DeviceRegistry>,
    pub realtime: Arc<RealtimeHub>,
    pub auth: Arc<AuthorityTable>,
    pub config: Arc<Config>,
}
