//! Shared application state.

use std::sync::Arc;

use sm_store::Store;

use crate::config::ServerConfig;
use crate::delivery::StreamRegistry;
use crate::directory::KeyDirectory;

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub directory: KeyDirectory,
    pub streams: StreamRegistry,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(store: Store, config: ServerConfig) -> Self {
        Self {
            store,
            directory: KeyDirectory::new(),
            streams: StreamRegistry::new(),
            config: Arc::new(config),
        }
    }
}
