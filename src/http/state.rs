use crate::analytics::AnalyticsService;
use crate::storage::StorageInstance;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct HttpServerState {
    pub name: Arc<String>,
    pub storage: Arc<dyn StorageInstance>,
    pub analytics: Arc<AnalyticsService>,
}

impl HttpServerState {
    pub fn new(name: &str, storage: Arc<dyn StorageInstance>, timeout: Duration) -> Self {
        Self {
            name: Arc::new(name.to_string()),
            analytics: Arc::new(AnalyticsService::new(storage.clone(), timeout)),
            storage,
        }
    }
}
