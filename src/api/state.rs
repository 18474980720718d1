//! API shared state

use std::sync::Arc;

use crate::actors::MaintenanceHandle;
use crate::ingest::IngestionService;
use crate::query::QueryService;

/// Shared state passed to all API handlers
#[derive(Clone)]
pub struct ApiState {
    pub ingest: Arc<IngestionService>,

    pub query: QueryService,

    /// Handle to the maintenance actor, if one is running
    pub maintenance: Option<MaintenanceHandle>,
}

impl ApiState {
    /// Create API state over one ingestion service
    ///
    /// The query service reads from the same store.
    pub fn new(ingest: Arc<IngestionService>, maintenance: Option<MaintenanceHandle>) -> Self {
        let query = QueryService::new(ingest.store().clone());
        Self {
            ingest,
            query,
            maintenance,
        }
    }
}
