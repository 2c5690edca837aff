//! Application state.

use std::sync::Arc;

use shortsync_queue::PriorityScheduler;
use shortsync_worker::RecoveryReport;

use crate::config::ApiConfig;
use crate::system::HostMonitor;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub scheduler: Arc<PriorityScheduler>,
    /// Outcome of the startup recovery pass
    pub recovery: Arc<RecoveryReport>,
    pub host: Arc<HostMonitor>,
}

impl AppState {
    pub fn new(
        config: ApiConfig,
        scheduler: Arc<PriorityScheduler>,
        recovery: RecoveryReport,
    ) -> Self {
        Self {
            config,
            scheduler,
            recovery: Arc::new(recovery),
            host: Arc::new(HostMonitor::new()),
        }
    }
}
