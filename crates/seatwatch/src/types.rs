use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::db::StateRepository;
use crate::monitor::{EventBus, MonitoringScheduler, ProfileResolver};
use crate::page::{PageFetcher, SessionSettings};

/// State shared by every request handler.
pub struct AppState {
    pub scheduler: MonitoringScheduler,
    pub repository: StateRepository,
    pub bus: EventBus,
    /// Ad-hoc page reads open their own session; the pooled ones belong to the scheduler.
    pub fetcher: Arc<dyn PageFetcher>,
    pub session_settings: SessionSettings,
    pub resolver: ProfileResolver,
    pub started_at: DateTime<Utc>,
}
