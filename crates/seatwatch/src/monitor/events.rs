//! Commands from, and events to, the presentation layer.

use super::types::{ActivityRecord, CourseStatus, CourseTarget, CourseWatch, SeatCount};
use super::MonitorError;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

/// A course as sent by a client: either `"ACT201.1"` or `{ "code", "section" }`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum CourseInput {
    Id(String),
    Target(CourseTarget),
}

impl CourseInput {
    pub fn to_target(&self) -> Result<CourseTarget, MonitorError> {
        match self {
            CourseInput::Id(id) => CourseTarget::parse(id),
            CourseInput::Target(target) => {
                let target = CourseTarget::new(&target.code, &target.section);
                target.validate()?;
                Ok(target)
            }
        }
    }
}

/// Parses every course in a command, failing on the first malformed one.
pub fn parse_courses(courses: &[CourseInput]) -> Result<Vec<CourseTarget>, MonitorError> {
    courses.iter().map(CourseInput::to_target).collect()
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum UiCommand {
    #[serde(rename_all = "camelCase")]
    StartMonitoring {
        courses: Vec<CourseInput>,
        /// Seconds between cycles.
        interval: u64,
        portal_url: String,
    },
    StopMonitoring,
    #[serde(rename_all = "camelCase")]
    CheckNow {
        courses: Vec<CourseInput>,
        portal_url: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum UiEvent {
    #[serde(rename_all = "camelCase")]
    CourseStatusUpdate {
        course_id: String,
        status: CourseStatus,
        available: SeatCount,
        enrolled: Option<u32>,
        capacity: Option<u32>,
        error_message: Option<String>,
    },
    ActivityUpdate {
        activity: ActivityRecord,
    },
    #[serde(rename_all = "camelCase")]
    CycleComplete {
        cycle_id: String,
        checked: usize,
        available: usize,
        errors: usize,
    },
    Notification {
        title: String,
        message: String,
        priority: u8,
    },
}

impl UiEvent {
    pub fn status_update(watch: &CourseWatch) -> Self {
        UiEvent::CourseStatusUpdate {
            course_id: watch.full_course_id.clone(),
            status: watch.status,
            available: watch.available,
            enrolled: watch.enrolled,
            capacity: watch.capacity,
            error_message: watch.error_message.clone(),
        }
    }

    /// Event name used on the SSE stream.
    pub fn name(&self) -> &'static str {
        match self {
            UiEvent::CourseStatusUpdate { .. } => "courseStatusUpdate",
            UiEvent::ActivityUpdate { .. } => "activityUpdate",
            UiEvent::CycleComplete { .. } => "cycleComplete",
            UiEvent::Notification { .. } => "notification",
        }
    }
}

/// Fan-out channel for [`UiEvent`]s. Events sent with no listener are dropped.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<UiEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn publish(&self, event: UiEvent) {
        let name = event.name();
        if self.sender.send(event).is_err() {
            debug!(event = name, "No UI listeners, event dropped");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
