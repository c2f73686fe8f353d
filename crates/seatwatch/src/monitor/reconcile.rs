//! Folding a reading into a course's stored status.

use super::events::{EventBus, UiEvent};
use super::notify::{Notification, NotificationSink};
use super::types::{
    ActivityRecord, CourseStatus, CourseTarget, CourseWatch, EnrollmentReading, SeatCount,
};
use super::MonitorError;
use crate::db::StateRepository;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};

const NOTIFICATION_PRIORITY: u8 = 2;

/// Everything one reading changes.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub new_state: CourseWatch,
    pub activity: ActivityRecord,
    pub notify: Option<Notification>,
}

fn count(value: Option<u32>) -> String {
    value.map_or_else(|| "?".to_string(), |n| n.to_string())
}

/// Decides the new state of a watch from a reading.
///
/// A notification is only raised when the course moves into `Available`
/// with a known positive seat count; staying `Available` never re-notifies,
/// and an `Unknown` count never notifies.
pub fn reconcile(
    previous: &CourseWatch,
    reading: &EnrollmentReading,
    now: DateTime<Utc>,
) -> Reconciliation {
    let mut next = previous.clone();
    next.last_checked = Some(now);

    let message = if !reading.found {
        let message = reading
            .message
            .clone()
            .unwrap_or_else(|| "Could not find course".to_string());
        next.status = CourseStatus::Error;
        next.available = SeatCount::Known(0);
        next.enrolled = None;
        next.capacity = None;
        next.error_message = Some(message.clone());
        message
    } else if let Some(open) = reading.open {
        next.status = if open {
            CourseStatus::Available
        } else {
            CourseStatus::Full
        };
        next.available = SeatCount::Unknown;
        next.enrolled = reading.enrolled;
        next.capacity = reading.capacity;
        next.error_message = None;
        format!("{} (seat count unknown)", if open { "Open" } else { "Full" })
    } else {
        next.available = reading.available;
        next.enrolled = reading.enrolled;
        next.capacity = reading.capacity;
        next.error_message = None;
        if reading.available.is_positive() {
            next.status = CourseStatus::Available;
            format!("{} seat(s) available", reading.available)
        } else {
            next.status = CourseStatus::Full;
            format!("Full ({}/{})", count(reading.enrolled), count(reading.capacity))
        }
    };

    let notify = (next.status == CourseStatus::Available
        && next.available.is_positive()
        && previous.status != CourseStatus::Available)
        .then(|| Notification {
            title: format!("Course Available: {}", next.full_course_id),
            message: format!("{} seat(s) available!", next.available),
            priority: NOTIFICATION_PRIORITY,
        });

    let activity = ActivityRecord {
        timestamp: now,
        course_id: next.full_course_id.clone(),
        status: next.status,
        available: next.available,
        enrolled: next.enrolled,
        capacity: next.capacity,
        message,
    };

    Reconciliation {
        new_state: next,
        activity,
        notify,
    }
}

/// Applies readings: persists the new state, logs activity, tells the UI and notifies.
#[derive(Clone)]
pub struct StatusReconciler {
    repository: StateRepository,
    bus: EventBus,
    notifier: Arc<dyn NotificationSink>,
}

impl StatusReconciler {
    pub fn new(repository: StateRepository, bus: EventBus, notifier: Arc<dyn NotificationSink>) -> Self {
        Self {
            repository,
            bus,
            notifier,
        }
    }

    /// Applies a reading to the stored watch for `target`.
    ///
    /// # Returns
    /// * `Ok(Some(Reconciliation))` - The watch was updated
    /// * `Ok(None)` - The course is no longer watched, nothing was written
    pub fn apply(
        &self,
        target: &CourseTarget,
        reading: &EnrollmentReading,
    ) -> Result<Option<Reconciliation>, MonitorError> {
        let course = target.full_id();
        let Some(previous) = self.repository.course(&course)? else {
            debug!(course = %course, "Course removed while being checked, dropping reading");
            return Ok(None);
        };

        let outcome = reconcile(&previous, reading, Utc::now());

        self.repository.upsert_course(&outcome.new_state)?;
        self.repository.append_activity(outcome.activity.clone())?;

        self.bus.publish(UiEvent::status_update(&outcome.new_state));
        self.bus.publish(UiEvent::ActivityUpdate {
            activity: outcome.activity.clone(),
        });

        if let Some(notification) = &outcome.notify {
            self.notifier.notify(notification);
        }

        info!(
            course = %course,
            from = %previous.status,
            to = %outcome.new_state.status,
            available = %outcome.new_state.available,
            method = %reading.method,
            "{}",
            outcome.activity.message
        );

        Ok(Some(outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::monitor::notify::tests::RecordingSink;

    fn target() -> CourseTarget {
        CourseTarget::new("ACT201", "1")
    }

    fn reconciler(sink: Arc<RecordingSink>) -> (StatusReconciler, StateRepository) {
        let repository = StateRepository::new(Arc::new(MemoryStore::default()), 50);
        repository.add_course(&target()).unwrap();
        let reconciler = StatusReconciler::new(repository.clone(), EventBus::default(), sink);
        (reconciler, repository)
    }

    #[test]
    fn test_numeric_status_follows_available() {
        let previous = CourseWatch::new(&target());
        for (a, b) in [(40, 40), (35, 40), (40, 35), (0, 0), (12, 30)] {
            let reading = EnrollmentReading::from_pair(a, b, "test", "");
            let outcome = reconcile(&previous, &reading, Utc::now());
            let state = outcome.new_state;

            let (enrolled, capacity) = (state.enrolled.unwrap(), state.capacity.unwrap());
            assert_eq!(state.available, SeatCount::Known(capacity.saturating_sub(enrolled)));
            assert_eq!(
                state.status == CourseStatus::Available,
                state.available.is_positive()
            );
        }
    }

    #[test]
    fn test_not_found_becomes_error() {
        let mut previous = CourseWatch::new(&target());
        previous.status = CourseStatus::Available;
        previous.available = SeatCount::Known(3);

        let reading = EnrollmentReading::not_found("Course ACT201.1 not found on page");
        let outcome = reconcile(&previous, &reading, Utc::now());

        assert_eq!(outcome.new_state.status, CourseStatus::Error);
        assert_eq!(outcome.new_state.available, SeatCount::Known(0));
        assert_eq!(
            outcome.new_state.error_message.as_deref(),
            Some("Course ACT201.1 not found on page")
        );
        assert_eq!(outcome.activity.message, "Course ACT201.1 not found on page");
        assert!(outcome.notify.is_none());
    }

    #[test]
    fn test_keyword_reading_is_unknown_and_silent() {
        let previous = CourseWatch::new(&target());
        let reading = EnrollmentReading::from_keyword(true, "keyword_fallback", "ACT201.1 open");
        let outcome = reconcile(&previous, &reading, Utc::now());

        assert_eq!(outcome.new_state.status, CourseStatus::Available);
        assert_eq!(outcome.new_state.available, SeatCount::Unknown);
        assert!(outcome.notify.is_none());
    }

    #[test]
    fn test_notifies_once_per_transition_into_available() {
        let sink = Arc::new(RecordingSink::default());
        let (reconciler, repository) = reconciler(sink.clone());

        // Full, Full, Available, Available, Full, Available
        let pairs = [(40, 40), (40, 40), (35, 40), (36, 40), (40, 40), (39, 40)];
        let notified: Vec<usize> = pairs
            .iter()
            .enumerate()
            .filter_map(|(i, &(a, b))| {
                let reading = EnrollmentReading::from_pair(a, b, "test", "");
                let outcome = reconciler.apply(&target(), &reading).unwrap().unwrap();
                outcome.notify.map(|_| i)
            })
            .collect();

        assert_eq!(notified, vec![2, 5]);
        assert_eq!(sink.messages(), vec!["5 seat(s) available!", "1 seat(s) available!"]);
        assert_eq!(repository.load_activity().unwrap().len(), 6);
    }

    #[test]
    fn test_repeated_available_reading() {
        let sink = Arc::new(RecordingSink::default());
        let (reconciler, repository) = reconciler(sink.clone());
        let mut watch = CourseWatch::new(&target());
        watch.status = CourseStatus::Available;
        watch.available = SeatCount::Known(5);
        repository.upsert_course(&watch).unwrap();

        let reading = EnrollmentReading::from_pair(35, 40, "test", "35(40)");
        reconciler.apply(&target(), &reading).unwrap();
        reconciler.apply(&target(), &reading).unwrap();

        assert!(sink.messages().is_empty());
        assert_eq!(repository.load_activity().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_apply_publishes_events() {
        let sink = Arc::new(RecordingSink::default());
        let repository = StateRepository::new(Arc::new(MemoryStore::default()), 50);
        repository.add_course(&target()).unwrap();
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let reconciler = StatusReconciler::new(repository.clone(), bus, sink);

        let reading = EnrollmentReading::from_pair(40, 40, "test", "40(40)");
        reconciler.apply(&target(), &reading).unwrap();

        assert_eq!(rx.recv().await.unwrap().name(), "courseStatusUpdate");
        match rx.recv().await.unwrap() {
            UiEvent::ActivityUpdate { activity } => {
                assert_eq!(activity.message, "Full (40/40)");
            }
            other => panic!("unexpected event {other:?}"),
        }
        let stored = repository.course("ACT201.1").unwrap().unwrap();
        assert_eq!(stored.status, CourseStatus::Full);
        assert!(stored.last_checked.is_some());
    }

    #[test]
    fn test_removed_course_is_not_recreated() {
        let sink = Arc::new(RecordingSink::default());
        let (reconciler, repository) = reconciler(sink.clone());
        assert!(repository.remove_course("ACT201.1").unwrap());

        let reading = EnrollmentReading::from_pair(35, 40, "test", "35(40)");
        assert!(reconciler.apply(&target(), &reading).unwrap().is_none());

        assert!(repository.course("ACT201.1").unwrap().is_none());
        assert_eq!(repository.load_activity().unwrap().len(), 0);
        assert!(sink.messages().is_empty());
    }
}
