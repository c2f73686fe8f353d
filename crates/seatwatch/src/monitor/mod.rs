//! Seat monitoring for registration portals.
//!
//! A check cycle asks [`portal`] for the page's extraction hints, tries a
//! direct [`matcher`] pass, falls back to a [`search`] through the page, and
//! hands the reading to [`reconcile`], which persists it and raises
//! notifications. [`scheduler`] owns the cadence and keeps cycles from
//! overlapping.

pub mod error;
pub mod events;
pub mod matcher;
pub mod notify;
pub mod portal;
pub mod reconcile;
pub mod scheduler;
pub mod search;
pub mod types;

pub use error::MonitorError;
pub use events::{CourseInput, EventBus, UiCommand, UiEvent};
pub use notify::{BusNotifier, LogNotifier, NotificationSink, Notifiers, WebhookNotifier};
pub use portal::{PortalProfile, ProfileOverride, ProfileResolver};
pub use reconcile::StatusReconciler;
pub use scheduler::MonitoringScheduler;
pub use search::{ProgressiveSearch, SearchConfig};
pub use types::{
    ActivityLog, ActivityRecord, CourseStatus, CourseTarget, CourseWatch, EnrollmentReading,
    MonitoringState, SeatCount,
};
