use super::KeyValueStore;
use crate::monitor::{ActivityLog, ActivityRecord, CourseTarget, CourseWatch, MonitorError, MonitoringState};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

pub const MONITORING_STATE_KEY: &str = "monitoring_state";
pub const COURSES_KEY: &str = "courses";
pub const ACTIVITY_KEY: &str = "last_activity";

/// Typed access to the monitor's documents in a [`KeyValueStore`].
#[derive(Clone)]
pub struct StateRepository {
    store: Arc<dyn KeyValueStore>,
    activity_retention: usize,
}

impl StateRepository {
    pub fn new(store: Arc<dyn KeyValueStore>, activity_retention: usize) -> Self {
        Self {
            store,
            activity_retention,
        }
    }

    fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, MonitorError> {
        match self.store.get(key)? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    fn write<T: Serialize>(&self, key: &str, value: &T) -> Result<(), MonitorError> {
        self.store.set(key, &serde_json::to_value(value)?)
    }

    pub fn load_state(&self) -> Result<MonitoringState, MonitorError> {
        Ok(self.read(MONITORING_STATE_KEY)?.unwrap_or_default())
    }

    pub fn save_state(&self, state: &MonitoringState) -> Result<(), MonitorError> {
        self.write(MONITORING_STATE_KEY, state)
    }

    pub fn load_courses(&self) -> Result<Vec<CourseWatch>, MonitorError> {
        Ok(self.read(COURSES_KEY)?.unwrap_or_default())
    }

    pub fn save_courses(&self, courses: &[CourseWatch]) -> Result<(), MonitorError> {
        self.write(COURSES_KEY, &courses)
    }

    pub fn course(&self, full_course_id: &str) -> Result<Option<CourseWatch>, MonitorError> {
        Ok(self
            .load_courses()?
            .into_iter()
            .find(|c| c.full_course_id == full_course_id))
    }

    /// Replaces the stored watch with the same id, or appends it.
    pub fn upsert_course(&self, watch: &CourseWatch) -> Result<(), MonitorError> {
        let mut courses = self.load_courses()?;
        match courses
            .iter_mut()
            .find(|c| c.full_course_id == watch.full_course_id)
        {
            Some(existing) => *existing = watch.clone(),
            None => courses.push(watch.clone()),
        }
        self.save_courses(&courses)
    }

    /// Adds a new watch.
    ///
    /// # Returns
    /// * `Err(MonitorError::Duplicate)` - If the section is already watched
    pub fn add_course(&self, target: &CourseTarget) -> Result<CourseWatch, MonitorError> {
        let mut courses = self.load_courses()?;
        let full_id = target.full_id();
        if courses.iter().any(|c| c.full_course_id == full_id) {
            return Err(MonitorError::Duplicate { course: full_id });
        }

        let watch = CourseWatch::new(target);
        courses.push(watch.clone());
        self.save_courses(&courses)?;
        Ok(watch)
    }

    /// Removes a watch, and drops it from the monitored watch set so later cycles skip it.
    ///
    /// # Returns
    /// Whether the course was watched or monitored.
    pub fn remove_course(&self, full_course_id: &str) -> Result<bool, MonitorError> {
        let mut courses = self.load_courses()?;
        let before = courses.len();
        courses.retain(|c| c.full_course_id != full_course_id);
        let removed_watch = courses.len() != before;
        if removed_watch {
            self.save_courses(&courses)?;
        }

        let mut state = self.load_state()?;
        let before = state.watch_set.len();
        state.watch_set.retain(|t| t.full_id() != full_course_id);
        let removed_target = state.watch_set.len() != before;
        if removed_target {
            self.save_state(&state)?;
        }

        Ok(removed_watch || removed_target)
    }

    /// Makes sure every target has a stored watch, keeping the state of ones already present.
    ///
    /// # Returns
    /// The watches for `targets`, in the same order.
    pub fn sync_watch_set(&self, targets: &[CourseTarget]) -> Result<Vec<CourseWatch>, MonitorError> {
        let mut courses = self.load_courses()?;
        let mut changed = false;
        let mut watches = Vec::with_capacity(targets.len());

        for target in targets {
            let full_id = target.full_id();
            match courses.iter().find(|c| c.full_course_id == full_id) {
                Some(existing) => watches.push(existing.clone()),
                None => {
                    let watch = CourseWatch::new(target);
                    courses.push(watch.clone());
                    watches.push(watch);
                    changed = true;
                }
            }
        }

        if changed {
            self.save_courses(&courses)?;
        }
        Ok(watches)
    }

    pub fn load_activity(&self) -> Result<ActivityLog, MonitorError> {
        let records: Vec<ActivityRecord> = self.read(ACTIVITY_KEY)?.unwrap_or_default();
        Ok(ActivityLog::from_records(records, self.activity_retention))
    }

    /// Prepends a record, dropping the oldest beyond the retention bound.
    pub fn append_activity(&self, record: ActivityRecord) -> Result<ActivityLog, MonitorError> {
        let mut log = self.load_activity()?;
        log.push(record);
        self.write(ACTIVITY_KEY, &log.to_vec())?;
        Ok(log)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::monitor::{CourseStatus, SeatCount};
    use chrono::Utc;

    fn repository() -> StateRepository {
        StateRepository::new(Arc::new(MemoryStore::default()), 50)
    }

    #[test]
    fn test_defaults_when_empty() {
        let repo = repository();
        assert_eq!(repo.load_state().unwrap(), MonitoringState::default());
        assert!(repo.load_courses().unwrap().is_empty());
        assert_eq!(repo.load_activity().unwrap().len(), 0);
    }

    #[test]
    fn test_add_and_remove_courses() {
        let repo = repository();
        let target = CourseTarget::new("ACT201", "1");

        let watch = repo.add_course(&target).unwrap();
        assert_eq!(watch.status, CourseStatus::Checking);
        assert!(matches!(
            repo.add_course(&target),
            Err(MonitorError::Duplicate { .. })
        ));

        assert!(repo.remove_course("ACT201.1").unwrap());
        assert!(!repo.remove_course("ACT201.1").unwrap());
        assert!(repo.load_courses().unwrap().is_empty());
    }

    #[test]
    fn test_remove_course_leaves_watch_set() {
        let repo = repository();
        let act = CourseTarget::new("ACT201", "1");
        let eee = CourseTarget::new("EEE111", "2");
        repo.sync_watch_set(&[act.clone(), eee.clone()]).unwrap();
        repo.save_state(&MonitoringState {
            enabled: true,
            interval_seconds: 60,
            portal_url: "https://portal.example.edu/offered".to_string(),
            watch_set: vec![act, eee.clone()],
        })
        .unwrap();

        assert!(repo.remove_course("ACT201.1").unwrap());

        let state = repo.load_state().unwrap();
        assert!(state.enabled);
        assert_eq!(state.watch_set, vec![eee]);
        assert!(repo.course("ACT201.1").unwrap().is_none());
    }

    #[test]
    fn test_sync_keeps_known_state() {
        let repo = repository();
        let act = CourseTarget::new("ACT201", "1");
        let mut known = CourseWatch::new(&act);
        known.status = CourseStatus::Full;
        known.enrolled = Some(40);
        known.capacity = Some(40);
        repo.upsert_course(&known).unwrap();

        let eee = CourseTarget::new("EEE111", "2");
        let watches = repo.sync_watch_set(&[eee, act]).unwrap();

        assert_eq!(watches[0].full_course_id, "EEE111.2");
        assert_eq!(watches[0].status, CourseStatus::Checking);
        assert_eq!(watches[1].status, CourseStatus::Full);
        assert_eq!(repo.load_courses().unwrap().len(), 2);
    }

    #[test]
    fn test_activity_retention() {
        let repo = repository();
        for i in 0..60u32 {
            repo.append_activity(ActivityRecord {
                timestamp: Utc::now(),
                course_id: "ACT201.1".to_string(),
                status: CourseStatus::Full,
                available: SeatCount::Known(0),
                enrolled: Some(i),
                capacity: Some(60),
                message: format!("check {i}"),
            })
            .unwrap();
        }

        let log = repo.load_activity().unwrap();
        assert_eq!(log.len(), 50);
        let messages: Vec<_> = log.iter().map(|r| r.message.as_str()).collect();
        assert_eq!(messages[0], "check 59");
        assert_eq!(messages[49], "check 10");
    }
}
