//! Periodic check cycles over the watch set.

use super::events::{EventBus, UiEvent};
use super::matcher::{match_page, MatchScope};
use super::portal::{PortalProfile, ProfileResolver};
use super::reconcile::StatusReconciler;
use super::search::ProgressiveSearch;
use super::types::{CourseStatus, CourseTarget, EnrollmentReading, MonitoringState};
use super::MonitorError;
use crate::db::StateRepository;
use crate::page::{evaluate, PageSession, PageSessionProvider};
use rand::Rng;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tracing::{error, info, warn};
use url::Url;

/// Counts from one finished cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleSummary {
    pub cycle_id: String,
    pub checked: usize,
    pub available: usize,
    pub errors: usize,
}

struct SchedulerInner {
    sessions: Arc<dyn PageSessionProvider>,
    resolver: ProfileResolver,
    search: ProgressiveSearch,
    reconciler: StatusReconciler,
    repository: StateRepository,
    bus: EventBus,
    inter_course_delay: Duration,
    /// Set while a cycle runs; never persisted.
    in_flight: AtomicBool,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

/// Clears the in-flight flag when the cycle ends, however it ends.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Owns the periodic trigger and runs check cycles one at a time.
#[derive(Clone)]
pub struct MonitoringScheduler {
    inner: Arc<SchedulerInner>,
}

impl MonitoringScheduler {
    pub fn new(
        sessions: Arc<dyn PageSessionProvider>,
        resolver: ProfileResolver,
        search: ProgressiveSearch,
        reconciler: StatusReconciler,
        repository: StateRepository,
        bus: EventBus,
        inter_course_delay: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                sessions,
                resolver,
                search,
                reconciler,
                repository,
                bus,
                inter_course_delay,
                in_flight: AtomicBool::new(false),
                ticker: Mutex::new(None),
            }),
        }
    }

    fn ticker(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.inner
            .ticker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts periodic monitoring, replacing any running trigger.
    ///
    /// The first cycle runs immediately, then one every `interval_seconds`.
    ///
    /// # Arguments
    /// * `watch_set` - Courses to check each cycle
    /// * `interval_seconds` - Time between cycles, at least one second
    /// * `portal_url` - The registration page to read
    pub fn start(
        &self,
        watch_set: Vec<CourseTarget>,
        interval_seconds: u64,
        portal_url: &str,
    ) -> Result<(), MonitorError> {
        let portal_url = Url::parse(portal_url.trim())?.to_string();
        let state = MonitoringState {
            enabled: true,
            interval_seconds: interval_seconds.max(1),
            portal_url,
            watch_set,
        };

        self.inner.repository.sync_watch_set(&state.watch_set)?;
        self.inner.repository.save_state(&state)?;
        self.arm(state.interval_seconds);

        info!(
            courses = state.watch_set.len(),
            interval_seconds = state.interval_seconds,
            portal_url = %state.portal_url,
            "Monitoring started"
        );
        Ok(())
    }

    /// Cancels the periodic trigger. A cycle already running is left to finish.
    pub fn stop(&self) -> Result<(), MonitorError> {
        if let Some(handle) = self.ticker().take() {
            handle.abort();
        }

        let mut state = self.inner.repository.load_state()?;
        state.enabled = false;
        self.inner.repository.save_state(&state)?;

        info!("Monitoring stopped");
        Ok(())
    }

    /// Re-arms the trigger from persisted state, e.g. after a restart.
    ///
    /// # Returns
    /// Whether monitoring was resumed.
    pub fn resume(&self) -> Result<bool, MonitorError> {
        let state = self.inner.repository.load_state()?;
        if !state.enabled || state.portal_url.is_empty() {
            return Ok(false);
        }

        self.inner.repository.sync_watch_set(&state.watch_set)?;
        info!(
            courses = state.watch_set.len(),
            interval_seconds = state.interval_seconds,
            "Resuming monitoring"
        );
        self.arm(state.interval_seconds);
        Ok(true)
    }

    /// Runs one cycle in the background without touching the schedule.
    ///
    /// # Returns
    /// * `Err(MonitorError::CycleInFlight)` - A cycle is already running, so none was started
    pub fn check_now(
        &self,
        watch_set: Vec<CourseTarget>,
        portal_url: &str,
    ) -> Result<(), MonitorError> {
        let portal_url = Url::parse(portal_url.trim())?.to_string();
        if self.is_cycle_in_flight() {
            return Err(MonitorError::CycleInFlight);
        }
        self.inner.repository.sync_watch_set(&watch_set)?;

        let scheduler = self.clone();
        tokio::spawn(async move {
            scheduler.run_cycle(&watch_set, &portal_url).await;
        });
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.ticker()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn is_cycle_in_flight(&self) -> bool {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    fn arm(&self, interval_seconds: u64) {
        let scheduler = self.clone();
        let period = Duration::from_secs(interval_seconds.max(1));

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let scheduler = scheduler.clone();
                tokio::spawn(async move {
                    scheduler.scheduled_cycle().await;
                });
            }
        });

        if let Some(previous) = self.ticker().replace(handle) {
            previous.abort();
        }
    }

    /// A trigger from the ticker: reads the persisted state and runs a cycle if still enabled.
    async fn scheduled_cycle(&self) {
        let state = match self.inner.repository.load_state() {
            Ok(state) => state,
            Err(e) => {
                error!(error = %e, "Could not read monitoring state");
                return;
            }
        };
        if !state.enabled {
            return;
        }
        self.run_cycle(&state.watch_set, &state.portal_url).await;
    }

    /// Checks every course in turn and reconciles the results.
    ///
    /// # Returns
    /// * `Some(CycleSummary)` - The cycle ran
    /// * `None` - Another cycle was already in flight, so this trigger was skipped
    pub async fn run_cycle(
        &self,
        watch_set: &[CourseTarget],
        portal_url: &str,
    ) -> Option<CycleSummary> {
        let inner = &self.inner;
        if inner
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!(portal_url = %portal_url, "Check cycle already in flight, skipping trigger");
            return None;
        }
        let _in_flight = InFlight(&inner.in_flight);

        let cycle_id = generate_cycle_id();
        let start = Instant::now();
        info!(
            cycle_id = %cycle_id,
            courses = watch_set.len(),
            portal_url = %portal_url,
            "Starting check cycle"
        );

        let profile = inner.resolver.resolve(portal_url);
        let session = inner.sessions.open(portal_url).await;

        let mut summary = CycleSummary {
            cycle_id: cycle_id.clone(),
            checked: 0,
            available: 0,
            errors: 0,
        };

        for (index, target) in watch_set.iter().enumerate() {
            if index > 0 {
                sleep(inner.inter_course_delay).await;
            }

            match inner.repository.course(&target.full_id()) {
                Ok(Some(_)) => {}
                Ok(None) => {
                    info!(
                        cycle_id = %cycle_id,
                        course = %target,
                        "Course no longer watched, skipping"
                    );
                    continue;
                }
                Err(e) => {
                    summary.errors += 1;
                    error!(
                        cycle_id = %cycle_id,
                        course = %target,
                        error = %e,
                        "Could not read course watch"
                    );
                    continue;
                }
            }

            let reading = match &session {
                Ok(session) => self.check_course(session.as_ref(), target, &profile).await,
                Err(e) => EnrollmentReading::not_found(e.to_string()),
            };

            match inner.reconciler.apply(target, &reading) {
                Ok(Some(outcome)) => {
                    summary.checked += 1;
                    match outcome.new_state.status {
                        CourseStatus::Available => summary.available += 1,
                        CourseStatus::Error => summary.errors += 1,
                        _ => {}
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    summary.checked += 1;
                    summary.errors += 1;
                    error!(
                        cycle_id = %cycle_id,
                        course = %target,
                        error = %e,
                        "Could not record course status"
                    );
                }
            }
        }

        info!(
            cycle_id = %cycle_id,
            checked = summary.checked,
            available = summary.available,
            errors = summary.errors,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Check cycle complete"
        );
        inner.bus.publish(UiEvent::CycleComplete {
            cycle_id,
            checked: summary.checked,
            available: summary.available,
            errors: summary.errors,
        });

        Some(summary)
    }

    /// Reloads the page and reads one course, searching further if a direct match fails.
    async fn check_course(
        &self,
        session: &dyn PageSession,
        target: &CourseTarget,
        profile: &PortalProfile,
    ) -> EnrollmentReading {
        let communication_failure = |e: MonitorError| {
            warn!(course = %target, error = %e, "Portal page unavailable");
            EnrollmentReading::not_found(e.to_string())
        };

        if let Err(e) = session.reload().await {
            return communication_failure(e);
        }

        match evaluate(session, |dom, _| {
            match_page(dom, target, profile, MatchScope::Document)
        }) {
            Ok(reading) if reading.found => return reading,
            Ok(_) => {}
            Err(e) => return communication_failure(e),
        }

        let outcome = self.inner.search.search(session, target, profile).await;
        if let Some(e) = outcome.failure(target) {
            warn!(course = %target, error = %e, "Course check failed");
        }
        outcome.reading
    }
}

fn generate_cycle_id() -> String {
    let random: u32 = rand::thread_rng().gen();
    format!("{:08x}", random)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::monitor::notify::tests::RecordingSink;
    use crate::monitor::SeatCount;
    use crate::page::{MapFetcher, SessionPool, SessionSettings};

    const URL: &str = "https://rds2.northsouth.edu/index.php/common/showofferedcourses";

    struct Harness {
        scheduler: MonitoringScheduler,
        repository: StateRepository,
        fetcher: Arc<MapFetcher>,
        sink: Arc<RecordingSink>,
        bus: EventBus,
    }

    fn harness(page: &str) -> Harness {
        let fetcher = Arc::new(MapFetcher::with_page(URL, page));
        let repository = StateRepository::new(Arc::new(MemoryStore::default()), 50);
        let sink = Arc::new(RecordingSink::default());
        let bus = EventBus::default();
        let reconciler = StatusReconciler::new(repository.clone(), bus.clone(), sink.clone());
        let scheduler = MonitoringScheduler::new(
            Arc::new(SessionPool::new(fetcher.clone(), SessionSettings::default())),
            ProfileResolver::default(),
            ProgressiveSearch::default(),
            reconciler,
            repository.clone(),
            bus.clone(),
            Duration::from_secs(1),
        );

        Harness {
            scheduler,
            repository,
            fetcher,
            sink,
            bus,
        }
    }

    fn courses(ids: &[&str]) -> Vec<CourseTarget> {
        ids.iter().map(|id| CourseTarget::parse(id).unwrap()).collect()
    }

    impl Harness {
        /// Targets for `ids`, stored as watched courses.
        fn watch(&self, ids: &[&str]) -> Vec<CourseTarget> {
            let targets = courses(ids);
            self.repository.sync_watch_set(&targets).unwrap();
            targets
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_seat_opening_end_to_end() {
        let h = harness("<pre>ACT201.1   40(40)\nEEE111.2   34(35)</pre>");
        let watch = h.watch(&["ACT201.1"]);

        h.scheduler.run_cycle(&watch, URL).await.unwrap();
        let stored = h.repository.course("ACT201.1").unwrap().unwrap();
        assert_eq!(stored.status, CourseStatus::Full);
        assert_eq!(stored.enrolled, Some(40));
        assert_eq!(stored.capacity, Some(40));
        assert_eq!(stored.available, SeatCount::Known(0));
        assert!(h.sink.messages().is_empty());

        h.fetcher.set_page(URL, "<pre>ACT201.1   35(40)</pre>");
        let summary = h.scheduler.run_cycle(&watch, URL).await.unwrap();

        let stored = h.repository.course("ACT201.1").unwrap().unwrap();
        assert_eq!(stored.status, CourseStatus::Available);
        assert_eq!(stored.available, SeatCount::Known(5));
        assert_eq!(summary.available, 1);
        assert_eq!(h.sink.messages(), vec!["5 seat(s) available!"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_course_does_not_abort_cycle() {
        let h = harness("<pre>ACT201.1   40(40)\nEEE111.2   34(35)</pre>");
        let mut rx = h.bus.subscribe();

        let summary = h
            .scheduler
            .run_cycle(&h.watch(&["MAT999.9", "EEE111.2"]), URL)
            .await
            .unwrap();

        assert_eq!(summary.checked, 2);
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.available, 1);

        let missing = h.repository.course("MAT999.9").unwrap().unwrap();
        assert_eq!(missing.status, CourseStatus::Error);
        assert!(missing
            .error_message
            .unwrap()
            .starts_with("Course MAT999.9 not found after comprehensive search"));

        let mut last = None;
        while let Ok(event) = rx.try_recv() {
            last = Some(event);
        }
        assert!(matches!(
            last,
            Some(UiEvent::CycleComplete { checked: 2, errors: 1, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_portal_degrades_each_course() {
        let h = harness("<pre>ACT201.1 40(40)</pre>");
        let summary = h
            .scheduler
            .run_cycle(&h.watch(&["ACT201.1", "EEE111.2"]), "https://portal.example.edu/down")
            .await
            .unwrap();

        assert_eq!(summary.errors, 2);
        let watch = h.repository.course("EEE111.2").unwrap().unwrap();
        assert!(watch
            .error_message
            .unwrap()
            .starts_with("Could not communicate with portal page"));
        assert_eq!(h.repository.load_activity().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_trigger_is_skipped() {
        let h = harness("<pre>ACT201.1 40(40)\nEEE111.2 34(35)</pre>");
        let watch = h.watch(&["ACT201.1", "EEE111.2"]);

        let first = {
            let scheduler = h.scheduler.clone();
            let watch = watch.clone();
            tokio::spawn(async move { scheduler.run_cycle(&watch, URL).await })
        };
        tokio::task::yield_now().await;

        assert!(h.scheduler.is_cycle_in_flight());
        assert!(h.scheduler.run_cycle(&watch, URL).await.is_none());

        assert!(first.await.unwrap().is_some());
        assert!(!h.scheduler.is_cycle_in_flight());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_runs_immediately_then_on_interval() {
        let h = harness("<pre>ACT201.1 40(40)</pre>");

        h.scheduler.start(courses(&["ACT201.1"]), 60, URL).unwrap();
        sleep(Duration::from_secs(5)).await;

        assert!(h.scheduler.is_running());
        assert_eq!(h.fetcher.requests.load(Ordering::SeqCst), 1);
        let state = h.repository.load_state().unwrap();
        assert!(state.enabled);
        assert_eq!(state.interval_seconds, 60);

        sleep(Duration::from_secs(60)).await;
        assert_eq!(h.fetcher.requests.load(Ordering::SeqCst), 2);

        h.scheduler.stop().unwrap();
        sleep(Duration::from_secs(180)).await;
        assert_eq!(h.fetcher.requests.load(Ordering::SeqCst), 2);
        assert!(!h.scheduler.is_running());
        assert!(!h.repository.load_state().unwrap().enabled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_from_persisted_state() {
        let h = harness("<pre>ACT201.1 40(40)</pre>");
        assert!(!h.scheduler.resume().unwrap());

        h.repository
            .save_state(&MonitoringState {
                enabled: true,
                interval_seconds: 30,
                portal_url: URL.to_string(),
                watch_set: courses(&["ACT201.1"]),
            })
            .unwrap();

        assert!(h.scheduler.resume().unwrap());
        sleep(Duration::from_secs(1)).await;
        assert_eq!(
            h.repository.course("ACT201.1").unwrap().unwrap().status,
            CourseStatus::Full
        );
        h.scheduler.stop().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_now_leaves_schedule_alone() {
        let h = harness("<pre>ACT201.1 35(40)</pre>");

        h.scheduler.check_now(courses(&["ACT201.1"]), URL).unwrap();
        sleep(Duration::from_secs(1)).await;

        assert!(!h.scheduler.is_running());
        assert!(!h.repository.load_state().unwrap().enabled);
        assert_eq!(h.sink.messages(), vec!["5 seat(s) available!"]);
        assert!(h.scheduler.check_now(courses(&["ACT201.1"]), "nope").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_removed_course_stays_removed() {
        let h = harness("<pre>ACT201.1 40(40)\nEEE111.2 34(35)</pre>");

        h.scheduler
            .start(courses(&["ACT201.1", "EEE111.2"]), 60, URL)
            .unwrap();
        sleep(Duration::from_secs(5)).await;
        assert!(h.repository.course("ACT201.1").unwrap().is_some());

        assert!(h.repository.remove_course("ACT201.1").unwrap());
        let mut rx = h.bus.subscribe();
        sleep(Duration::from_secs(60)).await;

        assert!(h.repository.course("ACT201.1").unwrap().is_none());
        assert_eq!(
            h.repository.course("EEE111.2").unwrap().unwrap().status,
            CourseStatus::Available
        );

        let mut last = None;
        while let Ok(event) = rx.try_recv() {
            last = Some(event);
        }
        assert!(matches!(
            last,
            Some(UiEvent::CycleComplete { checked: 1, .. })
        ));
        h.scheduler.stop().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_now_refused_while_cycle_runs() {
        let h = harness("<pre>ACT201.1 40(40)\nEEE111.2 34(35)</pre>");
        let watch = h.watch(&["ACT201.1", "EEE111.2"]);

        let running = {
            let scheduler = h.scheduler.clone();
            let watch = watch.clone();
            tokio::spawn(async move { scheduler.run_cycle(&watch, URL).await })
        };
        tokio::task::yield_now().await;

        assert!(matches!(
            h.scheduler.check_now(watch.clone(), URL),
            Err(MonitorError::CycleInFlight)
        ));

        assert!(running.await.unwrap().is_some());
        assert!(h.scheduler.check_now(watch, URL).is_ok());
    }
}
