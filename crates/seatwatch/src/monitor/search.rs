//! Scrolling and paging through a portal page until a course shows up.

use super::matcher::{match_page, MatchScope};
use super::portal::PortalProfile;
use super::types::{CourseTarget, EnrollmentReading};
use super::MonitorError;
use crate::page::{evaluate, PageSession};
use serde::Serialize;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info};

/// Limits and delays for one search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchConfig {
    pub max_scroll_steps: u32,
    pub max_load_attempts: u32,
    /// Wall-clock ceiling for the whole search.
    pub timeout: Duration,
    /// Portion of the viewport height moved per scroll step.
    pub scroll_fraction: f64,
    pub scroll_settle: Duration,
    pub load_settle: Duration,
    /// Pause between steps that did not end the search.
    pub step_pause: Duration,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_scroll_steps: 15,
            max_load_attempts: 5,
            timeout: Duration::from_secs(30),
            scroll_fraction: 0.8,
            scroll_settle: Duration::from_millis(800),
            load_settle: Duration::from_millis(2000),
            step_pause: Duration::from_millis(1000),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SearchState {
    Idle,
    Scrolling,
    Loading,
    Found,
    NotFound,
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub state: SearchState,
    pub reading: EnrollmentReading,
    /// Scroll steps taken.
    pub steps: u32,
    /// "Load more" controls triggered.
    pub loads: u32,
    pub elapsed: Duration,
}

impl SearchOutcome {
    /// The error a failed search amounts to, for logging by the caller.
    pub fn failure(&self, course: &CourseTarget) -> Option<MonitorError> {
        let course = course.full_id();
        match self.state {
            SearchState::TimedOut => Some(MonitorError::Timeout {
                course,
                elapsed_secs: self.elapsed.as_secs_f64(),
            }),
            SearchState::Found => None,
            _ => Some(MonitorError::NotFound {
                course,
                message: self.reading.message.clone().unwrap_or_default(),
            }),
        }
    }
}

/// Counters that must survive the search being cut off by the timeout.
#[derive(Debug)]
struct Progress {
    state: SearchState,
    steps: u32,
    loads: u32,
}

/// Drives a page forward step by step, re-running the matcher after each step.
///
/// Callers must not run two searches over the same session at once; the
/// scheduler serializes checks.
#[derive(Debug, Clone, Default)]
pub struct ProgressiveSearch {
    config: SearchConfig,
}

impl ProgressiveSearch {
    pub fn new(config: SearchConfig) -> Self {
        Self { config }
    }

    /// Searches `session` for `target`.
    ///
    /// The page is always scrolled back to the top before returning.
    ///
    /// # Returns
    /// The terminal state with its reading. A `NotFound` or `TimedOut`
    /// reading carries a message with the step and load counts.
    pub async fn search(
        &self,
        session: &dyn PageSession,
        target: &CourseTarget,
        profile: &PortalProfile,
    ) -> SearchOutcome {
        let course = target.full_id();
        let started = Instant::now();
        let mut progress = Progress {
            state: SearchState::Idle,
            steps: 0,
            loads: 0,
        };

        let result = timeout(
            self.config.timeout,
            self.run(session, target, profile, &mut progress),
        )
        .await;

        let counts = format!(
            "({} scrolls, {} page loads)",
            progress.steps, progress.loads
        );
        let (state, reading) = match result {
            Ok(Ok(Some(reading))) => (SearchState::Found, reading),
            Ok(Ok(None)) => (
                SearchState::NotFound,
                EnrollmentReading::not_found(format!(
                    "Course {} not found after comprehensive search {}",
                    course, counts
                )),
            ),
            Ok(Err(e)) => (
                SearchState::NotFound,
                EnrollmentReading::not_found(format!(
                    "Course {} search failed: {} {}",
                    course, e, counts
                )),
            ),
            Err(_) => (
                SearchState::TimedOut,
                EnrollmentReading::not_found(format!(
                    "Course {} search timed out after {} seconds {}",
                    course,
                    self.config.timeout.as_secs(),
                    counts
                )),
            ),
        };

        if let Err(e) = session.scroll_to_top().await {
            debug!(course = %course, "Could not reset scroll position: {}", e);
        }

        let elapsed = started.elapsed();
        info!(
            course = %course,
            state = ?state,
            last_phase = ?progress.state,
            steps = progress.steps,
            loads = progress.loads,
            elapsed_ms = elapsed.as_millis() as u64,
            "Progressive search finished"
        );

        SearchOutcome {
            state,
            reading,
            steps: progress.steps,
            loads: progress.loads,
            elapsed,
        }
    }

    /// The step chain. `Ok(None)` means the page ran out before the course turned up.
    async fn run(
        &self,
        session: &dyn PageSession,
        target: &CourseTarget,
        profile: &PortalProfile,
        progress: &mut Progress,
    ) -> Result<Option<EnrollmentReading>, MonitorError> {
        loop {
            let mut loaded = false;
            if progress.loads < self.config.max_load_attempts {
                progress.state = SearchState::Loading;
                if session
                    .trigger_load_more(&profile.load_more_selectors)
                    .await?
                {
                    progress.loads += 1;
                    loaded = true;
                    sleep(self.config.load_settle).await;
                }
            }

            let mut scrolled = None;
            if !loaded {
                progress.state = SearchState::Scrolling;
                let before = session.viewport()?;
                let after = session
                    .scroll_by(before.height * self.config.scroll_fraction)
                    .await?;
                progress.steps += 1;
                sleep(self.config.scroll_settle).await;
                scrolled = Some((before, after));
            }

            let reading = evaluate(session, |dom, viewport| {
                match_page(dom, target, profile, MatchScope::Visible(*viewport))
            })?;
            if reading.found {
                progress.state = SearchState::Found;
                return Ok(Some(reading));
            }

            if let Some((before, after)) = scrolled {
                let stalled = after.scroll_y == before.scroll_y;
                if stalled || after.at_bottom() || progress.steps >= self.config.max_scroll_steps {
                    debug!(
                        course = %target,
                        stalled,
                        at_bottom = after.at_bottom(),
                        steps = progress.steps,
                        "No more page to search"
                    );
                    progress.state = SearchState::NotFound;
                    return Ok(None);
                }
            }

            sleep(self.config.step_pause).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::portal::family_profile;
    use crate::monitor::types::SeatCount;
    use crate::page::{
        DocumentSession, DomView, HtmlDom, MapFetcher, SessionSettings, Viewport,
    };
    use async_trait::async_trait;
    use scraper::Html;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use url::Url;

    const URL: &str = "https://portal.example.edu/courses";

    /// A page with endless content whose scrolling stops moving after `stall_after` calls.
    struct FakeSession {
        scroll_y: Mutex<f64>,
        stall_after: u32,
        always_load_more: bool,
        scrolls: AtomicU32,
        loads: AtomicU32,
    }

    impl FakeSession {
        fn new(stall_after: u32, always_load_more: bool) -> Self {
            Self {
                scroll_y: Mutex::new(0.0),
                stall_after,
                always_load_more,
                scrolls: AtomicU32::new(0),
                loads: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl PageSession for FakeSession {
        fn url(&self) -> &str {
            URL
        }

        async fn reload(&self) -> Result<(), MonitorError> {
            Ok(())
        }

        fn inject(
            &self,
            script: &mut dyn FnMut(&dyn DomView, &Viewport),
        ) -> Result<(), MonitorError> {
            let html = Html::parse_document("<p>Nothing offered here</p>");
            let dom = HtmlDom::new(&html, 20.0);
            script(&dom, &self.viewport()?);
            Ok(())
        }

        fn viewport(&self) -> Result<Viewport, MonitorError> {
            Ok(Viewport {
                scroll_y: *self.scroll_y.lock().unwrap(),
                height: 800.0,
                content_height: 1.0e9,
            })
        }

        async fn scroll_by(&self, dy: f64) -> Result<Viewport, MonitorError> {
            let calls = self.scrolls.fetch_add(1, Ordering::SeqCst) + 1;
            if calls <= self.stall_after {
                *self.scroll_y.lock().unwrap() += dy;
            }
            self.viewport()
        }

        async fn scroll_to_top(&self) -> Result<(), MonitorError> {
            *self.scroll_y.lock().unwrap() = 0.0;
            Ok(())
        }

        async fn trigger_load_more(&self, _selectors: &[String]) -> Result<bool, MonitorError> {
            if self.always_load_more {
                self.loads.fetch_add(1, Ordering::SeqCst);
            }
            Ok(self.always_load_more)
        }
    }

    fn target() -> CourseTarget {
        CourseTarget::new("ACT201", "1")
    }

    fn profile() -> PortalProfile {
        family_profile(URL).clone()
    }

    async fn loaded_session(fetcher: MapFetcher) -> DocumentSession {
        let session = DocumentSession::new(
            Url::parse(URL).unwrap(),
            Arc::new(fetcher),
            SessionSettings::default(),
        );
        session.reload().await.unwrap();
        session
    }

    #[tokio::test(start_paused = true)]
    async fn test_found_after_load_more() {
        let fetcher = MapFetcher::with_page(
            URL,
            r#"<div>Nothing yet</div><a class="load-more" href="/courses?page=2">Load more</a>"#,
        );
        fetcher.set_page(&format!("{URL}?page=2"), "<div>ACT201.1 35(40)</div>");
        let session = loaded_session(fetcher).await;

        let outcome = ProgressiveSearch::default()
            .search(&session, &target(), &profile())
            .await;

        assert_eq!(outcome.state, SearchState::Found);
        assert_eq!(outcome.loads, 1);
        assert_eq!(outcome.steps, 0);
        assert_eq!(outcome.reading.available, SeatCount::Known(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_at_bottom_of_page() {
        let rows: String = (0..100).map(|i| format!("<div>Row {i}</div>")).collect();
        let session = loaded_session(MapFetcher::with_page(URL, &rows)).await;
        session.scroll_by(100.0).await.unwrap();

        let outcome = ProgressiveSearch::default()
            .search(&session, &target(), &profile())
            .await;

        // 2000px of content: 100 -> 740 -> 1200 (bottom).
        assert_eq!(outcome.state, SearchState::NotFound);
        assert_eq!(outcome.steps, 2);
        assert!(!outcome.reading.found);
        assert_eq!(
            outcome.reading.message.as_deref(),
            Some("Course ACT201.1 not found after comprehensive search (2 scrolls, 0 page loads)")
        );
        assert_eq!(session.viewport().unwrap().scroll_y, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_scroll_ends_search() {
        let session = FakeSession::new(3, false);

        let outcome = ProgressiveSearch::default()
            .search(&session, &target(), &profile())
            .await;

        assert_eq!(outcome.state, SearchState::NotFound);
        assert_eq!(outcome.steps, 4);
        assert_eq!(session.scrolls.load(Ordering::SeqCst), 4);
        assert_eq!(*session.scroll_y.lock().unwrap(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scroll_steps_are_bounded() {
        let session = FakeSession::new(u32::MAX, false);

        let outcome = ProgressiveSearch::default()
            .search(&session, &target(), &profile())
            .await;

        assert_eq!(outcome.state, SearchState::NotFound);
        assert_eq!(outcome.steps, 15);
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_attempts_are_bounded() {
        let session = FakeSession::new(0, true);

        let outcome = ProgressiveSearch::default()
            .search(&session, &target(), &profile())
            .await;

        assert_eq!(outcome.loads, 5);
        assert_eq!(session.loads.load(Ordering::SeqCst), 5);
        assert_eq!(outcome.steps, 1);
        assert!(outcome
            .reading
            .message
            .unwrap()
            .ends_with("(1 scrolls, 5 page loads)"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_search_times_out() {
        let session = FakeSession::new(u32::MAX, false);
        let search = ProgressiveSearch::new(SearchConfig {
            max_scroll_steps: 100,
            ..SearchConfig::default()
        });
        let started = Instant::now();

        let outcome = search.search(&session, &target(), &profile()).await;

        assert_eq!(outcome.state, SearchState::TimedOut);
        assert!(matches!(
            outcome.failure(&target()),
            Some(MonitorError::Timeout { .. })
        ));
        assert!(outcome.steps >= 16);
        assert!(started.elapsed() >= Duration::from_secs(30));
        assert!(outcome
            .reading
            .message
            .unwrap()
            .starts_with("Course ACT201.1 search timed out after 30 seconds"));
        assert_eq!(*session.scroll_y.lock().unwrap(), 0.0);
    }
}
