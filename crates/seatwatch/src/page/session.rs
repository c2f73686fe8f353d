//! Page sessions backed by fetched HTML.

use super::dom::{DomView, HtmlDom};
use super::load::{wait_for_load, LoadOutcome};
use super::{PageSession, PageSessionProvider, Viewport};
use crate::monitor::MonitorError;
use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::Client;
use scraper::Html;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Words a "load more" control has to show to be clicked.
const LOAD_MORE_WORDS: &[&str] = &["more", "next", "load"];

/// Retrieves the raw HTML for a URL.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<String, MonitorError>;
}

/// Fetches pages over HTTP, keeping portal cookies between requests.
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, MonitorError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .cookie_store(true)
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()
            .map_err(|e| MonitorError::Communication {
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<String, MonitorError> {
        let response = self.client.get(url.clone()).send().await?;

        if !response.status().is_success() {
            return Err(MonitorError::Communication {
                message: format!("{} returned status {}", url, response.status()),
            });
        }

        Ok(response.text().await?)
    }
}

/// Geometry and timing shared by every session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub viewport_height: f64,
    pub line_height: f64,
    /// How long a reload may take before the session carries on without it.
    pub load_fallback: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            viewport_height: 800.0,
            line_height: 20.0,
            load_fallback: Duration::from_secs(5),
        }
    }
}

#[derive(Default)]
struct DocumentState {
    /// The page itself followed by every page pulled in through "load more".
    pages: Vec<String>,
    scroll_y: f64,
    content_height: f64,
    followed: HashSet<Url>,
}

impl DocumentState {
    fn html(&self) -> String {
        self.pages.join("\n")
    }
}

/// A portal page held in memory, re-fetched on every reload.
pub struct DocumentSession {
    url: Url,
    fetcher: Arc<dyn PageFetcher>,
    settings: SessionSettings,
    document: Mutex<DocumentState>,
}

impl DocumentSession {
    pub fn new(url: Url, fetcher: Arc<dyn PageFetcher>, settings: SessionSettings) -> Self {
        Self {
            url,
            fetcher,
            settings,
            document: Mutex::new(DocumentState::default()),
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, DocumentState>, MonitorError> {
        self.document.lock().map_err(|_| MonitorError::Communication {
            message: "page session state is poisoned".to_string(),
        })
    }

    fn measure(&self, html: &str) -> f64 {
        let parsed = Html::parse_document(html);
        HtmlDom::new(&parsed, self.settings.line_height).content_height()
    }

    fn viewport_of(&self, state: &DocumentState) -> Viewport {
        Viewport {
            scroll_y: state.scroll_y,
            height: self.settings.viewport_height,
            content_height: state.content_height,
        }
    }

    /// Finds the first unfollowed link behind a load-more control.
    fn find_load_more(&self, state: &DocumentState, selectors: &[String]) -> Option<Url> {
        let parsed = Html::parse_document(&state.html());
        let dom = HtmlDom::new(&parsed, self.settings.line_height);

        for selector in selectors {
            for id in dom.query_all(selector) {
                let text = dom.text_of(id).to_lowercase();
                if !LOAD_MORE_WORDS.iter().any(|word| text.contains(word)) {
                    continue;
                }

                let Some(element) = dom.element(id) else {
                    continue;
                };
                let Some(href) = element.value().attr("href") else {
                    continue;
                };
                let href = href.trim();
                if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
                    continue;
                }

                match self.url.join(href) {
                    Ok(next) if next != self.url && !state.followed.contains(&next) => {
                        return Some(next)
                    }
                    Ok(_) => {}
                    Err(e) => debug!("Skipping load-more link '{}': {}", href, e),
                }
            }
        }

        None
    }
}

#[async_trait]
impl PageSession for DocumentSession {
    fn url(&self) -> &str {
        self.url.as_str()
    }

    async fn reload(&self) -> Result<(), MonitorError> {
        match wait_for_load(self.fetcher.fetch(&self.url), self.settings.load_fallback).await {
            LoadOutcome::Loaded(Ok(body)) => {
                let content_height = self.measure(&body);
                let mut state = self.state()?;
                *state = DocumentState {
                    pages: vec![body],
                    content_height,
                    ..DocumentState::default()
                };
                debug!(url = %self.url, content_height, "Page reloaded");
                Ok(())
            }
            LoadOutcome::Loaded(Err(e)) => Err(e),
            LoadOutcome::FallbackElapsed => {
                let state = self.state()?;
                if state.pages.is_empty() {
                    return Err(MonitorError::Communication {
                        message: format!(
                            "{} did not finish loading within {}s",
                            self.url,
                            self.settings.load_fallback.as_secs_f64()
                        ),
                    });
                }
                warn!(url = %self.url, "Reload did not complete in time, using the previous page");
                Ok(())
            }
        }
    }

    fn inject(&self, script: &mut dyn FnMut(&dyn DomView, &Viewport)) -> Result<(), MonitorError> {
        let state = self.state()?;
        if state.pages.is_empty() {
            return Err(MonitorError::Communication {
                message: format!("{} has not been loaded", self.url),
            });
        }

        let parsed = Html::parse_document(&state.html());
        let dom = HtmlDom::new(&parsed, self.settings.line_height);
        let viewport = self.viewport_of(&state);
        script(&dom, &viewport);
        Ok(())
    }

    fn viewport(&self) -> Result<Viewport, MonitorError> {
        let state = self.state()?;
        Ok(self.viewport_of(&state))
    }

    async fn scroll_by(&self, dy: f64) -> Result<Viewport, MonitorError> {
        let mut state = self.state()?;
        let max_scroll = (state.content_height - self.settings.viewport_height).max(0.0);
        state.scroll_y = (state.scroll_y + dy).clamp(0.0, max_scroll);
        Ok(self.viewport_of(&state))
    }

    async fn scroll_to_top(&self) -> Result<(), MonitorError> {
        self.state()?.scroll_y = 0.0;
        Ok(())
    }

    async fn trigger_load_more(&self, selectors: &[String]) -> Result<bool, MonitorError> {
        let next = {
            let mut state = self.state()?;
            let next = self.find_load_more(&state, selectors);
            if let Some(next) = &next {
                state.followed.insert(next.clone());
            }
            next
        };

        let Some(next) = next else {
            return Ok(false);
        };

        info!(url = %next, "Loading more content");
        match wait_for_load(self.fetcher.fetch(&next), self.settings.load_fallback).await {
            LoadOutcome::Loaded(Ok(body)) => {
                let mut state = self.state()?;
                state.pages.push(body);
                let html = state.html();
                state.content_height = self.measure(&html);
            }
            LoadOutcome::Loaded(Err(e)) => {
                warn!(url = %next, error = %e, "Load-more request failed");
            }
            LoadOutcome::FallbackElapsed => {
                warn!(url = %next, "Load-more request did not complete in time");
            }
        }

        Ok(true)
    }
}

/// One session per portal URL, reused across cycles.
pub struct SessionPool {
    fetcher: Arc<dyn PageFetcher>,
    settings: SessionSettings,
    sessions: DashMap<Url, Arc<DocumentSession>>,
}

impl SessionPool {
    pub fn new(fetcher: Arc<dyn PageFetcher>, settings: SessionSettings) -> Self {
        Self {
            fetcher,
            settings,
            sessions: DashMap::new(),
        }
    }
}

#[async_trait]
impl PageSessionProvider for SessionPool {
    async fn open(&self, url: &str) -> Result<Arc<dyn PageSession>, MonitorError> {
        let url = Url::parse(url.trim())?;

        let session = self
            .sessions
            .entry(url.clone())
            .or_insert_with(|| {
                info!(url = %url, "Creating portal page session");
                Arc::new(DocumentSession::new(
                    url.clone(),
                    self.fetcher.clone(),
                    self.settings.clone(),
                ))
            })
            .clone();

        Ok(session as Arc<dyn PageSession>)
    }
}
