/// Page sessions: the one document a check cycle reads from
mod dom;
mod load;
mod session;

pub use dom::{render_text, DomView, ElementId, HtmlDom, Rect};
pub use load::{wait_for_load, LoadOutcome};
pub use session::{DocumentSession, HttpFetcher, PageFetcher, SessionPool, SessionSettings};
#[cfg(test)]
pub(crate) use session::tests::MapFetcher;

use crate::monitor::MonitorError;
use async_trait::async_trait;
use std::sync::Arc;

/// Scroll position and size of the visible part of a page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub scroll_y: f64,
    pub height: f64,
    pub content_height: f64,
}

impl Viewport {
    /// True if any part of `rect` is inside the viewport.
    pub fn shows(&self, rect: &Rect) -> bool {
        rect.bottom > rect.top && rect.top < self.scroll_y + self.height && rect.bottom > self.scroll_y
    }

    /// True once the bottom of the content is in view.
    pub fn at_bottom(&self) -> bool {
        self.scroll_y + self.height >= self.content_height
    }
}

/// A loaded page that scripts can be run against.
#[async_trait]
pub trait PageSession: Send + Sync {
    fn url(&self) -> &str;

    /// Reloads the page and waits until it has finished loading.
    async fn reload(&self) -> Result<(), MonitorError>;

    /// Runs `script` against the current document.
    fn inject(&self, script: &mut dyn FnMut(&dyn DomView, &Viewport)) -> Result<(), MonitorError>;

    fn viewport(&self) -> Result<Viewport, MonitorError>;

    async fn scroll_by(&self, dy: f64) -> Result<Viewport, MonitorError>;

    async fn scroll_to_top(&self) -> Result<(), MonitorError>;

    /// Triggers the first unused "load more" or "next page" control.
    ///
    /// # Returns
    /// * `Ok(true)` - A control was triggered
    /// * `Ok(false)` - No usable control is left on the page
    async fn trigger_load_more(&self, selectors: &[String]) -> Result<bool, MonitorError>;
}

/// Hands out the session for a portal URL, creating it on first use.
#[async_trait]
pub trait PageSessionProvider: Send + Sync {
    async fn open(&self, url: &str) -> Result<Arc<dyn PageSession>, MonitorError>;
}

/// Runs `script` in `session` and returns its value.
pub fn evaluate<T, F>(session: &dyn PageSession, script: F) -> Result<T, MonitorError>
where
    F: FnOnce(&dyn DomView, &Viewport) -> T,
{
    let mut script = Some(script);
    let mut output = None;
    session.inject(&mut |dom, viewport| {
        if let Some(script) = script.take() {
            output = Some(script(dom, viewport));
        }
    })?;

    output.ok_or_else(|| MonitorError::Communication {
        message: "page script did not run".to_string(),
    })
}
