//! User-visible alerts.

use super::events::{EventBus, UiEvent};
use super::MonitorError;
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub title: String,
    pub message: String,
    pub priority: u8,
}

/// Somewhere to show a notification. Delivery is best effort.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: &Notification);
}

/// Writes notifications to the log.
pub struct LogNotifier;

impl NotificationSink for LogNotifier {
    fn notify(&self, notification: &Notification) {
        info!(
            title = %notification.title,
            priority = notification.priority,
            "{}",
            notification.message
        );
    }
}

/// Pushes notifications onto the UI event stream.
pub struct BusNotifier {
    bus: EventBus,
}

impl BusNotifier {
    pub fn new(bus: EventBus) -> Self {
        Self { bus }
    }
}

impl NotificationSink for BusNotifier {
    fn notify(&self, notification: &Notification) {
        self.bus.publish(UiEvent::Notification {
            title: notification.title.clone(),
            message: notification.message.clone(),
            priority: notification.priority,
        });
    }
}

/// POSTs each notification as JSON to a webhook, without waiting for the reply.
pub struct WebhookNotifier {
    client: Client,
    url: Url,
}

impl WebhookNotifier {
    pub fn new(url: &str) -> Result<Self, MonitorError> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            url: Url::parse(url)?,
        })
    }
}

impl NotificationSink for WebhookNotifier {
    fn notify(&self, notification: &Notification) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(url = %self.url, "No async runtime, webhook notification skipped");
            return;
        };

        let request = self.client.post(self.url.clone()).json(notification);
        let url = self.url.clone();
        runtime.spawn(async move {
            match request.send().await {
                Ok(response) if !response.status().is_success() => {
                    warn!(url = %url, status = %response.status(), "Webhook rejected notification");
                }
                Ok(_) => {}
                Err(e) => warn!(url = %url, error = %e, "Webhook notification failed"),
            }
        });
    }
}

/// Sends each notification to every registered sink.
#[derive(Default, Clone)]
pub struct Notifiers {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl Notifiers {
    pub fn with(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }
}

impl NotificationSink for Notifiers {
    fn notify(&self, notification: &Notification) {
        for sink in &self.sinks {
            sink.notify(notification);
        }
    }
}
