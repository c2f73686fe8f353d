//! Endpoints the presentation layer drives monitoring through.

use axum::{
    extract::State,
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::stream::{self, Stream};
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use url::Url;

use crate::monitor::events::parse_courses;
use crate::monitor::{MonitorError, UiCommand};
use crate::server::types::ApiErrorType;
use crate::types::AppState;

fn check_portal_url(portal_url: &str) -> Result<(), Response> {
    Url::parse(portal_url.trim()).map(|_| ()).map_err(|e| {
        ApiErrorType::from((
            StatusCode::BAD_REQUEST,
            "Invalid portal URL",
            Some(e.to_string()),
        ))
        .into_response()
    })
}

/// POST /command
/// Applies a `startMonitoring`, `stopMonitoring` or `checkNow` command
pub async fn post_command(
    State(s): State<Arc<AppState>>,
    Json(command): Json<UiCommand>,
) -> Response {
    info!("POST /command");

    let result: Result<&str, MonitorError> = match command {
        UiCommand::StartMonitoring {
            courses,
            interval,
            portal_url,
        } => {
            if let Err(response) = check_portal_url(&portal_url) {
                return response;
            }
            parse_courses(&courses)
                .and_then(|targets| s.scheduler.start(targets, interval, &portal_url))
                .map(|_| "startMonitoring")
        }
        UiCommand::StopMonitoring => s.scheduler.stop().map(|_| "stopMonitoring"),
        UiCommand::CheckNow {
            courses,
            portal_url,
        } => {
            if let Err(response) = check_portal_url(&portal_url) {
                return response;
            }
            parse_courses(&courses)
                .and_then(|targets| s.scheduler.check_now(targets, &portal_url))
                .map(|_| "checkNow")
        }
    };

    match result {
        Ok(action) => (
            StatusCode::ACCEPTED,
            Json(json!({ "action": action, "accepted": true })),
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "Command rejected");
            ApiErrorType::from(e).into_response()
        }
    }
}

/// GET /events
/// Streams UI events as they are published
pub async fn get_events(
    State(s): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!("GET /events");

    let events = stream::unfold(s.bus.subscribe(), |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => match Event::default().event(event.name()).json_data(&event) {
                    Ok(sse) => return Some((Ok::<_, Infallible>(sse), rx)),
                    Err(e) => warn!(event = event.name(), error = %e, "Could not encode event"),
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event listener fell behind, events dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}
