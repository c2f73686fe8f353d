use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use url::Url;

use crate::monitor::matcher::discover_courses;
use crate::monitor::MonitorError;
use crate::page::{evaluate, DocumentSession, PageSession};
use crate::server::types::ApiErrorType;
use crate::types::AppState;

#[derive(Debug, Deserialize)]
pub struct PageCoursesQuery {
    /// Defaults to the portal being monitored.
    pub url: Option<String>,
}

/// GET /health
pub async fn get_health(State(s): State<Arc<AppState>>) -> Response {
    let uptime = Utc::now() - s.started_at;
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "uptimeSecs": uptime.num_seconds(),
        })),
    )
        .into_response()
}

/// GET /monitoring
/// Returns the persisted monitoring state and whether a cycle is running right now
pub async fn get_monitoring(State(s): State<Arc<AppState>>) -> Response {
    info!("GET /monitoring");

    match s.repository.load_state() {
        Ok(state) => (
            StatusCode::OK,
            Json(json!({
                "state": state,
                "running": s.scheduler.is_running(),
                "cycleInFlight": s.scheduler.is_cycle_in_flight(),
            })),
        )
            .into_response(),
        Err(e) => ApiErrorType::from(e).into_response(),
    }
}

/// GET /page_courses
/// Lists the course sections the portal page currently offers
pub async fn get_page_courses(
    Query(query): Query<PageCoursesQuery>,
    State(s): State<Arc<AppState>>,
) -> Response {
    info!("GET /page_courses");

    let url = match query.url.filter(|u| !u.trim().is_empty()) {
        Some(url) => url,
        None => match s.repository.load_state() {
            Ok(state) if !state.portal_url.is_empty() => state.portal_url,
            Ok(_) => {
                return ApiErrorType::from((
                    StatusCode::BAD_REQUEST,
                    "No portal URL given and none is being monitored",
                    None,
                ))
                .into_response()
            }
            Err(e) => return ApiErrorType::from(e).into_response(),
        },
    };

    let page_url = match Url::parse(url.trim()) {
        Ok(page_url) => page_url,
        Err(e) => {
            return ApiErrorType::from((
                StatusCode::BAD_REQUEST,
                "Invalid portal URL",
                Some(e.to_string()),
            ))
            .into_response()
        }
    };

    // A check cycle may be scrolling the pooled session for this URL.
    let session = DocumentSession::new(
        page_url,
        s.fetcher.clone(),
        s.session_settings.clone(),
    );
    let profile = s.resolver.resolve(&url);
    let courses: Result<Vec<_>, MonitorError> = match session.reload().await {
        Ok(()) => evaluate(&session, |dom, _| discover_courses(dom, &profile)),
        Err(e) => Err(e),
    };

    match courses {
        Ok(courses) => (
            StatusCode::OK,
            Json(json!({
                "url": url,
                "profile": profile.name,
                "courses": courses,
            })),
        )
            .into_response(),
        Err(e @ MonitorError::Communication { .. }) => ApiErrorType::from((
            StatusCode::BAD_GATEWAY,
            "Failed to read portal page",
            Some(e.to_string()),
        ))
        .into_response(),
        Err(e) => ApiErrorType::from(e).into_response(),
    }
}
