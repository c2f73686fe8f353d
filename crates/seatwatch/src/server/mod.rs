use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;

use crate::server::endpoints::{command, courses, status};
use crate::types::AppState;

mod endpoints;
mod types;

/// Creates a router that can be used by `axum`.
///
/// # Parameters
/// - `app_state`: The app server state.
///
/// # Returns
/// The router.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let monitor_router = Router::new()
        .route("/command", post(command::post_command))
        .route("/events", get(command::get_events))
        .route("/monitoring", get(status::get_monitoring))
        .route("/page_courses", get(status::get_page_courses));

    let course_router = Router::new()
        .route(
            "/courses",
            get(courses::get_courses).post(courses::post_course),
        )
        .route("/courses/:course_id", delete(courses::delete_course))
        .route("/activity", get(courses::get_activity));

    Router::new()
        .route("/health", get(status::get_health))
        .merge(monitor_router)
        .merge(course_router)
        .with_state(app_state)
}
