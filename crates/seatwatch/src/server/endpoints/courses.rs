use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use crate::monitor::{CourseInput, UiEvent};
use crate::server::types::ApiErrorType;
use crate::types::AppState;

#[derive(Debug, Deserialize)]
pub struct AddCourseBody {
    pub course: CourseInput,
}

/// GET /courses
/// Returns every watched course with its last known status
pub async fn get_courses(State(s): State<Arc<AppState>>) -> Response {
    info!("GET /courses");

    match s.repository.load_courses() {
        Ok(courses) => (StatusCode::OK, Json(courses)).into_response(),
        Err(e) => ApiErrorType::from(e).into_response(),
    }
}

/// POST /courses
/// Adds a course to the watch list
pub async fn post_course(
    State(s): State<Arc<AppState>>,
    Json(body): Json<AddCourseBody>,
) -> Response {
    info!("POST /courses");

    let added = body
        .course
        .to_target()
        .and_then(|target| s.repository.add_course(&target));

    match added {
        Ok(watch) => {
            s.bus.publish(UiEvent::status_update(&watch));
            (StatusCode::CREATED, Json(watch)).into_response()
        }
        Err(e) => ApiErrorType::from(e).into_response(),
    }
}

/// DELETE /courses/:course_id
/// Stops tracking a course
pub async fn delete_course(
    Path(course_id): Path<String>,
    State(s): State<Arc<AppState>>,
) -> Response {
    info!("DELETE /courses/{}", course_id);

    match s.repository.remove_course(&course_id.trim().to_uppercase()) {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => ApiErrorType::from((
            StatusCode::NOT_FOUND,
            "Course is not being monitored",
            Some(course_id),
        ))
        .into_response(),
        Err(e) => ApiErrorType::from(e).into_response(),
    }
}

/// GET /activity
/// Returns the activity log, newest first
pub async fn get_activity(State(s): State<Arc<AppState>>) -> Response {
    info!("GET /activity");

    match s.repository.load_activity() {
        Ok(log) => (StatusCode::OK, Json(log.to_vec())).into_response(),
        Err(e) => ApiErrorType::from(e).into_response(),
    }
}
