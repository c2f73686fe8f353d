use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::monitor::MonitorError;

/// The JSON body returned for every failed request.
#[derive(Debug, Serialize)]
pub struct ApiErrorType {
    #[serde(skip)]
    status: StatusCode,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<String>,
}

impl From<(StatusCode, &str, Option<String>)> for ApiErrorType {
    fn from((status, error, context): (StatusCode, &str, Option<String>)) -> Self {
        Self {
            status,
            error: error.to_string(),
            context,
        }
    }
}

impl From<MonitorError> for ApiErrorType {
    fn from(err: MonitorError) -> Self {
        let status = match &err {
            MonitorError::MalformedInput { .. } => StatusCode::BAD_REQUEST,
            MonitorError::Duplicate { .. } | MonitorError::CycleInFlight => StatusCode::CONFLICT,
            MonitorError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            e if e.degrades_course() => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let error = if err.is_user_error() {
            err.to_string()
        } else {
            status
                .canonical_reason()
                .unwrap_or("Request failed")
                .to_string()
        };
        let context = (!err.is_user_error()).then(|| err.to_string());

        Self {
            status,
            error,
            context,
        }
    }
}

impl IntoResponse for ApiErrorType {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let malformed = ApiErrorType::from(MonitorError::MalformedInput {
            input: "ACT201".to_string(),
        });
        assert_eq!(malformed.status, StatusCode::BAD_REQUEST);
        assert!(malformed.context.is_none());

        let duplicate = ApiErrorType::from(MonitorError::Duplicate {
            course: "ACT201.1".to_string(),
        });
        assert_eq!(duplicate.status, StatusCode::CONFLICT);
        assert_eq!(duplicate.error, "ACT201.1 is already being monitored");

        let busy = ApiErrorType::from(MonitorError::CycleInFlight);
        assert_eq!(busy.status, StatusCode::CONFLICT);
        assert_eq!(busy.error, "A check cycle is already in progress");

        let unreachable = ApiErrorType::from(MonitorError::Communication {
            message: "connection refused".to_string(),
        });
        assert_eq!(unreachable.status, StatusCode::BAD_GATEWAY);
        assert_eq!(
            unreachable.context.as_deref(),
            Some("Could not communicate with portal page: connection refused")
        );

        let storage = ApiErrorType::from(MonitorError::Storage {
            message: "disk full".to_string(),
        });
        assert_eq!(storage.status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
