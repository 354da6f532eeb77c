//! Maps `NbaseError` onto the `{ success, duration, ... }` / `{ error,
//! duration }` response envelope and status codes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use nbase_common::NbaseError;
use serde::Serialize;
use std::time::Instant;

/// Wraps a handler's outcome together with the wall-clock time the handler
/// spent producing it; every response body carries a `duration` field
/// regardless of success, for client-side observability.
pub struct Timed<T> {
    pub start: Instant,
    pub result: Result<T, NbaseError>,
}

impl<T> Timed<T> {
    pub fn new(start: Instant, result: Result<T, NbaseError>) -> Self {
        Self { start, result }
    }
}

#[derive(Serialize)]
struct SuccessBody<T: Serialize> {
    success: bool,
    duration: u128,
    #[serde(flatten)]
    data: T,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    duration: u128,
}

fn status_for(err: &NbaseError) -> StatusCode {
    match err {
        NbaseError::InvalidArgument(_) | NbaseError::DimensionMismatch { .. } => {
            StatusCode::BAD_REQUEST
        }
        NbaseError::NotFound(_) => StatusCode::NOT_FOUND,
        NbaseError::DatabaseNotReady | NbaseError::Closed => StatusCode::SERVICE_UNAVAILABLE,
        NbaseError::Overloaded => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl<T: Serialize> IntoResponse for Timed<T> {
    fn into_response(self) -> Response {
        let duration = self.start.elapsed().as_millis();
        match self.result {
            Ok(data) => (
                StatusCode::OK,
                Json(SuccessBody {
                    success: true,
                    duration,
                    data,
                }),
            )
                .into_response(),
            Err(e) => {
                let status = status_for(&e);
                (
                    status,
                    Json(ErrorBody {
                        error: e.to_string(),
                        duration,
                    }),
                )
                    .into_response()
            }
        }
    }
}

/// Same as [`Timed`] but with an explicit success status (used for `201
/// Created` on vector insertion).
pub struct TimedWithStatus<T> {
    pub start: Instant,
    pub status: StatusCode,
    pub result: Result<T, NbaseError>,
}

impl<T> TimedWithStatus<T> {
    pub fn new(start: Instant, status: StatusCode, result: Result<T, NbaseError>) -> Self {
        Self {
            start,
            status,
            result,
        }
    }
}

impl<T: Serialize> IntoResponse for TimedWithStatus<T> {
    fn into_response(self) -> Response {
        let duration = self.start.elapsed().as_millis();
        match self.result {
            Ok(data) => (
                self.status,
                Json(SuccessBody {
                    success: true,
                    duration,
                    data,
                }),
            )
                .into_response(),
            Err(e) => {
                let status = status_for(&e);
                (
                    status,
                    Json(ErrorBody {
                        error: e.to_string(),
                        duration,
                    }),
                )
                    .into_response()
            }
        }
    }
}
