//! HTTP error envelope.
//!
//! Every failure leaves the service as
//! `{"error": {"code": "...", "message": "...", "details": ...}}` with one of
//! the stable codes below.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::error;
use validator::ValidationErrors;

use crate::models::HoldStatus;
use crate::services::HoldError;

pub mod codes {
    pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
    pub const INVALID_REQUEST: &str = "INVALID_REQUEST";
    pub const MAX_SEATS_EXCEEDED: &str = "MAX_SEATS_EXCEEDED";
    pub const SEAT_NOT_FOUND: &str = "SEAT_NOT_FOUND";
    pub const SEAT_ALREADY_HELD: &str = "SEAT_ALREADY_HELD";
    pub const HOLD_NOT_FOUND: &str = "HOLD_NOT_FOUND";
    pub const HOLD_NOT_PENDING: &str = "HOLD_NOT_PENDING";
    pub const HOLD_EXPIRED: &str = "HOLD_EXPIRED";
    pub const HOLD_ALREADY_CONFIRMED: &str = "HOLD_ALREADY_CONFIRMED";
    pub const HOLD_INVALID_STATE: &str = "HOLD_INVALID_STATE";
    pub const ORDER_NOT_FOUND: &str = "ORDER_NOT_FOUND";
    pub const CONCERT_NOT_FOUND: &str = "CONCERT_NOT_FOUND";
    pub const SEATS_NOT_FOUND: &str = "SEATS_NOT_FOUND";
    pub const RESERVATION_NOT_FOUND: &str = "RESERVATION_NOT_FOUND";
    pub const RESERVATION_CONTACT_MISMATCH: &str = "RESERVATION_CONTACT_MISMATCH";
    pub const RATE_LIMIT_EXCEEDED: &str = "RATE_LIMIT_EXCEEDED";
    pub const SERVICE_UNAVAILABLE: &str = "SERVICE_UNAVAILABLE";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    details: Option<Value>,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: ErrorPayload<'a>,
}

#[derive(Serialize)]
struct ErrorPayload<'a> {
    code: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<&'a Value>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, codes::INVALID_REQUEST, message)
    }

    pub fn validation(errors: ValidationErrors) -> Self {
        let details = serde_json::to_value(errors.field_errors()).unwrap_or(Value::Null);
        Self::new(StatusCode::BAD_REQUEST, codes::VALIDATION_ERROR, "Request validation failed")
            .with_details(details)
    }

    pub fn rate_limited(retry_after_secs: u64) -> Self {
        Self::new(
            StatusCode::TOO_MANY_REQUESTS,
            codes::RATE_LIMIT_EXCEEDED,
            "Too many requests. Please try again later.",
        )
        .with_details(json!({ "retryAfter": retry_after_secs }))
    }

    /// Release refuses anything that is not a live pending hold with 400
    /// instead of the generic 409.
    pub fn for_release(err: HoldError) -> Self {
        match err {
            HoldError::InvalidState { hold_id, status } => Self::new(
                StatusCode::BAD_REQUEST,
                codes::HOLD_NOT_PENDING,
                format!("Hold {} is {} and can no longer be released", hold_id, status),
            )
            .with_details(json!({ "status": status })),
            other => other.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }
}

impl From<HoldError> for ApiError {
    fn from(err: HoldError) -> Self {
        let message = err.to_string();
        match err {
            HoldError::EmptySelection => Self::new(StatusCode::BAD_REQUEST, codes::VALIDATION_ERROR, message),
            HoldError::LimitExceeded { requested, max } => {
                Self::new(StatusCode::BAD_REQUEST, codes::MAX_SEATS_EXCEEDED, message)
                    .with_details(json!({ "requested": requested, "max": max }))
            }
            HoldError::SeatNotFound { seat_ids, .. } => {
                Self::new(StatusCode::NOT_FOUND, codes::SEAT_NOT_FOUND, message)
                    .with_details(json!({ "seatIds": seat_ids }))
            }
            HoldError::Conflict(seat_ids) => Self::new(
                StatusCode::CONFLICT,
                codes::SEAT_ALREADY_HELD,
                "Some seats are already held or sold",
            )
            .with_details(json!({ "seatIds": seat_ids })),
            HoldError::HoldNotFound(_) => Self::new(StatusCode::NOT_FOUND, codes::HOLD_NOT_FOUND, message),
            HoldError::OrderNotFound(_) => Self::new(StatusCode::NOT_FOUND, codes::ORDER_NOT_FOUND, message),
            HoldError::ReservationNotFound(_) => {
                Self::new(StatusCode::NOT_FOUND, codes::RESERVATION_NOT_FOUND, message)
            }
            HoldError::ConcertNotFound(_) => Self::new(StatusCode::NOT_FOUND, codes::CONCERT_NOT_FOUND, message),
            HoldError::SeatsNotFound(_) => Self::new(StatusCode::NOT_FOUND, codes::SEATS_NOT_FOUND, message),
            HoldError::Expired(_) => Self::new(StatusCode::GONE, codes::HOLD_EXPIRED, message),
            HoldError::InvalidState {
                status: HoldStatus::Confirmed,
                ..
            } => Self::new(StatusCode::CONFLICT, codes::HOLD_ALREADY_CONFIRMED, message),
            HoldError::InvalidState { status, .. } => {
                Self::new(StatusCode::CONFLICT, codes::HOLD_INVALID_STATE, message)
                    .with_details(json!({ "status": status }))
            }
            HoldError::ContactMismatch => {
                Self::new(StatusCode::FORBIDDEN, codes::RESERVATION_CONTACT_MISMATCH, message)
            }
            HoldError::ReservationNumberExhausted(_) => {
                error!("Reservation number allocation failed: {}", message);
                Self::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    codes::SERVICE_UNAVAILABLE,
                    "Could not complete the confirmation, please retry",
                )
            }
            HoldError::Storage(e) => {
                error!("Storage failure: {:?}", e);
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    codes::INTERNAL_ERROR,
                    "Internal server error",
                )
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorPayload {
                code: self.code,
                message: &self.message,
                details: self.details.as_ref(),
            },
        };
        (self.status, Json(body)).into_response()
    }
}
