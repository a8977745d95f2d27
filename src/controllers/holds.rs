use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use super::parse_id;
use crate::error::ApiError;
use crate::middleware::{CallerIdentity, ValidatedJson};
use crate::models::{BookerInfo, HeldSeat, Hold, HoldStatus};
use crate::services::HoldRequest;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/holds", post(create_hold))
        .route("/holds/{hold_id}", get(get_hold).delete(release_hold))
        .route("/holds/{hold_id}/confirm", post(confirm_hold))
        .route("/holds/{hold_id}/preview", post(preview_hold))
}

/* ---------- DTOs ---------- */

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateHoldRequest {
    pub concert_id: Uuid,
    #[validate(length(min = 1, message = "select at least one seat"))]
    pub seat_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldResponse {
    pub hold_id: Uuid,
    pub concert_id: Uuid,
    pub status: HoldStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub seats: Vec<HeldSeat>,
    pub total_price: i64,
}

impl HoldResponse {
    /// Reports the status as of `now`, so a lapsed pending hold reads as expired.
    fn at(hold: Hold, now: DateTime<Utc>) -> Self {
        Self {
            hold_id: hold.id,
            concert_id: hold.concert_id,
            status: hold.effective_status(now),
            created_at: hold.created_at,
            expires_at: hold.expires_at,
            seats: hold.seats,
            total_price: hold.total_price,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct BookerRequest {
    #[validate(length(min = 1, max = 50, message = "bookerName must be 1-50 characters"))]
    pub booker_name: String,
    #[validate(email(message = "bookerEmail must be a valid email"))]
    pub booker_email: String,
    #[validate(custom(function = "validate_mobile_number"))]
    pub booker_phone: String,
}

impl From<BookerRequest> for BookerInfo {
    fn from(req: BookerRequest) -> Self {
        BookerInfo {
            name: req.booker_name.trim().to_string(),
            email: req.booker_email.trim().to_string(),
            phone: req.booker_phone.trim().to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmResponse {
    pub order_id: Uuid,
    pub reservation_number: String,
}

#[derive(Debug, Serialize)]
pub struct PreviewResponse {
    pub valid: bool,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ReleaseResponse {
    pub success: bool,
    pub message: String,
}

/// `010XXXXXXXX`, optionally dashed as `010-XXXX-XXXX`.
fn validate_mobile_number(phone: &str) -> Result<(), ValidationError> {
    let groups: Vec<&str> = phone.split('-').collect();
    let shape_ok = matches!(
        groups.iter().map(|g| g.len()).collect::<Vec<_>>().as_slice(),
        [11] | [3, 8] | [7, 4] | [3, 4, 4]
    );
    let digits_ok = groups.iter().all(|g| g.chars().all(|c| c.is_ascii_digit()));

    if shape_ok && digits_ok && phone.starts_with("010") {
        Ok(())
    } else {
        let mut err = ValidationError::new("mobile_number");
        err.message = Some("bookerPhone must look like 010-1234-5678".into());
        Err(err)
    }
}

/* ---------- HANDLERS ---------- */

// POST /api/holds
async fn create_hold(
    State(state): State<Arc<AppState>>,
    CallerIdentity(user_id): CallerIdentity,
    ValidatedJson(req): ValidatedJson<CreateHoldRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let hold = state
        .holds
        .acquire(HoldRequest {
            concert_id: req.concert_id,
            seat_ids: req.seat_ids,
            user_id,
        })
        .await?;
    let now = state.holds.now();
    Ok((StatusCode::CREATED, Json(HoldResponse::at(hold, now))))
}

// GET /api/holds/{hold_id}
async fn get_hold(
    State(state): State<Arc<AppState>>,
    Path(hold_id): Path<String>,
) -> Result<Json<HoldResponse>, ApiError> {
    let hold = state.holds.hold(parse_id(&hold_id, "holdId")?).await?;
    Ok(Json(HoldResponse::at(hold, state.holds.now())))
}

// DELETE /api/holds/{hold_id}
async fn release_hold(
    State(state): State<Arc<AppState>>,
    Path(hold_id): Path<String>,
) -> Result<Json<ReleaseResponse>, ApiError> {
    let hold_id = parse_id(&hold_id, "holdId")?;
    let hold = state.holds.release(hold_id).await.map_err(ApiError::for_release)?;
    Ok(Json(ReleaseResponse {
        success: true,
        message: format!("Hold released, {} seats are available again", hold.seats.len()),
    }))
}

// POST /api/holds/{hold_id}/confirm
async fn confirm_hold(
    State(state): State<Arc<AppState>>,
    Path(hold_id): Path<String>,
    CallerIdentity(user_id): CallerIdentity,
    ValidatedJson(req): ValidatedJson<BookerRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let hold_id = parse_id(&hold_id, "holdId")?;
    let order = state.holds.confirm(hold_id, req.into(), user_id).await?;
    Ok((
        StatusCode::CREATED,
        Json(ConfirmResponse {
            order_id: order.order_id,
            reservation_number: order.reservation_number,
        }),
    ))
}

// POST /api/holds/{hold_id}/preview
async fn preview_hold(
    State(state): State<Arc<AppState>>,
    Path(hold_id): Path<String>,
    ValidatedJson(_req): ValidatedJson<BookerRequest>,
) -> Result<Json<PreviewResponse>, ApiError> {
    let hold = state.holds.preview(parse_id(&hold_id, "holdId")?).await?;
    Ok(Json(PreviewResponse {
        valid: true,
        message: format!(
            "{} seats, total {}, hold valid until {}",
            hold.seats.len(),
            hold.total_price,
            hold.expires_at.to_rfc3339()
        ),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mobile_number_shapes() {
        for ok in ["01012345678", "010-1234-5678", "010-12345678", "0101234-5678"] {
            assert!(validate_mobile_number(ok).is_ok(), "{}", ok);
        }
        for bad in ["", "011-1234-5678", "010-123-45678", "010 1234 5678", "010-1234-567a", "010--12345678"] {
            assert!(validate_mobile_number(bad).is_err(), "{}", bad);
        }
    }

    #[test]
    fn booker_request_rules() {
        let valid = BookerRequest {
            booker_name: "Kim".to_string(),
            booker_email: "kim@example.com".to_string(),
            booker_phone: "010-1234-5678".to_string(),
        };
        assert!(valid.validate().is_ok());

        let invalid = BookerRequest {
            booker_name: String::new(),
            booker_email: "not-an-email".to_string(),
            ..valid
        };
        let errors = invalid.validate().unwrap_err();
        assert_eq!(errors.field_errors().len(), 2);
    }
}
