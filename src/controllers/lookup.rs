use axum::{extract::State, routing::get, Json, Router};
use serde::Deserialize;
use std::sync::Arc;
use validator::{Validate, ValidationError};

use crate::error::ApiError;
use crate::middleware::ValidatedQuery;
use crate::models::ConfirmedOrder;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/lookup", get(lookup_reservation))
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LookupQuery {
    #[validate(custom(function = "validate_reservation_number"))]
    pub reservation_number: String,
    #[validate(custom(function = "validate_contact"))]
    pub contact: String,
}

fn validate_reservation_number(value: &str) -> Result<(), ValidationError> {
    if (12..=16).contains(&value.len()) && value.chars().all(|c| c.is_ascii_alphanumeric()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("reservation_number");
        err.message = Some("reservationNumber must be 12-16 letters or digits".into());
        Err(err)
    }
}

fn validate_contact(value: &str) -> Result<(), ValidationError> {
    let allowed = value
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '(' | ')' | ' '));
    if allowed && value.chars().any(|c| c.is_ascii_digit()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("contact");
        err.message = Some("contact may only contain digits and + - ( ) separators".into());
        Err(err)
    }
}

// GET /api/lookup?reservationNumber=&contact=
async fn lookup_reservation(
    State(state): State<Arc<AppState>>,
    ValidatedQuery(query): ValidatedQuery<LookupQuery>,
) -> Result<Json<ConfirmedOrder>, ApiError> {
    let order = state
        .holds
        .find(query.reservation_number.trim(), &query.contact)
        .await?;
    Ok(Json(order))
}
