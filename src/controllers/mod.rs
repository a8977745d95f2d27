pub mod holds;
pub mod lookup;
pub mod orders;
pub mod seats;

use axum::{middleware::from_fn_with_state, Router};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::ApiError;
use crate::middleware::rate_limit::{enforce, RateLimitPolicy};
use crate::AppState;

pub fn routes(state: &Arc<AppState>) -> Router<Arc<AppState>> {
    let mut api = Router::new()
        .merge(holds::routes())
        .merge(orders::routes())
        .merge(seats::routes());
    let mut lookup = lookup::routes();

    if let Some(limiter) = &state.rate_limiter {
        let limits = &state.config.rate_limit;
        api = api.route_layer(from_fn_with_state(
            limiter.with_policy(RateLimitPolicy::standard(limits)),
            enforce,
        ));
        lookup = lookup.route_layer(from_fn_with_state(
            limiter.with_policy(RateLimitPolicy::lookup(limits)),
            enforce,
        ));
    }

    api.merge(lookup)
}

/// Path ids are parsed here so a malformed id gets the standard error body.
pub(crate) fn parse_id(raw: &str, name: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::invalid_request(format!("{} must be a UUID", name)))
}
