use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use std::sync::Arc;

use super::parse_id;
use crate::error::ApiError;
use crate::models::ConfirmedOrder;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/orders/{order_id}", get(get_order))
}

// GET /api/orders/{order_id}
async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<String>,
) -> Result<Json<ConfirmedOrder>, ApiError> {
    let order = state.holds.order(parse_id(&order_id, "orderId")?).await?;
    Ok(Json(order))
}
