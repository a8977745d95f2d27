use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use std::sync::Arc;

use super::parse_id;
use crate::error::ApiError;
use crate::models::SeatMap;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/concerts/{concert_id}/seats", get(get_seat_map))
}

// GET /api/concerts/{concert_id}/seats
async fn get_seat_map(
    State(state): State<Arc<AppState>>,
    Path(concert_id): Path<String>,
) -> Result<Json<SeatMap>, ApiError> {
    let map = state.holds.seat_map(parse_id(&concert_id, "concertId")?).await?;
    Ok(Json(map))
}
