use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::SeatCategory;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Seat {
    pub id: Uuid,
    pub concert_id: Uuid,
    pub category_id: Uuid,
    pub label: String,
    pub row: i32,
    pub column: i32,
}

/// A seat as captured into a hold: label, category and the price at hold time.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeldSeat {
    #[serde(rename = "id")]
    pub seat_id: Uuid,
    pub seat_label: String,
    pub category_name: String,
    pub price: i64,
}

impl HeldSeat {
    pub fn capture(seat: &Seat, category: &SeatCategory) -> Self {
        Self {
            seat_id: seat.id,
            seat_label: seat.label.clone(),
            category_name: category.name.clone(),
            price: category.price,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeatStatus {
    Available,
    OnHold,
    Sold,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatMapEntry {
    pub id: Uuid,
    pub seat_label: String,
    pub category_id: Uuid,
    pub status: SeatStatus,
    pub row: i32,
    pub column: i32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatMap {
    pub concert_id: Uuid,
    pub concert_title: String,
    pub categories: Vec<SeatCategory>,
    pub seats: Vec<SeatMapEntry>,
}
