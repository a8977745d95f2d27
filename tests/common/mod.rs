#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use chrono::{TimeZone, Utc};
use fake::{
    faker::{internet::en::SafeEmail, name::en::Name},
    Fake,
};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use seat_hold::{
    app,
    config::Config,
    middleware::rate_limit::{MemoryRateLimitStore, RateLimitPolicy, RateLimiter},
    models::{BookerInfo, Catalog, Concert, ConcertCatalog, Seat, SeatCategory},
    services::{HoldManager, HoldPolicy, ManualClock},
    store::MemoryHoldStore,
    AppState,
};

pub const SEAT_PRICE: i64 = 110_000;

pub struct Harness {
    pub state: Arc<AppState>,
    pub clock: Arc<ManualClock>,
    pub concert_id: Uuid,
    pub seats: Vec<Uuid>,
}

pub fn catalog(concert_id: Uuid, seats: &[Uuid]) -> Catalog {
    let category_id = Uuid::new_v4();
    Catalog {
        concerts: vec![ConcertCatalog {
            concert: Concert { id: concert_id, title: "Harbour Lights".to_string() },
            categories: vec![SeatCategory {
                id: category_id,
                concert_id,
                name: "S".to_string(),
                display_color: "#3b82f6".to_string(),
                price: SEAT_PRICE,
            }],
            seats: seats
                .iter()
                .enumerate()
                .map(|(i, id)| Seat {
                    id: *id,
                    concert_id,
                    category_id,
                    label: format!("A{}", i + 1),
                    row: 0,
                    column: i as i32,
                })
                .collect(),
        }],
    }
}

/// Memory-backed state with a manual clock; rate limiting follows `rate_limiting`.
pub fn harness(seat_count: usize, rate_limiting: bool) -> Harness {
    let concert_id = Uuid::new_v4();
    let seats: Vec<Uuid> = (0..seat_count).map(|_| Uuid::new_v4()).collect();
    let store = Arc::new(MemoryHoldStore::with_catalog(catalog(concert_id, &seats)));
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 10, 18, 19, 0, 0).unwrap()));

    let config = Config::from_lookup(|_| None).unwrap();
    let holds = HoldManager::new(store, clock.clone(), HoldPolicy::from(&config.holds));
    let rate_limiter = rate_limiting.then(|| {
        RateLimiter::new(
            Arc::new(MemoryRateLimitStore::new()),
            RateLimitPolicy::standard(&config.rate_limit),
        )
    });

    Harness {
        state: AppState::from_parts(config, holds, rate_limiter),
        clock,
        concert_id,
        seats,
    }
}

impl Harness {
    pub fn router(&self) -> Router {
        app(self.state.clone())
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        (status, body)
    }

    pub async fn post_json(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send(
            Request::post(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Request::get(uri).body(Body::empty()).unwrap()).await
    }

    pub async fn delete(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Request::delete(uri).body(Body::empty()).unwrap()).await
    }

    pub async fn create_hold(&self, seats: &[Uuid]) -> (StatusCode, Value) {
        self.post_json("/api/holds", json!({ "concertId": self.concert_id, "seatIds": seats }))
            .await
    }
}

/// Booker details with a generated name and email and a valid mobile number.
pub fn booker_info() -> BookerInfo {
    let name: String = Name().fake();
    let email: String = SafeEmail().fake();
    let middle: u32 = (1000..10_000).fake();
    let last: u32 = (1000..10_000).fake();
    BookerInfo {
        name: name.chars().take(50).collect(),
        email,
        phone: format!("010-{}-{}", middle, last),
    }
}

/// [`booker_info`] as a confirm request body.
pub fn booker() -> Value {
    let info = booker_info();
    json!({
        "bookerName": info.name,
        "bookerEmail": info.email,
        "bookerPhone": info.phone,
    })
}
