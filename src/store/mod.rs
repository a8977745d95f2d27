//! Storage for holds.
//!
//! The store is the only shared mutable resource. Implementations must run
//! the check-and-reserve of [`HoldStore::acquire`] and the read-modify-write
//! of [`HoldStore::apply`] as single indivisible units; the state machine
//! itself lives in [`crate::models::Hold::apply`].

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::models::{Hold, HoldChange, SeatMap, TransitionError};

pub use memory::MemoryHoldStore;
pub use postgres::PgHoldStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Everything needed to create a hold; seats are resolved by the store.
#[derive(Debug, Clone)]
pub struct HoldDraft {
    pub hold_id: Uuid,
    pub concert_id: Uuid,
    /// Distinct and sorted ascending.
    pub seat_ids: Vec<Uuid>,
    pub user_id: Option<Uuid>,
    pub ttl: Duration,
}

#[derive(Debug)]
pub enum AcquireOutcome {
    Acquired(Hold),
    /// Seats that do not exist or belong to another concert.
    UnknownSeats(Vec<Uuid>),
    /// Seats still claimed by a live hold or a confirmed order.
    Conflict(Vec<Uuid>),
}

#[derive(Debug)]
pub enum ApplyOutcome {
    Applied(Hold),
    NotFound,
    /// The state machine refused the change. `hold` is the persisted state,
    /// which may differ from before (a lapsed hold gets expired).
    Rejected { hold: Hold, error: TransitionError },
    /// Another order already carries the reservation number; nothing was written.
    DuplicateReservationNumber,
}

#[async_trait]
pub trait HoldStore: Send + Sync {
    async fn acquire(&self, draft: HoldDraft, now: DateTime<Utc>) -> Result<AcquireOutcome, StoreError>;

    async fn hold(&self, hold_id: Uuid) -> Result<Option<Hold>, StoreError>;

    async fn apply(&self, hold_id: Uuid, change: HoldChange, now: DateTime<Utc>) -> Result<ApplyOutcome, StoreError>;

    /// Expires every pending hold whose TTL has lapsed and returns them.
    async fn expire_due(&self, now: DateTime<Utc>) -> Result<Vec<Hold>, StoreError>;

    /// Deletes cancelled and expired holds closed at or before `closed_before`.
    /// Returns how many were removed.
    async fn purge_closed(&self, closed_before: DateTime<Utc>) -> Result<usize, StoreError>;

    async fn hold_by_reservation_number(&self, reservation_number: &str) -> Result<Option<Hold>, StoreError>;

    /// `None` when the concert is unknown.
    async fn seat_map(&self, concert_id: Uuid, now: DateTime<Utc>) -> Result<Option<SeatMap>, StoreError>;
}
