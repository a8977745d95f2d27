//! Hold manager: the entry point for every seat-hold operation.
//!
//! Validation that needs no shared state (seat count, empty selection) runs
//! before the store is touched. Everything else is delegated to the
//! [`HoldStore`], which performs each check-and-write atomically.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::HoldsConfig;
use crate::models::{
    BookerInfo, ConfirmedOrder, Hold, HoldChange, HoldStatus, ReservationNumber, SeatMap,
    TransitionError,
};
use crate::services::clock::Clock;
use crate::store::{AcquireOutcome, ApplyOutcome, HoldDraft, HoldStore, StoreError};

const RESERVATION_NUMBER_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, Copy)]
pub struct HoldPolicy {
    pub ttl: Duration,
    pub max_seats: usize,
    /// Age after closing at which cancelled and expired holds are dropped.
    pub retention: Duration,
}

impl Default for HoldPolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::minutes(10),
            max_seats: 4,
            retention: Duration::hours(1),
        }
    }
}

impl From<&HoldsConfig> for HoldPolicy {
    fn from(config: &HoldsConfig) -> Self {
        Self {
            ttl: Duration::minutes(config.ttl_minutes),
            max_seats: config.max_seats,
            retention: Duration::minutes(config.retention_minutes),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HoldError {
    #[error("at least one seat must be selected")]
    EmptySelection,
    #[error("{requested} seats requested, at most {max} allowed per hold")]
    LimitExceeded { requested: usize, max: usize },
    #[error("seats not found for concert {concert_id}: {seat_ids:?}")]
    SeatNotFound { concert_id: Uuid, seat_ids: Vec<Uuid> },
    #[error("seats already held or sold: {0:?}")]
    Conflict(Vec<Uuid>),
    #[error("hold {0} not found")]
    HoldNotFound(Uuid),
    #[error("order {0} not found")]
    OrderNotFound(Uuid),
    #[error("reservation {0} not found")]
    ReservationNotFound(String),
    #[error("concert {0} not found")]
    ConcertNotFound(Uuid),
    #[error("concert {0} has no seats")]
    SeatsNotFound(Uuid),
    #[error("hold {0} has expired")]
    Expired(Uuid),
    #[error("hold {hold_id} is {status}")]
    InvalidState { hold_id: Uuid, status: HoldStatus },
    #[error("contact does not match the reservation")]
    ContactMismatch,
    #[error("no unique reservation number after {0} attempts")]
    ReservationNumberExhausted(usize),
    #[error(transparent)]
    Storage(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub struct HoldRequest {
    pub concert_id: Uuid,
    pub seat_ids: Vec<Uuid>,
    pub user_id: Option<Uuid>,
}

#[derive(Clone)]
pub struct HoldManager {
    store: Arc<dyn HoldStore>,
    clock: Arc<dyn Clock>,
    policy: HoldPolicy,
}

impl HoldManager {
    pub fn new(store: Arc<dyn HoldStore>, clock: Arc<dyn Clock>, policy: HoldPolicy) -> Self {
        Self { store, clock, policy }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Claims every requested seat or none of them.
    pub async fn acquire(&self, request: HoldRequest) -> Result<Hold, HoldError> {
        let mut seat_ids = request.seat_ids;
        seat_ids.sort();
        seat_ids.dedup();

        if seat_ids.is_empty() {
            return Err(HoldError::EmptySelection);
        }
        if seat_ids.len() > self.policy.max_seats {
            return Err(HoldError::LimitExceeded {
                requested: seat_ids.len(),
                max: self.policy.max_seats,
            });
        }

        let draft = HoldDraft {
            hold_id: Uuid::new_v4(),
            concert_id: request.concert_id,
            seat_ids,
            user_id: request.user_id,
            ttl: self.policy.ttl,
        };

        match self.store.acquire(draft, self.clock.now()).await? {
            AcquireOutcome::Acquired(hold) => {
                info!(
                    "Hold {} created for concert {}: {} seats, total {}, expires {}",
                    hold.id,
                    hold.concert_id,
                    hold.seats.len(),
                    hold.total_price,
                    hold.expires_at
                );
                Ok(hold)
            }
            AcquireOutcome::UnknownSeats(seat_ids) => {
                warn!("Unknown seats for concert {}: {:?}", request.concert_id, seat_ids);
                Err(HoldError::SeatNotFound {
                    concert_id: request.concert_id,
                    seat_ids,
                })
            }
            AcquireOutcome::Conflict(seat_ids) => {
                warn!("Seat hold conflict for concert {}: {:?}", request.concert_id, seat_ids);
                Err(HoldError::Conflict(seat_ids))
            }
        }
    }

    /// Cancels a live pending hold and frees its seats at once.
    pub async fn release(&self, hold_id: Uuid) -> Result<Hold, HoldError> {
        match self.store.apply(hold_id, HoldChange::Cancel, self.clock.now()).await? {
            ApplyOutcome::Applied(hold) => {
                info!("Hold {} released, {} seats freed", hold.id, hold.seats.len());
                Ok(hold)
            }
            ApplyOutcome::NotFound => Err(HoldError::HoldNotFound(hold_id)),
            ApplyOutcome::Rejected { hold, error } => {
                warn!("Release of hold {} rejected: {}", hold_id, error);
                Err(HoldError::InvalidState {
                    hold_id,
                    status: hold.status,
                })
            }
            ApplyOutcome::DuplicateReservationNumber => Err(StoreError::Corrupt(format!(
                "reservation number clash while releasing hold {}",
                hold_id
            ))
            .into()),
        }
    }

    /// Turns a live pending hold into an order. The total is the one captured
    /// when the hold was taken.
    pub async fn confirm(
        &self,
        hold_id: Uuid,
        booker: BookerInfo,
        user_id: Option<Uuid>,
    ) -> Result<ConfirmedOrder, HoldError> {
        for attempt in 1..=RESERVATION_NUMBER_ATTEMPTS {
            let now = self.clock.now();
            let reservation_number = ReservationNumber::generate(now, &mut rand::thread_rng());
            let change = HoldChange::Confirm {
                reservation_number,
                booker: booker.clone(),
                user_id,
            };

            match self.store.apply(hold_id, change, now).await? {
                ApplyOutcome::Applied(hold) => {
                    let order = ConfirmedOrder::from_hold(hold).ok_or_else(|| {
                        StoreError::Corrupt(format!("hold {} confirmed without confirmation", hold_id))
                    })?;
                    info!(
                        "Hold {} confirmed as reservation {}, total {}",
                        hold_id, order.reservation_number, order.total_price
                    );
                    return Ok(order);
                }
                ApplyOutcome::NotFound => return Err(HoldError::HoldNotFound(hold_id)),
                ApplyOutcome::Rejected { hold, error }
                    if error == TransitionError::Expired || hold.status == HoldStatus::Expired =>
                {
                    warn!("Hold {} expired before confirmation", hold_id);
                    return Err(HoldError::Expired(hold_id));
                }
                ApplyOutcome::Rejected { hold, error } => {
                    warn!("Confirmation of hold {} rejected: {}", hold_id, error);
                    return Err(HoldError::InvalidState {
                        hold_id,
                        status: hold.status,
                    });
                }
                ApplyOutcome::DuplicateReservationNumber => {
                    debug!("Reservation number clash for hold {} (attempt {})", hold_id, attempt);
                }
            }
        }
        Err(HoldError::ReservationNumberExhausted(RESERVATION_NUMBER_ATTEMPTS))
    }

    /// Checks that a hold could be confirmed right now, without changing it.
    pub async fn preview(&self, hold_id: Uuid) -> Result<Hold, HoldError> {
        let hold = self.hold(hold_id).await?;
        match hold.effective_status(self.clock.now()) {
            HoldStatus::Pending => Ok(hold),
            HoldStatus::Expired => Err(HoldError::Expired(hold_id)),
            status => Err(HoldError::InvalidState { hold_id, status }),
        }
    }

    pub async fn hold(&self, hold_id: Uuid) -> Result<Hold, HoldError> {
        self.store
            .hold(hold_id)
            .await?
            .ok_or(HoldError::HoldNotFound(hold_id))
    }

    /// Confirmed order by its internal id.
    pub async fn order(&self, order_id: Uuid) -> Result<ConfirmedOrder, HoldError> {
        let hold = self
            .store
            .hold(order_id)
            .await?
            .ok_or(HoldError::OrderNotFound(order_id))?;

        match hold.effective_status(self.clock.now()) {
            HoldStatus::Confirmed => ConfirmedOrder::from_hold(hold).ok_or(HoldError::OrderNotFound(order_id)),
            HoldStatus::Expired => Err(HoldError::Expired(order_id)),
            status => Err(HoldError::InvalidState {
                hold_id: order_id,
                status,
            }),
        }
    }

    /// Reservation lookup; contacts are compared digits-only.
    pub async fn find(&self, reservation_number: &str, contact: &str) -> Result<ConfirmedOrder, HoldError> {
        let not_found = || HoldError::ReservationNotFound(reservation_number.to_string());

        let hold = self
            .store
            .hold_by_reservation_number(reservation_number)
            .await?
            .ok_or_else(not_found)?;
        let order = ConfirmedOrder::from_hold(hold).ok_or_else(not_found)?;

        if !order.contact_matches(contact) {
            warn!("Contact mismatch for reservation {}", reservation_number);
            return Err(HoldError::ContactMismatch);
        }
        Ok(order)
    }

    pub async fn seat_map(&self, concert_id: Uuid) -> Result<SeatMap, HoldError> {
        let map = self
            .store
            .seat_map(concert_id, self.clock.now())
            .await?
            .ok_or(HoldError::ConcertNotFound(concert_id))?;
        if map.seats.is_empty() {
            return Err(HoldError::SeatsNotFound(concert_id));
        }
        Ok(map)
    }

    /// Expires every lapsed pending hold. Safe to run concurrently with
    /// confirm/release: only holds still pending are touched.
    pub async fn sweep(&self) -> Result<Vec<Hold>, HoldError> {
        Ok(self.store.expire_due(self.clock.now()).await?)
    }

    /// Drops cancelled and expired holds closed longer ago than the retention
    /// window. Confirmed holds are kept.
    pub async fn purge_closed(&self) -> Result<usize, HoldError> {
        let cutoff = self.clock.now() - self.policy.retention;
        Ok(self.store.purge_closed(cutoff).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Catalog, Concert, ConcertCatalog, Seat, SeatCategory};
    use crate::services::clock::ManualClock;
    use crate::store::MemoryHoldStore;
    use async_trait::async_trait;

    struct Fixture {
        manager: HoldManager,
        store: Arc<MemoryHoldStore>,
        clock: Arc<ManualClock>,
        concert_id: Uuid,
        category_id: Uuid,
        seats: Vec<Uuid>,
    }

    fn catalog(concert_id: Uuid, category_id: Uuid, seats: &[Uuid], price: i64) -> Catalog {
        Catalog {
            concerts: vec![ConcertCatalog {
                concert: Concert { id: concert_id, title: "Autumn Live".to_string() },
                categories: vec![SeatCategory {
                    id: category_id,
                    concert_id,
                    name: "R".to_string(),
                    display_color: "#8b5cf6".to_string(),
                    price,
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

    fn fixture() -> Fixture {
        let concert_id = Uuid::new_v4();
        let category_id = Uuid::new_v4();
        let seats: Vec<Uuid> = (0..6).map(|_| Uuid::new_v4()).collect();
        let store = Arc::new(MemoryHoldStore::with_catalog(catalog(concert_id, category_id, &seats, 110_000)));
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let manager = HoldManager::new(store.clone(), clock.clone(), HoldPolicy::default());
        Fixture { manager, store, clock, concert_id, category_id, seats }
    }

    fn request(f: &Fixture, seats: &[Uuid]) -> HoldRequest {
        HoldRequest {
            concert_id: f.concert_id,
            seat_ids: seats.to_vec(),
            user_id: None,
        }
    }

    fn booker() -> BookerInfo {
        BookerInfo {
            name: "Choi".to_string(),
            email: "choi@example.com".to_string(),
            phone: "010-5555-6666".to_string(),
        }
    }

    #[tokio::test]
    async fn acquire_conflict_confirm_then_expired_walkthrough() {
        let f = fixture();
        let (a1, a2, a3) = (f.seats[0], f.seats[1], f.seats[2]);

        let hold = f.manager.acquire(request(&f, &[a1, a2])).await.unwrap();
        assert_eq!(hold.expires_at, f.clock.now() + Duration::minutes(10));

        match f.manager.acquire(request(&f, &[a2, a3])).await {
            Err(HoldError::Conflict(seats)) => assert_eq!(seats, vec![a2]),
            other => panic!("expected conflict, got {:?}", other),
        }
        // nothing partial: A3 is still free
        f.manager.acquire(request(&f, &[a3])).await.unwrap();

        f.clock.advance(Duration::minutes(5));
        let order = f.manager.confirm(hold.id, booker(), None).await.unwrap();
        assert_eq!(order.order_id, hold.id);
        assert_eq!(order.reservation_number.len(), ReservationNumber::LEN);
        assert_eq!(order.total_price, 220_000);

        let late = f.manager.acquire(request(&f, &[f.seats[3]])).await.unwrap();
        f.clock.advance(Duration::minutes(10));
        assert!(matches!(
            f.manager.confirm(late.id, booker(), None).await,
            Err(HoldError::Expired(id)) if id == late.id
        ));
        assert_eq!(f.manager.hold(late.id).await.unwrap().status, HoldStatus::Expired);
    }

    #[tokio::test]
    async fn five_seats_is_limit_exceeded_without_storage() {
        struct UntouchableStore;

        #[async_trait]
        impl HoldStore for UntouchableStore {
            async fn acquire(&self, _: HoldDraft, _: DateTime<Utc>) -> Result<AcquireOutcome, StoreError> {
                panic!("store must not be touched")
            }
            async fn hold(&self, _: Uuid) -> Result<Option<Hold>, StoreError> {
                panic!("store must not be touched")
            }
            async fn apply(&self, _: Uuid, _: HoldChange, _: DateTime<Utc>) -> Result<ApplyOutcome, StoreError> {
                panic!("store must not be touched")
            }
            async fn expire_due(&self, _: DateTime<Utc>) -> Result<Vec<Hold>, StoreError> {
                panic!("store must not be touched")
            }
            async fn purge_closed(&self, _: DateTime<Utc>) -> Result<usize, StoreError> {
                panic!("store must not be touched")
            }
            async fn hold_by_reservation_number(&self, _: &str) -> Result<Option<Hold>, StoreError> {
                panic!("store must not be touched")
            }
            async fn seat_map(&self, _: Uuid, _: DateTime<Utc>) -> Result<Option<SeatMap>, StoreError> {
                panic!("store must not be touched")
            }
        }

        let manager = HoldManager::new(
            Arc::new(UntouchableStore),
            Arc::new(ManualClock::new(Utc::now())),
            HoldPolicy::default(),
        );
        let seat_ids: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
        let result = manager
            .acquire(HoldRequest { concert_id: Uuid::new_v4(), seat_ids, user_id: None })
            .await;
        assert!(matches!(result, Err(HoldError::LimitExceeded { requested: 5, max: 4 })));

        let empty = manager
            .acquire(HoldRequest { concert_id: Uuid::new_v4(), seat_ids: vec![], user_id: None })
            .await;
        assert!(matches!(empty, Err(HoldError::EmptySelection)));
    }

    #[tokio::test]
    async fn duplicate_seat_ids_collapse() {
        let f = fixture();
        let a1 = f.seats[0];
        let hold = f.manager.acquire(request(&f, &[a1, a1, a1, a1, a1])).await.unwrap();
        assert_eq!(hold.seats.len(), 1);
    }

    #[tokio::test]
    async fn seats_of_another_concert_are_not_found() {
        let f = fixture();
        let stranger = Uuid::new_v4();
        match f.manager.acquire(request(&f, &[f.seats[0], stranger])).await {
            Err(HoldError::SeatNotFound { seat_ids, .. }) => assert_eq!(seat_ids, vec![stranger]),
            other => panic!("expected seat not found, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn total_is_captured_at_hold_time() {
        let f = fixture();
        let hold = f.manager.acquire(request(&f, &f.seats[..2])).await.unwrap();
        assert_eq!(hold.total_price, 220_000);

        // catalog price doubles after the hold was taken
        f.store.load_catalog(catalog(f.concert_id, f.category_id, &f.seats, 220_000));

        let order = f.manager.confirm(hold.id, booker(), None).await.unwrap();
        assert_eq!(order.total_price, 220_000);
        assert!(order.seats.iter().all(|s| s.price == 110_000));

        let fresh = f.manager.acquire(request(&f, &f.seats[2..3])).await.unwrap();
        assert_eq!(fresh.total_price, 220_000);
    }

    #[tokio::test]
    async fn release_only_from_live_pending() {
        let f = fixture();
        assert!(matches!(
            f.manager.release(Uuid::new_v4()).await,
            Err(HoldError::HoldNotFound(_))
        ));

        let cancelled = f.manager.acquire(request(&f, &f.seats[..1])).await.unwrap();
        f.manager.release(cancelled.id).await.unwrap();
        assert!(matches!(
            f.manager.release(cancelled.id).await,
            Err(HoldError::InvalidState { status: HoldStatus::Cancelled, .. })
        ));
        // seat is free again straight away
        f.manager.acquire(request(&f, &f.seats[..1])).await.unwrap();

        let confirmed = f.manager.acquire(request(&f, &f.seats[1..2])).await.unwrap();
        f.manager.confirm(confirmed.id, booker(), None).await.unwrap();
        assert!(matches!(
            f.manager.release(confirmed.id).await,
            Err(HoldError::InvalidState { status: HoldStatus::Confirmed, .. })
        ));

        let lapsed = f.manager.acquire(request(&f, &f.seats[2..3])).await.unwrap();
        f.clock.advance(Duration::minutes(11));
        assert!(matches!(
            f.manager.release(lapsed.id).await,
            Err(HoldError::InvalidState { status: HoldStatus::Expired, .. })
        ));
    }

    #[tokio::test]
    async fn confirm_twice_is_invalid_state() {
        let f = fixture();
        let hold = f.manager.acquire(request(&f, &f.seats[..1])).await.unwrap();
        f.manager.confirm(hold.id, booker(), None).await.unwrap();
        assert!(matches!(
            f.manager.confirm(hold.id, booker(), None).await,
            Err(HoldError::InvalidState { status: HoldStatus::Confirmed, .. })
        ));
    }

    #[tokio::test]
    async fn confirm_attaches_caller_when_hold_was_anonymous() {
        let f = fixture();
        let user = Uuid::new_v4();
        let hold = f.manager.acquire(request(&f, &f.seats[..1])).await.unwrap();
        let order = f.manager.confirm(hold.id, booker(), Some(user)).await.unwrap();
        assert_eq!(order.user_id, Some(user));
    }

    #[tokio::test]
    async fn find_normalizes_contact() {
        let f = fixture();
        let hold = f.manager.acquire(request(&f, &f.seats[..1])).await.unwrap();
        let order = f.manager.confirm(hold.id, booker(), None).await.unwrap();

        let found = f.manager.find(&order.reservation_number, "(010) 5555 6666").await.unwrap();
        assert_eq!(found.order_id, hold.id);

        assert!(matches!(
            f.manager.find(&order.reservation_number, "010-0000-0000").await,
            Err(HoldError::ContactMismatch)
        ));
        assert!(matches!(
            f.manager.find("R000000NOPE000", "01055556666").await,
            Err(HoldError::ReservationNotFound(_))
        ));
    }

    #[tokio::test]
    async fn preview_does_not_mutate() {
        let f = fixture();
        let hold = f.manager.acquire(request(&f, &f.seats[..1])).await.unwrap();
        f.manager.preview(hold.id).await.unwrap();

        f.clock.advance(Duration::minutes(10));
        assert!(matches!(f.manager.preview(hold.id).await, Err(HoldError::Expired(_))));
        assert_eq!(f.manager.hold(hold.id).await.unwrap().status, HoldStatus::Pending);
    }

    #[tokio::test]
    async fn order_view_by_status() {
        let f = fixture();
        let pending = f.manager.acquire(request(&f, &f.seats[..1])).await.unwrap();
        assert!(matches!(
            f.manager.order(pending.id).await,
            Err(HoldError::InvalidState { status: HoldStatus::Pending, .. })
        ));

        f.manager.confirm(pending.id, booker(), None).await.unwrap();
        assert_eq!(f.manager.order(pending.id).await.unwrap().order_id, pending.id);

        assert!(matches!(
            f.manager.order(Uuid::new_v4()).await,
            Err(HoldError::OrderNotFound(_))
        ));
    }

    #[tokio::test]
    async fn seat_map_for_unknown_concert() {
        let f = fixture();
        assert!(matches!(
            f.manager.seat_map(Uuid::new_v4()).await,
            Err(HoldError::ConcertNotFound(_))
        ));
        assert_eq!(f.manager.seat_map(f.concert_id).await.unwrap().seats.len(), 6);
    }

    #[tokio::test]
    async fn sweep_expires_only_lapsed() {
        let f = fixture();
        let early = f.manager.acquire(request(&f, &f.seats[..1])).await.unwrap();
        f.clock.advance(Duration::minutes(6));
        let late = f.manager.acquire(request(&f, &f.seats[1..2])).await.unwrap();
        f.clock.advance(Duration::minutes(5));

        let expired = f.manager.sweep().await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, early.id);
        assert_eq!(f.manager.hold(late.id).await.unwrap().status, HoldStatus::Pending);
        assert!(f.manager.sweep().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn purge_drops_closed_holds_after_retention() {
        let f = fixture();
        let released = f.manager.acquire(request(&f, &f.seats[..1])).await.unwrap();
        f.manager.release(released.id).await.unwrap();
        let lapsed = f.manager.acquire(request(&f, &f.seats[1..2])).await.unwrap();
        let kept = f.manager.acquire(request(&f, &f.seats[2..3])).await.unwrap();
        f.manager.confirm(kept.id, booker(), None).await.unwrap();

        f.clock.advance(Duration::minutes(10));
        assert_eq!(f.manager.sweep().await.unwrap().len(), 1);
        assert_eq!(f.manager.purge_closed().await.unwrap(), 0);

        f.clock.advance(Duration::minutes(61));
        assert_eq!(f.manager.purge_closed().await.unwrap(), 2);
        assert!(matches!(f.manager.hold(released.id).await, Err(HoldError::HoldNotFound(_))));
        assert!(matches!(f.manager.hold(lapsed.id).await, Err(HoldError::HoldNotFound(_))));
        assert_eq!(f.manager.hold(kept.id).await.unwrap().status, HoldStatus::Confirmed);
        assert_eq!(f.store.len(), 1);
    }
}
