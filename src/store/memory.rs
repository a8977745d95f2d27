use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::{
    Catalog, ConcertCatalog, HeldSeat, Hold, HoldChange, HoldStatus, SeatMap, SeatMapEntry,
    SeatStatus,
};
use crate::store::{AcquireOutcome, ApplyOutcome, HoldDraft, HoldStore, StoreError};

/// In-process lock table.
///
/// A single mutex guards the catalog, every hold, the seat → holder index and
/// the reservation-number index. Each operation runs its whole
/// check-and-write inside one critical section with no await points, so two
/// callers can never both observe a seat as free.
#[derive(Default)]
pub struct MemoryHoldStore {
    tables: Mutex<Tables>,
}

#[derive(Default)]
struct Tables {
    concerts: HashMap<Uuid, ConcertCatalog>,
    holds: HashMap<Uuid, Hold>,
    /// seat id -> hold currently holding it (pending or confirmed).
    claims: HashMap<Uuid, Uuid>,
    reservation_numbers: HashMap<String, Uuid>,
}

impl MemoryHoldStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_catalog(catalog: Catalog) -> Self {
        let store = Self::new();
        store.load_catalog(catalog);
        store
    }

    /// Replaces the catalog. Existing holds keep the prices they captured.
    pub fn load_catalog(&self, catalog: Catalog) {
        let mut tables = self.lock();
        tables.concerts = catalog
            .concerts
            .into_iter()
            .map(|entry| (entry.concert.id, entry))
            .collect();
        info!("Catalog loaded: {} concerts", tables.concerts.len());
    }

    /// Number of holds currently retained, in any state.
    pub fn len(&self) -> usize {
        self.lock().holds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Tables {
    fn capture_seats(&self, concert_id: Uuid, seat_ids: &[Uuid]) -> Result<Vec<HeldSeat>, Vec<Uuid>> {
        let Some(entry) = self.concerts.get(&concert_id) else {
            return Err(seat_ids.to_vec());
        };

        let mut captured = Vec::with_capacity(seat_ids.len());
        let mut unknown = Vec::new();
        for seat_id in seat_ids {
            let seat = entry.seats.iter().find(|s| s.id == *seat_id);
            let category = seat.and_then(|s| entry.categories.iter().find(|c| c.id == s.category_id));
            match (seat, category) {
                (Some(seat), Some(category)) => captured.push(HeldSeat::capture(seat, category)),
                _ => unknown.push(*seat_id),
            }
        }

        if unknown.is_empty() {
            Ok(captured)
        } else {
            Err(unknown)
        }
    }

    fn release_claims(&mut self, hold_id: Uuid) {
        let Some(hold) = self.holds.get(&hold_id) else { return };
        for seat_id in hold.seat_ids() {
            if self.claims.get(&seat_id) == Some(&hold_id) {
                self.claims.remove(&seat_id);
            }
        }
    }

    /// Expires a lapsed pending hold and frees its seats.
    fn expire_lapsed(&mut self, hold_id: Uuid, now: DateTime<Utc>) -> Option<Hold> {
        let hold = self.holds.get_mut(&hold_id)?;
        if hold.apply(HoldChange::Expire, now).is_err() {
            return None;
        }
        let expired = hold.clone();
        self.release_claims(hold_id);
        Some(expired)
    }

    fn seat_status(&self, seat_id: Uuid, now: DateTime<Utc>) -> SeatStatus {
        let holder = self.claims.get(&seat_id).and_then(|id| self.holds.get(id));
        match holder {
            Some(hold) if hold.status == HoldStatus::Confirmed => SeatStatus::Sold,
            Some(hold) if hold.is_live(now) => SeatStatus::OnHold,
            _ => SeatStatus::Available,
        }
    }
}

#[async_trait]
impl HoldStore for MemoryHoldStore {
    async fn acquire(&self, draft: HoldDraft, now: DateTime<Utc>) -> Result<AcquireOutcome, StoreError> {
        let mut tables = self.lock();

        let seats = match tables.capture_seats(draft.concert_id, &draft.seat_ids) {
            Ok(seats) => seats,
            Err(unknown) => return Ok(AcquireOutcome::UnknownSeats(unknown)),
        };

        let mut conflicts = Vec::new();
        let mut lapsed = Vec::new();
        for seat_id in &draft.seat_ids {
            let Some(holder) = tables.claims.get(seat_id).copied() else { continue };
            match tables.holds.get(&holder) {
                Some(hold) if hold.claims_seats(now) => conflicts.push(*seat_id),
                _ => lapsed.push(holder),
            }
        }

        for holder in lapsed {
            if tables.expire_lapsed(holder, now).is_some() {
                debug!("Hold {} expired lazily on acquire", holder);
            }
        }

        if !conflicts.is_empty() {
            return Ok(AcquireOutcome::Conflict(conflicts));
        }

        let hold = Hold::new(draft.hold_id, draft.concert_id, draft.user_id, seats, now, draft.ttl);
        for seat_id in &draft.seat_ids {
            tables.claims.insert(*seat_id, hold.id);
        }
        tables.holds.insert(hold.id, hold.clone());
        Ok(AcquireOutcome::Acquired(hold))
    }

    async fn hold(&self, hold_id: Uuid) -> Result<Option<Hold>, StoreError> {
        Ok(self.lock().holds.get(&hold_id).cloned())
    }

    async fn apply(&self, hold_id: Uuid, change: HoldChange, now: DateTime<Utc>) -> Result<ApplyOutcome, StoreError> {
        let mut tables = self.lock();

        if let HoldChange::Confirm { reservation_number, .. } = &change {
            if tables.reservation_numbers.contains_key(reservation_number) {
                return Ok(ApplyOutcome::DuplicateReservationNumber);
            }
        }

        let Some(hold) = tables.holds.get_mut(&hold_id) else {
            return Ok(ApplyOutcome::NotFound);
        };
        let result = hold.apply(change, now);
        let snapshot = hold.clone();

        match snapshot.status {
            HoldStatus::Cancelled | HoldStatus::Expired => tables.release_claims(hold_id),
            HoldStatus::Confirmed => {
                if let Some(confirmation) = &snapshot.confirmation {
                    tables
                        .reservation_numbers
                        .insert(confirmation.reservation_number.clone(), hold_id);
                }
            }
            HoldStatus::Pending => {}
        }

        Ok(match result {
            Ok(()) => ApplyOutcome::Applied(snapshot),
            Err(error) => ApplyOutcome::Rejected { hold: snapshot, error },
        })
    }

    async fn expire_due(&self, now: DateTime<Utc>) -> Result<Vec<Hold>, StoreError> {
        let mut tables = self.lock();
        let due: Vec<Uuid> = tables
            .holds
            .values()
            .filter(|h| h.status == HoldStatus::Pending && h.is_lapsed(now))
            .map(|h| h.id)
            .collect();

        Ok(due
            .into_iter()
            .filter_map(|hold_id| tables.expire_lapsed(hold_id, now))
            .collect())
    }

    async fn purge_closed(&self, closed_before: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut tables = self.lock();
        let before = tables.holds.len();
        // claims were released when these holds closed
        tables.holds.retain(|_, hold| {
            let closed = matches!(hold.status, HoldStatus::Cancelled | HoldStatus::Expired);
            !(closed && hold.closed_at.is_some_and(|at| at <= closed_before))
        });
        Ok(before - tables.holds.len())
    }

    async fn hold_by_reservation_number(&self, reservation_number: &str) -> Result<Option<Hold>, StoreError> {
        let tables = self.lock();
        Ok(tables
            .reservation_numbers
            .get(reservation_number)
            .and_then(|id| tables.holds.get(id))
            .cloned())
    }

    async fn seat_map(&self, concert_id: Uuid, now: DateTime<Utc>) -> Result<Option<SeatMap>, StoreError> {
        let tables = self.lock();
        let Some(entry) = tables.concerts.get(&concert_id) else {
            return Ok(None);
        };

        let seats = entry
            .seats
            .iter()
            .map(|seat| SeatMapEntry {
                id: seat.id,
                seat_label: seat.label.clone(),
                category_id: seat.category_id,
                status: tables.seat_status(seat.id, now),
                row: seat.row,
                column: seat.column,
            })
            .collect();

        Ok(Some(SeatMap {
            concert_id,
            concert_title: entry.concert.title.clone(),
            categories: entry.categories.clone(),
            seats,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Concert, Seat, SeatCategory};
    use chrono::Duration;

    fn catalog(concert_id: Uuid, seat_ids: &[Uuid]) -> Catalog {
        let category = SeatCategory {
            id: Uuid::new_v4(),
            concert_id,
            name: "VIP".to_string(),
            display_color: "#ff0000".to_string(),
            price: 150_000,
        };
        let seats = seat_ids
            .iter()
            .enumerate()
            .map(|(i, id)| Seat {
                id: *id,
                concert_id,
                category_id: category.id,
                label: format!("A{}", i + 1),
                row: 0,
                column: i as i32,
            })
            .collect();
        Catalog {
            concerts: vec![ConcertCatalog {
                concert: Concert { id: concert_id, title: "Night Show".to_string() },
                categories: vec![category],
                seats,
            }],
        }
    }

    fn draft(concert_id: Uuid, seat_ids: &[Uuid]) -> HoldDraft {
        let mut seat_ids = seat_ids.to_vec();
        seat_ids.sort();
        HoldDraft {
            hold_id: Uuid::new_v4(),
            concert_id,
            seat_ids,
            user_id: None,
            ttl: Duration::minutes(10),
        }
    }

    #[tokio::test]
    async fn lapsed_claims_are_reclaimed_on_acquire() {
        let concert_id = Uuid::new_v4();
        let seats: Vec<Uuid> = (0..2).map(|_| Uuid::new_v4()).collect();
        let store = MemoryHoldStore::with_catalog(catalog(concert_id, &seats));
        let now = Utc::now();

        let first = match store.acquire(draft(concert_id, &seats), now).await.unwrap() {
            AcquireOutcome::Acquired(hold) => hold,
            other => panic!("unexpected outcome {:?}", other),
        };

        let later = now + Duration::minutes(10);
        let outcome = store.acquire(draft(concert_id, &seats[..1]), later).await.unwrap();
        assert!(matches!(outcome, AcquireOutcome::Acquired(_)));

        let first = store.hold(first.id).await.unwrap().unwrap();
        assert_eq!(first.status, HoldStatus::Expired);
        // The lapsed hold released both seats, not only the one re-acquired.
        let map = store.seat_map(concert_id, later).await.unwrap().unwrap();
        let free = map.seats.iter().filter(|s| s.status == SeatStatus::Available).count();
        assert_eq!(free, 1);
    }

    #[tokio::test]
    async fn unknown_concert_reports_every_seat() {
        let store = MemoryHoldStore::new();
        let seat = Uuid::new_v4();
        let outcome = store.acquire(draft(Uuid::new_v4(), &[seat]), Utc::now()).await.unwrap();
        match outcome {
            AcquireOutcome::UnknownSeats(unknown) => assert_eq!(unknown, vec![seat]),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn duplicate_reservation_number_is_refused_without_writing() {
        let concert_id = Uuid::new_v4();
        let seats: Vec<Uuid> = (0..2).map(|_| Uuid::new_v4()).collect();
        let store = MemoryHoldStore::with_catalog(catalog(concert_id, &seats));
        let now = Utc::now();

        let mut ids = Vec::new();
        for seat in &seats {
            match store.acquire(draft(concert_id, &[*seat]), now).await.unwrap() {
                AcquireOutcome::Acquired(hold) => ids.push(hold.id),
                other => panic!("unexpected outcome {:?}", other),
            }
        }

        let confirm = || HoldChange::Confirm {
            reservation_number: "R261018ABCDEFG".to_string(),
            booker: crate::models::BookerInfo {
                name: "Lee".to_string(),
                email: "lee@example.com".to_string(),
                phone: "01011112222".to_string(),
            },
            user_id: None,
        };

        assert!(matches!(store.apply(ids[0], confirm(), now).await.unwrap(), ApplyOutcome::Applied(_)));
        assert!(matches!(
            store.apply(ids[1], confirm(), now).await.unwrap(),
            ApplyOutcome::DuplicateReservationNumber
        ));
        let second = store.hold(ids[1]).await.unwrap().unwrap();
        assert_eq!(second.status, HoldStatus::Pending);
    }

    #[tokio::test]
    async fn seat_map_reflects_claims() {
        let concert_id = Uuid::new_v4();
        let seats: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        let store = MemoryHoldStore::with_catalog(catalog(concert_id, &seats));
        let now = Utc::now();

        let sold = match store.acquire(draft(concert_id, &seats[..1]), now).await.unwrap() {
            AcquireOutcome::Acquired(hold) => hold,
            other => panic!("unexpected outcome {:?}", other),
        };
        store
            .apply(
                sold.id,
                HoldChange::Confirm {
                    reservation_number: "R261018SOLD001".to_string(),
                    booker: crate::models::BookerInfo {
                        name: "Park".to_string(),
                        email: "park@example.com".to_string(),
                        phone: "01033334444".to_string(),
                    },
                    user_id: None,
                },
                now,
            )
            .await
            .unwrap();
        store.acquire(draft(concert_id, &seats[1..2]), now).await.unwrap();

        let map = store.seat_map(concert_id, now).await.unwrap().unwrap();
        let status_of = |id: Uuid| map.seats.iter().find(|s| s.id == id).unwrap().status;
        assert_eq!(status_of(seats[0]), SeatStatus::Sold);
        assert_eq!(status_of(seats[1]), SeatStatus::OnHold);
        assert_eq!(status_of(seats[2]), SeatStatus::Available);
        assert_eq!(map.concert_title, "Night Show");
    }
}
