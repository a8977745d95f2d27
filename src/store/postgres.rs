use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{
    BookerInfo, Concert, Confirmation, HeldSeat, Hold, HoldChange, HoldStatus, SeatCategory,
    SeatMap, SeatMapEntry, SeatStatus,
};
use crate::store::{AcquireOutcome, ApplyOutcome, HoldDraft, HoldStore, StoreError};

const UNIQUE_VIOLATION: &str = "23505";

const HOLD_COLUMNS: &str = "id, concert_id, user_id, status, total_price, created_at, expires_at, \
     reservation_number, booker_name, booker_email, booker_phone, confirmed_at, closed_at";

/// Postgres-backed store.
///
/// `acquire` locks the requested seat rows `FOR UPDATE` in ascending id
/// order, so overlapping requests serialize per seat without deadlocking.
/// Hold rows are likewise only ever locked in ascending id order, and never
/// before seat rows.
/// The partial unique index `hold_seats_one_active` is the last line: a
/// second active row for a seat cannot be committed.
#[derive(Clone)]
pub struct PgHoldStore {
    pool: PgPool,
}

#[derive(FromRow)]
struct HoldRow {
    id: Uuid,
    concert_id: Uuid,
    user_id: Option<Uuid>,
    status: String,
    total_price: i64,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    reservation_number: Option<String>,
    booker_name: Option<String>,
    booker_email: Option<String>,
    booker_phone: Option<String>,
    confirmed_at: Option<DateTime<Utc>>,
    closed_at: Option<DateTime<Utc>>,
}

impl HoldRow {
    fn into_hold(self, seats: Vec<HeldSeat>) -> Result<Hold, StoreError> {
        let status: HoldStatus = self.status.parse().map_err(StoreError::Corrupt)?;

        let confirmation = match (self.reservation_number, self.confirmed_at) {
            (Some(reservation_number), Some(confirmed_at)) => Some(Confirmation {
                reservation_number,
                booker: BookerInfo {
                    name: self.booker_name.unwrap_or_default(),
                    email: self.booker_email.unwrap_or_default(),
                    phone: self.booker_phone.unwrap_or_default(),
                },
                confirmed_at,
            }),
            _ => None,
        };
        if status == HoldStatus::Confirmed && confirmation.is_none() {
            return Err(StoreError::Corrupt(format!(
                "hold {} is confirmed without reservation data",
                self.id
            )));
        }

        Ok(Hold {
            id: self.id,
            concert_id: self.concert_id,
            user_id: self.user_id,
            seats,
            total_price: self.total_price,
            status,
            created_at: self.created_at,
            expires_at: self.expires_at,
            confirmation,
            closed_at: self.closed_at,
        })
    }
}

#[derive(FromRow)]
struct HoldSeatRow {
    hold_id: Uuid,
    #[sqlx(flatten)]
    seat: HeldSeat,
}

#[derive(FromRow)]
struct SeatMapRow {
    id: Uuid,
    seat_label: String,
    category_id: Uuid,
    row_index: i32,
    column_index: i32,
    status: String,
}

fn parse_seat_status(raw: &str) -> Result<SeatStatus, StoreError> {
    match raw {
        "AVAILABLE" => Ok(SeatStatus::Available),
        "ON_HOLD" => Ok(SeatStatus::OnHold),
        "SOLD" => Ok(SeatStatus::Sold),
        other => Err(StoreError::Corrupt(format!("unknown seat status '{}'", other))),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|e| e.code())
        .map(|code| code == UNIQUE_VIOLATION)
        .unwrap_or(false)
}

impl PgHoldStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn seats_for(
        tx: &mut Transaction<'_, Postgres>,
        hold_ids: &[Uuid],
    ) -> Result<Vec<HoldSeatRow>, StoreError> {
        let rows = sqlx::query_as::<_, HoldSeatRow>(
            "SELECT hold_id, seat_id, seat_label, category_name, price
             FROM hold_seats
             WHERE hold_id = ANY($1)
             ORDER BY hold_id, seat_id",
        )
        .bind(hold_ids)
        .fetch_all(&mut **tx)
        .await?;
        Ok(rows)
    }

    async fn assemble(
        tx: &mut Transaction<'_, Postgres>,
        rows: Vec<HoldRow>,
    ) -> Result<Vec<Hold>, StoreError> {
        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let mut seats = Self::seats_for(tx, &ids).await?;

        rows.into_iter()
            .map(|row| {
                let own: Vec<HeldSeat> = seats
                    .iter()
                    .filter(|s| s.hold_id == row.id)
                    .map(|s| s.seat.clone())
                    .collect();
                seats.retain(|s| s.hold_id != row.id);
                row.into_hold(own)
            })
            .collect()
    }

    async fn fetch_one(
        tx: &mut Transaction<'_, Postgres>,
        row: Option<HoldRow>,
    ) -> Result<Option<Hold>, StoreError> {
        match row {
            Some(row) => Ok(Self::assemble(tx, vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    /// Locks every lapsed pending hold in ascending id order. Lazy expiry on
    /// acquire locks its subset in the same order, so the two cannot deadlock.
    async fn lock_lapsed(tx: &mut Transaction<'_, Postgres>, now: DateTime<Utc>) -> Result<Vec<Uuid>, StoreError> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM holds
             WHERE status = 'pending' AND expires_at <= $1
             ORDER BY id
             FOR UPDATE",
        )
        .bind(now)
        .fetch_all(&mut **tx)
        .await?;
        Ok(ids)
    }

    /// Marks already-locked holds expired and frees their seats.
    async fn close_expired(
        tx: &mut Transaction<'_, Postgres>,
        hold_ids: &[Uuid],
        now: DateTime<Utc>,
    ) -> Result<Vec<HoldRow>, StoreError> {
        let rows = sqlx::query_as::<_, HoldRow>(&format!(
            "UPDATE holds SET status = 'expired', closed_at = $2
             WHERE id = ANY($1) AND status = 'pending'
             RETURNING {}",
            HOLD_COLUMNS
        ))
        .bind(hold_ids)
        .bind(now)
        .fetch_all(&mut **tx)
        .await?;

        let closed: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        sqlx::query("UPDATE hold_seats SET is_active = FALSE WHERE hold_id = ANY($1)")
            .bind(&closed)
            .execute(&mut **tx)
            .await?;
        Ok(rows)
    }

    async fn write_hold(tx: &mut Transaction<'_, Postgres>, hold: &Hold) -> Result<(), sqlx::Error> {
        let confirmation = hold.confirmation.as_ref();
        sqlx::query(
            "UPDATE holds
             SET status = $2, user_id = $3, reservation_number = $4, booker_name = $5,
                 booker_email = $6, booker_phone = $7, confirmed_at = $8, closed_at = $9
             WHERE id = $1",
        )
        .bind(hold.id)
        .bind(hold.status.as_str())
        .bind(hold.user_id)
        .bind(confirmation.map(|c| c.reservation_number.as_str()))
        .bind(confirmation.map(|c| c.booker.name.as_str()))
        .bind(confirmation.map(|c| c.booker.email.as_str()))
        .bind(confirmation.map(|c| c.booker.phone.as_str()))
        .bind(confirmation.map(|c| c.confirmed_at))
        .bind(hold.closed_at)
        .execute(&mut **tx)
        .await?;

        if matches!(hold.status, HoldStatus::Cancelled | HoldStatus::Expired) {
            sqlx::query("UPDATE hold_seats SET is_active = FALSE WHERE hold_id = $1")
                .bind(hold.id)
                .execute(&mut **tx)
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl HoldStore for PgHoldStore {
    async fn acquire(&self, draft: HoldDraft, now: DateTime<Utc>) -> Result<AcquireOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        // 1) Lock the seats in a global order and capture their prices
        let seats = sqlx::query_as::<_, HeldSeat>(
            "SELECT s.id AS seat_id, s.label AS seat_label, c.name AS category_name, c.price
             FROM seats s
             JOIN seat_categories c ON c.id = s.category_id
             WHERE s.concert_id = $1 AND s.id = ANY($2)
             ORDER BY s.id
             FOR UPDATE OF s",
        )
        .bind(draft.concert_id)
        .bind(&draft.seat_ids)
        .fetch_all(&mut *tx)
        .await?;

        if seats.len() != draft.seat_ids.len() {
            let unknown = draft
                .seat_ids
                .iter()
                .filter(|id| !seats.iter().any(|s| s.seat_id == **id))
                .copied()
                .collect();
            tx.rollback().await?;
            return Ok(AcquireOutcome::UnknownSeats(unknown));
        }

        // 2) Lazily expire lapsed holds sitting on these seats
        let lapsed = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM holds
             WHERE status = 'pending' AND expires_at <= $2
               AND id IN (SELECT hold_id FROM hold_seats WHERE seat_id = ANY($1) AND is_active)
             ORDER BY id
             FOR UPDATE",
        )
        .bind(&draft.seat_ids)
        .bind(now)
        .fetch_all(&mut *tx)
        .await?;
        if !lapsed.is_empty() {
            Self::close_expired(&mut tx, &lapsed, now).await?;
            debug!("Expired {} lapsed holds on acquire", lapsed.len());
        }

        // 3) Anything still active is a live hold or a sold seat
        let conflicts = sqlx::query_scalar::<_, Uuid>(
            "SELECT seat_id FROM hold_seats WHERE seat_id = ANY($1) AND is_active ORDER BY seat_id",
        )
        .bind(&draft.seat_ids)
        .fetch_all(&mut *tx)
        .await?;
        if !conflicts.is_empty() {
            // keep the lazy expiry even though the request lost
            tx.commit().await?;
            return Ok(AcquireOutcome::Conflict(conflicts));
        }

        // 4) Insert the hold and its seats
        let hold = Hold::new(draft.hold_id, draft.concert_id, draft.user_id, seats, now, draft.ttl);
        sqlx::query(
            "INSERT INTO holds (id, concert_id, user_id, status, total_price, created_at, expires_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(hold.id)
        .bind(hold.concert_id)
        .bind(hold.user_id)
        .bind(hold.status.as_str())
        .bind(hold.total_price)
        .bind(hold.created_at)
        .bind(hold.expires_at)
        .execute(&mut *tx)
        .await?;

        let seat_ids: Vec<Uuid> = hold.seats.iter().map(|s| s.seat_id).collect();
        let labels: Vec<String> = hold.seats.iter().map(|s| s.seat_label.clone()).collect();
        let categories: Vec<String> = hold.seats.iter().map(|s| s.category_name.clone()).collect();
        let prices: Vec<i64> = hold.seats.iter().map(|s| s.price).collect();

        let inserted = sqlx::query(
            "INSERT INTO hold_seats (hold_id, seat_id, seat_label, category_name, price, is_active)
             SELECT $1, s.seat_id, s.seat_label, s.category_name, s.price, TRUE
             FROM UNNEST($2::uuid[], $3::text[], $4::text[], $5::int8[])
                  AS s(seat_id, seat_label, category_name, price)",
        )
        .bind(hold.id)
        .bind(&seat_ids)
        .bind(&labels)
        .bind(&categories)
        .bind(&prices)
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                warn!("Active seat index rejected hold {}: {}", hold.id, e);
                tx.rollback().await?;
                return Ok(AcquireOutcome::Conflict(draft.seat_ids));
            }
            Err(e) => return Err(e.into()),
        }

        tx.commit().await?;
        Ok(AcquireOutcome::Acquired(hold))
    }

    async fn hold(&self, hold_id: Uuid) -> Result<Option<Hold>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query_as::<_, HoldRow>(&format!("SELECT {} FROM holds WHERE id = $1", HOLD_COLUMNS))
            .bind(hold_id)
            .fetch_optional(&mut *tx)
            .await?;
        let hold = Self::fetch_one(&mut tx, row).await?;
        tx.commit().await?;
        Ok(hold)
    }

    async fn apply(&self, hold_id: Uuid, change: HoldChange, now: DateTime<Utc>) -> Result<ApplyOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query_as::<_, HoldRow>(&format!(
            "SELECT {} FROM holds WHERE id = $1 FOR UPDATE",
            HOLD_COLUMNS
        ))
        .bind(hold_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(mut hold) = Self::fetch_one(&mut tx, row).await? else {
            tx.rollback().await?;
            return Ok(ApplyOutcome::NotFound);
        };

        let before = hold.status;
        let result = hold.apply(change, now);

        if hold.status != before {
            match Self::write_hold(&mut tx, &hold).await {
                Ok(()) => {}
                Err(e) if is_unique_violation(&e) => {
                    tx.rollback().await?;
                    return Ok(ApplyOutcome::DuplicateReservationNumber);
                }
                Err(e) => return Err(e.into()),
            }
        }
        tx.commit().await?;

        Ok(match result {
            Ok(()) => ApplyOutcome::Applied(hold),
            Err(error) => ApplyOutcome::Rejected { hold, error },
        })
    }

    async fn expire_due(&self, now: DateTime<Utc>) -> Result<Vec<Hold>, StoreError> {
        let mut tx = self.pool.begin().await?;

        // the row locks re-check status = 'pending' after any concurrent confirm/release commits
        let due = Self::lock_lapsed(&mut tx, now).await?;
        if due.is_empty() {
            tx.commit().await?;
            return Ok(Vec::new());
        }

        let mut rows = Self::close_expired(&mut tx, &due, now).await?;
        rows.sort_by_key(|r| r.id);
        let holds = Self::assemble(&mut tx, rows).await?;
        tx.commit().await?;
        Ok(holds)
    }

    async fn purge_closed(&self, closed_before: DateTime<Utc>) -> Result<usize, StoreError> {
        // hold_seats rows go with ON DELETE CASCADE
        let result = sqlx::query(
            "DELETE FROM holds
             WHERE status IN ('cancelled', 'expired') AND closed_at <= $1",
        )
        .bind(closed_before)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn hold_by_reservation_number(&self, reservation_number: &str) -> Result<Option<Hold>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query_as::<_, HoldRow>(&format!(
            "SELECT {} FROM holds WHERE reservation_number = $1",
            HOLD_COLUMNS
        ))
        .bind(reservation_number)
        .fetch_optional(&mut *tx)
        .await?;
        let hold = Self::fetch_one(&mut tx, row).await?;
        tx.commit().await?;
        Ok(hold)
    }

    async fn seat_map(&self, concert_id: Uuid, now: DateTime<Utc>) -> Result<Option<SeatMap>, StoreError> {
        let concert = sqlx::query_as::<_, Concert>("SELECT id, title FROM concerts WHERE id = $1")
            .bind(concert_id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(concert) = concert else {
            return Ok(None);
        };

        let categories = sqlx::query_as::<_, SeatCategory>(
            "SELECT id, concert_id, name, display_color, price
             FROM seat_categories
             WHERE concert_id = $1
             ORDER BY price DESC, name",
        )
        .bind(concert_id)
        .fetch_all(&self.pool)
        .await?;

        let rows = sqlx::query_as::<_, SeatMapRow>(
            "SELECT s.id, s.label AS seat_label, s.category_id, s.row_index, s.column_index,
                    CASE
                        WHEN h.status = 'confirmed' THEN 'SOLD'
                        WHEN h.status = 'pending' AND h.expires_at > $2 THEN 'ON_HOLD'
                        ELSE 'AVAILABLE'
                    END AS status
             FROM seats s
             LEFT JOIN hold_seats hs ON hs.seat_id = s.id AND hs.is_active
             LEFT JOIN holds h ON h.id = hs.hold_id
             WHERE s.concert_id = $1
             ORDER BY s.row_index, s.column_index",
        )
        .bind(concert_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        let seats = rows
            .into_iter()
            .map(|row| {
                Ok(SeatMapEntry {
                    id: row.id,
                    seat_label: row.seat_label,
                    category_id: row.category_id,
                    status: parse_seat_status(&row.status)?,
                    row: row.row_index,
                    column: row.column_index,
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        Ok(Some(SeatMap {
            concert_id: concert.id,
            concert_title: concert.title,
            categories,
            seats,
        }))
    }
}
