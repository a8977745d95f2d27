//! Hold lifecycle.
//!
//! A hold is created `pending` and leaves that state exactly once, to one of
//! the terminal states `confirmed`, `cancelled` or `expired`. All transitions
//! go through [`Hold::apply`], which is shared by every store so the rules
//! live in one place:
//!
//! | from    | change  | condition        | result                          |
//! |---------|---------|------------------|---------------------------------|
//! | pending | confirm | now < expires_at | confirmed                       |
//! | pending | confirm | now ≥ expires_at | expired, `Err(Expired)`         |
//! | pending | cancel  | now < expires_at | cancelled                       |
//! | pending | cancel  | now ≥ expires_at | expired, `Err(InvalidState)`    |
//! | pending | expire  | now ≥ expires_at | expired                         |
//! | pending | expire  | now < expires_at | unchanged, `Err(NotDue)`        |
//! | other   | any     |                  | unchanged, `Err(InvalidState)`  |

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::HeldSeat;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HoldStatus {
    Pending,
    Confirmed,
    Cancelled,
    Expired,
}

impl HoldStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HoldStatus::Pending => "pending",
            HoldStatus::Confirmed => "confirmed",
            HoldStatus::Cancelled => "cancelled",
            HoldStatus::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, HoldStatus::Pending)
    }
}

impl fmt::Display for HoldStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HoldStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(HoldStatus::Pending),
            "confirmed" => Ok(HoldStatus::Confirmed),
            "cancelled" => Ok(HoldStatus::Cancelled),
            "expired" => Ok(HoldStatus::Expired),
            other => Err(format!("unknown hold status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookerInfo {
    pub name: String,
    pub email: String,
    pub phone: String,
}

/// Attached to a hold when it is confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Confirmation {
    pub reservation_number: String,
    pub booker: BookerInfo,
    pub confirmed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum HoldChange {
    Confirm {
        reservation_number: String,
        booker: BookerInfo,
        user_id: Option<Uuid>,
    },
    Cancel,
    Expire,
}

impl HoldChange {
    pub fn name(&self) -> &'static str {
        match self {
            HoldChange::Confirm { .. } => "confirm",
            HoldChange::Cancel => "cancel",
            HoldChange::Expire => "expire",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("hold is {status}, cannot {change}")]
    InvalidState {
        status: HoldStatus,
        change: &'static str,
    },
    #[error("hold expired before it could be confirmed")]
    Expired,
    #[error("hold is not due for expiry yet")]
    NotDue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hold {
    pub id: Uuid,
    pub concert_id: Uuid,
    pub user_id: Option<Uuid>,
    pub seats: Vec<HeldSeat>,
    pub total_price: i64,
    pub status: HoldStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub confirmation: Option<Confirmation>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Hold {
    /// New pending hold; the total is fixed here from the captured seat prices.
    pub fn new(
        id: Uuid,
        concert_id: Uuid,
        user_id: Option<Uuid>,
        seats: Vec<HeldSeat>,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        let total_price = seats.iter().map(|s| s.price).sum();
        Self {
            id,
            concert_id,
            user_id,
            seats,
            total_price,
            status: HoldStatus::Pending,
            created_at: now,
            expires_at: now + ttl,
            confirmation: None,
            closed_at: None,
        }
    }

    pub fn seat_ids(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.seats.iter().map(|s| s.seat_id)
    }

    pub fn is_lapsed(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Pending and still inside its TTL.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.status == HoldStatus::Pending && !self.is_lapsed(now)
    }

    /// Whether the hold keeps its seats away from other callers at `now`.
    pub fn claims_seats(&self, now: DateTime<Utc>) -> bool {
        self.is_live(now) || self.status == HoldStatus::Confirmed
    }

    /// Status as observed at `now`: a lapsed pending hold reads as expired
    /// even before anything has flipped it.
    pub fn effective_status(&self, now: DateTime<Utc>) -> HoldStatus {
        if self.status == HoldStatus::Pending && self.is_lapsed(now) {
            HoldStatus::Expired
        } else {
            self.status
        }
    }

    /// Applies `change` at `now`.
    ///
    /// On `Err` the hold may still have moved: a lapsed pending hold is
    /// flipped to `expired` by a confirm or cancel attempt, and callers must
    /// persist that.
    pub fn apply(&mut self, change: HoldChange, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(TransitionError::InvalidState {
                status: self.status,
                change: change.name(),
            });
        }

        let lapsed = self.is_lapsed(now);
        match change {
            HoldChange::Confirm { reservation_number, booker, user_id } => {
                if lapsed {
                    self.close(HoldStatus::Expired, now);
                    return Err(TransitionError::Expired);
                }
                self.status = HoldStatus::Confirmed;
                self.confirmation = Some(Confirmation {
                    reservation_number,
                    booker,
                    confirmed_at: now,
                });
                if self.user_id.is_none() {
                    self.user_id = user_id;
                }
                Ok(())
            }
            HoldChange::Cancel => {
                if lapsed {
                    self.close(HoldStatus::Expired, now);
                    return Err(TransitionError::InvalidState {
                        status: HoldStatus::Expired,
                        change: "cancel",
                    });
                }
                self.close(HoldStatus::Cancelled, now);
                Ok(())
            }
            HoldChange::Expire => {
                if !lapsed {
                    return Err(TransitionError::NotDue);
                }
                self.close(HoldStatus::Expired, now);
                Ok(())
            }
        }
    }

    fn close(&mut self, status: HoldStatus, now: DateTime<Utc>) {
        self.status = status;
        self.closed_at = Some(now);
    }
}
