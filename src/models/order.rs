use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use uuid::Uuid;

use crate::models::{BookerInfo, HeldSeat, Hold, HoldStatus};

const RESERVATION_PREFIX: char = 'R';
const RESERVATION_RANDOM_LEN: usize = 7;
const BASE36: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Public identifier of a confirmed order: `R` + `YYMMDD` + 7 base-36 chars.
pub struct ReservationNumber;

impl ReservationNumber {
    pub const LEN: usize = 1 + 6 + RESERVATION_RANDOM_LEN;

    pub fn generate<R: Rng + ?Sized>(now: DateTime<Utc>, rng: &mut R) -> String {
        let mut number = String::with_capacity(Self::LEN);
        number.push(RESERVATION_PREFIX);
        number.push_str(&now.format("%y%m%d").to_string());
        for _ in 0..RESERVATION_RANDOM_LEN {
            let idx = rng.gen_range(0..BASE36.len());
            number.push(BASE36[idx] as char);
        }
        number
    }
}

/// Strips everything but digits so `010-1234-5678` and `(010) 1234 5678` compare equal.
pub fn normalize_contact(contact: &str) -> String {
    contact.chars().filter(|c| c.is_ascii_digit()).collect()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmedOrder {
    pub order_id: Uuid,
    pub reservation_number: String,
    pub concert_id: Uuid,
    pub user_id: Option<Uuid>,
    pub status: HoldStatus,
    pub seats: Vec<HeldSeat>,
    pub total_price: i64,
    pub booker_name: String,
    pub booker_email: String,
    pub booker_contact: String,
    pub confirmed_at: DateTime<Utc>,
}

impl ConfirmedOrder {
    /// `None` unless the hold is confirmed.
    pub fn from_hold(hold: Hold) -> Option<Self> {
        if hold.status != HoldStatus::Confirmed {
            return None;
        }
        let confirmation = hold.confirmation?;
        let BookerInfo { name, email, phone } = confirmation.booker;
        Some(Self {
            order_id: hold.id,
            reservation_number: confirmation.reservation_number,
            concert_id: hold.concert_id,
            user_id: hold.user_id,
            status: hold.status,
            seats: hold.seats,
            total_price: hold.total_price,
            booker_name: name,
            booker_email: email,
            booker_contact: phone,
            confirmed_at: confirmation.confirmed_at,
        })
    }

    pub fn contact_matches(&self, contact: &str) -> bool {
        normalize_contact(&self.booker_contact) == normalize_contact(contact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use rand::rngs::mock::StepRng;

    #[test]
    fn reservation_number_format() {
        let now = Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap();
        let number = ReservationNumber::generate(now, &mut rand::thread_rng());
        assert_eq!(number.len(), ReservationNumber::LEN);
        assert!(number.starts_with("R261018"));
        assert!(number.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }

    #[test]
    fn reservation_number_is_deterministic_for_a_fixed_rng() {
        let now = Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap();
        let a = ReservationNumber::generate(now, &mut StepRng::new(0, 0));
        let b = ReservationNumber::generate(now, &mut StepRng::new(0, 0));
        assert_eq!(a, b);
        assert_eq!(a, "R2601020000000");
    }

    #[test]
    fn contact_normalization_ignores_separators() {
        assert_eq!(normalize_contact("010-1234-5678"), "01012345678");
        assert_eq!(normalize_contact("(010) 1234 5678"), "01012345678");
        assert_eq!(normalize_contact("+82 10-1234-5678"), "821012345678");
        assert_eq!(normalize_contact(""), "");
    }

    proptest! {
        #[test]
        fn separators_never_change_the_normalized_contact(
            digits in "[0-9]{9,13}",
            seps in proptest::collection::vec(prop_oneof![Just('-'), Just(' '), Just('('), Just(')')], 0..6),
        ) {
            let mut decorated = String::new();
            for (i, d) in digits.chars().enumerate() {
                if let Some(sep) = seps.get(i) {
                    decorated.push(*sep);
                }
                decorated.push(d);
            }
            prop_assert_eq!(normalize_contact(&decorated), digits);
        }
    }
}
