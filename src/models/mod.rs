pub mod concert;
pub mod seat;
pub mod hold;
pub mod order;

pub use concert::{Catalog, CatalogError, Concert, ConcertCatalog, SeatCategory};
pub use seat::{HeldSeat, Seat, SeatMap, SeatMapEntry, SeatStatus};
pub use hold::{BookerInfo, Confirmation, Hold, HoldChange, HoldStatus, TransitionError};
pub use order::{normalize_contact, ConfirmedOrder, ReservationNumber};
