pub mod clock;
pub mod hold_manager;
pub mod sweeper;

pub use clock::{Clock, ManualClock, SystemClock};
pub use hold_manager::{HoldError, HoldManager, HoldPolicy, HoldRequest};
pub use sweeper::{ExpirySweeper, SweepReport};
