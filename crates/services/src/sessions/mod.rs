mod clock;
mod controller;
pub(crate) mod marker;
mod shuffle;

// Public API of the session subsystem.
pub use clock::{ClockStart, ClockState, ClockTicket, ExpiryCallback, SessionClock, Tick};
pub use controller::{Opened, SessionController};
pub use shuffle::AnswerShuffler;
