//! Persistence for schedules.
//!
//! Schedules live as one JSON collection inside a key-value state store with
//! versioned writes.

mod schedules;
mod state;

pub use schedules::*;
pub use state::*;
