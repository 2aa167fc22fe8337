//! Daemon state machines
//!
//! Interface tracking, advertisement scheduling, and the event loop that
//! ties them to the sockets.

mod iface;
mod reactor;
mod scheduler;

pub use iface::{Interface, LinkState, Refresh};
pub use reactor::Reactor;
pub use scheduler::{AdvertScheduler, MAX_RA_DELAY_TIME, MIN_DELAY_BETWEEN_RAS};
