//! NDP wire formats
//!
//! Only what the daemon speaks: Router Solicitation in, Router Advertisement
//! out, big-endian throughout.

pub mod icmpv6;
pub mod types;

pub use types::MacAddr;
