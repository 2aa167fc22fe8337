//! Radv - IPv6 Router Advertisement daemon
//!
//! Advertises one or more /64 SLAAC prefixes (and optionally recursive DNS
//! servers) on a single interface, answers Router Solicitations, and tracks
//! the interface through rtnetlink so advertising stops and resumes with it.

pub mod config;
pub mod dataplane;
pub mod error;
pub mod net;
pub mod protocol;
pub mod telemetry;

pub use error::{Error, Result};
