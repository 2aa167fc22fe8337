//! Counters for the advertising path.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counter.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Daemon-wide statistics.
#[derive(Debug, Default)]
pub struct RaStats {
    /// Router Advertisements sent.
    pub ra_sent: Counter,
    /// Sends that failed and took the interface down.
    pub ra_send_errors: Counter,
    /// Router Solicitations received, valid or not.
    pub rs_received: Counter,
    /// Router Solicitations dropped by validation.
    pub rs_dropped: Counter,
    /// Kernel notifications decoded.
    pub rtnl_events: Counter,
    /// Interface re-resolutions.
    pub iface_refreshes: Counter,
}
