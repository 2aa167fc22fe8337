//! Advertisement scheduling
//!
//! Tracks when the next Router Advertisement is due under the RFC 4861
//! timing rules: a randomized periodic interval, a jittered response to
//! solicitations, and a hard minimum gap between consecutive sends.

use rand::rngs::StdRng;
use rand::Rng;
use std::time::{Duration, Instant};

/// Upper bound of the solicited-response jitter
pub const MAX_RA_DELAY_TIME: Duration = Duration::from_millis(500);
/// Minimum gap between two advertisements
pub const MIN_DELAY_BETWEEN_RAS: Duration = Duration::from_secs(3);

/// Deadline state for the advertiser.
///
/// `solicit` and `advance` are deliberately separate entry points: a
/// solicitation may only pull the deadline earlier, while accounting for a
/// send replaces it outright. Both clamp to the earliest permitted send
/// time, so `deadline() >= earliest` always holds.
#[derive(Debug)]
pub struct AdvertScheduler {
    rng: StdRng,
    min_interval: Duration,
    max_interval: Duration,
    next_advert: Instant,
    earliest: Instant,
}

impl AdvertScheduler {
    pub fn new(min_interval: Duration, max_interval: Duration, now: Instant, rng: StdRng) -> Self {
        Self {
            rng,
            min_interval,
            max_interval,
            next_advert: now,
            earliest: now,
        }
    }

    /// Absolute time of the next scheduled advertisement.
    pub fn deadline(&self) -> Instant {
        self.next_advert
    }

    pub fn due(&self, now: Instant) -> bool {
        now > self.next_advert
    }

    /// Request a solicited (or readiness-triggered) advertisement.
    ///
    /// Solicitations arriving while one is already pending coalesce: the
    /// earliest pending deadline wins.
    pub fn solicit(&mut self, now: Instant) {
        let mut target = now + self.rng.gen_range(Duration::ZERO..MAX_RA_DELAY_TIME);
        if target < self.earliest {
            target = self.earliest;
        }
        if target < self.next_advert {
            self.next_advert = target;
        }
    }

    /// Account for a successful send and schedule the next periodic
    /// advertisement at a uniformly random point of the configured window.
    pub fn advance(&mut self, now: Instant) {
        self.earliest = now + MIN_DELAY_BETWEEN_RAS;
        let mut target = now + self.rng.gen_range(self.min_interval..self.max_interval);
        if target < self.earliest {
            target = self.earliest;
        }
        self.next_advert = target;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    const MIN: Duration = Duration::from_secs(200);
    const MAX: Duration = Duration::from_secs(600);

    fn make_scheduler(now: Instant, seed: u64) -> AdvertScheduler {
        AdvertScheduler::new(MIN, MAX, now, StdRng::seed_from_u64(seed))
    }

    #[test]
    fn test_initial_deadline_is_now() {
        let now = Instant::now();
        let sched = make_scheduler(now, 1);
        assert_eq!(sched.deadline(), now);
        assert!(!sched.due(now));
        assert!(sched.due(now + Duration::from_millis(1)));
    }

    #[test]
    fn test_solicit_within_jitter_window() {
        let now = Instant::now();
        for seed in 0..64 {
            let mut sched = make_scheduler(now, seed);
            sched.advance(now); // push the deadline far out
            sched.solicit(now + MIN_DELAY_BETWEEN_RAS);
            let deadline = sched.deadline();
            assert!(deadline >= now + MIN_DELAY_BETWEEN_RAS);
            assert!(deadline < now + MIN_DELAY_BETWEEN_RAS + MAX_RA_DELAY_TIME);
        }
    }

    #[test]
    fn test_solicit_clamped_to_min_delay() {
        let now = Instant::now();
        for seed in 0..64 {
            let mut sched = make_scheduler(now, seed);
            sched.advance(now);
            // Solicitation right after a send: the jitter always lands
            // inside the 3-second exclusion, so the clamp wins exactly.
            sched.solicit(now);
            assert_eq!(sched.deadline(), now + MIN_DELAY_BETWEEN_RAS);
        }
    }

    #[test]
    fn test_solicit_only_pulls_earlier() {
        let now = Instant::now();
        let mut sched = make_scheduler(now, 7);
        sched.advance(now);

        sched.solicit(now);
        let first = sched.deadline();

        // A later solicitation must never push the deadline back out
        for i in 1..10 {
            sched.solicit(now + Duration::from_millis(10 * i));
            assert!(sched.deadline() <= first);
        }
    }

    #[test]
    fn test_advance_lands_in_periodic_window() {
        let now = Instant::now();
        for seed in 0..64 {
            let mut sched = make_scheduler(now, seed);
            sched.advance(now);
            let deadline = sched.deadline();
            assert!(deadline >= now + MIN);
            assert!(deadline < now + MAX);
        }
    }

    #[test]
    fn test_advance_replaces_pending_solicit() {
        let now = Instant::now();
        let mut sched = make_scheduler(now, 3);
        sched.solicit(now);
        assert!(sched.deadline() <= now + MAX_RA_DELAY_TIME);

        sched.advance(now);
        assert!(sched.deadline() >= now + MIN);
    }

    #[test]
    fn test_deadline_never_before_earliest() {
        let now = Instant::now();
        let mut sched = make_scheduler(now, 11);
        for i in 0..50u64 {
            let t = now + Duration::from_millis(i * 137);
            if i % 3 == 0 {
                sched.advance(t);
                assert!(sched.deadline() >= t + MIN_DELAY_BETWEEN_RAS);
            } else {
                sched.solicit(t);
            }
            assert!(sched.deadline() >= sched.earliest);
        }
    }

    #[test]
    fn test_short_interval_clamped_by_min_delay() {
        // With a window entirely inside the 3-second exclusion the clamp
        // must still hold the deadline at `earliest`.
        let now = Instant::now();
        let mut sched = AdvertScheduler::new(
            Duration::from_secs(1),
            Duration::from_secs(2),
            now,
            StdRng::seed_from_u64(5),
        );
        sched.advance(now);
        assert_eq!(sched.deadline(), now + MIN_DELAY_BETWEEN_RAS);
    }
}
