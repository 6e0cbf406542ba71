use crate::constants::{DISCOVERY_FAST_RETRIES, DISCOVERY_SLOW_INTERVAL};
use std::time::{Duration, Instant};

/// A source of probe send-time jitter, as a fraction of the probe interval.
///
/// Randomising the send time within each period keeps probe bursts from
/// synchronising across interfaces while the periodic base keeps the failure
/// detection arithmetic honest.
pub trait Jitter {
    /// A fraction in `[0.5, 1.0)`.
    fn fraction(&mut self) -> f64;
}

/// The default jitter source.
#[derive(Debug, Default)]
pub struct RandomJitter;

impl Jitter for RandomJitter {
    fn fraction(&mut self) -> f64 {
        rand::random_range(0.5..1.0)
    }
}

/// A deterministic jitter source, for tests and simulations.
#[derive(Debug)]
pub struct FixedJitter(pub f64);

impl Jitter for FixedJitter {
    fn fraction(&mut self) -> f64 {
        self.0
    }
}

/// What a due tick should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickAction {
    /// Send a failure detection probe and advance the sequence space.
    Unicast,
    /// Send a measurement-only probe.
    RttOnly,
    /// No targets; send a multicast discovery probe.
    Discover,
}

/// The probe timetable for one probing instance.
///
/// Sends are anchored to a strictly periodic base advanced by whole
/// intervals.  If the driving loop stalls, the base catches up by whole
/// multiples rather than drifting, and the skipped periods are counted as
/// missed probes.
#[derive(Debug, Clone)]
pub struct ProbeSchedule {
    /// The periodic base of the current period.
    base: Instant,
    /// When the next probe is due; `None` while the instance cannot probe.
    next: Option<Instant>,
    /// The periodic base at which the last failure detection probe was sent.
    fd_base: Option<Instant>,
    /// Unanswered discovery rounds since targets were last seen.
    discovery_rounds: u32,
    /// Whole periods skipped due to a stalled driving loop.
    missed: u64,
}

impl ProbeSchedule {
    /// A schedule with the first probe due immediately.
    #[must_use]
    pub fn new(now: Instant) -> Self {
        Self {
            base: now,
            next: Some(now),
            fd_base: None,
            discovery_rounds: 0,
            missed: 0,
        }
    }

    /// When the next probe is due, or `None` if probing is stopped.
    #[must_use]
    pub fn next_due(&self) -> Option<Instant> {
        self.next
    }

    /// Stop probing; `next_due` reports an infinite wait.
    pub fn stop(&mut self) {
        self.next = None;
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.next.is_none()
    }

    /// Resume probing with the first probe due immediately.
    pub fn restart(&mut self, now: Instant) {
        self.base = now;
        self.next = Some(now);
        self.fd_base = None;
        self.discovery_rounds = 0;
    }

    /// Whole periods skipped because the driving loop stalled.
    #[must_use]
    pub fn missed(&self) -> u64 {
        self.missed
    }

    /// Advance the timetable if a probe is due.
    ///
    /// `user_interval` is the user-derived cadence at which probes of any
    /// kind are sent; `adaptive_interval` is the group's possibly relaxed
    /// failure detection cadence.  The two are genuinely independent: a tick
    /// on the user grid sends a failure detection probe only once a full
    /// adaptive interval has elapsed since the last one, and an RTT-only
    /// probe otherwise.
    pub fn tick(
        &mut self,
        now: Instant,
        user_interval: Duration,
        adaptive_interval: Duration,
        have_targets: bool,
        jitter: &mut dyn Jitter,
    ) -> Option<TickAction> {
        let due = self.next?;
        if now < due {
            return None;
        }
        let action = if have_targets {
            self.discovery_rounds = 0;
            if self
                .fd_base
                .map_or(true, |fd_base| self.base.duration_since(fd_base) >= adaptive_interval)
            {
                self.fd_base = Some(self.base);
                TickAction::Unicast
            } else {
                TickAction::RttOnly
            }
        } else {
            self.discovery_rounds = self.discovery_rounds.saturating_add(1);
            TickAction::Discover
        };
        let interval = if action == TickAction::Discover
            && self.discovery_rounds > DISCOVERY_FAST_RETRIES
        {
            DISCOVERY_SLOW_INTERVAL.max(user_interval)
        } else {
            user_interval
        };
        self.base += interval;
        let behind = now.saturating_duration_since(self.base);
        let skipped = (behind.as_nanos() / interval.as_nanos()) as u32;
        if skipped > 0 {
            self.base += interval * skipped;
            self.missed += u64::from(skipped);
        }
        self.next = Some(self.base + interval.mul_f64(jitter.fraction()));
        Some(action)
    }
}
