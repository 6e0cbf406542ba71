use crate::constants::MAX_DEFERRED_RTT;
use arrayvec::ArrayVec;
use std::time::Duration;

/// A smoothed round-trip-time estimate.
///
/// Jacobson/Karels fixed-point smoothing with a 3-bit scaled average and a
/// 2-bit scaled mean deviation.  The conservative round-trip time (CRTT) is
/// `avg/8 + dev` and is used as the probe acknowledgment timeout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RttEstimate {
    /// Smoothed average, scaled by 8.
    sa: i64,
    /// Smoothed mean deviation, scaled by 4.
    sd: i64,
    seeded: bool,
}

impl RttEstimate {
    /// Integrate a round-trip sample.
    pub fn update(&mut self, sample: Duration) {
        let ms = sample.as_millis() as i64;
        if self.seeded {
            let mut m = ms - (self.sa >> 3);
            self.sa += m;
            if self.sa < 0 {
                self.sa = 0;
            }
            if m < 0 {
                m = -m;
            }
            m -= self.sd >> 2;
            self.sd += m;
        } else {
            self.sa = ms << 3;
            self.sd = ms << 1;
            self.seeded = true;
        }
    }

    /// The conservative round-trip time, if any sample has been integrated.
    #[must_use]
    pub fn crtt(&self) -> Option<Duration> {
        self.seeded
            .then(|| Duration::from_millis(((self.sa >> 3) + self.sd) as u64))
    }

    /// The CRTT which would result from integrating a sample, without
    /// actually integrating it.
    #[must_use]
    pub fn projected(&self, sample: Duration) -> Duration {
        let mut trial = *self;
        trial.update(sample);
        trial.crtt().unwrap_or_default()
    }
}

/// Per-target round-trip state with bounded sample deferral.
///
/// A single outlier sample (a scheduler hiccup, ARP resolution after an
/// interface repair) must not inflate the group's detection latency, so a
/// unicast sample whose projected CRTT would singlehandedly push past the
/// probe interval is buffered rather than integrated.  A subsequent ordinary
/// sample discards the buffer; a subsequent outlier overflows it, at which
/// point every deferred sample is integrated in order.
#[derive(Debug, Clone, Default)]
pub struct TargetRtt {
    estimate: RttEstimate,
    deferred: ArrayVec<Duration, MAX_DEFERRED_RTT>,
}

impl TargetRtt {
    /// The conservative round-trip time for this target.
    #[must_use]
    pub fn crtt(&self) -> Option<Duration> {
        self.estimate.crtt()
    }

    /// Integrate a sample taken from a unicast probe.
    ///
    /// Returns `true` when the sample was deferred rather than integrated.
    pub fn record_unicast(&mut self, sample: Duration, probe_interval: Duration) -> bool {
        let raises = self.estimate.projected(sample) > probe_interval
            && self.crtt().map_or(true, |crtt| crtt <= probe_interval);
        if raises {
            if self.deferred.try_push(sample).is_ok() {
                return true;
            }
            let deferred: ArrayVec<Duration, MAX_DEFERRED_RTT> = self.deferred.drain(..).collect();
            for deferred_sample in deferred {
                self.estimate.update(deferred_sample);
            }
            self.estimate.update(sample);
        } else {
            self.deferred.clear();
            self.estimate.update(sample);
        }
        false
    }

    /// Integrate a sample taken from an RTT-only probe.
    ///
    /// RTT-only samples never defer and only apply when they would lower the
    /// existing CRTT.  Returns `true` when the sample was applied.
    pub fn record_rtt_only(&mut self, sample: Duration) -> bool {
        let projected = self.estimate.projected(sample);
        match self.crtt() {
            Some(crtt) if projected >= crtt => false,
            _ => {
                self.estimate.update(sample);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_millis(1000);

    #[test]
    fn test_first_sample_seeds_estimate() {
        let mut estimate = RttEstimate::default();
        assert_eq!(None, estimate.crtt());
        estimate.update(Duration::from_millis(100));
        // avg = 8m, dev = 2m, crtt = avg/8 + dev = 3m
        assert_eq!(Some(Duration::from_millis(300)), estimate.crtt());
    }

    #[test]
    fn test_update_is_pure_in_its_inputs() {
        let mut first = RttEstimate::default();
        first.update(Duration::from_millis(100));
        first.update(Duration::from_millis(150));
        let mut second = first;
        first.update(Duration::from_millis(120));
        second.update(Duration::from_millis(120));
        assert_eq!(first, second);
    }

    #[test]
    fn test_zero_samples_drive_crtt_toward_zero() {
        let mut estimate = RttEstimate::default();
        estimate.update(Duration::from_millis(500));
        let mut last = estimate.crtt().unwrap();
        for _ in 0..100 {
            estimate.update(Duration::ZERO);
            let crtt = estimate.crtt().unwrap();
            assert!(crtt <= last);
            last = crtt;
        }
        assert!(last <= Duration::from_millis(5));
    }

    #[test]
    fn test_average_floor_clamped_at_zero() {
        let mut estimate = RttEstimate::default();
        estimate.update(Duration::ZERO);
        estimate.update(Duration::ZERO);
        assert_eq!(Some(Duration::ZERO), estimate.crtt());
    }

    #[test]
    fn test_outlier_is_deferred() {
        let mut rtt = TargetRtt::default();
        assert!(!rtt.record_unicast(Duration::from_millis(10), INTERVAL));
        let before = rtt.crtt();
        assert!(rtt.record_unicast(Duration::from_millis(5000), INTERVAL));
        assert_eq!(before, rtt.crtt());
    }

    #[test]
    fn test_ordinary_sample_discards_deferred_outlier() {
        let mut rtt = TargetRtt::default();
        rtt.record_unicast(Duration::from_millis(10), INTERVAL);
        assert!(rtt.record_unicast(Duration::from_millis(5000), INTERVAL));
        assert!(!rtt.record_unicast(Duration::from_millis(12), INTERVAL));
        // The outlier never made it into the estimate.
        assert!(rtt.crtt().unwrap() < Duration::from_millis(100));
    }

    #[test]
    fn test_deferred_samples_integrate_on_overflow() {
        let mut rtt = TargetRtt::default();
        rtt.record_unicast(Duration::from_millis(10), INTERVAL);
        assert!(rtt.record_unicast(Duration::from_millis(5000), INTERVAL));
        assert!(!rtt.record_unicast(Duration::from_millis(5000), INTERVAL));
        // Both slow samples are integrated once the deferral bound is hit.
        assert!(rtt.crtt().unwrap() > INTERVAL);
    }

    #[test]
    fn test_first_unicast_sample_above_interval_defers() {
        let mut rtt = TargetRtt::default();
        assert!(rtt.record_unicast(Duration::from_millis(5000), INTERVAL));
        assert_eq!(None, rtt.crtt());
    }

    #[test]
    fn test_rtt_only_never_raises() {
        let mut rtt = TargetRtt::default();
        rtt.record_unicast(Duration::from_millis(100), INTERVAL);
        let before = rtt.crtt().unwrap();
        assert!(!rtt.record_rtt_only(Duration::from_millis(5000)));
        assert_eq!(Some(before), rtt.crtt());
    }

    #[test]
    fn test_rtt_only_lowers() {
        let mut rtt = TargetRtt::default();
        rtt.record_unicast(Duration::from_millis(100), INTERVAL);
        let before = rtt.crtt().unwrap();
        assert!(rtt.record_rtt_only(Duration::from_millis(1)));
        assert!(rtt.crtt().unwrap() < before);
    }

    #[test]
    fn test_rtt_only_seeds_unseeded_estimate() {
        let mut rtt = TargetRtt::default();
        assert!(rtt.record_rtt_only(Duration::from_millis(50)));
        assert_eq!(Some(Duration::from_millis(150)), rtt.crtt());
    }
}
