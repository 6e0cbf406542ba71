use crate::types::{ProbeId, Sequence};
use std::fmt::{Display, Formatter};
use std::time::Duration;

/// Default values for configuration.
pub mod defaults {
    use std::time::Duration;

    /// The default value for `failure-detection-time`.
    pub const DEFAULT_FAILURE_DETECTION_TIME: Duration = Duration::from_secs(10);

    /// The default value for `probe-failure-count`.
    pub const DEFAULT_PROBE_FAILURE_COUNT: usize = 5;

    /// The default value for `probe-repair-count`.
    pub const DEFAULT_PROBE_REPAIR_COUNT: usize = 3;

    /// The default value for `initial-sequence`.
    pub const DEFAULT_INITIAL_SEQUENCE: u16 = 1;

    /// The default value for `probe-id`.
    pub const DEFAULT_PROBE_ID: u16 = 0x6d70;

    /// The default value for `read-timeout`.
    pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(10);

    /// The default value for `transitive-probing`.
    pub const DEFAULT_TRANSITIVE_PROBING: bool = false;
}

/// The kind of probe to send.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ProbeKind {
    /// A failure detection probe which consumes sequence space.
    Unicast,
    /// A target discovery probe sent to the all-nodes multicast address.
    Multicast,
    /// A round-trip-time measurement probe, no sequence consumption.
    RttOnly,
}

impl Display for ProbeKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unicast => write!(f, "unicast"),
            Self::Multicast => write!(f, "multicast"),
            Self::RttOnly => write!(f, "rtt-only"),
        }
    }
}

/// Engine configuration.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct EngineConfig {
    /// The user-requested failure detection time.
    ///
    /// The engine may relax the effective detection time of a group when its
    /// targets cannot answer fast enough, but never tightens it below the
    /// value derived from this setting.
    pub failure_detection_time: Duration,
    /// Consecutive probe losses before an interface is examined for failure.
    pub probe_failure_count: usize,
    /// Consecutive probe successes before a failed interface is repaired.
    pub probe_repair_count: usize,
    /// The sequence number of the first probe sent by each instance.
    pub initial_sequence: Sequence,
    /// The ICMP identifier base; each probing instance offsets from it.
    pub probe_id: ProbeId,
    /// How long the channel waits for a packet before giving up a read.
    pub read_timeout: Duration,
    /// Whether interfaces without a test address infer liveness from peers.
    pub transitive_probing: bool,
}

impl EngineConfig {
    /// The probe interval derived from a failure detection time.
    ///
    /// Probing must observe `probe_failure_count` losses inside the detection
    /// time with up to two probes still awaiting acknowledgment, hence the
    /// two extra slots.
    #[must_use]
    pub fn probe_interval(&self, failure_detection_time: Duration) -> Duration {
        failure_detection_time / (self.probe_failure_count as u32 + 2)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            failure_detection_time: defaults::DEFAULT_FAILURE_DETECTION_TIME,
            probe_failure_count: defaults::DEFAULT_PROBE_FAILURE_COUNT,
            probe_repair_count: defaults::DEFAULT_PROBE_REPAIR_COUNT,
            initial_sequence: Sequence(defaults::DEFAULT_INITIAL_SEQUENCE),
            probe_id: ProbeId(defaults::DEFAULT_PROBE_ID),
            read_timeout: defaults::DEFAULT_READ_TIMEOUT,
            transitive_probing: defaults::DEFAULT_TRANSITIVE_PROBING,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_interval_derivation() {
        let config = EngineConfig::default();
        assert_eq!(
            Duration::from_millis(1000),
            config.probe_interval(Duration::from_millis(7000))
        );
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(Duration::from_secs(10), config.failure_detection_time);
        assert_eq!(5, config.probe_failure_count);
        assert_eq!(3, config.probe_repair_count);
        assert!(!config.transitive_probing);
    }
}
