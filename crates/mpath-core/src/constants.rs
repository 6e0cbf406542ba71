use std::time::Duration;

/// The number of slots in a probe history ring.
///
/// Replies whose sequence number falls outside `[snxt - PROBE_RING_SIZE, snxt)`
/// are treated as stale or spoofed and dropped without side effects.
pub const PROBE_RING_SIZE: usize = 64;

/// The number of slots in a transitive probe history ring.
pub const LOCAL_RING_SIZE: usize = 16;

/// The maximum number of probes which may be awaiting acknowledgment at once
/// on a single probing instance.
pub const MAX_OUTSTANDING_PROBES: usize = 2;

/// The minimum number of probe targets the engine tries to maintain per
/// probing instance.
pub const MIN_PROBE_TARGETS: usize = 3;

/// The maximum number of probe targets kept per probing instance.
pub const MAX_PROBE_TARGETS: usize = 5;

/// Divisor applied to the probe interval when judging whether a slow target
/// is provably an outlier: the remaining targets must all answer within
/// `probe_interval / EXCEPTION_FACTOR`.
pub const EXCEPTION_FACTOR: u32 = 2;

/// Divisor applied to the probe interval when judging whether the failure
/// detection time can be tightened again: every capable target must answer
/// within `probe_interval / LOWER_FDT_TRIGGER`.
pub const LOWER_FDT_TRIGGER: u32 = 8;

/// Factor by which the failure detection time moves when it is adapted.
pub const NEXT_FDT_MULTIPLE: u32 = 2;

/// The number of round-trip samples which may be deferred per target before
/// they are all integrated in order.
pub const MAX_DEFERRED_RTT: usize = 1;

/// The number of recent link-up timestamps remembered per interface.
pub const LINK_UP_LOG: usize = 8;

/// More link-up transitions than this inside [`LINK_FLAP_WINDOW`] suppresses
/// link-based repair until the link settles.
pub const LINK_FLAP_MAX: usize = 3;

/// The window over which link flapping is assessed.
pub const LINK_FLAP_WINDOW: Duration = Duration::from_secs(60);

/// How long a link must stay up before an interface with no test address is
/// considered repaired.
pub const LINK_STABILIZATION: Duration = Duration::from_secs(10);

/// How long a transitive-probing interface waits after losing the designated
/// prober before propagating the failure.  Covers switch spanning-tree
/// convergence after a topology change.
pub const TRANSITIVE_SETTLE: Duration = Duration::from_secs(10);

/// The number of unanswered multicast discovery rounds sent at the user
/// probe interval before backing off.
pub const DISCOVERY_FAST_RETRIES: u32 = 5;

/// The discovery cadence once the fast retries are exhausted.
pub const DISCOVERY_SLOW_INTERVAL: Duration = Duration::from_secs(20);

/// A round-trip sample above this is discarded as a measurement anomaly.
pub const MAX_PLAUSIBLE_RTT: Duration = Duration::from_secs(60);

/// The smallest failure detection time a caller may request.
pub const MIN_FAILURE_DETECTION_TIME: Duration = Duration::from_millis(100);
