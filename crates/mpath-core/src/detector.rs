use std::time::Instant;

/// How a failure is classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// This interface alone has failed; the rest of the group is passing
    /// probes.
    Phyint,
    /// The whole group has failed.
    Group,
}

/// A peer's evidence for the failure classification.
#[derive(Debug, Clone, Copy)]
pub struct PeerEvidence {
    /// Is the peer's link up?
    pub link_up: bool,
    /// Has the peer itself already failed?
    pub failed: bool,
    /// When the peer last passed a probe.
    pub last_success_at: Option<Instant>,
}

/// Classify a failure as individual or group-wide.
///
/// If any peer whose link is up and which has not itself failed passed a
/// probe strictly after this member's first failure, the network beyond this
/// member is demonstrably alive and the failure is individual.  Otherwise
/// every member is in the same position and the whole group has failed.
#[must_use]
pub fn failure_state<I>(first_failure_at: Instant, peers: I) -> FailureKind
where
    I: IntoIterator<Item = PeerEvidence>,
{
    let vouched = peers.into_iter().any(|peer| {
        peer.link_up
            && !peer.failed
            && peer
                .last_success_at
                .is_some_and(|at| at > first_failure_at)
    });
    if vouched {
        FailureKind::Phyint
    } else {
        FailureKind::Group
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn peer(link_up: bool, failed: bool, last_success_at: Option<Instant>) -> PeerEvidence {
        PeerEvidence {
            link_up,
            failed,
            last_success_at,
        }
    }

    #[test]
    fn test_peer_success_after_failure_is_individual() {
        let failure = Instant::now();
        let after = failure + Duration::from_millis(1);
        let kind = failure_state(failure, [peer(true, false, Some(after))]);
        assert_eq!(FailureKind::Phyint, kind);
    }

    #[test]
    fn test_peer_success_before_failure_is_group() {
        let earlier = Instant::now();
        let failure = earlier + Duration::from_millis(1);
        let kind = failure_state(failure, [peer(true, false, Some(earlier))]);
        assert_eq!(FailureKind::Group, kind);
    }

    #[test]
    fn test_peer_success_at_failure_instant_is_group() {
        let failure = Instant::now();
        let kind = failure_state(failure, [peer(true, false, Some(failure))]);
        assert_eq!(FailureKind::Group, kind);
    }

    #[test]
    fn test_link_down_peer_cannot_vouch() {
        let failure = Instant::now();
        let after = failure + Duration::from_millis(1);
        let kind = failure_state(failure, [peer(false, false, Some(after))]);
        assert_eq!(FailureKind::Group, kind);
    }

    #[test]
    fn test_failed_peer_cannot_vouch() {
        let failure = Instant::now();
        let after = failure + Duration::from_millis(1);
        let kind = failure_state(failure, [peer(true, true, Some(after))]);
        assert_eq!(FailureKind::Group, kind);
    }

    #[test]
    fn test_no_peers_is_group() {
        let kind = failure_state(Instant::now(), []);
        assert_eq!(FailureKind::Group, kind);
    }

    #[test]
    fn test_any_one_vouching_peer_suffices() {
        let failure = Instant::now();
        let after = failure + Duration::from_millis(1);
        let peers = [
            peer(true, true, Some(after)),
            peer(false, false, Some(after)),
            peer(true, false, Some(after)),
        ];
        assert_eq!(FailureKind::Phyint, failure_state(failure, peers));
    }
}
