use crate::types::PhyintId;
use std::time::Instant;

/// A candidate for designated prober duty.
#[derive(Debug, Clone, Copy)]
pub struct ProberCandidate {
    pub id: PhyintId,
    /// Is the candidate's link up?
    pub link_up: bool,
    /// When the candidate was last selected as prober, if ever.
    pub last_selected_at: Option<Instant>,
}

/// Select the designated prober for a failed group.
///
/// Least-recently-tried first: among members whose link is up, the member
/// with the oldest selection timestamp wins, and a member that has never been
/// selected beats any that has.  Every member therefore gets exactly one turn
/// before any member is tried twice, with no message exchange between
/// members.
#[must_use]
pub fn select_prober<I>(candidates: I) -> Option<PhyintId>
where
    I: IntoIterator<Item = ProberCandidate>,
{
    candidates
        .into_iter()
        .filter(|candidate| candidate.link_up)
        .min_by_key(|candidate| (candidate.last_selected_at, candidate.id))
        .map(|candidate| candidate.id)
}
