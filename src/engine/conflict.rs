use serde::{Deserialize, Serialize};

use crate::model::*;

/// How a booking is judged against the coach's background slots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    /// A booking overlapping any background slot is rejected.
    #[default]
    RejectOverlapping,
    /// A booking must sit entirely inside one background slot.
    RequireContainment,
}

impl std::str::FromStr for ConflictPolicy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s {
            "reject-overlapping" => Ok(ConflictPolicy::RejectOverlapping),
            "require-containment" => Ok(ConflictPolicy::RequireContainment),
            _ => Err(()),
        }
    }
}

/// Half-open overlap test against every existing span.
/// Touching endpoints do not count; an empty `existing` never overlaps.
pub fn overlaps(candidate: &Span, existing: &[Span]) -> bool {
    first_overlap(candidate, existing).is_some()
}

/// Position of the first span in `existing` that overlaps `candidate`.
pub fn first_overlap(candidate: &Span, existing: &[Span]) -> Option<usize> {
    existing.iter().position(|e| candidate.overlaps(e))
}

/// True if one span of `existing` fully contains `candidate`.
pub fn contained_in(candidate: &Span, existing: &[Span]) -> bool {
    existing.iter().any(|e| e.contains_span(candidate))
}

/// Judge one candidate. Background candidates are never evaluated: only
/// bookings are checked, and only against background spans.
pub(crate) fn check(
    policy: ConflictPolicy,
    is_background: bool,
    candidate: &Span,
    background: &[Span],
) -> Result<(), RejectReason> {
    if is_background {
        return Ok(());
    }
    match policy {
        ConflictPolicy::RejectOverlapping => match first_overlap(candidate, background) {
            Some(i) => Err(RejectReason::OverlapsBackground(i)),
            None => Ok(()),
        },
        ConflictPolicy::RequireContainment => {
            if contained_in(candidate, background) {
                Ok(())
            } else {
                Err(RejectReason::OutsideAvailability)
            }
        }
    }
}
