use std::collections::{BTreeMap, BTreeSet};

use chrono::{Datelike, NaiveDate, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, UTC. The only instant type in the crate.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
///
/// `start == end` is a zero-duration point: an event whose end is missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start <= end, "Span start must not be after end");
        Self { start, end }
    }

    /// Zero-duration span at `t`.
    pub fn point(t: Ms) -> Self {
        Self { start: t, end: t }
    }

    /// Build from an optional end; a missing end collapses to a point.
    pub fn from_parts(start: Ms, end: Option<Ms>) -> Self {
        match end {
            Some(end) => Self::new(start, end),
            None => Self::point(start),
        }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn is_point(&self) -> bool {
        self.start == self.end
    }

    /// Touching endpoints do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// Weekday set, bit `n` set for `n = 0 (Sunday) ..= 6 (Saturday)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DaySet(u8);

impl DaySet {
    pub const EMPTY: DaySet = DaySet(0);

    /// Returns `None` if any index is outside `0..=6`.
    pub fn from_indices(indices: &[u8]) -> Option<Self> {
        let mut bits = 0u8;
        for &i in indices {
            if i > 6 {
                return None;
            }
            bits |= 1 << i;
        }
        Some(Self(bits))
    }

    pub fn insert(&mut self, day: Weekday) {
        self.0 |= 1 << day.num_days_from_sunday();
    }

    pub fn contains(&self, day: Weekday) -> bool {
        self.0 & (1 << day.num_days_from_sunday()) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// Sunday-first indices, ascending.
    pub fn indices(&self) -> Vec<u8> {
        (0..7).filter(|i| self.0 & (1 << i) != 0).collect()
    }
}

impl FromIterator<Weekday> for DaySet {
    fn from_iter<I: IntoIterator<Item = Weekday>>(iter: I) -> Self {
        let mut set = DaySet::EMPTY;
        for day in iter {
            set.insert(day);
        }
        set
    }
}

/// Weekly recurrence. Bounds are inclusive calendar dates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurrenceRule {
    pub days: DaySet,
    pub start_time: NaiveTime,
    /// Earlier than `start_time` means the occurrence ends on the next day.
    pub end_time: NaiveTime,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub exceptions: BTreeSet<NaiveDate>,
}

impl RecurrenceRule {
    pub fn crosses_midnight(&self) -> bool {
        self.end_time < self.start_time
    }

    /// Upper bound on the number of occurrences, ignoring exceptions.
    pub fn estimated_len(&self) -> usize {
        if self.end < self.start {
            return 0;
        }
        let days = (self.end - self.start).num_days() as usize + 1;
        let mut count = (days / 7) * self.days.len();
        // Whole weeks keep the weekday of `start`, so the tail starts there too.
        let mut wd = self.start.weekday();
        for _ in 0..days % 7 {
            if self.days.contains(wd) {
                count += 1;
            }
            wd = wd.succ();
        }
        count
    }
}

/// One concrete materialization of a rule on a specific date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occurrence {
    pub date: NaiveDate,
    pub span: Span,
    /// Position in the full expansion, before any conflict filtering.
    pub index: u32,
}

/// Back-reference from a series member to its synthetic root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceLink {
    pub original_event_id: Ulid,
    pub instance_index: u32,
    pub date: NaiveDate,
}

/// What an event represents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    /// Coach availability, rendered as calendar background.
    Background,
    /// Billable appointment tied to a client.
    Booking {
        client_ref: String,
        /// Minor currency units.
        fee: Option<u64>,
        paid: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: Ulid,
    pub title: String,
    pub span: Span,
    pub kind: EventKind,
    pub recurrence: Option<RecurrenceRule>,
    pub link: Option<InstanceLink>,
}

impl Event {
    pub fn is_background(&self) -> bool {
        matches!(self.kind, EventKind::Background)
    }

    pub fn is_booking(&self) -> bool {
        matches!(self.kind, EventKind::Booking { .. })
    }

    pub fn client_ref(&self) -> Option<&str> {
        match &self.kind {
            EventKind::Booking { client_ref, .. } => Some(client_ref),
            EventKind::Background => None,
        }
    }

    /// Root id of the series this event belongs to, if any.
    pub fn series_id(&self) -> Option<Ulid> {
        self.link.map(|l| l.original_event_id)
    }
}

/// Why an occurrence was not materialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Overlaps the background slot at this position of the input.
    OverlapsBackground(usize),
    /// Not inside any background slot.
    OutsideAvailability,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedOccurrence {
    pub occurrence: Occurrence,
    pub reason: RejectReason,
}

/// Result of materializing a recurring form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Series {
    pub root_id: Ulid,
    pub rule: RecurrenceRule,
    pub events: Vec<Event>,
    pub rejected: Vec<RejectedOccurrence>,
    /// Occurrence date → materialized event id.
    pub instances: BTreeMap<NaiveDate, Ulid>,
}

/// Lifecycle of an event as seen by collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventState {
    Draft,
    Validated,
    Persisted,
    Updated,
    Deleted,
}

impl EventState {
    /// Returns the next state, or `None` if the transition is illegal.
    pub fn advance(self, to: EventState) -> Option<EventState> {
        use EventState::*;
        match (self, to) {
            (Draft, Validated)
            | (Validated, Persisted)
            | (Persisted, Updated)
            | (Updated, Updated)
            | (Persisted, Deleted)
            | (Updated, Deleted) => Some(to),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == EventState::Deleted
    }
}

/// Raw recurrence block of a form submission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecurrenceForm {
    /// Sunday-first indices `0..=6`.
    pub days_of_week: Vec<u8>,
    pub start_recur: String,
    pub end_recur: String,
    #[serde(default)]
    pub exceptions: Vec<String>,
}

/// Pre-validated primitive fields from the booking/availability form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventForm {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub is_background_event: bool,
    #[serde(default)]
    pub client_ref: Option<String>,
    #[serde(default)]
    pub fee: Option<u64>,
    #[serde(default)]
    pub paid: bool,
    #[serde(default)]
    pub recurrence: Option<RecurrenceForm>,
}

/// Query shape for the persistence collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    /// Only events overlapping this window.
    pub window: Option<Span>,
    pub background_only: bool,
    pub series_id: Option<Ulid>,
}

impl EventFilter {
    pub fn background() -> Self {
        Self {
            background_only: true,
            ..Self::default()
        }
    }

    pub fn series(id: Ulid) -> Self {
        Self {
            series_id: Some(id),
            ..Self::default()
        }
    }

    pub fn matches(&self, event: &Event) -> bool {
        if self.background_only && !event.is_background() {
            return false;
        }
        if let Some(sid) = self.series_id
            && event.series_id() != Some(sid)
        {
            return false;
        }
        if let Some(window) = &self.window {
            // Points are matched when they fall inside the window.
            let hit = if event.span.is_point() {
                window.contains_instant(event.span.start)
            } else {
                window.overlaps(&event.span)
            };
            if !hit {
                return false;
            }
        }
        true
    }
}
