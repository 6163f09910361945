//! Per-view tooltip cache.
//!
//! One [`CalendarView`] lives exactly as long as one rendered calendar. It
//! is the only place instants are shifted into the viewer's display offset.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, FixedOffset};
use ulid::Ulid;

use crate::model::{Event, EventKind, Ms};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tooltip {
    pub title: String,
    /// `"09:00–10:00"` in the view's display offset.
    pub time_range: String,
    pub detail: Option<String>,
}

/// Bounded mapping event id → tooltip, oldest mount evicted first.
pub struct CalendarView {
    offset: FixedOffset,
    capacity: usize,
    tooltips: HashMap<Ulid, Tooltip>,
    order: VecDeque<Ulid>,
}

fn clock(t: Ms, offset: &FixedOffset) -> String {
    DateTime::from_timestamp_millis(t)
        .map(|dt| dt.with_timezone(offset).format("%H:%M").to_string())
        .unwrap_or_else(|| "--:--".to_string())
}

fn render(event: &Event, offset: &FixedOffset) -> Tooltip {
    let start = clock(event.span.start, offset);
    let time_range = if event.span.is_point() {
        start
    } else {
        format!("{start}–{}", clock(event.span.end, offset))
    };
    let detail = match &event.kind {
        EventKind::Background => None,
        EventKind::Booking { client_ref, paid, .. } => Some(format!(
            "{client_ref} · {}",
            if *paid { "paid" } else { "unpaid" }
        )),
    };
    Tooltip {
        title: event.title.clone(),
        time_range,
        detail,
    }
}

impl CalendarView {
    pub fn new(offset: FixedOffset, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            offset,
            capacity,
            tooltips: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.tooltips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tooltips.is_empty()
    }

    /// Tooltip for `event`, rendered once per id and reused on remount.
    pub fn mount(&mut self, event: &Event) -> &Tooltip {
        if !self.tooltips.contains_key(&event.id) {
            if self.tooltips.len() >= self.capacity
                && let Some(oldest) = self.order.pop_front()
            {
                self.tooltips.remove(&oldest);
            }
            self.order.push_back(event.id);
            self.tooltips.insert(event.id, render(event, &self.offset));
        }
        &self.tooltips[&event.id]
    }

    pub fn unmount(&mut self, id: &Ulid) -> Option<Tooltip> {
        let tooltip = self.tooltips.remove(id)?;
        self.order.retain(|o| o != id);
        Some(tooltip)
    }

    /// Drop every cached tooltip, e.g. when the visible range changes.
    pub fn clear(&mut self) {
        self.tooltips.clear();
        self.order.clear();
    }
}
