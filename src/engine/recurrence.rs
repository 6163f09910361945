use std::collections::BTreeSet;
use std::iter::FusedIterator;

use chrono::{Datelike, NaiveDate, NaiveTime};

use crate::limits::*;
use crate::model::*;

use super::normalize::{at, parse_date, parse_time};
use super::EngineError;

impl RecurrenceRule {
    /// Build a rule from the raw recurrence block plus the form's time window.
    ///
    /// An inverted date range is accepted and expands to nothing.
    pub fn parse(form: &RecurrenceForm, start_time: &str, end_time: &str) -> Result<Self, EngineError> {
        let days = DaySet::from_indices(&form.days_of_week).ok_or_else(|| {
            EngineError::malformed("daysOfWeek", &format!("{:?}", form.days_of_week))
        })?;
        if days.is_empty() {
            return Err(EngineError::Validation {
                field: "daysOfWeek",
                reason: "at least one weekday required",
            });
        }
        let start_time = parse_time("startTime", start_time)?;
        let end_time = parse_time("endTime", end_time)?;
        if start_time == end_time {
            return Err(EngineError::Validation {
                field: "endTime",
                reason: "must differ from startTime",
            });
        }
        let start = parse_date("startRecur", &form.start_recur)?;
        let end = parse_date("endRecur", &form.end_recur)?;
        if (end - start).num_days() >= MAX_RECURRENCE_DAYS {
            return Err(EngineError::LimitExceeded("recurrence range too long"));
        }
        if form.exceptions.len() > MAX_EXCEPTIONS {
            return Err(EngineError::LimitExceeded("too many exceptions"));
        }
        let exceptions = form
            .exceptions
            .iter()
            .map(|s| parse_date("exceptions", s))
            .collect::<Result<BTreeSet<_>, _>>()?;

        Ok(Self {
            days,
            start_time,
            end_time,
            start,
            end,
            exceptions,
        })
    }

    /// Span of the occurrence on `date`; rolls into the next day when the
    /// window crosses midnight.
    pub fn span_on(&self, date: NaiveDate) -> Span {
        let start = at(date, self.start_time);
        let end_date = if self.crosses_midnight() {
            date.succ_opt().unwrap_or(date)
        } else {
            date
        };
        Span::new(start, at(end_date, self.end_time))
    }

    pub fn includes(&self, date: NaiveDate) -> bool {
        self.start <= date
            && date <= self.end
            && self.days.contains(date.weekday())
            && !self.exceptions.contains(&date)
    }
}

/// Lazy, ascending occurrences of a rule. Calling [`expand`] again starts
/// over from the first date.
#[derive(Debug, Clone)]
pub struct Occurrences<'a> {
    rule: &'a RecurrenceRule,
    next: Option<NaiveDate>,
    index: u32,
}

/// Expand a weekly rule over its inclusive date bounds.
pub fn expand(rule: &RecurrenceRule) -> Occurrences<'_> {
    Occurrences {
        rule,
        next: (rule.start <= rule.end).then_some(rule.start),
        index: 0,
    }
}

impl Iterator for Occurrences<'_> {
    type Item = Occurrence;

    fn next(&mut self) -> Option<Occurrence> {
        while let Some(date) = self.next {
            // `end` is inclusive: advance past it, never stop short of it.
            self.next = date.succ_opt().filter(|d| *d <= self.rule.end);
            if self.rule.days.contains(date.weekday()) && !self.rule.exceptions.contains(&date) {
                let occ = Occurrence {
                    date,
                    span: self.rule.span_on(date),
                    index: self.index,
                };
                self.index += 1;
                return Some(occ);
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self.next {
            None => (0, Some(0)),
            Some(date) => {
                let remaining = (self.rule.end - date).num_days() as usize + 1;
                (0, Some(remaining))
            }
        }
    }
}

impl FusedIterator for Occurrences<'_> {}

/// Build a rule from typed parts, with no exceptions.
pub fn weekly(
    days: DaySet,
    start_time: NaiveTime,
    end_time: NaiveTime,
    start: NaiveDate,
    end: NaiveDate,
) -> RecurrenceRule {
    RecurrenceRule {
        days,
        start_time,
        end_time,
        start,
        end,
        exceptions: BTreeSet::new(),
    }
}
