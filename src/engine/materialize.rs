use std::collections::BTreeMap;

use tracing::debug;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{check, ConflictPolicy};
use super::normalize::{at, parse_date, parse_time};
use super::recurrence::expand;
use super::EngineError;

fn present<'a>(field: &'static str, value: &'a Option<String>) -> Result<&'a str, EngineError> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(EngineError::missing(field)),
    }
}

fn title_of(form: &EventForm) -> Result<String, EngineError> {
    let title = if form.is_background_event {
        // Availability slots render without a label of their own.
        form.title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or("Available")
    } else {
        present("title", &form.title)?
    };
    if title.len() > MAX_TITLE_LEN {
        return Err(EngineError::LimitExceeded("title too long"));
    }
    Ok(title.to_string())
}

/// Client/fee/paid only survive on bookings.
fn kind_of(form: &EventForm) -> Result<EventKind, EngineError> {
    if form.is_background_event {
        return Ok(EventKind::Background);
    }
    let client_ref = present("clientRef", &form.client_ref)?;
    if client_ref.len() > MAX_CLIENT_REF_LEN {
        return Err(EngineError::LimitExceeded("client reference too long"));
    }
    Ok(EventKind::Booking {
        client_ref: client_ref.to_string(),
        fee: form.fee,
        paid: form.paid,
    })
}

/// Check a form without expanding it. Returns the parsed rule for recurring
/// forms so callers can size the series before materializing.
pub fn validate(form: &EventForm) -> Result<Option<RecurrenceRule>, EngineError> {
    title_of(form)?;
    kind_of(form)?;
    match &form.recurrence {
        Some(recurrence) => {
            let start_time = present("startTime", &form.start_time)?;
            let end_time = present("endTime", &form.end_time)?;
            RecurrenceRule::parse(recurrence, start_time, end_time).map(Some)
        }
        None => {
            let day = parse_date("date", present("date", &form.date)?)?;
            parse_time("startTime", present("startTime", &form.start_time)?)?;
            if let Some(end_time) = form.end_time.as_deref().filter(|t| !t.trim().is_empty()) {
                parse_time("endTime", end_time)?;
            }
            day.succ_opt().ok_or(EngineError::LimitExceeded("date out of range"))?;
            Ok(None)
        }
    }
}

/// Build one event from a single-date form.
///
/// A missing end time yields a zero-duration event; an end earlier than the
/// start rolls into the next day, as recurring windows do.
pub fn materialize_single(form: &EventForm) -> Result<Event, EngineError> {
    let title = title_of(form)?;
    let kind = kind_of(form)?;
    let day = parse_date("date", present("date", &form.date)?)?;
    let start_tod = parse_time("startTime", present("startTime", &form.start_time)?)?;
    let start = at(day, start_tod);

    let end = match form.end_time.as_deref().filter(|t| !t.trim().is_empty()) {
        None => None,
        Some(end_time) => {
            let end_tod = parse_time("endTime", end_time)?;
            let end_day = if end_tod < start_tod {
                day.succ_opt().ok_or(EngineError::LimitExceeded("date out of range"))?
            } else {
                day
            };
            Some(at(end_day, end_tod))
        }
    };

    Ok(Event {
        id: Ulid::new(),
        title,
        span: Span::from_parts(start, end),
        kind,
        recurrence: None,
        link: None,
    })
}

/// Expand a recurring form and build one event per accepted occurrence.
///
/// Every event shares a fresh root id and carries its occurrence index.
/// Booking occurrences are judged against `background` under `policy`;
/// background occurrences are never checked.
pub fn materialize_recurring(
    form: &EventForm,
    background: &[Span],
    policy: ConflictPolicy,
) -> Result<Series, EngineError> {
    let title = title_of(form)?;
    let kind = kind_of(form)?;
    let recurrence = form
        .recurrence
        .as_ref()
        .ok_or_else(|| EngineError::missing("recurrence"))?;
    let start_time = present("startTime", &form.start_time)?;
    let end_time = present("endTime", &form.end_time)?;
    let rule = RecurrenceRule::parse(recurrence, start_time, end_time)?;
    if rule.estimated_len() > MAX_SERIES_LEN {
        return Err(EngineError::LimitExceeded("series too long"));
    }

    let root_id = Ulid::new();
    let is_background = form.is_background_event;
    let mut events = Vec::new();
    let mut rejected = Vec::new();
    let mut instances = BTreeMap::new();

    for occurrence in expand(&rule) {
        if let Err(reason) = check(policy, is_background, &occurrence.span, background) {
            debug!(date = %occurrence.date, ?reason, "occurrence rejected");
            rejected.push(RejectedOccurrence { occurrence, reason });
            continue;
        }
        let id = Ulid::new();
        instances.insert(occurrence.date, id);
        events.push(Event {
            id,
            title: title.clone(),
            span: occurrence.span,
            kind: kind.clone(),
            recurrence: Some(rule.clone()),
            link: Some(InstanceLink {
                original_event_id: root_id,
                instance_index: occurrence.index,
                date: occurrence.date,
            }),
        });
    }

    Ok(Series {
        root_id,
        rule,
        events,
        rejected,
        instances,
    })
}

/// Dispatch on the presence of a recurrence block.
pub fn materialize(
    form: &EventForm,
    background: &[Span],
    policy: ConflictPolicy,
) -> Result<Materialized, EngineError> {
    if form.recurrence.is_some() {
        materialize_recurring(form, background, policy).map(Materialized::Series)
    } else {
        let event = materialize_single(form)?;
        match check(policy, event.is_background(), &event.span, background) {
            Ok(()) => Ok(Materialized::Single(event)),
            Err(reason) => Ok(Materialized::Rejected(event, reason)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Materialized {
    Single(Event),
    /// A single booking that failed the conflict check.
    Rejected(Event, RejectReason),
    Series(Series),
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use chrono::NaiveDate;

    use super::*;
    use crate::engine::normalize::normalize;

    const H: Ms = 3_600_000;

    fn booking_form() -> EventForm {
        EventForm {
            title: Some("Coaching".into()),
            date: Some("2024-06-10".into()),
            start_time: Some("09:00".into()),
            end_time: Some("10:00".into()),
            is_background_event: false,
            client_ref: Some("client-7".into()),
            fee: Some(6000),
            paid: true,
            recurrence: None,
        }
    }

    fn background_form() -> EventForm {
        EventForm {
            title: None,
            date: Some("2024-06-10".into()),
            start_time: Some("08:00".into()),
            end_time: Some("12:00".into()),
            is_background_event: true,
            client_ref: Some("ignored".into()),
            fee: Some(100),
            paid: true,
            recurrence: None,
        }
    }

    fn scenario_recurrence() -> RecurrenceForm {
        RecurrenceForm {
            days_of_week: vec![1, 3],
            start_recur: "2024-06-03".into(),
            end_recur: "2024-06-14".into(),
            exceptions: vec!["2024-06-10".into()],
        }
    }

    #[test]
    fn single_booking() {
        let event = materialize_single(&booking_form()).unwrap();
        assert_eq!(event.title, "Coaching");
        assert_eq!(
            event.span,
            Span::new(
                normalize("2024-06-10", "09:00").unwrap(),
                normalize("2024-06-10", "10:00").unwrap()
            )
        );
        assert_eq!(
            event.kind,
            EventKind::Booking {
                client_ref: "client-7".into(),
                fee: Some(6000),
                paid: true
            }
        );
        assert!(event.link.is_none());
    }

    #[test]
    fn booking_without_client_fails() {
        let form = EventForm {
            client_ref: None,
            ..booking_form()
        };
        let err = materialize_single(&form).unwrap_err();
        assert!(matches!(err, EngineError::Validation { field: "clientRef", .. }));

        let blank = EventForm {
            client_ref: Some("   ".into()),
            ..booking_form()
        };
        assert!(materialize_single(&blank).is_err());
    }

    #[test]
    fn booking_without_title_fails() {
        let form = EventForm {
            title: None,
            ..booking_form()
        };
        let err = materialize_single(&form).unwrap_err();
        assert!(matches!(err, EngineError::Validation { field: "title", .. }));
    }

    #[test]
    fn missing_date_or_time_fails() {
        let form = EventForm {
            date: None,
            ..background_form()
        };
        assert!(matches!(
            materialize_single(&form).unwrap_err(),
            EngineError::Validation { field: "date", .. }
        ));
        let form = EventForm {
            start_time: None,
            ..background_form()
        };
        assert!(matches!(
            materialize_single(&form).unwrap_err(),
            EngineError::Validation { field: "startTime", .. }
        ));
    }

    #[test]
    fn background_drops_booking_fields() {
        let event = materialize_single(&background_form()).unwrap();
        assert_eq!(event.kind, EventKind::Background);
        assert_eq!(event.title, "Available");
        assert_eq!(event.client_ref(), None);
    }

    #[test]
    fn missing_end_is_point() {
        let form = EventForm {
            end_time: None,
            ..booking_form()
        };
        let event = materialize_single(&form).unwrap();
        assert!(event.span.is_point());
    }

    #[test]
    fn single_end_before_start_rolls_over() {
        let form = EventForm {
            start_time: Some("23:00".into()),
            end_time: Some("00:30".into()),
            ..booking_form()
        };
        let event = materialize_single(&form).unwrap();
        assert_eq!(event.span.duration_ms(), 90 * 60_000);
    }

    #[test]
    fn malformed_time_surfaces() {
        let form = EventForm {
            start_time: Some("9am".into()),
            ..booking_form()
        };
        assert!(matches!(
            materialize_single(&form).unwrap_err(),
            EngineError::MalformedInput { .. }
        ));
    }

    #[test]
    fn recurring_scenario_without_background() {
        let form = EventForm {
            recurrence: Some(scenario_recurrence()),
            ..booking_form()
        };
        let series = materialize_recurring(&form, &[], ConflictPolicy::default()).unwrap();
        assert_eq!(series.events.len(), 3);
        assert!(series.rejected.is_empty());

        let indices: Vec<u32> = series
            .events
            .iter()
            .map(|e| e.link.unwrap().instance_index)
            .collect();
        assert_eq!(indices, vec![0, 1, 2]);

        let roots: HashSet<Ulid> = series.events.iter().filter_map(|e| e.series_id()).collect();
        assert_eq!(roots.len(), 1);
        assert!(roots.contains(&series.root_id));

        let ids: HashSet<Ulid> = series.events.iter().map(|e| e.id).collect();
        assert_eq!(ids.len(), 3);
        assert_eq!(series.instances.len(), 3);
        let june_5 = NaiveDate::from_ymd_opt(2024, 6, 5).unwrap();
        assert_eq!(series.instances[&june_5], series.events[1].id);
        assert!(series.events.iter().all(|e| e.recurrence.as_ref() == Some(&series.rule)));
    }

    #[test]
    fn recurring_rejects_overlapping_background() {
        let form = EventForm {
            recurrence: Some(scenario_recurrence()),
            ..booking_form()
        };
        // Availability slot covering Wednesday 2024-06-05 morning.
        let wed = normalize("2024-06-05", "08:00").unwrap();
        let background = [Span::new(wed, wed + 4 * H)];
        let series = materialize_recurring(&form, &background, ConflictPolicy::RejectOverlapping).unwrap();

        assert_eq!(series.events.len(), 2);
        assert_eq!(series.rejected.len(), 1);
        let rejected = &series.rejected[0];
        assert_eq!(rejected.occurrence.date, NaiveDate::from_ymd_opt(2024, 6, 5).unwrap());
        assert_eq!(rejected.reason, RejectReason::OverlapsBackground(0));
        // Accepted events keep their expansion index.
        let indices: Vec<u32> = series
            .events
            .iter()
            .map(|e| e.link.unwrap().instance_index)
            .collect();
        assert_eq!(indices, vec![0, 2]);
    }

    #[test]
    fn recurring_containment_policy() {
        let form = EventForm {
            recurrence: Some(scenario_recurrence()),
            ..booking_form()
        };
        let mon = normalize("2024-06-03", "08:00").unwrap();
        let background = [Span::new(mon, mon + 4 * H)];
        let series = materialize_recurring(&form, &background, ConflictPolicy::RequireContainment).unwrap();
        assert_eq!(series.events.len(), 1);
        assert_eq!(series.rejected.len(), 2);
        assert!(
            series
                .rejected
                .iter()
                .all(|r| r.reason == RejectReason::OutsideAvailability)
        );
    }

    #[test]
    fn recurring_background_never_checked() {
        let form = EventForm {
            recurrence: Some(scenario_recurrence()),
            ..background_form()
        };
        let all_day = Span::new(0, i64::MAX / 2);
        let series = materialize_recurring(&form, &[all_day], ConflictPolicy::RejectOverlapping).unwrap();
        assert_eq!(series.events.len(), 3);
        assert!(series.events.iter().all(Event::is_background));
    }

    #[test]
    fn recurring_needs_end_time_and_block() {
        let form = EventForm {
            end_time: None,
            recurrence: Some(scenario_recurrence()),
            ..booking_form()
        };
        assert!(matches!(
            materialize_recurring(&form, &[], ConflictPolicy::default()).unwrap_err(),
            EngineError::Validation { field: "endTime", .. }
        ));
        assert!(matches!(
            materialize_recurring(&booking_form(), &[], ConflictPolicy::default()).unwrap_err(),
            EngineError::Validation { field: "recurrence", .. }
        ));
    }

    #[test]
    fn recurring_inverted_bounds_is_empty_series() {
        let mut rec = scenario_recurrence();
        rec.start_recur = "2024-06-14".into();
        rec.end_recur = "2024-06-03".into();
        let form = EventForm {
            recurrence: Some(rec),
            ..booking_form()
        };
        let series = materialize_recurring(&form, &[], ConflictPolicy::default()).unwrap();
        assert!(series.events.is_empty());
        assert!(series.instances.is_empty());
    }

    #[test]
    fn validate_returns_rule_for_recurring() {
        let form = EventForm {
            recurrence: Some(scenario_recurrence()),
            ..booking_form()
        };
        let rule = validate(&form).unwrap().unwrap();
        assert_eq!(rule.estimated_len(), 4);
        assert_eq!(validate(&booking_form()).unwrap(), None);
        let bad = EventForm {
            client_ref: None,
            ..form
        };
        assert!(validate(&bad).is_err());
    }

    #[test]
    fn oversized_series_rejected_locally() {
        let form = EventForm {
            recurrence: Some(RecurrenceForm {
                days_of_week: vec![0, 1, 2, 3, 4, 5, 6],
                start_recur: "2024-01-01".into(),
                end_recur: "2027-12-31".into(),
                exceptions: vec![],
            }),
            ..booking_form()
        };
        assert!(matches!(
            materialize_recurring(&form, &[], ConflictPolicy::default()).unwrap_err(),
            EngineError::LimitExceeded(_)
        ));
    }

    #[test]
    fn dispatch_single_rejected() {
        let start = normalize("2024-06-10", "09:30").unwrap();
        let background = [Span::new(start, start + H)];
        match materialize(&booking_form(), &background, ConflictPolicy::RejectOverlapping).unwrap() {
            Materialized::Rejected(event, reason) => {
                assert!(event.is_booking());
                assert_eq!(reason, RejectReason::OverlapsBackground(0));
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn dispatch_series() {
        let form = EventForm {
            recurrence: Some(scenario_recurrence()),
            ..booking_form()
        };
        assert!(matches!(
            materialize(&form, &[], ConflictPolicy::default()).unwrap(),
            Materialized::Series(_)
        ));
    }
}
