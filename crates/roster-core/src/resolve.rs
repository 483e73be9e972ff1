//! Merging sparse single-date overrides onto an event's expanded occurrences.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use serde::Serialize;

use crate::{
  event::{ClassEvent, EventOverride},
  expand::session_on,
  rule::RecurrenceRule,
  span::Span,
};

/// One session of an event after overrides are applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Occurrence {
  pub event_id:    i64,
  /// Calendar date in the event rule's zone.
  pub date:        NaiveDate,
  pub start:       DateTime<Utc>,
  pub duration:    Span,
  pub room:        String,
  pub cancelled:   bool,
  pub override_id: Option<i64>,
  pub reason:      Option<String>,
}

impl Occurrence {
  pub fn end(&self) -> DateTime<Utc> { self.start + self.duration.as_delta() }
}

/// Override data that could not be applied cleanly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OverrideAnomaly {
  /// Several overrides target one date; only `kept` applies.
  DuplicateDate {
    event_id:  i64,
    date:      NaiveDate,
    kept:      i64,
    discarded: Vec<i64>,
  },
  /// The override targets a date on which the event has no session.
  Orphaned { event_id: i64, override_id: i64, date: NaiveDate },
  /// The stored selector no longer resolves to a single date.
  Unresolvable { event_id: i64, override_id: i64, reason: String },
}

#[derive(Debug, Clone, Default)]
pub struct Resolution {
  /// Sorted by start.
  pub occurrences: Vec<Occurrence>,
  pub anomalies:   Vec<OverrideAnomaly>,
}

/// Apply `overrides` to the sessions of `event` starting at `starts`.
///
/// Cancelled dates are kept and flagged. When several overrides share a date,
/// the newest (then highest id) wins.
pub fn resolve(
  event: &ClassEvent,
  rule: &RecurrenceRule,
  starts: &[DateTime<Utc>],
  overrides: &[EventOverride],
  horizon: TimeDelta,
) -> Resolution {
  let mut anomalies = Vec::new();

  let mut by_date: BTreeMap<NaiveDate, Vec<(&EventOverride, DateTime<Utc>)>> = BTreeMap::new();
  for ov in overrides {
    match ov.target(rule, horizon) {
      Ok(target) => by_date.entry(target.date).or_default().push((ov, target.start)),
      Err(e) => {
        tracing::warn!(
          event_id = event.event_id,
          override_id = ov.override_id,
          error = %e,
          "override selector does not resolve to a single date"
        );
        anomalies.push(OverrideAnomaly::Unresolvable {
          event_id:    event.event_id,
          override_id: ov.override_id,
          reason:      e.to_string(),
        });
      }
    }
  }

  let mut occurrences: Vec<Occurrence> = starts
    .iter()
    .map(|&start| Occurrence {
      event_id: event.event_id,
      date: rule.date_of(start),
      start,
      duration: event.duration,
      room: event.room.clone(),
      cancelled: false,
      override_id: None,
      reason: None,
    })
    .collect();

  for occurrence in &mut occurrences {
    let Some(mut candidates) = by_date.remove(&occurrence.date) else { continue };
    candidates.sort_by_key(|(ov, _)| (ov.created_at, ov.override_id));
    let Some((winner, selected_start)) = candidates.pop() else { continue };
    if !candidates.is_empty() {
      let discarded: Vec<i64> = candidates.iter().map(|(ov, _)| ov.override_id).collect();
      tracing::warn!(
        event_id = event.event_id,
        date = %occurrence.date,
        kept = winner.override_id,
        ?discarded,
        "several overrides target one date; keeping the newest"
      );
      anomalies.push(OverrideAnomaly::DuplicateDate {
        event_id: event.event_id,
        date: occurrence.date,
        kept: winner.override_id,
        discarded,
      });
    }

    occurrence.override_id = Some(winner.override_id);
    occurrence.reason = Some(winner.reason.clone());
    if winner.cancelled {
      occurrence.cancelled = true;
    } else {
      occurrence.start = selected_start;
      if let Some(duration) = winner.duration {
        occurrence.duration = duration;
      }
      if let Some(room) = &winner.room {
        occurrence.room = room.clone();
      }
    }
  }

  // Whatever is left targets dates outside `starts`; only dates with no
  // session at all are anomalies.
  for (date, candidates) in by_date {
    if session_on(rule, date).is_some() {
      continue;
    }
    for (ov, _) in candidates {
      tracing::warn!(
        event_id = event.event_id,
        override_id = ov.override_id,
        %date,
        "override targets a date with no session"
      );
      anomalies.push(OverrideAnomaly::Orphaned {
        event_id: event.event_id,
        override_id: ov.override_id,
        date,
      });
    }
  }

  occurrences.sort_by_key(|o| o.start);
  Resolution { occurrences, anomalies }
}

#[cfg(test)]
mod tests {
  use chrono::{NaiveTime, TimeZone};
  use chrono_tz::Tz;

  use super::*;
  use crate::{
    event::{NewEventOverride, OverrideChange},
    expand::{Window, expand},
  };

  fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
  }

  fn date(m: u32, d: u32) -> NaiveDate { NaiveDate::from_ymd_opt(2024, m, d).unwrap() }

  fn horizon() -> TimeDelta { TimeDelta::days(365) }

  fn event() -> (ClassEvent, RecurrenceRule) {
    let event = ClassEvent {
      event_id:        5,
      class_id:        1,
      duration:        "1h".parse().unwrap(),
      recurrence_rule: "DTSTART:20240226T090000Z\nRRULE:FREQ=WEEKLY;BYDAY=MO;COUNT=4".into(),
      room:            "Room A".into(),
    };
    let rule = event.rule(Tz::UTC).unwrap();
    (event, rule)
  }

  fn stored(id: i64, on: NaiveDate, change: OverrideChange, created: DateTime<Utc>) -> EventOverride {
    let (_, rule) = event();
    let new = NewEventOverride::for_date(5, on, change, &rule, horizon(), created).unwrap();
    EventOverride {
      override_id: id,
      event_id:    5,
      selector:    new.selector,
      cancelled:   new.cancelled,
      duration:    new.duration,
      room:        new.room,
      reason:      new.reason,
      created_at:  created,
    }
  }

  fn resolve_all(overrides: &[EventOverride]) -> Resolution {
    let (event, rule) = event();
    let starts = expand(&rule, Window::new(utc(2024, 2, 1, 0, 0), utc(2024, 4, 1, 0, 0)), horizon());
    resolve(&event, &rule, &starts, overrides, horizon())
  }

  #[test]
  fn cancelled_dates_stay_in_place() {
    let cancel = OverrideChange { cancelled: true, reason: "lockdown".into(), ..Default::default() };
    let res = resolve_all(&[stored(1, date(3, 4), cancel, utc(2024, 3, 1, 0, 0))]);

    assert_eq!(res.occurrences.len(), 4);
    let flagged: Vec<_> = res.occurrences.iter().filter(|o| o.cancelled).collect();
    assert_eq!(flagged.len(), 1);
    assert_eq!(flagged[0].date, date(3, 4));
    assert_eq!(flagged[0].override_id, Some(1));
    assert_eq!(flagged[0].reason.as_deref(), Some("lockdown"));
    assert!(res.occurrences.iter().filter(|o| o.date != date(3, 4)).all(|o| o.override_id.is_none()));
    assert!(res.anomalies.is_empty());
  }

  #[test]
  fn modifying_override_changes_one_date_only() {
    let change = OverrideChange {
      duration: Some("90m".into()),
      room: Some("Library".into()),
      ..Default::default()
    };
    let res = resolve_all(&[stored(1, date(3, 11), change, utc(2024, 3, 1, 0, 0))]);

    let moved = res.occurrences.iter().find(|o| o.date == date(3, 11)).unwrap();
    assert_eq!(moved.room, "Library");
    assert_eq!(moved.duration, Span::from_minutes(90));
    assert_eq!(moved.end(), utc(2024, 3, 11, 10, 30));
    assert!(!moved.cancelled);
    for other in res.occurrences.iter().filter(|o| o.date != date(3, 11)) {
      assert_eq!(other.room, "Room A");
      assert_eq!(other.duration, Span::from_minutes(60));
    }
  }

  #[test]
  fn modifying_override_can_move_the_time_of_day() {
    let (event, rule) = event();
    let selector = RecurrenceRule::single(
      date(3, 4),
      NaiveTime::from_hms_opt(13, 0, 0).unwrap(),
      rule.zone(),
    )
    .unwrap();
    let new = NewEventOverride::validate(
      5,
      &selector.to_string(),
      OverrideChange::default(),
      &rule,
      horizon(),
      utc(2024, 3, 1, 0, 0),
    )
    .unwrap();
    let ov = EventOverride {
      override_id: 9,
      event_id:    5,
      selector:    new.selector,
      cancelled:   false,
      duration:    None,
      room:        None,
      reason:      String::new(),
      created_at:  utc(2024, 3, 1, 0, 0),
    };
    let starts = expand(&rule, Window::new(utc(2024, 2, 1, 0, 0), utc(2024, 4, 1, 0, 0)), horizon());
    let res = resolve(&event, &rule, &starts, &[ov], horizon());
    let moved = res.occurrences.iter().find(|o| o.date == date(3, 4)).unwrap();
    assert_eq!(moved.start, utc(2024, 3, 4, 13, 0));
    assert!(res.occurrences.windows(2).all(|w| w[0].start <= w[1].start));
  }

  #[test]
  fn newest_override_wins_a_shared_date() {
    let older = stored(
      1,
      date(3, 4),
      OverrideChange { room: Some("Gym".into()), ..Default::default() },
      utc(2024, 3, 1, 0, 0),
    );
    let newer = stored(
      2,
      date(3, 4),
      OverrideChange { room: Some("Chapel".into()), ..Default::default() },
      utc(2024, 3, 2, 0, 0),
    );
    let res = resolve_all(&[newer, older]);

    let hit = res.occurrences.iter().find(|o| o.date == date(3, 4)).unwrap();
    assert_eq!(hit.room, "Chapel");
    assert_eq!(
      res.anomalies,
      [OverrideAnomaly::DuplicateDate {
        event_id:  5,
        date:      date(3, 4),
        kept:      2,
        discarded: vec![1],
      }]
    );
  }

  #[test]
  fn equal_timestamps_fall_back_to_highest_id() {
    let at = utc(2024, 3, 1, 0, 0);
    let a = stored(4, date(3, 4), OverrideChange { room: Some("A".into()), ..Default::default() }, at);
    let b = stored(7, date(3, 4), OverrideChange { room: Some("B".into()), ..Default::default() }, at);
    let res = resolve_all(&[b, a]);
    let hit = res.occurrences.iter().find(|o| o.date == date(3, 4)).unwrap();
    assert_eq!(hit.override_id, Some(7));
  }

  #[test]
  fn override_on_an_off_day_is_orphaned() {
    // Tuesday: the event only meets on Mondays.
    let ov = stored(3, date(3, 5), OverrideChange::default(), utc(2024, 3, 1, 0, 0));
    let res = resolve_all(&[ov]);
    assert!(res.occurrences.iter().all(|o| o.override_id.is_none()));
    assert_eq!(
      res.anomalies,
      [OverrideAnomaly::Orphaned { event_id: 5, override_id: 3, date: date(3, 5) }]
    );
  }

  #[test]
  fn override_outside_the_window_is_not_an_anomaly() {
    let (event, rule) = event();
    let ov = stored(3, date(3, 18), OverrideChange::default(), utc(2024, 3, 1, 0, 0));
    let starts = expand(&rule, Window::new(utc(2024, 2, 26, 0, 0), utc(2024, 3, 5, 0, 0)), horizon());
    let res = resolve(&event, &rule, &starts, &[ov], horizon());
    assert_eq!(res.occurrences.len(), 2);
    assert!(res.anomalies.is_empty());
  }
}
