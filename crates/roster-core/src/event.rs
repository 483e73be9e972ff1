//! Class events (recurring time slots) and their single-date overrides.
//!
//! Both are validated when they are created. Reads trust what the store
//! returns.

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::{
  error::ValidationError,
  expand::{Window, expand, session_on},
  rule::RecurrenceRule,
  span::Span,
};

// ─── ClassEvent ──────────────────────────────────────────────────────────────

/// One recurring time slot of a class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassEvent {
  pub event_id:        i64,
  pub class_id:        i64,
  pub duration:        Span,
  pub recurrence_rule: String,
  pub room:            String,
}

impl ClassEvent {
  pub fn rule(&self, local_zone: Tz) -> Result<RecurrenceRule, ValidationError> {
    RecurrenceRule::parse(&self.recurrence_rule, local_zone)
  }
}

/// Input for creating an event. Build it through [`NewClassEvent::validate`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewClassEvent {
  pub class_id:        i64,
  pub duration:        Span,
  pub recurrence_rule: String,
  pub room:            String,
}

impl NewClassEvent {
  /// Reject a non-positive duration or a rule that does not parse.
  pub fn validate(
    class_id: i64,
    duration: &str,
    recurrence_rule: &str,
    room: impl Into<String>,
    local_zone: Tz,
  ) -> Result<Self, ValidationError> {
    let duration = Span::parse_positive(duration)?;
    RecurrenceRule::parse(recurrence_rule, local_zone)?;
    Ok(Self {
      class_id,
      duration,
      recurrence_rule: recurrence_rule.trim().to_owned(),
      room: room.into(),
    })
  }
}

// ─── EventOverride ───────────────────────────────────────────────────────────

/// An exception to exactly one occurrence of an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventOverride {
  pub override_id: i64,
  pub event_id:    i64,
  /// Rule whose expansion lands on the single affected date.
  pub selector:    String,
  pub cancelled:   bool,
  pub duration:    Option<Span>,
  pub room:        Option<String>,
  pub reason:      String,
  pub created_at:  DateTime<Utc>,
}

/// Where an override lands: the date it targets and the instant its selector
/// names on that date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverrideTarget {
  pub date:  NaiveDate,
  pub start: DateTime<Utc>,
}

/// Expand a selector and return its target, or the number of distinct dates
/// it selected when that is not exactly one.
fn resolve_selector(
  selector: &RecurrenceRule,
  horizon: TimeDelta,
) -> Result<OverrideTarget, usize> {
  let from = selector.start();
  let starts = expand(selector, Window::new(from, from + horizon), horizon);
  let mut dates: Vec<NaiveDate> = starts.iter().map(|s| selector.date_of(*s)).collect();
  dates.dedup();
  match (dates.as_slice(), starts.first()) {
    ([date], Some(start)) => Ok(OverrideTarget { date: *date, start: *start }),
    _ => Err(dates.len()),
  }
}

/// Parse `selector` against the event's zone and find its target date in the
/// event's calendar.
fn selector_target(
  selector: &str,
  event_rule: &RecurrenceRule,
  horizon: TimeDelta,
) -> Result<OverrideTarget, ValidationError> {
  let parsed = RecurrenceRule::parse(selector, event_rule.zone())?;
  let target = resolve_selector(&parsed, horizon).map_err(ValidationError::OverrideDateCount)?;
  Ok(OverrideTarget { date: event_rule.date_of(target.start), start: target.start })
}

impl EventOverride {
  /// The date this override applies to, in the event's calendar zone.
  pub fn target(
    &self,
    event_rule: &RecurrenceRule,
    horizon: TimeDelta,
  ) -> Result<OverrideTarget, ValidationError> {
    selector_target(&self.selector, event_rule, horizon)
  }

  /// This override rewritten with `input`'s change, keeping its id.
  pub fn replaced_by(&self, input: NewEventOverride) -> Self {
    Self {
      override_id: self.override_id,
      event_id:    input.event_id,
      selector:    input.selector,
      cancelled:   input.cancelled,
      duration:    input.duration,
      room:        input.room,
      reason:      input.reason,
      created_at:  input.created_at,
    }
  }
}

/// Input for creating an override. Build it through [`NewEventOverride::validate`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEventOverride {
  pub event_id:   i64,
  pub selector:   String,
  pub cancelled:  bool,
  pub duration:   Option<Span>,
  pub room:       Option<String>,
  pub reason:     String,
  /// Decides which of two overrides on one date is newer.
  pub created_at: DateTime<Utc>,
}

/// What an override changes, before validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OverrideChange {
  pub cancelled: bool,
  pub duration:  Option<String>,
  pub room:      Option<String>,
  pub reason:    String,
}

impl NewEventOverride {
  /// Reject a selector that does not resolve to exactly one date, or a
  /// non-positive duration override.
  pub fn validate(
    event_id: i64,
    selector: &str,
    change: OverrideChange,
    event_rule: &RecurrenceRule,
    horizon: TimeDelta,
    created_at: DateTime<Utc>,
  ) -> Result<Self, ValidationError> {
    selector_target(selector, event_rule, horizon)?;
    let duration = change
      .duration
      .as_deref()
      .map(Span::parse_positive)
      .transpose()?;
    Ok(Self {
      event_id,
      selector: selector.trim().to_owned(),
      cancelled: change.cancelled,
      duration,
      room: change.room,
      reason: change.reason,
      created_at,
    })
  }

  /// Build the selector for the session on `date`, at the local time that
  /// session actually starts. Dates without a session fall back to the rule's
  /// DTSTART wall time.
  pub fn for_date(
    event_id: i64,
    date: NaiveDate,
    change: OverrideChange,
    event_rule: &RecurrenceRule,
    horizon: TimeDelta,
    created_at: DateTime<Utc>,
  ) -> Result<Self, ValidationError> {
    let zone = event_rule.zone();
    let time = session_on(event_rule, date)
      .map(|start| start.with_timezone(&zone).time())
      .unwrap_or_else(|| event_rule.start_time());
    let selector = RecurrenceRule::single(date, time, zone)?;
    Self::validate(event_id, &selector.to_string(), change, event_rule, horizon, created_at)
  }

  /// The date this override will apply to.
  pub fn target(
    &self,
    event_rule: &RecurrenceRule,
    horizon: TimeDelta,
  ) -> Result<OverrideTarget, ValidationError> {
    selector_target(&self.selector, event_rule, horizon)
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;
  use chrono_tz::America::Chicago;

  use super::*;

  fn weekly() -> RecurrenceRule {
    RecurrenceRule::parse(
      "DTSTART;TZID=America/Chicago:20240226T090000\nRRULE:FREQ=WEEKLY;BYDAY=MO",
      Tz::UTC,
    )
    .unwrap()
  }

  fn horizon() -> TimeDelta { TimeDelta::days(365) }

  fn created() -> DateTime<Utc> { Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap() }

  #[test]
  fn event_requires_positive_duration_and_valid_rule() {
    let rule = "DTSTART:20240226T090000Z\nRRULE:FREQ=WEEKLY;BYDAY=MO";
    assert!(NewClassEvent::validate(1, "1h", rule, "Room A", Tz::UTC).is_ok());
    assert!(matches!(
      NewClassEvent::validate(1, "0s", rule, "Room A", Tz::UTC),
      Err(ValidationError::NonPositiveDuration(_))
    ));
    assert!(matches!(
      NewClassEvent::validate(1, "-1h", rule, "Room A", Tz::UTC),
      Err(ValidationError::NonPositiveDuration(_))
    ));
    assert!(matches!(
      NewClassEvent::validate(1, "soon", rule, "Room A", Tz::UTC),
      Err(ValidationError::InvalidDuration { .. })
    ));
    assert!(matches!(
      NewClassEvent::validate(1, "1h", "RRULE:FREQ=WEEKLY", "Room A", Tz::UTC),
      Err(ValidationError::InvalidRule(_))
    ));
  }

  #[test]
  fn override_selector_must_pick_exactly_one_date() {
    let rule = weekly();
    let one = "DTSTART;TZID=America/Chicago:20240304T090000\nRRULE:FREQ=DAILY;COUNT=1";
    assert!(NewEventOverride::validate(1, one, OverrideChange::default(), &rule, horizon(), created()).is_ok());

    let two = "DTSTART;TZID=America/Chicago:20240304T090000\nRRULE:FREQ=DAILY;COUNT=2";
    assert_eq!(
      NewEventOverride::validate(1, two, OverrideChange::default(), &rule, horizon(), created()).unwrap_err(),
      ValidationError::OverrideDateCount(2)
    );

    let open = "DTSTART;TZID=America/Chicago:20240304T090000\nRRULE:FREQ=WEEKLY";
    assert!(matches!(
      NewEventOverride::validate(1, open, OverrideChange::default(), &rule, horizon(), created()),
      Err(ValidationError::OverrideDateCount(n)) if n > 1
    ));

    // UNTIL before DTSTART selects nothing.
    let none = "DTSTART;TZID=America/Chicago:20240304T090000\nRRULE:FREQ=DAILY;UNTIL=20240301";
    assert_eq!(
      NewEventOverride::validate(1, none, OverrideChange::default(), &rule, horizon(), created()).unwrap_err(),
      ValidationError::OverrideDateCount(0)
    );
  }

  #[test]
  fn override_duration_must_be_positive() {
    let change = OverrideChange { duration: Some("0m".into()), ..Default::default() };
    let date = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
    assert!(matches!(
      NewEventOverride::for_date(1, date, change, &weekly(), horizon(), created()),
      Err(ValidationError::NonPositiveDuration(_))
    ));
  }

  #[test]
  fn for_date_targets_the_usual_start_time() {
    let rule = weekly();
    let date = NaiveDate::from_ymd_opt(2024, 3, 11).unwrap();
    let change = OverrideChange { cancelled: true, reason: "holiday".into(), ..Default::default() };
    let new = NewEventOverride::for_date(7, date, change, &rule, horizon(), created()).unwrap();
    assert_eq!(new.created_at, created());
    let target = new.target(&rule, horizon()).unwrap();
    assert_eq!(target.date, date);
    // 09:00 CDT.
    assert_eq!(target.start, Utc.with_ymd_and_hms(2024, 3, 11, 14, 0, 0).unwrap());
  }

  #[test]
  fn for_date_follows_a_utc_anchored_session_across_dst() {
    let rule =
      RecurrenceRule::parse("DTSTART:20240226T150000Z\nRRULE:FREQ=WEEKLY;BYDAY=MO", Chicago).unwrap();
    let date = NaiveDate::from_ymd_opt(2024, 3, 11).unwrap();
    let new =
      NewEventOverride::for_date(7, date, OverrideChange::default(), &rule, horizon(), created())
        .unwrap();
    let target = new.target(&rule, horizon()).unwrap();
    assert_eq!(target.date, date);
    // 10:00 CDT, the same instant the session already has.
    assert_eq!(target.start, Utc.with_ymd_and_hms(2024, 3, 11, 15, 0, 0).unwrap());
  }

  #[test]
  fn replacing_keeps_the_override_id() {
    let rule = weekly();
    let date = NaiveDate::from_ymd_opt(2024, 3, 11).unwrap();
    let cancel = OverrideChange { cancelled: true, ..Default::default() };
    let first = NewEventOverride::for_date(7, date, cancel, &rule, horizon(), created()).unwrap();
    let stored = EventOverride {
      override_id: 3,
      event_id:    first.event_id,
      selector:    first.selector,
      cancelled:   first.cancelled,
      duration:    first.duration,
      room:        first.room,
      reason:      first.reason,
      created_at:  first.created_at,
    };

    let later = created() + TimeDelta::hours(1);
    let room = OverrideChange { room: Some("Gym".into()), ..Default::default() };
    let second = NewEventOverride::for_date(7, date, room, &rule, horizon(), later).unwrap();
    let replaced = stored.replaced_by(second);
    assert_eq!(replaced.override_id, 3);
    assert!(!replaced.cancelled);
    assert_eq!(replaced.room.as_deref(), Some("Gym"));
    assert_eq!(replaced.created_at, later);
  }
}
