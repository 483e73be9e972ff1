//! Display-ready calendars built from events, their rules and overrides.
//!
//! Each event is expanded and resolved on its own; the per-event lists are
//! then merged lazily by start time. Nothing here is cached.

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use chrono_tz::Tz;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{
  event::{ClassEvent, EventOverride},
  expand::{Window, expand},
  resolve::{Occurrence, OverrideAnomaly, resolve},
  rule::{RecurrenceRule, midnight},
  span::Span,
};

/// Which classes a calendar covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by", content = "id", rename_all = "snake_case")]
pub enum ClassFilter {
  Facility(i64),
  Class(i64),
  Program(i64),
}

/// Everything needed to materialize one event.
#[derive(Debug, Clone)]
pub struct EventSource {
  pub event:        ClassEvent,
  pub rule:         RecurrenceRule,
  pub overrides:    Vec<EventOverride>,
  pub class_name:   String,
  pub program_name: String,
}

/// One occurrence as shown on a calendar.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventInstance {
  pub event_id:     i64,
  pub class_id:     i64,
  pub class_name:   String,
  pub program_name: String,
  pub date:         NaiveDate,
  pub start:        DateTime<Tz>,
  pub duration:     Span,
  pub room:         String,
  pub cancelled:    bool,
  pub override_id:  Option<i64>,
  pub reason:       Option<String>,
}

impl EventInstance {
  pub fn start_utc(&self) -> DateTime<Utc> { self.start.with_timezone(&Utc) }

  pub fn end_utc(&self) -> DateTime<Utc> { self.start_utc() + self.duration.as_delta() }

  fn from_occurrence(source: &EventSource, occurrence: Occurrence, zone: Tz) -> Self {
    Self {
      event_id:     occurrence.event_id,
      class_id:     source.event.class_id,
      class_name:   source.class_name.clone(),
      program_name: source.program_name.clone(),
      date:         occurrence.date,
      start:        occurrence.start.with_timezone(&zone),
      duration:     occurrence.duration,
      room:         occurrence.room,
      cancelled:    occurrence.cancelled,
      override_id:  occurrence.override_id,
      reason:       occurrence.reason,
    }
  }
}

/// Expand and resolve a single event over `window`.
pub fn materialize_event(
  source: &EventSource,
  window: Window,
  horizon: TimeDelta,
  zone: Tz,
) -> (Vec<EventInstance>, Vec<OverrideAnomaly>) {
  let starts = expand(&source.rule, window, horizon);
  let resolution = resolve(&source.event, &source.rule, &starts, &source.overrides, horizon);
  let instances = resolution
    .occurrences
    .into_iter()
    .map(|o| EventInstance::from_occurrence(source, o, zone))
    .collect();
  (instances, resolution.anomalies)
}

/// A materialized window: one sorted list per event plus any anomalies.
#[derive(Debug, Clone, Default)]
pub struct Calendar {
  lists:     Vec<Vec<EventInstance>>,
  anomalies: Vec<OverrideAnomaly>,
}

impl Calendar {
  pub fn build(sources: &[EventSource], window: Window, horizon: TimeDelta, zone: Tz) -> Self {
    let mut calendar = Self::default();
    for source in sources {
      let (instances, anomalies) = materialize_event(source, window, horizon, zone);
      tracing::debug!(
        event_id = source.event.event_id,
        instances = instances.len(),
        "materialized event"
      );
      calendar.lists.push(instances);
      calendar.anomalies.extend(anomalies);
    }
    calendar
  }

  /// Instances ordered by start, then event id. Can be called repeatedly.
  pub fn iter(&self) -> impl Iterator<Item = &EventInstance> + '_ {
    self
      .lists
      .iter()
      .map(|list| list.iter())
      .kmerge_by(|a, b| (a.start_utc(), a.event_id) < (b.start_utc(), b.event_id))
  }

  pub fn anomalies(&self) -> &[OverrideAnomaly] { &self.anomalies }

  pub fn len(&self) -> usize { self.lists.iter().map(Vec::len).sum() }

  pub fn is_empty(&self) -> bool { self.len() == 0 }
}

/// Whether an event meets on a given date.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "instance", rename_all = "snake_case")]
pub enum OccurrenceState {
  Absent,
  Scheduled(EventInstance),
  Cancelled(EventInstance),
}

impl OccurrenceState {
  pub fn exists(&self) -> bool { !matches!(self, Self::Absent) }

  pub fn is_cancelled(&self) -> bool { matches!(self, Self::Cancelled(_)) }

  pub fn instance(&self) -> Option<&EventInstance> {
    match self {
      Self::Absent => None,
      Self::Scheduled(i) | Self::Cancelled(i) => Some(i),
    }
  }
}

/// The window covering `date` as a calendar day in `zone`.
pub fn day_window(date: NaiveDate, zone: Tz) -> Window {
  let next = date.succ_opt().unwrap_or(date);
  Window::new(midnight(zone, date), midnight(zone, next))
}

/// Resolve one date of one event through expansion and overrides.
pub fn occurrence_on(source: &EventSource, date: NaiveDate, horizon: TimeDelta) -> OccurrenceState {
  let zone = source.rule.zone();
  let window = day_window(date, zone);
  // Open-ended rules cap from the window start; one day always fits.
  let (instances, _) = materialize_event(source, window, horizon.max(TimeDelta::days(1)), zone);
  match instances.into_iter().find(|i| i.date == date) {
    None => OccurrenceState::Absent,
    Some(i) if i.cancelled => OccurrenceState::Cancelled(i),
    Some(i) => OccurrenceState::Scheduled(i),
  }
}
