//! Recurrence expansion over a bounded window.

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::rule::{RecurrenceRule, midnight};

/// A half-open instant range `[from, to)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
  pub from: DateTime<Utc>,
  pub to:   DateTime<Utc>,
}

impl Window {
  pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self { Self { from, to } }

  pub fn is_empty(&self) -> bool { self.to <= self.from }

  pub fn contains(&self, at: DateTime<Utc>) -> bool { self.from <= at && at < self.to }

  /// Narrow `to` down to `bound` if it is earlier.
  pub fn clamp_end(self, bound: DateTime<Utc>) -> Self {
    Self { from: self.from, to: self.to.min(bound) }
  }
}

/// Occurrence start instants of `rule` inside `window`, strictly increasing.
///
/// UNTIL is honoured through the end of its local day. Rules with neither
/// UNTIL nor COUNT stop at `window.from + horizon`.
pub fn expand(rule: &RecurrenceRule, window: Window, horizon: TimeDelta) -> Vec<DateTime<Utc>> {
  let mut bounded = window;
  let until = rule.until_bound();
  if let Some(until) = until {
    // UNTIL is inclusive; the window end is not.
    bounded = bounded.clamp_end(until + TimeDelta::nanoseconds(1));
  }
  if rule.is_open_ended() {
    bounded = bounded.clamp_end(window.from + horizon);
  }
  if bounded.is_empty() || bounded.to <= rule.start() {
    return Vec::new();
  }

  let tz = rrule::Tz::UTC;
  let result = rule
    .set()
    .clone()
    .after((bounded.from - TimeDelta::seconds(1)).with_timezone(&tz))
    .before(bounded.to.with_timezone(&tz))
    .all(u16::MAX);
  if result.limited {
    tracing::debug!(rule = %rule, "expansion hit the per-call occurrence limit");
  }

  let mut starts: Vec<DateTime<Utc>> = result
    .dates
    .into_iter()
    .map(|d| d.with_timezone(&Utc))
    .filter(|d| bounded.contains(*d))
    .collect();
  starts.sort_unstable();
  starts.dedup();
  starts
}

/// The first session of `rule` on the calendar day `date` in the rule's
/// zone, independent of any window.
pub fn session_on(rule: &RecurrenceRule, date: NaiveDate) -> Option<DateTime<Utc>> {
  let next = date.succ_opt()?;
  let day = Window::new(midnight(rule.zone(), date), midnight(rule.zone(), next));
  expand(rule, day, TimeDelta::days(2)).first().copied()
}

#[cfg(test)]
mod tests {
  use chrono::{NaiveDate, TimeZone};
  use chrono_tz::{America::Chicago, Tz};
  use proptest::prelude::*;

  use super::*;

  fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
  }

  fn rule(text: &str) -> RecurrenceRule { RecurrenceRule::parse(text, Tz::UTC).unwrap() }

  fn year() -> TimeDelta { TimeDelta::days(365) }

  #[test]
  fn weekly_until_is_inclusive_of_its_day() {
    let r = rule("DTSTART:20240226T090000Z\nRRULE:FREQ=WEEKLY;BYDAY=MO;UNTIL=20240304T235959Z");
    let window = Window::new(utc(2024, 2, 19, 0, 0), utc(2024, 3, 12, 0, 0));
    let dates: Vec<NaiveDate> = expand(&r, window, year())
      .into_iter()
      .map(|d| d.date_naive())
      .collect();
    assert_eq!(
      dates,
      [NaiveDate::from_ymd_opt(2024, 2, 26).unwrap(), NaiveDate::from_ymd_opt(2024, 3, 4).unwrap()]
    );
  }

  #[test]
  fn until_earlier_in_the_day_still_covers_the_session() {
    let r = rule("DTSTART:20240226T090000Z\nRRULE:FREQ=WEEKLY;UNTIL=20240304T000000Z");
    let window = Window::new(utc(2024, 2, 1, 0, 0), utc(2024, 4, 1, 0, 0));
    let starts = expand(&r, window, year());
    assert_eq!(starts, [utc(2024, 2, 26, 9, 0), utc(2024, 3, 4, 9, 0)]);
  }

  #[test]
  fn window_is_half_open() {
    let r = rule("DTSTART:20240101T090000Z\nRRULE:FREQ=DAILY;COUNT=10");
    let window = Window::new(utc(2024, 1, 3, 9, 0), utc(2024, 1, 5, 9, 0));
    assert_eq!(expand(&r, window, year()), [utc(2024, 1, 3, 9, 0), utc(2024, 1, 4, 9, 0)]);
  }

  #[test]
  fn count_is_measured_from_dtstart_not_the_window() {
    let r = rule("DTSTART:20240101T090000Z\nRRULE:FREQ=DAILY;COUNT=3");
    let window = Window::new(utc(2024, 1, 2, 0, 0), utc(2024, 2, 1, 0, 0));
    assert_eq!(expand(&r, window, year()), [utc(2024, 1, 2, 9, 0), utc(2024, 1, 3, 9, 0)]);
  }

  #[test]
  fn open_ended_rules_stop_at_the_horizon() {
    let r = rule("DTSTART:20240101T090000Z\nRRULE:FREQ=DAILY");
    let window = Window::new(utc(2024, 1, 1, 0, 0), utc(2100, 1, 1, 0, 0));
    let starts = expand(&r, window, TimeDelta::days(7));
    assert_eq!(starts.len(), 7);
    assert_eq!(starts.last().copied(), Some(utc(2024, 1, 7, 9, 0)));
  }

  #[test]
  fn zoned_rules_keep_wall_time_across_dst() {
    let r = RecurrenceRule::parse(
      "DTSTART;TZID=America/Chicago:20240304T090000\nRRULE:FREQ=WEEKLY;COUNT=2",
      Tz::UTC,
    )
    .unwrap();
    let window = Window::new(utc(2024, 3, 1, 0, 0), utc(2024, 3, 31, 0, 0));
    let starts = expand(&r, window, year());
    // CST before March 10, CDT after.
    assert_eq!(starts, [utc(2024, 3, 4, 15, 0), utc(2024, 3, 11, 14, 0)]);
    for s in starts {
      assert_eq!(s.with_timezone(&Chicago).format("%H:%M").to_string(), "09:00");
    }
  }

  #[test]
  fn session_on_keeps_the_utc_instant_of_the_day() {
    let r = RecurrenceRule::parse("DTSTART:20240226T150000Z\nRRULE:FREQ=WEEKLY;BYDAY=MO", Chicago)
      .unwrap();
    // 09:00 CST before the change, 10:00 CDT after; same instant.
    assert_eq!(session_on(&r, NaiveDate::from_ymd_opt(2024, 3, 4).unwrap()), Some(utc(2024, 3, 4, 15, 0)));
    assert_eq!(session_on(&r, NaiveDate::from_ymd_opt(2024, 3, 11).unwrap()), Some(utc(2024, 3, 11, 15, 0)));
    assert_eq!(session_on(&r, NaiveDate::from_ymd_opt(2024, 3, 12).unwrap()), None);
  }

  #[test]
  fn window_before_dtstart_is_empty() {
    let r = rule("DTSTART:20240301T090000Z\nRRULE:FREQ=DAILY");
    let window = Window::new(utc(2024, 1, 1, 0, 0), utc(2024, 2, 1, 0, 0));
    assert!(expand(&r, window, year()).is_empty());
  }

  proptest! {
    #[test]
    fn expansion_is_deterministic_and_strictly_increasing(
      interval in 1u16..4,
      days in proptest::sample::subsequence(vec!["MO", "TU", "WE", "TH", "FR", "SA", "SU"], 1..7),
      offset_days in 0i64..60,
      span_days in 1i64..120,
    ) {
      let text = format!(
        "DTSTART;TZID=America/Chicago:20240105T183000\nRRULE:FREQ=WEEKLY;INTERVAL={interval};BYDAY={}",
        days.join(",")
      );
      let r = RecurrenceRule::parse(&text, Tz::UTC).unwrap();
      let from = utc(2024, 1, 1, 0, 0) + TimeDelta::days(offset_days);
      let window = Window::new(from, from + TimeDelta::days(span_days));

      let first = expand(&r, window, year());
      let second = expand(&r, window, year());
      prop_assert_eq!(&first, &second);
      prop_assert!(first.windows(2).all(|w| w[0] < w[1]));
      prop_assert!(first.iter().all(|d| window.contains(*d)));
    }
  }
}
