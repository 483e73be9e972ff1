//! Recurrence rules: the iCalendar subset used to describe class sessions.
//!
//! A rule is two lines, a start instant and a recurrence:
//!
//! ```text
//! DTSTART;TZID=America/Chicago:20240226T090000
//! RRULE:FREQ=WEEKLY;INTERVAL=1;BYDAY=MO,WE;UNTIL=20240304T235959Z
//! ```
//!
//! Parsing validates everything up front, including building the underlying
//! [`rrule::RRuleSet`], so an accepted rule always expands.

use std::fmt;

use chrono::{
  DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, TimeZone, Utc, Weekday,
};
use chrono_tz::Tz;
use rrule::{Frequency as RFrequency, NWeekday, RRule, RRuleSet};

use crate::error::ValidationError;

const DATE_TIME_FMT: &str = "%Y%m%dT%H%M%S";
const DATE_FMT: &str = "%Y%m%d";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frequency {
  Daily,
  Weekly,
  Monthly,
  Yearly,
}

impl Frequency {
  fn as_str(self) -> &'static str {
    match self {
      Self::Daily => "DAILY",
      Self::Weekly => "WEEKLY",
      Self::Monthly => "MONTHLY",
      Self::Yearly => "YEARLY",
    }
  }
}

/// A `BYDAY` entry: a weekday, optionally the n-th of the period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByDay {
  pub ordinal: Option<i16>,
  pub weekday: Weekday,
}

/// The end condition as written; interpreted by [`RecurrenceRule::until_bound`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Until {
  Utc(DateTime<Utc>),
  Local(NaiveDateTime),
  Date(NaiveDate),
}

/// How DTSTART was written, so it can be written back the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Anchor {
  /// `DTSTART:...Z`
  Utc,
  /// No zone, or `TZID=Local`: wall time in the facility zone.
  Floating,
  /// An explicit IANA `TZID`.
  Zoned,
}

#[derive(Debug, Clone)]
pub struct RecurrenceRule {
  /// First occurrence, in the zone the rule expands in (UTC for `Z` stamps).
  dtstart:   DateTime<Tz>,
  /// Zone whose calendar days the rule's dates belong to.
  zone:      Tz,
  anchor:    Anchor,
  frequency: Frequency,
  interval:  u16,
  by_day:    Vec<ByDay>,
  count:     Option<u32>,
  until:     Option<Until>,
  set:       RRuleSet,
}

fn invalid(msg: impl Into<String>) -> ValidationError { ValidationError::InvalidRule(msg.into()) }

fn parse_zone(name: &str) -> Result<Tz, ValidationError> {
  name
    .parse::<Tz>()
    .map_err(|_| ValidationError::UnknownTimeZone(name.to_owned()))
}

/// The instant `date` begins in `zone`.
pub(crate) fn midnight(zone: Tz, date: NaiveDate) -> DateTime<Utc> {
  let naive = date.and_time(NaiveTime::MIN);
  localize(zone, naive)
    .map(|dt| dt.with_timezone(&Utc))
    .unwrap_or_else(|_| naive.and_utc())
}

/// Resolve a wall-clock time in `zone`, taking the earlier instant when the
/// clock is ambiguous.
pub(crate) fn localize(zone: Tz, naive: NaiveDateTime) -> Result<DateTime<Tz>, ValidationError> {
  zone
    .from_local_datetime(&naive)
    .earliest()
    .ok_or_else(|| invalid(format!("{naive} does not exist in {zone}")))
}

fn parse_stamp(value: &str) -> Result<NaiveDateTime, ValidationError> {
  if let Ok(dt) = NaiveDateTime::parse_from_str(value, DATE_TIME_FMT) {
    return Ok(dt);
  }
  NaiveDate::parse_from_str(value, DATE_FMT)
    .map(|d| d.and_time(NaiveTime::MIN))
    .map_err(|_| invalid(format!("bad date-time {value:?}")))
}

fn parse_weekday(code: &str) -> Option<Weekday> {
  match code {
    "MO" => Some(Weekday::Mon),
    "TU" => Some(Weekday::Tue),
    "WE" => Some(Weekday::Wed),
    "TH" => Some(Weekday::Thu),
    "FR" => Some(Weekday::Fri),
    "SA" => Some(Weekday::Sat),
    "SU" => Some(Weekday::Sun),
    _ => None,
  }
}

fn weekday_code(day: Weekday) -> &'static str {
  match day {
    Weekday::Mon => "MO",
    Weekday::Tue => "TU",
    Weekday::Wed => "WE",
    Weekday::Thu => "TH",
    Weekday::Fri => "FR",
    Weekday::Sat => "SA",
    Weekday::Sun => "SU",
  }
}

fn parse_by_day(value: &str) -> Result<Vec<ByDay>, ValidationError> {
  value
    .split(',')
    .map(|item| {
      let item = item.trim();
      if item.len() < 2 {
        return Err(invalid(format!("bad BYDAY entry {item:?}")));
      }
      let (ordinal, code) = item.split_at(item.len() - 2);
      let weekday =
        parse_weekday(code).ok_or_else(|| invalid(format!("bad weekday {code:?}")))?;
      let ordinal = if ordinal.is_empty() {
        None
      } else {
        let n: i16 = ordinal
          .parse()
          .map_err(|_| invalid(format!("bad BYDAY ordinal {ordinal:?}")))?;
        if n == 0 || !(-53..=53).contains(&n) {
          return Err(invalid(format!("BYDAY ordinal out of range: {n}")));
        }
        Some(n)
      };
      Ok(ByDay { ordinal, weekday })
    })
    .collect()
}

struct Start {
  dtstart: DateTime<Tz>,
  zone:    Tz,
  anchor:  Anchor,
}

/// `DTSTART[;TZID=zone]:value`
fn parse_dtstart(line: &str, local_zone: Tz) -> Result<Start, ValidationError> {
  let (head, value) = line
    .split_once(':')
    .ok_or_else(|| invalid("DTSTART has no value"))?;
  let value = value.trim();

  let mut tzid = None;
  for param in head.split(';').skip(1) {
    match param.split_once('=') {
      Some(("TZID", name)) => tzid = Some(name.trim()),
      _ => return Err(invalid(format!("unsupported DTSTART parameter {param:?}"))),
    }
  }

  if let Some(stamp) = value.strip_suffix('Z') {
    if tzid.is_some() {
      return Err(invalid("DTSTART cannot carry both TZID and a UTC stamp"));
    }
    let naive = parse_stamp(stamp)?;
    return Ok(Start {
      dtstart: Tz::UTC.from_utc_datetime(&naive),
      zone:    local_zone,
      anchor:  Anchor::Utc,
    });
  }

  let naive = parse_stamp(value)?;
  let (zone, anchor) = match tzid {
    None | Some("Local") => (local_zone, Anchor::Floating),
    Some(name) => (parse_zone(name)?, Anchor::Zoned),
  };
  Ok(Start { dtstart: localize(zone, naive)?, zone, anchor })
}

fn parse_until(value: &str) -> Result<Until, ValidationError> {
  if let Some(stamp) = value.strip_suffix('Z') {
    let naive = NaiveDateTime::parse_from_str(stamp, DATE_TIME_FMT)
      .map_err(|_| invalid(format!("bad UNTIL {value:?}")))?;
    return Ok(Until::Utc(naive.and_utc()));
  }
  if let Ok(naive) = NaiveDateTime::parse_from_str(value, DATE_TIME_FMT) {
    return Ok(Until::Local(naive));
  }
  NaiveDate::parse_from_str(value, DATE_FMT)
    .map(Until::Date)
    .map_err(|_| invalid(format!("bad UNTIL {value:?}")))
}

/// UNTIL is left out on purpose; [`RecurrenceRule::until_bound`] clips
/// expansion instead, since UNTIL is inclusive through the whole local day.
fn build_set(
  dtstart: DateTime<Tz>,
  frequency: Frequency,
  interval: u16,
  by_day: &[ByDay],
  count: Option<u32>,
) -> Result<RRuleSet, ValidationError> {
  let freq = match frequency {
    Frequency::Daily => RFrequency::Daily,
    Frequency::Weekly => RFrequency::Weekly,
    Frequency::Monthly => RFrequency::Monthly,
    Frequency::Yearly => RFrequency::Yearly,
  };
  let mut unvalidated = RRule::new(freq).interval(interval);
  if let Some(count) = count {
    unvalidated = unvalidated.count(count);
  }
  if !by_day.is_empty() {
    let days = by_day
      .iter()
      .map(|d| match d.ordinal {
        Some(n) => NWeekday::Nth(n, d.weekday),
        None => NWeekday::Every(d.weekday),
      })
      .collect();
    unvalidated = unvalidated.by_weekday(days);
  }
  let start = dtstart.with_timezone(&rrule::Tz::Tz(dtstart.timezone()));
  unvalidated.build(start).map_err(|e| invalid(e.to_string()))
}

impl RecurrenceRule {
  /// Parse and validate a rule. Floating and `TZID=Local` start times are read
  /// in `local_zone`, which also anchors calendar dates for UTC-stamped rules.
  pub fn parse(text: &str, local_zone: Tz) -> Result<Self, ValidationError> {
    let mut start = None;
    let mut recur = None;
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
      if line.starts_with("DTSTART") {
        if start.replace(parse_dtstart(line, local_zone)?).is_some() {
          return Err(invalid("more than one DTSTART"));
        }
      } else if let Some(body) = line.strip_prefix("RRULE:") {
        if recur.replace(body).is_some() {
          return Err(invalid("more than one RRULE"));
        }
      } else {
        return Err(invalid(format!("unsupported line {line:?}")));
      }
    }
    let Start { dtstart, zone, anchor } = start.ok_or_else(|| invalid("missing DTSTART"))?;
    let body = recur.ok_or_else(|| invalid("missing RRULE"))?;

    let mut frequency = None;
    let mut interval = None;
    let mut by_day = None;
    let mut count = None;
    let mut until = None;

    for part in body.split(';').map(str::trim).filter(|p| !p.is_empty()) {
      let (key, value) = part
        .split_once('=')
        .ok_or_else(|| invalid(format!("malformed part {part:?}")))?;
      let duplicate = match key {
        "FREQ" => frequency
          .replace(match value {
            "DAILY" => Frequency::Daily,
            "WEEKLY" => Frequency::Weekly,
            "MONTHLY" => Frequency::Monthly,
            "YEARLY" => Frequency::Yearly,
            other => return Err(invalid(format!("unsupported FREQ {other:?}"))),
          })
          .is_some(),
        "INTERVAL" => {
          let n: u16 = value
            .parse()
            .map_err(|_| invalid(format!("bad INTERVAL {value:?}")))?;
          if n == 0 {
            return Err(invalid("INTERVAL must be at least 1"));
          }
          interval.replace(n).is_some()
        }
        "BYDAY" => by_day.replace(parse_by_day(value)?).is_some(),
        "COUNT" => {
          let n: u32 = value
            .parse()
            .map_err(|_| invalid(format!("bad COUNT {value:?}")))?;
          if n == 0 {
            return Err(invalid("COUNT must be at least 1"));
          }
          count.replace(n).is_some()
        }
        "UNTIL" => until.replace(parse_until(value)?).is_some(),
        other => return Err(invalid(format!("unsupported part {other:?}"))),
      };
      if duplicate {
        return Err(invalid(format!("{key} given more than once")));
      }
    }

    let frequency = frequency.ok_or_else(|| invalid("missing FREQ"))?;
    if count.is_some() && until.is_some() {
      return Err(invalid("COUNT and UNTIL are mutually exclusive"));
    }

    let interval = interval.unwrap_or(1);
    let by_day = by_day.unwrap_or_default();
    let set = build_set(dtstart, frequency, interval, &by_day, count)?;
    Ok(Self { dtstart, zone, anchor, frequency, interval, by_day, count, until, set })
  }

  /// A rule with exactly one occurrence at `date` + `time` in `zone`; the
  /// selector shape used for overrides.
  pub fn single(date: NaiveDate, time: NaiveTime, zone: Tz) -> Result<Self, ValidationError> {
    let text = format!(
      "DTSTART;TZID={}:{}\nRRULE:FREQ=DAILY;COUNT=1",
      zone.name(),
      date.and_time(time).format(DATE_TIME_FMT)
    );
    Self::parse(&text, zone)
  }

  pub fn start(&self) -> DateTime<Utc> { self.dtstart.with_timezone(&Utc) }

  /// Wall-clock start time in the rule's calendar zone.
  pub fn start_time(&self) -> NaiveTime { self.dtstart.with_timezone(&self.zone).time() }

  pub fn zone(&self) -> Tz { self.zone }

  pub fn frequency(&self) -> Frequency { self.frequency }

  pub fn count(&self) -> Option<u32> { self.count }

  pub fn until(&self) -> Option<Until> { self.until }

  /// No UNTIL and no COUNT: the rule never ends on its own.
  pub fn is_open_ended(&self) -> bool { self.count.is_none() && self.until.is_none() }

  /// The calendar date `instant` falls on in the rule's zone.
  pub fn date_of(&self, instant: DateTime<Utc>) -> NaiveDate {
    instant.with_timezone(&self.zone).date_naive()
  }

  /// The last instant covered by UNTIL: the end of its calendar day in the
  /// rule's zone, so "until March 5" includes every session on March 5.
  pub fn until_bound(&self) -> Option<DateTime<Utc>> {
    let day = match self.until? {
      Until::Utc(at) => self.date_of(at),
      Until::Local(naive) => naive.date(),
      Until::Date(date) => date,
    };
    Some(midnight(self.zone, day.succ_opt()?) - TimeDelta::nanoseconds(1))
  }

  /// The same rule ending with `last_day`, or `None` when it already has no
  /// session after that day.
  ///
  /// COUNT is replaced by a date-only UNTIL, which keeps every session up to
  /// and including `last_day`.
  pub fn capped_at(&self, last_day: NaiveDate) -> Result<Option<Self>, ValidationError> {
    let Some(next) = last_day.succ_opt() else { return Ok(None) };
    let cutoff = midnight(self.zone, next);
    if self.until_bound().is_some_and(|bound| bound < cutoff) {
      return Ok(None);
    }
    if self.count.is_some() {
      let tz = rrule::Tz::UTC;
      let later = self
        .set
        .clone()
        .after((cutoff - TimeDelta::seconds(1)).with_timezone(&tz))
        .all(2);
      if later.dates.iter().all(|d| d.with_timezone(&Utc) < cutoff) {
        return Ok(None);
      }
    }

    let set = build_set(self.dtstart, self.frequency, self.interval, &self.by_day, None)?;
    Ok(Some(Self {
      dtstart: self.dtstart,
      zone: self.zone,
      anchor: self.anchor,
      frequency: self.frequency,
      interval: self.interval,
      by_day: self.by_day.clone(),
      count: None,
      until: Some(Until::Date(last_day)),
      set,
    }))
  }

  pub(crate) fn set(&self) -> &RRuleSet { &self.set }
}

impl fmt::Display for RecurrenceRule {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.anchor {
      Anchor::Zoned => write!(
        f,
        "DTSTART;TZID={}:{}",
        self.zone.name(),
        self.dtstart.format(DATE_TIME_FMT)
      )?,
      Anchor::Floating => write!(f, "DTSTART:{}", self.dtstart.format(DATE_TIME_FMT))?,
      Anchor::Utc => write!(f, "DTSTART:{}Z", self.start().format(DATE_TIME_FMT))?,
    }
    write!(f, "\nRRULE:FREQ={}", self.frequency.as_str())?;
    if self.interval != 1 {
      write!(f, ";INTERVAL={}", self.interval)?;
    }
    if !self.by_day.is_empty() {
      let days: Vec<String> = self
        .by_day
        .iter()
        .map(|d| match d.ordinal {
          Some(n) => format!("{n}{}", weekday_code(d.weekday)),
          None => weekday_code(d.weekday).to_owned(),
        })
        .collect();
      write!(f, ";BYDAY={}", days.join(","))?;
    }
    if let Some(count) = self.count {
      write!(f, ";COUNT={count}")?;
    }
    match self.until {
      Some(Until::Utc(at)) => write!(f, ";UNTIL={}Z", at.format(DATE_TIME_FMT))?,
      Some(Until::Local(naive)) => write!(f, ";UNTIL={}", naive.format(DATE_TIME_FMT))?,
      Some(Until::Date(date)) => write!(f, ";UNTIL={}", date.format(DATE_FMT))?,
      None => {}
    }
    Ok(())
  }
}
