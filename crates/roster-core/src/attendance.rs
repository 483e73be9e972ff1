//! Attendance records and the reporting views derived from them.

use std::{
  collections::{HashMap, HashSet},
  fmt,
  str::FromStr,
};

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::{class::Enrollment, error::ValidationError};

const CLOCK_FMT: &str = "%H:%M";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
  Present,
  Partial,
  AbsentExcused,
  AbsentUnexcused,
}

impl AttendanceStatus {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Present => "present",
      Self::Partial => "partial",
      Self::AbsentExcused => "absent_excused",
      Self::AbsentUnexcused => "absent_unexcused",
    }
  }

  pub fn is_absence(self) -> bool { matches!(self, Self::AbsentExcused | Self::AbsentUnexcused) }
}

impl fmt::Display for AttendanceStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for AttendanceStatus {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "present" => Ok(Self::Present),
      "partial" => Ok(Self::Partial),
      "absent_excused" => Ok(Self::AbsentExcused),
      "absent_unexcused" => Ok(Self::AbsentUnexcused),
      other => Err(format!("unknown attendance status: {other:?}")),
    }
  }
}

/// One row per (event, user, date).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventAttendance {
  pub event_id:          i64,
  pub user_id:           i64,
  pub date:              NaiveDate,
  pub status:            AttendanceStatus,
  pub note:              String,
  pub check_in:          Option<NaiveTime>,
  pub check_out:         Option<NaiveTime>,
  pub minutes_attended:  Option<i64>,
  pub scheduled_minutes: i64,
}

impl EventAttendance {
  pub fn key(&self) -> (i64, i64, NaiveDate) { (self.event_id, self.user_id, self.date) }
}

/// What the caller reports for one user on one date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceInput {
  pub status:    AttendanceStatus,
  #[serde(default)]
  pub note:      String,
  /// Wall time, `HH:MM`.
  pub check_in:  Option<String>,
  pub check_out: Option<String>,
}

impl AttendanceInput {
  pub fn new(status: AttendanceStatus) -> Self {
    Self { status, note: String::new(), check_in: None, check_out: None }
  }
}

// ─── Time tracking ───────────────────────────────────────────────────────────

/// Status and minutes after reconciling check-in/out with the schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tracked {
  pub status:           AttendanceStatus,
  pub check_in:         Option<NaiveTime>,
  pub check_out:        Option<NaiveTime>,
  pub minutes_attended: Option<i64>,
}

fn parse_clock(value: &str, field: &str) -> Result<NaiveTime, ValidationError> {
  NaiveTime::parse_from_str(value, CLOCK_FMT)
    .map_err(|_| ValidationError::InvalidTimeRange(format!("{field} must be HH:MM, got {value:?}")))
}

fn non_blank(value: &Option<String>) -> Option<&str> {
  value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Derive minutes attended from the input.
///
/// Without times, present and partial count the full scheduled minutes. With
/// both times, the difference is capped at the scheduled minutes and a short
/// `present` becomes `partial`. A lone check-in is an attendance in progress.
pub fn track_time(input: &AttendanceInput, scheduled_minutes: i64) -> Result<Tracked, ValidationError> {
  let mut status = input.status;
  let check_in = non_blank(&input.check_in);
  let check_out = non_blank(&input.check_out);

  let (check_in, check_out, minutes) = match (check_in, check_out) {
    (None, None) => {
      let minutes = matches!(status, AttendanceStatus::Present | AttendanceStatus::Partial)
        .then_some(scheduled_minutes);
      (None, None, minutes)
    }
    (Some(check_in), None) => (Some(parse_clock(check_in, "check-in")?), None, None),
    (None, Some(_)) => {
      return Err(ValidationError::InvalidTimeRange(
        "check-out given without check-in".to_owned(),
      ));
    }
    (Some(check_in), Some(check_out)) => {
      let check_in = parse_clock(check_in, "check-in")?;
      let check_out = parse_clock(check_out, "check-out")?;
      let diff = (check_out - check_in).num_minutes();
      if diff <= 0 {
        return Err(ValidationError::InvalidTimeRange(
          "check-out must be after check-in".to_owned(),
        ));
      }
      let cap = if scheduled_minutes > 0 { scheduled_minutes } else { diff };
      (Some(check_in), Some(check_out), Some(diff.min(cap)))
    }
  };

  match minutes {
    None | Some(0) if status == AttendanceStatus::Partial => {
      return Err(ValidationError::PartialWithoutMinutes);
    }
    Some(m) if status == AttendanceStatus::Present && m > 0 && m < scheduled_minutes => {
      status = AttendanceStatus::Partial;
    }
    _ => {}
  }

  Ok(Tracked { status, check_in, check_out, minutes_attended: minutes })
}

// ─── Reporting ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagKind {
  NoAttendance,
  MultipleAbsences,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttendanceFlag {
  pub user_id:  i64,
  pub class_id: i64,
  pub kind:     FlagKind,
  pub absences: usize,
}

/// Flag enrolled users with no attendance at all, or with more absences
/// than `absence_threshold`.
///
/// `NoAttendance` only applies once the class has held a session and only
/// while `class_active`.
pub fn attendance_flags(
  class_id: i64,
  class_active: bool,
  held_sessions: usize,
  enrollments: &[Enrollment],
  rows: &[EventAttendance],
  absence_threshold: usize,
) -> Vec<AttendanceFlag> {
  let mut recorded: HashMap<i64, (usize, usize)> = HashMap::new();
  for row in rows {
    let entry = recorded.entry(row.user_id).or_default();
    entry.0 += 1;
    if row.status.is_absence() {
      entry.1 += 1;
    }
  }

  let mut flags = Vec::new();
  for enrollment in enrollments.iter().filter(|e| e.is_current()) {
    let (total, absences) = recorded.get(&enrollment.user_id).copied().unwrap_or_default();
    if class_active && held_sessions > 0 && total == 0 {
      flags.push(AttendanceFlag {
        user_id: enrollment.user_id,
        class_id,
        kind: FlagKind::NoAttendance,
        absences,
      });
    }
    if absences > absence_threshold {
      flags.push(AttendanceFlag {
        user_id: enrollment.user_id,
        class_id,
        kind: FlagKind::MultipleAbsences,
        absences,
      });
    }
  }
  flags.sort_by_key(|f| (f.user_id, f.kind as u8));
  flags
}

/// Number of (held session, enrolled user) pairs with no attendance row.
pub fn missing_attendance(
  sessions: &[(i64, NaiveDate)],
  enrollments: &[Enrollment],
  rows: &[EventAttendance],
) -> usize {
  let recorded: HashSet<(i64, i64, NaiveDate)> = rows.iter().map(EventAttendance::key).collect();
  let users: Vec<i64> = enrollments
    .iter()
    .filter(|e| e.is_current())
    .map(|e| e.user_id)
    .collect();
  sessions
    .iter()
    .flat_map(|&(event_id, date)| users.iter().map(move |&user_id| (event_id, user_id, date)))
    .filter(|key| !recorded.contains(key))
    .count()
}
