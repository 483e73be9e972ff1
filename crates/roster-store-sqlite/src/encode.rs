//! Conversions between domain types and SQLite column values.
//!
//! Rows are read into `Raw*` structs inside the connection closure and decoded
//! afterwards, so decode failures surface as [`Error::Decode`] rather than as
//! database errors.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;

use roster_core::{
  attendance::{AttendanceStatus, EventAttendance},
  class::{ClassStatus, Enrollment, EnrollmentStatus, Facility, ProgramClass},
  event::{ClassEvent, EventOverride},
  span::Span,
};

use crate::{Error, Result};

// ─── Scalars ─────────────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(column: &'static str, s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::decode(column, e))
}

pub fn encode_date(date: NaiveDate) -> String { date.format("%Y-%m-%d").to_string() }

pub fn decode_date(column: &'static str, s: &str) -> Result<NaiveDate> {
  NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| Error::decode(column, e))
}

pub fn encode_time(time: NaiveTime) -> String { time.format("%H:%M").to_string() }

fn decode_time(column: &'static str, s: &str) -> Result<NaiveTime> {
  NaiveTime::parse_from_str(s, "%H:%M").map_err(|e| Error::decode(column, e))
}

fn decode_span(column: &'static str, s: &str) -> Result<Span> {
  s.parse::<Span>().map_err(|e| Error::decode(column, e))
}

fn decode_opt<T>(
  column: &'static str,
  value: Option<String>,
  f: impl Fn(&'static str, &str) -> Result<T>,
) -> Result<Option<T>> {
  value.map(|s| f(column, &s)).transpose()
}

// ─── Facilities ──────────────────────────────────────────────────────────────

pub struct RawFacility {
  pub facility_id: i64,
  pub name:        String,
  pub timezone:    String,
}

impl RawFacility {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self { facility_id: row.get(0)?, name: row.get(1)?, timezone: row.get(2)? })
  }

  pub fn into_facility(self) -> Result<Facility> {
    let timezone = self
      .timezone
      .parse::<Tz>()
      .map_err(|e| Error::decode("facilities.timezone", e))?;
    Ok(Facility { facility_id: self.facility_id, name: self.name, timezone })
  }
}

// ─── Classes ─────────────────────────────────────────────────────────────────

pub const CLASS_COLUMNS: &str = "class_id, program_id, facility_id, name, capacity, \
                                 instructor_name, description, status, start_date, \
                                 end_date, credit_hours, archived_at";

pub struct RawClass {
  pub class_id:        i64,
  pub program_id:      i64,
  pub facility_id:     i64,
  pub name:            String,
  pub capacity:        i64,
  pub instructor_name: String,
  pub description:     String,
  pub status:          String,
  pub start_date:      String,
  pub end_date:        Option<String>,
  pub credit_hours:    Option<i64>,
  pub archived_at:     Option<String>,
}

impl RawClass {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      class_id:        row.get(0)?,
      program_id:      row.get(1)?,
      facility_id:     row.get(2)?,
      name:            row.get(3)?,
      capacity:        row.get(4)?,
      instructor_name: row.get(5)?,
      description:     row.get(6)?,
      status:          row.get(7)?,
      start_date:      row.get(8)?,
      end_date:        row.get(9)?,
      credit_hours:    row.get(10)?,
      archived_at:     row.get(11)?,
    })
  }

  pub fn into_class(self) -> Result<ProgramClass> {
    let status = self
      .status
      .parse::<ClassStatus>()
      .map_err(|e| Error::decode("classes.status", e))?;
    Ok(ProgramClass {
      class_id: self.class_id,
      program_id: self.program_id,
      facility_id: self.facility_id,
      name: self.name,
      capacity: self.capacity,
      instructor_name: self.instructor_name,
      description: self.description,
      status,
      start_date: decode_date("classes.start_date", &self.start_date)?,
      end_date: decode_opt("classes.end_date", self.end_date, decode_date)?,
      credit_hours: self.credit_hours,
      archived_at: decode_opt("classes.archived_at", self.archived_at, decode_dt)?,
    })
  }
}

// ─── Events and overrides ────────────────────────────────────────────────────

pub struct RawEvent {
  pub event_id:        i64,
  pub class_id:        i64,
  pub duration:        String,
  pub recurrence_rule: String,
  pub room:            String,
}

impl RawEvent {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      event_id:        row.get(0)?,
      class_id:        row.get(1)?,
      duration:        row.get(2)?,
      recurrence_rule: row.get(3)?,
      room:            row.get(4)?,
    })
  }

  pub fn into_event(self) -> Result<ClassEvent> {
    Ok(ClassEvent {
      event_id:        self.event_id,
      class_id:        self.class_id,
      duration:        decode_span("class_events.duration", &self.duration)?,
      recurrence_rule: self.recurrence_rule,
      room:            self.room,
    })
  }
}

pub struct RawOverride {
  pub override_id: i64,
  pub event_id:    i64,
  pub selector:    String,
  pub cancelled:   bool,
  pub duration:    Option<String>,
  pub room:        Option<String>,
  pub reason:      String,
  pub created_at:  String,
}

impl RawOverride {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      override_id: row.get(0)?,
      event_id:    row.get(1)?,
      selector:    row.get(2)?,
      cancelled:   row.get(3)?,
      duration:    row.get(4)?,
      room:        row.get(5)?,
      reason:      row.get(6)?,
      created_at:  row.get(7)?,
    })
  }

  pub fn into_override(self) -> Result<EventOverride> {
    Ok(EventOverride {
      override_id: self.override_id,
      event_id:    self.event_id,
      selector:    self.selector,
      cancelled:   self.cancelled,
      duration:    decode_opt("event_overrides.duration", self.duration, decode_span)?,
      room:        self.room,
      reason:      self.reason,
      created_at:  decode_dt("event_overrides.created_at", &self.created_at)?,
    })
  }
}

// ─── Enrollment and attendance ───────────────────────────────────────────────

pub struct RawEnrollment {
  pub user_id:  i64,
  pub class_id: i64,
  pub status:   String,
}

impl RawEnrollment {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self { user_id: row.get(0)?, class_id: row.get(1)?, status: row.get(2)? })
  }

  pub fn into_enrollment(self) -> Result<Enrollment> {
    let status = self
      .status
      .parse::<EnrollmentStatus>()
      .map_err(|e| Error::decode("enrollments.status", e))?;
    Ok(Enrollment { user_id: self.user_id, class_id: self.class_id, status })
  }
}

pub struct RawAttendance {
  pub event_id:          i64,
  pub user_id:           i64,
  pub date:              String,
  pub status:            String,
  pub note:              String,
  pub check_in:          Option<String>,
  pub check_out:         Option<String>,
  pub minutes_attended:  Option<i64>,
  pub scheduled_minutes: i64,
}

impl RawAttendance {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      event_id:          row.get(0)?,
      user_id:           row.get(1)?,
      date:              row.get(2)?,
      status:            row.get(3)?,
      note:              row.get(4)?,
      check_in:          row.get(5)?,
      check_out:         row.get(6)?,
      minutes_attended:  row.get(7)?,
      scheduled_minutes: row.get(8)?,
    })
  }

  pub fn into_attendance(self) -> Result<EventAttendance> {
    let status = self
      .status
      .parse::<AttendanceStatus>()
      .map_err(|e| Error::decode("event_attendance.status", e))?;
    Ok(EventAttendance {
      event_id: self.event_id,
      user_id: self.user_id,
      date: decode_date("event_attendance.date", &self.date)?,
      status,
      note: self.note,
      check_in: decode_opt("event_attendance.check_in", self.check_in, decode_time)?,
      check_out: decode_opt("event_attendance.check_out", self.check_out, decode_time)?,
      minutes_attended: self.minutes_attended,
      scheduled_minutes: self.scheduled_minutes,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn bad_timezone_is_a_decode_error() {
    let raw = RawFacility { facility_id: 1, name: "North".into(), timezone: "Mars/Base".into() };
    let err = raw.into_facility().unwrap_err();
    assert!(matches!(err, Error::Decode { column: "facilities.timezone", .. }));
  }

  #[test]
  fn dates_and_times_use_fixed_formats() {
    let date = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
    assert_eq!(encode_date(date), "2024-03-04");
    assert_eq!(decode_date("d", "2024-03-04").unwrap(), date);

    let time = NaiveTime::from_hms_opt(9, 5, 0).unwrap();
    assert_eq!(encode_time(time), "09:05");
    assert_eq!(decode_time("t", "09:05").unwrap(), time);
  }
}
