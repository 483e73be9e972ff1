//! [`SqliteStore`], the SQLite implementation of [`ScheduleStore`].

use std::path::Path;

use chrono::NaiveDate;
use rusqlite::OptionalExtension as _;

use roster_core::{
  attendance::EventAttendance,
  class::{Enrollment, Facility, NewFacility, NewProgramClass, Program, ProgramClass},
  event::{ClassEvent, EventOverride, NewClassEvent, NewEventOverride},
  materialize::ClassFilter,
  store::ScheduleStore,
};

use crate::{
  encode::{
    encode_date, encode_dt, encode_time, RawAttendance, RawClass, RawEnrollment, RawEvent,
    RawFacility, RawOverride, CLASS_COLUMNS,
  },
  schema::SCHEMA,
  Error, Result,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Roster schedule store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let path = path.as_ref().to_path_buf();
    tracing::debug!(path = %path.display(), "opening sqlite store");
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

const EVENT_COLUMNS: &str = "event_id, class_id, duration, recurrence_rule, room";

const OVERRIDE_COLUMNS: &str =
  "override_id, event_id, selector, cancelled, duration, room, reason, created_at";

const ATTENDANCE_COLUMNS: &str = "a.event_id, a.user_id, a.date, a.status, a.note, \
                                  a.check_in, a.check_out, a.minutes_attended, \
                                  a.scheduled_minutes";

// ─── ScheduleStore impl ──────────────────────────────────────────────────────

impl ScheduleStore for SqliteStore {
  type Error = Error;

  // ── Facilities and programs ───────────────────────────────────────────

  async fn create_facility(&self, input: NewFacility) -> Result<Facility> {
    let name = input.name.clone();
    let zone = input.timezone.name().to_string();
    let facility_id = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO facilities (name, timezone) VALUES (?1, ?2)",
          rusqlite::params![name, zone],
        )?;
        Ok(conn.last_insert_rowid())
      })
      .await?;
    Ok(Facility { facility_id, name: input.name, timezone: input.timezone })
  }

  async fn fetch_facility(&self, facility_id: i64) -> Result<Option<Facility>> {
    let raw = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT facility_id, name, timezone FROM facilities WHERE facility_id = ?1",
              rusqlite::params![facility_id],
              RawFacility::from_row,
            )
            .optional()?,
        )
      })
      .await?;
    raw.map(RawFacility::into_facility).transpose()
  }

  async fn create_program(&self, name: String) -> Result<Program> {
    let insert_name = name.clone();
    let program_id = self
      .conn
      .call(move |conn| {
        conn.execute("INSERT INTO programs (name) VALUES (?1)", rusqlite::params![
          insert_name
        ])?;
        Ok(conn.last_insert_rowid())
      })
      .await?;
    Ok(Program { program_id, name })
  }

  async fn fetch_program(&self, program_id: i64) -> Result<Option<Program>> {
    let program = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT program_id, name FROM programs WHERE program_id = ?1",
              rusqlite::params![program_id],
              |row| Ok(Program { program_id: row.get(0)?, name: row.get(1)? }),
            )
            .optional()?,
        )
      })
      .await?;
    Ok(program)
  }

  // ── Classes ───────────────────────────────────────────────────────────

  async fn create_class(&self, input: NewProgramClass) -> Result<ProgramClass> {
    let row = input.clone();
    let class_id = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO classes
             (program_id, facility_id, name, capacity, instructor_name, description,
              status, start_date, end_date, credit_hours)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
          rusqlite::params![
            row.program_id,
            row.facility_id,
            row.name,
            row.capacity,
            row.instructor_name,
            row.description,
            row.status.as_str(),
            encode_date(row.start_date),
            row.end_date.map(encode_date),
            row.credit_hours,
          ],
        )?;
        Ok(conn.last_insert_rowid())
      })
      .await?;

    Ok(ProgramClass {
      class_id,
      program_id: input.program_id,
      facility_id: input.facility_id,
      name: input.name,
      capacity: input.capacity,
      instructor_name: input.instructor_name,
      description: input.description,
      status: input.status,
      start_date: input.start_date,
      end_date: input.end_date,
      credit_hours: input.credit_hours,
      archived_at: None,
    })
  }

  async fn save_class(&self, class: ProgramClass) -> Result<ProgramClass> {
    let row = class.clone();
    let updated = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE classes SET
             name = ?2, capacity = ?3, instructor_name = ?4, description = ?5,
             status = ?6, end_date = ?7, credit_hours = ?8, archived_at = ?9
           WHERE class_id = ?1",
          rusqlite::params![
            row.class_id,
            row.name,
            row.capacity,
            row.instructor_name,
            row.description,
            row.status.as_str(),
            row.end_date.map(encode_date),
            row.credit_hours,
            row.archived_at.map(encode_dt),
          ],
        )?)
      })
      .await?;

    if updated == 0 {
      return Err(Error::ClassNotFound(class.class_id));
    }
    Ok(class)
  }

  async fn fetch_class(&self, class_id: i64) -> Result<Option<ProgramClass>> {
    let raw = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {CLASS_COLUMNS} FROM classes WHERE class_id = ?1"),
              rusqlite::params![class_id],
              RawClass::from_row,
            )
            .optional()?,
        )
      })
      .await?;
    raw.map(RawClass::into_class).transpose()
  }

  async fn list_classes(&self, filter: ClassFilter) -> Result<Vec<ProgramClass>> {
    let (column, id) = match filter {
      ClassFilter::Facility(id) => ("facility_id", id),
      ClassFilter::Class(id) => ("class_id", id),
      ClassFilter::Program(id) => ("program_id", id),
    };
    let raws = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {CLASS_COLUMNS} FROM classes WHERE {column} = ?1 ORDER BY class_id"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![id], RawClass::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawClass::into_class).collect()
  }

  // ── Events and overrides ──────────────────────────────────────────────

  async fn create_event(&self, input: NewClassEvent) -> Result<ClassEvent> {
    let row = input.clone();
    let event_id = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO class_events (class_id, duration, recurrence_rule, room)
           VALUES (?1, ?2, ?3, ?4)",
          rusqlite::params![
            row.class_id,
            row.duration.to_string(),
            row.recurrence_rule,
            row.room
          ],
        )?;
        Ok(conn.last_insert_rowid())
      })
      .await?;

    Ok(ClassEvent {
      event_id,
      class_id: input.class_id,
      duration: input.duration,
      recurrence_rule: input.recurrence_rule,
      room: input.room,
    })
  }

  async fn fetch_event(&self, event_id: i64) -> Result<Option<ClassEvent>> {
    let raw = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {EVENT_COLUMNS} FROM class_events WHERE event_id = ?1"),
              rusqlite::params![event_id],
              RawEvent::from_row,
            )
            .optional()?,
        )
      })
      .await?;
    raw.map(RawEvent::into_event).transpose()
  }

  async fn fetch_events(&self, class_id: i64) -> Result<Vec<ClassEvent>> {
    let raws = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {EVENT_COLUMNS} FROM class_events WHERE class_id = ?1 ORDER BY event_id"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![class_id], RawEvent::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawEvent::into_event).collect()
  }

  async fn save_event(&self, event: ClassEvent) -> Result<ClassEvent> {
    let row = event.clone();
    let updated = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE class_events SET duration = ?2, recurrence_rule = ?3, room = ?4
           WHERE event_id = ?1",
          rusqlite::params![
            row.event_id,
            row.duration.to_string(),
            row.recurrence_rule,
            row.room
          ],
        )?)
      })
      .await?;

    if updated == 0 {
      return Err(Error::EventNotFound(event.event_id));
    }
    Ok(event)
  }

  async fn create_override(&self, input: NewEventOverride) -> Result<EventOverride> {
    let row = input.clone();
    let override_id = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO event_overrides
             (event_id, selector, cancelled, duration, room, reason, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
          rusqlite::params![
            row.event_id,
            row.selector,
            row.cancelled,
            row.duration.map(|d| d.to_string()),
            row.room,
            row.reason,
            encode_dt(row.created_at),
          ],
        )?;
        Ok(conn.last_insert_rowid())
      })
      .await?;

    Ok(EventOverride {
      override_id,
      event_id: input.event_id,
      selector: input.selector,
      cancelled: input.cancelled,
      duration: input.duration,
      room: input.room,
      reason: input.reason,
      created_at: input.created_at,
    })
  }

  async fn save_override(&self, ov: EventOverride) -> Result<EventOverride> {
    let row = ov.clone();
    let updated = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE event_overrides SET
             selector = ?2, cancelled = ?3, duration = ?4, room = ?5, reason = ?6,
             created_at = ?7
           WHERE override_id = ?1",
          rusqlite::params![
            row.override_id,
            row.selector,
            row.cancelled,
            row.duration.map(|d| d.to_string()),
            row.room,
            row.reason,
            encode_dt(row.created_at),
          ],
        )?)
      })
      .await?;

    if updated == 0 {
      return Err(Error::OverrideNotFound(ov.override_id));
    }
    Ok(ov)
  }

  async fn fetch_overrides(&self, event_id: i64) -> Result<Vec<EventOverride>> {
    let raws = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {OVERRIDE_COLUMNS} FROM event_overrides
           WHERE event_id = ?1 ORDER BY override_id"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![event_id], RawOverride::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawOverride::into_override).collect()
  }

  async fn delete_override(&self, override_id: i64) -> Result<bool> {
    let deleted = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "DELETE FROM event_overrides WHERE override_id = ?1",
          rusqlite::params![override_id],
        )?)
      })
      .await?;
    Ok(deleted > 0)
  }

  // ── Enrollment and attendance ─────────────────────────────────────────

  async fn enroll(&self, enrollment: Enrollment) -> Result<Enrollment> {
    let row = enrollment.clone();
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO enrollments (user_id, class_id, status) VALUES (?1, ?2, ?3)
           ON CONFLICT (user_id, class_id) DO UPDATE SET status = excluded.status",
          rusqlite::params![row.user_id, row.class_id, row.status.as_str()],
        )?;
        Ok(())
      })
      .await?;
    Ok(enrollment)
  }

  async fn fetch_enrollments(&self, user_id: i64) -> Result<Vec<Enrollment>> {
    let raws = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT user_id, class_id, status FROM enrollments
           WHERE user_id = ?1 ORDER BY class_id",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![user_id], RawEnrollment::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawEnrollment::into_enrollment).collect()
  }

  async fn fetch_class_enrollments(&self, class_id: i64) -> Result<Vec<Enrollment>> {
    let raws = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT user_id, class_id, status FROM enrollments
           WHERE class_id = ?1 ORDER BY user_id",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![class_id], RawEnrollment::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawEnrollment::into_enrollment).collect()
  }

  async fn upsert_attendance(&self, record: EventAttendance) -> Result<EventAttendance> {
    let row = record.clone();
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO event_attendance
             (event_id, user_id, date, status, note, check_in, check_out,
              minutes_attended, scheduled_minutes)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
           ON CONFLICT (event_id, user_id, date) DO UPDATE SET
             status            = excluded.status,
             note              = excluded.note,
             check_in          = excluded.check_in,
             check_out         = excluded.check_out,
             minutes_attended  = excluded.minutes_attended,
             scheduled_minutes = excluded.scheduled_minutes",
          rusqlite::params![
            row.event_id,
            row.user_id,
            encode_date(row.date),
            row.status.as_str(),
            row.note,
            row.check_in.map(encode_time),
            row.check_out.map(encode_time),
            row.minutes_attended,
            row.scheduled_minutes,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(record)
  }

  async fn delete_attendance(&self, event_id: i64, date: NaiveDate) -> Result<usize> {
    let deleted = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "DELETE FROM event_attendance WHERE event_id = ?1 AND date = ?2",
          rusqlite::params![event_id, encode_date(date)],
        )?)
      })
      .await?;
    if deleted > 0 {
      tracing::debug!(event_id, %date, deleted, "deleted attendance rows");
    }
    Ok(deleted)
  }

  async fn fetch_class_attendance(&self, class_id: i64) -> Result<Vec<EventAttendance>> {
    let raws = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {ATTENDANCE_COLUMNS}
           FROM event_attendance a
           JOIN class_events e ON e.event_id = a.event_id
           WHERE e.class_id = ?1
           ORDER BY a.date, a.event_id, a.user_id"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![class_id], RawAttendance::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawAttendance::into_attendance).collect()
  }
}
