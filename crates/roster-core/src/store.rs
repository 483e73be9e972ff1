//! The `ScheduleStore` trait.
//!
//! Storage backends (e.g. `roster-store-sqlite`) implement it; the
//! [`Scheduler`](crate::Scheduler) depends only on this abstraction.

use std::future::Future;

use chrono::NaiveDate;

use crate::{
  attendance::EventAttendance,
  class::{Enrollment, Facility, NewFacility, NewProgramClass, Program, ProgramClass},
  event::{ClassEvent, EventOverride, NewClassEvent, NewEventOverride},
  materialize::ClassFilter,
};

/// Persistence for classes, events, overrides, enrollments and attendance.
///
/// Every method returns a `Send` future so a scheduler can be shared across a
/// multi-threaded tokio runtime. Lookups by id return `None` when the row does
/// not exist; list methods return an empty `Vec`.
pub trait ScheduleStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Facilities and programs ───────────────────────────────────────────

  fn create_facility(
    &self,
    input: NewFacility,
  ) -> impl Future<Output = Result<Facility, Self::Error>> + Send + '_;

  fn fetch_facility(
    &self,
    facility_id: i64,
  ) -> impl Future<Output = Result<Option<Facility>, Self::Error>> + Send + '_;

  fn create_program(
    &self,
    name: String,
  ) -> impl Future<Output = Result<Program, Self::Error>> + Send + '_;

  fn fetch_program(
    &self,
    program_id: i64,
  ) -> impl Future<Output = Result<Option<Program>, Self::Error>> + Send + '_;

  // ── Classes ───────────────────────────────────────────────────────────

  fn create_class(
    &self,
    input: NewProgramClass,
  ) -> impl Future<Output = Result<ProgramClass, Self::Error>> + Send + '_;

  /// Overwrite every mutable column of an existing class.
  fn save_class(
    &self,
    class: ProgramClass,
  ) -> impl Future<Output = Result<ProgramClass, Self::Error>> + Send + '_;

  fn fetch_class(
    &self,
    class_id: i64,
  ) -> impl Future<Output = Result<Option<ProgramClass>, Self::Error>> + Send + '_;

  /// Classes matching `filter`, ordered by id.
  fn list_classes(
    &self,
    filter: ClassFilter,
  ) -> impl Future<Output = Result<Vec<ProgramClass>, Self::Error>> + Send + '_;

  // ── Events and overrides ──────────────────────────────────────────────

  fn create_event(
    &self,
    input: NewClassEvent,
  ) -> impl Future<Output = Result<ClassEvent, Self::Error>> + Send + '_;

  fn fetch_event(
    &self,
    event_id: i64,
  ) -> impl Future<Output = Result<Option<ClassEvent>, Self::Error>> + Send + '_;

  /// Events of one class, ordered by id.
  fn fetch_events(
    &self,
    class_id: i64,
  ) -> impl Future<Output = Result<Vec<ClassEvent>, Self::Error>> + Send + '_;

  /// Overwrite the duration, rule and room of an existing event.
  fn save_event(
    &self,
    event: ClassEvent,
  ) -> impl Future<Output = Result<ClassEvent, Self::Error>> + Send + '_;

  /// `created_at` is stored as given.
  fn create_override(
    &self,
    input: NewEventOverride,
  ) -> impl Future<Output = Result<EventOverride, Self::Error>> + Send + '_;

  /// Overwrite every column of an existing override but its id and event.
  fn save_override(
    &self,
    ov: EventOverride,
  ) -> impl Future<Output = Result<EventOverride, Self::Error>> + Send + '_;

  /// Overrides of one event, ordered by id.
  fn fetch_overrides(
    &self,
    event_id: i64,
  ) -> impl Future<Output = Result<Vec<EventOverride>, Self::Error>> + Send + '_;

  /// Returns whether a row was removed.
  fn delete_override(
    &self,
    override_id: i64,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  // ── Enrollment and attendance ─────────────────────────────────────────

  /// Insert or update the (user, class) enrollment.
  fn enroll(
    &self,
    enrollment: Enrollment,
  ) -> impl Future<Output = Result<Enrollment, Self::Error>> + Send + '_;

  /// Every enrollment of one user, in any status.
  fn fetch_enrollments(
    &self,
    user_id: i64,
  ) -> impl Future<Output = Result<Vec<Enrollment>, Self::Error>> + Send + '_;

  fn fetch_class_enrollments(
    &self,
    class_id: i64,
  ) -> impl Future<Output = Result<Vec<Enrollment>, Self::Error>> + Send + '_;

  /// Insert the row, or overwrite the existing row with the same
  /// (event, user, date).
  fn upsert_attendance(
    &self,
    record: EventAttendance,
  ) -> impl Future<Output = Result<EventAttendance, Self::Error>> + Send + '_;

  /// Remove every user's row for one session; returns how many went.
  fn delete_attendance(
    &self,
    event_id: i64,
    date: NaiveDate,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;

  /// Attendance rows for every event of one class.
  fn fetch_class_attendance(
    &self,
    class_id: i64,
  ) -> impl Future<Output = Result<Vec<EventAttendance>, Self::Error>> + Send + '_;
}
