//! The scheduling service: every operation the outer surfaces call.
//!
//! A [`Scheduler`] owns a [`ScheduleStore`] and a [`ScheduleConfig`]. Each
//! call reads what it needs from the store and recomputes from scratch.

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use chrono_tz::Tz;

use crate::{
  attendance::{self, AttendanceFlag, AttendanceInput, EventAttendance, track_time},
  class::{
    ClassPatch, ClassStatus, Enrollment, EnrollmentStatus, Facility, NewFacility,
    NewProgramClass, Program, ProgramClass,
  },
  config::ScheduleConfig,
  conflict::{ConflictDetail, RoomConflict, find_conflicts, find_room_conflicts},
  error::{Error, Result, ValidationError},
  event::{ClassEvent, EventOverride, NewClassEvent, NewEventOverride, OverrideChange},
  expand::{Window, expand},
  history::FieldChange,
  materialize::{
    Calendar, ClassFilter, EventInstance, EventSource, OccurrenceState, day_window,
    occurrence_on,
  },
  rule::RecurrenceRule,
  span::Span,
  store::ScheduleStore,
};

/// Room checks never look further than this from their start.
fn room_check_span() -> TimeDelta { TimeDelta::days(365) }

pub struct Scheduler<S> {
  store:  S,
  config: ScheduleConfig,
  clock:  fn() -> DateTime<Utc>,
}

impl<S: ScheduleStore> Scheduler<S> {
  pub fn new(store: S, config: ScheduleConfig) -> Self {
    Self { store, config, clock: Utc::now }
  }

  /// Replace the reference clock used for "now" and "today".
  pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
    self.clock = clock;
    self
  }

  pub fn store(&self) -> &S { &self.store }

  pub fn config(&self) -> &ScheduleConfig { &self.config }

  // ─── Lookups ─────────────────────────────────────────────────────────────

  async fn class(&self, class_id: i64) -> Result<ProgramClass> {
    self
      .store
      .fetch_class(class_id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::ClassNotFound(class_id))
  }

  async fn event(&self, event_id: i64) -> Result<ClassEvent> {
    self
      .store
      .fetch_event(event_id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::EventNotFound(event_id))
  }

  /// The facility's zone, or the configured default when it has none.
  async fn zone_of(&self, facility_id: i64) -> Result<Tz> {
    let facility = self.store.fetch_facility(facility_id).await.map_err(Error::store)?;
    Ok(facility.map_or(self.config.default_zone, |f| f.timezone))
  }

  async fn source(&self, class: &ProgramClass, zone: Tz, event: ClassEvent) -> Result<EventSource> {
    let rule = event.rule(zone)?;
    let overrides = self
      .store
      .fetch_overrides(event.event_id)
      .await
      .map_err(Error::store)?;
    let program_name = self
      .store
      .fetch_program(class.program_id)
      .await
      .map_err(Error::store)?
      .map(|p| p.name)
      .unwrap_or_default();
    Ok(EventSource {
      event,
      rule,
      overrides,
      class_name: class.name.clone(),
      program_name,
    })
  }

  async fn sources(&self, class: &ProgramClass) -> Result<Vec<EventSource>> {
    let zone = self.zone_of(class.facility_id).await?;
    let events = self.store.fetch_events(class.class_id).await.map_err(Error::store)?;
    let mut sources = Vec::with_capacity(events.len());
    for event in events {
      sources.push(self.source(class, zone, event).await?);
    }
    Ok(sources)
  }

  // ─── Calendar ────────────────────────────────────────────────────────────

  /// Every session of the matching classes in `window`, displayed in `zone`
  /// (the configured default when `None`).
  pub async fn calendar_instances(
    &self,
    filter: ClassFilter,
    window: Window,
    zone: Option<Tz>,
  ) -> Result<Calendar> {
    let classes = self.store.list_classes(filter).await.map_err(Error::store)?;
    if let (ClassFilter::Class(class_id), true) = (filter, classes.is_empty()) {
      return Err(Error::ClassNotFound(class_id));
    }
    let mut sources = Vec::new();
    for class in &classes {
      sources.extend(self.sources(class).await?);
    }
    let zone = zone.unwrap_or(self.config.default_zone);
    let calendar = Calendar::build(&sources, window, self.config.horizon(), zone);
    tracing::debug!(
      ?filter,
      classes = classes.len(),
      events = sources.len(),
      instances = calendar.len(),
      "built calendar"
    );
    Ok(calendar)
  }

  /// Whether `event_id` meets on `date`, and if so whether it is cancelled.
  pub async fn resolve_occurrence_date(&self, event_id: i64, date: NaiveDate) -> Result<OccurrenceState> {
    let event = self.event(event_id).await?;
    let class = self.class(event.class_id).await?;
    let zone = self.zone_of(class.facility_id).await?;
    let source = self.source(&class, zone, event).await?;
    Ok(occurrence_on(&source, date, self.config.horizon()))
  }

  // ─── Conflicts ───────────────────────────────────────────────────────────

  /// Window for conflict checks: from `as_of` to the last end date of the
  /// classes involved, or `as_of + horizon` when any of them is open-ended.
  fn lookahead(&self, as_of: DateTime<Utc>, classes: &[&ProgramClass], zone: Tz) -> Window {
    let last_end = classes
      .iter()
      .map(|c| c.end_date)
      .collect::<Option<Vec<_>>>()
      .and_then(|ends| ends.into_iter().max());
    let to = match last_end {
      Some(end) => day_window(end, zone).to,
      None => as_of + self.config.horizon(),
    };
    Window::new(as_of, to)
  }

  /// Clashes between `candidate_class_id` and the classes `user_id` is
  /// currently enrolled in, from `as_of` on.
  pub async fn detect_conflicts(
    &self,
    user_id: i64,
    candidate_class_id: i64,
    as_of: DateTime<Utc>,
  ) -> Result<Vec<ConflictDetail>> {
    let candidate = self.class(candidate_class_id).await?;
    let enrollments = self.store.fetch_enrollments(user_id).await.map_err(Error::store)?;

    let mut enrolled = Vec::new();
    for enrollment in enrollments
      .iter()
      .filter(|e| e.is_current() && e.class_id != candidate_class_id)
    {
      match self.store.fetch_class(enrollment.class_id).await.map_err(Error::store)? {
        Some(class) => enrolled.push(class),
        None => tracing::warn!(
          user_id,
          class_id = enrollment.class_id,
          "enrollment refers to a missing class"
        ),
      }
    }

    let zone = self.zone_of(candidate.facility_id).await?;
    let involved: Vec<&ProgramClass> = std::iter::once(&candidate).chain(&enrolled).collect();
    let window = self.lookahead(as_of, &involved, zone);
    if window.is_empty() {
      return Ok(Vec::new());
    }
    let horizon = self.config.horizon();

    let proposed: Vec<EventInstance> =
      Calendar::build(&self.sources(&candidate).await?, window, horizon, zone)
        .iter()
        .cloned()
        .collect();
    let mut existing_sources = Vec::new();
    for class in &enrolled {
      existing_sources.extend(self.sources(class).await?);
    }
    let existing: Vec<EventInstance> = Calendar::build(&existing_sources, window, horizon, zone)
      .iter()
      .cloned()
      .collect();

    let conflicts = find_conflicts(user_id, &proposed, &existing);
    tracing::debug!(
      user_id,
      candidate_class_id,
      enrolled = enrolled.len(),
      proposed = proposed.len(),
      conflicts = conflicts.len(),
      "checked enrollment conflicts"
    );
    Ok(conflicts)
  }

  /// Existing bookings of `room` at a facility that overlap a proposed rule.
  ///
  /// The proposed rule is expanded for at most a year, starting no earlier
  /// than a year before now. Bookings of `exclude_event` are ignored so an
  /// event can be checked against everything but itself.
  pub async fn check_room_conflicts(
    &self,
    facility_id: i64,
    room: &str,
    rule: &str,
    duration: &str,
    exclude_event: Option<i64>,
  ) -> Result<Vec<RoomConflict>> {
    let zone = self.zone_of(facility_id).await?;
    let rule = RecurrenceRule::parse(rule, zone)?;
    let duration = Span::parse_positive(duration)?;

    let span = room_check_span();
    let from = rule.start().max((self.clock)() - span);
    let window = Window::new(from, from + span);
    let proposed: Vec<_> = expand(&rule, window, span)
      .into_iter()
      .map(|start| (start, start + duration.as_delta()))
      .collect();

    let classes = self
      .store
      .list_classes(ClassFilter::Facility(facility_id))
      .await
      .map_err(Error::store)?;
    let mut sources = Vec::new();
    for class in &classes {
      sources.extend(
        self
          .sources(class)
          .await?
          .into_iter()
          .filter(|s| Some(s.event.event_id) != exclude_event),
      );
    }
    // Bookings that start the day before can still run into the window.
    let booked_window = Window::new(window.from - TimeDelta::days(1), window.to);
    let booked: Vec<EventInstance> = Calendar::build(&sources, booked_window, span, zone)
      .iter()
      .filter(|i| i.room == room)
      .cloned()
      .collect();

    let conflicts = find_room_conflicts(&proposed, &booked, self.config.max_room_conflicts);
    tracing::debug!(
      facility_id,
      room,
      proposed = proposed.len(),
      booked = booked.len(),
      conflicts = conflicts.len(),
      "checked room conflicts"
    );
    Ok(conflicts)
  }

  // ─── Attendance ──────────────────────────────────────────────────────────

  /// Record (or overwrite) one user's attendance for one session.
  pub async fn record_attendance(
    &self,
    event_id: i64,
    user_id: i64,
    date: NaiveDate,
    input: AttendanceInput,
  ) -> Result<EventAttendance> {
    let event = self.event(event_id).await?;
    let class = self.class(event.class_id).await?;
    if class.is_locked() {
      return Err(ValidationError::ClassLocked(class.class_id).into());
    }

    let zone = self.zone_of(class.facility_id).await?;
    let source = self.source(&class, zone, event).await?;
    let today = (self.clock)().with_timezone(&source.rule.zone()).date_naive();
    if date > today {
      return Err(ValidationError::FutureAttendance(date).into());
    }

    let enrollments = self
      .store
      .fetch_class_enrollments(class.class_id)
      .await
      .map_err(Error::store)?;
    if !enrollments.iter().any(|e| e.user_id == user_id && e.is_current()) {
      return Err(ValidationError::NotEnrolled { user_id, class_id: class.class_id }.into());
    }

    let instance = match occurrence_on(&source, date, self.config.horizon()) {
      OccurrenceState::Scheduled(instance) => instance,
      state => {
        tracing::debug!(event_id, %date, cancelled = state.is_cancelled(), "no session to record against");
        return Err(Error::OccurrenceNotFound { event_id, date });
      }
    };

    let scheduled_minutes = instance.duration.whole_minutes();
    let tracked = track_time(&input, scheduled_minutes)?;
    let record = EventAttendance {
      event_id,
      user_id,
      date,
      status: tracked.status,
      note: input.note,
      check_in: tracked.check_in,
      check_out: tracked.check_out,
      minutes_attended: tracked.minutes_attended,
      scheduled_minutes,
    };
    let stored = self.store.upsert_attendance(record).await.map_err(Error::store)?;
    tracing::info!(event_id, user_id, %date, status = %stored.status, "attendance recorded");
    Ok(stored)
  }

  /// Non-cancelled sessions of a class that have already started.
  async fn held_sessions(&self, class: &ProgramClass) -> Result<Vec<(i64, NaiveDate)>> {
    let zone = self.zone_of(class.facility_id).await?;
    let now = (self.clock)();
    let window = Window::new(day_window(class.start_date, zone).from, now);
    if window.is_empty() {
      return Ok(Vec::new());
    }
    // The window is bounded by now, so open-ended rules may expand across all of it.
    let horizon = self.config.horizon().max(window.to - window.from);
    let calendar = Calendar::build(&self.sources(class).await?, window, horizon, zone);
    Ok(
      calendar
        .iter()
        .filter(|i| !i.cancelled && i.start_utc() <= now)
        .map(|i| (i.event_id, i.date))
        .collect(),
    )
  }

  /// `NoAttendance` and `MultipleAbsences` flags for one class.
  pub async fn attendance_flags(&self, class_id: i64) -> Result<Vec<AttendanceFlag>> {
    let class = self.class(class_id).await?;
    let held = self.held_sessions(&class).await?;
    let enrollments = self
      .store
      .fetch_class_enrollments(class_id)
      .await
      .map_err(Error::store)?;
    let rows = self
      .store
      .fetch_class_attendance(class_id)
      .await
      .map_err(Error::store)?;
    Ok(attendance::attendance_flags(
      class_id,
      class.status == ClassStatus::Active,
      held.len(),
      &enrollments,
      &rows,
      self.config.absence_threshold,
    ))
  }

  /// How many (held session, enrolled user) pairs still lack a record.
  pub async fn missing_attendance(&self, class_id: i64) -> Result<usize> {
    let class = self.class(class_id).await?;
    let held = self.held_sessions(&class).await?;
    let enrollments = self
      .store
      .fetch_class_enrollments(class_id)
      .await
      .map_err(Error::store)?;
    let rows = self
      .store
      .fetch_class_attendance(class_id)
      .await
      .map_err(Error::store)?;
    Ok(attendance::missing_attendance(&held, &enrollments, &rows))
  }

  // ─── Writes ──────────────────────────────────────────────────────────────

  pub async fn create_facility(&self, input: NewFacility) -> Result<Facility> {
    let facility = self.store.create_facility(input).await.map_err(Error::store)?;
    tracing::info!(facility_id = facility.facility_id, zone = %facility.timezone, "facility created");
    Ok(facility)
  }

  pub async fn create_program(&self, name: impl Into<String>) -> Result<Program> {
    let program = self.store.create_program(name.into()).await.map_err(Error::store)?;
    tracing::info!(program_id = program.program_id, "program created");
    Ok(program)
  }

  pub async fn create_class(&self, input: NewProgramClass) -> Result<ProgramClass> {
    let class = self.store.create_class(input).await.map_err(Error::store)?;
    tracing::info!(class_id = class.class_id, status = %class.status, "class created");
    Ok(class)
  }

  /// Apply `patch`, persist, and return the stored class with what changed.
  pub async fn update_class(
    &self,
    class_id: i64,
    patch: ClassPatch,
  ) -> Result<(ProgramClass, Vec<FieldChange>)> {
    let before = self.class(class_id).await?;
    let after = patch.apply(&before)?;
    let changes = ProgramClass::diff(&before, &after);
    if changes.is_empty() {
      return Ok((before, changes));
    }
    let saved = self.store.save_class(after).await.map_err(Error::store)?;
    if before.status != saved.status {
      tracing::info!(class_id, from = %before.status, to = %saved.status, "class status changed");
      if saved.status == ClassStatus::Completed {
        self.cap_events(&saved).await?;
      }
    }
    tracing::info!(class_id, changed = changes.len(), "class updated");
    Ok((saved, changes))
  }

  /// End every rule of `class` that still has sessions after today.
  async fn cap_events(&self, class: &ProgramClass) -> Result<()> {
    let zone = self.zone_of(class.facility_id).await?;
    let now = (self.clock)();
    let events = self.store.fetch_events(class.class_id).await.map_err(Error::store)?;
    for event in events {
      let rule = event.rule(zone)?;
      let today = now.with_timezone(&rule.zone()).date_naive();
      let Some(capped) = rule.capped_at(today)? else { continue };
      let event_id = event.event_id;
      self
        .store
        .save_event(ClassEvent { recurrence_rule: capped.to_string(), ..event })
        .await
        .map_err(Error::store)?;
      tracing::info!(event_id, class_id = class.class_id, until = %today, "event rule capped");
    }
    Ok(())
  }

  pub async fn transition_class(&self, class_id: i64, status: ClassStatus) -> Result<ProgramClass> {
    let patch = ClassPatch { status: Some(status), ..Default::default() };
    let (class, _) = self.update_class(class_id, patch).await?;
    Ok(class)
  }

  pub async fn create_event(
    &self,
    class_id: i64,
    duration: &str,
    rule: &str,
    room: &str,
  ) -> Result<ClassEvent> {
    let class = self.class(class_id).await?;
    let zone = self.zone_of(class.facility_id).await?;
    let input = NewClassEvent::validate(class_id, duration, rule, room, zone)?;
    let event = self.store.create_event(input).await.map_err(Error::store)?;
    tracing::info!(event_id = event.event_id, class_id, "event created");
    Ok(event)
  }

  async fn event_rule(&self, event_id: i64) -> Result<RecurrenceRule> {
    let event = self.event(event_id).await?;
    let class = self.class(event.class_id).await?;
    let zone = self.zone_of(class.facility_id).await?;
    Ok(event.rule(zone)?)
  }

  async fn clear_attendance(&self, event_id: i64, date: NaiveDate) -> Result<()> {
    let removed = self
      .store
      .delete_attendance(event_id, date)
      .await
      .map_err(Error::store)?;
    if removed > 0 {
      tracing::info!(event_id, %date, removed, "attendance cleared");
    }
    Ok(())
  }

  /// Insert `input`, or rewrite the override that already targets its date.
  /// Attendance on that date is dropped when the session is cancelled or an
  /// earlier override is replaced.
  async fn store_override(
    &self,
    rule: &RecurrenceRule,
    input: NewEventOverride,
  ) -> Result<EventOverride> {
    let horizon = self.config.horizon();
    let date = input.target(rule, horizon)?.date;
    let existing = self
      .store
      .fetch_overrides(input.event_id)
      .await
      .map_err(Error::store)?;
    let current = existing
      .iter()
      .filter(|ov| ov.target(rule, horizon).is_ok_and(|t| t.date == date))
      .max_by_key(|ov| (ov.created_at, ov.override_id));

    let stored = match current {
      Some(current) => {
        let stored = self
          .store
          .save_override(current.replaced_by(input))
          .await
          .map_err(Error::store)?;
        tracing::info!(
          override_id = stored.override_id,
          event_id = stored.event_id,
          %date,
          cancelled = stored.cancelled,
          "override updated"
        );
        stored
      }
      None => {
        let stored = self.store.create_override(input).await.map_err(Error::store)?;
        tracing::info!(
          override_id = stored.override_id,
          event_id = stored.event_id,
          %date,
          cancelled = stored.cancelled,
          "override created"
        );
        stored
      }
    };
    if stored.cancelled || current.is_some() {
      self.clear_attendance(stored.event_id, date).await?;
    }
    Ok(stored)
  }

  /// Cancel or modify the session of `event_id` on `date`. A second call for
  /// the same date replaces the first.
  pub async fn create_override(
    &self,
    event_id: i64,
    date: NaiveDate,
    change: OverrideChange,
  ) -> Result<EventOverride> {
    let rule = self.event_rule(event_id).await?;
    let input = NewEventOverride::for_date(
      event_id,
      date,
      change,
      &rule,
      self.config.horizon(),
      (self.clock)(),
    )?;
    self.store_override(&rule, input).await
  }

  /// Like [`Scheduler::create_override`], with the target given as a rule
  /// that must select exactly one date.
  pub async fn create_override_with_selector(
    &self,
    event_id: i64,
    selector: &str,
    change: OverrideChange,
  ) -> Result<EventOverride> {
    let rule = self.event_rule(event_id).await?;
    let input = NewEventOverride::validate(
      event_id,
      selector,
      change,
      &rule,
      self.config.horizon(),
      (self.clock)(),
    )?;
    self.store_override(&rule, input).await
  }

  /// Remove one override, restoring the session it cancelled or changed.
  /// Attendance recorded on that date is dropped with it.
  pub async fn delete_override(&self, event_id: i64, override_id: i64) -> Result<EventOverride> {
    let rule = self.event_rule(event_id).await?;
    let not_found = Error::OverrideNotFound { event_id, override_id };
    let ov = self
      .store
      .fetch_overrides(event_id)
      .await
      .map_err(Error::store)?
      .into_iter()
      .find(|ov| ov.override_id == override_id)
      .ok_or(not_found)?;
    if !self.store.delete_override(override_id).await.map_err(Error::store)? {
      return Err(Error::OverrideNotFound { event_id, override_id });
    }

    match ov.target(&rule, self.config.horizon()) {
      Ok(target) => self.clear_attendance(event_id, target.date).await?,
      Err(e) => tracing::warn!(
        event_id,
        override_id,
        error = %e,
        "deleted override has no single target date"
      ),
    }
    tracing::info!(event_id, override_id, "override deleted");
    Ok(ov)
  }

  /// Enroll a user; locked classes take no new enrollments.
  pub async fn enroll(&self, user_id: i64, class_id: i64) -> Result<Enrollment> {
    let class = self.class(class_id).await?;
    if class.is_locked() {
      return Err(ValidationError::ClassLocked(class_id).into());
    }
    let enrollment = self
      .store
      .enroll(Enrollment { user_id, class_id, status: EnrollmentStatus::Enrolled })
      .await
      .map_err(Error::store)?;
    tracing::info!(user_id, class_id, "user enrolled");
    Ok(enrollment)
  }
}
