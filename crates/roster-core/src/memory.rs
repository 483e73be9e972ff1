//! In-memory `ScheduleStore` for scheduler tests.

use std::{convert::Infallible, sync::Mutex};

use chrono::NaiveDate;

use crate::{
  attendance::EventAttendance,
  class::{Enrollment, Facility, NewFacility, NewProgramClass, Program, ProgramClass},
  event::{ClassEvent, EventOverride, NewClassEvent, NewEventOverride},
  materialize::ClassFilter,
  store::ScheduleStore,
};

#[derive(Default)]
struct State {
  next_id:     i64,
  facilities:  Vec<Facility>,
  programs:    Vec<Program>,
  classes:     Vec<ProgramClass>,
  events:      Vec<ClassEvent>,
  overrides:   Vec<EventOverride>,
  enrollments: Vec<Enrollment>,
  attendance:  Vec<EventAttendance>,
}

impl State {
  fn id(&mut self) -> i64 {
    self.next_id += 1;
    self.next_id
  }
}

/// Ids are shared across tables and start at 1.
#[derive(Default)]
pub struct MemoryStore {
  state: Mutex<State>,
}

impl MemoryStore {
  fn with<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
    let mut state = self.state.lock().expect("memory store poisoned");
    f(&mut state)
  }

  pub fn attendance_rows(&self) -> Vec<EventAttendance> { self.with(|s| s.attendance.clone()) }
}

impl ScheduleStore for MemoryStore {
  type Error = Infallible;

  async fn create_facility(&self, input: NewFacility) -> Result<Facility, Infallible> {
    Ok(self.with(|s| {
      let facility =
        Facility { facility_id: s.id(), name: input.name, timezone: input.timezone };
      s.facilities.push(facility.clone());
      facility
    }))
  }

  async fn fetch_facility(&self, facility_id: i64) -> Result<Option<Facility>, Infallible> {
    Ok(self.with(|s| s.facilities.iter().find(|f| f.facility_id == facility_id).cloned()))
  }

  async fn create_program(&self, name: String) -> Result<Program, Infallible> {
    Ok(self.with(|s| {
      let program = Program { program_id: s.id(), name };
      s.programs.push(program.clone());
      program
    }))
  }

  async fn fetch_program(&self, program_id: i64) -> Result<Option<Program>, Infallible> {
    Ok(self.with(|s| s.programs.iter().find(|p| p.program_id == program_id).cloned()))
  }

  async fn create_class(&self, input: NewProgramClass) -> Result<ProgramClass, Infallible> {
    Ok(self.with(|s| {
      let class = ProgramClass {
        class_id:        s.id(),
        program_id:      input.program_id,
        facility_id:     input.facility_id,
        name:            input.name,
        capacity:        input.capacity,
        instructor_name: input.instructor_name,
        description:     input.description,
        status:          input.status,
        start_date:      input.start_date,
        end_date:        input.end_date,
        credit_hours:    input.credit_hours,
        archived_at:     None,
      };
      s.classes.push(class.clone());
      class
    }))
  }

  async fn save_class(&self, class: ProgramClass) -> Result<ProgramClass, Infallible> {
    Ok(self.with(|s| {
      if let Some(slot) = s.classes.iter_mut().find(|c| c.class_id == class.class_id) {
        *slot = class.clone();
      }
      class
    }))
  }

  async fn fetch_class(&self, class_id: i64) -> Result<Option<ProgramClass>, Infallible> {
    Ok(self.with(|s| s.classes.iter().find(|c| c.class_id == class_id).cloned()))
  }

  async fn list_classes(&self, filter: ClassFilter) -> Result<Vec<ProgramClass>, Infallible> {
    Ok(self.with(|s| {
      s.classes
        .iter()
        .filter(|c| match filter {
          ClassFilter::Facility(id) => c.facility_id == id,
          ClassFilter::Class(id) => c.class_id == id,
          ClassFilter::Program(id) => c.program_id == id,
        })
        .cloned()
        .collect()
    }))
  }

  async fn create_event(&self, input: NewClassEvent) -> Result<ClassEvent, Infallible> {
    Ok(self.with(|s| {
      let event = ClassEvent {
        event_id:        s.id(),
        class_id:        input.class_id,
        duration:        input.duration,
        recurrence_rule: input.recurrence_rule,
        room:            input.room,
      };
      s.events.push(event.clone());
      event
    }))
  }

  async fn fetch_event(&self, event_id: i64) -> Result<Option<ClassEvent>, Infallible> {
    Ok(self.with(|s| s.events.iter().find(|e| e.event_id == event_id).cloned()))
  }

  async fn fetch_events(&self, class_id: i64) -> Result<Vec<ClassEvent>, Infallible> {
    Ok(self.with(|s| s.events.iter().filter(|e| e.class_id == class_id).cloned().collect()))
  }

  async fn save_event(&self, event: ClassEvent) -> Result<ClassEvent, Infallible> {
    Ok(self.with(|s| {
      if let Some(slot) = s.events.iter_mut().find(|e| e.event_id == event.event_id) {
        *slot = event.clone();
      }
      event
    }))
  }

  async fn create_override(&self, input: NewEventOverride) -> Result<EventOverride, Infallible> {
    Ok(self.with(|s| {
      let ov = EventOverride {
        override_id: s.id(),
        event_id:    input.event_id,
        selector:    input.selector,
        cancelled:   input.cancelled,
        duration:    input.duration,
        room:        input.room,
        reason:      input.reason,
        created_at:  input.created_at,
      };
      s.overrides.push(ov.clone());
      ov
    }))
  }

  async fn save_override(&self, ov: EventOverride) -> Result<EventOverride, Infallible> {
    Ok(self.with(|s| {
      if let Some(slot) = s.overrides.iter_mut().find(|o| o.override_id == ov.override_id) {
        *slot = ov.clone();
      }
      ov
    }))
  }

  async fn fetch_overrides(&self, event_id: i64) -> Result<Vec<EventOverride>, Infallible> {
    Ok(self.with(|s| s.overrides.iter().filter(|o| o.event_id == event_id).cloned().collect()))
  }

  async fn delete_override(&self, override_id: i64) -> Result<bool, Infallible> {
    Ok(self.with(|s| {
      let before = s.overrides.len();
      s.overrides.retain(|o| o.override_id != override_id);
      s.overrides.len() != before
    }))
  }

  async fn enroll(&self, enrollment: Enrollment) -> Result<Enrollment, Infallible> {
    Ok(self.with(|s| {
      s.enrollments
        .retain(|e| (e.user_id, e.class_id) != (enrollment.user_id, enrollment.class_id));
      s.enrollments.push(enrollment.clone());
      enrollment
    }))
  }

  async fn fetch_enrollments(&self, user_id: i64) -> Result<Vec<Enrollment>, Infallible> {
    Ok(self.with(|s| s.enrollments.iter().filter(|e| e.user_id == user_id).cloned().collect()))
  }

  async fn fetch_class_enrollments(&self, class_id: i64) -> Result<Vec<Enrollment>, Infallible> {
    Ok(self.with(|s| s.enrollments.iter().filter(|e| e.class_id == class_id).cloned().collect()))
  }

  async fn upsert_attendance(&self, record: EventAttendance) -> Result<EventAttendance, Infallible> {
    Ok(self.with(|s| {
      s.attendance.retain(|a| a.key() != record.key());
      s.attendance.push(record.clone());
      record
    }))
  }

  async fn delete_attendance(&self, event_id: i64, date: NaiveDate) -> Result<usize, Infallible> {
    Ok(self.with(|s| {
      let before = s.attendance.len();
      s.attendance.retain(|a| (a.event_id, a.date) != (event_id, date));
      before - s.attendance.len()
    }))
  }

  async fn fetch_class_attendance(&self, class_id: i64) -> Result<Vec<EventAttendance>, Infallible> {
    Ok(self.with(|s| {
      let events: Vec<i64> = s
        .events
        .iter()
        .filter(|e| e.class_id == class_id)
        .map(|e| e.event_id)
        .collect();
      s.attendance
        .iter()
        .filter(|a| events.contains(&a.event_id))
        .cloned()
        .collect()
    }))
  }
}
