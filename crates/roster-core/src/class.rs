//! Facilities, programs, and the classes that deliver a program at a
//! facility.
//!
//! A class is the unit of enrollment. Its sessions are defined by one or more
//! [`ClassEvent`](crate::event::ClassEvent)s, referenced by id only.

use std::{fmt, str::FromStr};

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

// ─── Facility / Program ──────────────────────────────────────────────────────

/// A physical site. Its zone anchors rules written in local time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Facility {
  pub facility_id: i64,
  pub name:        String,
  pub timezone:    Tz,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewFacility {
  pub name:     String,
  pub timezone: Tz,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
  pub program_id: i64,
  pub name:       String,
}

// ─── Status ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClassStatus {
  Pending,
  Scheduled,
  Active,
  Paused,
  Completed,
  Cancelled,
}

impl ClassStatus {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Pending => "Pending",
      Self::Scheduled => "Scheduled",
      Self::Active => "Active",
      Self::Paused => "Paused",
      Self::Completed => "Completed",
      Self::Cancelled => "Cancelled",
    }
  }

  /// Whether `self -> next` is a structurally legal move. Staying put is
  /// always legal.
  pub fn can_transition_to(self, next: ClassStatus) -> bool {
    use ClassStatus::*;
    self == next
      || matches!(
        (self, next),
        (Pending, Scheduled)
          | (Scheduled, Active)
          | (Active, Paused)
          | (Paused, Active)
          | (Active, Completed)
          | (Active, Cancelled)
      )
  }

  pub fn transition(self, next: ClassStatus) -> Result<ClassStatus, ValidationError> {
    if self.can_transition_to(next) {
      Ok(next)
    } else {
      Err(ValidationError::IllegalTransition { from: self, to: next })
    }
  }

  pub fn is_terminal(self) -> bool { matches!(self, Self::Completed | Self::Cancelled) }
}

impl fmt::Display for ClassStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for ClassStatus {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "Pending" => Ok(Self::Pending),
      "Scheduled" => Ok(Self::Scheduled),
      "Active" => Ok(Self::Active),
      "Paused" => Ok(Self::Paused),
      "Completed" => Ok(Self::Completed),
      "Cancelled" => Ok(Self::Cancelled),
      other => Err(format!("unknown class status: {other:?}")),
    }
  }
}

// ─── ProgramClass ────────────────────────────────────────────────────────────

/// One offering of a program at a facility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramClass {
  pub class_id:        i64,
  pub program_id:      i64,
  pub facility_id:     i64,
  pub name:            String,
  pub capacity:        i64,
  pub instructor_name: String,
  pub description:     String,
  pub status:          ClassStatus,
  pub start_date:      NaiveDate,
  pub end_date:        Option<NaiveDate>,
  pub credit_hours:    Option<i64>,
  pub archived_at:     Option<DateTime<Utc>>,
}

impl ProgramClass {
  /// Completed, cancelled and archived classes accept no further writes.
  pub fn is_locked(&self) -> bool { self.status.is_terminal() || self.archived_at.is_some() }
}

/// Input for creating a class. The store assigns the id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProgramClass {
  pub program_id:      i64,
  pub facility_id:     i64,
  pub name:            String,
  pub capacity:        i64,
  pub instructor_name: String,
  pub description:     String,
  #[serde(default = "initial_status")]
  pub status:          ClassStatus,
  pub start_date:      NaiveDate,
  pub end_date:        Option<NaiveDate>,
  pub credit_hours:    Option<i64>,
}

fn initial_status() -> ClassStatus { ClassStatus::Pending }

/// A partial update; `None` leaves the field untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassPatch {
  pub name:            Option<String>,
  pub capacity:        Option<i64>,
  pub instructor_name: Option<String>,
  pub description:     Option<String>,
  pub status:          Option<ClassStatus>,
  pub end_date:        Option<Option<NaiveDate>>,
  pub credit_hours:    Option<Option<i64>>,
  pub archived_at:     Option<Option<DateTime<Utc>>>,
}

impl ClassPatch {
  /// Apply onto `class`, validating any status change.
  pub fn apply(self, class: &ProgramClass) -> Result<ProgramClass, ValidationError> {
    let mut next = class.clone();
    if let Some(status) = self.status {
      next.status = class.status.transition(status)?;
    }
    if let Some(name) = self.name {
      next.name = name;
    }
    if let Some(capacity) = self.capacity {
      next.capacity = capacity;
    }
    if let Some(instructor_name) = self.instructor_name {
      next.instructor_name = instructor_name;
    }
    if let Some(description) = self.description {
      next.description = description;
    }
    if let Some(end_date) = self.end_date {
      next.end_date = end_date;
    }
    if let Some(credit_hours) = self.credit_hours {
      next.credit_hours = credit_hours;
    }
    if let Some(archived_at) = self.archived_at {
      next.archived_at = archived_at;
    }
    Ok(next)
  }
}

// ─── Enrollment ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnrollmentStatus {
  Enrolled,
  Completed,
  Dropped,
}

impl EnrollmentStatus {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Enrolled => "Enrolled",
      Self::Completed => "Completed",
      Self::Dropped => "Dropped",
    }
  }
}

impl FromStr for EnrollmentStatus {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "Enrolled" => Ok(Self::Enrolled),
      "Completed" => Ok(Self::Completed),
      "Dropped" => Ok(Self::Dropped),
      other => Err(format!("unknown enrollment status: {other:?}")),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrollment {
  pub user_id:  i64,
  pub class_id: i64,
  pub status:   EnrollmentStatus,
}

impl Enrollment {
  pub fn is_current(&self) -> bool { self.status == EnrollmentStatus::Enrolled }
}
