//! Error types for `roster-core`.

use chrono::NaiveDate;
use thiserror::Error;

use crate::class::ClassStatus;

/// Input rejected at write time. Never coerced to a default.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
  #[error("invalid recurrence rule: {0}")]
  InvalidRule(String),

  #[error("invalid duration {input:?}: {reason}")]
  InvalidDuration { input: String, reason: String },

  #[error("duration must be positive, got {0}")]
  NonPositiveDuration(String),

  #[error("unknown time zone: {0:?}")]
  UnknownTimeZone(String),

  #[error("override rule must select exactly one date, it selects {0}")]
  OverrideDateCount(usize),

  #[error("illegal class status transition: {from} -> {to}")]
  IllegalTransition { from: ClassStatus, to: ClassStatus },

  #[error("class {0} is completed, cancelled or archived")]
  ClassLocked(i64),

  #[error("attendance date {0} is in the future")]
  FutureAttendance(NaiveDate),

  #[error("user {user_id} is not enrolled in class {class_id}")]
  NotEnrolled { user_id: i64, class_id: i64 },

  #[error("invalid check-in/check-out: {0}")]
  InvalidTimeRange(String),

  #[error("partial attendance requires check-in and check-out times")]
  PartialWithoutMinutes,
}

#[derive(Debug, Error)]
pub enum Error {
  #[error(transparent)]
  Validation(#[from] ValidationError),

  #[error("class not found: {0}")]
  ClassNotFound(i64),

  #[error("event not found: {0}")]
  EventNotFound(i64),

  #[error("override {override_id} not found on event {event_id}")]
  OverrideNotFound { event_id: i64, override_id: i64 },

  #[error("no scheduled occurrence of event {event_id} on {date}")]
  OccurrenceNotFound { event_id: i64, date: NaiveDate },

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
  /// Wrap a collaborator error without altering it.
  pub fn store<E>(err: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Store(Box::new(err))
  }

  pub fn is_validation(&self) -> bool { matches!(self, Self::Validation(_)) }

  pub fn is_not_found(&self) -> bool {
    matches!(
      self,
      Self::ClassNotFound(_)
        | Self::EventNotFound(_)
        | Self::OverrideNotFound { .. }
        | Self::OccurrenceNotFound { .. }
    )
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
