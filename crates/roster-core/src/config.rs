//! Scheduling knobs, passed explicitly into [`Scheduler`](crate::Scheduler).

use chrono::TimeDelta;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
  /// Cap, in days, on open-ended expansion and conflict look-ahead.
  pub horizon_days:       u32,
  /// `MultipleAbsences` fires once a user's absences exceed this count.
  pub absence_threshold:  usize,
  /// Zone for floating or `TZID=Local` rules when the facility has none.
  pub default_zone:       Tz,
  pub max_room_conflicts: usize,
}

impl Default for ScheduleConfig {
  fn default() -> Self {
    Self {
      horizon_days:       365,
      absence_threshold:  2,
      default_zone:       Tz::UTC,
      max_room_conflicts: 10,
    }
  }
}

impl ScheduleConfig {
  pub fn horizon(&self) -> TimeDelta { TimeDelta::days(i64::from(self.horizon_days)) }
}
