//! Change log entries for class updates.
//!
//! Each tracked field is compared explicitly; untracked fields (ids, start
//! date) never appear in the log.

use serde::Serialize;

use crate::class::ProgramClass;

/// One field that changed, with its new value rendered for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldChange {
  pub field:     &'static str,
  pub new_value: String,
}

fn render_opt<T: ToString>(value: &Option<T>) -> String {
  value.as_ref().map_or_else(|| "null".to_owned(), ToString::to_string)
}

impl ProgramClass {
  /// Fields of `after` that differ from `before`, in a fixed order.
  pub fn diff(before: &ProgramClass, after: &ProgramClass) -> Vec<FieldChange> {
    let mut changes = Vec::new();
    let mut push = |field: &'static str, changed: bool, new_value: String| {
      if changed {
        changes.push(FieldChange { field, new_value });
      }
    };

    push("capacity", before.capacity != after.capacity, after.capacity.to_string());
    push("name", before.name != after.name, after.name.clone());
    push(
      "instructor_name",
      before.instructor_name != after.instructor_name,
      after.instructor_name.clone(),
    );
    push("description", before.description != after.description, after.description.clone());
    push(
      "archived_at",
      before.archived_at != after.archived_at,
      after
        .archived_at
        .map_or_else(|| "null".to_owned(), |at| at.format("%Y-%m-%d").to_string()),
    );
    push("status", before.status != after.status, after.status.to_string());
    push(
      "credit_hours",
      before.credit_hours != after.credit_hours,
      render_opt(&after.credit_hours),
    );
    push("end_date", before.end_date != after.end_date, render_opt(&after.end_date));

    changes
  }
}

#[cfg(test)]
mod tests {
  use chrono::{NaiveDate, TimeZone, Utc};

  use super::*;
  use crate::class::ClassStatus;

  fn class() -> ProgramClass {
    ProgramClass {
      class_id:        3,
      program_id:      1,
      facility_id:     1,
      name:            "GED Math".into(),
      capacity:        20,
      instructor_name: "J. Park".into(),
      description:     "Algebra review".into(),
      status:          ClassStatus::Active,
      start_date:      NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
      end_date:        None,
      credit_hours:    Some(3),
      archived_at:     None,
    }
  }

  #[test]
  fn identical_classes_have_no_changes() {
    assert!(ProgramClass::diff(&class(), &class()).is_empty());
  }

  #[test]
  fn reports_each_changed_field_once() {
    let before = class();
    let mut after = class();
    after.capacity = 25;
    after.status = ClassStatus::Paused;
    after.credit_hours = None;
    after.archived_at = Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());

    let changes = ProgramClass::diff(&before, &after);
    let fields: Vec<_> = changes.iter().map(|c| c.field).collect();
    assert_eq!(fields, ["capacity", "archived_at", "status", "credit_hours"]);
    assert_eq!(changes[0].new_value, "25");
    assert_eq!(changes[1].new_value, "2024-05-01");
    assert_eq!(changes[2].new_value, "Paused");
    assert_eq!(changes[3].new_value, "null");
  }

  #[test]
  fn ignores_untracked_fields() {
    let before = class();
    let mut after = class();
    after.start_date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
    assert!(ProgramClass::diff(&before, &after).is_empty());
  }
}
