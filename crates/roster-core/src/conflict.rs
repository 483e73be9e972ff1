//! Time-overlap conflicts between a user's classes, and between bookings of
//! one room.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::materialize::EventInstance;

/// Half-open intervals `[s1, e1)` and `[s2, e2)` intersect.
pub fn overlaps(s1: DateTime<Utc>, e1: DateTime<Utc>, s2: DateTime<Utc>, e2: DateTime<Utc>) -> bool {
  s1 < e2 && s2 < e1
}

/// A class the user is enrolled in that clashes with a proposed class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictDetail {
  pub user_id:       i64,
  pub class_id:      i64,
  pub class_name:    String,
  /// The earliest clash.
  pub overlap_start: DateTime<Utc>,
  pub overlap_end:   DateTime<Utc>,
  /// How many proposed sessions clash with this class, each counted once
  /// however many of its sessions it overlaps.
  pub sessions:      usize,
  pub reason:        String,
}

/// An existing booking that shares a room with a proposed rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomConflict {
  pub event_id:   i64,
  pub class_id:   i64,
  pub class_name: String,
  pub start:      DateTime<Utc>,
  pub end:        DateTime<Utc>,
}

/// Compare proposed sessions against the user's enrolled sessions.
///
/// Both inputs must be sorted by start. Cancelled sessions are ignored. One
/// detail is reported per clashing enrolled class, ordered by overlap start
/// and then class id.
pub fn find_conflicts(
  user_id: i64,
  candidate: &[EventInstance],
  enrolled: &[EventInstance],
) -> Vec<ConflictDetail> {
  let enrolled: Vec<&EventInstance> = enrolled.iter().filter(|e| !e.cancelled).collect();
  let mut by_class: BTreeMap<i64, ConflictDetail> = BTreeMap::new();

  for proposed in candidate.iter().filter(|c| !c.cancelled) {
    let (p_start, p_end) = (proposed.start_utc(), proposed.end_utc());
    let mut counted = BTreeSet::new();
    for existing in &enrolled {
      let (e_start, e_end) = (existing.start_utc(), existing.end_utc());
      if e_start >= p_end {
        break;
      }
      if !overlaps(p_start, p_end, e_start, e_end) {
        continue;
      }
      let (start, end) = (p_start.max(e_start), p_end.min(e_end));
      let first_for_class = counted.insert(existing.class_id);
      by_class
        .entry(existing.class_id)
        .and_modify(|d| d.sessions += usize::from(first_for_class))
        .or_insert_with(|| ConflictDetail {
          user_id,
          class_id: existing.class_id,
          class_name: existing.class_name.clone(),
          overlap_start: start,
          overlap_end: end,
          sessions: 1,
          reason: format!(
            "{} overlaps {} on {} from {} to {}",
            proposed.class_name,
            existing.class_name,
            existing.date,
            start.with_timezone(&existing.start.timezone()).format("%H:%M"),
            end.with_timezone(&existing.start.timezone()).format("%H:%M"),
          ),
        });
    }
  }

  let mut details: Vec<ConflictDetail> = by_class.into_values().collect();
  details.sort_by_key(|d| (d.overlap_start, d.class_id));
  details
}

/// Bookings in `booked` that clash with any of `proposed` (start, end) pairs,
/// at most `limit` of them.
pub fn find_room_conflicts(
  proposed: &[(DateTime<Utc>, DateTime<Utc>)],
  booked: &[EventInstance],
  limit: usize,
) -> Vec<RoomConflict> {
  let mut conflicts = Vec::new();
  for &(start, end) in proposed {
    for booking in booked.iter().filter(|b| !b.cancelled) {
      if conflicts.len() >= limit {
        return conflicts;
      }
      if overlaps(start, end, booking.start_utc(), booking.end_utc()) {
        conflicts.push(RoomConflict {
          event_id:   booking.event_id,
          class_id:   booking.class_id,
          class_name: booking.class_name.clone(),
          start:      booking.start_utc(),
          end:        booking.end_utc(),
        });
      }
    }
  }
  conflicts
}
