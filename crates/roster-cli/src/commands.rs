//! Subcommands and their dispatch onto the [`Scheduler`].

use anyhow::Context as _;
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use clap::{Args, Subcommand};
use serde_json::{Value, json};

use roster_core::{
  Scheduler,
  attendance::{AttendanceInput, AttendanceStatus},
  class::{ClassPatch, ClassStatus, NewFacility, NewProgramClass},
  event::OverrideChange,
  expand::Window,
  materialize::{ClassFilter, day_window},
};
use roster_store_sqlite::SqliteStore;

#[derive(Subcommand)]
pub enum Command {
  /// Materialize every session in a date range.
  Calendar {
    #[command(flatten)]
    target: Target,
    /// First local date, inclusive.
    #[arg(long)]
    from:   NaiveDate,
    /// Last local date, inclusive.
    #[arg(long)]
    to:     NaiveDate,
    /// Zone for the date range and output (defaults to `schedule.default_zone`).
    #[arg(long, value_parser = parse_zone)]
    zone:   Option<Tz>,
  },

  /// Show whether an event has a session on a date.
  Occurrence {
    #[arg(long)]
    event: i64,
    #[arg(long)]
    date:  NaiveDate,
  },

  /// Check a user's schedule against a class they may join.
  Conflicts {
    #[arg(long)]
    user:  i64,
    #[arg(long)]
    class: i64,
    /// Only sessions from this instant on (RFC 3339; defaults to now).
    #[arg(long)]
    as_of: Option<DateTime<Utc>>,
  },

  /// Check a proposed schedule against the bookings of a room.
  RoomCheck {
    #[arg(long)]
    facility:      i64,
    #[arg(long)]
    room:          String,
    #[arg(long, value_parser = rule_text)]
    rule:          String,
    #[arg(long)]
    duration:      String,
    /// Ignore this event's own bookings.
    #[arg(long)]
    exclude_event: Option<i64>,
  },

  /// Record or overwrite one user's attendance for one session.
  Attend {
    #[arg(long)]
    event:     i64,
    #[arg(long)]
    user:      i64,
    #[arg(long)]
    date:      NaiveDate,
    #[arg(long)]
    status:    AttendanceStatus,
    #[arg(long, default_value = "")]
    note:      String,
    /// `HH:MM`
    #[arg(long)]
    check_in:  Option<String>,
    #[arg(long)]
    check_out: Option<String>,
  },

  /// Enrolled users without attendance or with too many absences.
  Flags {
    #[arg(long)]
    class: i64,
  },

  /// Count attendance rows still owed for held sessions.
  Missing {
    #[arg(long)]
    class: i64,
  },

  AddFacility {
    #[arg(long)]
    name: String,
    #[arg(long, value_parser = parse_zone)]
    zone: Tz,
  },

  AddProgram {
    #[arg(long)]
    name: String,
  },

  AddClass(AddClass),

  /// Attach a recurring schedule to a class.
  AddEvent {
    #[arg(long)]
    class:    i64,
    /// e.g. `1h30m`
    #[arg(long)]
    duration: String,
    /// `DTSTART...` and `RRULE...` lines; a literal `\n` separates them.
    #[arg(long, value_parser = rule_text)]
    rule:     String,
    #[arg(long)]
    room:     String,
  },

  /// Cancel or change one session of an event. A second override on the same
  /// date replaces the first.
  AddOverride(AddOverride),

  /// Remove an override, restoring the session it changed.
  DeleteOverride {
    #[arg(long)]
    event:       i64,
    #[arg(long = "override")]
    override_id: i64,
  },

  Enroll {
    #[arg(long)]
    user:  i64,
    #[arg(long)]
    class: i64,
  },

  /// Change class fields; prints the stored class and what changed.
  UpdateClass(UpdateClass),

  Transition {
    #[arg(long)]
    class:  i64,
    #[arg(long)]
    status: ClassStatus,
  },
}

/// Exactly one of facility, class or program.
#[derive(Args)]
#[group(required = true, multiple = false)]
pub struct Target {
  #[arg(long)]
  facility: Option<i64>,
  #[arg(long)]
  class:    Option<i64>,
  #[arg(long)]
  program:  Option<i64>,
}

impl Target {
  fn filter(&self) -> anyhow::Result<ClassFilter> {
    match (self.facility, self.class, self.program) {
      (Some(id), None, None) => Ok(ClassFilter::Facility(id)),
      (None, Some(id), None) => Ok(ClassFilter::Class(id)),
      (None, None, Some(id)) => Ok(ClassFilter::Program(id)),
      _ => anyhow::bail!("pass exactly one of --facility, --class, --program"),
    }
  }
}

#[derive(Args)]
pub struct AddClass {
  #[arg(long)]
  program:      i64,
  #[arg(long)]
  facility:     i64,
  #[arg(long)]
  name:         String,
  #[arg(long)]
  capacity:     i64,
  #[arg(long)]
  instructor:   String,
  #[arg(long, default_value = "")]
  description:  String,
  #[arg(long)]
  start_date:   NaiveDate,
  #[arg(long)]
  end_date:     Option<NaiveDate>,
  #[arg(long)]
  credit_hours: Option<i64>,
}

#[derive(Args)]
pub struct AddOverride {
  #[arg(long)]
  event:    i64,
  /// The session date; the override keeps the event's time of day.
  #[arg(long, required_unless_present = "selector", conflicts_with = "selector")]
  date:     Option<NaiveDate>,
  /// A single-occurrence rule, for moving a session to another time.
  #[arg(long, value_parser = rule_text)]
  selector: Option<String>,
  #[arg(long)]
  cancel:   bool,
  #[arg(long)]
  duration: Option<String>,
  #[arg(long)]
  room:     Option<String>,
  #[arg(long, default_value = "")]
  reason:   String,
}

#[derive(Args)]
pub struct UpdateClass {
  #[arg(long)]
  class:        i64,
  #[arg(long)]
  name:         Option<String>,
  #[arg(long)]
  capacity:     Option<i64>,
  #[arg(long)]
  instructor:   Option<String>,
  #[arg(long)]
  description:  Option<String>,
  #[arg(long)]
  end_date:     Option<NaiveDate>,
  #[arg(long)]
  credit_hours: Option<i64>,
  /// Archive the class now.
  #[arg(long)]
  archive:      bool,
}

fn parse_zone(s: &str) -> Result<Tz, String> {
  s.parse::<Tz>().map_err(|e| format!("unknown time zone {s:?}: {e}"))
}

/// Shells make embedded newlines awkward; accept `\n` or ` RRULE:` as the
/// line break.
fn rule_text(s: &str) -> Result<String, String> {
  Ok(s.replace("\\n", "\n").replace(" RRULE:", "\nRRULE:"))
}

fn window(from: NaiveDate, to: NaiveDate, zone: Tz) -> anyhow::Result<Window> {
  if to < from {
    anyhow::bail!("--to {to} is before --from {from}");
  }
  Ok(Window::new(day_window(from, zone).from, day_window(to, zone).to))
}

// ─── Dispatch ────────────────────────────────────────────────────────────────

pub async fn run(scheduler: &Scheduler<SqliteStore>, command: Command) -> anyhow::Result<Value> {
  let value = match command {
    Command::Calendar { target, from, to, zone } => {
      let window = window(from, to, zone.unwrap_or(scheduler.config().default_zone))?;
      let calendar = scheduler
        .calendar_instances(target.filter()?, window, zone)
        .await
        .context("failed to build calendar")?;
      json!({
        "instances": calendar.iter().collect::<Vec<_>>(),
        "anomalies": calendar.anomalies(),
      })
    }

    Command::Occurrence { event, date } => {
      serde_json::to_value(scheduler.resolve_occurrence_date(event, date).await?)?
    }

    Command::Conflicts { user, class, as_of } => {
      let as_of = as_of.unwrap_or_else(Utc::now);
      serde_json::to_value(scheduler.detect_conflicts(user, class, as_of).await?)?
    }

    Command::RoomCheck { facility, room, rule, duration, exclude_event } => {
      let conflicts = scheduler
        .check_room_conflicts(facility, &room, &rule, &duration, exclude_event)
        .await?;
      serde_json::to_value(conflicts)?
    }

    Command::Attend { event, user, date, status, note, check_in, check_out } => {
      let input = AttendanceInput { status, note, check_in, check_out };
      let record = scheduler
        .record_attendance(event, user, date, input)
        .await
        .with_context(|| format!("failed to record attendance for user {user} on {date}"))?;
      serde_json::to_value(record)?
    }

    Command::Flags { class } => serde_json::to_value(scheduler.attendance_flags(class).await?)?,

    Command::Missing { class } => {
      json!({ "class_id": class, "missing": scheduler.missing_attendance(class).await? })
    }

    Command::AddFacility { name, zone } => {
      serde_json::to_value(scheduler.create_facility(NewFacility { name, timezone: zone }).await?)?
    }

    Command::AddProgram { name } => serde_json::to_value(scheduler.create_program(name).await?)?,

    Command::AddClass(args) => {
      let class = scheduler
        .create_class(NewProgramClass {
          program_id:      args.program,
          facility_id:     args.facility,
          name:            args.name,
          capacity:        args.capacity,
          instructor_name: args.instructor,
          description:     args.description,
          status:          ClassStatus::Pending,
          start_date:      args.start_date,
          end_date:        args.end_date,
          credit_hours:    args.credit_hours,
        })
        .await?;
      serde_json::to_value(class)?
    }

    Command::AddEvent { class, duration, rule, room } => {
      serde_json::to_value(scheduler.create_event(class, &duration, &rule, &room).await?)?
    }

    Command::AddOverride(args) => {
      let change = OverrideChange {
        cancelled: args.cancel,
        duration:  args.duration,
        room:      args.room,
        reason:    args.reason,
      };
      let created = match (args.date, args.selector) {
        (Some(date), _) => scheduler.create_override(args.event, date, change).await?,
        (None, Some(selector)) => {
          scheduler
            .create_override_with_selector(args.event, &selector, change)
            .await?
        }
        (None, None) => anyhow::bail!("pass --date or --selector"),
      };
      serde_json::to_value(created)?
    }

    Command::DeleteOverride { event, override_id } => {
      let removed = scheduler
        .delete_override(event, override_id)
        .await
        .with_context(|| format!("failed to delete override {override_id}"))?;
      json!({ "deleted": removed })
    }

    Command::Enroll { user, class } => serde_json::to_value(scheduler.enroll(user, class).await?)?,

    Command::UpdateClass(args) => {
      let patch = ClassPatch {
        name: args.name,
        capacity: args.capacity,
        instructor_name: args.instructor,
        description: args.description,
        status: None,
        end_date: args.end_date.map(Some),
        credit_hours: args.credit_hours.map(Some),
        archived_at: args.archive.then(|| Some(Utc::now())),
      };
      let (class, changes) = scheduler.update_class(args.class, patch).await?;
      json!({ "class": class, "changes": changes })
    }

    Command::Transition { class, status } => {
      serde_json::to_value(scheduler.transition_class(class, status).await?)?
    }
  };
  Ok(value)
}
