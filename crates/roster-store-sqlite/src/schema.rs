//! SQL schema for the Roster SQLite store.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS facilities (
    facility_id INTEGER PRIMARY KEY,
    name        TEXT NOT NULL,
    timezone    TEXT NOT NULL    -- IANA name
);

CREATE TABLE IF NOT EXISTS programs (
    program_id INTEGER PRIMARY KEY,
    name       TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS classes (
    class_id        INTEGER PRIMARY KEY,
    program_id      INTEGER NOT NULL REFERENCES programs(program_id),
    facility_id     INTEGER NOT NULL REFERENCES facilities(facility_id),
    name            TEXT NOT NULL,
    capacity        INTEGER NOT NULL,
    instructor_name TEXT NOT NULL,
    description     TEXT NOT NULL,
    status          TEXT NOT NULL,   -- 'Pending' | 'Scheduled' | 'Active' | ...
    start_date      TEXT NOT NULL,   -- YYYY-MM-DD
    end_date        TEXT,
    credit_hours    INTEGER,
    archived_at     TEXT             -- RFC 3339 UTC
);

-- Rule text and duration are validated before they are written.
CREATE TABLE IF NOT EXISTS class_events (
    event_id        INTEGER PRIMARY KEY,
    class_id        INTEGER NOT NULL REFERENCES classes(class_id),
    duration        TEXT NOT NULL,   -- e.g. '1h30m0s'
    recurrence_rule TEXT NOT NULL,
    room            TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS event_overrides (
    override_id INTEGER PRIMARY KEY,
    event_id    INTEGER NOT NULL REFERENCES class_events(event_id),
    selector    TEXT NOT NULL,
    cancelled   INTEGER NOT NULL,
    duration    TEXT,
    room        TEXT,
    reason      TEXT NOT NULL,
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS enrollments (
    user_id  INTEGER NOT NULL,
    class_id INTEGER NOT NULL REFERENCES classes(class_id),
    status   TEXT NOT NULL,          -- 'Enrolled' | 'Completed' | 'Dropped'
    PRIMARY KEY (user_id, class_id)
);

-- Re-recording a session overwrites the row; see upsert_attendance.
CREATE TABLE IF NOT EXISTS event_attendance (
    event_id          INTEGER NOT NULL REFERENCES class_events(event_id),
    user_id           INTEGER NOT NULL,
    date              TEXT NOT NULL,
    status            TEXT NOT NULL,
    note              TEXT NOT NULL DEFAULT '',
    check_in          TEXT,          -- HH:MM
    check_out         TEXT,
    minutes_attended  INTEGER,
    scheduled_minutes INTEGER NOT NULL,
    UNIQUE (event_id, user_id, date)
);

CREATE INDEX IF NOT EXISTS classes_facility_idx  ON classes(facility_id);
CREATE INDEX IF NOT EXISTS classes_program_idx   ON classes(program_id);
CREATE INDEX IF NOT EXISTS events_class_idx      ON class_events(class_id);
CREATE INDEX IF NOT EXISTS overrides_event_idx   ON event_overrides(event_id);
CREATE INDEX IF NOT EXISTS enrollments_class_idx ON enrollments(class_id);

PRAGMA user_version = 1;
";
