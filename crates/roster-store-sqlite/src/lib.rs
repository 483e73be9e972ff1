//! SQLite-backed [`ScheduleStore`](roster_core::store::ScheduleStore) for
//! Roster.
//!
//! Calls go through `tokio-rusqlite`, which runs rusqlite on a dedicated
//! thread so the async runtime is never blocked.

mod encode;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteStore;
