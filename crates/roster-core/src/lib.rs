//! Core types, algorithms and the store trait for Roster class scheduling.
//!
//! Recurring sessions are described by [`rule::RecurrenceRule`]s, expanded
//! over bounded windows, merged with single-date overrides and materialized
//! into calendars. Attendance and conflict checks are built on top of the
//! same materialization.
//!
//! This crate has no database or I/O dependencies. Storage backends implement
//! [`store::ScheduleStore`].

// Native `async fn` in traits; the store trait spells out `Send` futures.
#![allow(async_fn_in_trait)]

pub mod attendance;
pub mod class;
pub mod config;
pub mod conflict;
pub mod error;
pub mod event;
pub mod expand;
pub mod history;
pub mod materialize;
pub mod resolve;
pub mod rule;
pub mod scheduler;
pub mod span;
pub mod store;

#[cfg(test)]
mod memory;

pub use config::ScheduleConfig;
pub use error::{Error, Result, ValidationError};
pub use scheduler::Scheduler;
