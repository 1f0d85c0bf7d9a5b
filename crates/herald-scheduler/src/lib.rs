//! # Herald Scheduler
//!
//! Cron-driven broadcast scheduling on a tokio interval tick.
//!
//! ```text
//! ScheduleEngine (tokio interval)
//!   ├── "0 8 * * *"  → standard morning broadcast
//!   ├── "0 12 * * *" → standard midday broadcast
//!   ├── "0 18 * * *" → standard evening broadcast
//!   └── custom definitions, persisted in the state store
//! ```
//!
//! A due schedule fires a dispatch through the coordinator under its own
//! schedule lock; slots that cannot run (transport down, previous run
//! still in flight) are skipped, never queued.

pub mod cron;
pub mod engine;

pub use cron::{CronSpec, daily_expression, expression_for_time, next_run_from_cron};
pub use engine::ScheduleEngine;
