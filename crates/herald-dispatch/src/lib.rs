//! # Herald Dispatch
//!
//! The dispatch coordinator — decides whether, when, and how many times a
//! broadcast may run. This is where all the non-trivial logic lives:
//!
//! ```text
//! Scheduler / manual trigger
//!   └── Coordinator::dispatch(recipients, opts)
//!         ├── LockRegistry (Global)        one dispatch at a time
//!         ├── ConnectionManager            ensure connected
//!         ├── ContentCache                 TTL-memoized latest item
//!         ├── LockRegistry (Fingerprint)   no duplicate in-flight payload
//!         ├── LockRegistry (Recipient)     no overlapping sends
//!         └── BatchSender                  paced, partial-failure-aware
//! ```
//!
//! Locks are RAII guards: every exit path (success, error, timeout,
//! panic) releases what it acquired.

pub mod batch;
pub mod cache;
pub mod connection;
pub mod coordinator;
pub mod events;
pub mod locks;

#[cfg(test)]
pub(crate) mod testing;

pub use batch::BatchSender;
pub use cache::ContentCache;
pub use connection::{BackoffPolicy, ConnectionManager};
pub use coordinator::{Coordinator, DispatchOptions};
pub use events::StatusBus;
pub use locks::{LockRegistry, LockScope};
