//! # Herald Core
//! Shared foundation for the Herald broadcast coordinator.
//!
//! Everything the other crates agree on lives here: the error taxonomy,
//! the configuration struct, the data model (recipients, content items,
//! dispatch results), and the two opaque collaborator traits —
//! [`traits::Transport`] and [`traits::ContentSource`].

pub mod config;
pub mod error;
pub mod store;
pub mod traits;
pub mod types;

pub use config::HeraldConfig;
pub use error::{HeraldError, Result};
