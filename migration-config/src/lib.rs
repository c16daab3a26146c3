//! Configuration management for the migration services.
//!
//! Provides environment detection, configuration loading from YAML files,
//! secret handling, and the shared configuration types used by the source
//! and destination roles of a migration.

mod environment;
mod load;
mod secret;
pub mod shared;

pub use environment::*;
pub use load::*;
pub use secret::*;
