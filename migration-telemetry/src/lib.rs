//! Tracing setup shared by the migration binaries and their tests.

mod tracing;

pub use crate::tracing::*;
