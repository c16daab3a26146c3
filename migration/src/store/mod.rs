//! Stores on the destination and source sides of a migration.
//!
//! - [`base::DestinationStore`] receives migrated records.
//! - [`base::StatusStore`] keeps the durable migration status.
//! - [`base::GateStateStore`] keeps the write gate flag of a source replica.
//!
//! [`memory::MemoryStore`] and [`postgres::PostgresStore`] implement all three.

pub mod base;
pub mod memory;
pub mod postgres;
