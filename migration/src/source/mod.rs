//! Source side of a migration.
//!
//! [`base::SequenceStore`] is what the destination consumes. It is served either
//! in-process by [`service::KvsService`] over a [`log::KvsLog`], or remotely
//! through [`client::KvsServiceClient`]. The log is kept in memory or in
//! Postgres.

pub mod base;
pub mod client;
pub mod log;
pub mod memory;
pub mod postgres;
pub mod service;
