//! Migration of actor state from a key-value store log into reliable collections.
//!
//! The [`orchestrator::MigrationOrchestrator`] drives a partition through its
//! migration phases, reading the source through a [`source::base::SequenceStore`]
//! and applying records to a [`store::base::DestinationStore`] with a pool of
//! workers. Source replicas serve their log with [`source::service::KvsService`]
//! and guard client writes with a [`gate::WriteGate`].

pub mod concurrency;
pub mod controller;
pub mod enumeration;
pub mod error;
pub mod gate;
pub mod hash;
mod macros;
pub mod orchestrator;
pub mod retry;
pub mod source;
pub mod store;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
pub mod verification;
pub mod workers;
