//! Data types exchanged between the source, the workers, the stores and the control surface.

mod codec;
mod enumeration;
mod range;
mod record;
mod status;

pub use enumeration::*;
pub use range::*;
pub use record::*;
pub use status::*;

/// Position in the source log. Every committed write gets a new, strictly larger one.
pub type SequenceNumber = i64;

/// Identifier of the partition whose actor state is migrated.
pub type PartitionId = uuid::Uuid;
