//! Comparison of the migrated data with the source.

use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

use crate::bail;
use crate::error::{ErrorKind, MigrationResult};
use crate::hash::{ContentDigest, RecordHasher};
use crate::source::base::SequenceStore;
use crate::store::base::DestinationStore;
use crate::types::EnumerationRequest;

/// Source and destination digests of a verification run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VerificationReport {
    pub source: ContentDigest,
    pub destination: ContentDigest,
    pub is_match: bool,
}

impl VerificationReport {
    pub fn new(source: ContentDigest, destination: ContentDigest) -> Self {
        Self {
            is_match: source == destination,
            source,
            destination,
        }
    }
}

impl fmt::Display for VerificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let outcome = if self.is_match { "match" } else { "mismatch" };
        write!(
            f,
            "{outcome}: source has {}, destination has {}",
            self.source, self.destination
        )
    }
}

/// Digest over the live records of the whole source log, in version order.
pub async fn source_digest<S>(
    source: &S,
    chunk_size: i64,
    chunks_per_enumeration: i32,
) -> MigrationResult<ContentDigest>
where
    S: SequenceStore,
{
    let first = source.get_first_sequence_number().await?;
    let last = source.get_last_sequence_number().await?;

    let mut hasher = RecordHasher::new();
    let mut next = first;
    while next <= last {
        let start = next;
        let request = EnumerationRequest::new(next, last, chunk_size, chunks_per_enumeration, false);
        let mut pages = source.enumerate(request).await?;

        while let Some(page) = pages.try_next().await? {
            page.verify_integrity()?;

            for record in &page.key_value_pairs {
                hasher.update(record);
            }

            if page.end_sequence_number_reached {
                next = last + 1;
            } else if let Some(version) = page.last_version() {
                next = version + 1;
            }
        }

        if next == start {
            bail!(
                ErrorKind::InvalidState,
                "Source enumeration made no progress",
                format!("enumeration from {start} to {last} returned no records and no final page")
            );
        }
    }

    Ok(hasher.finish())
}

/// Compares the live records of the source with those of the destination.
///
/// Read-only on both sides. The result is only meaningful while the source
/// rejects writes.
pub async fn verify<S, D>(
    source: &S,
    destination: &D,
    chunk_size: i64,
    chunks_per_enumeration: i32,
) -> MigrationResult<VerificationReport>
where
    S: SequenceStore,
    D: DestinationStore,
{
    let source_digest = source_digest(source, chunk_size, chunks_per_enumeration).await?;
    let destination_digest = destination.compute_digest().await?;

    let report = VerificationReport::new(source_digest, destination_digest);
    info!(%report, "verified migrated records");

    Ok(report)
}
