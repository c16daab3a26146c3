use serde::{Deserialize, Serialize};

use crate::bail;
use crate::error::{ErrorKind, MigrationResult};
use crate::hash::{ContentHash, hash_records};
use crate::types::{SequenceNumber, SequenceRecord};

/// A request to enumerate the source log over `[start_sequence_number, end_sequence_number]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EnumerationRequest {
    pub start_sequence_number: SequenceNumber,
    pub end_sequence_number: SequenceNumber,
    /// Maximum number of records in a page.
    pub chunk_size: i64,
    /// Maximum number of pages returned by a single call.
    pub number_of_chunks_per_enumeration: i32,
    #[serde(default)]
    pub include_deletes: bool,
    #[serde(default, rename = "ResolveActorIdsForStateKVPairs")]
    pub resolve_actor_ids_for_state_kv_pairs: bool,
}

impl EnumerationRequest {
    pub fn new(
        start_sequence_number: SequenceNumber,
        end_sequence_number: SequenceNumber,
        chunk_size: i64,
        number_of_chunks_per_enumeration: i32,
        include_deletes: bool,
    ) -> Self {
        Self {
            start_sequence_number,
            end_sequence_number,
            chunk_size,
            number_of_chunks_per_enumeration,
            include_deletes,
            resolve_actor_ids_for_state_kv_pairs: false,
        }
    }

    pub fn validate(&self) -> MigrationResult<()> {
        if self.start_sequence_number > self.end_sequence_number {
            bail!(
                ErrorKind::InvalidRequest,
                "Enumeration start is after its end",
                format!(
                    "start sequence number {} is greater than end sequence number {}",
                    self.start_sequence_number, self.end_sequence_number
                )
            );
        }

        if self.chunk_size <= 0 {
            bail!(
                ErrorKind::InvalidRequest,
                "Enumeration chunk size must be positive",
                format!("chunk size is {}", self.chunk_size)
            );
        }

        if self.number_of_chunks_per_enumeration <= 0 {
            bail!(
                ErrorKind::InvalidRequest,
                "Enumeration must request at least one chunk",
                format!(
                    "number of chunks per enumeration is {}",
                    self.number_of_chunks_per_enumeration
                )
            );
        }

        Ok(())
    }
}

/// A page of records produced by an enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EnumerationResponse {
    /// Records in strictly increasing version order.
    pub key_value_pairs: Vec<SequenceRecord>,
    /// Set on the last page of the requested range.
    pub end_sequence_number_reached: bool,
    pub key_hash: ContentHash,
    pub value_hash: ContentHash,
}

impl EnumerationResponse {
    /// Builds a page and hashes its records.
    pub fn new(key_value_pairs: Vec<SequenceRecord>, end_sequence_number_reached: bool) -> Self {
        let digest = hash_records(&key_value_pairs);

        Self {
            key_value_pairs,
            end_sequence_number_reached,
            key_hash: digest.key_hash,
            value_hash: digest.value_hash,
        }
    }

    pub fn last_version(&self) -> Option<SequenceNumber> {
        self.key_value_pairs.last().map(|record| record.version)
    }

    /// Recomputes the page hashes and compares them with the received ones.
    pub fn verify_integrity(&self) -> MigrationResult<()> {
        let digest = hash_records(&self.key_value_pairs);
        if digest.key_hash != self.key_hash || digest.value_hash != self.value_hash {
            bail!(
                ErrorKind::PageIntegrityMismatch,
                "Enumeration page does not match its hashes",
                format!(
                    "received key hash {} and value hash {}, computed {} and {} over {} records",
                    self.key_hash,
                    self.value_hash,
                    digest.key_hash,
                    digest.value_hash,
                    digest.record_count
                )
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_uses_wire_field_names() {
        let mut request = EnumerationRequest::new(0, 999, 100, 10, true);
        request.resolve_actor_ids_for_state_kv_pairs = true;
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["StartSequenceNumber"], 0);
        assert_eq!(json["EndSequenceNumber"], 999);
        assert_eq!(json["ChunkSize"], 100);
        assert_eq!(json["NumberOfChunksPerEnumeration"], 10);
        assert_eq!(json["IncludeDeletes"], true);
        assert_eq!(json["ResolveActorIdsForStateKVPairs"], true);
    }

    #[test]
    fn invalid_requests_are_rejected() {
        let reversed = EnumerationRequest::new(10, 9, 100, 1, false);
        assert_eq!(
            reversed.validate().unwrap_err().kind(),
            ErrorKind::InvalidRequest
        );

        let no_chunk = EnumerationRequest::new(0, 9, 0, 1, false);
        assert_eq!(
            no_chunk.validate().unwrap_err().kind(),
            ErrorKind::InvalidRequest
        );

        let no_pages = EnumerationRequest::new(0, 9, 10, 0, false);
        assert_eq!(
            no_pages.validate().unwrap_err().kind(),
            ErrorKind::InvalidRequest
        );

        assert!(EnumerationRequest::new(5, 5, 1, 1, false).validate().is_ok());
    }

    #[test]
    fn tampered_page_fails_integrity_check() {
        let mut page = EnumerationResponse::new(
            vec![
                SequenceRecord::live(1, "a", b"1".to_vec()),
                SequenceRecord::tombstone(2, "b"),
            ],
            true,
        );
        assert!(page.verify_integrity().is_ok());
        assert_eq!(page.last_version(), Some(2));

        page.key_value_pairs[0].value = Some(b"2".to_vec());
        assert_eq!(
            page.verify_integrity().unwrap_err().kind(),
            ErrorKind::PageIntegrityMismatch
        );
    }
}
