//! Content hashing of records, used to check enumeration pages on receipt and to
//! compare the source with the destination after the copy.
//!
//! Keys and values are hashed into two separate SHA-256 digests. Every key is
//! fed as its byte length (u64, little endian) followed by its UTF-8 bytes. Every
//! value is fed as a presence tag (`0` absent, `1` present) followed, when
//! present, by its byte length and bytes. Length prefixes keep `["ab", "c"]`
//! and `["a", "bc"]` apart.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::types::SequenceRecord;

/// A SHA-256 digest, hex encoded on the wire.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.to_hex())
    }
}

impl Serialize for ContentHash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(encoded, &mut bytes).map_err(serde::de::Error::custom)?;

        Ok(ContentHash(bytes))
    }
}

/// Key hash, value hash and record count over an ordered sequence of records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContentDigest {
    pub key_hash: ContentHash,
    pub value_hash: ContentHash,
    pub record_count: u64,
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} records, key hash {}, value hash {}",
            self.record_count, self.key_hash, self.value_hash
        )
    }
}

/// Incremental hasher over records in the order they are fed.
#[derive(Debug, Clone, Default)]
pub struct RecordHasher {
    keys: Sha256,
    values: Sha256,
    record_count: u64,
}

impl RecordHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, record: &SequenceRecord) {
        let value = if record.is_deleted {
            None
        } else {
            record.value.as_deref()
        };

        self.update_parts(&record.key, value);
    }

    pub fn update_parts(&mut self, key: &str, value: Option<&[u8]>) {
        self.keys.update((key.len() as u64).to_le_bytes());
        self.keys.update(key.as_bytes());

        match value {
            Some(value) => {
                self.values.update([1u8]);
                self.values.update((value.len() as u64).to_le_bytes());
                self.values.update(value);
            }
            None => self.values.update([0u8]),
        }

        self.record_count += 1;
    }

    pub fn finish(self) -> ContentDigest {
        ContentDigest {
            key_hash: finalize(self.keys),
            value_hash: finalize(self.values),
            record_count: self.record_count,
        }
    }
}

fn finalize(hasher: Sha256) -> ContentHash {
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&hasher.finalize());

    ContentHash(bytes)
}

/// Hashes the records of a single page.
pub fn hash_records<'a>(records: impl IntoIterator<Item = &'a SequenceRecord>) -> ContentDigest {
    let mut hasher = RecordHasher::new();
    for record in records {
        hasher.update(record);
    }

    hasher.finish()
}
