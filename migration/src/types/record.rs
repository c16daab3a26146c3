use serde::{Deserialize, Serialize};

use crate::types::SequenceNumber;
use crate::types::codec::base64_bytes;

/// Separator between the actor id and the state name in actor state keys.
const ACTOR_STATE_KEY_SEPARATOR: char = '_';

/// A key and its latest value as read from the source log.
///
/// `version` is the sequence number of the write that produced this state of
/// the key. Deleted keys are tombstones without a value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SequenceRecord {
    pub version: SequenceNumber,
    pub key: String,
    #[serde(with = "base64_bytes", default)]
    pub value: Option<Vec<u8>>,
    pub is_deleted: bool,
    /// Actor owning the key, only resolved on request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,
}

impl SequenceRecord {
    pub fn live(version: SequenceNumber, key: impl Into<String>, value: Vec<u8>) -> Self {
        Self {
            version,
            key: key.into(),
            value: Some(value),
            is_deleted: false,
            actor_id: None,
        }
    }

    pub fn tombstone(version: SequenceNumber, key: impl Into<String>) -> Self {
        Self {
            version,
            key: key.into(),
            value: None,
            is_deleted: true,
            actor_id: None,
        }
    }

    /// Fills [`SequenceRecord::actor_id`] from an actor state key of the form
    /// `<actor id>_<state name>`.
    pub fn resolve_actor_id(&mut self) {
        self.actor_id = actor_id_from_key(&self.key).map(str::to_owned);
    }
}

/// Returns the actor id prefix of an actor state key, if the key has one.
pub fn actor_id_from_key(key: &str) -> Option<&str> {
    match key.split_once(ACTOR_STATE_KEY_SEPARATOR) {
        Some((actor_id, state_name)) if !actor_id.is_empty() && !state_name.is_empty() => {
            Some(actor_id)
        }
        _ => None,
    }
}
