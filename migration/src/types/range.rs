use std::fmt;

use crate::types::SequenceNumber;

/// Inclusive range of sequence numbers `[start, end]`.
///
/// A range whose `end` is below its `start` is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceRange {
    pub start: SequenceNumber,
    pub end: SequenceNumber,
}

impl SequenceRange {
    pub fn new(start: SequenceNumber, end: SequenceNumber) -> Self {
        Self { start, end }
    }

    /// Number of sequence numbers covered by the range.
    pub fn len(&self) -> i64 {
        if self.is_empty() {
            0
        } else {
            self.end - self.start + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }

    pub fn contains(&self, sequence_number: SequenceNumber) -> bool {
        self.start <= sequence_number && sequence_number <= self.end
    }
}

impl fmt::Display for SequenceRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}
