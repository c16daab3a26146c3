use crate::types::{SequenceNumber, SequenceRange};

/// Splits `[first, last]` into at most `worker_count` contiguous ranges.
///
/// The ranges are ordered, disjoint, cover every sequence number of the span
/// exactly once and differ in length by at most one. A span shorter than
/// `worker_count` gets one range per sequence number, an empty span none.
pub fn partition_sequence_range(
    first: SequenceNumber,
    last: SequenceNumber,
    worker_count: u16,
) -> Vec<SequenceRange> {
    let span = last - first + 1;
    if span <= 0 || worker_count == 0 {
        return Vec::new();
    }

    let count = span.min(i64::from(worker_count));
    let base = span / count;
    let remainder = span % count;

    let mut ranges = Vec::with_capacity(count as usize);
    let mut start = first;
    for i in 0..count {
        let len = base + i64::from(i < remainder);
        ranges.push(SequenceRange::new(start, start + len - 1));
        start += len;
    }

    ranges
}
