//! Journal size bound.
//!
//! A workflow that never stops calling steps would otherwise grow its
//! journal without limit. `start_steps` checks the serialized size of the
//! journal before appending a new entry and fails the workflow rather than
//! let a single execution consume unbounded storage.

use dex_types::JournalEntry;

pub const MAX_JOURNAL_BYTES: usize = 8 * 1024 * 1024;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum JournalSizeError {
    #[error(
        "journal would exceed {limit} bytes appending step at sequence {sequence} ({new_size} bytes)"
    )]
    TooLarge {
        sequence: u64,
        new_size: usize,
        limit: usize,
    },
}

/// Estimate the serialized size of a journal entry via its JSON encoding.
/// This is an approximation (the store may use a denser codec) but is cheap
/// and conservative enough to catch runaway growth well before any real
/// storage limit is hit.
pub fn entry_size_bytes(entry: &JournalEntry) -> usize {
    serde_json::to_vec(entry).map(|v| v.len()).unwrap_or(0)
}

/// Sum of `entry_size_bytes` across a whole journal.
pub fn journal_size_bytes(entries: &[JournalEntry]) -> usize {
    entries.iter().map(entry_size_bytes).sum()
}

/// Check whether appending `candidate` would push the journal over
/// [`MAX_JOURNAL_BYTES`]. Called before each `start_steps` insert.
pub fn check_append_size(
    entries: &[JournalEntry],
    candidate: &JournalEntry,
) -> Result<(), JournalSizeError> {
    let current = journal_size_bytes(entries);
    let added = entry_size_bytes(candidate);
    let new_size = current + added;
    if new_size > MAX_JOURNAL_BYTES {
        return Err(JournalSizeError::TooLarge {
            sequence: candidate.sequence,
            new_size,
            limit: MAX_JOURNAL_BYTES,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dex_types::{Codec, EventType, Payload};

    fn entry(seq: u64) -> JournalEntry {
        JournalEntry {
            sequence: seq,
            timestamp: std::time::SystemTime::UNIX_EPOCH.into(),
            event: EventType::ExecutionCompleted {
                result: Payload::new(vec![0u8; 16], Codec::Json),
            },
        }
    }

    #[test]
    fn small_journal_passes() {
        let entries = vec![entry(0)];
        assert!(check_append_size(&entries, &entry(1)).is_ok());
    }

    #[test]
    fn oversized_candidate_is_rejected() {
        let big = JournalEntry {
            sequence: 1,
            timestamp: std::time::SystemTime::UNIX_EPOCH.into(),
            event: EventType::ExecutionCompleted {
                result: Payload::new(vec![0u8; MAX_JOURNAL_BYTES + 1], Codec::Json),
            },
        };
        let entries = vec![entry(0)];
        let err = check_append_size(&entries, &big).unwrap_err();
        assert!(matches!(err, JournalSizeError::TooLarge { sequence: 1, .. }));
    }
}
