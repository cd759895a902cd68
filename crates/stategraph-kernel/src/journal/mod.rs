use crate::commit::CommitPolicy;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// How a commit ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitOutcome {
    /// Every operation succeeded
    Applied,
    /// Partial commit with the listed operations failed
    PartiallyApplied { failed: Vec<usize> },
    /// Full-revert commit rolled back at `operation`
    Reverted { operation: usize, reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitRecord {
    /// Monotonic across the lifetime of the kernel, starting at 1
    pub sequence: u64,
    pub operations: usize,
    pub policy: CommitPolicy,
    pub outcome: CommitOutcome,
    pub recorded_at: DateTime<Utc>,
}

/// Bounded, append-only record of commit outcomes.
///
/// The oldest record is evicted once `capacity` is reached; sequence numbers
/// keep counting.
#[derive(Debug)]
pub struct CommitJournal {
    inner: Mutex<JournalInner>,
}

#[derive(Debug)]
struct JournalInner {
    records: VecDeque<CommitRecord>,
    capacity: usize,
    next_sequence: u64,
}

impl CommitJournal {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(JournalInner {
                records: VecDeque::with_capacity(capacity.min(1024)),
                capacity,
                next_sequence: 1,
            }),
        }
    }

    /// Append a record and return its sequence number.
    pub(crate) fn record(&self, operations: usize, policy: CommitPolicy, outcome: CommitOutcome) -> u64 {
        let mut guard = self.inner.lock();
        let sequence = guard.next_sequence;
        guard.next_sequence += 1;
        if guard.capacity == 0 {
            return sequence;
        }
        if guard.records.len() == guard.capacity {
            guard.records.pop_front();
        }
        guard.records.push_back(CommitRecord {
            sequence,
            operations,
            policy,
            outcome,
            recorded_at: Utc::now(),
        });
        sequence
    }

    /// Retained records, oldest first.
    pub fn records(&self) -> Vec<CommitRecord> {
        self.inner.lock().records.iter().cloned().collect()
    }

    pub fn last(&self) -> Option<CommitRecord> {
        self.inner.lock().records.back().cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of commits ever recorded, including evicted ones.
    pub fn total_commits(&self) -> u64 {
        self.inner.lock().next_sequence - 1
    }
}

impl Default for CommitJournal {
    fn default() -> Self {
        Self::with_capacity(256)
    }
}
