//! In-memory ready queue with priority and due-time awareness.
//!
//! Dispatch order is priority descending, then due time ascending (entries
//! without a due time last), then insertion order. A second index keyed by
//! due time lets [`ReadyQueue::extract_due`] visit only entries that are due.

use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};

use crate::core::task::TaskId;
use crate::util::serde::Priority;

/// Due time with "never" ordered after every instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DueKey {
    At(DateTime<Utc>),
    Never,
}

impl PartialOrd for DueKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DueKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::At(a), Self::At(b)) => a.cmp(b),
            (Self::At(_), Self::Never) => Ordering::Less,
            (Self::Never, Self::At(_)) => Ordering::Greater,
            (Self::Never, Self::Never) => Ordering::Equal,
        }
    }
}

/// Position of an entry in dispatch order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct QueueKey {
    // Field order is comparison order.
    rank: Reverse<u8>,
    due: DueKey,
    seq: u64,
}

/// Ready queue of task ids awaiting dispatch.
///
/// Each id appears at most once; re-inserting an id moves it.
#[derive(Debug, Default)]
pub struct ReadyQueue {
    ordered: BTreeMap<QueueKey, TaskId>,
    by_due: BTreeMap<(DateTime<Utc>, u64), (QueueKey, TaskId)>,
    index: HashMap<TaskId, QueueKey>,
    next_seq: u64,
}

impl ReadyQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `id`, replacing any earlier entry for it.
    ///
    /// Returns `true` if the id was not queued before.
    pub fn insert(&mut self, id: TaskId, priority: Priority, due: Option<DateTime<Utc>>) -> bool {
        let fresh = !self.remove(id);
        let key = QueueKey {
            rank: Reverse(priority.ordinal()),
            due: due.map_or(DueKey::Never, DueKey::At),
            seq: self.next_seq,
        };
        self.next_seq += 1;
        if let Some(at) = due {
            self.by_due.insert((at, key.seq), (key, id));
        }
        self.ordered.insert(key, id);
        self.index.insert(id, key);
        fresh
    }

    /// Remove `id`. Returns `false` if it was not queued.
    pub fn remove(&mut self, id: TaskId) -> bool {
        let Some(key) = self.index.remove(&id) else {
            return false;
        };
        self.ordered.remove(&key);
        if let DueKey::At(at) = key.due {
            self.by_due.remove(&(at, key.seq));
        }
        true
    }

    /// Remove and return every entry due at or before `now`, in dispatch order.
    pub fn extract_due(&mut self, now: DateTime<Utc>) -> Vec<TaskId> {
        let still_waiting = self.by_due.split_off(&(now, u64::MAX));
        let due = std::mem::replace(&mut self.by_due, still_waiting);
        if due.is_empty() {
            return Vec::new();
        }

        let mut entries: Vec<(QueueKey, TaskId)> = due.into_values().collect();
        entries.sort_unstable_by_key(|(key, _)| *key);
        entries
            .into_iter()
            .map(|(key, id)| {
                self.ordered.remove(&key);
                self.index.remove(&id);
                id
            })
            .collect()
    }

    /// Queued ids in dispatch order.
    pub fn iter(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.ordered.values().copied()
    }

    /// Earliest due time in the queue.
    #[must_use]
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.by_due.first_key_value().map(|((at, _), _)| *at)
    }

    /// Number of queued entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}
