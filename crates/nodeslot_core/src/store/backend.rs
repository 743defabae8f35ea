//! Blocking storage backends.
//!
//! # Invariants
//! - For one identity, a batch never overwrites or deletes state written by a
//!   batch with a higher sequence number.
//! - Deleted records read as absent.

use crate::store::StoreResult;
use std::collections::BTreeMap;

/// One record write inside a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingWrite {
    pub id: String,
    pub payload: String,
}

/// Writes and deletions applied together under one sequence number.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    pub seq: i64,
    pub writes: Vec<PendingWrite>,
    pub deletes: Vec<String>,
}

impl WriteBatch {
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty() && self.deletes.is_empty()
    }
}

/// What a backend did with one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub written: usize,
    pub deleted: usize,
    /// Entries skipped because a newer sequence already touched the identity.
    pub stale: usize,
}

/// Synchronous key/value storage for node records.
///
/// Implementations run on blocking worker threads, never on the runtime
/// thread that owns the graph.
pub trait StoreBackend: Send + 'static {
    /// Payload of a live record, `None` when absent or deleted.
    fn load(&self, id: &str) -> StoreResult<Option<String>>;

    /// Applies one batch atomically where the medium allows it.
    fn apply(&mut self, batch: &WriteBatch) -> StoreResult<BatchOutcome>;

    /// Ids of every live record, sorted.
    fn ids(&self) -> StoreResult<Vec<String>>;

    /// Highest sequence number ever applied, 0 when empty.
    fn max_write_seq(&self) -> StoreResult<i64>;
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    payload: Option<String>,
    seq: i64,
}

/// In-process backend for tests and ephemeral graphs.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: BTreeMap<String, MemoryEntry>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a payload verbatim, bypassing sequencing and validation.
    pub fn insert_raw(&mut self, id: impl Into<String>, payload: impl Into<String>) {
        let entry = MemoryEntry {
            payload: Some(payload.into()),
            seq: 0,
        };
        self.entries.insert(id.into(), entry);
    }

    pub fn len(&self) -> usize {
        self.entries
            .values()
            .filter(|entry| entry.payload.is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn accepts(&self, id: &str, seq: i64) -> bool {
        self.entries.get(id).map_or(true, |entry| entry.seq <= seq)
    }
}

impl StoreBackend for MemoryBackend {
    fn load(&self, id: &str) -> StoreResult<Option<String>> {
        Ok(self.entries.get(id).and_then(|entry| entry.payload.clone()))
    }

    fn apply(&mut self, batch: &WriteBatch) -> StoreResult<BatchOutcome> {
        let mut outcome = BatchOutcome::default();
        for write in &batch.writes {
            if !self.accepts(&write.id, batch.seq) {
                outcome.stale += 1;
                continue;
            }
            self.entries.insert(
                write.id.clone(),
                MemoryEntry {
                    payload: Some(write.payload.clone()),
                    seq: batch.seq,
                },
            );
            outcome.written += 1;
        }
        for id in &batch.deletes {
            if !self.accepts(id, batch.seq) {
                outcome.stale += 1;
                continue;
            }
            // Tombstone keeps the sequence so older writes stay rejected.
            let previous = self.entries.insert(
                id.clone(),
                MemoryEntry {
                    payload: None,
                    seq: batch.seq,
                },
            );
            if previous.is_some_and(|entry| entry.payload.is_some()) {
                outcome.deleted += 1;
            }
        }
        Ok(outcome)
    }

    fn ids(&self) -> StoreResult<Vec<String>> {
        Ok(self
            .entries
            .iter()
            .filter(|(_, entry)| entry.payload.is_some())
            .map(|(id, _)| id.clone())
            .collect())
    }

    fn max_write_seq(&self) -> StoreResult<i64> {
        Ok(self
            .entries
            .values()
            .map(|entry| entry.seq)
            .max()
            .unwrap_or(0))
    }
}
