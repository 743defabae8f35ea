//! Store: persistence of node subtrees.
//!
//! # Responsibility
//! - Serialize storable nodes into `NodeRecord`s and hand them to a backend.
//! - Coalesce dirty nodes into one write batch per flush.
//! - Restore persisted subtrees into a live graph (see `restore`).
//!
//! # Invariants
//! - Batches carry strictly increasing sequence numbers, continuing the
//!   highest sequence already in the backend.
//! - Backend I/O only runs inside `spawn_blocking`; the graph never crosses
//!   a thread boundary.
//! - Once closed, every job and load returns `Cancelled`.

use crate::db::DbError;
use crate::graph::{GraphResult, NodeError, NodeGraph, NodeId};
use log::{debug, info, warn};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

pub mod backend;
pub mod record;
mod restore;
pub mod sqlite;

pub use backend::{BatchOutcome, MemoryBackend, PendingWrite, StoreBackend, WriteBatch};
pub use record::NodeRecord;
pub use restore::{LoadedTree, RestoreFailure, RestoreOutcome};
pub use sqlite::SqliteBackend;

pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from persisting or restoring nodes.
#[derive(Debug)]
pub enum StoreError {
    /// Underlying SQLite/bootstrap error.
    Db(DbError),
    /// Graph rejected a restored node.
    Node(NodeError),
    /// Persisted entry cannot be read back as a node record.
    Corruption { id: String, reason: String },
    /// No live record under this id.
    NotFound(String),
    /// Node does not have `should_store` set.
    NotStorable(String),
    /// Garbage collection without any root to trace from.
    NoRoots,
    /// Record could not be serialized.
    Encode { id: String, reason: String },
    /// Store was closed before the operation completed.
    Cancelled,
    /// Backend lock was poisoned by a panicking writer.
    Poisoned,
    /// Blocking task failed to complete.
    Task(String),
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    MissingRequiredTable(&'static str),
    MissingRequiredColumn {
        table: &'static str,
        column: &'static str,
    },
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Node(err) => write!(f, "{err}"),
            Self::Corruption { id, reason } => write!(f, "corrupt record `{id}`: {reason}"),
            Self::NotFound(id) => write!(f, "record not found: {id}"),
            Self::NotStorable(id) => write!(f, "node `{id}` is not marked for storage"),
            Self::NoRoots => write!(f, "no persisted roots registered"),
            Self::Encode { id, reason } => write!(f, "failed to encode record `{id}`: {reason}"),
            Self::Cancelled => write!(f, "store closed before the operation completed"),
            Self::Poisoned => write!(f, "store backend lock poisoned"),
            Self::Task(reason) => write!(f, "store task failed: {reason}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "node store requires schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => {
                write!(f, "node store requires table `{table}`")
            }
            Self::MissingRequiredColumn { table, column } => write!(
                f,
                "node store requires column `{column}` in table `{table}`"
            ),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Node(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<NodeError> for StoreError {
    fn from(value: NodeError) -> Self {
        Self::Node(value)
    }
}

/// Result of one applied write batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub seq: i64,
    pub written: usize,
    pub deleted: usize,
    pub stale: usize,
}

/// Result of one garbage collection pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcReport {
    pub scanned: usize,
    pub reachable: usize,
    pub deleted: Vec<String>,
}

/// Persists node subtrees into a `StoreBackend`.
pub struct Store<B: StoreBackend> {
    backend: Arc<Mutex<B>>,
    closed: Arc<AtomicBool>,
    next_seq: i64,
    roots: BTreeMap<NodeId, String>,
}

impl<B: StoreBackend> Store<B> {
    /// Wraps `backend`, continuing its write sequence.
    pub fn new(backend: B) -> StoreResult<Self> {
        let last_seq = backend.max_write_seq()?;
        info!(
            "event=store_open module=store status=ok last_seq={}",
            last_seq
        );
        Ok(Self {
            backend: Arc::new(Mutex::new(backend)),
            closed: Arc::new(AtomicBool::new(false)),
            next_seq: last_seq + 1,
            roots: BTreeMap::new(),
        })
    }

    /// Tears the store down; outstanding jobs and loads become `Cancelled`.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!("event=store_close module=store status=ok");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Runs `f` against the backend on the calling thread.
    pub fn with_backend<R>(&self, f: impl FnOnce(&mut B) -> R) -> StoreResult<R> {
        let mut guard = lock_backend(&self.backend)?;
        Ok(f(&mut guard))
    }

    /// Registers `node` as a persisted root, keyed by its current persist id.
    pub fn register_root(&mut self, graph: &NodeGraph, node: NodeId) -> GraphResult<()> {
        let persist_id = graph.persist_id(node)?.to_string();
        self.roots.insert(node, persist_id);
        Ok(())
    }

    pub fn unregister_root(&mut self, node: NodeId) -> bool {
        self.roots.remove(&node).is_some()
    }

    /// Persist ids of the registered roots.
    pub fn root_ids(&self) -> Vec<String> {
        self.roots.values().cloned().collect()
    }

    /// Whether `node` would be written by the next flush if dirty.
    ///
    /// The node must be `should_store`, and every owner up to a registered
    /// root must store both itself and its subnodes.
    pub fn is_storable(&self, graph: &NodeGraph, node: NodeId) -> bool {
        if !graph.flags(node).is_ok_and(|flags| flags.should_store) {
            return false;
        }
        let mut cursor = node;
        loop {
            if self.roots.contains_key(&cursor) {
                return true;
            }
            let Ok(Some(owner)) = graph.parent_node(cursor) else {
                return false;
            };
            let stores_subnodes = graph
                .flags(owner)
                .is_ok_and(|flags| flags.should_store && flags.should_store_subnodes);
            if !stores_subnodes {
                return false;
            }
            cursor = owner;
        }
    }

    /// Serializes one node: stored slots and, when enabled, stored subnodes.
    pub fn snapshot(&self, graph: &NodeGraph, node: NodeId) -> StoreResult<NodeRecord> {
        let table = graph.slot_table(node)?;
        let mut slot_values = BTreeMap::new();
        for slot in table.stored_slots() {
            slot_values.insert(slot.name().to_string(), graph.slot(node, slot.name())?.clone());
        }

        let flags = graph.flags(node)?;
        let subnode_ids = if flags.should_store_subnodes {
            let mut ids = Vec::new();
            for child in graph.subnodes(node)? {
                if graph.flags(*child)?.should_store {
                    ids.push(graph.persist_id(*child)?.to_string());
                }
            }
            Some(ids)
        } else {
            None
        };

        Ok(NodeRecord {
            id: graph.persist_id(node)?.to_string(),
            class_name: graph.class_name(node)?.to_string(),
            slot_values,
            subnode_ids,
        })
    }

    /// Prepares a write of the whole storable subtree under `node` and
    /// registers `node` as a persisted root.
    ///
    /// # Errors
    /// - `NotStorable` when `node` is not `should_store`.
    /// - `Cancelled` when the store is closed.
    pub fn persist(&mut self, graph: &mut NodeGraph, node: NodeId) -> StoreResult<WriteJob<B>> {
        self.ensure_open()?;
        if !graph.flags(node)?.should_store {
            return Err(StoreError::NotStorable(graph.persist_id(node)?.to_string()));
        }
        self.register_root(graph, node)?;

        let mut writes = Vec::new();
        let mut visited = Vec::new();
        let mut queue = VecDeque::from([node]);
        while let Some(current) = queue.pop_front() {
            let record = self.snapshot(graph, current)?;
            writes.push(PendingWrite {
                id: record.id.clone(),
                payload: record.to_json()?,
            });
            if graph.flags(current)?.should_store_subnodes {
                for child in graph.subnodes(current)? {
                    if graph.flags(*child)?.should_store {
                        queue.push_back(*child);
                    }
                }
            }
            visited.push(current);
        }
        for current in visited {
            graph.clear_dirty(current);
            graph.mark_persisted(current);
        }

        let batch = self.next_batch(writes, Vec::new());
        debug!(
            "event=store_persist module=store status=ok root={} records={} seq={}",
            node,
            batch.writes.len(),
            batch.seq
        );
        Ok(self.job(batch))
    }

    /// Prepares one coalesced batch of every dirty storable node plus the
    /// deletions scheduled by removed subtrees.
    pub fn flush(&mut self, graph: &mut NodeGraph) -> StoreResult<WriteJob<B>> {
        self.ensure_open()?;
        self.refresh_root_ids(graph);

        let dirty = graph.take_dirty();
        let mut writes = Vec::new();
        let mut written_ids = BTreeSet::new();
        for node in dirty {
            if !graph.contains(node) || !self.is_storable(graph, node) {
                continue;
            }
            let record = self.snapshot(graph, node)?;
            written_ids.insert(record.id.clone());
            writes.push(PendingWrite {
                id: record.id.clone(),
                payload: record.to_json()?,
            });
            graph.mark_persisted(node);
        }
        let deletes: Vec<String> = graph
            .take_pending_deletes()
            .into_iter()
            .filter(|id| !written_ids.contains(id))
            .collect();

        let batch = self.next_batch(writes, deletes);
        debug!(
            "event=store_flush module=store status=ok writes={} deletes={} seq={}",
            batch.writes.len(),
            batch.deletes.len(),
            batch.seq
        );
        Ok(self.job(batch))
    }

    /// Deletes every record unreachable from the registered roots and
    /// `extra_roots`.
    ///
    /// Write jobs prepared before the sweep should be run first: their
    /// sequence is older and the sweep's tombstones would win.
    ///
    /// # Errors
    /// - `NoRoots` when there is nothing to trace from.
    /// - `Corruption` when a reachable record is unreadable, since its
    ///   subnodes cannot be traced.
    pub async fn collect_garbage(&mut self, extra_roots: &[&str]) -> StoreResult<GcReport> {
        self.ensure_open()?;
        let mut roots: BTreeSet<String> = self.roots.values().cloned().collect();
        roots.extend(extra_roots.iter().map(|id| id.to_string()));
        if roots.is_empty() {
            return Err(StoreError::NoRoots);
        }

        let seq = self.allocate_seq();
        let backend = Arc::clone(&self.backend);
        let closed = Arc::clone(&self.closed);
        let report = tokio::task::spawn_blocking(move || -> StoreResult<GcReport> {
            let mut guard = lock_backend(&backend)?;
            let ids = guard.ids()?;
            let mut reachable = BTreeSet::new();
            let mut queue: VecDeque<String> = roots.into_iter().collect();
            while let Some(id) = queue.pop_front() {
                if closed.load(Ordering::SeqCst) {
                    return Err(StoreError::Cancelled);
                }
                if !reachable.insert(id.clone()) {
                    continue;
                }
                let Some(payload) = guard.load(&id)? else {
                    continue;
                };
                let record = NodeRecord::decode(&id, &payload)?;
                queue.extend(record.subnodes().iter().cloned());
            }

            let deleted: Vec<String> = ids
                .iter()
                .filter(|id| !reachable.contains(*id))
                .cloned()
                .collect();
            if !deleted.is_empty() {
                let batch = WriteBatch {
                    seq,
                    writes: Vec::new(),
                    deletes: deleted.clone(),
                };
                guard.apply(&batch)?;
            }
            Ok(GcReport {
                scanned: ids.len(),
                reachable: ids.len() - deleted.len(),
                deleted,
            })
        })
        .await
        .map_err(|err| StoreError::Task(err.to_string()))??;

        info!(
            "event=store_gc module=store status=ok scanned={} deleted={}",
            report.scanned,
            report.deleted.len()
        );
        Ok(report)
    }

    pub(crate) fn ensure_open(&self) -> StoreResult<()> {
        if self.is_closed() {
            return Err(StoreError::Cancelled);
        }
        Ok(())
    }

    fn refresh_root_ids(&mut self, graph: &NodeGraph) {
        self.roots.retain(|node, persist_id| match graph.persist_id(*node) {
            Ok(current) => {
                if current != persist_id {
                    *persist_id = current.to_string();
                }
                true
            }
            Err(_) => {
                warn!(
                    "event=store_root_dropped module=store node={} id={}",
                    node, persist_id
                );
                false
            }
        });
    }

    fn allocate_seq(&mut self) -> i64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn next_batch(&mut self, writes: Vec<PendingWrite>, deletes: Vec<String>) -> WriteBatch {
        WriteBatch {
            seq: self.allocate_seq(),
            writes,
            deletes,
        }
    }

    fn job(&self, batch: WriteBatch) -> WriteJob<B> {
        WriteJob {
            backend: Arc::clone(&self.backend),
            closed: Arc::clone(&self.closed),
            batch,
        }
    }
}

impl<B: StoreBackend> Drop for Store<B> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Pending write batch; nothing reaches the backend until `run` is awaited.
#[must_use = "write jobs do nothing until `run` is awaited"]
pub struct WriteJob<B: StoreBackend> {
    backend: Arc<Mutex<B>>,
    closed: Arc<AtomicBool>,
    batch: WriteBatch,
}

impl<B: StoreBackend> WriteJob<B> {
    pub fn batch(&self) -> &WriteBatch {
        &self.batch
    }

    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    /// Applies the batch on a blocking worker.
    ///
    /// # Errors
    /// - `Cancelled` when the store closed before the batch was applied.
    pub async fn run(self) -> StoreResult<FlushReport> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Cancelled);
        }
        let seq = self.batch.seq;
        if self.batch.is_empty() {
            return Ok(FlushReport {
                seq,
                ..FlushReport::default()
            });
        }

        let Self {
            backend,
            closed,
            batch,
        } = self;
        let outcome = tokio::task::spawn_blocking(move || {
            if closed.load(Ordering::SeqCst) {
                return Err(StoreError::Cancelled);
            }
            lock_backend(&backend)?.apply(&batch)
        })
        .await
        .map_err(|err| StoreError::Task(err.to_string()))??;

        if outcome.stale > 0 {
            warn!(
                "event=store_write module=store status=stale seq={} stale={}",
                seq, outcome.stale
            );
        }
        Ok(FlushReport {
            seq,
            written: outcome.written,
            deleted: outcome.deleted,
            stale: outcome.stale,
        })
    }
}

pub(crate) fn lock_backend<B>(backend: &Mutex<B>) -> StoreResult<MutexGuard<'_, B>> {
    backend.lock().map_err(|_| StoreError::Poisoned)
}
