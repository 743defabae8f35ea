//! Restoring persisted subtrees.
//!
//! Restore is split in two: `Store::load` reads every reachable record on a
//! blocking worker, and `Store::materialize` builds the nodes on the graph's
//! thread. Nothing is attached to the live graph until a whole subtree has
//! been built, so an abandoned load leaves the graph untouched.
//!
//! # Invariants
//! - A root failure aborts the restore; a subnode failure only drops that
//!   subnode (and its subtree) and is reported.
//! - Restored nodes keep their persisted identity and are not dirty.

use crate::graph::{NodeFlags, NodeGraph, NodeId};
use crate::lifecycle;
use crate::store::backend::StoreBackend;
use crate::store::record::NodeRecord;
use crate::store::{lock_backend, Store, StoreError, StoreResult};
use log::{info, warn};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Persisted entry that could not be restored.
#[derive(Debug)]
pub struct RestoreFailure {
    pub id: String,
    pub error: StoreError,
}

/// Records read for one restore, not yet turned into nodes.
#[derive(Debug)]
pub struct LoadedTree {
    root_id: String,
    records: BTreeMap<String, NodeRecord>,
    failures: Vec<RestoreFailure>,
}

impl LoadedTree {
    pub fn root_id(&self) -> &str {
        &self.root_id
    }

    pub fn root(&self) -> Option<&NodeRecord> {
        self.records.get(&self.root_id)
    }

    pub fn record(&self, id: &str) -> Option<&NodeRecord> {
        self.records.get(id)
    }

    /// Readable records, keyed by id.
    pub fn records(&self) -> &BTreeMap<String, NodeRecord> {
        &self.records
    }

    /// Entries that were referenced but could not be read.
    pub fn failures(&self) -> &[RestoreFailure] {
        &self.failures
    }
}

/// Result of a successful restore.
#[derive(Debug)]
pub struct RestoreOutcome {
    pub root: NodeId,
    /// Number of nodes attached, root included.
    pub restored: usize,
    pub failures: Vec<RestoreFailure>,
}

impl<B: StoreBackend> Store<B> {
    /// Reads the subtree persisted under `root_id`.
    ///
    /// # Errors
    /// - `NotFound` / `Corruption` when the root itself cannot be read.
    /// - `Cancelled` when the store closes while reading.
    pub async fn load(&self, root_id: &str) -> StoreResult<LoadedTree> {
        self.ensure_open()?;
        let backend = Arc::clone(&self.backend);
        let closed = Arc::clone(&self.closed);
        let root_id = root_id.to_string();
        tokio::task::spawn_blocking(move || read_tree(&backend, &closed, root_id))
            .await
            .map_err(|err| StoreError::Task(err.to_string()))?
    }

    /// Builds the nodes of `tree` in `graph`.
    ///
    /// Each node runs its full lifecycle, then receives its persisted stored
    /// slots, its restored subnodes, and a second DidInit pass.
    ///
    /// # Errors
    /// - `Cancelled` when the store was closed after the load.
    /// - The root's error when the root node cannot be built.
    pub fn materialize(
        &mut self,
        graph: &mut NodeGraph,
        tree: LoadedTree,
    ) -> StoreResult<RestoreOutcome> {
        self.ensure_open()?;
        let LoadedTree {
            root_id,
            records,
            mut failures,
        } = tree;
        let root = build_tree(graph, &records, &root_id, &mut failures)?;

        let subtree = graph.collect_subtree(root);
        for node in &subtree {
            graph.clear_dirty(*node);
            graph.mark_persisted(*node);
        }
        self.register_root(graph, root)?;

        for failure in &failures {
            warn!(
                "event=store_restore_skip module=store status=error id={} error={}",
                failure.id, failure.error
            );
        }
        info!(
            "event=store_restore module=store status=ok root={} restored={} failures={}",
            root_id,
            subtree.len(),
            failures.len()
        );
        Ok(RestoreOutcome {
            root,
            restored: subtree.len(),
            failures,
        })
    }

    /// Loads and materializes the subtree persisted under `root_id`.
    pub async fn restore(
        &mut self,
        graph: &mut NodeGraph,
        root_id: &str,
    ) -> StoreResult<RestoreOutcome> {
        let tree = self.load(root_id).await?;
        self.materialize(graph, tree)
    }
}

fn read_tree<B: StoreBackend>(
    backend: &Mutex<B>,
    closed: &AtomicBool,
    root_id: String,
) -> StoreResult<LoadedTree> {
    let guard = lock_backend(backend)?;
    let payload = guard
        .load(&root_id)?
        .ok_or_else(|| StoreError::NotFound(root_id.clone()))?;
    let root = NodeRecord::decode(&root_id, &payload)?;

    let mut seen = BTreeSet::from([root_id.clone()]);
    let mut queue: VecDeque<String> = root.subnodes().iter().cloned().collect();
    let mut records = BTreeMap::new();
    let mut failures = Vec::new();
    records.insert(root_id.clone(), root);

    while let Some(id) = queue.pop_front() {
        if closed.load(Ordering::SeqCst) {
            return Err(StoreError::Cancelled);
        }
        if !seen.insert(id.clone()) {
            failures.push(RestoreFailure {
                error: StoreError::Corruption {
                    id: id.clone(),
                    reason: "referenced by more than one owner".to_string(),
                },
                id,
            });
            continue;
        }

        let record = guard
            .load(&id)
            .and_then(|payload| payload.ok_or_else(|| StoreError::NotFound(id.clone())))
            .and_then(|payload| NodeRecord::decode(&id, &payload));
        match record {
            Ok(record) => {
                queue.extend(record.subnodes().iter().cloned());
                records.insert(id, record);
            }
            Err(error) => failures.push(RestoreFailure { id, error }),
        }
    }

    Ok(LoadedTree {
        root_id,
        records,
        failures,
    })
}

/// Record being built whose subnodes are still being visited.
struct Pending<'r> {
    node: NodeId,
    record: &'r NodeRecord,
    next_child: usize,
}

/// Builds the root record and its readable subnodes, detached from any owner.
///
/// Each node is attached to its owner once its own subnodes are attached and
/// its DidInit chain re-ran. On error nothing built for the root remains in
/// the graph.
fn build_tree(
    graph: &mut NodeGraph,
    records: &BTreeMap<String, NodeRecord>,
    root_id: &str,
    failures: &mut Vec<RestoreFailure>,
) -> StoreResult<NodeId> {
    let mut built = BTreeSet::from([root_id.to_string()]);
    let root_record = records
        .get(root_id)
        .ok_or_else(|| StoreError::NotFound(root_id.to_string()))?;
    let root = start_node(graph, root_record)?;
    let mut stack = vec![Pending {
        node: root,
        record: root_record,
        next_child: 0,
    }];

    while let Some(top) = stack.last_mut() {
        let current = top.record;
        if let Some(child_id) = current.subnodes().get(top.next_child) {
            top.next_child += 1;
            // Unreadable and duplicate entries were reported while loading.
            let Some(record) = records.get(child_id) else {
                continue;
            };
            if !built.insert(child_id.clone()) {
                continue;
            }
            match start_node(graph, record) {
                Ok(node) => stack.push(Pending {
                    node,
                    record,
                    next_child: 0,
                }),
                Err(error) => failures.push(RestoreFailure {
                    id: child_id.clone(),
                    error,
                }),
            }
            continue;
        }

        let Some(done) = stack.pop() else {
            break;
        };
        let finished = lifecycle::rerun_did_init(graph, done.node);
        let Some(owner) = stack.last() else {
            return match finished {
                Ok(()) => Ok(done.node),
                Err(err) => {
                    graph.discard(done.node);
                    Err(err.into())
                }
            };
        };
        let attached = finished.and_then(|()| graph.add_subnode(owner.node, done.node));
        if let Err(err) = attached {
            graph.discard(done.node);
            failures.push(RestoreFailure {
                id: done.record.id.clone(),
                error: err.into(),
            });
        }
    }
    Ok(root)
}

/// Constructs the node for `record` and applies its persisted state.
fn start_node(graph: &mut NodeGraph, record: &NodeRecord) -> StoreResult<NodeId> {
    let node = graph.create_node(&record.class_name)?;
    if let Err(err) = apply_record(graph, node, record) {
        graph.discard(node);
        return Err(err);
    }
    Ok(node)
}

fn apply_record(graph: &mut NodeGraph, node: NodeId, record: &NodeRecord) -> StoreResult<()> {
    graph.set_persist_id(node, record.id.clone())?;
    let flags = graph.flags(node)?;
    graph.set_flags(
        node,
        NodeFlags {
            should_store: true,
            should_store_subnodes: record.subnode_ids.is_some(),
            ..flags
        },
    )?;

    for (name, value) in &record.slot_values {
        if !graph.restore_slot(node, name, value.clone())? {
            warn!(
                "event=store_restore_slot module=store status=skipped id={} class={} slot={}",
                record.id, record.class_name, name
            );
        }
    }

    // Stored subnodes built during construction are replaced by the
    // persisted list.
    if record.subnode_ids.is_some() {
        for existing in graph.subnodes(node)?.to_vec() {
            if graph.flags(existing)?.should_store {
                graph.discard(existing);
            }
        }
    }
    Ok(())
}
