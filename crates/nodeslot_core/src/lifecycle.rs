//! Lifecycle controller for node construction.
//!
//! # Responsibility
//! - Drive PrototypeInit, Init, FinalInit and DidInit in order, each phase
//!   completing for the whole class chain (base first) before the next.
//! - Discard nodes whose construction fails.
//!
//! # Invariants
//! - Phases only move forward; `Ready` is terminal.
//! - A node that failed construction is removed from the arena together with
//!   any subtree it built, so it never becomes reachable from a parent.

use crate::class::ClassError;
use crate::graph::{GraphResult, NodeError, NodeGraph, NodeId};
use crate::model::value::SlotValue;
use log::{trace, warn};
use std::fmt::{Display, Formatter};

/// Construction phase of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    /// Class-level slot declaration, memoized per class.
    PrototypeInit,
    /// Per-instance initial state.
    Init,
    /// Per-instance state that needs the whole chain initialized.
    FinalInit,
    /// Cross-node wiring once the instance is complete.
    DidInit,
    /// Construction finished.
    Ready,
}

impl Phase {
    pub fn name(self) -> &'static str {
        match self {
            Self::PrototypeInit => "prototype_init",
            Self::Init => "init",
            Self::FinalInit => "final_init",
            Self::DidInit => "did_init",
            Self::Ready => "ready",
        }
    }
}

impl Display for Phase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

const INSTANCE_PHASES: [Phase; 3] = [Phase::Init, Phase::FinalInit, Phase::DidInit];

/// Access handed to Init, FinalInit and DidInit callbacks.
pub struct InitContext<'g> {
    graph: &'g mut NodeGraph,
    node: NodeId,
    class_name: String,
    phase: Phase,
}

impl<'g> InitContext<'g> {
    /// Node under construction.
    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Class whose callback is running (may be an ancestor of the node's class).
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn graph(&mut self) -> &mut NodeGraph {
        &mut *self.graph
    }

    pub fn slot(&self, name: &str) -> GraphResult<&SlotValue> {
        self.graph.slot(self.node, name)
    }

    pub fn set_slot(&mut self, name: &str, value: impl Into<SlotValue>) -> GraphResult<()> {
        self.graph.set_slot(self.node, name, value)
    }
}

/// Builds one node of `class_name` and runs it to `Ready`.
///
/// # Errors
/// - `UnknownClass` when the class is not registered.
/// - `InitializationFailure` when slot preparation or any phase callback fails.
pub(crate) fn construct(graph: &mut NodeGraph, class_name: &str) -> GraphResult<NodeId> {
    let registry = graph.registry_handle();
    let table = registry
        .slot_table(class_name)
        .map_err(|err| prototype_failure(class_name, err))?;

    let mut plan = Vec::with_capacity(INSTANCE_PHASES.len());
    for phase in INSTANCE_PHASES {
        let callbacks = registry
            .phase_callbacks(class_name, phase)
            .map_err(|err| prototype_failure(class_name, err))?;
        plan.push((phase, callbacks));
    }

    let node = graph.allocate(class_name, table);
    for (phase, callbacks) in plan {
        if let Err(err) = graph.advance_phase(node, phase) {
            graph.discard(node);
            return Err(err);
        }
        for (declaring_class, callback) in callbacks {
            trace!(
                "event=lifecycle_phase module=lifecycle class={} declaring_class={} phase={}",
                class_name,
                declaring_class,
                phase
            );
            let mut ctx = InitContext {
                graph: &mut *graph,
                node,
                class_name: declaring_class,
                phase,
            };
            if let Err(err) = callback(&mut ctx) {
                warn!(
                    "event=lifecycle_failed module=lifecycle status=error class={} phase={} error={}",
                    class_name, phase, err
                );
                graph.discard(node);
                return Err(NodeError::InitializationFailure {
                    class: class_name.to_string(),
                    phase,
                    reason: err.to_string(),
                });
            }
        }
    }

    if let Err(err) = graph.advance_phase(node, Phase::Ready) {
        graph.discard(node);
        return Err(err);
    }
    Ok(node)
}

/// Re-runs the DidInit chain of a node that is already `Ready`.
///
/// Used after restored slot values overwrite the defaults, so state derived
/// in DidInit reflects the persisted data.
pub(crate) fn rerun_did_init(graph: &mut NodeGraph, node: NodeId) -> GraphResult<()> {
    let class_name = graph.class_name(node)?.to_string();
    let callbacks = graph
        .registry()
        .phase_callbacks(&class_name, Phase::DidInit)
        .map_err(|err| prototype_failure(&class_name, err))?;

    for (declaring_class, callback) in callbacks {
        let mut ctx = InitContext {
            graph: &mut *graph,
            node,
            class_name: declaring_class,
            phase: Phase::DidInit,
        };
        callback(&mut ctx).map_err(|err| NodeError::InitializationFailure {
            class: class_name.clone(),
            phase: Phase::DidInit,
            reason: err.to_string(),
        })?;
    }
    Ok(())
}

fn prototype_failure(class_name: &str, err: ClassError) -> NodeError {
    match err {
        ClassError::UnknownClass(name) => NodeError::UnknownClass(name),
        other => NodeError::InitializationFailure {
            class: class_name.to_string(),
            phase: Phase::PrototypeInit,
            reason: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::Phase;

    #[test]
    fn phases_are_ordered() {
        assert!(Phase::PrototypeInit < Phase::Init);
        assert!(Phase::Init < Phase::FinalInit);
        assert!(Phase::FinalInit < Phase::DidInit);
        assert!(Phase::DidInit < Phase::Ready);
        assert_eq!(Phase::FinalInit.to_string(), "final_init");
    }
}
