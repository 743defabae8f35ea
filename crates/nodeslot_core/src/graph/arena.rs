//! Index allocation for graph nodes.
//!
//! Freed indices are reused; each reuse bumps the slot generation so old
//! `NodeId`s stop resolving.

use crate::graph::node::{Node, NodeId};

struct ArenaEntry {
    generation: u32,
    node: Option<Node>,
}

#[derive(Default)]
pub(crate) struct NodeArena {
    entries: Vec<ArenaEntry>,
    free: Vec<u32>,
    live: usize,
}

impl NodeArena {
    pub(crate) fn insert(&mut self, node: Node) -> NodeId {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let entry = &mut self.entries[index as usize];
            entry.generation = entry.generation.wrapping_add(1);
            entry.node = Some(node);
            return NodeId::new(index, entry.generation);
        }

        let index = u32::try_from(self.entries.len()).unwrap_or(u32::MAX);
        self.entries.push(ArenaEntry {
            generation: 0,
            node: Some(node),
        });
        NodeId::new(index, 0)
    }

    pub(crate) fn get(&self, id: NodeId) -> Option<&Node> {
        self.entries
            .get(id.index() as usize)
            .filter(|entry| entry.generation == id.generation())
            .and_then(|entry| entry.node.as_ref())
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        let entry = self.entries.get_mut(id.index() as usize)?;
        if entry.generation != id.generation() {
            return None;
        }
        entry.node.as_mut()
    }

    pub(crate) fn remove(&mut self, id: NodeId) -> Option<Node> {
        let entry = self.entries.get_mut(id.index() as usize)?;
        if entry.generation != id.generation() {
            return None;
        }
        let node = entry.node.take()?;
        self.free.push(id.index());
        self.live -= 1;
        Some(node)
    }

    pub(crate) fn len(&self) -> usize {
        self.live
    }

    pub(crate) fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.node.is_some())
            .map(|(index, entry)| NodeId::new(index as u32, entry.generation))
    }
}
