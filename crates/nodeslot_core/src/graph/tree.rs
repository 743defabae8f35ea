//! Owner/subnode relationships.
//!
//! # Invariants
//! - A node appears in at most one subnode list, and its owner link names
//!   that list's node.
//! - A node is never its own ancestor.
//! - Failed mutations leave both the parent and the child unchanged.

use crate::graph::{GraphResult, NodeError, NodeGraph, NodeId};
use crate::lifecycle::Phase;
use crate::model::value::SlotValue;
use crate::notify::DID_CHANGE_SUBNODE_LIST;
use log::debug;

impl NodeGraph {
    /// Ordered subnodes of `id`.
    pub fn subnodes(&self, id: NodeId) -> GraphResult<&[NodeId]> {
        Ok(&self.node(id)?.subnodes)
    }

    /// Owner of `id`, if attached.
    pub fn parent_node(&self, id: NodeId) -> GraphResult<Option<NodeId>> {
        Ok(self.node(id)?.owner)
    }

    /// Owners of `id`, nearest first.
    pub fn owner_chain(&self, id: NodeId) -> GraphResult<Vec<NodeId>> {
        let mut chain = Vec::new();
        let mut cursor = self.node(id)?.owner;
        while let Some(owner) = cursor {
            chain.push(owner);
            cursor = self.node(owner)?.owner;
        }
        Ok(chain)
    }

    pub fn root_of(&self, id: NodeId) -> GraphResult<NodeId> {
        Ok(self.owner_chain(id)?.last().copied().unwrap_or(id))
    }

    /// Every node below `id`, depth-first in subnode order.
    pub fn descendants(&self, id: NodeId) -> GraphResult<Vec<NodeId>> {
        self.node(id)?;
        let mut subtree = self.collect_subtree(id);
        subtree.remove(0);
        Ok(subtree)
    }

    /// Nearest owner (excluding `id` itself) whose class is `class_name` or
    /// a subclass of it.
    pub fn first_owner_chain_node_of_class(
        &self,
        id: NodeId,
        class_name: &str,
    ) -> GraphResult<Option<NodeId>> {
        for owner in self.owner_chain(id)? {
            if self.is_kind_of(owner, class_name)? {
                return Ok(Some(owner));
            }
        }
        Ok(None)
    }

    /// Limits subnodes to instances of the given classes (or subclasses).
    ///
    /// An empty list accepts any class unless a subnode prototype is set.
    pub fn set_subnode_classes<I, S>(&mut self, id: NodeId, classes: I) -> GraphResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let classes: Vec<String> = classes.into_iter().map(Into::into).collect();
        for class in &classes {
            if !self.registry().contains(class) {
                return Err(NodeError::UnknownClass(class.clone()));
            }
        }
        self.node_mut(id)?.subnode_classes = classes;
        Ok(())
    }

    pub fn subnode_classes(&self, id: NodeId) -> GraphResult<&[String]> {
        Ok(&self.node(id)?.subnode_classes)
    }

    /// Sets the class instantiated by `add_new_subnode`.
    pub fn set_subnode_proto(&mut self, id: NodeId, class_name: &str) -> GraphResult<()> {
        if !self.registry().contains(class_name) {
            return Err(NodeError::UnknownClass(class_name.to_string()));
        }
        self.node_mut(id)?.subnode_proto = Some(class_name.to_string());
        Ok(())
    }

    pub fn subnode_proto(&self, id: NodeId) -> GraphResult<Option<&str>> {
        Ok(self.node(id)?.subnode_proto.as_deref())
    }

    /// Whether `parent`'s constraints accept a subnode of `class_name`.
    pub fn accepts_subnode_class(&self, parent: NodeId, class_name: &str) -> GraphResult<bool> {
        let node = self.node(parent)?;
        if node.subnode_classes.is_empty() {
            return Ok(node
                .subnode_proto
                .as_deref()
                .map_or(true, |proto| self.registry().is_kind_of(class_name, proto)));
        }
        Ok(node
            .subnode_classes
            .iter()
            .any(|allowed| self.registry().is_kind_of(class_name, allowed)))
    }

    /// Appends `child` to `parent`'s subnodes.
    pub fn add_subnode(&mut self, parent: NodeId, child: NodeId) -> GraphResult<()> {
        let index = self.node(parent)?.subnodes.len();
        self.add_subnode_at(parent, child, index)
    }

    /// Inserts `child` at `index` (clamped) in `parent`'s subnodes.
    ///
    /// Re-adding a child to its current owner is a no-op. The parent may still
    /// be under construction, so Init callbacks can build subnodes.
    ///
    /// # Errors
    /// - `NodeNotReady` when the child has not finished construction.
    /// - `AlreadyOwned` when the child belongs to another node.
    /// - `InvalidSubnodeType` when the parent's constraints reject the child.
    /// - `CycleDetected` when the child is the parent or one of its owners.
    pub fn add_subnode_at(
        &mut self,
        parent: NodeId,
        child: NodeId,
        index: usize,
    ) -> GraphResult<()> {
        if parent == child {
            return Err(NodeError::CycleDetected {
                node: child,
                parent,
            });
        }
        self.node(parent)?;
        let child_node = self.node(child)?;
        if child_node.phase != Phase::Ready {
            return Err(NodeError::NodeNotReady(child));
        }
        match child_node.owner {
            Some(owner) if owner == parent => return Ok(()),
            Some(owner) => return Err(NodeError::AlreadyOwned { node: child, owner }),
            None => {}
        }
        let child_class = child_node.class_name.clone();
        if !self.accepts_subnode_class(parent, &child_class)? {
            return Err(NodeError::InvalidSubnodeType {
                parent,
                class: child_class,
            });
        }
        if self.owner_chain(parent)?.contains(&child) {
            return Err(NodeError::CycleDetected {
                node: child,
                parent,
            });
        }

        let parent_node = self.node_mut(parent)?;
        let index = index.min(parent_node.subnodes.len());
        parent_node.subnodes.insert(index, child);
        self.node_mut(child)?.owner = Some(parent);

        for node in self.collect_subtree(child) {
            self.mark_dirty(node);
        }
        self.mark_dirty(parent);
        debug!(
            "event=subnode_add module=graph status=ok parent={} child={} index={}",
            parent, child, index
        );
        self.post_subnode_change(parent);
        Ok(())
    }

    /// Detaches `child` from `parent`; the subtree stays alive and detached.
    ///
    /// Persisted nodes of the subtree are scheduled for store deletion.
    pub fn remove_subnode(&mut self, parent: NodeId, child: NodeId) -> GraphResult<()> {
        let position = self
            .node(parent)?
            .subnodes
            .iter()
            .position(|node| *node == child)
            .ok_or(NodeError::NotASubnode {
                parent,
                node: child,
            })?;
        self.node_mut(parent)?.subnodes.remove(position);
        self.node_mut(child)?.owner = None;

        let subtree = self.collect_subtree(child);
        self.unpersist(&subtree);
        self.mark_dirty(parent);
        debug!(
            "event=subnode_remove module=graph status=ok parent={} child={}",
            parent, child
        );
        self.post_subnode_change(parent);
        Ok(())
    }

    /// Moves an existing subnode to `index` (clamped).
    pub fn move_subnode(&mut self, parent: NodeId, child: NodeId, index: usize) -> GraphResult<()> {
        let node = self.node(parent)?;
        if !node.flags.can_reorder_subnodes {
            return Err(NodeError::ReorderNotPermitted(parent));
        }
        let position = node
            .subnodes
            .iter()
            .position(|candidate| *candidate == child)
            .ok_or(NodeError::NotASubnode {
                parent,
                node: child,
            })?;

        let subnodes = &mut self.node_mut(parent)?.subnodes;
        let moved = subnodes.remove(position);
        let index = index.min(subnodes.len());
        subnodes.insert(index, moved);
        if position == index {
            return Ok(());
        }
        self.mark_dirty(parent);
        self.post_subnode_change(parent);
        Ok(())
    }

    /// Removes `child` and destroys its subtree.
    pub fn delete_subnode(&mut self, parent: NodeId, child: NodeId) -> GraphResult<()> {
        if !self.node(parent)?.flags.can_delete {
            return Err(NodeError::DeleteNotPermitted(parent));
        }
        self.remove_subnode(parent, child)?;
        self.destroy_node(child)
    }

    /// Destroys a node and everything below it.
    ///
    /// An attached node is detached from its owner first.
    pub fn destroy_node(&mut self, id: NodeId) -> GraphResult<()> {
        if let Some(owner) = self.node(id)?.owner {
            self.remove_subnode(owner, id)?;
        }
        for node in self.collect_subtree(id) {
            if let Some(persist_id) = self.persisted_id(node) {
                self.schedule_delete(persist_id);
            }
        }
        self.discard(id);
        debug!("event=node_destroy module=graph status=ok node={}", id);
        Ok(())
    }

    /// Constructs a node of `class_name` and appends it to `parent`.
    ///
    /// The new node is discarded when it cannot be attached.
    pub fn create_subnode(&mut self, parent: NodeId, class_name: &str) -> GraphResult<NodeId> {
        self.node(parent)?;
        let child = self.create_node(class_name)?;
        if let Err(err) = self.add_subnode(parent, child) {
            self.discard(child);
            return Err(err);
        }
        Ok(child)
    }

    /// Constructs an instance of the parent's subnode prototype and appends it.
    pub fn add_new_subnode(&mut self, parent: NodeId) -> GraphResult<NodeId> {
        let node = self.node(parent)?;
        if !node.flags.can_add {
            return Err(NodeError::AddNotPermitted(parent));
        }
        let proto = node
            .subnode_proto
            .clone()
            .ok_or(NodeError::NoSubnodeProto(parent))?;
        self.create_subnode(parent, &proto)
    }

    /// `id` followed by its descendants, depth-first. Stale ids yield nothing.
    pub(crate) fn collect_subtree(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Ok(node) = self.node(current) else {
                continue;
            };
            out.push(current);
            stack.extend(node.subnodes.iter().rev().copied());
        }
        out
    }

    /// Clears pending writes of `nodes` and schedules the deletion of those
    /// already persisted.
    pub(super) fn unpersist(&mut self, nodes: &[NodeId]) {
        for node in nodes {
            self.clear_dirty(*node);
            if let Some(persist_id) = self.persisted_id(*node) {
                if let Ok(entry) = self.node_mut(*node) {
                    entry.is_persisted = false;
                }
                self.schedule_delete(persist_id);
            }
        }
    }

    fn persisted_id(&self, id: NodeId) -> Option<String> {
        self.node(id)
            .ok()
            .filter(|node| node.is_persisted)
            .map(|node| node.persist_id.clone())
    }

    fn post_subnode_change(&self, parent: NodeId) {
        let count = self
            .node(parent)
            .map(|node| node.subnodes.len())
            .unwrap_or_default();
        self.bus().post(
            parent,
            DID_CHANGE_SUBNODE_LIST,
            Some(SlotValue::Int(i64::try_from(count).unwrap_or(i64::MAX))),
        );
    }
}

#[cfg(test)]
mod tests {
    use crate::class::{ClassDef, ClassRegistry};
    use crate::graph::{NodeError, NodeGraph};

    fn graph() -> NodeGraph {
        let mut registry = ClassRegistry::new();
        registry.register(ClassDef::new("Folder")).expect("folder");
        registry.register(ClassDef::new("Item")).expect("item");
        NodeGraph::new(registry)
    }

    #[test]
    fn add_sets_owner_and_order() {
        let mut graph = graph();
        let folder = graph.create_node("Folder").expect("folder");
        let a = graph.create_node("Item").expect("a");
        let b = graph.create_node("Item").expect("b");
        graph.add_subnode(folder, a).expect("add a");
        graph.add_subnode_at(folder, b, 0).expect("add b");

        assert_eq!(graph.subnodes(folder).expect("subnodes"), &[b, a]);
        assert_eq!(graph.parent_node(a).expect("owner"), Some(folder));
        assert_eq!(graph.root_of(a).expect("root"), folder);
    }

    #[test]
    fn readd_to_same_owner_is_noop() {
        let mut graph = graph();
        let folder = graph.create_node("Folder").expect("folder");
        let item = graph.create_node("Item").expect("item");
        graph.add_subnode(folder, item).expect("add");
        graph.add_subnode(folder, item).expect("re-add");
        assert_eq!(graph.subnodes(folder).expect("subnodes").len(), 1);
    }

    #[test]
    fn self_add_is_a_cycle() {
        let mut graph = graph();
        let folder = graph.create_node("Folder").expect("folder");
        let err = graph.add_subnode(folder, folder).expect_err("cycle");
        assert!(matches!(err, NodeError::CycleDetected { .. }));
    }

    #[test]
    fn descendants_are_depth_first() {
        let mut graph = graph();
        let root = graph.create_node("Folder").expect("root");
        let mid = graph.create_subnode(root, "Folder").expect("mid");
        let leaf = graph.create_subnode(mid, "Item").expect("leaf");
        let tail = graph.create_subnode(root, "Item").expect("tail");
        assert_eq!(
            graph.descendants(root).expect("descendants"),
            vec![mid, leaf, tail]
        );
    }
}
