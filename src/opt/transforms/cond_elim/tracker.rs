//! Change tracking over a scoped window of graph mutations.

use crate::ir::{Graph, INodeEventListener, NodeEvent, NodeEventMask, NodeEventScope, NodeID};
use std::{cell::RefCell, collections::HashSet, rc::Rc};

/// Accumulates the nodes touched by graph mutations while subscribed.
///
/// Events whose kind was [`exclude`](Self::exclude)d are dropped. The set is
/// never cleared implicitly: it survives the end of the scope so the owner
/// can inspect it, and it is emptied only by [`clear`](Self::clear).
#[derive(Debug, Clone, Default)]
pub struct NodeChangeTracker {
    nodes: HashSet<NodeID>,
    excluded: NodeEventMask,
}

impl NodeChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exclude(mut self, event: NodeEvent) -> Self {
        self.excluded |= event.mask();
        self
    }
    pub fn is_excluded(&self, event: NodeEvent) -> bool {
        self.excluded.contains(event.mask())
    }

    pub fn into_shared(self) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(self))
    }

    /// Subscribes `this` to `graph` until the returned scope is dropped.
    pub fn open_scope<'g>(this: &Rc<RefCell<Self>>, graph: &'g mut Graph) -> NodeEventScope<'g> {
        graph.track_node_events(this.clone())
    }

    pub fn affected(&self) -> &HashSet<NodeID> {
        &self.nodes
    }
    pub fn affected_mut(&mut self) -> &mut HashSet<NodeID> {
        &mut self.nodes
    }
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
    pub fn len(&self) -> usize {
        self.nodes.len()
    }
    pub fn clear(&mut self) {
        self.nodes.clear();
    }
}

impl INodeEventListener for NodeChangeTracker {
    fn on_node_event(&mut self, event: NodeEvent, node: NodeID) {
        if !self.is_excluded(event) {
            self.nodes.insert(node);
        }
    }
}
