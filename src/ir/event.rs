//! Graph mutation events and scoped event subscription.

use crate::ir::{Graph, NodeID};
use bitflags::bitflags;
use std::{
    cell::RefCell,
    ops::{Deref, DerefMut},
    rc::Rc,
};

/// Kind of mutation a [`Graph`] reports to its listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum NodeEvent {
    /// A node was added to the graph.
    Added,
    /// A node's inputs or its operation changed.
    InputChanged,
    /// A node lost its last user.
    ZeroUsages,
    /// A node was removed from the graph.
    Removed,
}

bitflags! {
    /// A set of [`NodeEvent`] kinds.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct NodeEventMask: u8 {
        const ADDED         = 0b0001;
        const INPUT_CHANGED = 0b0010;
        const ZERO_USAGES   = 0b0100;
        const REMOVED       = 0b1000;
    }
}

impl NodeEvent {
    pub fn mask(self) -> NodeEventMask {
        match self {
            NodeEvent::Added => NodeEventMask::ADDED,
            NodeEvent::InputChanged => NodeEventMask::INPUT_CHANGED,
            NodeEvent::ZeroUsages => NodeEventMask::ZERO_USAGES,
            NodeEvent::Removed => NodeEventMask::REMOVED,
        }
    }
}

impl From<NodeEvent> for NodeEventMask {
    fn from(event: NodeEvent) -> Self {
        event.mask()
    }
}

/// Receives the mutation events of a graph while subscribed through a
/// [`NodeEventScope`]. Listeners only observe: they have no access to the
/// graph that emits the event.
pub trait INodeEventListener {
    fn on_node_event(&mut self, event: NodeEvent, node: NodeID);
}

pub type NodeEventListenerRef = Rc<RefCell<dyn INodeEventListener>>;

/// RAII subscription of one listener to a graph.
///
/// 作用域存在期间, 图的所有修改都要经过这个作用域 (它独占 `&mut Graph`),
/// 因此没有外部修改能绕开监听器. 作用域析构时监听器被摘下; 提前返回或者
/// `?` 传播错误时也一样.
///
/// Scopes nest: opening a scope on the graph borrowed from another scope
/// pushes a second listener, and both see every event until the inner scope
/// is closed.
pub struct NodeEventScope<'g> {
    graph: &'g mut Graph,
    depth: usize,
}

impl<'g> NodeEventScope<'g> {
    pub(crate) fn new(graph: &'g mut Graph, listener: NodeEventListenerRef) -> Self {
        graph.listeners.push(listener);
        let depth = graph.listeners.len();
        Self { graph, depth }
    }

    /// Stops event delivery. Equivalent to dropping the scope.
    pub fn close(self) {}

    pub fn graph(&mut self) -> &mut Graph {
        &mut *self.graph
    }
}

impl Drop for NodeEventScope<'_> {
    fn drop(&mut self) {
        debug_assert_eq!(
            self.graph.listeners.len(),
            self.depth,
            "NodeEventScope: scopes closed out of order"
        );
        self.graph.listeners.truncate(self.depth - 1);
    }
}

impl Deref for NodeEventScope<'_> {
    type Target = Graph;

    fn deref(&self) -> &Graph {
        &*self.graph
    }
}
impl DerefMut for NodeEventScope<'_> {
    fn deref_mut(&mut self) -> &mut Graph {
        &mut *self.graph
    }
}
