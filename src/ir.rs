//! ## Remusys node graph
//!
//! The sea-of-nodes graph the optimization phases work on, together with its
//! mutation events.

mod cmp_cond;
mod event;
mod graph;
mod node;
mod opcode;
mod writer;

pub use self::{
    cmp_cond::CmpCond,
    event::{INodeEventListener, NodeEvent, NodeEventListenerRef, NodeEventMask, NodeEventScope},
    graph::{Graph, GraphErr, GraphRes},
    node::{NodeFlags, NodeID, NodeInputs, NodeObj},
    opcode::Opcode,
    writer::{GraphWriteOption, GraphWriter},
};
