use crate::ir::{
    NodeEvent, NodeEventListenerRef, NodeEventScope, NodeFlags, NodeID, NodeInputs, NodeObj,
    Opcode,
};
use slab::Slab;
use smallvec::SmallVec;
use smol_str::SmolStr;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphErr {
    #[error("node {0:?} is dead or belongs to another graph")]
    DeadNode(NodeID),
    #[error("node {node:?} has no input #{index}")]
    InputOutOfRange { node: NodeID, index: usize },
    #[error("opcode `{opcode}` expects {expected} inputs, found {found}")]
    InputArity { opcode: Opcode, expected: usize, found: usize },
    #[error("node {0:?} still has {1} users")]
    NodeStillUsed(NodeID, usize),
    #[error("use-def relation of node {0:?} is broken")]
    BrokenUseDef(NodeID),
}
pub type GraphRes<T = ()> = Result<T, GraphErr>;

/// A mutable sea-of-nodes graph for one compilation unit.
///
/// Every mutation goes through the methods below, which keep the use-def
/// relation consistent and report a [`NodeEvent`] to the listeners of all
/// currently open [`NodeEventScope`]s.
pub struct Graph {
    pub name: SmolStr,
    nodes: Slab<NodeObj>,
    /// 每个 slab 槽位被释放的次数, 作为下一个占用该槽位节点的 generation.
    slot_generations: Vec<u32>,
    pub(super) listeners: Vec<NodeEventListenerRef>,
}

impl Graph {
    pub fn new(name: impl Into<SmolStr>) -> Self {
        Self::with_capacity(name, 0)
    }
    pub fn with_capacity(name: impl Into<SmolStr>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            nodes: Slab::with_capacity(capacity),
            slot_generations: Vec::with_capacity(capacity),
            listeners: Vec::new(),
        }
    }

    /// Subscribes `listener` to the events of this graph until the returned
    /// scope is dropped. All further mutations must go through the scope.
    pub fn track_node_events(&mut self, listener: NodeEventListenerRef) -> NodeEventScope<'_> {
        NodeEventScope::new(self, listener)
    }
    pub fn num_listeners(&self) -> usize {
        self.listeners.len()
    }

    pub(crate) fn emit(&self, event: NodeEvent, node: NodeID) {
        if self.listeners.is_empty() {
            return;
        }
        log::trace!("graph `{}`: {event:?} {node:?}", self.name);
        for listener in &self.listeners {
            listener.borrow_mut().on_node_event(event, node);
        }
    }

    pub fn contains(&self, node: NodeID) -> bool {
        self.nodes
            .get(node.get_index())
            .is_some_and(|obj| obj.generation == node.generation)
    }
    pub fn get(&self, node: NodeID) -> GraphRes<&NodeObj> {
        match self.nodes.get(node.get_index()) {
            Some(obj) if obj.generation == node.generation => Ok(obj),
            _ => Err(GraphErr::DeadNode(node)),
        }
    }
    fn get_mut(&mut self, node: NodeID) -> GraphRes<&mut NodeObj> {
        match self.nodes.get_mut(node.get_index()) {
            Some(obj) if obj.generation == node.generation => Ok(obj),
            _ => Err(GraphErr::DeadNode(node)),
        }
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
    pub fn nodes(&self) -> impl Iterator<Item = (NodeID, &NodeObj)> + '_ {
        self.nodes
            .iter()
            .map(|(index, obj)| (NodeID::new(index, obj.generation), obj))
    }
    pub fn node_ids(&self) -> Vec<NodeID> {
        self.nodes().map(|(id, _)| id).collect()
    }
    pub fn users(&self, node: NodeID) -> GraphRes<&[NodeID]> {
        self.get(node).map(NodeObj::users)
    }
    /// Dead nodes are never simplifiable.
    pub fn is_simplifiable(&self, node: NodeID) -> bool {
        self.get(node).is_ok_and(NodeObj::is_simplifiable)
    }

    pub fn add_node(
        &mut self,
        opcode: Opcode,
        inputs: impl IntoIterator<Item = NodeID>,
    ) -> GraphRes<NodeID> {
        self.add_node_with_flags(opcode, inputs, opcode.default_flags())
    }

    pub fn add_node_with_flags(
        &mut self,
        opcode: Opcode,
        inputs: impl IntoIterator<Item = NodeID>,
        flags: NodeFlags,
    ) -> GraphRes<NodeID> {
        let inputs: NodeInputs = inputs.into_iter().collect();
        match opcode.num_inputs() {
            Some(expected) if expected != inputs.len() => {
                return Err(GraphErr::InputArity { opcode, expected, found: inputs.len() });
            }
            _ => {}
        }
        if let Some(&dead) = inputs.iter().find(|&&input| !self.contains(input)) {
            return Err(GraphErr::DeadNode(dead));
        }

        let generation = self
            .slot_generations
            .get(self.nodes.vacant_key())
            .copied()
            .unwrap_or(0);
        let index = self
            .nodes
            .insert(NodeObj::new(opcode, inputs.clone(), flags, generation));
        let id = NodeID::new(index, generation);
        for input in inputs {
            self.nodes[input.get_index()].users.push(id);
        }
        self.emit(NodeEvent::Added, id);
        Ok(id)
    }

    /// Redirects input `index` of `node` to `new_input`.
    pub fn set_input(&mut self, node: NodeID, index: usize, new_input: NodeID) -> GraphRes {
        if !self.contains(new_input) {
            return Err(GraphErr::DeadNode(new_input));
        }
        let obj = self.get_mut(node)?;
        let Some(slot) = obj.inputs.get_mut(index) else {
            return Err(GraphErr::InputOutOfRange { node, index });
        };
        let old_input = std::mem::replace(slot, new_input);
        if old_input == new_input {
            return Ok(());
        }

        let old_obj = &mut self.nodes[old_input.get_index()];
        remove_one_user(&mut old_obj.users, node);
        let old_unused = old_obj.users.is_empty();
        self.nodes[new_input.get_index()].users.push(node);

        self.emit(NodeEvent::InputChanged, node);
        if old_unused {
            self.emit(NodeEvent::ZeroUsages, old_input);
        }
        Ok(())
    }

    /// Changes the operation of `node` in place, keeping its inputs.
    pub fn set_opcode(&mut self, node: NodeID, opcode: Opcode) -> GraphRes {
        let obj = self.get_mut(node)?;
        if obj.opcode == opcode {
            return Ok(());
        }
        match opcode.num_inputs() {
            Some(expected) if expected != obj.inputs.len() => {
                return Err(GraphErr::InputArity { opcode, expected, found: obj.inputs.len() });
            }
            _ => {}
        }
        obj.opcode = opcode;
        self.emit(NodeEvent::InputChanged, node);
        Ok(())
    }

    /// Makes every user of `old` use `new` instead. Returns how many distinct
    /// users were redirected.
    pub fn replace_all_uses(&mut self, old: NodeID, new: NodeID) -> GraphRes<usize> {
        if !self.contains(new) {
            return Err(GraphErr::DeadNode(new));
        }
        let old_users = std::mem::take(&mut self.get_mut(old)?.users);
        if old == new || old_users.is_empty() {
            self.nodes[old.get_index()].users = old_users;
            return Ok(0);
        }

        let mut redirected: SmallVec<[NodeID; 4]> = SmallVec::new();
        for &user in &old_users {
            if redirected.contains(&user) {
                continue;
            }
            redirected.push(user);
            let user_obj = &mut self.nodes[user.get_index()];
            let mut count = 0;
            for input in user_obj.inputs.iter_mut().filter(|input| **input == old) {
                *input = new;
                count += 1;
            }
            let new_users = &mut self.nodes[new.get_index()].users;
            new_users.extend(std::iter::repeat_n(user, count));
        }

        for &user in &redirected {
            self.emit(NodeEvent::InputChanged, user);
        }
        self.emit(NodeEvent::ZeroUsages, old);
        Ok(redirected.len())
    }

    /// Removes a node without users from the graph.
    pub fn remove_node(&mut self, node: NodeID) -> GraphRes {
        let obj = self.get(node)?;
        let num_users = obj.users.iter().filter(|&&user| user != node).count();
        if num_users != 0 {
            return Err(GraphErr::NodeStillUsed(node, num_users));
        }

        let obj = self.nodes.remove(node.get_index());
        let index = node.get_index();
        if self.slot_generations.len() <= index {
            self.slot_generations.resize(index + 1, 0);
        }
        self.slot_generations[index] = obj.generation.wrapping_add(1);
        let mut unused_inputs: SmallVec<[NodeID; 4]> = SmallVec::new();
        for &input in &obj.inputs {
            if input == node {
                continue;
            }
            let users = &mut self.nodes[input.get_index()].users;
            remove_one_user(users, node);
            if users.is_empty() && !unused_inputs.contains(&input) {
                unused_inputs.push(input);
            }
        }

        self.emit(NodeEvent::Removed, node);
        for input in unused_inputs {
            self.emit(NodeEvent::ZeroUsages, input);
        }
        Ok(())
    }

    /// Checks that every input edge has a matching user entry and vice versa.
    pub fn verify(&self) -> GraphRes {
        for (id, obj) in self.nodes() {
            for &input in &obj.inputs {
                let input_obj = self.get(input).map_err(|_| GraphErr::BrokenUseDef(id))?;
                let uses = obj.inputs.iter().filter(|&&i| i == input).count();
                let users = input_obj.users.iter().filter(|&&u| u == id).count();
                if uses != users {
                    return Err(GraphErr::BrokenUseDef(id));
                }
            }
            for &user in &obj.users {
                let user_obj = self.get(user).map_err(|_| GraphErr::BrokenUseDef(id))?;
                if !user_obj.inputs.contains(&id) {
                    return Err(GraphErr::BrokenUseDef(id));
                }
            }
        }
        Ok(())
    }
}

fn remove_one_user(users: &mut SmallVec<[NodeID; 4]>, user: NodeID) {
    if let Some(pos) = users.iter().position(|&u| u == user) {
        users.swap_remove(pos);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::INodeEventListener;
    use std::{cell::RefCell, rc::Rc};

    #[derive(Default)]
    struct EventLog(Vec<(NodeEvent, NodeID)>);

    impl INodeEventListener for EventLog {
        fn on_node_event(&mut self, event: NodeEvent, node: NodeID) {
            self.0.push((event, node));
        }
    }

    #[test]
    fn test_graph_events() {
        let mut graph = Graph::new("events");
        let a = graph.add_node(Opcode::Param(0), []).unwrap();
        let b = graph.add_node(Opcode::Param(1), []).unwrap();
        let log = Rc::new(RefCell::new(EventLog::default()));

        let add = {
            let mut scope = graph.track_node_events(log.clone());
            let add = scope.add_node(Opcode::Add, [a, a]).unwrap();
            scope.set_input(add, 1, b).unwrap();
            scope.set_opcode(add, Opcode::Mul).unwrap();
            add
        };
        assert_eq!(graph.num_listeners(), 0);
        assert_eq!(
            log.borrow().0,
            vec![
                (NodeEvent::Added, add),
                (NodeEvent::InputChanged, add),
                (NodeEvent::InputChanged, add),
            ]
        );

        // 作用域关闭后不再收到事件
        graph.remove_node(add).unwrap();
        assert_eq!(log.borrow().0.len(), 3);
        graph.verify().unwrap();
    }

    #[test]
    fn test_replace_and_remove() {
        let mut graph = Graph::new("replace");
        let a = graph.add_node(Opcode::Param(0), []).unwrap();
        let zero = graph.add_node(Opcode::ConstInt(0), []).unwrap();
        let add = graph.add_node(Opcode::Add, [a, zero]).unwrap();
        let mul = graph.add_node(Opcode::Mul, [add, add]).unwrap();

        let log = Rc::new(RefCell::new(EventLog::default()));
        let mut scope = graph.track_node_events(log.clone());
        assert_eq!(scope.replace_all_uses(add, a).unwrap(), 1);
        scope.remove_node(add).unwrap();
        scope.close();

        assert_eq!(
            log.borrow().0,
            vec![
                (NodeEvent::InputChanged, mul),
                (NodeEvent::ZeroUsages, add),
                (NodeEvent::Removed, add),
                (NodeEvent::ZeroUsages, zero),
            ]
        );
        assert!(!graph.contains(add));
        assert_eq!(graph.get(mul).unwrap().inputs(), &[a, a]);
        assert_eq!(graph.users(a).unwrap().len(), 2);
        graph.verify().unwrap();
    }

    #[test]
    fn test_stale_id_after_slot_reuse() {
        let mut graph = Graph::new("reuse");
        let a = graph.add_node(Opcode::ConstInt(1), []).unwrap();
        graph.remove_node(a).unwrap();
        let b = graph.add_node(Opcode::ConstInt(2), []).unwrap();
        assert_eq!(a.index, b.index);
        assert!(!graph.contains(a));
        assert_eq!(graph.get(a).unwrap_err(), GraphErr::DeadNode(a));
    }

    #[test]
    fn test_graph_errors() {
        let mut graph = Graph::new("errors");
        let a = graph.add_node(Opcode::Param(0), []).unwrap();
        let neg = graph.add_node(Opcode::Sub, [a, a]).unwrap();
        assert_eq!(graph.remove_node(a), Err(GraphErr::NodeStillUsed(a, 2)));
        assert_eq!(
            graph.set_input(neg, 2, a),
            Err(GraphErr::InputOutOfRange { node: neg, index: 2 })
        );
        assert!(matches!(
            graph.add_node(Opcode::Add, [a]),
            Err(GraphErr::InputArity { expected: 2, found: 1, .. })
        ));
    }
}
