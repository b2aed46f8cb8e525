use crate::ir::Opcode;
use bitflags::bitflags;
use smallvec::SmallVec;

/// Identity of a node inside one [`Graph`](crate::ir::Graph).
///
/// `index` 是 slab 中的槽位, `generation` 用于区分槽位被复用前后的两个节点:
/// 一个节点被删除后, 旧的 ID 不会意外地指向新插入的节点.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeID {
    pub index: u32,
    pub generation: u32,
}

impl NodeID {
    pub(crate) fn new(index: usize, generation: u32) -> Self {
        Self { index: index as u32, generation }
    }
    pub fn get_index(self) -> usize {
        self.index as usize
    }
}

impl std::fmt::Debug for NodeID {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "%{}", self.index)?;
        if self.generation != 0 {
            write!(f, "#{}", self.generation)?;
        }
        Ok(())
    }
}

impl std::fmt::Display for NodeID {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

bitflags! {
    /// Per-node capabilities.
    #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
    pub struct NodeFlags: u8 {
        /// The node takes part in simplification: a change anywhere in the
        /// graph may give it a simpler canonical form.
        const SIMPLIFIABLE = 0b001;
        /// The node is part of the control flow.
        const CONTROL      = 0b010;
        /// The node stays alive without users (control nodes, parameters).
        const FIXED        = 0b100;
    }
}

pub type NodeInputs = SmallVec<[NodeID; 4]>;

#[derive(Debug, Clone)]
pub struct NodeObj {
    pub opcode: Opcode,
    pub flags: NodeFlags,
    pub(super) inputs: NodeInputs,
    /// 使用者多重集合: 一个节点若两次使用同一输入, 则在这里出现两次.
    pub(super) users: SmallVec<[NodeID; 4]>,
    pub(super) generation: u32,
}

impl NodeObj {
    pub(super) fn new(opcode: Opcode, inputs: NodeInputs, flags: NodeFlags, generation: u32) -> Self {
        Self { opcode, flags, inputs, users: SmallVec::new(), generation }
    }

    pub fn inputs(&self) -> &[NodeID] {
        &self.inputs
    }
    pub fn get_input(&self, index: usize) -> Option<NodeID> {
        self.inputs.get(index).copied()
    }
    pub fn users(&self) -> &[NodeID] {
        &self.users
    }
    pub fn num_users(&self) -> usize {
        self.users.len()
    }
    pub fn has_no_users(&self) -> bool {
        self.users.is_empty()
    }

    pub fn is_simplifiable(&self) -> bool {
        self.flags.contains(NodeFlags::SIMPLIFIABLE)
    }
    pub fn is_fixed(&self) -> bool {
        self.flags.contains(NodeFlags::FIXED)
    }

    pub fn get_const_int(&self) -> Option<i64> {
        match self.opcode {
            Opcode::ConstInt(val) => Some(val),
            _ => None,
        }
    }
}
