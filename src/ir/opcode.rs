use crate::ir::{CmpCond, NodeFlags};

/// Operation performed by a graph node.
///
/// Control nodes (`Start` .. `Guard`) are pinned in the control flow and
/// carry the control predecessor as their first input. Everything else floats
/// and is only ordered by its data inputs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Opcode {
    Start, Begin, Merge, If, Return, Guard,
    Param(u32), ConstInt(i64),
    And, Or, Xor, Shl, Lshr, Ashr,
    Add, Sub, Mul,
    Icmp(CmpCond),
    Select, Phi,
}

impl Opcode {
    pub fn is_shift_op(self) -> bool {
        matches!(self, Opcode::Shl | Opcode::Lshr | Opcode::Ashr)
    }
    pub fn is_logic_op(self) -> bool {
        matches!(self, Opcode::And | Opcode::Or | Opcode::Xor) || self.is_shift_op()
    }
    pub fn is_binary_op(self) -> bool {
        use Opcode::*;
        matches!(self, Add | Sub | Mul | Icmp(_)) || self.is_logic_op()
    }

    /// 返回该操作码需要的输入个数. `None` 表示变长 (`Merge`, `Phi`, `Return`).
    pub fn num_inputs(self) -> Option<usize> {
        use Opcode::*;
        match self {
            Start | Param(_) | ConstInt(_) => Some(0),
            Begin => Some(1),
            If | Guard => Some(2),
            Select => Some(3),
            Merge | Phi | Return => None,
            _ => Some(2),
        }
    }

    /// Capability flags a freshly created node of this opcode carries.
    pub fn default_flags(self) -> NodeFlags {
        use Opcode::*;
        match self {
            Start | Return => NodeFlags::CONTROL | NodeFlags::FIXED,
            Begin | Merge | If | Guard => {
                NodeFlags::CONTROL | NodeFlags::FIXED | NodeFlags::SIMPLIFIABLE
            }
            Param(_) => NodeFlags::FIXED,
            Phi => NodeFlags::SIMPLIFIABLE,
            _ => NodeFlags::empty(),
        }
    }

    pub fn get_name(self) -> &'static str {
        use Opcode::*;
        match self {
            Start => "start",
            Begin => "begin",
            Merge => "merge",
            If => "if",
            Return => "return",
            Guard => "guard",
            Param(_) => "param",
            ConstInt(_) => "const",
            And => "and",
            Or => "or",
            Xor => "xor",
            Shl => "shl",
            Lshr => "lshr",
            Ashr => "ashr",
            Add => "add",
            Sub => "sub",
            Mul => "mul",
            Icmp(_) => "icmp",
            Select => "select",
            Phi => "phi",
        }
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Opcode::Param(idx) => write!(f, "param #{idx}"),
            Opcode::ConstInt(val) => write!(f, "const {val}"),
            Opcode::Icmp(cond) => write!(f, "icmp {cond}"),
            op => f.write_str(op.get_name()),
        }
    }
}
