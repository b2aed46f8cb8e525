//! Since no frontend produces node graphs yet, we build all our cases in this
//! module.

use crate::{
    ir::{CmpCond, Graph, GraphRes, NodeID, Opcode},
    opt::{ISinglePassEliminator, PhaseRes},
};

pub struct GuardChainCase {
    pub graph: Graph,
    pub start: NodeID,
    pub params: [NodeID; 2],
    pub guards: [NodeID; 3],
    pub ret: NodeID,
}

/// Test case: a straight-line chain of guards where the second guard repeats
/// the condition of the first one.
///
/// ```text
/// int f(int a, int b) {
///     guard(a < 10);
///     guard(a < 10);      // redundant
///     guard(b < 10);
///     return a + b;
/// }
/// ```
pub fn test_case_guard_chain() -> GuardChainCase {
    let mut graph = Graph::new("guard_chain");
    let start = graph.add_node(Opcode::Start, []).unwrap();
    let a = graph.add_node(Opcode::Param(0), []).unwrap();
    let b = graph.add_node(Opcode::Param(1), []).unwrap();
    let ten = graph.add_node(Opcode::ConstInt(10), []).unwrap();
    let slt = Opcode::Icmp(CmpCond::LT | CmpCond::SIGNED);
    let a_lt_10 = graph.add_node(slt, [a, ten]).unwrap();
    let b_lt_10 = graph.add_node(slt, [b, ten]).unwrap();

    let begin = graph.add_node(Opcode::Begin, [start]).unwrap();
    let g1 = graph.add_node(Opcode::Guard, [begin, a_lt_10]).unwrap();
    let g2 = graph.add_node(Opcode::Guard, [g1, a_lt_10]).unwrap();
    let g3 = graph.add_node(Opcode::Guard, [g2, b_lt_10]).unwrap();
    let sum = graph.add_node(Opcode::Add, [a, b]).unwrap();
    let ret = graph.add_node(Opcode::Return, [g3, sum]).unwrap();

    GuardChainCase { graph, start, params: [a, b], guards: [g1, g2, g3], ret }
}

/// A minimal elimination sweep for straight-line control: a guard whose
/// condition is already checked by a guard above it in the same control chain
/// gets the constant `true` as its condition.
#[derive(Debug, Default)]
pub struct RedundantGuardEliminator {
    pub sweeps: usize,
    pub saw_full_schedule: bool,
}

impl RedundantGuardEliminator {
    /// 沿控制输入向上走. 直线控制流中控制前驱就是支配者, 遇到 `Merge` 或 `If` 就停下.
    fn dominated_by_same_cond(graph: &Graph, mut control: NodeID, cond: NodeID) -> GraphRes<bool> {
        loop {
            let obj = graph.get(control)?;
            match obj.opcode {
                Opcode::Guard if obj.inputs()[1] == cond => return Ok(true),
                Opcode::Guard | Opcode::Begin => control = obj.inputs()[0],
                _ => return Ok(false),
            }
        }
    }
}

impl<C> ISinglePassEliminator<C> for RedundantGuardEliminator {
    fn prepare(&mut self, full_schedule: bool) {
        self.saw_full_schedule |= full_schedule;
    }

    fn eliminate(&mut self, graph: &mut Graph, _: &C) -> PhaseRes {
        self.sweeps += 1;
        let guards: Vec<NodeID> = graph
            .nodes()
            .filter(|(_, obj)| obj.opcode == Opcode::Guard)
            .map(|(id, _)| id)
            .collect();

        let mut always_true = None;
        for guard in guards {
            let (control, cond) = {
                let inputs = graph.get(guard)?.inputs();
                (inputs[0], inputs[1])
            };
            if graph.get(cond)?.get_const_int().is_some()
                || !Self::dominated_by_same_cond(graph, control, cond)?
            {
                continue;
            }
            let one = match always_true {
                Some(one) => one,
                None => *always_true.insert(graph.add_node(Opcode::ConstInt(1), [])?),
            };
            graph.set_input(guard, 1, one)?;
        }
        Ok(())
    }
}
