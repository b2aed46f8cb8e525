//! Worklist canonicalization over an explicit set of nodes.

use crate::{
    ir::{CmpCond, Graph, GraphRes, NodeID, Opcode},
    opt::{IGraphPhase, IIncrementalCanonicalizer, IPhaseContext, PhaseErr, PhaseRes},
};
use smol_str::{SmolStr, format_smolstr};
use std::collections::{HashMap, HashSet, VecDeque};

/// What a rule did to the node it was offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Canonical {
    /// Already canonical as far as this rule is concerned.
    Keep,
    /// Rewritten in place; its users should be looked at again.
    Changed,
    /// Equivalent to another node. The canonicalizer redirects the users.
    Replace(NodeID),
}

pub trait ICanonicalizeRule {
    fn get_name(&self) -> &'static str;

    /// `node` is guaranteed to be alive when this is called.
    fn canonicalize(&self, graph: &mut Graph, node: NodeID) -> GraphRes<Canonical>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CanonicalizeStats {
    pub steps: usize,
    pub changed: usize,
    pub replaced: usize,
    pub removed: usize,
}

pub struct IncrementalCanonicalizer {
    rules: Vec<Box<dyn ICanonicalizeRule>>,
    /// How many times one node may be taken from the worklist in one call.
    /// Rules that keep undoing each other hit this bound; the total amount of
    /// work is only limited by the size of the graph.
    pub max_visits_per_node: u32,
    stats: CanonicalizeStats,
    worklist: VecDeque<NodeID>,
    queued: HashSet<NodeID>,
    visits: HashMap<NodeID, u32>,
}

impl Default for IncrementalCanonicalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl IncrementalCanonicalizer {
    pub const DEFAULT_MAX_VISITS_PER_NODE: u32 = 32;

    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            max_visits_per_node: Self::DEFAULT_MAX_VISITS_PER_NODE,
            stats: CanonicalizeStats::default(),
            worklist: VecDeque::new(),
            queued: HashSet::new(),
            visits: HashMap::new(),
        }
    }
    pub fn with_default_rules() -> Self {
        Self::new()
            .add_rule(GuardFoldRule)
            .add_rule(ConstFoldRule)
            .add_rule(IdentityRule)
    }
    pub fn add_rule(mut self, rule: impl ICanonicalizeRule + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }
    pub fn with_max_visits_per_node(self, max_visits_per_node: u32) -> Self {
        Self { max_visits_per_node, ..self }
    }

    /// Statistics of the last call.
    pub fn stats(&self) -> CanonicalizeStats {
        self.stats
    }

    pub fn canonicalize_nodes(
        &mut self,
        graph: &mut Graph,
        seeds: impl IntoIterator<Item = NodeID>,
    ) -> PhaseRes {
        self.stats = CanonicalizeStats::default();
        self.worklist.clear();
        self.queued.clear();
        self.visits.clear();

        // 按 ID 排序, 使结果不依赖 HashSet 的遍历顺序
        let mut seeds: Vec<NodeID> = seeds.into_iter().collect();
        seeds.sort_unstable();
        for node in seeds {
            self.push(node);
        }

        while let Some(node) = self.worklist.pop_front() {
            self.queued.remove(&node);
            self.stats.steps += 1;
            let visits = self.visits.entry(node).or_insert(0);
            *visits += 1;
            if *visits > self.max_visits_per_node {
                self.worklist.clear();
                self.queued.clear();
                return Err(PhaseErr::Bailout(format_smolstr!(
                    "canonicalization of `{}` visits {node:?} more than {} times",
                    graph.name,
                    self.max_visits_per_node
                )));
            }
            self.process(graph, node)?;
        }
        log::debug!("canonicalize `{}`: {:?}", graph.name, self.stats);
        Ok(())
    }

    fn push(&mut self, node: NodeID) {
        if self.queued.insert(node) {
            self.worklist.push_back(node);
        }
    }
    fn push_users(&mut self, graph: &Graph, node: NodeID) -> GraphRes {
        let users = graph.users(node)?.to_vec();
        for user in users {
            self.push(user);
        }
        Ok(())
    }

    fn process(&mut self, graph: &mut Graph, node: NodeID) -> PhaseRes {
        let Ok(obj) = graph.get(node) else {
            return Ok(());
        };
        if obj.has_no_users() && !obj.is_fixed() {
            return self.kill(graph, node);
        }

        for i in 0..self.rules.len() {
            let rule = &self.rules[i];
            let name = rule.get_name();
            match rule.canonicalize(graph, node)? {
                Canonical::Keep => continue,
                Canonical::Replace(new) if new == node => continue,
                Canonical::Changed => {
                    log::trace!("canonicalize: {name} rewrote {node:?}");
                    self.stats.changed += 1;
                    self.push(node);
                    self.push_users(graph, node)?;
                }
                Canonical::Replace(new) => {
                    log::trace!("canonicalize: {name} replaced {node:?} with {new:?}");
                    self.stats.replaced += 1;
                    graph.replace_all_uses(node, new)?;
                    self.push(new);
                    self.push_users(graph, new)?;
                    if graph.users(node)?.is_empty() {
                        self.kill(graph, node)?;
                    }
                }
            }
            break;
        }
        Ok(())
    }

    fn kill(&mut self, graph: &mut Graph, node: NodeID) -> PhaseRes {
        let inputs = graph.get(node)?.inputs().to_vec();
        graph.remove_node(node)?;
        self.stats.removed += 1;
        for input in inputs {
            self.push(input);
        }
        Ok(())
    }
}

impl<C> IIncrementalCanonicalizer<C> for IncrementalCanonicalizer {
    fn apply_incremental(&mut self, graph: &mut Graph, _: &C, nodes: &HashSet<NodeID>) -> PhaseRes {
        self.canonicalize_nodes(graph, nodes.iter().copied())
    }
}

impl<C: IPhaseContext> IGraphPhase<C> for IncrementalCanonicalizer {
    fn get_name(&self) -> SmolStr {
        SmolStr::new_static("Canonicalizer")
    }

    fn run(&mut self, graph: &mut Graph, _: &C) -> PhaseRes {
        let nodes = graph.node_ids();
        self.canonicalize_nodes(graph, nodes)
    }
}

fn const_input(graph: &Graph, node: NodeID, index: usize) -> GraphRes<Option<i64>> {
    let obj = graph.get(node)?;
    match obj.get_input(index) {
        Some(input) => Ok(graph.get(input)?.get_const_int()),
        None => Ok(None),
    }
}

fn fold_binop(opcode: Opcode, lhs: i64, rhs: i64) -> Option<i64> {
    use Opcode::*;
    let shamt = (rhs & 63) as u32;
    let value = match opcode {
        Add => lhs.wrapping_add(rhs),
        Sub => lhs.wrapping_sub(rhs),
        Mul => lhs.wrapping_mul(rhs),
        And => lhs & rhs,
        Or => lhs | rhs,
        Xor => lhs ^ rhs,
        Shl => lhs.wrapping_shl(shamt),
        Lshr => ((lhs as u64) >> shamt) as i64,
        Ashr => lhs >> shamt,
        Icmp(cond) => cond.eval_int(lhs, rhs) as i64,
        _ => return None,
    };
    Some(value)
}

/// Folds integer operations whose inputs are all constants, and selects with
/// a constant condition.
pub struct ConstFoldRule;

impl ICanonicalizeRule for ConstFoldRule {
    fn get_name(&self) -> &'static str {
        "ConstFold"
    }

    fn canonicalize(&self, graph: &mut Graph, node: NodeID) -> GraphRes<Canonical> {
        let obj = graph.get(node)?;
        let opcode = obj.opcode;
        if opcode == Opcode::Select {
            let inputs = obj.inputs();
            let (then_val, else_val) = (inputs[1], inputs[2]);
            return Ok(match const_input(graph, node, 0)? {
                Some(0) => Canonical::Replace(else_val),
                Some(_) => Canonical::Replace(then_val),
                None => Canonical::Keep,
            });
        }
        if !opcode.is_binary_op() {
            return Ok(Canonical::Keep);
        }
        let (Some(lhs), Some(rhs)) = (const_input(graph, node, 0)?, const_input(graph, node, 1)?)
        else {
            return Ok(Canonical::Keep);
        };
        match fold_binop(opcode, lhs, rhs) {
            Some(value) => Ok(Canonical::Replace(graph.add_node(Opcode::ConstInt(value), [])?)),
            None => Ok(Canonical::Keep),
        }
    }
}

/// Removes operations that return one of their inputs unchanged:
/// `x + 0`, `x * 1`, `x & -1`, `x >> 0`, `select c, x, x`, single-valued phis.
/// Comparisons of a node with itself fold to the comparison's reflexive result.
pub struct IdentityRule;

impl ICanonicalizeRule for IdentityRule {
    fn get_name(&self) -> &'static str {
        "Identity"
    }

    fn canonicalize(&self, graph: &mut Graph, node: NodeID) -> GraphRes<Canonical> {
        use Opcode::*;
        let obj = graph.get(node)?;
        let opcode = obj.opcode;
        let inputs = obj.inputs().to_vec();
        match opcode {
            Phi => {
                let mut others = inputs.iter().copied().filter(|&i| i != node);
                let Some(first) = others.next() else {
                    return Ok(Canonical::Keep);
                };
                if others.all(|i| i == first) {
                    return Ok(Canonical::Replace(first));
                }
                Ok(Canonical::Keep)
            }
            Select if inputs[1] == inputs[2] => Ok(Canonical::Replace(inputs[1])),
            Icmp(cond) if inputs[0] == inputs[1] => {
                let value = cond.contains(CmpCond::EQ) as i64;
                Ok(Canonical::Replace(graph.add_node(ConstInt(value), [])?))
            }
            op if op.is_binary_op() => {
                let lhs = const_input(graph, node, 0)?;
                let rhs = const_input(graph, node, 1)?;
                let commutative = matches!(op, Add | Mul | And | Or | Xor);
                let identity = match op {
                    Add | Sub | Or | Xor | Shl | Lshr | Ashr => 0,
                    Mul => 1,
                    And => -1,
                    _ => return Ok(Canonical::Keep),
                };
                if rhs == Some(identity) {
                    Ok(Canonical::Replace(inputs[0]))
                } else if commutative && lhs == Some(identity) {
                    Ok(Canonical::Replace(inputs[1]))
                } else {
                    Ok(Canonical::Keep)
                }
            }
            _ => Ok(Canonical::Keep),
        }
    }
}

/// A guard whose condition is a non-zero constant always passes and is
/// replaced by its control input.
pub struct GuardFoldRule;

impl ICanonicalizeRule for GuardFoldRule {
    fn get_name(&self) -> &'static str {
        "GuardFold"
    }

    fn canonicalize(&self, graph: &mut Graph, node: NodeID) -> GraphRes<Canonical> {
        let obj = graph.get(node)?;
        if obj.opcode != Opcode::Guard {
            return Ok(Canonical::Keep);
        }
        let control = obj.inputs()[0];
        match const_input(graph, node, 1)? {
            Some(cond) if cond != 0 => Ok(Canonical::Replace(control)),
            _ => Ok(Canonical::Keep),
        }
    }
}
