//! Iterative conditional elimination.
//!
//! One sweep of dominator-based conditional elimination may expose new
//! opportunities: a folded guard or comparison can give other nodes a simpler
//! shape, which in turn lets the next sweep prove more. This module drives the
//! single sweep to a fixed point:
//!
//! 1. run the sweep inside a [`NodeChangeTracker`] scope that ignores node
//!    additions and nodes losing their last user;
//! 2. stop if nothing was recorded;
//! 3. otherwise re-canonicalize the recorded nodes plus every simplifiable
//!    node of the graph, and start over.
//!
//! The loop gives up with [`PhaseErr::IterationBoundExceeded`] after
//! [`CondElimConfig::max_iterations`] productive cycles.

pub mod tracker;

use crate::{
    ir::{Graph, NodeEvent, NodeID},
    opt::{IGraphPhase, IPhaseContext, PhaseContext, PhaseErr, PhaseRes},
};
use smol_str::SmolStr;
use std::{cell::RefCell, collections::HashSet, rc::Rc};
use tracker::NodeChangeTracker;

pub const MAX_ITERATIONS: usize = 256;

/// One dominator-tree sweep that removes or simplifies redundant guards,
/// branches and comparisons in place.
pub trait ISinglePassEliminator<C = PhaseContext> {
    /// Name reported when the fixed-point loop gives up on this sweep.
    fn get_name(&self) -> SmolStr {
        SmolStr::new_static("ConditionalEliminationPhase")
    }

    /// Called once before every sweep. `full_schedule` asks the sweep to work
    /// on a complete schedule of the graph instead of the fixed nodes only.
    fn prepare(&mut self, _full_schedule: bool) {}

    fn eliminate(&mut self, graph: &mut Graph, ctx: &C) -> PhaseRes;
}

/// Re-canonicalizes exactly the given nodes (and whatever that locally
/// affects). Offering a node that needs no change must be harmless.
pub trait IIncrementalCanonicalizer<C = PhaseContext> {
    fn apply_incremental(&mut self, graph: &mut Graph, ctx: &C, nodes: &HashSet<NodeID>)
    -> PhaseRes;
}

impl<C, F> ISinglePassEliminator<C> for F
where
    F: FnMut(&mut Graph, &C) -> PhaseRes,
{
    fn eliminate(&mut self, graph: &mut Graph, ctx: &C) -> PhaseRes {
        self(graph, ctx)
    }
}

impl<C, F> IIncrementalCanonicalizer<C> for F
where
    F: FnMut(&mut Graph, &C, &HashSet<NodeID>) -> PhaseRes,
{
    fn apply_incremental(&mut self, graph: &mut Graph, ctx: &C, nodes: &HashSet<NodeID>) -> PhaseRes {
        self(graph, ctx, nodes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CondElimConfig {
    pub max_iterations: usize,
    pub full_schedule: bool,
}

impl Default for CondElimConfig {
    fn default() -> Self {
        Self { max_iterations: MAX_ITERATIONS, full_schedule: false }
    }
}

impl CondElimConfig {
    pub fn with_max_iterations(self, max_iterations: usize) -> Self {
        Self { max_iterations, ..self }
    }
    pub fn with_full_schedule(self, full_schedule: bool) -> Self {
        Self { full_schedule, ..self }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixedPointState {
    Running,
    Converged,
    Aborted,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CondElimStats {
    /// Number of single-pass sweeps performed.
    pub cycles: usize,
    pub canonicalize_calls: usize,
    /// Sum of the affected set sizes handed to the canonicalizer.
    pub nodes_offered: usize,
}

pub struct IterativeCondElimPhase<E, K> {
    eliminator: E,
    canonicalizer: K,
    config: CondElimConfig,
    state: FixedPointState,
    stats: CondElimStats,
}

impl<E, K> IterativeCondElimPhase<E, K> {
    pub fn new(eliminator: E, canonicalizer: K) -> Self {
        Self::with_config(eliminator, canonicalizer, CondElimConfig::default())
    }
    pub fn with_config(eliminator: E, canonicalizer: K, config: CondElimConfig) -> Self {
        Self {
            eliminator,
            canonicalizer,
            config,
            state: FixedPointState::Running,
            stats: CondElimStats::default(),
        }
    }

    pub fn config(&self) -> &CondElimConfig {
        &self.config
    }
    /// State the last run ended in; `Running` before the first run.
    ///
    /// `Aborted` covers every failed run, collaborator and graph errors
    /// included, not only [`PhaseErr::IterationBoundExceeded`]. Look at the
    /// returned error to tell them apart.
    pub fn state(&self) -> FixedPointState {
        self.state
    }
    pub fn stats(&self) -> CondElimStats {
        self.stats
    }
    pub fn eliminator(&self) -> &E {
        &self.eliminator
    }
    pub fn canonicalizer(&self) -> &K {
        &self.canonicalizer
    }
}

impl<E, K> IterativeCondElimPhase<E, K> {
    fn iterate<C>(
        &mut self,
        graph: &mut Graph,
        ctx: &C,
        tracker: &Rc<RefCell<NodeChangeTracker>>,
    ) -> PhaseRes
    where
        E: ISinglePassEliminator<C>,
        K: IIncrementalCanonicalizer<C>,
    {
        let mut count = 0;
        loop {
            debug_assert!(tracker.borrow().is_empty());
            self.stats.cycles += 1;
            self.eliminator.prepare(self.config.full_schedule);
            {
                // 作用域在 `?` 返回之前析构, 出错时监听器同样会被摘下.
                let mut scope = NodeChangeTracker::open_scope(tracker, graph);
                self.eliminator.eliminate(scope.graph(), ctx)?;
            }

            let mut changes = tracker.borrow_mut();
            if changes.is_empty() {
                log::debug!(
                    "conditional elimination on `{}` converged after {} cycles",
                    graph.name,
                    self.stats.cycles
                );
                return Ok(());
            }

            let touched = changes.len();
            let simplifiable = graph
                .nodes()
                .filter(|(_, obj)| obj.is_simplifiable())
                .map(|(id, _)| id);
            changes.affected_mut().extend(simplifiable);
            log::debug!(
                "conditional elimination cycle {}: {touched} nodes touched, {} offered to canonicalizer",
                self.stats.cycles,
                changes.len()
            );

            self.stats.canonicalize_calls += 1;
            self.stats.nodes_offered += changes.len();
            self.canonicalizer
                .apply_incremental(graph, ctx, changes.affected())?;
            changes.clear();
            drop(changes);

            count += 1;
            if count > self.config.max_iterations {
                let limit = self.config.max_iterations;
                log::warn!("conditional elimination on `{}` exceeds {limit} iterations", graph.name);
                let phase = self.eliminator.get_name();
                return Err(PhaseErr::IterationBoundExceeded { phase, limit });
            }
        }
    }
}

impl<C, E, K> IGraphPhase<C> for IterativeCondElimPhase<E, K>
where
    C: IPhaseContext,
    E: ISinglePassEliminator<C>,
    K: IIncrementalCanonicalizer<C>,
{
    fn get_name(&self) -> SmolStr {
        SmolStr::new_static("IterativeConditionalElimination")
    }

    fn run(&mut self, graph: &mut Graph, ctx: &C) -> PhaseRes {
        let tracker = NodeChangeTracker::new()
            .exclude(NodeEvent::Added)
            .exclude(NodeEvent::ZeroUsages)
            .into_shared();
        self.state = FixedPointState::Running;
        self.stats = CondElimStats::default();

        let res = self.iterate(graph, ctx, &tracker);
        self.state = match &res {
            Ok(()) => FixedPointState::Converged,
            Err(_) => FixedPointState::Aborted,
        };
        res
    }

    fn code_size_increase(&self) -> f32 {
        2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ir::{NodeFlags, Opcode},
        opt::{IncrementalCanonicalizer, OptOptions},
        testing::cases::{RedundantGuardEliminator, test_case_guard_chain},
    };

    /// Runs a scripted list of edits, one per sweep; sweeps past the end of
    /// the script do nothing.
    struct ScriptedEliminator {
        script: Vec<Box<dyn FnMut(&mut Graph) -> PhaseRes>>,
        calls: usize,
    }

    impl ScriptedEliminator {
        fn new(script: Vec<Box<dyn FnMut(&mut Graph) -> PhaseRes>>) -> Self {
            Self { script, calls: 0 }
        }
    }

    impl ISinglePassEliminator<PhaseContext> for ScriptedEliminator {
        fn eliminate(&mut self, graph: &mut Graph, _: &PhaseContext) -> PhaseRes {
            let step = self.calls;
            self.calls += 1;
            match self.script.get_mut(step) {
                Some(edit) => edit(graph),
                None => Ok(()),
            }
        }
    }

    #[derive(Default)]
    struct RecordingCanonicalizer {
        calls: Vec<HashSet<NodeID>>,
    }

    impl IIncrementalCanonicalizer<PhaseContext> for RecordingCanonicalizer {
        fn apply_incremental(
            &mut self,
            _: &mut Graph,
            _: &PhaseContext,
            nodes: &HashSet<NodeID>,
        ) -> PhaseRes {
            self.calls.push(nodes.clone());
            Ok(())
        }
    }

    fn ctx() -> PhaseContext {
        PhaseContext::new(OptOptions { verify_graph: true, dump_graph: false })
    }

    fn small_graph() -> (Graph, NodeID, NodeID, NodeID) {
        let mut graph = Graph::new("small");
        let a = graph.add_node(Opcode::Param(0), []).unwrap();
        let b = graph.add_node(Opcode::Param(1), []).unwrap();
        let add = graph.add_node(Opcode::Add, [a, b]).unwrap();
        (graph, a, b, add)
    }

    #[test]
    fn test_stable_graph_converges_in_one_cycle() {
        let (mut graph, ..) = small_graph();
        let mut phase =
            IterativeCondElimPhase::new(ScriptedEliminator::new(vec![]), RecordingCanonicalizer::default());
        phase.apply(&mut graph, &ctx()).unwrap();

        assert_eq!(phase.state(), FixedPointState::Converged);
        assert_eq!(phase.stats().cycles, 1);
        assert_eq!(phase.eliminator().calls, 1);
        assert!(phase.canonicalizer().calls.is_empty());
    }

    #[test]
    fn test_one_change_costs_one_extra_cycle() {
        let (mut graph, a, _, add) = small_graph();
        let phi = graph
            .add_node_with_flags(Opcode::Phi, [a, a], NodeFlags::SIMPLIFIABLE)
            .unwrap();
        let script: Vec<Box<dyn FnMut(&mut Graph) -> PhaseRes>> =
            vec![Box::new(move |g: &mut Graph| -> PhaseRes { Ok(g.set_input(add, 1, a)?) })];
        let mut phase =
            IterativeCondElimPhase::new(ScriptedEliminator::new(script), RecordingCanonicalizer::default());
        phase.apply(&mut graph, &ctx()).unwrap();

        assert_eq!(phase.stats().cycles, 2);
        assert_eq!(phase.eliminator().calls, 2);
        let calls = &phase.canonicalizer().calls;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], HashSet::from([add, phi]));
    }

    #[test]
    fn test_filtered_events_do_not_trigger_rework() {
        let (mut graph, a, _, add) = small_graph();
        let script: Vec<Box<dyn FnMut(&mut Graph) -> PhaseRes>> =
            vec![Box::new(move |g: &mut Graph| -> PhaseRes {
                g.add_node(Opcode::Sub, [a, add])?;
                g.add_node(Opcode::ConstInt(0), [])?;
                g.emit(NodeEvent::ZeroUsages, add);
                Ok(())
            })];
        let mut phase =
            IterativeCondElimPhase::new(ScriptedEliminator::new(script), RecordingCanonicalizer::default());
        phase.apply(&mut graph, &ctx()).unwrap();

        assert_eq!(phase.state(), FixedPointState::Converged);
        assert_eq!(phase.stats().cycles, 1);
        assert!(phase.canonicalizer().calls.is_empty());
    }

    #[test]
    fn test_iteration_bound() {
        let (mut graph, a, b, add) = small_graph();
        let mut sweeps = 0usize;
        let mut flip = false;
        let always_changes = |g: &mut Graph, _: &PhaseContext| -> PhaseRes {
            sweeps += 1;
            flip = !flip;
            Ok(g.set_input(add, 0, if flip { b } else { a })?)
        };
        let mut canon_calls = 0usize;
        let canonicalizer = |_: &mut Graph, _: &PhaseContext, _: &HashSet<NodeID>| -> PhaseRes {
            canon_calls += 1;
            Ok(())
        };
        let mut phase = IterativeCondElimPhase::new(always_changes, canonicalizer);
        let err = phase.run(&mut graph, &ctx()).unwrap_err();

        assert!(err.is_bailout());
        assert!(matches!(err, PhaseErr::IterationBoundExceeded { limit: MAX_ITERATIONS, .. }));
        assert_eq!(
            err.to_string(),
            "Number of iterations in ConditionalEliminationPhase phase exceeds 256"
        );
        assert_eq!(phase.state(), FixedPointState::Aborted);
        assert_eq!(phase.stats().cycles, MAX_ITERATIONS + 1);
        assert_eq!(phase.stats().canonicalize_calls, MAX_ITERATIONS + 1);
        drop(phase);
        assert_eq!(sweeps, MAX_ITERATIONS + 1);
        assert_eq!(canon_calls, MAX_ITERATIONS + 1);
    }

    #[test]
    fn test_custom_iteration_bound() {
        let (mut graph, a, b, add) = small_graph();
        let mut flip = false;
        let eliminator = move |g: &mut Graph, _: &PhaseContext| -> PhaseRes {
            flip = !flip;
            Ok(g.set_input(add, 0, if flip { b } else { a })?)
        };
        let canonicalizer =
            |_: &mut Graph, _: &PhaseContext, _: &HashSet<NodeID>| -> PhaseRes { Ok(()) };
        let config = CondElimConfig::default().with_max_iterations(3);
        let mut phase = IterativeCondElimPhase::with_config(eliminator, canonicalizer, config);

        let err = phase.run(&mut graph, &ctx()).unwrap_err();
        assert!(matches!(err, PhaseErr::IterationBoundExceeded { limit: 3, .. }));
        assert_eq!(phase.stats().cycles, 4);
    }

    #[test]
    fn test_scope_closed_on_eliminator_failure() {
        let (mut graph, a, _, add) = small_graph();
        let script: Vec<Box<dyn FnMut(&mut Graph) -> PhaseRes>> =
            vec![Box::new(move |g: &mut Graph| -> PhaseRes {
                g.set_input(add, 1, a)?;
                Err(PhaseErr::Collaborator {
                    phase: SmolStr::new_static("DominatorConditionalElimination"),
                    message: SmolStr::new_static("lost dominator tree"),
                })
            })];
        let mut phase =
            IterativeCondElimPhase::new(ScriptedEliminator::new(script), RecordingCanonicalizer::default());
        let err = phase.apply(&mut graph, &ctx()).unwrap_err();

        assert!(matches!(err, PhaseErr::Collaborator { .. }));
        assert!(!err.is_bailout());
        assert_eq!(graph.num_listeners(), 0);
        assert_eq!(phase.state(), FixedPointState::Aborted);
        assert!(phase.canonicalizer().calls.is_empty());

        // 之后的修改不会再送达任何监听器; 图也仍然可以正常修改
        graph.set_opcode(add, Opcode::Mul).unwrap();
        assert_eq!(graph.num_listeners(), 0);
    }

    #[test]
    fn test_canonicalizer_failure_propagates() {
        let (mut graph, a, _, add) = small_graph();
        let eliminator = move |g: &mut Graph, _: &PhaseContext| -> PhaseRes {
            Ok(g.set_input(add, 1, a)?)
        };
        let canonicalizer = |_: &mut Graph, _: &PhaseContext, _: &HashSet<NodeID>| -> PhaseRes {
            Err(PhaseErr::Bailout(SmolStr::new_static("canonicalizer gave up")))
        };
        let mut phase = IterativeCondElimPhase::new(eliminator, canonicalizer);
        let err = phase.run(&mut graph, &ctx()).unwrap_err();
        assert!(matches!(err, PhaseErr::Bailout(_)));
        assert_eq!(graph.num_listeners(), 0);
    }

    #[test]
    fn test_rerun_on_converged_graph() {
        let mut case = test_case_guard_chain();
        let mut phase = IterativeCondElimPhase::new(
            RedundantGuardEliminator::default(),
            IncrementalCanonicalizer::with_default_rules(),
        );
        phase.apply(&mut case.graph, &ctx()).unwrap();
        assert_eq!(phase.stats().cycles, 2);
        assert_eq!(phase.stats().canonicalize_calls, 1);

        phase.apply(&mut case.graph, &ctx()).unwrap();
        assert_eq!(phase.state(), FixedPointState::Converged);
        assert_eq!(phase.stats().cycles, 1);
        assert_eq!(phase.stats().canonicalize_calls, 0);
    }

    #[test]
    fn test_redundant_guards_removed() {
        let mut case = test_case_guard_chain();
        let [g1, g2, g3] = case.guards;
        let mut phase = IterativeCondElimPhase::with_config(
            RedundantGuardEliminator::default(),
            IncrementalCanonicalizer::with_default_rules(),
            CondElimConfig::default().with_full_schedule(true),
        );
        phase.apply(&mut case.graph, &ctx()).unwrap();

        let graph = &case.graph;
        assert!(graph.contains(g1));
        assert!(!graph.contains(g2));
        assert!(graph.contains(g3));
        // g3 的控制输入被重定向到 g1
        assert_eq!(graph.get(g3).unwrap().get_input(0), Some(g1));
        assert_eq!(graph.get(case.ret).unwrap().get_input(0), Some(g3));
        assert!(phase.eliminator().saw_full_schedule);
        assert_eq!(IGraphPhase::<PhaseContext>::code_size_increase(&phase), 2.0);
        graph.verify().unwrap();
    }

    #[test]
    fn test_large_graph_converges() {
        const NUM_PHIS: usize = 70_000;
        let (mut graph, a, b, add) = small_graph();
        let start = graph.add_node(Opcode::Start, []).unwrap();
        let mut live = vec![start, add];
        for _ in 0..NUM_PHIS {
            live.push(graph.add_node(Opcode::Phi, [a, b]).unwrap());
        }
        graph.add_node(Opcode::Return, live).unwrap();

        let script: Vec<Box<dyn FnMut(&mut Graph) -> PhaseRes>> =
            vec![Box::new(move |g: &mut Graph| -> PhaseRes { Ok(g.set_input(add, 1, a)?) })];
        let mut phase = IterativeCondElimPhase::new(
            ScriptedEliminator::new(script),
            IncrementalCanonicalizer::with_default_rules(),
        );
        phase.run(&mut graph, &ctx()).unwrap();

        assert_eq!(phase.state(), FixedPointState::Converged);
        assert_eq!(phase.stats().cycles, 2);
        assert_eq!(phase.stats().nodes_offered, NUM_PHIS + 1);
        assert!(phase.canonicalizer().stats().steps > NUM_PHIS);
        assert_eq!(phase.canonicalizer().stats().removed, 0);
    }
}
