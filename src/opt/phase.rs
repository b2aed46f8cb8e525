use crate::ir::{Graph, GraphErr, GraphWriter};
use smol_str::SmolStr;

/// Options shared by every phase of an optimization pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OptOptions {
    /// Run [`Graph::verify`] after each phase. On by default in debug builds.
    pub verify_graph: bool,
    /// Dump the graph through `log::debug!` after each phase.
    pub dump_graph: bool,
}

impl Default for OptOptions {
    fn default() -> Self {
        Self { verify_graph: cfg!(debug_assertions), dump_graph: false }
    }
}

pub trait IPhaseContext {
    fn opt_options(&self) -> OptOptions {
        OptOptions::default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct PhaseContext {
    pub options: OptOptions,
}

impl PhaseContext {
    pub fn new(options: OptOptions) -> Self {
        Self { options }
    }
}

impl IPhaseContext for PhaseContext {
    fn opt_options(&self) -> OptOptions {
        self.options
    }
}
impl IPhaseContext for () {}

#[derive(Debug, thiserror::Error)]
pub enum PhaseErr {
    /// A fixed-point loop did not stabilize within its iteration ceiling.
    #[error("Number of iterations in {phase} phase exceeds {limit}")]
    IterationBoundExceeded { phase: SmolStr, limit: usize },

    #[error("bailout: {0}")]
    Bailout(SmolStr),

    #[error("graph error: {0}")]
    Graph(#[from] GraphErr),

    #[error("phase {phase} failed: {message}")]
    Collaborator { phase: SmolStr, message: SmolStr },
}
pub type PhaseRes<T = ()> = Result<T, PhaseErr>;

impl PhaseErr {
    /// Bailouts abort the compilation attempt of the current unit. The
    /// pipeline falls back to a less optimized strategy instead of retrying.
    pub fn is_bailout(&self) -> bool {
        matches!(self, Self::IterationBoundExceeded { .. } | Self::Bailout(_))
    }
}

/// A transformation over a whole graph.
pub trait IGraphPhase<C: IPhaseContext = PhaseContext> {
    fn get_name(&self) -> SmolStr;

    fn run(&mut self, graph: &mut Graph, ctx: &C) -> PhaseRes;

    /// Informational estimate of how much this phase may grow the emitted code.
    fn code_size_increase(&self) -> f32 {
        1.0
    }

    /// Runs the phase with the pipeline's bookkeeping around it.
    fn apply(&mut self, graph: &mut Graph, ctx: &C) -> PhaseRes {
        let name = self.get_name();
        let options = ctx.opt_options();
        log::debug!("phase {name}: start on graph `{}` ({} nodes)", graph.name, graph.num_nodes());

        if let Err(err) = self.run(graph, ctx) {
            log::debug!("phase {name}: failed: {err}");
            return Err(err);
        }
        if options.verify_graph {
            graph.verify()?;
        }
        if options.dump_graph && log::log_enabled!(log::Level::Debug) {
            log::debug!("phase {name}: result\n{}", GraphWriter::new(graph));
        }
        log::debug!("phase {name}: done ({} nodes)", graph.num_nodes());
        Ok(())
    }
}
