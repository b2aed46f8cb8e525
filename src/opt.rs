//! Optimizers of the Remusys node graph.

mod phase;
mod transforms;

pub use self::{
    phase::{IGraphPhase, IPhaseContext, OptOptions, PhaseContext, PhaseErr, PhaseRes},
    transforms::{
        canonicalize::{
            Canonical, CanonicalizeStats, ConstFoldRule, GuardFoldRule, ICanonicalizeRule,
            IdentityRule, IncrementalCanonicalizer,
        },
        cond_elim::{
            CondElimConfig, CondElimStats, FixedPointState, IIncrementalCanonicalizer,
            ISinglePassEliminator, IterativeCondElimPhase, MAX_ITERATIONS,
            tracker::NodeChangeTracker,
        },
    },
};
