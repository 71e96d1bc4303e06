//! Phase workflow engine.
//!
//! A workflow is a tree of named phases. Phases are assembled once with the
//! [`Phase`] builder, validated by [`Workflow::new`], and then run in
//! declaration order against shared, read-only run data.

mod flags;
mod phase;
mod runner;
mod selection;

pub use flags::{FlagSet, LocalFlag};
pub use phase::{Phase, PhaseAction, PhaseContext, PhaseError, PhaseOutcome};
pub use runner::{PhaseFailure, PhaseInfo, PhaseRecord, PhaseState, RunReport, Workflow};
pub use selection::Selection;
