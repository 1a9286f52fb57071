//! The planner (C8): turns a repo's ready beads into a frozen `RunDeck` for
//! one run, resolving contracts and baseline validations along the way.

pub mod bead_store;
pub mod planner;

pub use bead_store::{BdCli, BeadCliError, BeadStore};
pub use planner::{build_or_reuse_deck, PlanningError};
