//! Core library for the vigil orchestrator — foundational types, the
//! cache-directory layout, atomic artifact writes, advisory locking, run
//! state, and the nightly-window predicate.
//!
//! This crate has no knowledge of git, the bead store, or the agent CLI; it
//! is pure data plus filesystem primitives that every other crate in the
//! workspace builds on.

pub mod atomic;
pub mod error;
pub mod lifecycle;
pub mod lockfile;
pub mod night_window;
pub mod paths;
pub mod run_state;
pub mod signoff;
pub mod types;
