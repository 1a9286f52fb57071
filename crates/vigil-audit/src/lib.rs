//! Audit trail: the artifacts a run leaves behind once it's over. Every
//! write here goes through `vigil_core::atomic` so the on-disk shape is
//! consistent with the rest of the workspace — temp file, then rename.
//!
//! This crate never decides what happened during a tick; it only records
//! what the Cycle Controller and Repo Executor already decided.

pub mod report;
pub mod summary;
pub mod tool_versions;

pub use summary::{RepoSummary, RunSummary, RunTotals};
pub use tool_versions::capture_tool_versions;
