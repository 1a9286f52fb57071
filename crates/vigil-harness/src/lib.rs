//! Subprocess execution and reliability primitives shared by every external
//! collaborator contract (git, the bead-store CLI, the agent CLI, the
//! environment manager): a single wrapper enforcing timeout and byte-capped
//! capture, a validation-command allowlist, and cooperative shutdown for the
//! `roadtrip` loop.

pub mod allowlist;
pub mod shutdown;
pub mod subprocess;
