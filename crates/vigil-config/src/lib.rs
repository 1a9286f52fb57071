//! Loaders for the three configuration files under `config/`:
//! `orchestrator.toml` (the unattended AI policy), `repos.toml` (per-repo
//! policy and groups), and `bead_contracts/<repo_id>.toml` (contract overlay
//! patches). Parsing happens here; resolution happens in `vigil-contract`.

pub mod ai_policy;
pub mod error;
pub mod overlay;
pub mod repos;

pub use ai_policy::{AiPolicyConfig, OrchestratorToml, REQUIRED_MODEL, REQUIRED_REASONING_EFFORT};
pub use error::ConfigError;
pub use overlay::{BeadContractsToml, OverlayDefaults};
pub use repos::{ReposToml, RepoGroup};
