use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path} as TOML: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("{path}: unknown top-level key(s): {keys}")]
    UnknownKeys { path: PathBuf, keys: String },
    #[error("{path}: {field} is required and must be non-empty")]
    MissingField { path: PathBuf, field: String },
    #[error(
        "unattended AI policy violation: model={model:?} reasoning_effort={reasoning_effort:?}, required model={required_model:?} reasoning_effort={required_effort:?}"
    )]
    AiPolicyMismatch {
        model: String,
        reasoning_effort: String,
        required_model: String,
        required_effort: String,
    },
    #[error("{path}: relative path or '..' component not allowed: {value}")]
    PathNotAbsoluteOrContainsDotDot { path: PathBuf, value: String },
    #[error(
        "{path}: overlay for bead {bead_id:?} narrows outside policy bounds: {detail}"
    )]
    NarrowingViolation {
        path: PathBuf,
        bead_id: String,
        detail: String,
    },
    #[error("{path}: unknown bead id {bead_id:?} (not in current bead store snapshot)")]
    UnknownBeadId { path: PathBuf, bead_id: String },
    #[error(
        "{path}: orchestrator output directory {dir:?} is not reachable under allowed_roots or is covered by deny_roots"
    )]
    OutputsUnreachable { path: PathBuf, dir: String },
    #[error("{path}: repos.{repo_id}.path {reason}")]
    RepoPathInvalid {
        path: PathBuf,
        repo_id: String,
        reason: String,
    },
}
