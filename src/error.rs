use thiserror::Error;

/// Every failure the core can raise. Each variant names the offending
/// path, dataset, or operation so a preset or source file can be fixed
/// without reading the internals.
#[derive(Debug, Error)]
pub enum WrightError {
    #[error("name '{name}' is already used in group '{parent}'")]
    NameCollision { parent: String, name: String },

    #[error("invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("shape mismatch for dataset '{dataset}': {detail}")]
    ShapeMismatch { dataset: String, detail: String },

    #[error("dataset '{dataset}' references axis '{axis}', which does not resolve to an axis dataset")]
    DanglingAxisReference { dataset: String, axis: String },

    #[error("path '{path}' not found (missing segment '{segment}')")]
    PathNotFound { path: String, segment: String },

    #[error("adapter '{adapter}' violated the container contract: {reason}")]
    AdapterContractViolation { adapter: String, reason: String },

    #[error("operation '{name}' is already registered")]
    DuplicateOperation { name: String },

    #[error("unknown operation '{name}'{}", .step.map(|s| format!(" at step {s}")).unwrap_or_default())]
    UnknownOperation { name: String, step: Option<usize> },

    #[error("operation '{operation}' cannot run on '{target}': {reason}")]
    ContractMismatch {
        operation: String,
        target: String,
        reason: String,
    },

    #[error("operation '{operation}' requires axis '{axis}' to be strictly monotonic")]
    InvalidAxisOrdering { operation: String, axis: String },

    #[error("invalid parameter '{parameter}' for operation '{operation}': {reason}")]
    InvalidParameter {
        operation: String,
        parameter: String,
        reason: String,
    },

    #[error("format adapter '{name}' is already registered")]
    DuplicateAdapter { name: String },

    #[error("no format adapter for '{path}'")]
    UnsupportedFormat { path: String },

    #[error("adapter '{adapter}' failed to parse '{path}': {reason}")]
    AdapterFailed {
        adapter: String,
        path: String,
        reason: String,
    },

    #[error("replay diverged at record {index} ('{operation}'): {reason}")]
    ReplayDivergence {
        index: usize,
        operation: String,
        reason: String,
    },

    #[error("corrupt container store: {0}")]
    CorruptStore(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error(transparent)]
    Arrow(#[from] arrow::error::ArrowError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, WrightError>;
