use thiserror::Error;

use crate::driver::BrowserError;
use crate::error::ConfigError;
use crate::vars::VariableError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("step '{step}' has no kind")]
    MissingKind { step: String },
    #[error("unknown step kind '{kind}' (available: {})", available.join(", "))]
    UnknownStepKind {
        kind: String,
        available: Vec<String>,
    },
    #[error("invalid parameters for step '{step}' ({kind}): {source}")]
    InvalidParameters {
        step: String,
        kind: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid parameter for step '{step}': {message}")]
    InvalidParameter { step: String, message: String },
    #[error("unknown delegated script '{name}'")]
    UnknownScript { name: String },
    #[error("workflow defines no steps")]
    EmptyWorkflow,
    #[error(transparent)]
    Variables(#[from] VariableError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to acquire browser driver: {0}")]
    DriverAcquisition(#[source] BrowserError),
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
