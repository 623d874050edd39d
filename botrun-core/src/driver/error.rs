use thiserror::Error;

pub type BrowserResult<T> = Result<T, BrowserError>;

/// Faults raised while talking to the browser or to a delegated script.
///
/// Inside a step these are converted into a failed attempt by the retry
/// supervisor; they never abort the run on their own.
#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("browser could not be started: {0}")]
    Launch(String),
    #[error("devtools protocol: {0}")]
    Cdp(#[from] chromiumoxide::error::CdpError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("invalid browser request: {0}")]
    Configuration(String),
    #[error("no element matches {0}")]
    ElementNotFound(String),
    #[error("script failed: {0}")]
    Script(String),
    #[error("{0}")]
    Unexpected(String),
}
