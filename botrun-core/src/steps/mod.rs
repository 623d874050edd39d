//! Built-in step kinds.

mod alert;
mod authenticate;
mod click;
mod command;
mod download;
mod end_session;
mod extract;
mod navigate;
mod script;
mod submit_form;

use std::fmt;
use std::time::Duration;

use crate::driver::{Locator, LocatorStrategy};
use crate::engine::{BuildContext, EngineResult, StepRegistry};

pub use alert::{AlertAction, AlertStep, LAST_ALERT_KEY};
pub use authenticate::AuthenticateStep;
pub use click::ClickStep;
pub use command::CommandScript;
pub use download::{DownloadRecord, FetchFileStep, FetchFilesBatchStep};
pub use end_session::EndSessionStep;
pub use extract::ExtractStep;
pub use navigate::NavigateStep;
pub use script::ScriptStep;
pub use submit_form::{FieldType, FormField, SubmitFormStep};

pub(crate) fn register_builtins(registry: &mut StepRegistry) {
    registry
        .register("navigate", navigate::build)
        .register("click", click::build)
        .register("authenticate", authenticate::build)
        .register("extract", extract::build)
        .register("fetch-file", download::build_single)
        .register("fetch-files-batch", download::build_batch)
        .register("submit-form", submit_form::build)
        .register("end-session", end_session::build)
        .register("script", script::build)
        .register("command", command::build)
        .register("alert", alert::build);

    registry
        .alias("open", "navigate")
        .alias("login", "authenticate")
        .alias("logout", "end-session")
        .alias("scrape", "extract")
        .alias("peruse", "extract")
        .alias("download", "fetch-file")
        .alias("download_multiple", "fetch-files-batch")
        .alias("submit_form", "submit-form")
        .alias("dialog", "alert");
}

/// A parameter value that never shows up in logs or debug output.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

fn locator(
    build: &BuildContext<'_>,
    field: &str,
    strategy: LocatorStrategy,
    value: &str,
) -> EngineResult<Locator> {
    if value.trim().is_empty() {
        return Err(build.invalid(format!("{field} must not be empty")));
    }
    Ok(Locator::new(strategy, value))
}

fn seconds_or(value: Option<u64>, default: u64) -> Duration {
    Duration::from_secs(value.unwrap_or(default))
}

fn default_true() -> bool {
    true
}
