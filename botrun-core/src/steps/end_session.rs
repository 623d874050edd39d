use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;
use url::Url;

use crate::driver::{BrowserResult, Driver, Locator, LocatorStrategy};
use crate::engine::{BuildContext, Context, EngineResult, Step, StepOutcome, StepSpec};

use super::{locator, seconds_or};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct EndSessionParams {
    #[serde(default)]
    logout_url: Option<String>,
    #[serde(default, alias = "logout_selector")]
    logout_locator: Option<String>,
    #[serde(default)]
    by: LocatorStrategy,
    #[serde(default)]
    element_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone)]
enum Termination {
    Url(Url),
    Control(Locator),
    LocalOnly,
}

/// Logs out and marks the session inactive, whichever way it went.
#[derive(Debug, Clone)]
pub struct EndSessionStep {
    termination: Termination,
    element_timeout: Duration,
}

pub(super) fn build(spec: &StepSpec, build: &BuildContext<'_>) -> EngineResult<Box<dyn Step>> {
    let params: EndSessionParams = build.params(spec)?;
    let termination = match (&params.logout_url, &params.logout_locator) {
        (Some(raw), _) => Termination::Url(
            Url::parse(raw).map_err(|err| build.invalid(format!("invalid url '{raw}': {err}")))?,
        ),
        (None, Some(value)) => {
            Termination::Control(locator(build, "logout_locator", params.by, value)?)
        }
        (None, None) => Termination::LocalOnly,
    };
    Ok(Box::new(EndSessionStep {
        termination,
        element_timeout: seconds_or(
            params.element_timeout_seconds,
            build.defaults().element_timeout_seconds,
        ),
    }))
}

impl EndSessionStep {
    async fn terminate(&self, driver: &dyn Driver) -> BrowserResult<StepOutcome> {
        match &self.termination {
            Termination::Url(url) => driver.navigate(url.as_str()).await?,
            Termination::Control(control) => {
                if !driver.wait_for(control, self.element_timeout).await? {
                    return Ok(StepOutcome::failure(format!(
                        "logout control {control} not found"
                    )));
                }
                driver.click(control).await?;
            }
            Termination::LocalOnly => {}
        }
        Ok(StepOutcome::Success)
    }
}

#[async_trait]
impl Step for EndSessionStep {
    fn describe(&self) -> String {
        match &self.termination {
            Termination::Url(url) => format!("log out via {url}"),
            Termination::Control(control) => format!("log out via {control}"),
            Termination::LocalOnly => "end session".to_string(),
        }
    }

    async fn execute(&self, driver: &dyn Driver, ctx: &mut Context) -> BrowserResult<StepOutcome> {
        let result = self.terminate(driver).await;
        ctx.set("logged_in", false);
        ctx.session_active = false;
        ctx.cookies.clear();
        info!("session ended");
        result
    }
}
