use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::driver::{BrowserResult, Driver, Locator, LocatorStrategy};
use crate::engine::{BuildContext, Context, EngineResult, PaceRange, Step, StepOutcome, StepSpec};

use super::{default_true, locator, seconds_or};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ClickParams {
    #[serde(alias = "selector")]
    locator: String,
    #[serde(default)]
    by: LocatorStrategy,
    #[serde(default)]
    timeout_seconds: Option<u64>,
    #[serde(default = "default_true")]
    pause_after: bool,
}

#[derive(Debug, Clone)]
pub struct ClickStep {
    locator: Locator,
    timeout: Duration,
    pause: PaceRange,
}

impl ClickStep {
    pub fn new(locator: Locator, timeout: Duration) -> Self {
        Self {
            locator,
            timeout,
            pause: PaceRange::none(),
        }
    }

    pub fn with_pause(mut self, pause: PaceRange) -> Self {
        self.pause = pause;
        self
    }
}

pub(super) fn build(spec: &StepSpec, build: &BuildContext<'_>) -> EngineResult<Box<dyn Step>> {
    let params: ClickParams = build.params(spec)?;
    let target = locator(build, "locator", params.by, &params.locator)?;
    let timeout = seconds_or(
        params.timeout_seconds,
        build.defaults().element_timeout_seconds,
    );
    let mut step = ClickStep::new(target, timeout);
    if params.pause_after {
        step = step.with_pause(build.pacing());
    }
    Ok(Box::new(step))
}

#[async_trait]
impl Step for ClickStep {
    fn describe(&self) -> String {
        format!("click {}", self.locator)
    }

    async fn execute(&self, driver: &dyn Driver, _ctx: &mut Context) -> BrowserResult<StepOutcome> {
        if !driver.wait_for(&self.locator, self.timeout).await? {
            return Ok(StepOutcome::failure(format!(
                "element {} not present after {}s",
                self.locator,
                self.timeout.as_secs()
            )));
        }
        driver.click(&self.locator).await?;
        self.pause.pause().await;
        Ok(StepOutcome::Success)
    }
}
