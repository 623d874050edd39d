use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::time::timeout;
use tracing::debug;
use url::Url;

use crate::driver::{BrowserResult, Driver};
use crate::engine::{BuildContext, Context, EngineResult, Step, StepOutcome, StepSpec};

use super::seconds_or;

const DEFAULT_NAVIGATION_TIMEOUT_SECONDS: u64 = 30;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct NavigateParams {
    url: String,
    #[serde(default)]
    save_dom: bool,
    #[serde(default)]
    timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct NavigateStep {
    name: String,
    url: Url,
    save_dom: bool,
    timeout: Duration,
}

impl NavigateStep {
    pub fn new(name: impl Into<String>, url: Url) -> Self {
        Self {
            name: name.into(),
            url,
            save_dom: false,
            timeout: Duration::from_secs(DEFAULT_NAVIGATION_TIMEOUT_SECONDS),
        }
    }

    /// Stores the page source under `<name>_dom` after loading.
    pub fn saving_dom(mut self) -> Self {
        self.save_dom = true;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

pub(super) fn build(spec: &StepSpec, build: &BuildContext<'_>) -> EngineResult<Box<dyn Step>> {
    let params: NavigateParams = build.params(spec)?;
    let url = Url::parse(&params.url)
        .map_err(|err| build.invalid(format!("invalid url '{}': {err}", params.url)))?;
    let mut step = NavigateStep::new(build.name(), url).with_timeout(seconds_or(
        params.timeout_seconds,
        DEFAULT_NAVIGATION_TIMEOUT_SECONDS,
    ));
    if params.save_dom {
        step = step.saving_dom();
    }
    Ok(Box::new(step))
}

#[async_trait]
impl Step for NavigateStep {
    fn describe(&self) -> String {
        format!("navigate to {}", self.url)
    }

    async fn execute(&self, driver: &dyn Driver, ctx: &mut Context) -> BrowserResult<StepOutcome> {
        match timeout(self.timeout, driver.navigate(self.url.as_str())).await {
            Ok(result) => result?,
            Err(_) => {
                return Ok(StepOutcome::failure(format!(
                    "navigation to {} did not finish within {}s",
                    self.url,
                    self.timeout.as_secs()
                )))
            }
        }

        let current = driver
            .current_url()
            .await?
            .unwrap_or_else(|| self.url.to_string());
        debug!(url = %current, "page loaded");
        ctx.set("current_url", current);

        if self.save_dom {
            let source = driver.page_source().await?;
            ctx.set(format!("{}_dom", self.name), source);
        }
        Ok(StepOutcome::Success)
    }
}
