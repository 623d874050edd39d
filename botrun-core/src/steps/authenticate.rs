use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};
use url::Url;

use crate::driver::{BrowserResult, Driver, Locator, LocatorStrategy};
use crate::engine::{BuildContext, Context, EngineResult, PaceRange, Step, StepOutcome, StepSpec};

use super::{default_true, locator, seconds_or, Secret};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AuthenticateParams {
    #[serde(default)]
    url: Option<String>,
    username: String,
    password: String,
    #[serde(alias = "username_field", alias = "username_selector")]
    username_locator: String,
    #[serde(alias = "password_field", alias = "password_selector")]
    password_locator: String,
    #[serde(alias = "submit_button", alias = "submit_selector")]
    submit_locator: String,
    #[serde(alias = "success_selector")]
    success_indicator: String,
    #[serde(default)]
    by: LocatorStrategy,
    #[serde(default = "default_true")]
    retry_with_refresh: bool,
    #[serde(default)]
    verification_timeout_seconds: Option<u64>,
    #[serde(default)]
    element_timeout_seconds: Option<u64>,
}

/// Form login confirmed by a success indicator.
#[derive(Debug, Clone)]
pub struct AuthenticateStep {
    url: Option<Url>,
    username: String,
    password: Secret,
    username_locator: Locator,
    password_locator: Locator,
    submit_locator: Locator,
    success_indicator: Locator,
    retry_with_refresh: bool,
    verification_timeout: Duration,
    element_timeout: Duration,
    pause: PaceRange,
}

pub(super) fn build(spec: &StepSpec, build: &BuildContext<'_>) -> EngineResult<Box<dyn Step>> {
    let params: AuthenticateParams = build.params(spec)?;
    let url = params
        .url
        .as_deref()
        .map(|raw| {
            Url::parse(raw).map_err(|err| build.invalid(format!("invalid url '{raw}': {err}")))
        })
        .transpose()?;
    let by = params.by;
    let defaults = build.defaults();
    Ok(Box::new(AuthenticateStep {
        url,
        username: params.username,
        password: Secret::new(params.password),
        username_locator: locator(build, "username_locator", by, &params.username_locator)?,
        password_locator: locator(build, "password_locator", by, &params.password_locator)?,
        submit_locator: locator(build, "submit_locator", by, &params.submit_locator)?,
        success_indicator: locator(build, "success_indicator", by, &params.success_indicator)?,
        retry_with_refresh: params.retry_with_refresh,
        verification_timeout: seconds_or(
            params.verification_timeout_seconds,
            defaults.verification_timeout_seconds,
        ),
        element_timeout: seconds_or(
            params.element_timeout_seconds,
            defaults.element_timeout_seconds,
        ),
        pause: build.pacing(),
    }))
}

impl AuthenticateStep {
    /// Fills and submits the form; `Some` carries a failure outcome.
    async fn submit_credentials(&self, driver: &dyn Driver) -> BrowserResult<Option<StepOutcome>> {
        if !driver
            .wait_for(&self.username_locator, self.element_timeout)
            .await?
        {
            return Ok(Some(StepOutcome::failure(format!(
                "username field {} not found",
                self.username_locator
            ))));
        }
        driver
            .type_text(&self.username_locator, &self.username)
            .await?;
        self.pause.pause().await;
        driver
            .type_text(&self.password_locator, self.password.expose())
            .await?;
        self.pause.pause().await;
        driver.click(&self.submit_locator).await?;
        Ok(None)
    }
}

#[async_trait]
impl Step for AuthenticateStep {
    fn describe(&self) -> String {
        match &self.url {
            Some(url) => format!("log in as {} at {url}", self.username),
            None => format!("log in as {}", self.username),
        }
    }

    async fn execute(&self, driver: &dyn Driver, ctx: &mut Context) -> BrowserResult<StepOutcome> {
        if let Some(url) = &self.url {
            driver.navigate(url.as_str()).await?;
            self.pause.pause().await;
        }
        if let Some(failure) = self.submit_credentials(driver).await? {
            return Ok(failure);
        }

        let mut verified = driver
            .wait_for(&self.success_indicator, self.verification_timeout)
            .await?;
        if !verified && self.retry_with_refresh {
            warn!(
                indicator = %self.success_indicator,
                "login not confirmed, reloading and trying once more"
            );
            driver.reload().await?;
            self.pause.pause().await;
            verified = !driver.find_all(&self.success_indicator).await?.is_empty();
            if !verified {
                if let Some(failure) = self.submit_credentials(driver).await? {
                    return Ok(failure);
                }
                verified = driver
                    .wait_for(&self.success_indicator, self.verification_timeout)
                    .await?;
            }
        }
        if !verified {
            return Ok(StepOutcome::failure(format!(
                "login not confirmed: {} absent after {}s",
                self.success_indicator,
                self.verification_timeout.as_secs()
            )));
        }

        ctx.set("logged_in", true);
        ctx.cookies.extend(driver.cookies().await?);
        ctx.session_active = true;
        info!(user = %self.username, cookies = ctx.cookies.len(), "session established");
        Ok(StepOutcome::Success)
    }
}
