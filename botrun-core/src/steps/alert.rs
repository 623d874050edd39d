use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::time::{sleep, Instant};
use tracing::info;

use crate::driver::{BrowserResult, Driver, JsDialog};
use crate::engine::{BuildContext, Context, EngineResult, PaceRange, Step, StepOutcome, StepSpec};

use super::{default_true, seconds_or};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Context key describing the last dialog this kind closed.
pub const LAST_ALERT_KEY: &str = "last_alert_handled";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertAction {
    #[default]
    Accept,
    Dismiss,
    /// Reads the message and leaves the dialog open.
    GetText,
    /// Types into a prompt, then accepts it.
    SendKeys,
}

impl AlertAction {
    fn as_str(&self) -> &'static str {
        match self {
            AlertAction::Accept => "accept",
            AlertAction::Dismiss => "dismiss",
            AlertAction::GetText => "get_text",
            AlertAction::SendKeys => "send_keys",
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AlertParams {
    #[serde(default)]
    action: AlertAction,
    #[serde(default, alias = "text")]
    text_to_send: Option<String>,
    #[serde(default)]
    expected_text: Option<String>,
    #[serde(default, alias = "timeout")]
    timeout_seconds: Option<u64>,
    #[serde(default = "default_true")]
    wait_for_alert: bool,
    #[serde(default, alias = "context_key")]
    store_text_in_context: Option<String>,
}

/// Handles a JavaScript `alert`, `confirm` or `prompt` dialog.
#[derive(Debug, Clone)]
pub struct AlertStep {
    action: AlertAction,
    text_to_send: Option<String>,
    expected_text: Option<String>,
    timeout: Option<Duration>,
    store_key: Option<String>,
    pause: PaceRange,
}

impl AlertStep {
    pub fn new(action: AlertAction) -> Self {
        Self {
            action,
            text_to_send: None,
            expected_text: None,
            timeout: None,
            store_key: None,
            pause: PaceRange::none(),
        }
    }

    async fn find_dialog(&self, driver: &dyn Driver) -> BrowserResult<Option<JsDialog>> {
        let Some(timeout) = self.timeout else {
            return driver.dialog().await;
        };
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(dialog) = driver.dialog().await? {
                return Ok(Some(dialog));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            sleep(POLL_INTERVAL).await;
        }
    }
}

pub(super) fn build(spec: &StepSpec, build: &BuildContext<'_>) -> EngineResult<Box<dyn Step>> {
    let params: AlertParams = build.params(spec)?;
    if params.action == AlertAction::SendKeys && params.text_to_send.is_none() {
        return Err(build.invalid("send_keys requires text_to_send"));
    }
    if matches!(&params.store_text_in_context, Some(key) if key.trim().is_empty()) {
        return Err(build.invalid("store_text_in_context must not be empty"));
    }
    let timeout = params.wait_for_alert.then(|| {
        seconds_or(
            params.timeout_seconds,
            build.defaults().element_timeout_seconds,
        )
    });
    Ok(Box::new(AlertStep {
        action: params.action,
        text_to_send: params.text_to_send,
        expected_text: params.expected_text,
        timeout,
        store_key: params.store_text_in_context,
        pause: build.pacing(),
    }))
}

#[async_trait]
impl Step for AlertStep {
    fn describe(&self) -> String {
        format!("{} javascript dialog", self.action.as_str())
    }

    async fn execute(&self, driver: &dyn Driver, ctx: &mut Context) -> BrowserResult<StepOutcome> {
        let Some(dialog) = self.find_dialog(driver).await? else {
            return Ok(StepOutcome::failure(match self.timeout {
                Some(timeout) => format!("no dialog appeared within {}s", timeout.as_secs()),
                None => "no dialog is open".to_string(),
            }));
        };
        self.pause.pause().await;

        if let Some(key) = &self.store_key {
            ctx.set(key.as_str(), dialog.message.as_str());
        }
        if let Some(expected) = &self.expected_text {
            if !dialog.message.contains(expected.as_str()) {
                return Ok(StepOutcome::failure(format!(
                    "dialog text {:?} does not contain {expected:?}",
                    dialog.message
                )));
            }
        }

        match self.action {
            AlertAction::GetText => return Ok(StepOutcome::Success),
            AlertAction::Accept => driver.handle_dialog(true, None).await?,
            AlertAction::Dismiss => driver.handle_dialog(false, None).await?,
            AlertAction::SendKeys => {
                driver
                    .handle_dialog(true, self.text_to_send.as_deref())
                    .await?
            }
        }
        info!(action = self.action.as_str(), kind = ?dialog.kind, "dialog handled");
        ctx.set(
            LAST_ALERT_KEY,
            json!({"text": dialog.message, "action": self.action.as_str()}),
        );
        Ok(StepOutcome::Success)
    }
}
