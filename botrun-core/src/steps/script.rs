use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::driver::{BrowserResult, Driver};
use crate::engine::{
    BuildContext, Context, DelegatedScript, EngineResult, RetryPolicy, Step, StepOutcome,
    StepSpec,
};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ScriptParams {
    #[serde(alias = "script")]
    name: String,
    #[serde(default)]
    config: Value,
}

/// Runs a [`DelegatedScript`] and hands it the run's callback bridge.
#[derive(Clone)]
pub struct ScriptStep {
    label: String,
    script: Arc<dyn DelegatedScript>,
    config: Value,
    policy: Option<RetryPolicy>,
}

impl ScriptStep {
    pub fn new(label: impl Into<String>, script: Arc<dyn DelegatedScript>, config: Value) -> Self {
        Self {
            label: label.into(),
            script,
            config,
            policy: None,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = Some(policy);
        self
    }
}

impl fmt::Debug for ScriptStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptStep")
            .field("label", &self.label)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

pub(super) fn build(spec: &StepSpec, build: &BuildContext<'_>) -> EngineResult<Box<dyn Step>> {
    let params: ScriptParams = build.params(spec)?;
    let script = build.script(&params.name)?;
    Ok(Box::new(ScriptStep::new(
        format!("script {}", params.name),
        script,
        params.config,
    )))
}

#[async_trait]
impl Step for ScriptStep {
    fn describe(&self) -> String {
        self.label.clone()
    }

    fn retry_policy(&self) -> Option<RetryPolicy> {
        self.policy.clone()
    }

    async fn execute(&self, driver: &dyn Driver, ctx: &mut Context) -> BrowserResult<StepOutcome> {
        match self.script.run(driver, &self.config, ctx.bridge()).await {
            Ok(()) => Ok(StepOutcome::Success),
            Err(err) => Ok(StepOutcome::failure(format!("{} failed: {err}", self.label))),
        }
    }
}
