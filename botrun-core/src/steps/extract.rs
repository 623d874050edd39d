use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::driver::{BrowserResult, Driver, ElementSnapshot, Locator, LocatorStrategy};
use crate::engine::{BuildContext, Context, EngineResult, Step, StepOutcome, StepSpec};

use super::locator;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ExtractParams {
    #[serde(alias = "selector")]
    locator: String,
    #[serde(default)]
    by: LocatorStrategy,
    #[serde(default)]
    attribute: Option<String>,
    #[serde(default, alias = "key", alias = "output_key")]
    context_key: Option<String>,
    #[serde(default)]
    wait_seconds: Option<u64>,
}

/// Collects text or one attribute from every match. No match is not a
/// failure: the key is set to an empty list.
#[derive(Debug, Clone)]
pub struct ExtractStep {
    locator: Locator,
    attribute: Option<String>,
    context_key: String,
    wait: Option<Duration>,
}

impl ExtractStep {
    pub fn new(locator: Locator, context_key: impl Into<String>) -> Self {
        Self {
            locator,
            attribute: None,
            context_key: context_key.into(),
            wait: None,
        }
    }

    pub fn with_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.attribute = Some(attribute.into());
        self
    }

    fn value_of(&self, element: &ElementSnapshot) -> Value {
        match &self.attribute {
            Some(name) => element
                .attribute(name)
                .map(|value| Value::String(value.to_string()))
                .unwrap_or(Value::Null),
            None => Value::String(
                element
                    .text
                    .as_deref()
                    .map(str::trim)
                    .unwrap_or_default()
                    .to_string(),
            ),
        }
    }
}

pub(super) fn build(spec: &StepSpec, build: &BuildContext<'_>) -> EngineResult<Box<dyn Step>> {
    let params: ExtractParams = build.params(spec)?;
    let target = locator(build, "locator", params.by, &params.locator)?;
    let key = params
        .context_key
        .unwrap_or_else(|| build.name().to_string());
    let mut step = ExtractStep::new(target, key);
    if let Some(attribute) = params.attribute {
        step = step.with_attribute(attribute);
    }
    step.wait = params.wait_seconds.map(Duration::from_secs);
    Ok(Box::new(step))
}

#[async_trait]
impl Step for ExtractStep {
    fn describe(&self) -> String {
        match &self.attribute {
            Some(attribute) => format!("extract @{attribute} of {}", self.locator),
            None => format!("extract text of {}", self.locator),
        }
    }

    async fn execute(&self, driver: &dyn Driver, ctx: &mut Context) -> BrowserResult<StepOutcome> {
        if let Some(wait) = self.wait {
            driver.wait_for(&self.locator, wait).await?;
        }
        let elements = driver.find_all(&self.locator).await?;
        let values: Vec<Value> = elements.iter().map(|element| self.value_of(element)).collect();
        info!(
            locator = %self.locator,
            matches = values.len(),
            key = %self.context_key,
            "extracted values"
        );
        ctx.set(self.context_key.clone(), Value::Array(values));
        Ok(StepOutcome::Success)
    }
}
