use std::fmt;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::driver::{BrowserResult, Driver};

use super::context::Context;
use super::retry::RetryPolicy;

/// One step record as written in a workflow document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSpec {
    #[serde(alias = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, alias = "retries", skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
    #[serde(default, alias = "retry_delay", skip_serializing_if = "Option::is_none")]
    pub retry_delay_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_lower: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_upper: Option<f64>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(flatten)]
    pub parameters: Map<String, Value>,
}

fn default_enabled() -> bool {
    true
}

impl StepSpec {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: None,
            retry_count: None,
            retry_delay_seconds: None,
            wait_lower: None,
            wait_upper: None,
            enabled: true,
            parameters: Map::new(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_retries(mut self, retry_count: u32, retry_delay_seconds: u64) -> Self {
        self.retry_count = Some(retry_count);
        self.retry_delay_seconds = Some(retry_delay_seconds);
        self
    }

    pub fn with_wait(mut self, lower: f64, upper: f64) -> Self {
        self.wait_lower = Some(lower);
        self.wait_upper = Some(upper);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Explicit name, else the kind.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.kind)
    }

    /// Decodes the free-form parameters into a typed struct.
    pub fn parameters_as<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_value(Value::Object(self.parameters.clone()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Success,
    Failure(String),
}

impl StepOutcome {
    pub fn failure(reason: impl Into<String>) -> Self {
        Self::Failure(reason.into())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            Self::Success => None,
            Self::Failure(reason) => Some(reason),
        }
    }
}

/// A unit of browser work.
///
/// `execute` reports an expected negative result as [`StepOutcome::Failure`];
/// driver faults come back as `Err`. The retry supervisor treats both (and a
/// panic) as a failed attempt.
#[async_trait]
pub trait Step: Send + Sync {
    fn describe(&self) -> String;

    /// Variant-specific retry policy, used when the step record sets none.
    fn retry_policy(&self) -> Option<RetryPolicy> {
        None
    }

    async fn execute(&self, driver: &dyn Driver, ctx: &mut Context) -> BrowserResult<StepOutcome>;
}

/// A configured step ready for the orchestrator.
pub struct StepInstance {
    name: String,
    kind: String,
    policy: RetryPolicy,
    enabled: bool,
    step: Box<dyn Step>,
}

impl StepInstance {
    pub fn new(name: impl Into<String>, kind: impl Into<String>, step: Box<dyn Step>) -> Self {
        let policy = step.retry_policy().unwrap_or_default();
        Self {
            name: name.into(),
            kind: kind.into(),
            policy,
            enabled: true,
            step,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn step(&self) -> &dyn Step {
        self.step.as_ref()
    }

    pub fn describe(&self) -> String {
        self.step.describe()
    }
}

impl fmt::Debug for StepInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepInstance")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("policy", &self.policy)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}
