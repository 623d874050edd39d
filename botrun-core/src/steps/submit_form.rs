use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::info;

use crate::driver::{BrowserResult, Driver, Locator, LocatorStrategy};
use crate::engine::{BuildContext, Context, EngineResult, PaceRange, Step, StepOutcome, StepSpec};

use super::{locator, seconds_or};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    #[default]
    Text,
    Password,
    Email,
    Number,
    Textarea,
    Select,
    Checkbox,
    Radio,
    #[serde(other)]
    Other,
}

impl FieldType {
    fn is_toggle(self) -> bool {
        matches!(self, FieldType::Checkbox | FieldType::Radio)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FieldParams {
    #[serde(alias = "selector")]
    locator: String,
    #[serde(default)]
    value: Value,
    #[serde(default, alias = "type")]
    field_type: FieldType,
    #[serde(default)]
    by: Option<LocatorStrategy>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SubmitFormParams {
    #[serde(alias = "form_fields")]
    fields: Vec<FieldParams>,
    #[serde(alias = "submit_button", alias = "submit_selector")]
    submit_locator: String,
    #[serde(default, alias = "success_selector")]
    success_indicator: Option<String>,
    #[serde(default)]
    by: LocatorStrategy,
    #[serde(default)]
    verification_timeout_seconds: Option<u64>,
    #[serde(default)]
    element_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct FormField {
    pub locator: Locator,
    pub value: Value,
    pub field_type: FieldType,
}

impl FormField {
    fn text(&self) -> String {
        match &self.value {
            Value::Null => String::new(),
            Value::String(text) => text.clone(),
            other => other.to_string(),
        }
    }

    fn is_checked(&self) -> bool {
        match &self.value {
            Value::Bool(flag) => *flag,
            Value::Number(number) => number.as_f64().map(|n| n != 0.0).unwrap_or(false),
            Value::String(text) => !matches!(
                text.trim().to_ascii_lowercase().as_str(),
                "" | "0" | "false" | "no" | "off"
            ),
            _ => false,
        }
    }
}

/// Fills fields in order and submits. A per-step flag keeps retries from
/// submitting the same form twice.
#[derive(Debug, Clone)]
pub struct SubmitFormStep {
    name: String,
    fields: Vec<FormField>,
    submit: Locator,
    success_indicator: Option<Locator>,
    verification_timeout: Duration,
    element_timeout: Duration,
    pause: PaceRange,
}

pub(super) fn build(spec: &StepSpec, build: &BuildContext<'_>) -> EngineResult<Box<dyn Step>> {
    let params: SubmitFormParams = build.params(spec)?;
    if params.fields.is_empty() {
        return Err(build.invalid("fields must list at least one form field"));
    }
    let fields = params
        .fields
        .into_iter()
        .map(|field| {
            Ok(FormField {
                locator: locator(
                    build,
                    "fields.locator",
                    field.by.unwrap_or(params.by),
                    &field.locator,
                )?,
                value: field.value,
                field_type: field.field_type,
            })
        })
        .collect::<EngineResult<Vec<_>>>()?;
    let success_indicator = params
        .success_indicator
        .as_deref()
        .map(|value| locator(build, "success_indicator", params.by, value))
        .transpose()?;
    let defaults = build.defaults();
    Ok(Box::new(SubmitFormStep {
        name: build.name().to_string(),
        fields,
        submit: locator(build, "submit_locator", params.by, &params.submit_locator)?,
        success_indicator,
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

impl SubmitFormStep {
    /// Field values keyed by locator, passwords left out.
    fn form_data(&self) -> Map<String, Value> {
        self.fields
            .iter()
            .filter(|field| field.field_type != FieldType::Password)
            .map(|field| (field.locator.value.clone(), field.value.clone()))
            .collect()
    }

    async fn fill(&self, driver: &dyn Driver) -> BrowserResult<Option<StepOutcome>> {
        for field in &self.fields {
            if !driver.wait_for(&field.locator, self.element_timeout).await? {
                return Ok(Some(StepOutcome::failure(format!(
                    "form field {} not found",
                    field.locator
                ))));
            }
            if field.field_type.is_toggle() {
                if field.is_checked() {
                    driver.click(&field.locator).await?;
                }
            } else {
                driver.type_text(&field.locator, &field.text()).await?;
            }
            self.pause.pause().await;
        }
        Ok(None)
    }
}

#[async_trait]
impl Step for SubmitFormStep {
    fn describe(&self) -> String {
        format!("submit {} fields via {}", self.fields.len(), self.submit)
    }

    async fn execute(&self, driver: &dyn Driver, ctx: &mut Context) -> BrowserResult<StepOutcome> {
        let submitted_flag = format!("{}.submitted", self.name);
        if ctx.flag(&submitted_flag) {
            info!(step = %self.name, "form already submitted, verifying only");
        } else {
            if let Some(failure) = self.fill(driver).await? {
                return Ok(failure);
            }
            driver.click(&self.submit).await?;
            ctx.set(submitted_flag, true);
        }

        if let Some(indicator) = &self.success_indicator {
            if !driver.wait_for(indicator, self.verification_timeout).await? {
                return Ok(StepOutcome::failure(format!(
                    "form submission not confirmed: {indicator} absent after {}s",
                    self.verification_timeout.as_secs()
                )));
            }
        }
        ctx.set("form_submitted", true);
        ctx.set("form_data", Value::Object(self.form_data()));
        Ok(StepOutcome::Success)
    }
}
