//! Workflow documents: the bot header, declared variables and the ordered
//! step list, in YAML or JSON.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::config::RunnerConfig;
use crate::driver::DriverFactory;
use crate::engine::{EngineResult, Notifier, Orchestrator, StepInstance, StepRegistry, StepSpec};
use crate::error::{ConfigError, Result};
use crate::vars::{ResolveMode, VariableResolver, VariableResult, Variables};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotSection {
    pub name: String,
    pub headless: Option<bool>,
    pub debug: bool,
    pub correlation_id: Option<Uuid>,
}

impl Default for BotSection {
    fn default() -> Self {
        Self {
            name: "botrun".to_string(),
            headless: None,
            debug: false,
            correlation_id: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkflowDocument {
    #[serde(default)]
    pub bot: BotSection,
    #[serde(default)]
    pub variables: BTreeMap<String, Value>,
    #[serde(default, alias = "actions")]
    pub steps: Vec<StepSpec>,
}

/// A workflow with variables resolved and every step instantiated.
#[derive(Debug)]
pub struct PreparedWorkflow {
    pub bot: BotSection,
    pub variables: Variables,
    pub steps: Vec<StepInstance>,
}

impl PreparedWorkflow {
    pub fn into_orchestrator(
        self,
        factory: Arc<dyn DriverFactory>,
        notifier: Option<Arc<dyn Notifier>>,
    ) -> Orchestrator {
        let mut orchestrator = Orchestrator::new(self.bot.name, factory)
            .with_optional_notifier(notifier)
            .add_steps(self.steps);
        if let Some(id) = self.bot.correlation_id {
            orchestrator = orchestrator.with_correlation_id(id);
        }
        orchestrator
    }
}

impl WorkflowDocument {
    pub fn from_yaml_str(text: &str) -> serde_yaml::Result<Self> {
        serde_yaml::from_str(text)
    }

    pub fn from_json_str(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Declared variables as strings; scalars are rendered, `null` is empty.
    pub fn declared_variables(&self) -> BTreeMap<String, String> {
        self.variables
            .iter()
            .map(|(name, value)| {
                let text = match value {
                    Value::Null => String::new(),
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                };
                (name.clone(), text)
            })
            .collect()
    }

    pub fn resolve_variables(
        &self,
        environment: &HashMap<String, String>,
        mode: ResolveMode,
    ) -> VariableResult<Variables> {
        let declared = self.declared_variables();
        VariableResolver::new(&declared, environment)
            .with_mode(mode)
            .into_variables()
    }

    /// Step records with `${NAME}` tokens expanded in names and parameters.
    pub fn expanded_steps(&self, variables: &Variables) -> VariableResult<Vec<StepSpec>> {
        self.steps
            .iter()
            .map(|spec| {
                let mut expanded = spec.clone();
                if let Some(name) = &spec.name {
                    expanded.name = Some(variables.expand_str(name)?);
                }
                if let Value::Object(parameters) =
                    variables.expand_value(&Value::Object(spec.parameters.clone()))?
                {
                    expanded.parameters = parameters;
                }
                Ok(expanded)
            })
            .collect()
    }

    pub fn prepare(
        &self,
        registry: &StepRegistry,
        config: &RunnerConfig,
        environment: &HashMap<String, String>,
    ) -> EngineResult<PreparedWorkflow> {
        let variables = self.resolve_variables(environment, config.variables.mode())?;
        debug!(count = variables.resolved().len(), "variables resolved");
        let specs = self.expanded_steps(&variables)?;
        let steps = registry.instantiate_all(&specs, &config.defaults)?;
        Ok(PreparedWorkflow {
            bot: self.bot.clone(),
            variables,
            steps,
        })
    }
}

/// Loads a workflow, picking the format from the file extension.
pub fn load_workflow<P: AsRef<Path>>(path: P) -> Result<WorkflowDocument> {
    let path = path.as_ref();
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    let content = || {
        std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            source,
            path: path.to_path_buf(),
        })
    };
    match extension.as_deref() {
        Some("yaml") | Some("yml") => {
            WorkflowDocument::from_yaml_str(&content()?).map_err(|source| ConfigError::Yaml {
                source,
                path: path.to_path_buf(),
            })
        }
        Some("json") => {
            WorkflowDocument::from_json_str(&content()?).map_err(|source| ConfigError::Json {
                source,
                path: path.to_path_buf(),
            })
        }
        _ => Err(ConfigError::UnsupportedFormat {
            path: path.to_path_buf(),
        }),
    }
}
