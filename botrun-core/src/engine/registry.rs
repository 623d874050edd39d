use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::config::DefaultsSection;

use super::bridge::DelegatedScript;
use super::error::{EngineError, EngineResult};
use super::pacing::PaceRange;
use super::retry::RetryPolicy;
use super::step::{Step, StepInstance, StepSpec};

pub type StepConstructor =
    Arc<dyn Fn(&StepSpec, &BuildContext<'_>) -> EngineResult<Box<dyn Step>> + Send + Sync>;

/// What a step constructor can see while building one step.
pub struct BuildContext<'a> {
    name: &'a str,
    defaults: &'a DefaultsSection,
    scripts: &'a HashMap<String, Arc<dyn DelegatedScript>>,
    pacing: PaceRange,
}

impl<'a> BuildContext<'a> {
    pub fn name(&self) -> &str {
        self.name
    }

    pub fn defaults(&self) -> &DefaultsSection {
        self.defaults
    }

    /// Pause bounds for pauses inside the step itself.
    pub fn pacing(&self) -> PaceRange {
        self.pacing
    }

    pub fn params<T: DeserializeOwned>(&self, spec: &StepSpec) -> EngineResult<T> {
        spec.parameters_as()
            .map_err(|source| EngineError::InvalidParameters {
                step: self.name.to_string(),
                kind: spec.kind.clone(),
                source,
            })
    }

    pub fn invalid(&self, message: impl Into<String>) -> EngineError {
        EngineError::InvalidParameter {
            step: self.name.to_string(),
            message: message.into(),
        }
    }

    pub fn script(&self, name: &str) -> EngineResult<Arc<dyn DelegatedScript>> {
        self.scripts
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownScript {
                name: name.to_string(),
            })
    }
}

/// Maps step kinds to constructors.
#[derive(Clone, Default)]
pub struct StepRegistry {
    constructors: BTreeMap<String, StepConstructor>,
    aliases: BTreeMap<String, String>,
    scripts: HashMap<String, Arc<dyn DelegatedScript>>,
}

impl StepRegistry {
    /// A registry with no kinds at all.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::steps::register_builtins(&mut registry);
        registry
    }

    pub fn register<F>(&mut self, kind: impl Into<String>, constructor: F) -> &mut Self
    where
        F: Fn(&StepSpec, &BuildContext<'_>) -> EngineResult<Box<dyn Step>> + Send + Sync + 'static,
    {
        self.constructors
            .insert(kind.into().to_ascii_lowercase(), Arc::new(constructor));
        self
    }

    pub fn alias(&mut self, alias: impl Into<String>, kind: impl Into<String>) -> &mut Self {
        self.aliases
            .insert(alias.into().to_ascii_lowercase(), kind.into());
        self
    }

    pub fn register_script(
        &mut self,
        name: impl Into<String>,
        script: Arc<dyn DelegatedScript>,
    ) -> &mut Self {
        self.scripts.insert(name.into(), script);
        self
    }

    /// Canonical kinds, sorted.
    pub fn kinds(&self) -> Vec<String> {
        self.constructors.keys().cloned().collect()
    }

    pub fn aliases(&self) -> impl Iterator<Item = (&str, &str)> {
        self.aliases
            .iter()
            .map(|(alias, kind)| (alias.as_str(), kind.as_str()))
    }

    pub fn scripts(&self) -> Vec<String> {
        let mut names: Vec<String> = self.scripts.keys().cloned().collect();
        names.sort();
        names
    }

    /// Matches case-insensitively and treats `_` like `-`.
    pub fn canonical_kind(&self, kind: &str) -> Option<&str> {
        let key = kind.trim().to_ascii_lowercase();
        let dashed = key.replace('_', "-");
        [key, dashed].iter().find_map(|candidate| {
            if let Some((canonical, _)) = self.constructors.get_key_value(candidate.as_str()) {
                return Some(canonical.as_str());
            }
            self.aliases
                .get(candidate.as_str())
                .filter(|target| self.constructors.contains_key(target.as_str()))
                .map(String::as_str)
        })
    }

    pub fn instantiate(
        &self,
        spec: &StepSpec,
        defaults: &DefaultsSection,
    ) -> EngineResult<StepInstance> {
        if spec.kind.trim().is_empty() {
            return Err(EngineError::MissingKind {
                step: spec.name.clone().unwrap_or_else(|| "<unnamed>".to_string()),
            });
        }
        let kind = self
            .canonical_kind(&spec.kind)
            .ok_or_else(|| EngineError::UnknownStepKind {
                kind: spec.kind.clone(),
                available: self.kinds(),
            })?;
        let constructor = self
            .constructors
            .get(kind)
            .ok_or_else(|| EngineError::UnknownStepKind {
                kind: spec.kind.clone(),
                available: self.kinds(),
            })?;

        let name = spec.display_name().to_string();
        if spec.retry_count == Some(0) {
            return Err(EngineError::InvalidParameter {
                step: name,
                message: "retry_count must be at least 1".into(),
            });
        }

        let pacing = PaceRange::validated(
            spec.wait_lower.unwrap_or(defaults.wait_lower),
            spec.wait_upper.unwrap_or(defaults.wait_upper),
            "wait",
        )
        .map_err(|message| EngineError::InvalidParameter {
            step: name.clone(),
            message,
        })?;
        let build = BuildContext {
            name: &name,
            defaults,
            scripts: &self.scripts,
            pacing,
        };
        let step = constructor(spec, &build)?;

        let base = step
            .retry_policy()
            .unwrap_or_else(|| RetryPolicy::from_defaults(defaults));
        let has_wait = spec.wait_lower.is_some() || spec.wait_upper.is_some();
        let policy = RetryPolicy::new(
            spec.retry_count.unwrap_or(base.retry_count),
            spec.retry_delay_seconds
                .map(Duration::from_secs)
                .unwrap_or(base.retry_delay),
            if has_wait { pacing } else { base.pacing },
        );

        Ok(StepInstance::new(name, kind, step)
            .with_policy(policy)
            .with_enabled(spec.enabled))
    }

    /// Builds every step, stopping at the first invalid one.
    pub fn instantiate_all(
        &self,
        specs: &[StepSpec],
        defaults: &DefaultsSection,
    ) -> EngineResult<Vec<StepInstance>> {
        if specs.is_empty() {
            return Err(EngineError::EmptyWorkflow);
        }
        specs
            .iter()
            .map(|spec| self.instantiate(spec, defaults))
            .collect()
    }
}

impl fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepRegistry")
            .field("kinds", &self.kinds())
            .field("aliases", &self.aliases)
            .field("scripts", &self.scripts())
            .finish()
    }
}
