//! `${NAME}` expansion over a layered namespace.
//!
//! A token is `${` followed by any run of characters other than `}`, so names
//! may contain spaces and are looked up verbatim. Lookup order is declared
//! variables, then the process environment, then the empty string. The
//! empty-string fallback means a typo in a variable name silently produces
//! an empty value; [`ResolveMode::Strict`] turns that into a configuration
//! error instead.

use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VariableError {
    #[error("cyclic variable reference: {}", chain.join(" -> "))]
    CyclicReference { chain: Vec<String> },
    #[error("unresolved variable reference ${{{name}}}")]
    Unresolved { name: String },
}

pub type VariableResult<T> = Result<T, VariableError>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveMode {
    #[default]
    Lenient,
    Strict,
}

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("valid regex"))
}

/// Snapshot of the process environment, taken once per run.
pub fn process_environment() -> HashMap<String, String> {
    std::env::vars().collect()
}

/// Resolves every declared variable with the lenient fallback policy.
pub fn resolve(
    declared: &BTreeMap<String, String>,
    environment: &HashMap<String, String>,
) -> VariableResult<BTreeMap<String, String>> {
    VariableResolver::new(declared, environment).resolve_all()
}

pub struct VariableResolver<'a> {
    declared: &'a BTreeMap<String, String>,
    environment: &'a HashMap<String, String>,
    mode: ResolveMode,
    resolved: BTreeMap<String, String>,
}

impl<'a> VariableResolver<'a> {
    pub fn new(
        declared: &'a BTreeMap<String, String>,
        environment: &'a HashMap<String, String>,
    ) -> Self {
        Self {
            declared,
            environment,
            mode: ResolveMode::Lenient,
            resolved: BTreeMap::new(),
        }
    }

    pub fn with_mode(mut self, mode: ResolveMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn resolve_all(mut self) -> VariableResult<BTreeMap<String, String>> {
        let declared = self.declared;
        for name in declared.keys() {
            let mut chain = Vec::new();
            self.resolve_name(name, &mut chain)?;
        }
        Ok(self.resolved)
    }

    /// Resolves the namespace and returns a [`Variables`] handle for
    /// expanding step parameters against it.
    pub fn into_variables(self) -> VariableResult<Variables> {
        let environment = self.environment.clone();
        let mode = self.mode;
        let resolved = self.resolve_all()?;
        Ok(Variables {
            resolved,
            environment,
            mode,
        })
    }

    fn resolve_name(&mut self, name: &str, chain: &mut Vec<String>) -> VariableResult<String> {
        if let Some(value) = self.resolved.get(name) {
            return Ok(value.clone());
        }
        if let Some(start) = chain.iter().position(|entry| entry == name) {
            let mut cycle = chain[start..].to_vec();
            cycle.push(name.to_string());
            return Err(VariableError::CyclicReference { chain: cycle });
        }
        let declared = self.declared;
        let Some(raw) = declared.get(name) else {
            return self.fallback(name);
        };

        chain.push(name.to_string());
        let mut output = String::with_capacity(raw.len());
        let mut last = 0;
        for captures in token_pattern().captures_iter(raw) {
            let Some(token) = captures.get(0) else {
                continue;
            };
            output.push_str(&raw[last..token.start()]);
            let reference = &captures[1];
            let value = if declared.contains_key(reference) {
                self.resolve_name(reference, chain)?
            } else {
                self.fallback(reference)?
            };
            output.push_str(&value);
            last = token.end();
        }
        output.push_str(&raw[last..]);
        chain.pop();

        self.resolved.insert(name.to_string(), output.clone());
        Ok(output)
    }

    fn fallback(&self, name: &str) -> VariableResult<String> {
        lookup_fallback(self.environment, self.mode, name)
    }
}

fn lookup_fallback(
    environment: &HashMap<String, String>,
    mode: ResolveMode,
    name: &str,
) -> VariableResult<String> {
    if let Some(value) = environment.get(name) {
        return Ok(value.clone());
    }
    match mode {
        ResolveMode::Strict => Err(VariableError::Unresolved {
            name: name.to_string(),
        }),
        ResolveMode::Lenient => {
            warn!(variable = name, "unresolved variable, substituting empty string");
            Ok(String::new())
        }
    }
}

/// A fully resolved namespace. Values are immutable for the rest of the run.
#[derive(Debug, Clone, Default)]
pub struct Variables {
    resolved: BTreeMap<String, String>,
    environment: HashMap<String, String>,
    mode: ResolveMode,
}

impl Variables {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.resolved.get(name).map(String::as_str)
    }

    pub fn resolved(&self) -> &BTreeMap<String, String> {
        &self.resolved
    }

    pub fn expand_str(&self, text: &str) -> VariableResult<String> {
        let mut failure = None;
        let expanded = token_pattern().replace_all(text, |captures: &Captures<'_>| {
            let name = &captures[1];
            if let Some(value) = self.resolved.get(name) {
                return value.clone();
            }
            match lookup_fallback(&self.environment, self.mode, name) {
                Ok(value) => value,
                Err(err) => {
                    failure.get_or_insert(err);
                    String::new()
                }
            }
        });
        match failure {
            Some(err) => Err(err),
            None => Ok(expand_home(&expanded)),
        }
    }

    /// Expands tokens in every string nested inside `value`.
    pub fn expand_value(&self, value: &Value) -> VariableResult<Value> {
        Ok(match value {
            Value::String(text) => Value::String(self.expand_str(text)?),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.expand_value(item))
                    .collect::<VariableResult<Vec<_>>>()?,
            ),
            Value::Object(map) => {
                let mut expanded = serde_json::Map::with_capacity(map.len());
                for (key, item) in map {
                    expanded.insert(key.clone(), self.expand_value(item)?);
                }
                Value::Object(expanded)
            }
            other => other.clone(),
        })
    }
}

fn expand_home(text: &str) -> String {
    match (text.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest).to_string_lossy().into_owned(),
        _ => text.to_string(),
    }
}
