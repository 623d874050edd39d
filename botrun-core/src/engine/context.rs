use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use super::bridge::{BridgeHandle, BridgeReport, CallbackBridge};

/// Files declared through the callback bridge, as an array of paths.
pub const PRODUCED_FILES_KEY: &str = "produced_files";

/// Run-scoped store shared by every step of one run.
#[derive(Debug, Default)]
pub struct Context {
    values: HashMap<String, Value>,
    pub cookies: HashMap<String, String>,
    pub headers: HashMap<String, String>,
    pub session_active: bool,
    bridge: CallbackBridge,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a Value) -> &'a Value {
        self.values.get(key).unwrap_or(default)
    }

    /// Typed read; `None` when missing or of a different shape.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.values
            .get(key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    pub fn flag(&self, key: &str) -> bool {
        matches!(self.values.get(key), Some(Value::Bool(true)))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    /// Stores any serializable record; falls back to `null` if it cannot be encoded.
    pub fn set_record<T: Serialize>(&mut self, key: impl Into<String>, record: &T) {
        let value = serde_json::to_value(record).unwrap_or(Value::Null);
        self.values.insert(key.into(), value);
    }

    pub fn merge(&mut self, partial: Map<String, Value>) {
        self.values.extend(partial);
    }

    /// Appends to the array under `key`, replacing any non-array value.
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let entry = self
            .values
            .entry(key.into())
            .or_insert_with(|| Value::Array(Vec::new()));
        if !entry.is_array() {
            *entry = Value::Array(Vec::new());
        }
        if let Value::Array(items) = entry {
            items.push(value.into());
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    pub fn values(&self) -> &HashMap<String, Value> {
        &self.values
    }

    pub fn bridge(&self) -> BridgeHandle {
        self.bridge.handle()
    }

    /// Drains pending bridge events and records declared files under
    /// [`PRODUCED_FILES_KEY`].
    pub fn drain_bridge(&mut self) -> BridgeReport {
        let report = self.bridge.drain();
        for artifact in &report.files {
            let path = artifact.path.to_string_lossy().into_owned();
            self.push(PRODUCED_FILES_KEY, path);
        }
        report
    }

    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            values: self.values.clone(),
            cookies: self.cookies.clone(),
            headers: self.headers.clone(),
            session_active: self.session_active,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ContextSnapshot {
    pub values: HashMap<String, Value>,
    pub cookies: HashMap<String, String>,
    pub headers: HashMap<String, String>,
    pub session_active: bool,
}
