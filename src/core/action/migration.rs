//! Versioned payload upgrades

use super::ACTION_SCHEMA_VERSION;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// One `vN -> vN+1` payload transform
pub type MigrationStep = Arc<dyn Fn(Value) -> Result<Value, String> + Send + Sync>;

/// Outcome of a bulk migration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    /// Records upgraded to the current version
    pub migrated: usize,
    /// Records left untouched because a step or validation failed
    pub not_migrated: usize,
    /// `(action id, reason)` for every record not migrated
    pub failures: Vec<(String, String)>,
}

/// Registered chain of version-to-version transforms
#[derive(Clone)]
pub struct MigrationChain {
    target: u32,
    steps: BTreeMap<u32, MigrationStep>,
}

impl fmt::Debug for MigrationChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationChain")
            .field("target", &self.target)
            .field("steps", &self.steps.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for MigrationChain {
    fn default() -> Self {
        Self::builtin()
    }
}

impl MigrationChain {
    /// Empty chain targeting `target`
    pub fn new(target: u32) -> Self {
        Self {
            target,
            steps: BTreeMap::new(),
        }
    }

    /// Chain with the built-in transforms up to the current version
    pub fn builtin() -> Self {
        Self::new(ACTION_SCHEMA_VERSION).register(1, v1_to_v2)
    }

    /// Register the transform from `from` to `from + 1`
    #[must_use]
    pub fn register<F>(mut self, from: u32, step: F) -> Self
    where
        F: Fn(Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.steps.insert(from, Arc::new(step));
        self
    }

    /// Version this chain upgrades to
    pub fn target(&self) -> u32 {
        self.target
    }

    /// Run every step from `from` up to the target
    ///
    /// # Errors
    ///
    /// Returns the failing step's reason, or a missing-step message
    pub fn upgrade(&self, from: u32, mut payload: Value) -> Result<Value, String> {
        if from > self.target {
            return Err(format!(
                "schema version {from} is newer than supported version {}",
                self.target
            ));
        }
        for version in from..self.target {
            let step = self
                .steps
                .get(&version)
                .ok_or_else(|| format!("no migration registered from v{version}"))?;
            payload = step(payload).map_err(|e| format!("v{version} -> v{}: {e}", version + 1))?;
        }
        Ok(payload)
    }
}

/// Legacy payloads were raw text, or objects carrying save-time metadata
fn v1_to_v2(payload: Value) -> Result<Value, String> {
    match payload {
        Value::String(text) => {
            let mut obj = Map::new();
            obj.insert("body".to_string(), Value::String(text));
            Ok(Value::Object(obj))
        }
        Value::Object(mut obj) => {
            obj.remove("saved_by");
            obj.remove("saved_at");
            Ok(Value::Object(obj))
        }
        other => Err(format!("cannot upgrade a {} payload", json_type(&other))),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builtin_wraps_raw_text() {
        let chain = MigrationChain::builtin();
        let upgraded = chain.upgrade(1, json!("AT+RST")).unwrap();
        assert_eq!(upgraded, json!({"body": "AT+RST"}));
    }

    #[test]
    fn test_builtin_strips_save_metadata() {
        let chain = MigrationChain::builtin();
        let legacy = json!({
            "host": "10.0.0.1",
            "port": 23,
            "saved_by": "ops",
            "saved_at": "2021-03-04T05:06:07Z"
        });
        let upgraded = chain.upgrade(1, legacy).unwrap();
        assert_eq!(upgraded, json!({"host": "10.0.0.1", "port": 23}));
    }

    #[test]
    fn test_current_version_is_noop() {
        let chain = MigrationChain::builtin();
        let payload = json!({"saved_by": "kept at current version"});
        assert_eq!(chain.upgrade(ACTION_SCHEMA_VERSION, payload.clone()).unwrap(), payload);
    }

    #[test]
    fn test_missing_step_and_future_version() {
        let chain = MigrationChain::new(3).register(2, Ok);
        assert!(chain.upgrade(1, json!({})).unwrap_err().contains("v1"));
        assert!(chain.upgrade(4, json!({})).is_err());
        assert_eq!(chain.upgrade(2, json!({"a": 1})).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn test_failing_step_is_reported() {
        let chain = MigrationChain::builtin();
        let err = chain.upgrade(1, json!(42)).unwrap_err();
        assert!(err.contains("number"));
    }
}
