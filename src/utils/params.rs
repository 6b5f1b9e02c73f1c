use crate::{
    errors::{BrokerError, Result},
    models::{Params, Plan, ServiceDefinition},
};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};

/// Request keys consumed by session derivation, never forwarded to the stack.
pub const SESSION_KEYS: [&str; 4] = [
    "region",
    "target_account_id",
    "target_role_name",
    "role_arn",
];

#[derive(Debug, Clone, Copy)]
pub struct OverridePolicy<'a> {
    pub overrides: &'a HashMap<String, String>,
    pub prescribe: bool,
}

impl<'a> OverridePolicy<'a> {
    pub fn new(overrides: &'a HashMap<String, String>, prescribe: bool) -> Self {
        Self {
            overrides,
            prescribe,
        }
    }

    /// Override keys match parameter names case-insensitively.
    pub fn is_hidden(&self, name: &str) -> bool {
        self.prescribe && self.overrides.keys().any(|key| key.eq_ignore_ascii_case(name))
    }

    /// Overrides keyed by the declared template parameter they apply to.
    fn declared_overrides(&self, definition: &ServiceDefinition) -> Vec<(String, String)> {
        definition
            .parameters
            .iter()
            .filter_map(|param| {
                self.overrides
                    .iter()
                    .find(|(key, _)| key.eq_ignore_ascii_case(&param.name))
                    .map(|(_, value)| (param.name.clone(), value.clone()))
            })
            .collect()
    }

    /// Global overrides merged with the caller's session keys.
    pub fn session_overrides(&self, params: &Params) -> HashMap<String, String> {
        let mut merged: HashMap<String, String> = self
            .overrides
            .iter()
            .filter(|(key, _)| is_session_key(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        for (key, value) in params.iter().filter(|(key, _)| is_session_key(key)) {
            if self.is_hidden(key) {
                continue;
            }
            merged.insert(key.clone(), param_to_string(value));
        }

        merged
    }

    /// Resolves the stack parameters for a provision request.
    ///
    /// Precedence, lowest first: non-prescribed global overrides, caller
    /// values, plan values, prescribed global overrides.
    pub fn stack_parameters(
        &self,
        definition: &ServiceDefinition,
        plan: &Plan,
        params: &Params,
    ) -> Result<BTreeMap<String, String>> {
        let mut resolved = BTreeMap::new();

        for key in params.keys() {
            if is_session_key(key) {
                continue;
            }
            if plan.prescribed.contains_key(key) {
                return Err(BrokerError::invalid_parameters(format!(
                    "parameter '{}' is fixed by plan '{}'",
                    key, plan.id
                )));
            }
            if self.is_hidden(key) {
                return Err(BrokerError::invalid_parameters(format!(
                    "parameter '{}' is managed by the broker",
                    key
                )));
            }
            if definition.parameter(key).is_none() {
                return Err(BrokerError::invalid_parameters(format!(
                    "service '{}' has no parameter '{}'",
                    definition.id, key
                )));
            }
        }

        if !self.prescribe {
            resolved.extend(self.declared_overrides(definition));
        }
        for (key, value) in params.iter().filter(|(key, _)| !is_session_key(key)) {
            resolved.insert(key.clone(), param_to_string(value));
        }
        resolved.extend(plan.prescribed.clone());
        if self.prescribe {
            resolved.extend(self.declared_overrides(definition));
        }

        let missing: Vec<&str> = definition
            .parameters
            .iter()
            .filter(|param| param.is_required() && !resolved.contains_key(&param.name))
            .map(|param| param.name.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(BrokerError::invalid_parameters(format!(
                "missing required parameters: {}",
                missing.join(", ")
            )));
        }

        Ok(resolved)
    }
}

pub fn is_session_key(key: &str) -> bool {
    SESSION_KEYS.contains(&key)
}

pub fn param_to_string(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
#[path = "params_tests.rs"]
mod tests;
