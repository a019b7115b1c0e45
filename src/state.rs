//! Session state shared by every step of a single run.

use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{PipelineError, Result};

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)(\?)?\}").expect("placeholder pattern is valid")
    })
}

/// Key-value storage created per run and mutated in place by each step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionState {
    values: Map<String, Value>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(values: Map<String, Value>) -> Self {
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.values.get(key).and_then(Value::as_i64)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.values.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Insert `default` only when `key` is absent. Returns `true` if it inserted.
    pub fn ensure(&mut self, key: impl Into<String>, default: impl Into<Value>) -> bool {
        let key = key.into();
        if self.values.contains_key(&key) {
            return false;
        }
        self.values.insert(key, default.into());
        true
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn snapshot(&self) -> Map<String, Value> {
        self.values.clone()
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.values
    }

    /// Keys whose value differs from `base`, including keys removed since then.
    pub fn changed_keys(&self, base: &SessionState) -> Vec<String> {
        let mut changed: Vec<String> = self
            .values
            .iter()
            .filter(|(key, value)| base.values.get(*key) != Some(*value))
            .map(|(key, _)| key.clone())
            .collect();
        changed.extend(
            base.values
                .keys()
                .filter(|key| !self.values.contains_key(*key))
                .cloned(),
        );
        changed
    }

    /// Fold the keys a branch changed relative to `base` back into this state.
    pub fn merge_changes(&mut self, base: &SessionState, branch: &SessionState) {
        for (key, value) in &branch.values {
            if base.values.get(key) != Some(value) {
                self.values.insert(key.clone(), value.clone());
            }
        }
        for key in base.values.keys() {
            if !branch.values.contains_key(key) {
                self.values.remove(key);
            }
        }
    }

    /// Substitute `{key}` placeholders with state values.
    ///
    /// String values are inserted raw and anything else as compact JSON.
    /// `{key?}` renders as an empty string when the key is absent; a plain
    /// `{key}` that is absent fails with [`PipelineError::MissingStateKey`].
    /// Braces that do not wrap an identifier are left untouched.
    pub fn render(&self, template: &str, step: &str) -> Result<String> {
        let mut missing: Option<String> = None;
        let rendered = placeholder_pattern().replace_all(template, |caps: &Captures<'_>| {
            let key = &caps[1];
            let optional = caps.get(2).is_some();
            match self.values.get(key) {
                Some(Value::String(text)) => text.clone(),
                Some(other) => other.to_string(),
                None if optional => String::new(),
                None => {
                    missing.get_or_insert_with(|| key.to_string());
                    String::new()
                }
            }
        });
        match missing {
            Some(key) => Err(PipelineError::MissingStateKey {
                key,
                step: step.to_string(),
            }),
            None => Ok(rendered.into_owned()),
        }
    }
}

impl From<Map<String, Value>> for SessionState {
    fn from(values: Map<String, Value>) -> Self {
        Self::from_map(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ensure_is_idempotent() {
        let mut state = SessionState::new();
        assert!(state.ensure("feedback", "No feedback yet."));
        state.insert("feedback", "tighten the intro");

        assert!(!state.ensure("feedback", "No feedback yet."));
        assert!(!state.ensure("feedback", "No feedback yet."));
        assert_eq!(state.get_str("feedback"), Some("tighten the intro"));
    }

    #[test]
    fn renders_strings_raw_and_values_as_json() {
        let mut state = SessionState::new();
        state.insert("generated_code", "def f(): pass");
        state.insert("iteration", 2);
        state.insert("prices", json!({"GOOGL": {"end_date_price": 170.0}}));

        let out = state
            .render("code={generated_code} n={iteration} p={prices}", "writer")
            .unwrap();

        assert_eq!(
            out,
            r#"code=def f(): pass n=2 p={"GOOGL":{"end_date_price":170.0}}"#
        );
    }

    #[test]
    fn missing_key_names_the_key_and_step() {
        let state = SessionState::new();
        let err = state.render("Review {review_comments}", "refactorer").unwrap_err();
        match err {
            PipelineError::MissingStateKey { key, step } => {
                assert_eq!(key, "review_comments");
                assert_eq!(step, "refactorer");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn optional_placeholders_and_json_braces() {
        let state = SessionState::new();
        let out = state
            .render(r#"Input looks like {"country": "name"}. Notes: [{notes?}]"#, "capital")
            .unwrap();
        assert_eq!(out, r#"Input looks like {"country": "name"}. Notes: []"#);
    }

    #[test]
    fn merge_changes_only_copies_modified_keys() {
        let mut shared = SessionState::new();
        shared.insert("topic_1", "rust");
        shared.insert("research_1", "No research performed.");
        let base = shared.clone();

        let mut branch = base.clone();
        branch.insert("research_1", "Rust is a systems language.");
        shared.insert("topic_1", "changed elsewhere");

        shared.merge_changes(&base, &branch);

        assert_eq!(shared.get_str("research_1"), Some("Rust is a systems language."));
        assert_eq!(shared.get_str("topic_1"), Some("changed elsewhere"));
    }
}
