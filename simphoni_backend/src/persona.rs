//! Persona definitions.
//!
//! A persona is a configured identity that takes scripted turns: a role, an
//! optional instruction, the model that speaks for it and the flags passed to
//! the model runner.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default token budget when a persona does not set one.
pub const DEFAULT_CONTEXT_WINDOW: usize = 2048;

/// Runner flags, ordered by key so the rendered command line is stable.
pub type ModelOptions = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaConfig {
    /// Unique key within a configuration. Filled from the map key when
    /// personas are loaded from a config file.
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub instruct: Option<String>,
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default = "default_context_window")]
    pub context_window: usize,
    #[serde(default)]
    pub options: ModelOptions,
}

fn default_context_window() -> usize {
    DEFAULT_CONTEXT_WINDOW
}

impl PersonaConfig {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            nickname: None,
            role: None,
            instruct: None,
            model_name: None,
            context_window: DEFAULT_CONTEXT_WINDOW,
            options: ModelOptions::new(),
        }
    }

    pub fn with_nickname(mut self, nickname: impl Into<String>) -> Self {
        self.nickname = Some(nickname.into());
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn with_instruct(mut self, instruct: impl Into<String>) -> Self {
        self.instruct = Some(instruct.into());
        self
    }

    pub fn with_model(mut self, model_name: impl Into<String>) -> Self {
        self.model_name = Some(model_name.into());
        self
    }

    pub fn with_context_window(mut self, context_window: usize) -> Self {
        self.context_window = context_window;
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.options.insert(key.into(), value);
        self
    }

    /// Name used as the speaker label: nickname, else role, else key.
    pub fn display_name(&self) -> &str {
        non_blank(self.nickname.as_deref())
            .or_else(|| non_blank(self.role.as_deref()))
            .unwrap_or(&self.key)
    }

    /// The configured model, ignoring blank values.
    pub fn model(&self) -> Option<&str> {
        non_blank(self.model_name.as_deref())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Render options as `--key value` pairs in key order.
pub fn option_flags(options: &ModelOptions) -> Vec<String> {
    let mut flags = Vec::with_capacity(options.len() * 2);
    for (key, value) in options {
        flags.push(format!("--{}", key));
        flags.push(match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        });
    }
    flags
}

/// The persona collection handed to the orchestrator at construction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PersonaSet {
    personas: BTreeMap<String, PersonaConfig>,
}

impl PersonaSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a persona, replacing any previous one with the same key.
    pub fn insert(&mut self, persona: PersonaConfig) {
        self.personas.insert(persona.key.clone(), persona);
    }

    pub fn with(mut self, persona: PersonaConfig) -> Self {
        self.insert(persona);
        self
    }

    pub fn get(&self, key: &str) -> Option<&PersonaConfig> {
        self.personas.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.personas.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.personas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.personas.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PersonaConfig> {
        self.personas.values()
    }
}

impl FromIterator<PersonaConfig> for PersonaSet {
    fn from_iter<T: IntoIterator<Item = PersonaConfig>>(iter: T) -> Self {
        let mut set = PersonaSet::new();
        for persona in iter {
            set.insert(persona);
        }
        set
    }
}
