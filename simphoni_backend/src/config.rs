use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::conversation::ExportFormat;
use crate::defaults;
use crate::error::OrchestratorError;
use crate::invoker::{CommandInvoker, DEFAULT_TIMEOUT_SECS};
use crate::orchestrator::{OrchestratorSettings, DEFAULT_MAX_INFERENCES, DEFAULT_SEED_SPEAKER};
use crate::persona::{PersonaConfig, PersonaSet};
use crate::prompt::PromptBuilder;
use crate::sequencer::{ScriptMode, TurnScript};

pub const CONFIG_FILE_NAME: &str = "simphoni_config.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    // Model runner command line: `{runner} {runner_args..} [flags] {model} -- {prompt}`
    #[serde(default = "default_runner")]
    pub runner: String,
    #[serde(default = "default_runner_args")]
    pub runner_args: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    // Turn policy
    #[serde(default = "default_max_inferences")]
    pub max_inferences: usize,
    #[serde(default = "default_human_markers")]
    pub human_markers: Vec<String>,
    #[serde(default = "default_seed_speaker")]
    pub seed_speaker: String,
    #[serde(default)]
    pub script_mode: ScriptMode,
    /// Persona key interleaved after every scripted turn
    #[serde(default)]
    pub summarizer: Option<String>,

    // Prompt and export
    #[serde(default)]
    pub prompt_timestamps: bool,
    #[serde(default)]
    pub goal: Option<String>,
    #[serde(default = "default_export_path")]
    pub export_path: String,
    #[serde(default)]
    pub export_format: ExportFormat,

    #[serde(default = "defaults::default_script")]
    pub script: Vec<String>,
    #[serde(default = "defaults::default_personas")]
    pub personas: BTreeMap<String, PersonaConfig>,
}

fn default_runner() -> String {
    "ollama".to_string()
}

fn default_runner_args() -> Vec<String> {
    vec!["run".to_string()]
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_max_inferences() -> usize {
    DEFAULT_MAX_INFERENCES
}

fn default_human_markers() -> Vec<String> {
    vec![defaults::OMNICALL.to_string()]
}

fn default_seed_speaker() -> String {
    DEFAULT_SEED_SPEAKER.to_string()
}

fn default_export_path() -> String {
    "conversation.txt".to_string()
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            runner: default_runner(),
            runner_args: default_runner_args(),
            timeout_secs: default_timeout_secs(),
            max_inferences: default_max_inferences(),
            human_markers: default_human_markers(),
            seed_speaker: default_seed_speaker(),
            script_mode: ScriptMode::Once,
            summarizer: None,
            prompt_timestamps: false,
            goal: None,
            export_path: default_export_path(),
            export_format: ExportFormat::Timestamped,
            script: defaults::default_script(),
            personas: defaults::default_personas(),
        }
    }
}

impl OrchestratorConfig {
    fn get_base_dir() -> PathBuf {
        match std::env::current_exe() {
            Ok(exe_path) => exe_path
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".")),
            Err(_) => PathBuf::from("."),
        }
    }

    /// Path of the config file next to the executable
    pub fn config_path() -> PathBuf {
        Self::get_base_dir().join(CONFIG_FILE_NAME)
    }

    /// Load simphoni_config.toml from next to the executable, falling back to
    /// defaults. Env overrides apply either way.
    pub fn load() -> Self {
        let path = Self::config_path();

        let mut config = match Self::load_from(&path) {
            Ok(config) => {
                tracing::info!("Loaded config from {:?}", path);
                config
            }
            Err(e) => {
                if path.exists() {
                    tracing::error!("{:#}", e);
                }
                tracing::warn!("No usable config file found, using defaults + env vars");
                Self::default()
            }
        };

        config.apply_env();
        config
    }

    /// Load an explicit config file. No env overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {:?}", path))?;
        toml::from_str::<OrchestratorConfig>(&contents)
            .with_context(|| format!("Failed to parse {:?}", path))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let toml_string = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, toml_string)
            .with_context(|| format!("Failed to write config to {:?}", path))?;

        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }

    pub fn apply_env(&mut self) {
        if let Ok(runner) = env::var("SIMPHONI_RUNNER") {
            if !runner.trim().is_empty() {
                self.runner = runner;
            }
        }

        if let Ok(timeout) = env::var("SIMPHONI_TIMEOUT_SECS") {
            if let Ok(seconds) = timeout.parse() {
                self.timeout_secs = seconds;
            }
        }

        if let Ok(max) = env::var("SIMPHONI_MAX_INFERENCES") {
            if let Ok(max) = max.parse() {
                self.max_inferences = max;
            }
        }

        if let Ok(enabled) = env::var("SIMPHONI_PROMPT_TIMESTAMPS") {
            self.prompt_timestamps = enabled.eq_ignore_ascii_case("1")
                || enabled.eq_ignore_ascii_case("true")
                || enabled.eq_ignore_ascii_case("yes");
        }

        if let Ok(key) = env::var("SIMPHONI_SUMMARIZER") {
            self.summarizer = Some(key).filter(|k| !k.trim().is_empty());
        }
    }

    /// Reject values the orchestrator cannot run with.
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        if self.runner.trim().is_empty() {
            return Err(OrchestratorError::Config("runner is empty".to_string()));
        }
        if self.timeout_secs == 0 {
            return Err(OrchestratorError::Config(
                "timeout_secs must be positive".to_string(),
            ));
        }
        if let Some((key, _)) = self
            .personas
            .iter()
            .find(|(_, persona)| persona.context_window == 0)
        {
            return Err(OrchestratorError::Config(format!(
                "persona '{}' has a zero context_window",
                key
            )));
        }
        Ok(())
    }

    /// Personas keyed by their table name.
    pub fn persona_set(&self) -> PersonaSet {
        self.personas
            .iter()
            .map(|(key, persona)| PersonaConfig {
                key: key.clone(),
                ..persona.clone()
            })
            .collect()
    }

    /// The script as it will run: markers classified, summarizer
    /// interleaved, and wrapped to the ceiling in cycle mode.
    pub fn turn_script(&self) -> Result<TurnScript, OrchestratorError> {
        let mut script = TurnScript::parse(&self.script, &self.human_markers)?;
        if let Some(summarizer) = self.summarizer.as_deref().map(str::trim) {
            if !summarizer.is_empty() {
                script = script.interleave(summarizer);
            }
        }
        if self.script_mode == ScriptMode::Cycle {
            script = script.cycled(self.max_inferences);
        }
        Ok(script)
    }

    pub fn settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            max_inferences: self.max_inferences,
            timeout: Duration::from_secs(self.timeout_secs),
            seed_speaker: self.seed_speaker.clone(),
            prompt: PromptBuilder::new().with_timestamps(self.prompt_timestamps),
        }
    }

    pub fn invoker(&self) -> CommandInvoker {
        CommandInvoker::new(self.runner.clone(), self.runner_args.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequencer::TurnId;

    const SMALL: &str = r#"
runner = "/usr/local/bin/ollama"
max_inferences = 5
script = ["alice", "omnicall", "bob"]

[personas.alice]
model_name = "llama3.2:1b"
nickname = "Al"

[personas.bob]
role = "Builder"
model_name = "llama3.2:3b"
context_window = 512

[personas.bob.options]
temperature = 0.2
"#;

    #[test]
    fn parses_minimal_file_with_defaults() {
        let config: OrchestratorConfig = toml::from_str(SMALL).unwrap();
        assert_eq!(config.runner, "/usr/local/bin/ollama");
        assert_eq!(config.runner_args, vec!["run"]);
        assert_eq!(config.timeout_secs, 120);
        assert_eq!(config.human_markers, vec!["OmniCall"]);
        assert_eq!(config.export_format, ExportFormat::Timestamped);

        let personas = config.persona_set();
        assert_eq!(personas.get("alice").map(|p| p.key.as_str()), Some("alice"));
        assert_eq!(personas.get("bob").map(|p| p.context_window), Some(512));
        assert_eq!(personas.get("alice").map(|p| p.context_window), Some(2048));

        let script = config.turn_script().unwrap();
        assert_eq!(script.get(1), Some(&TurnId::Human("omnicall".to_string())));
    }

    #[test]
    fn empty_script_is_a_configuration_error() {
        let mut config = OrchestratorConfig::default();
        config.script.clear();
        assert_eq!(config.turn_script(), Err(OrchestratorError::EmptyScript));
    }

    #[test]
    fn summarizer_and_cycle_shape_the_script() {
        let mut config: OrchestratorConfig = toml::from_str(SMALL).unwrap();
        config.summarizer = Some("alice".to_string());
        config.script_mode = ScriptMode::Cycle;
        config.max_inferences = 8;

        let labels: Vec<String> = config
            .turn_script()
            .unwrap()
            .iter()
            .map(|t| t.label().to_string())
            .collect();
        assert_eq!(
            labels,
            vec!["alice", "alice", "omnicall", "alice", "bob", "alice", "alice", "alice"]
        );
    }

    #[test]
    fn validate_rejects_zero_timeout_and_window() {
        let mut config = OrchestratorConfig::default();
        assert!(config.validate().is_ok());

        config.timeout_secs = 0;
        assert!(matches!(config.validate(), Err(OrchestratorError::Config(_))));

        config.timeout_secs = 10;
        if let Some(persona) = config.personas.get_mut("ethicist") {
            persona.context_window = 0;
        }
        assert!(matches!(config.validate(), Err(OrchestratorError::Config(_))));
    }

    #[test]
    fn save_then_load_keeps_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);

        let mut config: OrchestratorConfig = toml::from_str(SMALL).unwrap();
        config.goal = Some("Compose a fugue".to_string());
        config.save(&path).unwrap();

        let loaded = OrchestratorConfig::load_from(&path).unwrap();
        assert_eq!(loaded.goal.as_deref(), Some("Compose a fugue"));
        assert_eq!(loaded.script, config.script);
        assert_eq!(loaded.persona_set(), config.persona_set());
    }

    #[test]
    fn load_from_missing_file_fails_with_context() {
        let dir = tempfile::tempdir().unwrap();
        let err = OrchestratorConfig::load_from(dir.path().join("nope.toml")).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to read config"));
    }
}
