//! Model invocation.
//!
//! `ModelInvoker` is the boundary to the external model process. Whatever
//! happens on the other side (non-zero exit, hang, missing binary) comes back
//! as an `InferenceResult`; nothing unwinds into the orchestrator.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::{Duration, Instant};

use crate::persona::{option_flags, ModelOptions};

/// Default per-invocation timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Separator placed between the model name and the prompt argument
pub const PROMPT_SEPARATOR: &str = "--";

pub const TIMEOUT_ERROR: &str = "Model inference timed out.";

/// Outcome of one inference. Never persisted, only folded into a turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InferenceResult {
    Success { response: String },
    Failure { error: String },
}

impl InferenceResult {
    pub fn success(response: impl Into<String>) -> Self {
        InferenceResult::Success {
            response: response.into(),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        InferenceResult::Failure {
            error: error.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, InferenceResult::Success { .. })
    }
}

#[async_trait]
pub trait ModelInvoker: Send + Sync {
    async fn invoke(
        &self,
        model_name: &str,
        prompt: &str,
        options: &ModelOptions,
        timeout: Duration,
    ) -> InferenceResult;
}

/// Runs a command-line model runner such as `ollama run`.
///
/// The command line is `{program} {base_args..} [--key value..] {model} -- {prompt}`.
#[derive(Debug, Clone)]
pub struct CommandInvoker {
    program: String,
    base_args: Vec<String>,
}

impl CommandInvoker {
    pub fn new(program: impl Into<String>, base_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            base_args,
        }
    }

    pub fn ollama() -> Self {
        Self::new("ollama", vec!["run".to_string()])
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments passed to the runner, prompt last.
    pub fn build_args(&self, model_name: &str, prompt: &str, options: &ModelOptions) -> Vec<String> {
        let mut args = self.base_args.clone();
        args.extend(option_flags(options));
        args.push(model_name.to_string());
        args.push(PROMPT_SEPARATOR.to_string());
        args.push(prompt.to_string());
        args
    }
}

impl Default for CommandInvoker {
    fn default() -> Self {
        Self::ollama()
    }
}

#[async_trait]
impl ModelInvoker for CommandInvoker {
    async fn invoke(
        &self,
        model_name: &str,
        prompt: &str,
        options: &ModelOptions,
        timeout: Duration,
    ) -> InferenceResult {
        let args = self.build_args(model_name, prompt, options);
        let (flags, _) = args.split_at(args.len() - 1);

        tracing::info!(
            "Invoking model '{}': {} {} <prompt: {} chars> (timeout: {}s)",
            model_name,
            self.program,
            flags.join(" "),
            prompt.chars().count(),
            timeout.as_secs()
        );

        let started = Instant::now();
        // kill_on_drop reaps the child when the timeout drops the output future
        let result = tokio::time::timeout(
            timeout,
            tokio::process::Command::new(&self.program)
                .args(&args)
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output(),
        )
        .await;

        match result {
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

                if output.status.success() {
                    tracing::info!(
                        "Model '{}' responded in {:.1}s ({} chars)",
                        model_name,
                        started.elapsed().as_secs_f32(),
                        stdout.chars().count()
                    );
                    InferenceResult::success(stdout)
                } else {
                    tracing::warn!(
                        "Model '{}' exited with {}: {}",
                        model_name,
                        output.status,
                        stderr
                    );
                    if stderr.to_ascii_lowercase().contains("unknown model") {
                        InferenceResult::failure(format!(
                            "{} (check that model '{}' is installed and the name is spelled correctly)",
                            stderr, model_name
                        ))
                    } else {
                        InferenceResult::failure(stderr)
                    }
                }
            }
            Ok(Err(e)) => {
                tracing::error!("Failed to run model '{}': {}", model_name, e);
                InferenceResult::failure(e.to_string())
            }
            Err(_) => {
                tracing::warn!(
                    "Model '{}' timed out after {}s",
                    model_name,
                    timeout.as_secs()
                );
                InferenceResult::failure(TIMEOUT_ERROR)
            }
        }
    }
}
