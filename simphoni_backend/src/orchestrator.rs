//! The conversation loop.
//!
//! Drives a `TurnSequencer` over a script, building a prompt and invoking the
//! model for persona turns and suspending on human checkpoints. Per-turn
//! problems are reported as events and never stop the loop; only
//! configuration and ordering errors do.

use async_trait::async_trait;
use flume::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::conversation::{ConversationState, TurnEntry};
use crate::error::OrchestratorError;
use crate::invoker::{InferenceResult, ModelInvoker, DEFAULT_TIMEOUT_SECS};
use crate::persona::{ModelOptions, PersonaSet};
use crate::prompt::PromptBuilder;
use crate::sequencer::{TurnId, TurnScript, TurnSequencer};

pub const DEFAULT_SEED_SPEAKER: &str = "User";
pub const SYSTEM_SPEAKER: &str = "System";
pub const DEFAULT_MAX_INFERENCES: usize = 48;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorPhase {
    AwaitingGoalAndSeed,
    Running,
    AwaitingHumanInput,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Every scripted turn was processed.
    ScriptExhausted,
    /// The configured maximum number of turns was reached.
    InferenceLimit,
    /// A human checkpoint was reached but no more input will arrive.
    HumanInputClosed,
}

/// A persona turn whose inference failed. Kept out of the conversation log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnFailure {
    pub position: usize,
    pub persona: String,
    pub speaker: String,
    pub error: String,
}

#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    PhaseChanged(OrchestratorPhase),
    TurnStarted {
        position: usize,
        turn: TurnId,
    },
    EntryAppended(TurnEntry),
    PersonaMisconfigured {
        position: usize,
        persona: String,
    },
    InferenceFailed(TurnFailure),
    AwaitingHumanInput {
        position: usize,
        label: String,
    },
    Completed {
        reason: StopReason,
        entries: usize,
    },
    /// A fatal error ended the run; no `Completed` follows.
    Aborted(String),
}

/// Supplies text for human checkpoints.
#[async_trait]
pub trait HumanInput: Send + Sync {
    /// Wait for the checkpoint's message. `None` means no input will ever
    /// arrive and the conversation should stop.
    async fn request(&self, label: &str, position: usize) -> Option<String>;
}

/// Human input fed through a channel, typically from a frontend thread.
pub struct ChannelHumanInput {
    rx: Receiver<String>,
}

impl ChannelHumanInput {
    pub fn new(rx: Receiver<String>) -> Self {
        Self { rx }
    }
}

#[async_trait]
impl HumanInput for ChannelHumanInput {
    async fn request(&self, label: &str, position: usize) -> Option<String> {
        tracing::debug!("Waiting for '{}' input at turn {}", label, position);
        self.rx.recv_async().await.ok()
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub max_inferences: usize,
    pub timeout: Duration,
    pub seed_speaker: String,
    pub prompt: PromptBuilder,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_inferences: DEFAULT_MAX_INFERENCES,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            seed_speaker: DEFAULT_SEED_SPEAKER.to_string(),
            prompt: PromptBuilder::new(),
        }
    }
}

/// Goal and opening message that start a conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Seed {
    pub goal: Option<String>,
    pub message: String,
}

impl Seed {
    pub fn new(goal: Option<String>, message: impl Into<String>) -> Self {
        Self {
            goal,
            message: message.into(),
        }
    }
}

#[derive(Debug)]
pub struct RunReport {
    pub conversation: Arc<ConversationState>,
    pub failures: Vec<TurnFailure>,
    pub turns_processed: usize,
    pub stop_reason: StopReason,
}

pub struct Orchestrator {
    personas: PersonaSet,
    script: TurnScript,
    settings: OrchestratorSettings,
    invoker: Arc<dyn ModelInvoker>,
    human_input: Arc<dyn HumanInput>,
    event_tx: Sender<OrchestratorEvent>,
    phase: RwLock<OrchestratorPhase>,
}

impl Orchestrator {
    /// Fails if the script names a persona missing from `personas`.
    pub fn new(
        personas: PersonaSet,
        script: TurnScript,
        settings: OrchestratorSettings,
        invoker: Arc<dyn ModelInvoker>,
        human_input: Arc<dyn HumanInput>,
        event_tx: Sender<OrchestratorEvent>,
    ) -> Result<Self, OrchestratorError> {
        if let Some((position, key)) = script
            .persona_positions()
            .find(|(_, key)| !personas.contains(key))
        {
            return Err(OrchestratorError::UnknownPersona {
                key: key.to_string(),
                position,
            });
        }

        Ok(Self {
            personas,
            script,
            settings,
            invoker,
            human_input,
            event_tx,
            phase: RwLock::new(OrchestratorPhase::AwaitingGoalAndSeed),
        })
    }

    pub async fn phase(&self) -> OrchestratorPhase {
        *self.phase.read().await
    }

    pub fn script(&self) -> &TurnScript {
        &self.script
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    fn emit(&self, event: OrchestratorEvent) {
        let _ = self.event_tx.send(event);
    }

    async fn set_phase(&self, phase: OrchestratorPhase) {
        *self.phase.write().await = phase;
        self.emit(OrchestratorEvent::PhaseChanged(phase));
    }

    /// Run the conversation from its seed to completion.
    pub async fn run(&self, seed: Seed) -> Result<RunReport, OrchestratorError> {
        {
            let mut phase = self.phase.write().await;
            if *phase != OrchestratorPhase::AwaitingGoalAndSeed {
                return Err(OrchestratorError::AlreadyStarted);
            }
            *phase = OrchestratorPhase::Running;
        }

        let conversation = Arc::new(ConversationState::new(seed.goal));
        tracing::info!(
            "Starting conversation {} ({} scripted turns, ceiling {})",
            conversation.id(),
            self.script.len(),
            self.settings.max_inferences
        );

        let entry = conversation
            .record(self.settings.seed_speaker.as_str(), seed.message)
            .await;
        self.emit(OrchestratorEvent::EntryAppended(entry));
        self.emit(OrchestratorEvent::PhaseChanged(OrchestratorPhase::Running));

        let mut failures = Vec::new();
        let (stop_reason, turns_processed) = match self.drive(&conversation, &mut failures).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!("Conversation {} aborted: {}", conversation.id(), e);
                self.set_phase(OrchestratorPhase::Completed).await;
                self.emit(OrchestratorEvent::Aborted(e.to_string()));
                return Err(e);
            }
        };

        self.set_phase(OrchestratorPhase::Completed).await;
        let entries = conversation.len().await;
        tracing::info!(
            "Conversation {} completed ({:?}): {} turns, {} entries, {} failures",
            conversation.id(),
            stop_reason,
            turns_processed,
            entries,
            failures.len()
        );
        self.emit(OrchestratorEvent::Completed {
            reason: stop_reason,
            entries,
        });

        Ok(RunReport {
            conversation,
            failures,
            turns_processed,
            stop_reason,
        })
    }

    /// Walk the script. Returns why it stopped and how many turns ran.
    async fn drive(
        &self,
        conversation: &ConversationState,
        failures: &mut Vec<TurnFailure>,
    ) -> Result<(StopReason, usize), OrchestratorError> {
        let mut sequencer = TurnSequencer::new(self.script.clone());
        sequencer.start();
        let mut turns_processed = 0usize;

        let stop_reason = loop {
            if sequencer.is_completed() {
                break StopReason::ScriptExhausted;
            }
            let position = sequencer.position();
            if position >= self.settings.max_inferences {
                tracing::info!(
                    "Conversation {} reached its ceiling of {} turns",
                    conversation.id(),
                    self.settings.max_inferences
                );
                break StopReason::InferenceLimit;
            }

            let turn = sequencer.current()?.clone();
            self.emit(OrchestratorEvent::TurnStarted {
                position,
                turn: turn.clone(),
            });

            match &turn {
                TurnId::Human(label) => {
                    if !self.human_turn(conversation, label, position).await {
                        break StopReason::HumanInputClosed;
                    }
                }
                TurnId::Persona(key) => {
                    if let Some(failure) = self.persona_turn(conversation, key, position).await? {
                        failures.push(failure);
                    }
                }
            }

            sequencer.advance()?;
            turns_processed += 1;
        };

        Ok((stop_reason, turns_processed))
    }

    /// Returns false when no input will arrive.
    async fn human_turn(
        &self,
        conversation: &ConversationState,
        label: &str,
        position: usize,
    ) -> bool {
        self.set_phase(OrchestratorPhase::AwaitingHumanInput).await;
        self.emit(OrchestratorEvent::AwaitingHumanInput {
            position,
            label: label.to_string(),
        });

        match self.human_input.request(label, position).await {
            Some(message) => {
                let entry = conversation.record(label, message).await;
                self.emit(OrchestratorEvent::EntryAppended(entry));
                self.set_phase(OrchestratorPhase::Running).await;
                true
            }
            None => {
                tracing::warn!("Human input for '{}' closed at turn {}", label, position);
                false
            }
        }
    }

    async fn persona_turn(
        &self,
        conversation: &ConversationState,
        key: &str,
        position: usize,
    ) -> Result<Option<TurnFailure>, OrchestratorError> {
        let persona = self
            .personas
            .get(key)
            .ok_or_else(|| OrchestratorError::UnknownPersona {
                key: key.to_string(),
                position,
            })?;

        let Some(model) = persona.model() else {
            tracing::warn!("No model name specified for '{}'. Skipping.", key);
            let entry = conversation
                .record(SYSTEM_SPEAKER, format!("No model found for {}.", key))
                .await;
            self.emit(OrchestratorEvent::EntryAppended(entry));
            self.emit(OrchestratorEvent::PersonaMisconfigured {
                position,
                persona: key.to_string(),
            });
            return Ok(None);
        };

        let history = conversation.history().await;
        let prompt = self
            .settings
            .prompt
            .build(persona, conversation.goal(), &history);

        let result = self
            .dispatch(model.to_string(), prompt, persona.options.clone())
            .await;

        match result {
            InferenceResult::Success { response } => {
                let entry = conversation.record(persona.display_name(), response).await;
                self.emit(OrchestratorEvent::EntryAppended(entry));
                Ok(None)
            }
            InferenceResult::Failure { error } => {
                tracing::warn!("Turn {} ({}) failed: {}", position, key, error);
                let failure = TurnFailure {
                    position,
                    persona: key.to_string(),
                    speaker: persona.display_name().to_string(),
                    error,
                };
                self.emit(OrchestratorEvent::InferenceFailed(failure.clone()));
                Ok(Some(failure))
            }
        }
    }

    /// Run one inference on its own task and wait for it. Only one inference
    /// is ever in flight; a panicking invoker becomes a failure.
    async fn dispatch(
        &self,
        model: String,
        prompt: String,
        options: ModelOptions,
    ) -> InferenceResult {
        let invoker = self.invoker.clone();
        let timeout = self.settings.timeout;
        let handle =
            tokio::spawn(async move { invoker.invoke(&model, &prompt, &options, timeout).await });

        match handle.await {
            Ok(result) => result,
            Err(e) => InferenceResult::failure(format!("Inference task failed: {}", e)),
        }
    }
}
