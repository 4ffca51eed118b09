//! Multi-persona conversation orchestrator.
//!
//! A conversation is a fixed script of turns. Persona turns build a
//! context-bounded prompt from the history and call an external model
//! runner; checkpoint turns wait for a human. Everything lands in one
//! append-only log that can be exported as text.

pub mod config;
pub mod conversation;
pub mod defaults;
pub mod error;
pub mod invoker;
pub mod orchestrator;
pub mod persona;
pub mod prompt;
pub mod runtime;
pub mod sequencer;

pub use conversation::{ConversationState, ExportFormat, TurnEntry};
pub use error::{OrchestratorError, OrderingViolation};
pub use invoker::{CommandInvoker, InferenceResult, ModelInvoker};
pub use orchestrator::{Orchestrator, OrchestratorEvent, OrchestratorPhase, RunReport, Seed};
pub use persona::{PersonaConfig, PersonaSet};
pub use prompt::PromptBuilder;
pub use sequencer::{TurnId, TurnScript, TurnSequencer};
