//! Error taxonomy for the orchestrator.
//!
//! Only configuration problems and ordering violations are errors. Per-turn
//! failures (a persona without a model, a failed inference) are absorbed by the
//! loop and reported as events instead.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Raised when an entry would be appended with a timestamp older than the
/// last entry in the log.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Entry from '{speaker}' at {attempted} precedes last entry at {last}")]
pub struct OrderingViolation {
    pub speaker: String,
    pub attempted: DateTime<Utc>,
    pub last: DateTime<Utc>,
}

/// Fatal errors that stop a conversation from starting or continuing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrchestratorError {
    #[error("Turn script is empty")]
    EmptyScript,

    #[error("Turn script references unknown persona '{key}' at position {position}")]
    UnknownPersona { key: String, position: usize },

    #[error("Turn sequencer is already completed")]
    SequencerCompleted,

    #[error("Conversation was already started")]
    AlreadyStarted,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Ordering(#[from] OrderingViolation),
}

/// Errors produced while parsing an exported conversation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExportParseError {
    #[error("Line {line}: missing speaker separator")]
    MissingSeparator { line: usize },

    #[error("Line {line}: invalid timestamp '{raw}'")]
    InvalidTimestamp { line: usize, raw: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_script_displays_correctly() {
        assert_eq!(
            format!("{}", OrchestratorError::EmptyScript),
            "Turn script is empty"
        );
    }

    #[test]
    fn unknown_persona_names_key_and_position() {
        let err = OrchestratorError::UnknownPersona {
            key: "carol".to_string(),
            position: 4,
        };
        assert_eq!(
            format!("{}", err),
            "Turn script references unknown persona 'carol' at position 4"
        );
    }

    #[test]
    fn ordering_violation_converts_transparently() {
        let now = Utc::now();
        let violation = OrderingViolation {
            speaker: "alice".to_string(),
            attempted: now - chrono::Duration::seconds(5),
            last: now,
        };
        let err: OrchestratorError = violation.clone().into();
        assert_eq!(format!("{}", err), format!("{}", violation));
        assert!(matches!(err, OrchestratorError::Ordering(_)));
    }
}
