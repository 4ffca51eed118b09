//! Turn scripts and the cursor that walks them.
//!
//! The sequencer knows nothing about personas or results. It walks a fixed
//! list of identifiers; the orchestrator decides what each identifier means
//! and when to stop early.

use serde::{Deserialize, Serialize};

use crate::error::OrchestratorError;

/// One scheduled turn.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TurnId {
    /// A model persona, by key.
    Persona(String),
    /// A human-input checkpoint. The label doubles as the speaker name.
    Human(String),
}

impl TurnId {
    pub fn label(&self) -> &str {
        match self {
            TurnId::Persona(key) => key,
            TurnId::Human(label) => label,
        }
    }
}

/// How a script is stretched to the inference ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptMode {
    /// Run the script once.
    #[default]
    Once,
    /// Wrap around until the inference ceiling is reached.
    Cycle,
}

/// Ordered, non-empty list of turns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnScript {
    turns: Vec<TurnId>,
}

impl TurnScript {
    pub fn new(turns: Vec<TurnId>) -> Result<Self, OrchestratorError> {
        if turns.is_empty() {
            return Err(OrchestratorError::EmptyScript);
        }
        Ok(Self { turns })
    }

    /// Classify raw identifiers. Any identifier matching one of
    /// `human_markers` (case-insensitively) becomes a human checkpoint.
    pub fn parse<I, S>(ids: I, human_markers: &[String]) -> Result<Self, OrchestratorError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let turns = ids
            .into_iter()
            .map(|id| {
                let id = id.as_ref().trim();
                if human_markers.iter().any(|m| m.eq_ignore_ascii_case(id)) {
                    TurnId::Human(id.to_string())
                } else {
                    TurnId::Persona(id.to_string())
                }
            })
            .collect();
        Self::new(turns)
    }

    /// Insert `summarizer` after every scripted turn.
    pub fn interleave(&self, summarizer: &str) -> Self {
        let mut turns = Vec::with_capacity(self.turns.len() * 2);
        for turn in &self.turns {
            turns.push(turn.clone());
            turns.push(TurnId::Persona(summarizer.to_string()));
        }
        Self { turns }
    }

    /// Repeat the script from the start until it holds exactly `len` turns.
    /// A `len` below the current length leaves the script unchanged.
    pub fn cycled(&self, len: usize) -> Self {
        if len <= self.turns.len() {
            return self.clone();
        }
        let turns = self.turns.iter().cycle().take(len).cloned().collect();
        Self { turns }
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Always false; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn get(&self, position: usize) -> Option<&TurnId> {
        self.turns.get(position)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TurnId> {
        self.turns.iter()
    }

    /// Every persona turn with its position, in script order.
    pub fn persona_positions(&self) -> impl Iterator<Item = (usize, &str)> {
        self.turns
            .iter()
            .enumerate()
            .filter_map(|(position, turn)| match turn {
                TurnId::Persona(key) => Some((position, key.as_str())),
                TurnId::Human(_) => None,
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequencerState {
    NotStarted,
    Running,
    Completed,
}

#[derive(Debug, Clone)]
pub struct TurnSequencer {
    script: TurnScript,
    position: usize,
    state: SequencerState,
}

impl TurnSequencer {
    pub fn new(script: TurnScript) -> Self {
        Self {
            script,
            position: 0,
            state: SequencerState::NotStarted,
        }
    }

    pub fn start(&mut self) {
        if self.state == SequencerState::NotStarted {
            self.state = SequencerState::Running;
        }
    }

    pub fn state(&self) -> SequencerState {
        self.state
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn script(&self) -> &TurnScript {
        &self.script
    }

    pub fn is_completed(&self) -> bool {
        self.state == SequencerState::Completed
    }

    pub fn current(&self) -> Result<&TurnId, OrchestratorError> {
        if self.is_completed() {
            return Err(OrchestratorError::SequencerCompleted);
        }
        self.script
            .get(self.position)
            .ok_or(OrchestratorError::SequencerCompleted)
    }

    /// Move past the current turn. Starts the sequencer if needed.
    pub fn advance(&mut self) -> Result<(), OrchestratorError> {
        if self.is_completed() {
            return Err(OrchestratorError::SequencerCompleted);
        }
        self.start();
        self.position += 1;
        if self.position >= self.script.len() {
            self.state = SequencerState::Completed;
        }
        Ok(())
    }
}
