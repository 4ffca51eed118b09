//! Prompt assembly.
//!
//! A prompt is a small header (role, instruction, goal), as much trailing
//! history as fits in the persona's character budget, and a cue line naming
//! the persona so the model continues in its voice.

use crate::conversation::TurnEntry;
use crate::persona::PersonaConfig;

/// Rough characters-per-token estimate used to size the history window.
/// This is an approximation, not a tokenizer: it undercounts for code-heavy
/// and non-English text.
pub const CHARS_PER_TOKEN: usize = 4;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PromptBuilder {
    include_timestamps: bool,
}

impl PromptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render history lines as `{speaker} [{timestamp}]: {message}`.
    pub fn with_timestamps(mut self, include_timestamps: bool) -> Self {
        self.include_timestamps = include_timestamps;
        self
    }

    pub fn build(&self, persona: &PersonaConfig, goal: Option<&str>, history: &[TurnEntry]) -> String {
        let mut prompt = Self::header(persona, goal);
        prompt.push_str(&self.history_window(history, persona.context_window));
        prompt.push_str(&persona.key);
        prompt.push(':');
        prompt
    }

    fn header(persona: &PersonaConfig, goal: Option<&str>) -> String {
        let mut header = String::new();

        if let Some(role) = present(persona.role.as_deref()) {
            header.push_str(&format!("Role: {}", role));
            if let Some(nickname) = present(persona.nickname.as_deref()) {
                header.push_str(&format!(" ({})", nickname));
            }
            header.push('\n');
        }
        if let Some(instruct) = present(persona.instruct.as_deref()) {
            header.push_str(&format!("Instruct: {}\n", instruct));
        }
        if let Some(goal) = present(goal) {
            header.push_str(&format!("Conversation Goal: {}\n", goal));
        }

        header
    }

    /// The most recent contiguous suffix of `history` whose rendered length
    /// stays strictly under `context_window * CHARS_PER_TOKEN` characters,
    /// in chronological order.
    pub fn history_window(&self, history: &[TurnEntry], context_window: usize) -> String {
        let max_characters = context_window.saturating_mul(CHARS_PER_TOKEN);

        let mut selected: Vec<String> = Vec::new();
        let mut used = 0usize;
        for entry in history.iter().rev() {
            let line = self.format_entry(entry);
            let len = line.chars().count();
            if used + len < max_characters {
                used += len;
                selected.push(line);
            } else {
                break;
            }
        }

        selected.reverse();
        selected.concat()
    }

    fn format_entry(&self, entry: &TurnEntry) -> String {
        if self.include_timestamps {
            format!(
                "{} [{}]: {}\n",
                entry.speaker,
                entry.timestamp.format(TIMESTAMP_FORMAT),
                entry.message
            )
        } else {
            format!("{}: {}\n", entry.speaker, entry.message)
        }
    }
}

fn present(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn persona() -> PersonaConfig {
        PersonaConfig::new("pm")
            .with_role("Project Manager")
            .with_nickname("The Taskmaster")
            .with_instruct("Keep everyone on schedule.")
            .with_model("llama3.2:1b")
    }

    fn history(n: usize) -> Vec<TurnEntry> {
        let base = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        (0..n)
            .map(|i| {
                TurnEntry::at(
                    format!("speaker{}", i),
                    format!("message number {}", i),
                    base + chrono::Duration::seconds(i as i64),
                )
            })
            .collect()
    }

    #[test]
    fn header_history_and_cue_in_order() {
        let prompt = PromptBuilder::new().build(&persona(), Some("Ship it"), &history(2));
        assert_eq!(
            prompt,
            "Role: Project Manager (The Taskmaster)\n\
             Instruct: Keep everyone on schedule.\n\
             Conversation Goal: Ship it\n\
             speaker0: message number 0\n\
             speaker1: message number 1\n\
             pm:"
        );
    }

    #[test]
    fn empty_fields_are_omitted() {
        let persona = PersonaConfig::new("bob").with_nickname("Bobby");
        let prompt = PromptBuilder::new().build(&persona, Some("  "), &[]);
        assert_eq!(prompt, "bob:");
    }

    #[test]
    fn timestamps_are_rendered_when_enabled() {
        let prompt = PromptBuilder::new()
            .with_timestamps(true)
            .build(&PersonaConfig::new("pm"), None, &history(1));
        assert_eq!(prompt, "speaker0 [2024-05-01 12:00:00]: message number 0\npm:");
    }

    #[test]
    fn tiny_context_window_keeps_no_history() {
        let persona = persona().with_context_window(1);
        let prompt = PromptBuilder::new().build(&persona, None, &history(3));
        assert!(!prompt.contains("message number"));
        assert!(prompt.ends_with("pm:"));
        assert!(prompt.starts_with("Role: Project Manager"));
    }

    #[test]
    fn window_is_most_recent_suffix_under_budget() {
        let builder = PromptBuilder::new();
        let entries = history(10);
        // each line is "speakerN: message number N\n" = 27 chars
        for context_window in [0usize, 6, 7, 14, 20, 40, 1000] {
            let window = builder.history_window(&entries, context_window);
            let budget = context_window * CHARS_PER_TOKEN;
            assert!(window.chars().count() < budget.max(1));

            let kept = window.lines().count();
            let expected: String = entries[entries.len() - kept..]
                .iter()
                .map(|e| format!("{}: {}\n", e.speaker, e.message))
                .collect();
            assert_eq!(window, expected);

            if kept < entries.len() {
                let next = 27;
                assert!(window.chars().count() + next >= budget);
            }
        }
    }

    #[test]
    fn stops_at_first_entry_that_does_not_fit() {
        let base = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let entries = vec![
            TurnEntry::at("a", "x", base),
            TurnEntry::at("b", "y".repeat(100), base),
            TurnEntry::at("c", "z", base),
        ];
        let window = PromptBuilder::new().history_window(&entries, 10);
        assert_eq!(window, "c: z\n");
    }

    #[test]
    fn build_is_deterministic() {
        let builder = PromptBuilder::new().with_timestamps(true);
        let entries = history(5);
        let first = builder.build(&persona(), Some("goal"), &entries);
        let second = builder.build(&persona(), Some("goal"), &entries);
        assert_eq!(first, second);
    }
}
