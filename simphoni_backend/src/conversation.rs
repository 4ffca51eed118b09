//! Conversation log.
//!
//! `ConversationState` is the single source of truth for a running
//! conversation: the goal set at start and the append-only list of turns.
//! The backing vector is never handed out; readers get snapshots.

use chrono::{DateTime, SecondsFormat, Utc};
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tokio::sync::RwLock;

use crate::error::{ExportParseError, OrderingViolation};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnEntry {
    pub speaker: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl TurnEntry {
    pub fn new(speaker: impl Into<String>, message: impl Into<String>) -> Self {
        Self::at(speaker, message, Utc::now())
    }

    pub fn at(
        speaker: impl Into<String>,
        message: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            speaker: speaker.into(),
            message: message.into(),
            timestamp,
        }
    }
}

#[derive(Debug)]
pub struct ConversationState {
    id: String,
    goal: Option<String>,
    entries: RwLock<Vec<TurnEntry>>,
}

impl ConversationState {
    /// A blank goal is treated as no goal.
    pub fn new(goal: Option<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            goal: goal.filter(|g| !g.trim().is_empty()),
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Rebuild a log from existing entries, e.g. a parsed export.
    pub fn from_entries(
        goal: Option<String>,
        entries: Vec<TurnEntry>,
    ) -> Result<Self, OrderingViolation> {
        if let Some(pair) = entries.windows(2).find(|w| w[1].timestamp < w[0].timestamp) {
            return Err(OrderingViolation {
                speaker: pair[1].speaker.clone(),
                attempted: pair[1].timestamp,
                last: pair[0].timestamp,
            });
        }
        let state = Self::new(goal);
        Ok(Self {
            entries: RwLock::new(entries),
            ..state
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn goal(&self) -> Option<&str> {
        self.goal.as_deref()
    }

    /// Append a caller-stamped entry. Rejects entries older than the last one.
    pub async fn append(&self, entry: TurnEntry) -> Result<(), OrderingViolation> {
        let mut entries = self.entries.write().await;
        if let Some(last) = entries.last() {
            if entry.timestamp < last.timestamp {
                return Err(OrderingViolation {
                    speaker: entry.speaker,
                    attempted: entry.timestamp,
                    last: last.timestamp,
                });
            }
        }
        entries.push(entry);
        Ok(())
    }

    /// Stamp and append an entry under the write lock. The timestamp is
    /// clamped to the last entry's so a stepped-back clock cannot break
    /// ordering.
    pub async fn record(
        &self,
        speaker: impl Into<String>,
        message: impl Into<String>,
    ) -> TurnEntry {
        let mut entries = self.entries.write().await;
        let now = Utc::now();
        let timestamp = match entries.last() {
            Some(last) if last.timestamp > now => last.timestamp,
            _ => now,
        };
        let entry = TurnEntry::at(speaker, message, timestamp);
        entries.push(entry.clone());
        entry
    }

    /// Snapshot of the log in append order.
    pub async fn history(&self) -> Vec<TurnEntry> {
        self.entries.read().await.clone()
    }

    /// Snapshot for callers outside the async runtime. Panics if called
    /// from within an async context.
    pub fn blocking_history(&self) -> Vec<TurnEntry> {
        self.entries.blocking_read().clone()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

}

/// Line format for saved conversations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    /// `{speaker} [{timestamp}]: {message}`
    #[default]
    Timestamped,
    /// `{speaker}: {message}`
    Plain,
}

/// One parsed export line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedEntry {
    pub speaker: String,
    pub message: String,
    pub timestamp: Option<DateTime<Utc>>,
}

pub fn export_entries(entries: &[TurnEntry], format: ExportFormat) -> String {
    let mut out = String::new();
    for entry in entries {
        let speaker = escape_speaker(&entry.speaker);
        let message = escape_message(&entry.message);
        match format {
            ExportFormat::Timestamped => out.push_str(&format!(
                "{} [{}]: {}\n",
                speaker,
                entry.timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true),
                message
            )),
            ExportFormat::Plain => out.push_str(&format!("{}: {}\n", speaker, message)),
        }
    }
    out
}

pub fn parse_export(
    text: &str,
    format: ExportFormat,
) -> Result<Vec<ExportedEntry>, ExportParseError> {
    let pattern = export_line_pattern();

    let mut parsed = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let line_no = idx + 1;
        if line.trim().is_empty() {
            continue;
        }

        match format {
            ExportFormat::Timestamped => {
                let caps = pattern
                    .and_then(|re| re.captures(line))
                    .ok_or(ExportParseError::MissingSeparator { line: line_no })?;
                let raw = &caps[2];
                let timestamp = DateTime::parse_from_rfc3339(raw)
                    .map_err(|_| ExportParseError::InvalidTimestamp {
                        line: line_no,
                        raw: raw.to_string(),
                    })?
                    .with_timezone(&Utc);
                parsed.push(ExportedEntry {
                    speaker: unescape_message(&caps[1]),
                    message: unescape_message(&caps[3]),
                    timestamp: Some(timestamp),
                });
            }
            ExportFormat::Plain => {
                let (speaker, message) = split_unescaped(line, ": ")
                    .ok_or(ExportParseError::MissingSeparator { line: line_no })?;
                parsed.push(ExportedEntry {
                    speaker: unescape_message(speaker),
                    message: unescape_message(message),
                    timestamp: None,
                });
            }
        }
    }
    Ok(parsed)
}

/// `{speaker} [{timestamp}]: {message}`. An escaped speaker never contains
/// ` [`, so the first match is the real separator.
fn export_line_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^(.*?) \[([^\]]*)\]: (.*)$").ok())
        .as_ref()
}

/// Split at the first `sep` that is not inside an escape sequence.
fn split_unescaped<'a>(line: &'a str, sep: &str) -> Option<(&'a str, &'a str)> {
    let mut escaped = false;
    for (idx, ch) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        if ch == '\\' {
            escaped = true;
            continue;
        }
        if line[idx..].starts_with(sep) {
            return Some((&line[..idx], &line[idx + sep.len()..]));
        }
    }
    None
}

fn escape_speaker(speaker: &str) -> String {
    let mut out = String::with_capacity(speaker.len());
    for ch in escape_message(speaker).chars() {
        match ch {
            ':' => out.push_str("\\:"),
            '[' => out.push_str("\\["),
            other => out.push(other),
        }
    }
    out
}

fn escape_message(message: &str) -> String {
    let mut out = String::with_capacity(message.len());
    for ch in message.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_message(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some(':') => out.push(':'),
            Some('[') => out.push('['),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[tokio::test]
    async fn append_rejects_out_of_order_timestamp() {
        let state = ConversationState::new(None);
        let now = Utc::now();
        state.append(TurnEntry::at("User", "hello", now)).await.unwrap();

        let err = state
            .append(TurnEntry::at("alice", "late", now - ChronoDuration::seconds(1)))
            .await
            .unwrap_err();
        assert_eq!(err.speaker, "alice");
        assert_eq!(err.last, now);
        assert_eq!(state.len().await, 1);
    }

    #[tokio::test]
    async fn append_accepts_equal_timestamps() {
        let state = ConversationState::new(None);
        let now = Utc::now();
        state.append(TurnEntry::at("User", "a", now)).await.unwrap();
        state.append(TurnEntry::at("alice", "b", now)).await.unwrap();
        assert_eq!(state.len().await, 2);
    }

    #[tokio::test]
    async fn record_clamps_to_last_timestamp() {
        let state = ConversationState::new(None);
        let future = Utc::now() + ChronoDuration::hours(1);
        state.append(TurnEntry::at("User", "from the future", future)).await.unwrap();

        let entry = state.record("alice", "now").await;
        assert_eq!(entry.timestamp, future);
        assert_eq!(state.history().await[1], entry);
    }

    #[tokio::test]
    async fn history_is_a_snapshot() {
        let state = ConversationState::new(Some("plan".to_string()));
        state.record("User", "hello").await;
        let snapshot = state.history().await;
        state.record("alice", "hi").await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(state.len().await, 2);
        assert_eq!(state.goal(), Some("plan"));
    }

    #[test]
    fn blocking_history_outside_runtime() {
        let state = ConversationState::new(None);
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(state.record("User", "hi"));
        assert_eq!(state.blocking_history().len(), 1);
    }

    #[test]
    fn from_entries_checks_ordering() {
        let now = Utc::now();
        let ok = ConversationState::from_entries(
            None,
            vec![TurnEntry::at("User", "a", now), TurnEntry::at("alice", "b", now)],
        )
        .unwrap();
        assert_eq!(ok.blocking_history().len(), 2);

        let err = ConversationState::from_entries(
            None,
            vec![
                TurnEntry::at("User", "a", now),
                TurnEntry::at("alice", "b", now - ChronoDuration::seconds(1)),
            ],
        )
        .unwrap_err();
        assert_eq!(err.speaker, "alice");
    }

    #[test]
    fn blank_goal_is_none() {
        let state = ConversationState::new(Some("   ".to_string()));
        assert_eq!(state.goal(), None);
        assert!(!state.id().is_empty());
    }

    #[test]
    fn timestamped_export_round_trips() {
        let base = Utc::now();
        let entries = vec![
            TurnEntry::at("User", "hello", base),
            TurnEntry::at("The Taskmaster", "line one\nline two", base),
            TurnEntry::at("OmniCall", r"path C:\tmp\new", base + ChronoDuration::milliseconds(7)),
        ];

        let text = export_entries(&entries, ExportFormat::Timestamped);
        assert_eq!(text.lines().count(), 3);

        let parsed = parse_export(&text, ExportFormat::Timestamped).unwrap();
        let recovered: Vec<TurnEntry> = parsed
            .into_iter()
            .map(|e| TurnEntry::at(e.speaker, e.message, e.timestamp.unwrap()))
            .collect();
        assert_eq!(recovered, entries);
    }

    #[test]
    fn plain_export_drops_timestamps() {
        let entries = vec![
            TurnEntry::new("User", "hello: world"),
            TurnEntry::new("alice", "hi"),
        ];
        let text = export_entries(&entries, ExportFormat::Plain);
        assert_eq!(text, "User: hello: world\nalice: hi\n");

        let parsed = parse_export(&text, ExportFormat::Plain).unwrap();
        assert_eq!(parsed[0].speaker, "User");
        assert_eq!(parsed[0].message, "hello: world");
        assert!(parsed.iter().all(|e| e.timestamp.is_none()));
    }

    #[test]
    fn speaker_separators_survive_export() {
        let base = Utc::now();
        let entries = vec![
            TurnEntry::at("Lead: Strings", "hi", base),
            TurnEntry::at("Two\nLines", "second: part", base),
            TurnEntry::at("Brass [low]", r"a \: b", base),
        ];

        let text = export_entries(&entries, ExportFormat::Plain);
        assert_eq!(text.lines().count(), 3);
        let pairs: Vec<(String, String)> = parse_export(&text, ExportFormat::Plain)
            .unwrap()
            .into_iter()
            .map(|e| (e.speaker, e.message))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("Lead: Strings".to_string(), "hi".to_string()),
                ("Two\nLines".to_string(), "second: part".to_string()),
                ("Brass [low]".to_string(), r"a \: b".to_string()),
            ]
        );

        let text = export_entries(&entries, ExportFormat::Timestamped);
        assert_eq!(text.lines().count(), 3);
        let recovered: Vec<TurnEntry> = parse_export(&text, ExportFormat::Timestamped)
            .unwrap()
            .into_iter()
            .map(|e| TurnEntry::at(e.speaker, e.message, e.timestamp.unwrap()))
            .collect();
        assert_eq!(recovered, entries);
    }

    #[test]
    fn export_line_pattern_compiles() {
        assert!(export_line_pattern().is_some());
    }

    #[test]
    fn parse_reports_bad_lines() {
        let err = parse_export("no separator here\n", ExportFormat::Plain).unwrap_err();
        assert_eq!(err, ExportParseError::MissingSeparator { line: 1 });

        let err = parse_export("User [yesterday]: hi\n", ExportFormat::Timestamped).unwrap_err();
        assert!(matches!(err, ExportParseError::InvalidTimestamp { line: 1, .. }));
    }
}
