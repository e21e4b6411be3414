//! Turns yt-dlp console output into a [`ProgressState`].
//!
//! The interpreter holds no state of its own: callers own the `ProgressState`
//! and feed it lines in the order the child emitted them.

use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

const DOWNLOAD_TAG: &str = "[download]";
const DESTINATION_MARKER: &str = "Destination";
const ALREADY_DOWNLOADED_MARKER: &str = "has already been downloaded";
const PERCENT_MARKER: char = '%';
const RATE_MARKER: &str = "at";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Resolving,
    Starting,
    InProgress,
    AlreadyDownloaded,
    Complete,
    Cancelled,
    Failed,
}

impl Phase {
    pub fn label(&self) -> &'static str {
        match self {
            Phase::Idle => "Idle",
            Phase::Resolving => "Retrieving video information…",
            Phase::Starting => "Beginning download…",
            Phase::InProgress => "In progress…",
            Phase::AlreadyDownloaded => "Complete (already downloaded)",
            Phase::Complete => "Complete",
            Phase::Cancelled => "Cancelled",
            Phase::Failed => "Failed",
        }
    }

    /// No further output may change a finished state.
    pub fn is_finished(&self) -> bool {
        matches!(self, Phase::Complete | Phase::Cancelled | Phase::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressState {
    pub percent: u8,
    pub speed: Option<String>,
    pub phase: Phase,
    /// Exit code of the child, once it has exited on its own.
    pub exit_code: Option<i32>,
    /// Reason for `Failed`.
    pub error: Option<String>,
}

impl Default for ProgressState {
    fn default() -> Self {
        Self {
            percent: 0,
            speed: None,
            phase: Phase::Idle,
            exit_code: None,
            error: None,
        }
    }
}

impl ProgressState {
    pub fn resolving() -> Self {
        Self {
            phase: Phase::Resolving,
            ..Self::default()
        }
    }

    /// Child exited. Any exit code counts as `Complete`; the code is kept.
    pub fn mark_exited(&mut self, code: Option<i32>) {
        if self.phase.is_finished() {
            return;
        }
        self.phase = Phase::Complete;
        self.percent = 100;
        self.speed = None;
        self.exit_code = code;
    }

    pub fn mark_cancelled(&mut self) {
        self.phase = Phase::Cancelled;
        self.percent = 0;
        self.speed = None;
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        self.phase = Phase::Failed;
        self.speed = None;
        self.error = Some(reason.into());
    }
}

/// Removes ANSI escape sequences and stray C0 control characters. Tabs and
/// line breaks survive.
pub fn strip_control_sequences(text: &str) -> String {
    static ANSI_RE: OnceLock<Regex> = OnceLock::new();
    let ansi_re = ANSI_RE
        .get_or_init(|| Regex::new(r"\x1B(?:[@-Z\\-_]|\[[0-?]*[ -/]*[@-~])").unwrap());
    ansi_re
        .replace_all(text, "")
        .chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\r' | '\t'))
        .collect()
}

/// Splits on `\n` and `\r`; yt-dlp redraws its progress line with `\r`.
pub fn split_lines(text: &str) -> impl Iterator<Item = &str> {
    text.split(['\n', '\r']).filter(|line| !line.trim().is_empty())
}

/// Applies one cleaned line. Returns whether the state changed.
pub fn apply_line(state: &mut ProgressState, line: &str) -> bool {
    if state.phase.is_finished() {
        return false;
    }
    let before = state.clone();

    if line.contains(ALREADY_DOWNLOADED_MARKER) {
        state.phase = Phase::AlreadyDownloaded;
        state.percent = 100;
        state.speed = None;
    } else if line.contains(DOWNLOAD_TAG) {
        if line.contains(DESTINATION_MARKER) {
            state.phase = Phase::Starting;
        } else if line.contains(PERCENT_MARKER) {
            state.phase = Phase::InProgress;
            if let Some(percent) = parse_percent(line) {
                state.percent = percent;
            }
            if let Some(speed) = parse_speed(line) {
                state.speed = Some(speed);
            }
        }
    }

    *state != before
}

/// Cleans a raw chunk, applies each line in order, and returns the cleaned
/// lines for the log sink.
pub fn interpret_chunk(state: &mut ProgressState, chunk: &str) -> Vec<String> {
    let cleaned = strip_control_sequences(chunk);
    let mut lines = Vec::new();
    for line in split_lines(&cleaned) {
        apply_line(state, line);
        lines.push(line.trim_end().to_string());
    }
    lines
}

fn parse_percent(line: &str) -> Option<u8> {
    let (head, _) = line.split_once(PERCENT_MARKER)?;
    let token = head.split_whitespace().last()?;
    let value: f64 = token.parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    Some(value.clamp(0.0, 100.0) as u8)
}

fn parse_speed(line: &str) -> Option<String> {
    let mut tokens = line.split_whitespace();
    tokens.find(|t| *t == RATE_MARKER)?;
    tokens.next().map(str::to_string)
}
