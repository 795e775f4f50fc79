use once_cell::sync::Lazy;
use regex::{Regex, RegexSet};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Only the tail of a capture says anything about the current state.
const WINDOW_LINES: usize = 20;

/// Interaction state of an agent pane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Prompt visible, waiting for the next instruction
    Idle,
    /// User is mid-interaction, nothing special detected
    #[default]
    Active,
    /// Agent is processing (spinner, reasoning, elapsed timer)
    Thinking,
    /// A confirmation or permission prompt is pending
    NeedsInput,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Active => "active",
            AgentStatus::Thinking => "thinking",
            AgentStatus::NeedsInput => "needs_input",
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operating mode advertised in the agent's footer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentMode {
    Plan,
    Code,
    Auto,
    /// Any "accept edits" style mode
    Edit,
}

impl AgentMode {
    fn normalize(raw: &str) -> Option<Self> {
        let raw = raw.to_lowercase();
        if raw.contains("accept") || raw.contains("edit") {
            return Some(AgentMode::Edit);
        }
        match raw.as_str() {
            "plan" => Some(AgentMode::Plan),
            "code" => Some(AgentMode::Code),
            "auto" => Some(AgentMode::Auto),
            _ => None,
        }
    }
}

/// Everything extracted from one capture
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaneInfo {
    pub status: AgentStatus,
    pub tokens: u64,
    pub thinking_time: Duration,
    pub last_line: String,
    pub mode: Option<AgentMode>,
}

/// One priority tier: if any pattern in `patterns` matches, the tier's
/// status wins.
struct Rule {
    status: AgentStatus,
    patterns: RegexSet,
}

/// Tiers in priority order. First match wins; no match means `Active`.
static RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    vec![
        Rule {
            status: AgentStatus::NeedsInput,
            patterns: RegexSet::new([
                r"(?i)\[Y/n\]",
                r"(?i)\[y/N\]",
                r"(?i)Permission requested",
                r"(?i)Allow\?",
                r"(?i)Proceed\?",
                r"(?i)Are you sure",
                r"(?i)Continue\?",
                r"(?i)\(yes/no\)",
                r"(?i)Press any key",
                r"(?i)Hit enter",
                r"(?i)chat about this",
                r"(?i)skip interview and plan",
                r"(?i)Ready to submit your answers",
            ])
            .unwrap(),
        },
        Rule {
            status: AgentStatus::Thinking,
            patterns: RegexSet::new([
                r"(?i)thinking\.{3}",
                r"(?i)thinking…",
                r"(?i)reasoning",
                r"⠋|⠙|⠹|⠸|⠼|⠴|⠦|⠧|⠇|⠏",
                r"Working\.\.\.",
                r"Processing\.\.\.",
                r"\(esc to cancel\)",
                r"\(ctrl.* to interrupt\)",
                r"thought for \d+",
                r"thinking",
            ])
            .unwrap(),
        },
        Rule {
            status: AgentStatus::Idle,
            patterns: RegexSet::new([
                r"(?m)❯\s*$",
                r"(?m)>\s*$",
                r"(?m)claude>\s*$",
                r"↵ send",
                r"⏵⏵",
                r"▐▛███▜▌",
            ])
            .unwrap(),
        },
    ]
});

static RE_AGENT_PANE: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([r"Claude Code", r"claude>", r"❯", r"ing\.\.\. \(ctrl"]).unwrap()
});

/// Color, cursor and OSC title sequences
static RE_ESCAPES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[()][A-Za-z0-9]")
        .unwrap()
});

static RE_TOKENS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"↓\s*([\d,.]+)(k?)\s*tokens?").unwrap());

static RE_THINKING_TIME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Thinking[^(]*\((\d+)(m|s)?\s*(?:(\d+)s)?\)").unwrap()
});

static RE_MODE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(plan|code|auto|accept[\s-]?edits?)\s+(?:mode\s+)?on\s+\(shift\+tab").unwrap()
});

/// Stateless classifier for captured pane text
#[derive(Debug, Clone, Copy, Default)]
pub struct Classifier;

impl Classifier {
    pub fn new() -> Self {
        Self
    }

    /// Whether the capture looks like it comes from an agent pane at all
    pub fn is_monitorable(&self, content: &str) -> bool {
        RE_AGENT_PANE.is_match(&strip_escapes(content))
    }

    /// Classify a raw capture
    pub fn classify(&self, content: &str) -> AgentStatus {
        let clean = strip_escapes(content);
        classify_window(&tail_lines(&clean, WINDOW_LINES))
    }

    /// Operating mode from the footer hint, if one is shown
    pub fn detect_mode(&self, content: &str) -> Option<AgentMode> {
        let clean = strip_escapes(content);
        RE_MODE
            .captures(&clean)
            .and_then(|caps| AgentMode::normalize(&caps[1]))
    }

    /// Full extraction: status, token count, thinking time, last line, mode
    pub fn extract_info(&self, content: &str) -> PaneInfo {
        let clean = strip_escapes(content);
        let window = tail_lines(&clean, WINDOW_LINES);

        PaneInfo {
            status: classify_window(&window),
            // Token counters can scroll above the window
            tokens: parse_tokens(&clean),
            thinking_time: parse_thinking_time(&window),
            last_line: last_non_empty_line(&clean).to_string(),
            mode: RE_MODE
                .captures(&clean)
                .and_then(|caps| AgentMode::normalize(&caps[1])),
        }
    }
}

fn classify_window(window: &str) -> AgentStatus {
    RULES
        .iter()
        .find(|rule| rule.patterns.is_match(window))
        .map(|rule| rule.status)
        .unwrap_or_default()
}

pub fn strip_escapes(content: &str) -> String {
    RE_ESCAPES.replace_all(content, "").into_owned()
}

fn tail_lines(content: &str, n: usize) -> String {
    let lines: Vec<&str> = content.lines().rev().take(n).collect();
    lines.into_iter().rev().collect::<Vec<_>>().join("\n")
}

fn last_non_empty_line(content: &str) -> &str {
    content
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("")
}

fn parse_tokens(content: &str) -> u64 {
    let Some(caps) = RE_TOKENS.captures(content) else {
        return 0;
    };
    let Ok(value) = caps[1].replace(',', "").parse::<f64>() else {
        return 0;
    };
    let multiplier = if caps[2].is_empty() { 1.0 } else { 1000.0 };
    (value * multiplier).round() as u64
}

fn parse_thinking_time(window: &str) -> Duration {
    let Some(caps) = RE_THINKING_TIME.captures(window) else {
        return Duration::ZERO;
    };
    let first: u64 = caps[1].parse().unwrap_or(0);
    match caps.get(2).map(|m| m.as_str()) {
        Some("m") => {
            let secs: u64 = caps
                .get(3)
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(0);
            Duration::from_secs(first * 60 + secs)
        }
        _ => Duration::from_secs(first),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_monitorable() {
        let c = Classifier::new();
        assert!(!c.is_monitorable(""));
        assert!(!c.is_monitorable("hello world"));
        assert!(c.is_monitorable("some output\n❯"));
        assert!(c.is_monitorable("✽ Thinking... (ctrl+c to cancel)"));
        assert!(c.is_monitorable("Claude Code version 1.0"));
        assert!(c.is_monitorable("\x1b[38;5;174mClaude\x1b[0m Code"));
    }

    #[test]
    fn test_detect_needs_input() {
        let c = Classifier::new();
        assert_eq!(c.classify("Allow execution? [Y/n]"), AgentStatus::NeedsInput);
        assert_eq!(
            c.classify("Permission requested for bash"),
            AgentStatus::NeedsInput
        );
    }

    #[test]
    fn test_detect_thinking() {
        let c = Classifier::new();
        assert_eq!(
            c.classify("✽ Thinking... (ctrl+c to cancel)"),
            AgentStatus::Thinking
        );
        assert_eq!(c.classify("⠹ Compiling"), AgentStatus::Thinking);
    }

    #[test]
    fn test_detect_idle() {
        let c = Classifier::new();
        assert_eq!(c.classify("some output\n❯ "), AgentStatus::Idle);
        assert_eq!(
            c.classify(" ▐▛███▜▌   Claude Code v2.1.12\n▝▜█████▛▘  Opus 4.5"),
            AgentStatus::Idle
        );
    }

    #[test]
    fn test_unmatched_defaults_to_active() {
        let c = Classifier::new();
        assert_eq!(c.classify("? for shortcuts"), AgentStatus::Active);
        assert_eq!(
            c.classify("accept edits on (shift+tab to cycle)"),
            AgentStatus::Active
        );
        assert_eq!(c.classify(""), AgentStatus::Active);
    }

    #[test]
    fn test_urgent_beats_idle_prompt() {
        let c = Classifier::new();
        let content = "Do you want to proceed? [y/N]\n\n❯ ";
        assert_eq!(c.classify(content), AgentStatus::NeedsInput);

        let content = "Thinking...\nAre you sure you want to delete this?\n> ";
        assert_eq!(c.classify(content), AgentStatus::NeedsInput);
    }

    #[test]
    fn test_patterns_outside_window_are_ignored() {
        let c = Classifier::new();
        let mut content = String::from("Allow? [Y/n]\n");
        for i in 0..25 {
            content.push_str(&format!("line {i}\n"));
        }
        content.push_str("❯ ");
        assert_eq!(c.classify(&content), AgentStatus::Idle);
    }

    #[test]
    fn test_escape_sequences_are_stripped() {
        let c = Classifier::new();
        let content = "\x1b[1m\x1b[33mAllow?\x1b[0m \x1b[2K[Y/n]";
        assert_eq!(c.classify(content), AgentStatus::NeedsInput);
        assert_eq!(strip_escapes("\x1b]0;title\x07plain"), "plain");
    }

    #[test]
    fn test_token_extraction() {
        let c = Classifier::new();
        assert_eq!(c.extract_info("hello world").tokens, 0);
        assert_eq!(c.extract_info("↓ 500 tokens").tokens, 500);
        assert_eq!(c.extract_info("↓ 3.3k tokens").tokens, 3300);
        assert_eq!(c.extract_info("↓ 1,250 tokens").tokens, 1250);
    }

    #[test]
    fn test_tokens_found_above_window() {
        let c = Classifier::new();
        let mut content = String::from("· Brewing… (↓ 2.0k tokens)\n");
        for _ in 0..30 {
            content.push_str("output\n");
        }
        assert_eq!(c.extract_info(&content).tokens, 2000);
    }

    #[test]
    fn test_thinking_time_extraction() {
        let c = Classifier::new();
        assert_eq!(c.extract_info("❯ ").thinking_time, Duration::ZERO);
        assert_eq!(
            c.extract_info("✽ Thinking… (1m 5s)").thinking_time,
            Duration::from_secs(65)
        );
        assert_eq!(
            c.extract_info("✽ Thinking (42s)").thinking_time,
            Duration::from_secs(42)
        );
        assert_eq!(
            c.extract_info("Thinking (3m)").thinking_time,
            Duration::from_secs(180)
        );
    }

    #[test]
    fn test_last_line() {
        let c = Classifier::new();
        let info = c.extract_info("first\n  Allow write to main.rs? [Y/n]  \n\n   \n");
        assert_eq!(info.last_line, "Allow write to main.rs? [Y/n]");
        assert_eq!(info.status, AgentStatus::NeedsInput);
    }

    #[test]
    fn test_detect_mode() {
        let c = Classifier::new();
        assert_eq!(
            c.detect_mode("⏸ plan mode on (shift+tab to cycle)"),
            Some(AgentMode::Plan)
        );
        assert_eq!(
            c.detect_mode("⏵⏵ accept edits on (shift+tab to cycle)"),
            Some(AgentMode::Edit)
        );
        assert_eq!(
            c.detect_mode("auto-accept-edit on (shift+tab to cycle)"),
            Some(AgentMode::Edit)
        );
        assert_eq!(c.detect_mode("? for shortcuts"), None);
    }
}
