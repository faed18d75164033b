//! Agent detection and the label rewrite that goes with it.
//!
//! Detection is a plain substring heuristic over freshly arrived output. The
//! label rewrite is a reducer step: it only fires while the label still has the
//! auto-generated `Session N` shape, so a user-chosen label is never touched.

use super::model::{AgentKind, Session};
use once_cell::sync::Lazy;
use regex::Regex;

/// Markers checked in order; the first hit wins.
const AGENT_MARKERS: &[(&str, AgentKind)] = &[
    ("claude code", AgentKind::ClaudeCode),
    ("/cost", AgentKind::ClaudeCode),
    ("github copilot", AgentKind::CopilotCli),
    ("copilot", AgentKind::CopilotCli),
];

static DEFAULT_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^session\s+\d+$").expect("default label pattern is valid"));

/// Label given to the n-th created session (1-based).
pub fn default_label(ordinal: usize) -> String {
    format!("Session {}", ordinal)
}

/// Whether a label still has the auto-generated shape.
pub fn is_default_label(label: &str) -> bool {
    DEFAULT_LABEL.is_match(label)
}

/// Classifies a chunk of terminal output, case-insensitively.
pub fn detect_agent(chunk: &str) -> Option<AgentKind> {
    let normalized = chunk.to_lowercase();
    AGENT_MARKERS
        .iter()
        .find(|(marker, _)| normalized.contains(marker))
        .map(|(_, agent)| *agent)
}

/// Last non-empty path component of a working directory, for labels.
pub fn cwd_basename(cwd: &str) -> &str {
    cwd.split(['/', '\\'])
        .filter(|part| !part.is_empty())
        .last()
        .unwrap_or("workspace")
}

/// Applies a detected agent to a session.
///
/// Returns `true` when the session changed. An agent that is already set is
/// never replaced, and the label is rewritten only while it is a default one.
pub fn apply_agent(session: &mut Session, agent: AgentKind) -> bool {
    if session.agent.is_some() {
        return false;
    }

    session.agent = Some(agent);
    if is_default_label(&session.label) {
        session.label = format!(
            "{} \u{2014} {}",
            agent.display_name(),
            cwd_basename(&session.cwd)
        );
    }
    true
}
