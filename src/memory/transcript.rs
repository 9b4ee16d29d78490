//! Plain-text transcript export and import
//!
//! Each turn is written as `[<name>:] <content>`. On import, lines prefixed
//! with the user's or the assistant's name start a turn; every other line,
//! bracketed or not, continues the previous turn.

use super::{Role, Turn};
use regex::Regex;

/// Display names used for transcript prefixes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeakerNames {
    pub user: String,
    pub assistant: String,
}

impl SpeakerNames {
    pub fn new(user: impl Into<String>, assistant: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            assistant: assistant.into(),
        }
    }

    pub fn for_role(&self, role: Role) -> &str {
        match role {
            Role::User => &self.user,
            Role::Assistant => &self.assistant,
        }
    }
}

/// `[<name>:] <content>`
pub fn prefixed(name: &str, content: &str) -> String {
    format!("[{name}:] {content}")
}

pub fn render(turns: &[Turn], names: &SpeakerNames) -> String {
    let mut out = String::new();
    for turn in turns {
        out.push_str(&prefixed(names.for_role(turn.role), &turn.content));
        out.push('\n');
    }
    out
}

fn speaker_prefix(names: &SpeakerNames) -> Option<Regex> {
    let pattern = format!(
        r"^\[({}|{}):\](.*)$",
        regex::escape(&names.user),
        regex::escape(&names.assistant)
    );
    match Regex::new(&pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            tracing::warn!(error = %e, "Cannot build transcript speaker pattern");
            None
        }
    }
}

/// Parse a transcript into ordered `(role, content)` pairs.
pub fn parse(text: &str, names: &SpeakerNames) -> Vec<(Role, String)> {
    let Some(prefix) = speaker_prefix(names) else {
        return Vec::new();
    };
    let mut entries: Vec<(Role, String)> = Vec::new();

    for line in text.lines() {
        if let Some(caps) = prefix.captures(line) {
            let role = if caps.get(1).is_some_and(|m| m.as_str() == names.user) {
                Role::User
            } else {
                Role::Assistant
            };
            let content = caps.get(2).map_or("", |m| m.as_str());
            entries.push((role, content.trim().to_string()));
        } else if let Some((_, content)) = entries.last_mut() {
            content.push('\n');
            content.push_str(line);
        } else if !line.trim().is_empty() {
            tracing::debug!(line = %line, "Skipping transcript line before first speaker");
        }
    }

    for (_, content) in &mut entries {
        let trimmed = content.trim_end();
        if trimmed.len() != content.len() {
            *content = trimmed.to_string();
        }
    }
    entries
}
