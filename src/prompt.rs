//! Chat payload assembly
//!
//! Every request carries the persona block, the serialized log and the new
//! user message.

use crate::expression::Theme;
use crate::llm::ChatMessage;
use crate::memory::Turn;
use chrono::{DateTime, TimeZone};

pub const DEFAULT_APPEARANCE: &str = "You have White skin\nYou have Purple eyes\nYou have Brown Lob hair\nYou wear Green hoodie\nYou are in Digital program window";

/// Who the assistant is and what it knows about the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonaContext {
    pub ai_name: String,
    pub instructions: String,
    pub user_avatar: String,
    pub recollection: String,
    pub appearance: String,
    pub theme: Theme,
}

impl PersonaContext {
    pub fn new(ai_name: impl Into<String>) -> Self {
        Self {
            ai_name: ai_name.into(),
            instructions: String::new(),
            user_avatar: String::new(),
            recollection: String::new(),
            appearance: DEFAULT_APPEARANCE.to_string(),
            theme: Theme::default(),
        }
    }
}

pub fn theme_context(theme: Theme) -> &'static str {
    match theme {
        Theme::Light => "Currently it is light in the website, you have a day time in the locations",
        Theme::Dark => "Currently it is dark in the website, you have a night time in the locations",
    }
}

pub fn time_context<Tz: TimeZone>(now: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("Current time in the real world is {}", now.format("%-I:%M:%S %p"))
}

/// `role: content` per turn, newline-joined.
pub fn serialize_history(turns: &[Turn]) -> String {
    turns
        .iter()
        .map(|t| format!("{}: {}", t.role, t.content))
        .collect::<Vec<_>>()
        .join("\n")
}

fn persona_block(persona: &PersonaContext, time: &str) -> String {
    let moment = [time, persona.appearance.as_str(), theme_context(persona.theme)].join(",");
    format!(
        "::YOUR NAME IS::\n{}\n\n::INFO ABOUT YOU::\n{}\n\n::INFO ABOUT USER::\n{}\n\n::YOUR MEMORY::\n{}\n\n::CONTEXT OF THE MOMENT::\n{}",
        persona.ai_name, persona.instructions, persona.user_avatar, persona.recollection, moment
    )
}

/// Persona system message, history system message, then the user message.
pub fn build_messages(
    persona: &PersonaContext,
    history: &[Turn],
    user_text: &str,
    time: &str,
) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(persona_block(persona, time)),
        ChatMessage::system(format!("::PREVIOUS MESSAGES::\n{}", serialize_history(history))),
        ChatMessage::user(user_text),
    ]
}
