//! Chat settings
//!
//! Built-in defaults are overridden by values stored locally and then by the
//! remote state document. An environment variable set to a usable value wins
//! over both.

use crate::expression::Theme;
use crate::persistence::{PersistResult, PersistenceMirror, RemoteState};
use crate::prompt::{PersonaContext, DEFAULT_APPEARANCE};
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::path::PathBuf;
use thiserror::Error;

pub const DEFAULT_MODEL: &str = "NicoleShelterV1";
pub const DEFAULT_OLLAMA_HOST: &str = "http://localhost";
pub const DEFAULT_OLLAMA_PORT: u16 = 11434;
pub const DEFAULT_AI_NAME: &str = "Nicole";
pub const DEFAULT_USER_NAME: &str = "You";
pub const DEFAULT_TRIM_LIMIT: usize = 20;
pub const DEFAULT_SYNC_URL: &str = "http://localhost:8000";
pub const DEFAULT_SIGNAL_BAUD: u32 = 9600;

const ENV_MODEL: &str = "COMPANION_MODEL";
const ENV_PORT: &str = "COMPANION_OLLAMA_PORT";
const ENV_AI_NAME: &str = "COMPANION_AI_NAME";
const ENV_USER_NAME: &str = "COMPANION_USER_NAME";
const ENV_TRIM_LIMIT: &str = "COMPANION_TRIM_LIMIT";
const ENV_THEME: &str = "COMPANION_THEME";
const ENV_DEVICE: &str = "COMPANION_SIGNAL_DEVICE";
const ENV_BAUD: &str = "COMPANION_SIGNAL_BAUD";
const ENV_INSTRUCTIONS_FILE: &str = "COMPANION_INSTRUCTIONS_FILE";
const ENV_AVATAR_FILE: &str = "COMPANION_AVATAR_FILE";
const ENV_RECOLLECTION_FILE: &str = "COMPANION_RECOLLECTION_FILE";

/// Environment variables that, when set to a usable value, take precedence
/// over stored settings.
const PINNABLE_VARS: [&str; 11] = [
    ENV_MODEL,
    ENV_PORT,
    ENV_AI_NAME,
    ENV_USER_NAME,
    ENV_TRIM_LIMIT,
    ENV_THEME,
    ENV_DEVICE,
    ENV_BAUD,
    ENV_INSTRUCTIONS_FILE,
    ENV_AVATAR_FILE,
    ENV_RECOLLECTION_FILE,
];

pub const KEY_AI_NAME: &str = "ai-name";
pub const KEY_MODEL: &str = "ollama-model";
pub const KEY_PORT: &str = "ollama-port";
pub const KEY_DEVICE: &str = "arduino-device";
pub const KEY_BAUD: &str = "arduino-baud";
pub const KEY_INSTRUCTIONS: &str = "instructions";
pub const KEY_AVATAR: &str = "avatar";
pub const KEY_RECOLLECTION: &str = "recollection";
pub const KEY_APPEARANCE: &str = "appearanceContext";
pub const KEY_SETTINGS: &str = "settings";

/// Every settings key read back from storage.
pub const STORED_KEYS: [&str; 10] = [
    KEY_AI_NAME,
    KEY_MODEL,
    KEY_PORT,
    KEY_DEVICE,
    KEY_BAUD,
    KEY_INSTRUCTIONS,
    KEY_AVATAR,
    KEY_RECOLLECTION,
    KEY_APPEARANCE,
    KEY_SETTINGS,
];

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    PersonaFile {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatSettings {
    pub model: String,
    pub ollama_host: String,
    pub ollama_port: u16,
    pub ai_name: String,
    pub user_name: String,
    pub trim_limit: usize,
    pub theme: Theme,
    pub db_path: PathBuf,
    /// `None` disables the remote mirror.
    pub sync_url: Option<String>,
    pub signal_device: String,
    pub signal_baud: u32,
    pub instructions: String,
    pub avatar: String,
    pub recollection: String,
    pub appearance: String,
    instructions_file: Option<PathBuf>,
    avatar_file: Option<PathBuf>,
    recollection_file: Option<PathBuf>,
    /// Variables from [`PINNABLE_VARS`] that were explicitly set.
    pinned: BTreeSet<&'static str>,
}

impl ChatSettings {
    /// Load from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let db_path = var("COMPANION_DB_PATH").map_or_else(
            || {
                let home = lookup("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".companion-chat").join("state.db")
            },
            PathBuf::from,
        );

        // An explicitly empty sync URL disables the remote mirror.
        let sync_url = match lookup("COMPANION_SYNC_URL") {
            Some(url) if url.trim().is_empty() => None,
            Some(url) => Some(url),
            None => Some(DEFAULT_SYNC_URL.to_string()),
        };

        let pinned = PINNABLE_VARS
            .into_iter()
            .filter(|&key| var(key).is_some_and(|v| is_usable(key, &v)))
            .collect();

        Self {
            model: var(ENV_MODEL).unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            ollama_host: var("COMPANION_OLLAMA_HOST")
                .unwrap_or_else(|| DEFAULT_OLLAMA_HOST.to_string()),
            ollama_port: var(ENV_PORT)
                .and_then(|v| parse_or_warn(ENV_PORT, &v))
                .unwrap_or(DEFAULT_OLLAMA_PORT),
            ai_name: var(ENV_AI_NAME).unwrap_or_else(|| DEFAULT_AI_NAME.to_string()),
            user_name: var(ENV_USER_NAME).unwrap_or_else(|| DEFAULT_USER_NAME.to_string()),
            trim_limit: var(ENV_TRIM_LIMIT)
                .and_then(|v| parse_or_warn(ENV_TRIM_LIMIT, &v))
                .unwrap_or(DEFAULT_TRIM_LIMIT),
            theme: var(ENV_THEME)
                .and_then(|v| parse_or_warn(ENV_THEME, &v))
                .unwrap_or_default(),
            db_path,
            sync_url,
            signal_device: var(ENV_DEVICE)
                .unwrap_or_else(|| crate::signal::DISABLED_DEVICE.to_string()),
            signal_baud: var(ENV_BAUD)
                .and_then(|v| parse_or_warn(ENV_BAUD, &v))
                .unwrap_or(DEFAULT_SIGNAL_BAUD),
            instructions: String::new(),
            avatar: String::new(),
            recollection: String::new(),
            appearance: DEFAULT_APPEARANCE.to_string(),
            instructions_file: var(ENV_INSTRUCTIONS_FILE).map(PathBuf::from),
            avatar_file: var(ENV_AVATAR_FILE).map(PathBuf::from),
            recollection_file: var(ENV_RECOLLECTION_FILE).map(PathBuf::from),
            pinned,
        }
    }

    fn is_pinned(&self, var: &str) -> bool {
        self.pinned.contains(var)
    }

    /// Read the persona text files named in the environment.
    pub fn load_persona_files(&mut self) -> Result<(), ConfigError> {
        let files = [
            (self.instructions_file.clone(), &mut self.instructions),
            (self.avatar_file.clone(), &mut self.avatar),
            (self.recollection_file.clone(), &mut self.recollection),
        ];
        for (path, target) in files {
            let Some(path) = path else { continue };
            *target = std::fs::read_to_string(&path)
                .map_err(|source| ConfigError::PersonaFile {
                    path: path.clone(),
                    source,
                })?
                .trim()
                .to_string();
        }
        Ok(())
    }

    /// `{host}:{port}` of the inference server.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.ollama_host.trim_end_matches('/'), self.ollama_port)
    }

    pub fn persona(&self) -> PersonaContext {
        PersonaContext {
            ai_name: self.ai_name.clone(),
            instructions: self.instructions.clone(),
            user_avatar: self.avatar.clone(),
            recollection: self.recollection.clone(),
            appearance: self.appearance.clone(),
            theme: self.theme,
        }
    }

    /// Apply stored fields. Unknown keys and unusable values are ignored, as
    /// are fields whose environment variable was explicitly set.
    pub fn overlay(&mut self, stored: &Map<String, Value>) {
        if let Some(v) = string_field(stored, KEY_AI_NAME)
            .filter(|_| !self.is_pinned(ENV_AI_NAME))
        {
            self.ai_name = v;
        }
        if let Some(v) = string_field(stored, KEY_MODEL).filter(|_| !self.is_pinned(ENV_MODEL)) {
            self.model = v;
        }
        if let Some(v) = number_field(stored, KEY_PORT).filter(|_| !self.is_pinned(ENV_PORT)) {
            self.ollama_port = v;
        }
        if let Some(v) = string_field(stored, KEY_DEVICE).filter(|_| !self.is_pinned(ENV_DEVICE)) {
            self.signal_device = v;
        }
        if let Some(v) = number_field(stored, KEY_BAUD).filter(|_| !self.is_pinned(ENV_BAUD)) {
            self.signal_baud = v;
        }
        if let Some(v) = string_field(stored, KEY_INSTRUCTIONS)
            .filter(|_| !self.is_pinned(ENV_INSTRUCTIONS_FILE))
        {
            self.instructions = v;
        }
        if let Some(v) = string_field(stored, KEY_AVATAR)
            .filter(|_| !self.is_pinned(ENV_AVATAR_FILE))
        {
            self.avatar = v;
        }
        if let Some(v) = string_field(stored, KEY_RECOLLECTION)
            .filter(|_| !self.is_pinned(ENV_RECOLLECTION_FILE))
        {
            self.recollection = v;
        }
        if let Some(v) = string_field(stored, KEY_APPEARANCE) {
            self.appearance = v;
        }
        if let Some(Value::Object(settings)) = stored.get(KEY_SETTINGS) {
            if let Some(v) = string_field(settings, "userName")
                .filter(|_| !self.is_pinned(ENV_USER_NAME))
            {
                self.user_name = v;
            }
            if let Some(v) = number_field(settings, "trimLimit")
                .filter(|_| !self.is_pinned(ENV_TRIM_LIMIT))
            {
                self.trim_limit = v;
            }
            if let Some(v) = string_field(settings, "theme")
                .and_then(|t| t.parse().ok())
                .filter(|_| !self.is_pinned(ENV_THEME))
            {
                self.theme = v;
            }
        }
    }

    /// Apply locally stored settings, then the remote document.
    pub fn overlay_stored(&mut self, mirror: &PersistenceMirror, remote: &RemoteState) {
        let mut local = Map::new();
        for key in STORED_KEYS {
            match mirror.read_field(key) {
                Ok(Some(value)) => {
                    local.insert(key.to_string(), value);
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(key = %key, error = %e, "Failed to read stored setting"),
            }
        }
        self.overlay(&local);
        self.overlay(remote);
    }

    /// Persist the user-editable settings through the mirror.
    pub fn save(&self, mirror: &PersistenceMirror) -> PersistResult<()> {
        mirror.write_field(KEY_AI_NAME, json!(self.ai_name))?;
        mirror.write_field(KEY_MODEL, json!(self.model))?;
        mirror.write_field(KEY_PORT, json!(self.ollama_port))?;
        mirror.write_field(KEY_DEVICE, json!(self.signal_device))?;
        mirror.write_field(KEY_BAUD, json!(self.signal_baud))?;
        mirror.write_field(
            KEY_SETTINGS,
            json!({
                "userName": self.user_name,
                "trimLimit": self.trim_limit,
                "theme": self.theme.as_str(),
            }),
        )?;
        Ok(())
    }
}

/// Whether an explicitly set variable holds a value `from_lookup` accepted.
fn is_usable(key: &str, value: &str) -> bool {
    let value = value.trim();
    match key {
        ENV_PORT => value.parse::<u16>().is_ok(),
        ENV_TRIM_LIMIT => value.parse::<usize>().is_ok(),
        ENV_BAUD => value.parse::<u32>().is_ok(),
        ENV_THEME => value.parse::<Theme>().is_ok(),
        _ => true,
    }
}

fn parse_or_warn<T: std::str::FromStr>(key: &str, value: &str) -> Option<T> {
    let parsed = value.trim().parse().ok();
    if parsed.is_none() {
        tracing::warn!(key = %key, value = %value, "Ignoring unparseable setting");
    }
    parsed
}

fn string_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Numbers may be stored as JSON numbers or numeric strings.
fn number_field<T: std::str::FromStr + TryFrom<u64>>(map: &Map<String, Value>, key: &str) -> Option<T> {
    match map.get(key)? {
        Value::Number(n) => n.as_u64().and_then(|n| T::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryLocalStore;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn settings_from(pairs: &[(&str, &str)]) -> ChatSettings {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ChatSettings::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let settings = settings_from(&[("HOME", "/home/me")]);
        assert_eq!(settings.model, DEFAULT_MODEL);
        assert_eq!(settings.endpoint(), "http://localhost:11434");
        assert_eq!(settings.ai_name, "Nicole");
        assert_eq!(settings.user_name, "You");
        assert_eq!(settings.trim_limit, 20);
        assert_eq!(settings.signal_device, "disabled");
        assert_eq!(settings.signal_baud, 9600);
        assert_eq!(settings.sync_url.as_deref(), Some(DEFAULT_SYNC_URL));
        assert_eq!(
            settings.db_path,
            PathBuf::from("/home/me/.companion-chat/state.db")
        );
    }

    #[test]
    fn test_env_overrides_and_bad_numbers() {
        let settings = settings_from(&[
            ("COMPANION_MODEL", "llama3.2"),
            ("COMPANION_OLLAMA_PORT", "not-a-port"),
            ("COMPANION_TRIM_LIMIT", "30"),
            ("COMPANION_SYNC_URL", ""),
            ("COMPANION_THEME", "dark"),
        ]);
        assert_eq!(settings.model, "llama3.2");
        assert_eq!(settings.ollama_port, DEFAULT_OLLAMA_PORT);
        assert_eq!(settings.trim_limit, 30);
        assert_eq!(settings.sync_url, None);
        assert_eq!(settings.theme, Theme::Dark);
    }

    #[test]
    fn test_remote_overrides_local() {
        let store = Arc::new(MemoryLocalStore::new());
        let mirror = PersistenceMirror::local_only(store);
        mirror.write_field(KEY_AI_NAME, json!("Local")).unwrap();
        mirror.write_field(KEY_PORT, json!("11500")).unwrap();
        mirror
            .write_field(KEY_SETTINGS, json!({"userName": "Sam", "trimLimit": 40}))
            .unwrap();

        let mut remote = RemoteState::new();
        remote.insert(KEY_AI_NAME.to_string(), json!("Remote"));
        remote.insert(KEY_BAUD.to_string(), json!(115_200));
        remote.insert(KEY_MODEL.to_string(), json!(""));

        let mut settings = settings_from(&[]);
        settings.overlay_stored(&mirror, &remote);

        assert_eq!(settings.ai_name, "Remote");
        assert_eq!(settings.ollama_port, 11500);
        assert_eq!(settings.signal_baud, 115_200);
        assert_eq!(settings.user_name, "Sam");
        assert_eq!(settings.trim_limit, 40);
        assert_eq!(settings.model, DEFAULT_MODEL);
    }

    #[test]
    fn test_save_then_overlay_round_trips() {
        let mirror = PersistenceMirror::local_only(Arc::new(MemoryLocalStore::new()));
        let mut saved = settings_from(&[]);
        saved.ai_name = "Ari".to_string();
        saved.user_name = "Kim".to_string();
        saved.theme = Theme::Dark;
        saved.save(&mirror).unwrap();

        let mut loaded = settings_from(&[]);
        loaded.overlay_stored(&mirror, &RemoteState::new());
        assert_eq!(loaded.ai_name, "Ari");
        assert_eq!(loaded.user_name, "Kim");
        assert_eq!(loaded.theme, Theme::Dark);
    }

    #[test]
    fn test_explicit_env_beats_stored_settings() {
        let mirror = PersistenceMirror::local_only(Arc::new(MemoryLocalStore::new()));

        let mut first = settings_from(&[
            ("COMPANION_MODEL", "llama3"),
            ("COMPANION_TRIM_LIMIT", "30"),
        ]);
        first.overlay_stored(&mirror, &RemoteState::new());
        first.save(&mirror).unwrap();

        let mut second = settings_from(&[
            ("COMPANION_MODEL", "mistral"),
            ("COMPANION_TRIM_LIMIT", "oops"),
            ("COMPANION_THEME", "dark"),
        ]);
        second.overlay_stored(&mirror, &RemoteState::new());
        assert_eq!(second.model, "mistral");
        assert_eq!(second.trim_limit, 30);
        assert_eq!(second.theme, Theme::Dark);
        second.save(&mirror).unwrap();

        let mut third = settings_from(&[]);
        third.overlay_stored(&mirror, &RemoteState::new());
        assert_eq!(third.model, "mistral");
        assert_eq!(third.theme, Theme::Dark);
    }

    #[test]
    fn test_persona_files() {
        let dir = TempDir::new().unwrap();
        let instructions = dir.path().join("instructions.txt");
        std::fs::write(&instructions, "Be kind.\n").unwrap();

        let path = instructions.to_string_lossy().to_string();
        let mut settings = settings_from(&[("COMPANION_INSTRUCTIONS_FILE", path.as_str())]);
        settings.load_persona_files().unwrap();
        assert_eq!(settings.instructions, "Be kind.");
        assert_eq!(settings.persona().instructions, "Be kind.");

        let mut missing = settings_from(&[("COMPANION_AVATAR_FILE", "/nonexistent/avatar.txt")]);
        assert!(matches!(
            missing.load_persona_files(),
            Err(ConfigError::PersonaFile { .. })
        ));
    }
}
