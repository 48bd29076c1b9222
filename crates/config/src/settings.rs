// Application settings
// Loaded from ~/.config/pqstep/settings.json (or $PQSTEP_CONFIG_DIR/settings.json)

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Overrides the directory holding settings.json
pub const CONFIG_DIR_ENV: &str = "PQSTEP_CONFIG_DIR";
pub const DOCUMENT_PATH_ENV: &str = "PQSTEP_DOCUMENT_PATH";
pub const QUERY_NAME_ENV: &str = "PQSTEP_QUERY_NAME";
pub const DEFAULT_PROMPT_ENV: &str = "PQSTEP_DEFAULT_PROMPT";

/// Query modified when neither the request nor the settings name one
pub const DEFAULT_QUERY_NAME: &str = "Table1";

/// Model provider selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AIProvider {
    /// Model calls disabled; only explicit fragments can be spliced
    None,
    /// Anthropic Messages API (default)
    #[default]
    Anthropic,
    /// OpenAI Chat Completions API
    #[serde(rename = "openai")]
    OpenAI,
}

impl AIProvider {
    /// Returns true if model calls are enabled
    pub fn is_enabled(&self) -> bool {
        !matches!(self, AIProvider::None)
    }

    /// Lowercase name used in key lookup and diagnostics
    pub fn name(&self) -> &'static str {
        match self {
            AIProvider::None => "none",
            AIProvider::Anthropic => "anthropic",
            AIProvider::OpenAI => "openai",
        }
    }

    /// Parse a provider name as typed on the command line
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "none" => Some(AIProvider::None),
            "anthropic" => Some(AIProvider::Anthropic),
            "openai" => Some(AIProvider::OpenAI),
            _ => None,
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            AIProvider::None => "",
            AIProvider::Anthropic => "claude-3-haiku-20240307",
            AIProvider::OpenAI => "gpt-4o-mini",
        }
    }

    pub fn default_endpoint(&self) -> &'static str {
        match self {
            AIProvider::None => "",
            AIProvider::Anthropic => "https://api.anthropic.com",
            AIProvider::OpenAI => "https://api.openai.com",
        }
    }
}

/// Model settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AISettings {
    pub provider: AIProvider,

    /// Model identifier (empty = provider default)
    pub model: String,

    /// Base URL override, mostly for proxies and tests
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    pub max_tokens: u32,

    pub temperature: f32,
}

impl Default for AISettings {
    fn default() -> Self {
        Self {
            provider: AIProvider::default(),
            model: String::new(),
            endpoint: None,
            max_tokens: 256,
            temperature: 0.0,
        }
    }
}

impl AISettings {
    /// Get the effective model (user-specified or provider default)
    pub fn effective_model(&self) -> &str {
        if self.model.is_empty() {
            self.provider.default_model()
        } else {
            &self.model
        }
    }

    /// Get the effective base URL, without trailing slash
    pub fn effective_endpoint(&self) -> &str {
        self.endpoint
            .as_deref()
            .filter(|e| !e.trim().is_empty())
            .unwrap_or_else(|| self.provider.default_endpoint())
            .trim_end_matches('/')
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    // Document
    #[serde(rename = "document.path")]
    pub document_path: Option<PathBuf>,

    #[serde(rename = "document.query")]
    pub query_name: String,

    // Prompt substituted for the `update` shortcut
    #[serde(rename = "prompt.default")]
    pub default_prompt: Option<String>,

    // AI
    #[serde(rename = "ai", default)]
    pub ai: AISettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            document_path: None,
            query_name: DEFAULT_QUERY_NAME.to_string(),
            default_prompt: None,
            ai: AISettings::default(),
        }
    }
}

impl Settings {
    /// Directory holding settings.json
    pub fn config_dir() -> PathBuf {
        match std::env::var_os(CONFIG_DIR_ENV) {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("pqstep"),
        }
    }

    /// Get the settings file path
    pub fn config_path() -> PathBuf {
        Self::config_dir().join("settings.json")
    }

    /// Load settings from disk and apply environment overrides
    pub fn load() -> Self {
        let mut settings = Self::load_from(&Self::config_path());
        settings.apply_overrides(|name| std::env::var(name).ok());
        settings
    }

    /// Load settings from `path`, falling back to defaults.
    ///
    /// A missing file is created with the commented default contents.
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            let settings = Self::default();
            create_default_file(path);
            return settings;
        }

        match fs::read_to_string(path) {
            Ok(contents) => match Self::parse(&contents) {
                Ok(settings) => settings,
                Err(e) => {
                    log::warn!("Error parsing {}: {}; using default settings", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                log::warn!("Error reading {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Parse settings text. Lines starting with `//` are comments.
    pub fn parse(contents: &str) -> Result<Self, serde_json::Error> {
        let cleaned: String = contents
            .lines()
            .filter(|line| !line.trim().starts_with("//"))
            .collect::<Vec<_>>()
            .join("\n");
        serde_json::from_str(&cleaned)
    }

    /// Apply `PQSTEP_*` overrides. Empty values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(path) = get(DOCUMENT_PATH_ENV) {
            self.document_path = Some(PathBuf::from(path));
        }
        if let Some(query) = get(QUERY_NAME_ENV) {
            self.query_name = query.trim().to_string();
        }
        if let Some(prompt) = get(DEFAULT_PROMPT_ENV) {
            self.default_prompt = Some(prompt);
        }
    }

    /// Query name to use, never empty
    pub fn effective_query(&self) -> &str {
        let query = self.query_name.trim();
        if query.is_empty() {
            DEFAULT_QUERY_NAME
        } else {
            query
        }
    }

    /// Get the config file path for display
    pub fn config_path_display() -> String {
        Self::config_path().to_string_lossy().to_string()
    }
}

const DEFAULT_CONFIG: &str = r#"{
    // Power Query document holding the queries (section export, *.pq)
    "document.path": null,
    "document.query": "Table1",

    // Instruction used when the prompt is just "update"
    "prompt.default": null,

    // Model used to write new steps
    // Provider options: "none", "anthropic", "openai"
    // API keys are stored in the system keychain or PQSTEP_<PROVIDER>_KEY, not in this file
    "ai": {
        "provider": "anthropic",
        "model": "",
        "max_tokens": 256,
        "temperature": 0.0
    }
}
"#;

fn create_default_file(path: &Path) {
    if let Some(parent) = path.parent() {
        if let Err(e) = fs::create_dir_all(parent) {
            log::warn!("Error creating config directory: {}", e);
            return;
        }
    }

    if let Err(e) = fs::write(path, DEFAULT_CONFIG) {
        log::warn!("Error writing default settings.json: {}", e);
    }
}
