// Model configuration and secrets management
//
// API keys are looked up in order:
// 1. System keychain (feature "keychain")
// 2. PQSTEP_<PROVIDER>_KEY
// 3. The provider's own variable (ANTHROPIC_API_KEY, OPENAI_API_KEY)
//
// Keys are NEVER stored in settings.json

use crate::settings::{AIProvider, AISettings};
use std::env;

/// Service name for keychain storage
const KEYCHAIN_SERVICE: &str = "pqstep";

/// Source of an API key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    /// Key retrieved from system keychain
    Keychain,
    /// Key retrieved from environment variable
    Environment,
    /// No key found
    None,
}

impl KeySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeySource::Keychain => "keychain",
            KeySource::Environment => "environment",
            KeySource::None => "none",
        }
    }
}

/// Result of key lookup
#[derive(Debug, Clone)]
pub struct KeyLookup {
    pub key: Option<String>,
    pub source: KeySource,
}

/// Get the pqstep environment variable name for a provider
pub fn env_var_name(provider: &str) -> String {
    format!("PQSTEP_{}_KEY", provider.to_uppercase())
}

/// Variable the provider's own SDKs read
fn conventional_env_var(provider: &str) -> Option<&'static str> {
    match provider.to_lowercase().as_str() {
        "anthropic" => Some("ANTHROPIC_API_KEY"),
        "openai" => Some("OPENAI_API_KEY"),
        _ => None,
    }
}

/// Get the keychain account name for a provider
fn keychain_account(provider: &str) -> String {
    format!("ai/{}", provider.to_lowercase())
}

/// Get an API key for the specified provider
pub fn get_api_key(provider: &str) -> KeyLookup {
    #[cfg(feature = "keychain")]
    {
        if let Ok(entry) = keyring::Entry::new(KEYCHAIN_SERVICE, &keychain_account(provider)) {
            if let Ok(key) = entry.get_password() {
                return KeyLookup {
                    key: Some(key),
                    source: KeySource::Keychain,
                };
            }
        }
    }

    lookup_env_key(provider, |name| env::var(name).ok())
}

/// Environment part of the key lookup.
fn lookup_env_key(provider: &str, lookup: impl Fn(&str) -> Option<String>) -> KeyLookup {
    let names = std::iter::once(env_var_name(provider))
        .chain(conventional_env_var(provider).map(str::to_string));

    for name in names {
        if let Some(key) = lookup(&name).filter(|k| !k.trim().is_empty()) {
            return KeyLookup {
                key: Some(key.trim().to_string()),
                source: KeySource::Environment,
            };
        }
    }

    KeyLookup {
        key: None,
        source: KeySource::None,
    }
}

/// Store an API key in the system keychain
#[cfg(feature = "keychain")]
pub fn set_api_key(provider: &str, key: &str) -> Result<(), String> {
    let entry = keyring::Entry::new(KEYCHAIN_SERVICE, &keychain_account(provider))
        .map_err(|e| format!("Failed to create keychain entry: {}", e))?;

    entry
        .set_password(key)
        .map_err(|e| format!("Failed to store key in keychain: {}", e))
}

#[cfg(not(feature = "keychain"))]
pub fn set_api_key(provider: &str, _key: &str) -> Result<(), String> {
    Err(format!(
        "Keychain support not enabled. Set {} instead.",
        env_var_name(provider)
    ))
}

/// Delete an API key from the system keychain
#[cfg(feature = "keychain")]
pub fn delete_api_key(provider: &str) -> Result<(), String> {
    let entry = keyring::Entry::new(KEYCHAIN_SERVICE, &keychain_account(provider))
        .map_err(|e| format!("Failed to access keychain entry: {}", e))?;

    entry
        .delete_credential()
        .map_err(|e| format!("Failed to delete key from keychain: {}", e))
}

#[cfg(not(feature = "keychain"))]
pub fn delete_api_key(_provider: &str) -> Result<(), String> {
    Err("Keychain support not enabled.".to_string())
}

/// Check if keychain support is available
pub fn keychain_available() -> bool {
    #[cfg(feature = "keychain")]
    {
        keyring::Entry::new(KEYCHAIN_SERVICE, "test").is_ok()
    }
    #[cfg(not(feature = "keychain"))]
    {
        false
    }
}

// ============================================================================
// Resolved AI Configuration
// ============================================================================

/// The effective model configuration, fully resolved from settings and
/// the key store. Everything that talks to a model is built from this.
#[derive(Debug, Clone)]
pub struct ResolvedAIConfig {
    pub provider: AIProvider,
    /// Effective model (settings or provider default)
    pub model: String,
    /// Base URL without trailing slash
    pub endpoint: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub api_key: Option<String>,
    pub key_source: KeySource,
    pub status: AIConfigStatus,
    /// Human-readable reason if not ready
    pub blocking_reason: Option<String>,
}

/// Status of the model configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AIConfigStatus {
    /// provider = none
    Disabled,
    Ready,
    /// Provider is configured but API key is missing
    MissingKey,
}

impl AIConfigStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Ready => "ready",
            Self::MissingKey => "missing_key",
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

impl ResolvedAIConfig {
    /// Resolve the effective configuration, looking the key up in the
    /// keychain and environment.
    pub fn from_settings(settings: &AISettings) -> Self {
        if !settings.provider.is_enabled() {
            return Self::resolve(settings, KeyLookup { key: None, source: KeySource::None });
        }
        Self::resolve(settings, get_api_key(settings.provider.name()))
    }

    /// Resolve with an already looked-up key.
    pub fn resolve(settings: &AISettings, lookup: KeyLookup) -> Self {
        let provider = settings.provider;

        if !provider.is_enabled() {
            return Self {
                provider,
                model: String::new(),
                endpoint: String::new(),
                max_tokens: settings.max_tokens,
                temperature: settings.temperature,
                api_key: None,
                key_source: KeySource::None,
                status: AIConfigStatus::Disabled,
                blocking_reason: Some("provider=none".to_string()),
            };
        }

        let (api_key, key_source, status, blocking_reason) = match lookup.key {
            Some(key) => (Some(key), lookup.source, AIConfigStatus::Ready, None),
            None => (
                None,
                KeySource::None,
                AIConfigStatus::MissingKey,
                Some(format!(
                    "No API key found. Set via keychain or {}",
                    env_var_name(provider.name())
                )),
            ),
        };

        Self {
            provider,
            model: settings.effective_model().to_string(),
            endpoint: settings.effective_endpoint().to_string(),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
            api_key,
            key_source,
            status,
            blocking_reason,
        }
    }

    /// Load settings and resolve in one call
    pub fn load() -> Self {
        let settings = crate::settings::Settings::load();
        Self::from_settings(&settings.ai)
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }
}

// ============================================================================
// Diagnostics (for CLI doctor)
// ============================================================================

/// Diagnostic information about the model configuration
#[derive(Debug)]
pub struct AIDiagnostics {
    pub provider: String,
    pub model: String,
    pub status: AIConfigStatus,
    pub blocking_reason: Option<String>,
    pub key_present: bool,
    pub key_source: KeySource,
    pub keychain_available: bool,
    pub endpoint: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl AIDiagnostics {
    pub fn from_resolved(config: &ResolvedAIConfig) -> Self {
        Self {
            provider: config.provider.name().to_string(),
            model: config.model.clone(),
            status: config.status,
            blocking_reason: config.blocking_reason.clone(),
            key_present: config.api_key.is_some(),
            key_source: config.key_source,
            keychain_available: keychain_available(),
            endpoint: Some(config.endpoint.clone()).filter(|e| !e.is_empty()),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }

    /// Stable JSON shape for `ai doctor --json`
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "schema_version": 1,
            "status": self.status.as_str(),
            "blocking_reason": self.blocking_reason,
            "provider": self.provider,
            "model": self.model,
            "endpoint": self.endpoint,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "key": if self.key_present { "present" } else { "missing" },
            "key_source": self.key_source.as_str(),
            "keychain": if self.keychain_available { "ok" } else { "unavailable" },
        })
    }
}

impl std::fmt::Display for AIDiagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "AI Configuration")?;
        writeln!(f, "──────────────────────────────")?;
        writeln!(f, "Provider:          {}", self.provider)?;
        writeln!(f, "Status:            {}", self.status.as_str())?;
        if let Some(reason) = &self.blocking_reason {
            writeln!(f, "Reason:            {}", reason)?;
        }
        writeln!(f, "Model:             {}", self.model)?;
        if let Some(endpoint) = &self.endpoint {
            writeln!(f, "Endpoint:          {}", endpoint)?;
        }
        writeln!(f, "Max tokens:        {}", self.max_tokens)?;
        writeln!(f, "Temperature:       {}", self.temperature)?;
        writeln!(f, "Key present:       {}", if self.key_present { "yes" } else { "no" })?;
        writeln!(f, "Key source:        {}", self.key_source.as_str())?;
        writeln!(f, "Keychain available: {}", if self.keychain_available { "yes" } else { "no" })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn found(key: &str) -> KeyLookup {
        KeyLookup {
            key: Some(key.to_string()),
            source: KeySource::Environment,
        }
    }

    fn missing() -> KeyLookup {
        KeyLookup {
            key: None,
            source: KeySource::None,
        }
    }

    #[test]
    fn test_env_var_name() {
        assert_eq!(env_var_name("openai"), "PQSTEP_OPENAI_KEY");
        assert_eq!(env_var_name("Anthropic"), "PQSTEP_ANTHROPIC_KEY");
    }

    #[test]
    fn test_keychain_account() {
        assert_eq!(keychain_account("OpenAI"), "ai/openai");
        assert_eq!(keychain_account("anthropic"), "ai/anthropic");
    }

    #[test]
    fn test_env_lookup_prefers_pqstep_variable() {
        let lookup = lookup_env_key("anthropic", |name| match name {
            "PQSTEP_ANTHROPIC_KEY" => Some("ours".to_string()),
            "ANTHROPIC_API_KEY" => Some("theirs".to_string()),
            _ => None,
        });
        assert_eq!(lookup.key.as_deref(), Some("ours"));
        assert_eq!(lookup.source, KeySource::Environment);
    }

    #[test]
    fn test_env_lookup_falls_back_to_conventional_variable() {
        let lookup = lookup_env_key("openai", |name| match name {
            "PQSTEP_OPENAI_KEY" => Some("  ".to_string()),
            "OPENAI_API_KEY" => Some("sk-test\n".to_string()),
            _ => None,
        });
        assert_eq!(lookup.key.as_deref(), Some("sk-test"));
    }

    #[test]
    fn test_env_lookup_missing() {
        let lookup = lookup_env_key("nonexistent_provider_xyz", |_| None);
        assert_eq!(lookup.source, KeySource::None);
        assert!(lookup.key.is_none());
    }

    #[test]
    fn test_resolve_disabled() {
        let settings = AISettings {
            provider: AIProvider::None,
            ..AISettings::default()
        };
        let config = ResolvedAIConfig::resolve(&settings, found("k"));
        assert_eq!(config.status, AIConfigStatus::Disabled);
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_resolve_ready() {
        let config = ResolvedAIConfig::resolve(&AISettings::default(), found("k"));
        assert!(config.status.is_ready());
        assert_eq!(config.model, "claude-3-haiku-20240307");
        assert_eq!(config.endpoint, "https://api.anthropic.com");
        assert_eq!(config.max_tokens, 256);
        assert_eq!(config.api_key.as_deref(), Some("k"));
    }

    #[test]
    fn test_resolve_missing_key() {
        let config = ResolvedAIConfig::resolve(&AISettings::default(), missing());
        assert_eq!(config.status, AIConfigStatus::MissingKey);
        assert!(config
            .blocking_reason
            .as_deref()
            .unwrap()
            .contains("PQSTEP_ANTHROPIC_KEY"));
    }

    #[test]
    fn test_diagnostics_json_never_contains_key() {
        let config = ResolvedAIConfig::resolve(&AISettings::default(), found("secret-value"));
        let diag = AIDiagnostics::from_resolved(&config);
        let json = diag.to_json();
        assert_eq!(json["status"], "ready");
        assert_eq!(json["key"], "present");
        assert!(!json.to_string().contains("secret-value"));
        assert!(!diag.to_string().contains("secret-value"));
    }
}
