// HTTP client for the configured model provider
//
// Anthropic Messages and OpenAI Chat Completions, blocking, one request per
// fragment.

use std::time::Duration;

use once_cell::unsync::OnceCell;
use pqstep_config::ai::{AIConfigStatus, ResolvedAIConfig};
use pqstep_config::settings::{AIProvider, AISettings};
use serde::{Deserialize, Serialize};

use super::{build_system_prompt, build_user_prompt, FragmentGenerator, FragmentRequest, GenerateError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const ANTHROPIC_VERSION: &str = "2023-06-01";

// ============================================================================
// Anthropic API types
// ============================================================================

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicBlock>,
}

#[derive(Deserialize)]
struct AnthropicBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: Option<String>,
}

// ============================================================================
// OpenAI API types
// ============================================================================

#[derive(Serialize)]
struct OpenAIRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
}

#[derive(Deserialize)]
struct OpenAIResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

/// Error body shape shared by both providers.
#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

// ============================================================================
// Generator
// ============================================================================

/// Fragment generator backed by the configured provider.
///
/// Built from settings, the key lookup is deferred to the first request so
/// that runs with an explicit fragment never touch the keychain.
pub struct ModelGenerator {
    settings: AISettings,
    config: OnceCell<ResolvedAIConfig>,
}

impl ModelGenerator {
    pub fn new(config: ResolvedAIConfig) -> Self {
        Self {
            settings: AISettings::default(),
            config: OnceCell::from(config),
        }
    }

    pub fn from_settings(settings: AISettings) -> Self {
        Self {
            settings,
            config: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &ResolvedAIConfig {
        self.config
            .get_or_init(|| ResolvedAIConfig::from_settings(&self.settings))
    }

    fn client() -> Result<reqwest::blocking::Client, GenerateError> {
        reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| GenerateError::NetworkError(e.to_string()))
    }

    fn call_anthropic(&self, api_key: &str, user_prompt: &str) -> Result<String, GenerateError> {
        let config = self.config();
        let request = AnthropicRequest {
            model: &config.model,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            system: build_system_prompt(),
            messages: vec![ChatMessage {
                role: "user",
                content: user_prompt,
            }],
        };

        let response = Self::client()?
            .post(format!("{}/v1/messages", config.endpoint))
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .map_err(|e| GenerateError::NetworkError(e.to_string()))?;

        let body: AnthropicResponse = read_body(response)?;
        let text: String = body
            .content
            .into_iter()
            .filter(|block| block.block_type == "text")
            .filter_map(|block| block.text)
            .collect();
        Ok(text)
    }

    fn call_openai(&self, api_key: &str, user_prompt: &str) -> Result<String, GenerateError> {
        let config = self.config();
        let request = OpenAIRequest {
            model: &config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: build_system_prompt(),
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        };

        let response = Self::client()?
            .post(format!("{}/v1/chat/completions", config.endpoint))
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .map_err(|e| GenerateError::NetworkError(e.to_string()))?;

        let body: OpenAIResponse = read_body(response)?;
        body.choices
            .into_iter()
            .next()
            .map(|c| c.message.content.unwrap_or_default())
            .ok_or_else(|| GenerateError::InvalidResponse("No choices in response".to_string()))
    }
}

impl FragmentGenerator for ModelGenerator {
    fn generate(&self, request: &FragmentRequest) -> Result<String, GenerateError> {
        let config = self.config();
        match config.status {
            AIConfigStatus::Disabled => {
                return Err(GenerateError::NotConfigured("AI is disabled (ai.provider = none)".to_string()))
            }
            AIConfigStatus::MissingKey => return Err(GenerateError::MissingKey),
            AIConfigStatus::Ready => {}
        }
        let api_key = config.api_key.as_deref().ok_or(GenerateError::MissingKey)?;

        let user_prompt = build_user_prompt(request);
        log::info!(
            "Requesting step for column '{}' from {} ({})",
            request.column,
            config.provider_name(),
            config.model
        );

        let text = match config.provider {
            AIProvider::Anthropic => self.call_anthropic(api_key, &user_prompt)?,
            AIProvider::OpenAI => self.call_openai(api_key, &user_prompt)?,
            AIProvider::None => {
                return Err(GenerateError::NotConfigured("AI is disabled (ai.provider = none)".to_string()))
            }
        };

        let text = text.trim().to_string();
        if text.is_empty() {
            return Err(GenerateError::EmptyResponse);
        }
        log::debug!("Model output: {}", text);
        Ok(text)
    }
}

/// Check the status and decode a JSON body, turning error bodies into
/// `ApiError`.
fn read_body<T: serde::de::DeserializeOwned>(response: reqwest::blocking::Response) -> Result<T, GenerateError> {
    let status = response.status();

    if !status.is_success() {
        let error_text = response.text().unwrap_or_default();
        let message = match serde_json::from_str::<ErrorBody>(&error_text) {
            Ok(body) => body.error.message,
            Err(_) => error_text,
        };
        return Err(GenerateError::ApiError {
            status: status.as_u16(),
            message,
        });
    }

    let text = response
        .text()
        .map_err(|e| GenerateError::NetworkError(e.to_string()))?;
    serde_json::from_str(&text).map_err(|e| GenerateError::ParseError(e.to_string()))
}
