use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LlmConfig {
    /// "openai" (any OpenAI-compatible endpoint), "ollama" or "gemini".
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_retry_count")]
    pub retry_count: usize,
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff: f64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Cap for the free-text stages (script expansion, voice adaptation).
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub models: StageModels,
    pub openai: Option<OpenAIConfig>,
    pub ollama: Option<OllamaConfig>,
    pub gemini: Option<GeminiConfig>,
}

/// Per-stage model overrides; `None` uses the provider's model.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct StageModels {
    pub structure: Option<String>,
    pub refine: Option<String>,
    pub script: Option<String>,
    pub voice: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OpenAIConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_openai_model")]
    pub model: String,
    pub base_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OllamaConfig {
    pub base_url: String,
    pub model: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
}

fn default_provider() -> String {
    "openai".to_string()
}
fn default_retry_count() -> usize {
    3
}
fn default_retry_backoff() -> f64 {
    1.5
}
fn default_temperature() -> f32 {
    0.6
}
fn default_max_tokens() -> u32 {
    800
}
fn default_openai_model() -> String {
    "mistral-medium-latest".to_string()
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            retry_count: default_retry_count(),
            retry_backoff: default_retry_backoff(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            models: StageModels::default(),
            openai: None,
            ollama: None,
            gemini: None,
        }
    }
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_openai_model(),
            base_url: None,
        }
    }
}

impl LlmConfig {
    /// Puts the key on the section of the selected provider.
    pub fn set_api_key(&mut self, key: String) {
        match self.provider.as_str() {
            "gemini" => {
                if let Some(cfg) = self.gemini.as_mut() {
                    cfg.api_key = key;
                }
            }
            "ollama" => {}
            _ => self.openai.get_or_insert_with(OpenAIConfig::default).api_key = key,
        }
    }
}

/// One chat completion request as the pipeline stages issue it.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub system: String,
    pub user: String,
    pub model: Option<String>,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// Ask the backend for a JSON object response.
    pub json: bool,
}

#[async_trait]
pub trait LlmClient: Send + Sync + Debug {
    async fn chat(&self, request: &ChatRequest) -> Result<String>;
}

pub fn create_llm(config: &LlmConfig) -> Result<Box<dyn LlmClient>> {
    match config.provider.as_str() {
        "openai" => {
            let cfg = config.openai.as_ref().context("OpenAI-compatible config missing")?;
            Ok(Box::new(OpenAIClient::new(&cfg.api_key, &cfg.model, cfg.base_url.as_deref())))
        }
        "ollama" => {
            let cfg = config.ollama.as_ref().context("Ollama config missing")?;
            Ok(Box::new(OllamaClient::new(&cfg.base_url, &cfg.model)))
        }
        "gemini" => {
            let cfg = config.gemini.as_ref().context("Gemini config missing")?;
            Ok(Box::new(GeminiClient::new(&cfg.api_key, &cfg.model)))
        }
        _ => Err(anyhow!("Unknown LLM provider: {}", config.provider)),
    }
}

// --- OpenAI-compatible (Mistral, OpenAI, ...) ---

const DEFAULT_OPENAI_BASE_URL: &str = "https://api.mistral.ai/v1";

#[derive(Debug)]
struct OpenAIClient {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAIClient {
    fn new(api_key: &str, model: &str, base_url: Option<&str>) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: base_url
                .unwrap_or(DEFAULT_OPENAI_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct OpenAIMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessageResponse,
}

#[derive(Deserialize)]
struct OpenAIMessageResponse {
    content: Option<String>,
}

#[async_trait]
impl LlmClient for OpenAIClient {
    async fn chat(&self, request: &ChatRequest) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);

        let request_body = OpenAIRequest {
            model: request.model.clone().unwrap_or_else(|| self.model.clone()),
            messages: vec![
                OpenAIMessage { role: "system".to_string(), content: request.system.clone() },
                OpenAIMessage { role: "user".to_string(), content: request.user.clone() },
            ],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            response_format: request.json.then_some(ResponseFormat { kind: "json_object" }),
        };

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request_body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let error_text = resp.text().await?;
            return Err(anyhow!("Chat completion API error: {}", error_text));
        }

        let result: OpenAIResponse = resp.json().await?;
        if let Some(choice) = result.choices.first() {
            if let Some(content) = &choice.message.content {
                return Ok(content.clone());
            }
        }

        Err(anyhow!("Chat completion response empty or missing content"))
    }
}

// --- Ollama ---

#[derive(Debug)]
struct OllamaClient {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OllamaClient {
    fn new(base_url: &str, model: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Serialize)]
struct OllamaRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'static str>,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Deserialize)]
struct OllamaResponse {
    message: OllamaMessageResponse,
}

#[derive(Deserialize)]
struct OllamaMessageResponse {
    content: String,
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn chat(&self, request: &ChatRequest) -> Result<String> {
        let url = format!("{}/api/chat", self.base_url);

        let request_body = OllamaRequest {
            model: request.model.clone().unwrap_or_else(|| self.model.clone()),
            messages: vec![
                OpenAIMessage { role: "system".to_string(), content: request.system.clone() },
                OpenAIMessage { role: "user".to_string(), content: request.user.clone() },
            ],
            stream: false,
            format: request.json.then_some("json"),
            options: OllamaOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            },
        };

        let resp = self.client.post(&url).json(&request_body).send().await?;

        if !resp.status().is_success() {
            let error_text = resp.text().await?;
            return Err(anyhow!("Ollama API error: {}", error_text));
        }

        let result: OllamaResponse = resp.json().await?;
        Ok(result.message.content)
    }
}

// --- Gemini ---

#[derive(Debug)]
struct GeminiClient {
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl GeminiClient {
    fn new(api_key: &str, model: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    system_instruction: GeminiSystemInstruction,
    #[serde(rename = "generationConfig")]
    generation_config: GeminiGenerationConfig,
}

#[derive(Serialize)]
struct GeminiGenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens", skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(rename = "responseMimeType", skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'static str>,
}

#[derive(Serialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiSystemInstruction {
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    error: Option<GeminiError>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContentResponse>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct GeminiContentResponse {
    #[serde(default)]
    parts: Vec<GeminiPartResponse>,
}

#[derive(Deserialize)]
struct GeminiPartResponse {
    text: String,
}

#[derive(Deserialize, Debug)]
struct GeminiError {
    message: String,
}

#[async_trait]
impl LlmClient for GeminiClient {
    async fn chat(&self, request: &ChatRequest) -> Result<String> {
        let model = request.model.as_deref().unwrap_or(&self.model);
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
            model, self.api_key
        );

        let request_body = GeminiRequest {
            contents: vec![GeminiContent {
                role: "user".to_string(),
                parts: vec![GeminiPart { text: request.user.clone() }],
            }],
            system_instruction: GeminiSystemInstruction {
                parts: vec![GeminiPart { text: request.system.clone() }],
            },
            generation_config: GeminiGenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_tokens,
                response_mime_type: request.json.then_some("application/json"),
            },
        };

        let resp = self.client.post(&url).json(&request_body).send().await?;

        if !resp.status().is_success() {
            let error_text = resp.text().await?;
            return Err(anyhow!("Gemini API error: {}", error_text));
        }

        let response_text = resp.text().await?;
        let result: GeminiResponse = serde_json::from_str(&response_text).map_err(|e| {
            anyhow!("Failed to parse Gemini response: {}. Body: {}", e, response_text)
        })?;

        if let Some(err) = result.error {
            return Err(anyhow!("Gemini API returned error: {}", err.message));
        }

        let first = result
            .candidates
            .as_ref()
            .and_then(|c| c.first())
            .ok_or_else(|| anyhow!("Gemini response format unexpected or empty. Body: {}", response_text))?;

        match first.content.as_ref().and_then(|c| c.parts.first()) {
            Some(part) => Ok(part.text.clone()),
            None => {
                let reason = first.finish_reason.as_deref().unwrap_or("UNKNOWN");
                Err(anyhow!("Gemini response empty. Finish reason: {}", reason))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(json: bool) -> ChatRequest {
        ChatRequest {
            system: "sys".to_string(),
            user: "user".to_string(),
            model: None,
            temperature: 0.6,
            max_tokens: None,
            json,
        }
    }

    #[test]
    fn test_openai_request_json_mode() {
        let req = request(true);
        let body = OpenAIRequest {
            model: "m".to_string(),
            messages: vec![],
            temperature: req.temperature,
            max_tokens: req.max_tokens,
            response_format: req.json.then_some(ResponseFormat { kind: "json_object" }),
        };
        let value = serde_json::to_value(&body).unwrap();

        assert_eq!(value["response_format"]["type"], "json_object");
        assert!(value.get("max_tokens").is_none());
    }

    #[test]
    fn test_openai_request_free_text_mode() {
        let body = OpenAIRequest {
            model: "m".to_string(),
            messages: vec![],
            temperature: 0.6,
            max_tokens: Some(800),
            response_format: None,
        };
        let value = serde_json::to_value(&body).unwrap();

        assert!(value.get("response_format").is_none());
        assert_eq!(value["max_tokens"], 800);
    }

    #[test]
    fn test_openai_response_parsing_success() {
        let json = r#"{
            "id": "cmpl-123",
            "object": "chat.completion",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "{\"contenido\": []}"},
                "finish_reason": "stop"
            }]
        }"#;

        let result: OpenAIResponse = serde_json::from_str(json).unwrap();
        assert_eq!(
            result.choices[0].message.content.as_deref(),
            Some("{\"contenido\": []}")
        );
    }

    #[test]
    fn test_gemini_response_parsing_safety_block() {
        let json = r#"{"candidates": [{"finishReason": "SAFETY", "index": 0}]}"#;

        let result: GeminiResponse = serde_json::from_str(json).unwrap();
        let candidate = &result.candidates.as_ref().unwrap()[0];

        assert!(candidate.content.is_none());
        assert_eq!(candidate.finish_reason.as_deref(), Some("SAFETY"));
    }

    #[test]
    fn test_create_llm_requires_provider_section() {
        let config = LlmConfig::default();
        assert!(create_llm(&config).is_err());

        let config = LlmConfig {
            provider: "unknown".to_string(),
            ..LlmConfig::default()
        };
        assert!(create_llm(&config).is_err());
    }

    #[test]
    fn test_set_api_key_creates_openai_section() {
        let mut config = LlmConfig::default();
        config.set_api_key("k".to_string());
        let openai = config.openai.unwrap();
        assert_eq!(openai.api_key, "k");
        assert_eq!(openai.model, "mistral-medium-latest");
    }
}
