use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::services::llm::LlmConfig;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_corpus_path")]
    pub corpus_path: String,

    #[serde(default = "default_artifact_folder")]
    pub artifact_folder: String,

    #[serde(default = "default_ledger_path")]
    pub ledger_path: String,

    #[serde(default = "default_book")]
    pub default_book: String,

    /// Chapter text is cut to this many words before structuring.
    #[serde(default = "default_max_words")]
    pub max_words: usize,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub speech: SpeechConfig,

    #[serde(default)]
    pub image: ImageConfig,

    pub telegram: Option<TelegramConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SpeechConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_speech_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub voice_id: String,
    #[serde(default = "default_speech_model")]
    pub model_id: String,
    #[serde(default = "default_stability")]
    pub stability: f32,
    #[serde(default = "default_similarity_boost")]
    pub similarity_boost: f32,
    #[serde(default = "default_style")]
    pub style: f32,
    #[serde(default = "default_true")]
    pub use_speaker_boost: bool,
    #[serde(default = "default_speed")]
    pub speed: f32,
    #[serde(default = "default_speech_output")]
    pub output_folder: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ImageConfig {
    #[serde(default = "default_image_base_url")]
    pub base_url: String,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_steps")]
    pub steps: u32,
    #[serde(default)]
    pub guidance_scale: f32,
    /// Same seed for every image so identical prompts reproduce.
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_image_output")]
    pub output_folder: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TelegramConfig {
    #[serde(default)]
    pub token: String,
    /// Empty means every chat is served.
    #[serde(default)]
    pub allowed_chats: Vec<i64>,
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_seconds: u64,
}

fn default_corpus_path() -> String {
    "biblia_completa_rv1960.json".to_string()
}
fn default_artifact_folder() -> String {
    ".".to_string()
}
fn default_ledger_path() -> String {
    "pipeline_status.json".to_string()
}
fn default_book() -> String {
    "genesis".to_string()
}
fn default_max_words() -> usize {
    3000
}
fn default_speech_base_url() -> String {
    "https://api.elevenlabs.io".to_string()
}
fn default_speech_model() -> String {
    "eleven_flash_v2_5".to_string()
}
fn default_stability() -> f32 {
    0.6
}
fn default_similarity_boost() -> f32 {
    0.9
}
fn default_style() -> f32 {
    0.2
}
fn default_true() -> bool {
    true
}
fn default_speed() -> f32 {
    1.1
}
fn default_speech_output() -> String {
    "tts_outputs".to_string()
}
fn default_image_base_url() -> String {
    "http://127.0.0.1:7860".to_string()
}
fn default_height() -> u32 {
    1280
}
fn default_width() -> u32 {
    720
}
fn default_steps() -> u32 {
    8
}
fn default_seed() -> u64 {
    33442
}
fn default_image_output() -> String {
    "output".to_string()
}
fn default_poll_timeout() -> u64 {
    30
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_speech_base_url(),
            voice_id: String::new(),
            model_id: default_speech_model(),
            stability: default_stability(),
            similarity_boost: default_similarity_boost(),
            style: default_style(),
            use_speaker_boost: true,
            speed: default_speed(),
            output_folder: default_speech_output(),
        }
    }
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            base_url: default_image_base_url(),
            height: default_height(),
            width: default_width(),
            steps: default_steps(),
            guidance_scale: 0.0,
            seed: default_seed(),
            output_folder: default_image_output(),
        }
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            allowed_chats: Vec::new(),
            poll_timeout_seconds: default_poll_timeout(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            corpus_path: default_corpus_path(),
            artifact_folder: default_artifact_folder(),
            ledger_path: default_ledger_path(),
            default_book: default_book(),
            max_words: default_max_words(),
            llm: LlmConfig::default(),
            speech: SpeechConfig::default(),
            image: ImageConfig::default(),
            telegram: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("config.yml"))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("{} not found. Please create one.", path.display());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mut config: Config = serde_yaml_ng::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Secrets may live in the environment (or `.env`) instead of the YAML.
    pub fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(key) = var("LLM_API_KEY").or_else(|| var("MISTRAL_API_KEY")) {
            self.llm.set_api_key(key);
        }
        if let Some(key) = var("ELEVEN_LABS_API_KEY") {
            self.speech.api_key = key;
        }
        if let Some(token) = var("TELEGRAM_BOT_TOKEN") {
            self.telegram.get_or_insert_with(TelegramConfig::default).token = token;
        }
    }

    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.artifact_folder)?;
        fs::create_dir_all(&self.speech.output_folder)?;
        fs::create_dir_all(&self.image.output_folder)?;
        Ok(())
    }

    pub fn artifact_folder(&self) -> PathBuf {
        PathBuf::from(&self.artifact_folder)
    }
}
