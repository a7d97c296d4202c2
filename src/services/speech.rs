use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures_util::stream::{BoxStream, StreamExt};
use log::{error, info, warn};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::core::cancel::CancelToken;
use crate::core::config::SpeechConfig;
use crate::core::model::{ItemKind, StructuralItem};
use crate::utils::text::sanitize_file_name;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoiceSettings {
    pub stability: f32,
    pub similarity_boost: f32,
    pub style: f32,
    pub use_speaker_boost: bool,
    pub speed: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpeechRequest {
    pub voice_id: String,
    pub text: String,
    pub model_id: String,
    pub settings: VoiceSettings,
}

#[async_trait]
pub trait SpeechClient: Send + Sync {
    /// Audio bytes, chunk by chunk, for one request.
    async fn synthesize(&self, request: &SpeechRequest)
        -> Result<BoxStream<'static, Result<Vec<u8>>>>;
}

pub struct ElevenLabsClient {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl ElevenLabsClient {
    pub fn new(config: &SpeechConfig) -> Self {
        Self {
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Serialize)]
struct ElevenLabsBody<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: &'a VoiceSettings,
}

#[async_trait]
impl SpeechClient for ElevenLabsClient {
    async fn synthesize(
        &self,
        request: &SpeechRequest,
    ) -> Result<BoxStream<'static, Result<Vec<u8>>>> {
        let url = format!("{}/v1/text-to-speech/{}/stream", self.base_url, request.voice_id);
        let body = ElevenLabsBody {
            text: &request.text,
            model_id: &request.model_id,
            voice_settings: &request.settings,
        };

        let resp = self
            .client
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .header("Accept", "audio/mpeg")
            .json(&body)
            .send()
            .await
            .context("Failed to reach speech service")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let error_text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("Speech API error {}: {}", status, error_text));
        }

        Ok(resp
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(anyhow::Error::from))
            .boxed())
    }
}

/// One finalized script ready for synthesis.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechEntry {
    pub kind: ItemKind,
    /// File stem, `{referencia}_{TIPO}` reduced to alphanumerics, `_` and `-`.
    pub name: String,
    pub script: String,
}

/// Items with a non-empty `guion_tts`, in order.
pub fn extract_speech_entries(items: &[StructuralItem]) -> Vec<SpeechEntry> {
    items
        .iter()
        .filter_map(|item| {
            let script = item.guion_tts()?.trim();
            if script.is_empty() {
                return None;
            }
            let reference = item
                .referencia()
                .unwrap_or("Capitulo")
                .replace([':', ' '], "_");
            Some(SpeechEntry {
                kind: item.kind(),
                name: sanitize_file_name(&format!("{}_{}", reference, item.kind())),
                script: script.to_string(),
            })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpeechFailure {
    pub name: String,
    pub error: String,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct SpeechReport {
    pub processed: Vec<PathBuf>,
    pub errors: Vec<SpeechFailure>,
    pub cancelled: bool,
}

enum SpeechOutcome {
    Success(PathBuf),
    Cancelled,
    Error(anyhow::Error),
}

pub struct SpeechBatchProcessor {
    client: Arc<dyn SpeechClient>,
    voice_id: String,
    model_id: String,
    settings: VoiceSettings,
}

impl SpeechBatchProcessor {
    pub fn new(client: Arc<dyn SpeechClient>, config: &SpeechConfig) -> Self {
        Self {
            client,
            voice_id: config.voice_id.clone(),
            model_id: config.model_id.clone(),
            settings: VoiceSettings {
                stability: config.stability,
                similarity_boost: config.similarity_boost,
                style: config.style,
                use_speaker_boost: config.use_speaker_boost,
                speed: config.speed,
            },
        }
    }

    /// Writes `{output_root}/{TIPO}/{name}.mp3` per entry. A failed entry is
    /// recorded and the batch moves on; cancellation stops the batch.
    pub async fn process(
        &self,
        entries: &[SpeechEntry],
        output_root: &Path,
        cancel: &CancelToken,
    ) -> SpeechReport {
        let mut report = SpeechReport::default();
        if entries.is_empty() {
            warn!("No scripts to synthesize");
            return report;
        }

        for entry in entries {
            match self.synthesize_entry(entry, output_root, cancel).await {
                SpeechOutcome::Success(path) => {
                    info!("Audio written: {}", path.display());
                    report.processed.push(path);
                }
                SpeechOutcome::Cancelled => {
                    info!("Cancelled before synthesizing {}", entry.name);
                    report.cancelled = true;
                    break;
                }
                SpeechOutcome::Error(e) => {
                    error!("Speech failed for {}: {:#}", entry.name, e);
                    report.errors.push(SpeechFailure {
                        name: entry.name.clone(),
                        error: format!("{:#}", e),
                    });
                }
            }
        }
        report
    }

    async fn synthesize_entry(
        &self,
        entry: &SpeechEntry,
        output_root: &Path,
        cancel: &CancelToken,
    ) -> SpeechOutcome {
        let path = output_root
            .join(entry.kind.as_str())
            .join(format!("{}.mp3", entry.name));

        if cancel.is_set() {
            return SpeechOutcome::Cancelled;
        }

        let request = SpeechRequest {
            voice_id: self.voice_id.clone(),
            text: entry.script.clone(),
            model_id: self.model_id.clone(),
            settings: self.settings.clone(),
        };

        match self.write_stream(&request, &path).await {
            Ok(()) => SpeechOutcome::Success(path),
            Err(e) => {
                if fs::try_exists(&path).await.unwrap_or(false) {
                    if let Err(remove_err) = fs::remove_file(&path).await {
                        warn!("Could not remove partial {}: {}", path.display(), remove_err);
                    }
                }
                SpeechOutcome::Error(e)
            }
        }
    }

    async fn write_stream(&self, request: &SpeechRequest, path: &Path) -> Result<()> {
        let mut stream = self.client.synthesize(request).await?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = fs::File::create(path)
            .await
            .with_context(|| format!("Failed to create {}", path.display()))?;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("Audio stream interrupted")?;
            if !chunk.is_empty() {
                file.write_all(&chunk).await?;
            }
        }
        file.flush().await?;
        Ok(())
    }
}
