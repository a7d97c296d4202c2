use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{error, info};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::core::cancel::CancelToken;
use crate::core::config::ImageConfig;
use crate::core::io::Storage;
use crate::core::model::StructuralItem;
use crate::services::validation::frame_keys;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageRequest {
    pub prompt: String,
    pub height: u32,
    pub width: u32,
    pub steps: u32,
    pub guidance_scale: f32,
    pub seed: u64,
}

#[async_trait]
pub trait ImageClient: Send + Sync {
    /// Encoded PNG for one prompt.
    async fn generate(&self, request: &ImageRequest) -> Result<Vec<u8>>;
}

/// Client for an image-generation server exposing `POST /generate`.
pub struct HttpImageClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpImageClient {
    pub fn new(config: &ImageConfig) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ImageClient for HttpImageClient {
    async fn generate(&self, request: &ImageRequest) -> Result<Vec<u8>> {
        let url = format!("{}/generate", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .context("Failed to reach image service")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let error_text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("Image API error {}: {}", status, error_text));
        }

        Ok(resp.bytes().await?.to_vec())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageFailure {
    pub path: PathBuf,
    pub error: String,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct ImageReport {
    pub generated: Vec<PathBuf>,
    pub errors: Vec<ImageFailure>,
    pub cancelled: bool,
}

/// Generates every frame of a structural document, one image at a time.
///
/// The generator holds one accelerator, so a batch keeps the only permit of
/// `slot` for its whole run. Two batches never interleave.
pub struct ImageBatchProcessor {
    client: Arc<dyn ImageClient>,
    storage: Arc<dyn Storage>,
    slot: Semaphore,
    height: u32,
    width: u32,
    steps: u32,
    guidance_scale: f32,
    seed: u64,
}

impl ImageBatchProcessor {
    pub fn new(client: Arc<dyn ImageClient>, storage: Arc<dyn Storage>, config: &ImageConfig) -> Self {
        Self {
            client,
            storage,
            slot: Semaphore::new(1),
            height: config.height,
            width: config.width,
            steps: config.steps,
            guidance_scale: config.guidance_scale,
            seed: config.seed,
        }
    }

    fn request(&self, prompt: &str) -> ImageRequest {
        ImageRequest {
            prompt: prompt.to_string(),
            height: self.height,
            width: self.width,
            steps: self.steps,
            guidance_scale: self.guidance_scale,
            seed: self.seed,
        }
    }

    /// Frames go to `{output_root}/{TIPO}/frame_N.png`, prayer images to
    /// `{output_root}/ORACION/oracion_{i}.png` with `i` the 1-based item
    /// position. Cancellation leaves whatever frames were already written.
    pub async fn process(
        &self,
        items: &[StructuralItem],
        output_root: &Path,
        cancel: &CancelToken,
    ) -> Result<ImageReport> {
        let _permit = self
            .slot
            .acquire()
            .await
            .context("Image generator slot closed")?;

        let mut report = ImageReport::default();
        let total = items.len();
        info!("Starting image generation for {} items", total);

        'items: for (index, item) in items.iter().enumerate() {
            if cancel.is_set() {
                info!("Cancelled before image item {}/{}", index + 1, total);
                report.cancelled = true;
                break;
            }
            info!(
                "Images {}/{}: {} {}",
                index + 1,
                total,
                item.kind(),
                item.referencia().unwrap_or("")
            );

            let folder = output_root.join(item.kind().as_str());
            match item {
                StructuralItem::Historia(sequence) | StructuralItem::Curiosidad(sequence) => {
                    let Some(frames) = sequence.secuencia_visual.as_ref() else {
                        error!("{} has no secuencia_visual, skipping", item.kind());
                        continue;
                    };
                    for key in frame_keys() {
                        let Some(prompt) = frames.get(&key) else {
                            continue;
                        };
                        if cancel.is_set() {
                            info!("Cancelled during frames of item {}/{}", index + 1, total);
                            report.cancelled = true;
                            break 'items;
                        }
                        let path = folder.join(format!("{}.png", key));
                        self.generate_into(prompt, path, &mut report).await;
                    }
                }
                StructuralItem::Oracion(prayer) => {
                    let Some(prompt) = prayer.prompt_imagen.as_deref() else {
                        error!("ORACION has no prompt_imagen, skipping");
                        continue;
                    };
                    let path = folder.join(format!("oracion_{}.png", index + 1));
                    self.generate_into(prompt, path, &mut report).await;
                }
            }
        }

        if report.cancelled {
            info!("Image generation interrupted by cancellation");
        } else {
            info!("All images generated");
        }
        Ok(report)
    }

    async fn generate_into(&self, prompt: &str, path: PathBuf, report: &mut ImageReport) {
        info!("Generating {}", path.display());
        let result = match self.client.generate(&self.request(prompt)).await {
            Ok(bytes) => self.storage.write(&path, &bytes).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => report.generated.push(path),
            Err(e) => {
                error!("Image failed for {}: {:#}", path.display(), e);
                report.errors.push(ImageFailure {
                    path,
                    error: format!("{:#}", e),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::NativeStorage;
    use crate::services::test_support::{structure_response, MockImage};
    use serde_json::Value;

    fn document() -> Vec<StructuralItem> {
        let value: Value = serde_json::from_str(&structure_response()).unwrap();
        serde_json::from_value(value["contenido"].clone()).unwrap()
    }

    fn batch(client: Arc<MockImage>) -> ImageBatchProcessor {
        ImageBatchProcessor::new(client, Arc::new(NativeStorage::new()), &ImageConfig::default())
    }

    #[tokio::test]
    async fn test_generates_six_frames_per_sequence_and_one_prayer() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let client = Arc::new(MockImage::new());

        let report = batch(client.clone())
            .process(&document(), temp_dir.path(), &CancelToken::new())
            .await?;

        assert!(!report.cancelled);
        assert_eq!(report.generated.len(), 13);
        assert!(temp_dir.path().join("HISTORIA").join("frame_6.png").exists());
        assert!(temp_dir.path().join("CURIOSIDAD").join("frame_1.png").exists());
        assert!(temp_dir.path().join("ORACION").join("oracion_3.png").exists());

        let prompts = client.prompts();
        assert_eq!(&prompts[..2], &["ladrillos", "andamios"]);
        assert_eq!(prompts[12], "sunset over an unfinished tower");
        Ok(())
    }

    #[tokio::test]
    async fn test_cancel_mid_item_leaves_partial_frames() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let cancel = CancelToken::new();
        let client = Arc::new(MockImage::new().cancel_after(2, cancel.clone()));

        let report = batch(client.clone())
            .process(&document(), temp_dir.path(), &cancel)
            .await?;

        assert!(report.cancelled);
        assert_eq!(report.generated.len(), 2);
        assert_eq!(client.prompts().len(), 2);
        assert!(temp_dir.path().join("HISTORIA").join("frame_2.png").exists());
        assert!(!temp_dir.path().join("HISTORIA").join("frame_3.png").exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_frame_is_recorded_and_batch_continues() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let client = Arc::new(MockImage::new().failing_on("la torre"));

        let report = batch(client)
            .process(&document(), temp_dir.path(), &CancelToken::new())
            .await?;

        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].path, temp_dir.path().join("HISTORIA").join("frame_3.png"));
        assert_eq!(report.generated.len(), 12);
        Ok(())
    }

    #[tokio::test]
    async fn test_requests_use_configured_seed() {
        let processor = batch(Arc::new(MockImage::new()));
        let request = processor.request("p");
        assert_eq!(request.seed, 33442);
        assert_eq!((request.height, request.width, request.steps), (1280, 720, 8));
    }

    #[tokio::test]
    async fn test_concurrent_batches_do_not_interleave() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let client = Arc::new(MockImage::new());
        let processor = Arc::new(batch(client.clone()));

        let first = {
            let processor = processor.clone();
            let root = temp_dir.path().join("a");
            tokio::spawn(async move {
                processor.process(&document(), &root, &CancelToken::new()).await
            })
        };
        let second = {
            let processor = processor.clone();
            let root = temp_dir.path().join("b");
            tokio::spawn(async move {
                processor.process(&document(), &root, &CancelToken::new()).await
            })
        };
        first.await??;
        second.await??;

        let prompts = client.prompts();
        let one_batch: Vec<String> = prompts[..13].to_vec();
        assert_eq!(&prompts[13..], one_batch.as_slice());
        Ok(())
    }
}
