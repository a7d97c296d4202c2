use anyhow::{Context, Result};
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;

use crate::core::cancel::CancelToken;
use crate::core::config::Config;
use crate::core::corpus::Corpus;
use crate::core::io::Storage;
use crate::core::ledger::{ProgressLedger, Stage};
use crate::core::model::{ContentUnit, PipelineError, RunReport, StructuralItem};
use crate::services::chapter::ChapterProcessor;
use crate::services::image::{ImageBatchProcessor, ImageClient};
use crate::services::llm::LlmClient;
use crate::services::speech::{extract_speech_entries, SpeechBatchProcessor, SpeechClient};
use crate::services::stages::StageRunner;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Content,
    /// Speech from the saved artifact.
    Speech,
    ContentSpeech,
    Images,
    Full,
}

/// Run orchestrator: composes the chapter processor and the two batch
/// processors into the run modes, persists the per-unit artifact and keeps
/// the progress ledger.
///
/// Ledger marking is success-gated per mode. A cancelled run, or a speech or
/// image batch that captured errors, leaves its stage unmarked.
pub struct Pipeline {
    config: Config,
    corpus: Arc<dyn Corpus>,
    chapters: ChapterProcessor,
    speech: SpeechBatchProcessor,
    images: ImageBatchProcessor,
    ledger: ProgressLedger,
    storage: Arc<dyn Storage>,
}

impl Pipeline {
    pub fn new(
        config: Config,
        corpus: Arc<dyn Corpus>,
        llm: Arc<dyn LlmClient>,
        speech: Arc<dyn SpeechClient>,
        image: Arc<dyn ImageClient>,
        storage: Arc<dyn Storage>,
    ) -> Self {
        let stages = StageRunner::new(llm, &config.llm, config.max_words);
        Self {
            chapters: ChapterProcessor::new(stages),
            speech: SpeechBatchProcessor::new(speech, &config.speech),
            images: ImageBatchProcessor::new(image, storage.clone(), &config.image),
            ledger: ProgressLedger::new(&config.ledger_path, storage.clone()),
            corpus,
            storage,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn corpus(&self) -> &dyn Corpus {
        self.corpus.as_ref()
    }

    pub fn ledger(&self) -> &ProgressLedger {
        &self.ledger
    }

    pub fn artifact_path(&self, unit: &ContentUnit) -> PathBuf {
        self.config.artifact_folder().join(unit.artifact_file_name())
    }

    fn speech_root(&self, unit: &ContentUnit) -> PathBuf {
        PathBuf::from(&self.config.speech.output_folder).join(unit.slug())
    }

    fn image_root(&self, unit: &ContentUnit) -> PathBuf {
        PathBuf::from(&self.config.image.output_folder).join(unit.slug())
    }

    /// Chapter text for `unit`, or the input error describing why there is
    /// none.
    pub fn chapter_text(&self, unit: &ContentUnit) -> Result<String> {
        if self.corpus.chapter_count(unit.book()) == 0 {
            return Err(PipelineError::UnknownBook(unit.book().to_string()).into());
        }
        self.corpus
            .chapter_text(unit.book(), unit.chapter())
            .ok_or_else(|| {
                PipelineError::UnknownChapter {
                    book: unit.book().to_string(),
                    chapter: unit.chapter(),
                }
                .into()
            })
    }

    pub async fn run(&self, mode: RunMode, unit: &ContentUnit, cancel: &CancelToken) -> Result<RunReport> {
        match mode {
            RunMode::Content => self.run_content(unit, cancel).await,
            RunMode::Speech => self.run_speech_from_artifact(unit, cancel).await,
            RunMode::ContentSpeech => self.run_content_speech(unit, cancel).await,
            RunMode::Images => self.run_images(unit, cancel).await,
            RunMode::Full => self.run_full(unit, cancel).await,
        }
    }

    pub async fn run_content(&self, unit: &ContentUnit, cancel: &CancelToken) -> Result<RunReport> {
        let (report, _) = self.content_stage(unit, cancel).await?;
        Ok(report)
    }

    async fn content_stage(
        &self,
        unit: &ContentUnit,
        cancel: &CancelToken,
    ) -> Result<(RunReport, Vec<StructuralItem>)> {
        let text = self.chapter_text(unit)?;
        if cancel.is_set() {
            info!("Content run for {} cancelled before start", unit);
            return Ok((RunReport::cancelled(unit), Vec::new()));
        }

        info!("Content stage for {}", unit);
        let outcome = self.chapters.process(&text, cancel).await?;

        let mut report = RunReport::new(unit);
        report.item_count = outcome.items.len();
        report.cancelled = outcome.cancelled || cancel.is_set();

        if report.cancelled {
            info!(
                "Content stage for {} cancelled with {} items, nothing saved",
                unit, report.item_count
            );
            return Ok((report, outcome.items));
        }
        if outcome.items.is_empty() {
            warn!("Content stage for {} produced no items", unit);
            return Ok((report, outcome.items));
        }

        let path = self.artifact_path(unit);
        let content = serde_json::to_string_pretty(&outcome.items)?;
        self.storage
            .write(&path, content.as_bytes())
            .await
            .context("Failed to save content artifact")?;
        info!("Saved {} items to {}", outcome.items.len(), path.display());
        report.artifact_path = Some(path);

        self.ledger.mark_stage_done(unit, Stage::Content).await?;
        Ok((report, outcome.items))
    }

    async fn load_artifact(&self, unit: &ContentUnit) -> Result<(PathBuf, Vec<StructuralItem>)> {
        let path = self.artifact_path(unit);
        if !self.storage.exists(&path).await? {
            return Err(PipelineError::MissingArtifact(path).into());
        }
        let bytes = self.storage.read(&path).await?;
        let items = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse artifact {}", path.display()))?;
        Ok((path, items))
    }

    pub async fn run_speech_from_items(
        &self,
        unit: &ContentUnit,
        items: &[StructuralItem],
        cancel: &CancelToken,
    ) -> Result<RunReport> {
        let mut report = RunReport::new(unit);
        report.item_count = items.len();
        if cancel.is_set() {
            info!("Speech run for {} cancelled before start", unit);
            report.cancelled = true;
            return Ok(report);
        }

        let entries = extract_speech_entries(items);
        let root = self.speech_root(unit);
        info!("Speech stage for {}: {} scripts", unit, entries.len());

        let batch = self.speech.process(&entries, &root, cancel).await;
        report.audio_count = batch.processed.len();
        report.audio_files = batch.processed;
        report.output_root = Some(root);
        report.errors = batch
            .errors
            .iter()
            .map(|failure| format!("{}: {}", failure.name, failure.error))
            .collect();
        report.cancelled = batch.cancelled || cancel.is_set();

        if !report.cancelled && report.errors.is_empty() {
            self.ledger.mark_stage_done(unit, Stage::Speech).await?;
        } else if !report.errors.is_empty() {
            warn!(
                "Speech stage for {} had {} failures, not marking it done",
                unit,
                report.errors.len()
            );
        }
        Ok(report)
    }

    /// Fails with [`PipelineError::MissingArtifact`] when the content stage
    /// never ran for `unit`.
    pub async fn run_speech_from_artifact(
        &self,
        unit: &ContentUnit,
        cancel: &CancelToken,
    ) -> Result<RunReport> {
        let (path, items) = self.load_artifact(unit).await?;
        let mut report = self.run_speech_from_items(unit, &items, cancel).await?;
        report.artifact_path = Some(path);
        Ok(report)
    }

    pub async fn run_content_speech(
        &self,
        unit: &ContentUnit,
        cancel: &CancelToken,
    ) -> Result<RunReport> {
        let (mut report, items) = self.content_stage(unit, cancel).await?;
        if report.cancelled || items.is_empty() {
            return Ok(report);
        }

        let speech = self.run_speech_from_items(unit, &items, cancel).await?;
        report.audio_count = speech.audio_count;
        report.audio_files = speech.audio_files;
        report.output_root = speech.output_root;
        report.errors = speech.errors;
        report.cancelled = speech.cancelled;
        Ok(report)
    }

    pub async fn run_images(&self, unit: &ContentUnit, cancel: &CancelToken) -> Result<RunReport> {
        let (path, items) = self.load_artifact(unit).await?;

        let mut report = RunReport::new(unit);
        report.artifact_path = Some(path);
        report.item_count = items.len();
        if cancel.is_set() {
            info!("Image run for {} cancelled before start", unit);
            report.cancelled = true;
            return Ok(report);
        }

        let root = self.image_root(unit);
        info!("Image stage for {}", unit);
        let batch = self.images.process(&items, &root, cancel).await?;
        report.output_root = Some(root);
        report.errors = batch
            .errors
            .iter()
            .map(|failure| format!("{}: {}", failure.path.display(), failure.error))
            .collect();
        report.cancelled = batch.cancelled || cancel.is_set();

        if !report.cancelled && report.errors.is_empty() {
            self.ledger.mark_stage_done(unit, Stage::Images).await?;
        }
        Ok(report)
    }

    /// Content, speech and images in order. `full` is marked only when all
    /// three stages were marked in this run.
    pub async fn run_full(&self, unit: &ContentUnit, cancel: &CancelToken) -> Result<RunReport> {
        let mut report = self.run_content_speech(unit, cancel).await?;
        if report.cancelled || report.item_count == 0 || report.artifact_path.is_none() {
            return Ok(report);
        }
        if cancel.is_set() {
            report.cancelled = true;
            return Ok(report);
        }

        let images = self.run_images(unit, cancel).await?;
        report.cancelled = images.cancelled;
        report.errors.extend(images.errors);
        let speech_root = report.output_root.take();
        report.output_root = images.output_root.or(speech_root);

        if !report.cancelled && report.errors.is_empty() {
            self.ledger.mark_stage_done(unit, Stage::Full).await?;
            info!("Full run for {} completed", unit);
        }
        Ok(report)
    }
}
