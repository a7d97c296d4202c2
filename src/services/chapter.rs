use anyhow::Result;
use log::{error, info, warn};

use crate::core::cancel::CancelToken;
use crate::core::model::StructuralItem;
use crate::services::stages::StageRunner;
use crate::services::validation::accept_refinement;

/// Items that went through the whole per-item procedure, in structuring
/// order. `cancelled` is set when the processor stopped early.
#[derive(Debug, Default)]
pub struct ChapterOutcome {
    pub items: Vec<StructuralItem>,
    pub cancelled: bool,
}

impl ChapterOutcome {
    fn cancelled(items: Vec<StructuralItem>) -> Self {
        Self {
            items,
            cancelled: true,
        }
    }
}

enum ItemResult {
    Done(StructuralItem),
    Cancelled,
}

pub struct ChapterProcessor {
    stages: StageRunner,
}

impl ChapterProcessor {
    pub fn new(stages: StageRunner) -> Self {
        Self { stages }
    }

    /// Structures the chapter, then refines, expands and voice-adapts every
    /// item. A structuring failure is returned as an error; later failures
    /// degrade the item instead.
    pub async fn process(&self, chapter_text: &str, cancel: &CancelToken) -> Result<ChapterOutcome> {
        info!("Generating base content structure...");
        let Some(structured) = self.stages.structure_chapter(chapter_text, cancel).await? else {
            return Ok(ChapterOutcome::cancelled(Vec::new()));
        };

        if structured.is_empty() {
            warn!("Structuring returned an empty 'contenido' list");
        }

        let total = structured.len();
        let mut items = Vec::with_capacity(total);
        for (index, item) in structured.into_iter().enumerate() {
            if cancel.is_set() {
                info!("Cancelled with {}/{} items processed", index, total);
                return Ok(ChapterOutcome::cancelled(items));
            }

            info!("--- Item {}/{}: {} ---", index + 1, total, item.kind());
            match self.process_item(item, cancel).await {
                ItemResult::Done(done) => items.push(done),
                ItemResult::Cancelled => {
                    info!(
                        "Cancelled during item {}/{}, dropping it",
                        index + 1,
                        total
                    );
                    return Ok(ChapterOutcome::cancelled(items));
                }
            }
        }

        Ok(ChapterOutcome {
            items,
            cancelled: false,
        })
    }

    async fn process_item(&self, item: StructuralItem, cancel: &CancelToken) -> ItemResult {
        let kind = item.kind();

        let mut refined = match self.stages.refine_item(&item, cancel).await {
            Ok(Some(value)) => match accept_refinement(&item, value) {
                Ok(refined) => refined,
                Err(e) => {
                    warn!("Invalid refinement for {} ({}), using the base version", kind, e);
                    item
                }
            },
            Ok(None) => return ItemResult::Cancelled,
            Err(e) => {
                warn!("Refinement failed for {} ({:#}), using the base version", kind, e);
                item
            }
        };

        if cancel.is_set() {
            return ItemResult::Cancelled;
        }

        let Some(base_text) = refined.narrative().map(str::to_string) else {
            warn!("{} has no narrative text, skipping script and voice", kind);
            refined.set_guion_tts("");
            return ItemResult::Done(refined);
        };

        let referencia = refined.referencia().map(str::to_string);
        let script = match self
            .stages
            .expand_script(kind, referencia.as_deref(), &base_text, cancel)
            .await
        {
            Ok(Some(script)) => script,
            Ok(None) => return ItemResult::Cancelled,
            Err(_) if cancel.is_set() => return ItemResult::Cancelled,
            Err(e) => {
                error!("Script expansion failed for {}: {:#}", kind, e);
                String::new()
            }
        };

        if script.is_empty() {
            warn!("No expanded script for {}, skipping voice adaptation", kind);
            refined.set_guion_tts("");
            return ItemResult::Done(refined);
        }

        if cancel.is_set() {
            return ItemResult::Cancelled;
        }

        let voice_text = match self.stages.adapt_for_voice(kind, &script, cancel).await {
            Ok(Some(text)) => text,
            Ok(None) => return ItemResult::Cancelled,
            Err(_) if cancel.is_set() => return ItemResult::Cancelled,
            Err(e) => {
                error!("Voice adaptation failed for {}: {:#}", kind, e);
                String::new()
            }
        };

        refined.set_guion_tts(voice_text);
        ItemResult::Done(refined)
    }
}
