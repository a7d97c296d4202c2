use anyhow::{Context, Result};
use log::{info, warn};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use crate::core::cancel::CancelToken;
use crate::core::model::{ItemKind, StructuralItem};
use crate::services::llm::{ChatRequest, LlmClient, LlmConfig, StageModels};
use crate::services::prompts;
use crate::services::retry::{retry, RetryPolicy};
use crate::utils::text::{strip_code_blocks, truncate_words};

pub const EXPECTED_ITEMS: usize = 3;

#[derive(Deserialize)]
struct StructuredChapter {
    contenido: Vec<StructuralItem>,
}

/// The four text-generation stages. Each one checks the token before calling
/// out and between retries, and returns `Ok(None)` when it stopped because of
/// cancellation.
pub struct StageRunner {
    llm: Arc<dyn LlmClient>,
    models: StageModels,
    retry: RetryPolicy,
    temperature: f32,
    max_tokens: u32,
    max_words: usize,
}

impl StageRunner {
    pub fn new(llm: Arc<dyn LlmClient>, config: &LlmConfig, max_words: usize) -> Self {
        Self {
            llm,
            models: config.models.clone(),
            retry: RetryPolicy::from_config(config),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_words,
        }
    }

    fn json_request(&self, system: &str, user: String, model: &Option<String>) -> ChatRequest {
        ChatRequest {
            system: system.to_string(),
            user,
            model: model.clone(),
            temperature: self.temperature,
            max_tokens: None,
            json: true,
        }
    }

    fn text_request(&self, system: &str, user: String, model: &Option<String>) -> ChatRequest {
        ChatRequest {
            system: system.to_string(),
            user,
            model: model.clone(),
            temperature: self.temperature,
            max_tokens: Some(self.max_tokens),
            json: false,
        }
    }

    /// Splits a chapter into structural items. A response that does not parse
    /// is retried and then returned as an error.
    pub async fn structure_chapter(
        &self,
        chapter_text: &str,
        cancel: &CancelToken,
    ) -> Result<Option<Vec<StructuralItem>>> {
        if cancel.is_set() {
            info!("Cancelled before content structuring");
            return Ok(None);
        }

        let text = truncate_words(chapter_text, self.max_words);
        let request = self.json_request(
            prompts::STRUCTURE_PROMPT,
            format!("Capítulo a analizar:\n{}", text),
            &self.models.structure,
        );

        let (llm, request) = (&self.llm, &request);
        let Some(items) = retry(self.retry, cancel, || async move {
            let response = llm.chat(request).await?;
            let parsed: StructuredChapter = serde_json::from_str(&strip_code_blocks(&response))
                .context("Structuring response is not a valid 'contenido' document")?;
            Ok(parsed.contenido)
        })
        .await?
        else {
            return Ok(None);
        };

        if items.len() != EXPECTED_ITEMS {
            warn!(
                "Structuring returned {} items, expected {}",
                items.len(),
                EXPECTED_ITEMS
            );
        }
        Ok(Some(items))
    }

    /// Raw refinement output; the caller decides whether to accept it.
    pub async fn refine_item(
        &self,
        item: &StructuralItem,
        cancel: &CancelToken,
    ) -> Result<Option<Value>> {
        if cancel.is_set() {
            info!("Cancelled before refining {}", item.kind());
            return Ok(None);
        }

        let payload = serde_json::to_string(item)?;
        let request = self.json_request(
            prompts::REFINE_PROMPT,
            format!("Refine this video visuals (leave Spanish text alone):\n{}", payload),
            &self.models.refine,
        );

        let (llm, request) = (&self.llm, &request);
        retry(self.retry, cancel, || async move {
            let response = llm.chat(request).await?;
            serde_json::from_str::<Value>(&strip_code_blocks(&response))
                .context("Refinement response is not JSON")
        })
        .await
    }

    pub async fn expand_script(
        &self,
        kind: ItemKind,
        referencia: Option<&str>,
        base_text: &str,
        cancel: &CancelToken,
    ) -> Result<Option<String>> {
        if cancel.is_set() {
            info!("Cancelled before expanding the {} script", kind);
            return Ok(None);
        }

        let request = self.text_request(
            prompts::SCRIPT_PROMPT,
            format!(
                "TIPO DE VIDEO: {}\nREFERENCIA: {}\nTEXTO BASE: {}",
                kind,
                referencia.unwrap_or(""),
                base_text
            ),
            &self.models.script,
        );

        let script = retry(self.retry, cancel, || self.llm.chat(&request)).await?;
        Ok(script.map(|s| s.trim().to_string()))
    }

    pub async fn adapt_for_voice(
        &self,
        kind: ItemKind,
        script: &str,
        cancel: &CancelToken,
    ) -> Result<Option<String>> {
        if cancel.is_set() {
            info!("Cancelled before adapting the {} script for voice", kind);
            return Ok(None);
        }

        let request = self.text_request(
            prompts::VOICE_PROMPT,
            format!("TIPO: {}\nGUION EXPANDIDO:\n{}", kind, script),
            &self.models.voice,
        );

        let text = retry(self.retry, cancel, || self.llm.chat(&request)).await?;
        Ok(text.map(|t| t.trim().to_string()))
    }
}
