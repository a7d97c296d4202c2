//! Hand-written collaborator mocks shared by the service tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use serde_json::json;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::core::cancel::CancelToken;
use crate::core::config::Config;
use crate::services::image::{ImageClient, ImageRequest};
use crate::services::llm::{ChatRequest, LlmClient};
use crate::services::prompts;
use crate::services::speech::{SpeechClient, SpeechRequest};

pub const CORPUS: &str = r#"{"libros": {
    "genesis": {"11": {"1": "Tenía entonces toda la tierra una sola lengua."}, "12": {"1": "Pero Jehová había dicho a Abram."}},
    "exodo": {"1": {"1": "Estos son los nombres."}}
}}"#;

/// Every output path under `root`.
pub fn config_in(root: &Path) -> Config {
    let mut config = Config::default();
    config.artifact_folder = root.join("json").to_string_lossy().to_string();
    config.ledger_path = root.join("pipeline_status.json").to_string_lossy().to_string();
    config.speech.output_folder = root.join("tts").to_string_lossy().to_string();
    config.image.output_folder = root.join("img").to_string_lossy().to_string();
    config
}

/// A `contenido` document with one complete item of each kind.
pub fn structure_response() -> String {
    json!({
        "contenido": [
            {
                "tipo": "HISTORIA",
                "referencia": "Génesis 11:4",
                "gancho": "¿Una torre hasta el cielo?",
                "guion": "Los hombres construyen Babel.",
                "secuencia_visual": {
                    "frame_1": "ladrillos", "frame_2": "andamios", "frame_3": "la torre",
                    "frame_4": "nubes", "frame_5": "confusión", "frame_6": "dispersión"
                },
                "transiciones": {
                    "transicion_1_2": "grúa", "transicion_2_3": "paneo", "transicion_3_4": "ascenso",
                    "transicion_4_5": "giro", "transicion_5_6": "alejamiento"
                }
            },
            {
                "tipo": "CURIOSIDAD",
                "referencia": "Génesis 11:3",
                "curiosidad": "Usaban asfalto como mezcla.",
                "secuencia_visual": {
                    "frame_1": "horno", "frame_2": "barro", "frame_3": "moldes",
                    "frame_4": "brea", "frame_5": "muro", "frame_6": "ciudad"
                },
                "transiciones": {
                    "transicion_1_2": "paneo", "transicion_2_3": "acercamiento", "transicion_3_4": "travelling",
                    "transicion_4_5": "grúa", "transicion_5_6": "alejamiento"
                }
            },
            {
                "tipo": "ORACION",
                "referencia": "Génesis 11:9",
                "oracion": "Señor, une nuestras voces.",
                "texto_imagen": "Una sola voz",
                "prompt_imagen": "sunset over an unfinished tower"
            }
        ]
    })
    .to_string()
}

#[derive(Debug, Default)]
struct Behaviour {
    refine_response: Option<String>,
    fail_refine: bool,
    fail_script: bool,
    cancel_after: Option<(usize, CancelToken)>,
}

/// Answers by system prompt: structuring returns the configured document,
/// refinement echoes its payload, the free-text stages prefix their input.
#[derive(Debug)]
pub struct MockLlm {
    structure: String,
    behaviour: Behaviour,
    calls: Arc<Mutex<Vec<ChatRequest>>>,
}

impl MockLlm {
    pub fn new(structure: String) -> Self {
        Self {
            structure,
            behaviour: Behaviour::default(),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_refine_response(mut self, response: impl Into<String>) -> Self {
        self.behaviour.refine_response = Some(response.into());
        self
    }

    pub fn failing_refine(mut self) -> Self {
        self.behaviour.fail_refine = true;
        self
    }

    pub fn failing_script(mut self) -> Self {
        self.behaviour.fail_script = true;
        self
    }

    /// Requests cancellation once the `n`-th call has completed.
    pub fn cancel_after(mut self, n: usize, token: CancelToken) -> Self {
        self.behaviour.cancel_after = Some((n, token));
        self
    }

    pub fn calls(&self) -> Vec<ChatRequest> {
        self.calls.lock().unwrap().clone()
    }

    fn answer(&self, request: &ChatRequest) -> Result<String> {
        let system = request.system.as_str();
        if system == prompts::STRUCTURE_PROMPT {
            Ok(self.structure.clone())
        } else if system == prompts::REFINE_PROMPT {
            if self.behaviour.fail_refine {
                return Err(anyhow!("refiner unavailable"));
            }
            match &self.behaviour.refine_response {
                Some(response) => Ok(response.clone()),
                None => Ok(request
                    .user
                    .split_once('\n')
                    .map(|(_, payload)| payload.to_string())
                    .unwrap_or_default()),
            }
        } else if system == prompts::SCRIPT_PROMPT {
            if self.behaviour.fail_script {
                return Err(anyhow!("script doctor unavailable"));
            }
            let base = request.user.split("TEXTO BASE: ").nth(1).unwrap_or("");
            Ok(format!("  GUION {}\n", base))
        } else if system == prompts::VOICE_PROMPT {
            let script = request.user.split("GUION EXPANDIDO:\n").nth(1).unwrap_or("");
            Ok(format!("VOZ {}", script))
        } else {
            Err(anyhow!("unexpected system prompt"))
        }
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn chat(&self, request: &ChatRequest) -> Result<String> {
        let count = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(request.clone());
            calls.len()
        };
        let answer = self.answer(request);
        if let Some((n, token)) = &self.behaviour.cancel_after {
            if count >= *n {
                token.request();
            }
        }
        answer
    }
}

/// Streams two chunks per request; fails for texts containing a marker.
#[derive(Debug, Default)]
pub struct MockSpeech {
    fail_marker: Option<String>,
    fail_mid_stream: bool,
    cancel_after: Option<(usize, CancelToken)>,
    pub requests: Arc<Mutex<Vec<SpeechRequest>>>,
}

impl MockSpeech {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(mut self, marker: impl Into<String>) -> Self {
        self.fail_marker = Some(marker.into());
        self
    }

    pub fn failing_mid_stream(mut self) -> Self {
        self.fail_mid_stream = true;
        self
    }

    pub fn cancel_after(mut self, n: usize, token: CancelToken) -> Self {
        self.cancel_after = Some((n, token));
        self
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl SpeechClient for MockSpeech {
    async fn synthesize(
        &self,
        request: &SpeechRequest,
    ) -> Result<BoxStream<'static, Result<Vec<u8>>>> {
        let count = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request.clone());
            requests.len()
        };
        if let Some((n, token)) = &self.cancel_after {
            if count >= *n {
                token.request();
            }
        }

        if let Some(marker) = &self.fail_marker {
            if request.text.contains(marker.as_str()) {
                return Err(anyhow!("quota exceeded"));
            }
        }

        let chunks: Vec<Result<Vec<u8>>> = if self.fail_mid_stream {
            vec![Ok(b"ID3".to_vec()), Err(anyhow!("connection reset"))]
        } else {
            vec![Ok(b"ID3".to_vec()), Ok(b"audio".to_vec())]
        };
        Ok(stream::iter(chunks).boxed())
    }
}

#[derive(Debug, Default)]
pub struct MockImage {
    fail_prompt: Option<String>,
    cancel_after: Option<(usize, CancelToken)>,
    pub prompts: Arc<Mutex<Vec<String>>>,
}

impl MockImage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(mut self, prompt: impl Into<String>) -> Self {
        self.fail_prompt = Some(prompt.into());
        self
    }

    pub fn cancel_after(mut self, n: usize, token: CancelToken) -> Self {
        self.cancel_after = Some((n, token));
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageClient for MockImage {
    async fn generate(&self, request: &ImageRequest) -> Result<Vec<u8>> {
        let count = {
            let mut prompts = self.prompts.lock().unwrap();
            prompts.push(request.prompt.clone());
            prompts.len()
        };
        if let Some((n, token)) = &self.cancel_after {
            if count >= *n {
                token.request();
            }
        }
        if self.fail_prompt.as_deref() == Some(request.prompt.as_str()) {
            return Err(anyhow!("out of memory"));
        }
        Ok(b"\x89PNG".to_vec())
    }
}
