use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// One (book, chapter) pair being processed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ContentUnit {
    book: String,
    chapter: u32,
}

impl ContentUnit {
    pub fn new(book: impl Into<String>, chapter: u32) -> Self {
        Self {
            book: book.into(),
            chapter,
        }
    }

    pub fn book(&self) -> &str {
        &self.book
    }

    pub fn chapter(&self) -> u32 {
        self.chapter
    }

    /// Key used by the progress ledger.
    pub fn ledger_key(&self) -> String {
        self.book.to_lowercase()
    }

    /// `{book}_{chapter}`, the folder name for generated media.
    pub fn slug(&self) -> String {
        format!("{}_{}", self.book, self.chapter)
    }

    pub fn artifact_file_name(&self) -> String {
        format!("{}_{}_videos.json", self.book, self.chapter)
    }
}

impl fmt::Display for ContentUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.book, self.chapter)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Historia,
    Curiosidad,
    Oracion,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Historia => "HISTORIA",
            ItemKind::Curiosidad => "CURIOSIDAD",
            ItemKind::Oracion => "ORACION",
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A short-video block produced by content structuring, discriminated by
/// `tipo`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tipo")]
pub enum StructuralItem {
    #[serde(rename = "HISTORIA")]
    Historia(VisualSequence),
    #[serde(rename = "CURIOSIDAD")]
    Curiosidad(VisualSequence),
    #[serde(rename = "ORACION")]
    Oracion(Prayer),
}

/// Narrative with six frames and the five transitions between them.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VisualSequence {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referencia: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guion: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub curiosidad: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secuencia_visual: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transiciones: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guion_tts: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Single static image with a caption and a spoken prayer.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Prayer {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referencia: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oracion: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub texto_imagen: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_imagen: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guion_tts: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

impl StructuralItem {
    pub fn kind(&self) -> ItemKind {
        match self {
            StructuralItem::Historia(_) => ItemKind::Historia,
            StructuralItem::Curiosidad(_) => ItemKind::Curiosidad,
            StructuralItem::Oracion(_) => ItemKind::Oracion,
        }
    }

    pub fn referencia(&self) -> Option<&str> {
        match self {
            StructuralItem::Historia(s) | StructuralItem::Curiosidad(s) => non_empty(&s.referencia),
            StructuralItem::Oracion(p) => non_empty(&p.referencia),
        }
    }

    /// Base text for script expansion: `guion`, then `curiosidad`, then
    /// `oracion`.
    pub fn narrative(&self) -> Option<&str> {
        match self {
            StructuralItem::Historia(s) | StructuralItem::Curiosidad(s) => {
                non_empty(&s.guion).or_else(|| non_empty(&s.curiosidad))
            }
            StructuralItem::Oracion(p) => non_empty(&p.oracion),
        }
    }

    /// `None` until the chapter processor has handled the item.
    pub fn guion_tts(&self) -> Option<&str> {
        match self {
            StructuralItem::Historia(s) | StructuralItem::Curiosidad(s) => s.guion_tts.as_deref(),
            StructuralItem::Oracion(p) => p.guion_tts.as_deref(),
        }
    }

    pub fn set_guion_tts(&mut self, script: impl Into<String>) {
        let script = Some(script.into());
        match self {
            StructuralItem::Historia(s) | StructuralItem::Curiosidad(s) => s.guion_tts = script,
            StructuralItem::Oracion(p) => p.guion_tts = script,
        }
    }
}

/// Structured result of every run mode.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub unit: ContentUnit,
    pub artifact_path: Option<PathBuf>,
    pub item_count: usize,
    pub audio_count: usize,
    pub audio_files: Vec<PathBuf>,
    pub output_root: Option<PathBuf>,
    pub cancelled: bool,
    /// Captured speech or image failures; the run itself went on.
    pub errors: Vec<String>,
}

impl RunReport {
    pub fn new(unit: &ContentUnit) -> Self {
        Self {
            unit: unit.clone(),
            artifact_path: None,
            item_count: 0,
            audio_count: 0,
            audio_files: Vec::new(),
            output_root: None,
            cancelled: false,
            errors: Vec::new(),
        }
    }

    pub fn cancelled(unit: &ContentUnit) -> Self {
        Self {
            cancelled: true,
            ..Self::new(unit)
        }
    }
}

/// Input errors: reported synchronously, nothing is created.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Book '{0}' does not exist in the corpus")]
    UnknownBook(String),
    #[error("Chapter {chapter} does not exist in book '{book}'")]
    UnknownChapter { book: String, chapter: u32 },
    #[error("Missing artifact {}: run the content stage first", .0.display())]
    MissingArtifact(PathBuf),
}
