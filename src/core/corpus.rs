use anyhow::{Context, Result};
use serde_json::{Map, Value};
use std::path::Path;

/// Read-only lookup over the verse corpus.
pub trait Corpus: Send + Sync {
    /// Formatted chapter text, `None` when the book or chapter is unknown.
    fn chapter_text(&self, book: &str, chapter: u32) -> Option<String>;
    fn list_books(&self) -> Vec<String>;
    /// Sorted ascending; empty for an unknown book.
    fn list_chapters(&self, book: &str) -> Vec<u32>;
    fn chapter_count(&self, book: &str) -> usize;
}

/// Corpus stored as `{"libros": {book: {chapter: {verse: text}}}}`.
pub struct JsonCorpus {
    books: Map<String, Value>,
}

impl JsonCorpus {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read corpus {}", path.display()))?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let mut root: Map<String, Value> =
            serde_json::from_str(content).context("Failed to parse corpus JSON")?;
        let books = match root.remove("libros") {
            Some(Value::Object(books)) => books,
            _ => Map::new(),
        };
        Ok(Self { books })
    }

    fn book(&self, book: &str) -> Option<(&str, &Map<String, Value>)> {
        let wanted = book.to_lowercase();
        self.books
            .iter()
            .find(|(name, _)| name.to_lowercase() == wanted)
            .and_then(|(name, chapters)| chapters.as_object().map(|c| (name.as_str(), c)))
    }
}

impl Corpus for JsonCorpus {
    fn chapter_text(&self, book: &str, chapter: u32) -> Option<String> {
        let (name, chapters) = self.book(book)?;
        let verses = chapters.get(&chapter.to_string())?.as_object()?;

        let header = format!("{} - Capítulo {}\n{}\n\n", name, chapter, "=".repeat(40));

        let mut numbered: Vec<(u32, &str)> = verses
            .iter()
            .filter_map(|(k, v)| Some((k.parse::<u32>().ok()?, v.as_str()?)))
            .collect();
        if numbered.is_empty() {
            return Some(header.trim().to_string());
        }
        numbered.sort_by_key(|(n, _)| *n);

        let lines = numbered
            .iter()
            .map(|(n, text)| format!("{}. {}", n, text))
            .collect::<Vec<_>>()
            .join("\n");
        Some(header + &lines)
    }

    fn list_books(&self) -> Vec<String> {
        self.books.keys().cloned().collect()
    }

    fn list_chapters(&self, book: &str) -> Vec<u32> {
        let Some((_, chapters)) = self.book(book) else {
            return Vec::new();
        };
        let mut numbers: Vec<u32> = chapters.keys().filter_map(|k| k.parse().ok()).collect();
        numbers.sort_unstable();
        numbers
    }

    fn chapter_count(&self, book: &str) -> usize {
        self.book(book).map(|(_, chapters)| chapters.len()).unwrap_or(0)
    }
}
