use anyhow::Result;
use async_trait::async_trait;
use log::{error, info};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::core::cancel::CancelToken;
use crate::core::ledger::{next_after, BookStatus, Stage};
use crate::core::model::{ContentUnit, PipelineError, RunReport};
use crate::services::workflow::{Pipeline, RunMode};

pub const HELP_TEXT: &str = "Comandos disponibles:\n\
/content <cap>            – Solo generar contenido (libro por defecto)\n\
/content <libro> <cap>    – Solo generar contenido para libro/capítulo\n\
/speech <...>             – Solo audio (requiere contenido previo)\n\
/content_speech <...>     – Contenido + audio\n\
/images <...>             – Solo imágenes (requiere contenido previo)\n\
/full <...>               – Contenido + audio + imágenes\n\
/books                    – Lista de libros\n\
/chapters <libro>         – Lista capítulos de un libro\n\
/status [libro]           – Estado de progreso\n\
/cancel                   – Solicita cancelar el proceso en curso";

fn tag(mode: RunMode) -> &'static str {
    match mode {
        RunMode::Content => "CONTENIDO",
        RunMode::Speech => "AUDIO",
        RunMode::ContentSpeech => "CONTENIDO+AUDIO",
        RunMode::Images => "IMG",
        RunMode::Full => "FULL",
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    Run { mode: RunMode, unit: ContentUnit },
    Books,
    Chapters(String),
    Status(Option<String>),
    Cancel,
}

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum CommandError {
    #[error("Comando desconocido: /{0}. Usa /help para ver los comandos.")]
    Unknown(String),
    #[error("Debes indicar el capítulo, por ejemplo: 9 o <libro> <cap> (ej: exodo 3).")]
    MissingChapter,
    #[error("El capítulo debe ser un número entero.")]
    InvalidChapter,
    #[error("Uso: /chapters <libro>. Ej: /chapters genesis")]
    MissingBook,
}

/// Parses `/command [args]` (a leading `/` and a `@botname` suffix are
/// optional). Legacy command names are accepted as aliases.
pub fn parse_command(text: &str, default_book: &str) -> Result<Command, CommandError> {
    let mut parts = text.split_whitespace();
    let head = parts.next().unwrap_or("");
    let name = head.trim_start_matches('/');
    let name = name.split('@').next().unwrap_or(name).to_lowercase();
    let args: Vec<&str> = parts.collect();

    let run = |mode| parse_unit(&args, default_book).map(|unit| Command::Run { mode, unit });

    match name.as_str() {
        "start" | "help" => Ok(Command::Help),
        "content" | "json" => run(RunMode::Content),
        "speech" | "tts" => run(RunMode::Speech),
        "content_speech" | "content+speech" | "json_tts" => run(RunMode::ContentSpeech),
        "images" | "imagenes" => run(RunMode::Images),
        "full" => run(RunMode::Full),
        "books" | "libros" => Ok(Command::Books),
        "chapters" | "capitulos" => args
            .first()
            .map(|book| Command::Chapters(book.to_lowercase()))
            .ok_or(CommandError::MissingBook),
        "status" => Ok(Command::Status(args.first().map(|b| b.to_lowercase()))),
        "cancel" => Ok(Command::Cancel),
        other => Err(CommandError::Unknown(other.to_string())),
    }
}

/// `<chapter>` uses the default book, `<book> <chapter>` names it.
fn parse_unit(args: &[&str], default_book: &str) -> Result<ContentUnit, CommandError> {
    let (book, chapter) = match args {
        [] => return Err(CommandError::MissingChapter),
        [chapter] => (default_book.to_lowercase(), *chapter),
        [book, chapter, ..] => (book.to_lowercase(), *chapter),
    };
    let chapter = chapter
        .parse::<u32>()
        .map_err(|_| CommandError::InvalidChapter)?;
    Ok(ContentUnit::new(book, chapter))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Document,
    Audio,
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileKind::Document => f.write_str("document"),
            FileKind::Audio => f.write_str("audio"),
        }
    }
}

/// Where replies for one command go.
#[async_trait]
pub trait Replier: Send + Sync {
    async fn send_text(&self, text: &str) -> Result<()>;
    async fn send_file(&self, path: &Path, kind: FileKind, caption: &str) -> Result<()>;
}

/// Executes commands against the pipeline. Runs are spawned so the caller
/// can keep reading commands (including `/cancel`) while one executes.
pub struct BotController {
    pipeline: Arc<Pipeline>,
    cancel: CancelToken,
}

impl BotController {
    pub fn new(pipeline: Arc<Pipeline>, cancel: CancelToken) -> Self {
        Self { pipeline, cancel }
    }

    /// Handles one message. Returns the spawned run, if the command started
    /// one.
    pub async fn handle(&self, text: &str, replier: Arc<dyn Replier>) -> Result<Option<JoinHandle<()>>> {
        let command = match parse_command(text, &self.pipeline.config().default_book) {
            Ok(command) => command,
            Err(e) => {
                replier.send_text(&e.to_string()).await?;
                return Ok(None);
            }
        };

        match command {
            Command::Help => replier.send_text(HELP_TEXT).await?,
            Command::Books => replier.send_text(&self.books_text()).await?,
            Command::Chapters(book) => replier.send_text(&self.chapters_text(&book)).await?,
            Command::Status(book) => {
                let book = book.unwrap_or_else(|| self.pipeline.config().default_book.to_lowercase());
                let status = self.pipeline.ledger().status(&book).await?;
                replier.send_text(&status_text(&book, &status)).await?;
            }
            Command::Cancel => {
                self.cancel.request();
                info!("Cancellation requested");
                replier
                    .send_text("Cancelación solicitada. El proceso se detendrá en cuanto termine el paso actual.")
                    .await?;
            }
            Command::Run { mode, unit } => return self.start_run(mode, unit, replier).await,
        }
        Ok(None)
    }

    async fn start_run(
        &self,
        mode: RunMode,
        unit: ContentUnit,
        replier: Arc<dyn Replier>,
    ) -> Result<Option<JoinHandle<()>>> {
        self.cancel.reset();

        if let Err(e) = self.pipeline.chapter_text(&unit) {
            replier.send_text(&e.to_string()).await?;
            return Ok(None);
        }

        replier
            .send_text(&format!("[{}] Iniciando para {}...", tag(mode), unit))
            .await?;

        let pipeline = self.pipeline.clone();
        let cancel = self.cancel.clone();
        let handle = tokio::spawn(async move {
            info!("Run {:?} for {} started", mode, unit);
            let result = pipeline.run(mode, &unit, &cancel).await;
            if let Err(e) = deliver(replier.as_ref(), mode, &unit, result).await {
                error!("Failed to deliver result for {}: {:#}", unit, e);
            }
        });
        Ok(Some(handle))
    }

    fn books_text(&self) -> String {
        let corpus = self.pipeline.corpus();
        let books = corpus.list_books();
        if books.is_empty() {
            return "No encontré libros en el corpus.".to_string();
        }
        let lines: Vec<String> = books
            .iter()
            .map(|book| format!("- {} ({} capítulos)", book, corpus.chapter_count(book)))
            .collect();
        format!("Libros disponibles:\n{}", lines.join("\n"))
    }

    fn chapters_text(&self, book: &str) -> String {
        let chapters = self.pipeline.corpus().list_chapters(book);
        let (Some(first), Some(last)) = (chapters.first(), chapters.last()) else {
            return format!("No encontré capítulos para el libro '{}'.", book);
        };
        let range = if chapters.len() > 1 {
            format!("{}–{}", first, last)
        } else {
            first.to_string()
        };
        format!(
            "Libro: {}\nCapítulos disponibles: {}\nRango: {}",
            book,
            join_numbers(chapters.iter()),
            range
        )
    }
}

fn join_numbers<'a>(numbers: impl Iterator<Item = &'a u32>) -> String {
    numbers.map(u32::to_string).collect::<Vec<_>>().join(", ")
}

pub fn status_text(book: &str, status: &BookStatus) -> String {
    if status.is_empty() {
        return format!("No hay registros para el libro '{}'.", book);
    }
    let done = |stage: Stage| match status.get(&stage) {
        Some(chapters) if !chapters.is_empty() => join_numbers(chapters.iter()),
        _ => "-".to_string(),
    };
    format!(
        "Estado para {}:\n\
         - Contenido: {}\n\
         - Audio:     {}\n\
         - Imágenes:  {}\n\
         - Full:      {}\n\n\
         Siguientes sugeridos:\n\
         - Próximo contenido: {}\n\
         - Próximo audio:     {}\n\
         - Próximas imágenes: {}",
        book,
        done(Stage::Content),
        done(Stage::Speech),
        done(Stage::Images),
        done(Stage::Full),
        next_after(status, Stage::Content),
        next_after(status, Stage::Speech),
        next_after(status, Stage::Images),
    )
}

/// One-message summary of a finished run.
pub fn summarize(mode: RunMode, report: &RunReport) -> String {
    let tag = tag(mode);
    let unit = &report.unit;
    if report.cancelled {
        return format!(
            "[{}] Proceso cancelado para {}. Items: {} – Audios: {}.",
            tag, unit, report.item_count, report.audio_count
        );
    }

    let needs_artifact = matches!(mode, RunMode::Content | RunMode::ContentSpeech | RunMode::Full);
    if needs_artifact && report.artifact_path.is_none() {
        return format!("[{}] Sin contenido para {}. No se generó archivo.", tag, unit);
    }

    let mut text = format!("[{}] Terminado {}.", tag, unit);
    match mode {
        RunMode::Content => text.push_str(&format!("\nItems: {}.", report.item_count)),
        RunMode::Speech => text.push_str(&format!("\nAudios generados: {}.", report.audio_count)),
        RunMode::ContentSpeech => text.push_str(&format!(
            "\nItems: {} – Audios: {}.",
            report.item_count, report.audio_count
        )),
        RunMode::Images => {
            if let Some(root) = &report.output_root {
                text.push_str(&format!("\nImágenes en carpeta: {}/", root.display()));
            }
        }
        RunMode::Full => {
            text.push_str(&format!(
                "\nItems: {} – Audios: {}.",
                report.item_count, report.audio_count
            ));
            if let Some(root) = &report.output_root {
                text.push_str(&format!("\nImágenes en: {}/", root.display()));
            }
        }
    }

    if !report.errors.is_empty() {
        text.push_str(&format!("\nErrores ({}):", report.errors.len()));
        for line in report.errors.iter().take(5) {
            text.push_str(&format!("\n- {}", line));
        }
    }
    text
}

async fn deliver(
    replier: &dyn Replier,
    mode: RunMode,
    unit: &ContentUnit,
    result: Result<RunReport>,
) -> Result<()> {
    let report = match result {
        Ok(report) => report,
        Err(e) => {
            let message = match e.downcast_ref::<PipelineError>() {
                Some(input) => input.to_string(),
                None => format!("[{}] Error en {}: {:#}", tag(mode), unit, e),
            };
            error!("Run {:?} for {} failed: {:#}", mode, unit, e);
            return replier.send_text(&message).await;
        }
    };

    replier.send_text(&summarize(mode, &report)).await?;
    if report.cancelled {
        return Ok(());
    }

    let mut attachments: Vec<(PathBuf, FileKind)> = Vec::new();
    if matches!(mode, RunMode::Content | RunMode::ContentSpeech | RunMode::Full) {
        if let Some(path) = &report.artifact_path {
            attachments.push((path.clone(), FileKind::Document));
        }
    }
    attachments.extend(report.audio_files.iter().map(|p| (p.clone(), FileKind::Audio)));

    for (path, kind) in attachments {
        if !path.exists() {
            continue;
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let caption = format!("{} – {}", unit, name);
        if let Err(e) = replier.send_file(&path, kind, &caption).await {
            error!("Failed to send {}: {:#}", path.display(), e);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::corpus::JsonCorpus;
    use crate::core::io::NativeStorage;
    use crate::services::test_support::{
        config_in, structure_response, MockImage, MockLlm, MockSpeech, CORPUS,
    };
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingReplier {
        texts: Mutex<Vec<String>>,
        files: Mutex<Vec<(PathBuf, FileKind)>>,
    }

    impl RecordingReplier {
        fn texts(&self) -> Vec<String> {
            self.texts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Replier for RecordingReplier {
        async fn send_text(&self, text: &str) -> Result<()> {
            self.texts.lock().unwrap().push(text.to_string());
            Ok(())
        }

        async fn send_file(&self, path: &Path, kind: FileKind, _caption: &str) -> Result<()> {
            self.files.lock().unwrap().push((path.to_path_buf(), kind));
            Ok(())
        }
    }

    fn controller(root: &Path, llm: MockLlm) -> (BotController, CancelToken) {
        let pipeline = Pipeline::new(
            config_in(root),
            Arc::new(JsonCorpus::from_json(CORPUS).unwrap()),
            Arc::new(llm),
            Arc::new(MockSpeech::new()),
            Arc::new(MockImage::new()),
            Arc::new(NativeStorage::new()),
        );
        let cancel = CancelToken::new();
        (BotController::new(Arc::new(pipeline), cancel.clone()), cancel)
    }

    #[test]
    fn test_parse_units() {
        assert_eq!(
            parse_command("/content 9", "genesis"),
            Ok(Command::Run {
                mode: RunMode::Content,
                unit: ContentUnit::new("genesis", 9)
            })
        );
        assert_eq!(
            parse_command("/full@biblia_bot Exodo 3", "genesis"),
            Ok(Command::Run {
                mode: RunMode::Full,
                unit: ContentUnit::new("exodo", 3)
            })
        );
        assert_eq!(
            parse_command("content+speech 2", "genesis").map(|c| matches!(
                c,
                Command::Run { mode: RunMode::ContentSpeech, .. }
            )),
            Ok(true)
        );
        assert_eq!(parse_command("/images", "genesis"), Err(CommandError::MissingChapter));
        assert_eq!(parse_command("/tts exodo tres", "genesis"), Err(CommandError::InvalidChapter));
    }

    #[test]
    fn test_parse_other_commands() {
        assert_eq!(parse_command("/start", "genesis"), Ok(Command::Help));
        assert_eq!(parse_command("/libros", "genesis"), Ok(Command::Books));
        assert_eq!(
            parse_command("/chapters Exodo", "genesis"),
            Ok(Command::Chapters("exodo".to_string()))
        );
        assert_eq!(parse_command("/chapters", "genesis"), Err(CommandError::MissingBook));
        assert_eq!(parse_command("/status", "genesis"), Ok(Command::Status(None)));
        assert_eq!(parse_command("/cancel", "genesis"), Ok(Command::Cancel));
        assert_eq!(
            parse_command("/podcast 1", "genesis"),
            Err(CommandError::Unknown("podcast".to_string()))
        );
    }

    #[test]
    fn test_status_text_lists_chapters_and_next() {
        let mut status = BookStatus::new();
        status.insert(Stage::Content, BTreeSet::from([1, 2, 4]));
        status.insert(Stage::Speech, BTreeSet::from([1]));

        let text = status_text("genesis", &status);

        assert!(text.contains("- Contenido: 1, 2, 4"));
        assert!(text.contains("- Imágenes:  -"));
        assert!(text.contains("- Próximo contenido: 5"));
        assert!(text.contains("- Próximo audio:     2"));
        assert!(text.contains("- Próximas imágenes: 1"));
        assert_eq!(status_text("exodo", &BookStatus::new()), "No hay registros para el libro 'exodo'.");
    }

    #[test]
    fn test_summarize_cancelled_and_errors() {
        let unit = ContentUnit::new("genesis", 1);
        let mut report = RunReport::cancelled(&unit);
        report.item_count = 1;
        assert!(summarize(RunMode::Full, &report).contains("cancelado"));

        let mut report = RunReport::new(&unit);
        report.audio_count = 2;
        report.errors = vec!["Gen_HISTORIA: quota".to_string()];
        let text = summarize(RunMode::Speech, &report);
        assert!(text.contains("Audios generados: 2."));
        assert!(text.contains("- Gen_HISTORIA: quota"));

        assert!(summarize(RunMode::Content, &RunReport::new(&unit)).contains("No se generó archivo"));
    }

    #[tokio::test]
    async fn test_run_command_replies_and_attaches_artifact() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let (bot, _) = controller(temp_dir.path(), MockLlm::new(structure_response()));
        let replier = Arc::new(RecordingReplier::default());

        let handle = bot.handle("/content_speech 11", replier.clone()).await?.unwrap();
        handle.await?;

        let texts = replier.texts();
        assert_eq!(texts[0], "[CONTENIDO+AUDIO] Iniciando para genesis 11...");
        assert!(texts[1].contains("Items: 3 – Audios: 3."));

        let files = replier.files.lock().unwrap().clone();
        assert_eq!(files.len(), 4);
        assert_eq!(files[0].1, FileKind::Document);
        assert!(files[1..].iter().all(|(_, kind)| *kind == FileKind::Audio));
        Ok(())
    }

    #[tokio::test]
    async fn test_run_command_resets_a_stale_cancel() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let (bot, cancel) = controller(temp_dir.path(), MockLlm::new(structure_response()));
        let replier = Arc::new(RecordingReplier::default());

        bot.handle("/cancel", replier.clone()).await?;
        assert!(cancel.is_set());

        let handle = bot.handle("/content 11", replier.clone()).await?.unwrap();
        handle.await?;

        assert!(replier.texts().last().unwrap().contains("Items: 3."));
        Ok(())
    }

    #[tokio::test]
    async fn test_input_errors_reply_without_running() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let llm = MockLlm::new(structure_response());
        let (bot, _) = controller(temp_dir.path(), llm);
        let replier = Arc::new(RecordingReplier::default());

        assert!(bot.handle("/full levitico 1", replier.clone()).await?.is_none());
        assert!(bot.handle("/full 99", replier.clone()).await?.is_none());

        let texts = replier.texts();
        assert_eq!(texts[0], "Book 'levitico' does not exist in the corpus");
        assert_eq!(texts[1], "Chapter 99 does not exist in book 'genesis'");
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_artifact_is_reported() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let (bot, _) = controller(temp_dir.path(), MockLlm::new(structure_response()));
        let replier = Arc::new(RecordingReplier::default());

        let handle = bot.handle("/images 12", replier.clone()).await?.unwrap();
        handle.await?;

        assert!(replier.texts()[1].starts_with("Missing artifact"));
        Ok(())
    }

    #[tokio::test]
    async fn test_read_only_commands() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let (bot, _) = controller(temp_dir.path(), MockLlm::new(structure_response()));
        let replier = Arc::new(RecordingReplier::default());

        bot.handle("/books", replier.clone()).await?;
        bot.handle("/chapters genesis", replier.clone()).await?;
        bot.handle("/status", replier.clone()).await?;

        let texts = replier.texts();
        assert_eq!(
            texts[0],
            "Libros disponibles:\n- genesis (2 capítulos)\n- exodo (1 capítulos)"
        );
        assert_eq!(
            texts[1],
            "Libro: genesis\nCapítulos disponibles: 11, 12\nRango: 11–12"
        );
        assert_eq!(texts[2], "No hay registros para el libro 'genesis'.");
        Ok(())
    }
}
