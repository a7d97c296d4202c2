use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bible2shorts::core::cancel::CancelToken;
use bible2shorts::core::config::Config;
use bible2shorts::core::corpus::JsonCorpus;
use bible2shorts::core::io::NativeStorage;
use bible2shorts::services::bot::{parse_command, BotController, Command, FileKind, Replier};
use bible2shorts::services::image::HttpImageClient;
use bible2shorts::services::llm::{create_llm, LlmClient};
use bible2shorts::services::speech::ElevenLabsClient;
use bible2shorts::services::telegram::TelegramBot;
use bible2shorts::services::workflow::Pipeline;

/// Prints replies for one-shot CLI commands.
struct StdoutReplier;

#[async_trait]
impl Replier for StdoutReplier {
    async fn send_text(&self, text: &str) -> Result<()> {
        println!("{}", text);
        Ok(())
    }

    async fn send_file(&self, path: &Path, kind: FileKind, caption: &str) -> Result<()> {
        println!("[{}] {} {}", kind, path.display(), caption);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init();

    let config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {:#}", e);
            eprintln!("Please check 'config.yml' and the environment overrides.");
            return Err(e);
        }
    };
    config.ensure_directories()?;

    let storage = Arc::new(NativeStorage::new());
    let corpus = Arc::new(JsonCorpus::load(&PathBuf::from(&config.corpus_path))?);
    let llm: Arc<dyn LlmClient> = Arc::from(create_llm(&config.llm)?);
    let speech = Arc::new(ElevenLabsClient::new(&config.speech));
    let image = Arc::new(HttpImageClient::new(&config.image));
    let telegram = config.telegram.clone();

    let pipeline = Arc::new(Pipeline::new(config, corpus, llm, speech, image, storage));
    let cancel = CancelToken::new();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        let telegram = telegram.context("No command given and no 'telegram' section configured")?;
        let bot = Arc::new(TelegramBot::new(&telegram)?);
        let controller = Arc::new(BotController::new(pipeline, cancel));
        return bot.run(controller).await;
    }

    run_once(pipeline, cancel, &args.join(" ")).await
}

async fn run_once(pipeline: Arc<Pipeline>, cancel: CancelToken, text: &str) -> Result<()> {
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Ctrl+C received, cancelling after the current step");
                cancel.request();
            }
        });
    }

    // Runs print the structured report; everything else prints bot replies.
    let default_book = pipeline.config().default_book.clone();
    if let Ok(Command::Run { mode, unit }) = parse_command(text, &default_book) {
        pipeline.chapter_text(&unit)?;
        info!("Running {:?} for {}", mode, unit);
        let report = pipeline.run(mode, &unit, &cancel).await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let controller = BotController::new(pipeline, cancel);
    if let Some(handle) = controller.handle(text, Arc::new(StdoutReplier)).await? {
        handle.await?;
    }
    Ok(())
}
