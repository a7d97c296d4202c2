use crate::core::io::Storage;
use crate::core::model::ContentUnit;
use anyhow::{Context, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    #[serde(alias = "json")]
    Content,
    #[serde(alias = "tts")]
    Speech,
    #[serde(alias = "imagenes")]
    Images,
    /// Set only when a full run finished every stage without cancellation.
    Full,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Content => "content",
            Stage::Speech => "speech",
            Stage::Images => "images",
            Stage::Full => "full",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Completed chapters per stage for one book.
pub type BookStatus = BTreeMap<Stage, BTreeSet<u32>>;

type LedgerState = BTreeMap<String, BookStatus>;

/// Persisted `book -> stage -> chapters` record.
///
/// Writes only ever add chapters. The whole file is rewritten on every
/// update, so load-merge-save runs under one lock.
pub struct ProgressLedger {
    path: PathBuf,
    storage: Arc<dyn Storage>,
    lock: Mutex<()>,
}

impl ProgressLedger {
    pub fn new(path: impl Into<PathBuf>, storage: Arc<dyn Storage>) -> Self {
        Self {
            path: path.into(),
            storage,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn mark_stage_done(&self, unit: &ContentUnit, stage: Stage) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut state = self.load().await?;

        let inserted = state
            .entry(unit.ledger_key())
            .or_default()
            .entry(stage)
            .or_default()
            .insert(unit.chapter());

        if inserted {
            self.save(&state).await?;
            debug!("Ledger: {} marked {}", unit, stage);
        }
        Ok(())
    }

    /// Status of one book; empty when nothing was recorded.
    pub async fn status(&self, book: &str) -> Result<BookStatus> {
        let _guard = self.lock.lock().await;
        let mut state = self.load().await?;
        Ok(state.remove(&book.to_lowercase()).unwrap_or_default())
    }

    pub async fn status_all(&self) -> Result<BTreeMap<String, BookStatus>> {
        let _guard = self.lock.lock().await;
        self.load().await
    }

    /// Highest completed chapter plus one, or 1. Does not check the chapter
    /// against the corpus.
    pub async fn next_pending(&self, book: &str, stage: Stage) -> Result<u32> {
        let status = self.status(book).await?;
        Ok(next_after(&status, stage))
    }

    async fn load(&self) -> Result<LedgerState> {
        if !self.storage.exists(&self.path).await? {
            return Ok(LedgerState::new());
        }

        let bytes = match self.storage.read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Ledger {} unreadable ({:#}), starting empty", self.path.display(), e);
                return Ok(LedgerState::new());
            }
        };

        match serde_json::from_slice::<LedgerState>(&bytes) {
            Ok(state) => Ok(state),
            Err(e) => {
                let backup = self.backup_path();
                warn!(
                    "Ledger {} is corrupt ({}), keeping a copy at {} and starting empty",
                    self.path.display(),
                    e,
                    backup.display()
                );
                self.storage
                    .write(&backup, &bytes)
                    .await
                    .context("Failed to back up corrupt ledger")?;
                Ok(LedgerState::new())
            }
        }
    }

    async fn save(&self, state: &LedgerState) -> Result<()> {
        let content = serde_json::to_string_pretty(state)?;
        let tmp = self.path.with_extension("json.tmp");
        self.storage.write(&tmp, content.as_bytes()).await?;
        self.storage.rename(&tmp, &self.path).await
    }

    fn backup_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".corrupt");
        PathBuf::from(name)
    }
}

pub fn next_after(status: &BookStatus, stage: Stage) -> u32 {
    status
        .get(&stage)
        .and_then(|chapters| chapters.last())
        .map(|last| last + 1)
        .unwrap_or(1)
}
