use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{debug, error, info, warn};
use reqwest::multipart;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::core::config::TelegramConfig;
use crate::services::bot::{BotController, FileKind, Replier};

const API_BASE: &str = "https://api.telegram.org";

#[derive(Deserialize, Debug)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Deserialize, Debug)]
struct Update {
    update_id: i64,
    message: Option<Message>,
}

#[derive(Deserialize, Debug)]
struct Message {
    chat: Chat,
    text: Option<String>,
}

#[derive(Deserialize, Debug)]
struct Chat {
    id: i64,
}

/// Long-polling Telegram transport for [`BotController`].
pub struct TelegramBot {
    client: reqwest::Client,
    api_url: String,
    allowed_chats: Vec<i64>,
    poll_timeout: u64,
}

impl TelegramBot {
    pub fn new(config: &TelegramConfig) -> Result<Self> {
        if config.token.trim().is_empty() {
            anyhow::bail!("Telegram token missing: set TELEGRAM_BOT_TOKEN or telegram.token");
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.poll_timeout_seconds + 30))
            .build()?;
        Ok(Self {
            client,
            api_url: format!("{}/bot{}", API_BASE, config.token),
            allowed_chats: config.allowed_chats.clone(),
            poll_timeout: config.poll_timeout_seconds,
        })
    }

    fn is_allowed(&self, chat_id: i64) -> bool {
        self.allowed_chats.is_empty() || self.allowed_chats.contains(&chat_id)
    }

    async fn call<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T> {
        let resp = request.send().await?;
        let body: ApiResponse<T> = resp.json().await.context("Invalid Telegram response")?;
        if !body.ok {
            return Err(anyhow!(
                "Telegram API error: {}",
                body.description.unwrap_or_default()
            ));
        }
        body.result.context("Telegram response without result")
    }

    async fn get_updates(&self, offset: i64) -> Result<Vec<Update>> {
        let request = self
            .client
            .post(format!("{}/getUpdates", self.api_url))
            .json(&json!({
                "offset": offset,
                "timeout": self.poll_timeout,
                "allowed_updates": ["message"],
            }));
        self.call(request).await
    }

    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<()> {
        let request = self
            .client
            .post(format!("{}/sendMessage", self.api_url))
            .json(&json!({ "chat_id": chat_id, "text": text }));
        self.call::<serde_json::Value>(request).await?;
        Ok(())
    }

    pub async fn send_file(
        &self,
        chat_id: i64,
        path: &Path,
        kind: FileKind,
        caption: &str,
    ) -> Result<()> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "file".to_string());

        let part = multipart::Part::bytes(bytes).file_name(file_name);
        let form = multipart::Form::new()
            .text("chat_id", chat_id.to_string())
            .text("caption", caption.to_string())
            .part(kind.to_string(), part);

        let method = match kind {
            FileKind::Document => "sendDocument",
            FileKind::Audio => "sendAudio",
        };
        let request = self
            .client
            .post(format!("{}/{}", self.api_url, method))
            .multipart(form);
        self.call::<serde_json::Value>(request).await?;
        Ok(())
    }

    /// Polls forever, handing every command message to `controller`.
    pub async fn run(self: Arc<Self>, controller: Arc<BotController>) -> Result<()> {
        info!("Telegram bot polling...");
        let mut offset = 0;
        loop {
            let updates = match self.get_updates(offset).await {
                Ok(updates) => updates,
                Err(e) => {
                    error!("getUpdates failed: {:#}", e);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    continue;
                }
            };

            for update in updates {
                offset = offset.max(update.update_id + 1);
                let Some(message) = update.message else {
                    continue;
                };
                let Some(text) = message.text.filter(|t| t.starts_with('/')) else {
                    continue;
                };
                let chat_id = message.chat.id;
                if !self.is_allowed(chat_id) {
                    warn!("Ignoring command from chat {}", chat_id);
                    continue;
                }

                debug!("Chat {}: {}", chat_id, text);
                let replier = Arc::new(ChatReplier {
                    bot: self.clone(),
                    chat_id,
                });
                if let Err(e) = controller.handle(&text, replier).await {
                    error!("Command '{}' failed: {:#}", text, e);
                }
            }
        }
    }
}

struct ChatReplier {
    bot: Arc<TelegramBot>,
    chat_id: i64,
}

#[async_trait]
impl Replier for ChatReplier {
    async fn send_text(&self, text: &str) -> Result<()> {
        self.bot.send_message(self.chat_id, text).await
    }

    async fn send_file(&self, path: &Path, kind: FileKind, caption: &str) -> Result<()> {
        self.bot.send_file(self.chat_id, path, kind, caption).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_updates() {
        let json = r#"{
            "ok": true,
            "result": [
                {"update_id": 10, "message": {"message_id": 1, "chat": {"id": 42, "type": "private"}, "text": "/status"}},
                {"update_id": 11, "edited_message": {"message_id": 1, "chat": {"id": 42}}},
                {"update_id": 12, "message": {"message_id": 2, "chat": {"id": 42}, "photo": []}}
            ]
        }"#;

        let response: ApiResponse<Vec<Update>> = serde_json::from_str(json).unwrap();
        let updates = response.result.unwrap();

        assert_eq!(updates.len(), 3);
        assert_eq!(updates[0].message.as_ref().unwrap().text.as_deref(), Some("/status"));
        assert!(updates[1].message.is_none());
        assert!(updates[2].message.as_ref().unwrap().text.is_none());
    }

    #[test]
    fn test_parse_error_response() {
        let json = r#"{"ok": false, "error_code": 401, "description": "Unauthorized"}"#;
        let response: ApiResponse<Vec<Update>> = serde_json::from_str(json).unwrap();
        assert!(!response.ok);
        assert_eq!(response.description.as_deref(), Some("Unauthorized"));
    }

    #[test]
    fn test_allowed_chats() {
        let open = TelegramBot::new(&TelegramConfig {
            token: "t".to_string(),
            ..TelegramConfig::default()
        })
        .unwrap();
        assert!(open.is_allowed(1));

        let restricted = TelegramBot::new(&TelegramConfig {
            token: "t".to_string(),
            allowed_chats: vec![42],
            poll_timeout_seconds: 30,
        })
        .unwrap();
        assert!(restricted.is_allowed(42));
        assert!(!restricted.is_allowed(1));
    }

    #[test]
    fn test_empty_token_is_rejected() {
        assert!(TelegramBot::new(&TelegramConfig::default()).is_err());
    }
}
