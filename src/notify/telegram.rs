// =============================================================================
// Telegram Notifier — Bot API sendMessage transport
// =============================================================================
//
// SECURITY: the bot token is part of the request URL; it is never logged.
// One attempt per send with an 8-second deadline — the cooldown window
// makes retrying inside an invocation pointless.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

use super::Notifier;

/// Per-call deadline for the Bot API.
const REQUEST_TIMEOUT_SECS: u64 = 8;

pub struct TelegramNotifier {
    token: String,
    chat_id: String,
    base_url: String,
    client: reqwest::Client,
}

impl TelegramNotifier {
    pub fn new(token: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self::with_base_url(token, chat_id, "https://api.telegram.org")
    }

    /// Point the notifier at a different host (test servers).
    pub fn with_base_url(
        token: impl Into<String>,
        chat_id: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("failed to build reqwest client for TelegramNotifier");

        Self {
            token: token.into(),
            chat_id: chat_id.into(),
            base_url: base_url.into(),
            client,
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, text: &str) -> Result<()> {
        let url = format!("{}/bot{}/sendMessage", self.base_url, self.token);

        let resp = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "chat_id": self.chat_id,
                "text": text,
                "disable_web_page_preview": true,
            }))
            .send()
            .await
            .context("telegram sendMessage request failed")?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse telegram response")?;

        if !status.is_success() || body["ok"].as_bool() != Some(true) {
            anyhow::bail!(
                "telegram sendMessage returned {}: {}",
                status,
                body["description"].as_str().unwrap_or("unknown error")
            );
        }

        debug!(chars = text.len(), "telegram alert delivered");
        Ok(())
    }
}

impl std::fmt::Debug for TelegramNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramNotifier")
            .field("token", &"<redacted>")
            .field("chat_id", &self.chat_id)
            .finish()
    }
}
