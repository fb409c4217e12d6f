//! Telegram Bot API client used as the notification sink.

use common::{DeliveryStatus, Error};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const DEFAULT_BASE_URL: &str = "https://api.telegram.org";
/// Telegram rejects messages longer than 4096 characters.
const MAX_MESSAGE_CHARS: usize = 4096;

#[derive(Debug, Clone)]
pub struct TelegramClient {
    client: reqwest::Client,
    base_url: String,
    bot_token: String,
    chat_id: String,
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct SendMessageResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

impl TelegramClient {
    pub fn new(bot_token: &str, chat_id: &str) -> Result<Self, Error> {
        Self::with_base_url(DEFAULT_BASE_URL, bot_token, chat_id)
    }

    pub fn with_base_url(base_url: &str, bot_token: &str, chat_id: &str) -> Result<Self, Error> {
        if bot_token.trim().is_empty() || chat_id.trim().is_empty() {
            return Err(Error::Config(
                "telegram bot token and chat id are both required".into(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Http(format!("failed to build Telegram HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            bot_token: bot_token.trim().to_string(),
            chat_id: chat_id.trim().to_string(),
        })
    }

    /// Send a text message; failures are reported, never raised.
    pub async fn send(&self, text: &str) -> DeliveryStatus {
        let text = truncate(text);
        let url = format!("{}/bot{}/sendMessage", self.base_url, self.bot_token);
        let body = SendMessageRequest {
            chat_id: &self.chat_id,
            text: &text,
        };

        let resp = match self.client.post(&url).json(&body).send().await {
            Ok(r) => r,
            Err(e) => {
                // Never log the URL: it embeds the bot token.
                let e = e.without_url();
                warn!("Telegram send failed: {}", e);
                return DeliveryStatus::Failed(e.to_string());
            }
        };

        let status = resp.status().as_u16();
        match resp.json::<SendMessageResponse>().await {
            Ok(parsed) if parsed.ok => {
                debug!("Telegram message delivered ({} chars)", text.len());
                DeliveryStatus::Delivered
            }
            Ok(parsed) => {
                let reason = parsed
                    .description
                    .unwrap_or_else(|| format!("status {}", status));
                warn!("Telegram rejected message: {}", reason);
                DeliveryStatus::Failed(reason)
            }
            Err(e) => {
                warn!("Telegram response unreadable (status {}): {}", status, e.without_url());
                DeliveryStatus::Failed(format!("status {}", status))
            }
        }
    }
}

fn truncate(text: &str) -> String {
    if text.chars().count() <= MAX_MESSAGE_CHARS {
        text.to_string()
    } else {
        let mut cut: String = text.chars().take(MAX_MESSAGE_CHARS - 1).collect();
        cut.push('…');
        cut
    }
}
