use std::time::Duration;

use async_trait::async_trait;
use color_eyre::Section;
use color_eyre::eyre::{Result, WrapErr, eyre};
use futures_util::future::join_all;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, warn};

use super::Notifier;
use crate::config::Config;

const API_URL: &str = "https://api.telegram.org";

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
    disable_web_page_preview: bool,
}

/// Sends HTML messages to every configured chat through the Bot API.
#[derive(Debug, Clone)]
pub struct TelegramNotifier {
    http: Client,
    api_url: String,
    bot_token: String,
    chat_ids: Vec<String>,
    max_retries: usize,
    retry_delay: Duration,
}

impl TelegramNotifier {
    pub fn new(bot_token: String, chat_ids: Vec<String>, timeout: Duration, max_retries: usize) -> Result<Self> {
        if bot_token.is_empty() || chat_ids.is_empty() {
            return Err(eyre!("Telegram needs a bot token and at least one chat id"))
                .with_suggestion(|| "Set TELEGRAM_BOT_TOKEN and TELEGRAM_CHAT_IDS");
        }
        let http = Client::builder()
            .timeout(timeout)
            .user_agent("signalbot/0.1")
            .build()
            .wrap_err("Failed to build Telegram HTTP client")?;
        Ok(Self {
            http,
            api_url: API_URL.to_string(),
            bot_token,
            chat_ids,
            max_retries: max_retries.max(1),
            retry_delay: Duration::from_secs(2),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            config.telegram_bot_token.clone(),
            config.telegram_chat_ids(),
            Duration::from_secs(config.telegram_timeout_secs),
            config.telegram_max_retries,
        )
    }

    /// Point at another Bot API host (tests, proxies).
    pub fn with_api_url(mut self, api_url: &str) -> Self {
        self.api_url = api_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn chat_count(&self) -> usize {
        self.chat_ids.len()
    }

    async fn send_to_chat(&self, chat_id: &str, text: &str) -> bool {
        let url = format!("{}/bot{}/sendMessage", self.api_url, self.bot_token);
        let body = SendMessageRequest {
            chat_id,
            text,
            parse_mode: "HTML",
            disable_web_page_preview: true,
        };

        for attempt in 1..=self.max_retries {
            match self.http.post(&url).json(&body).send().await {
                Ok(resp) if resp.status().is_success() => {
                    debug!("Message sent to {}", chat_id);
                    return true;
                }
                Ok(resp) => {
                    let status = resp.status();
                    let detail = resp.text().await.unwrap_or_default();
                    warn!("Telegram rejected message for {} ({}): {}", chat_id, status, detail);
                }
                Err(e) => warn!("Telegram request for {} failed (attempt {}): {}", chat_id, attempt, e),
            }
            if attempt < self.max_retries {
                tokio::time::sleep(self.retry_delay).await;
            }
        }
        false
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, text: &str) -> Result<usize> {
        let results = join_all(self.chat_ids.iter().map(|chat| self.send_to_chat(chat, text))).await;
        let delivered = results.into_iter().filter(|ok| *ok).count();
        debug!("Telegram delivered to {}/{} chats", delivered, self.chat_ids.len());
        if delivered == 0 {
            return Err(eyre!("Telegram message reached none of {} chats", self.chat_ids.len()));
        }
        Ok(delivered)
    }
}
