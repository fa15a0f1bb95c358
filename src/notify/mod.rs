pub mod format;
pub mod telegram;

pub use format::{AlertLevel, escape_html, format_outcome, format_performance, format_signal, format_system};
pub use telegram::TelegramNotifier;

use std::sync::Arc;

use async_trait::async_trait;
use color_eyre::eyre::Result;
use tracing::info;

use crate::config::Config;

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `text` and return how many recipients got it.
    async fn send(&self, text: &str) -> Result<usize>;
}

/// Fallback used when no Telegram credentials are configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, text: &str) -> Result<usize> {
        info!("Notification (Telegram disabled):\n{}", text);
        Ok(0)
    }
}

pub fn build_notifier(config: &Config) -> Result<Arc<dyn Notifier>> {
    if config.telegram_enabled() {
        let notifier = TelegramNotifier::from_config(config)?;
        info!("Telegram notifications enabled for {} chat(s)", notifier.chat_count());
        Ok(Arc::new(notifier))
    } else {
        info!("Telegram not configured, notifications go to the log");
        Ok(Arc::new(LogNotifier))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_notifier_reaches_nobody() {
        assert_eq!(LogNotifier.send("hello").await.unwrap(), 0);
    }

    #[test]
    fn test_build_notifier_without_token() {
        assert!(build_notifier(&Config::default()).is_ok());
    }
}
