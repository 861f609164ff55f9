// =============================================================================
// Notifier Port — one-way outbound alert channel
// =============================================================================

pub mod render;
pub mod telegram;

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

pub use telegram::TelegramNotifier;

/// Outbound notification transport. Exactly one send per winning tick.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, text: &str) -> Result<()>;
}

/// Fallback transport used when no bot credentials are configured: the
/// message lands in the logs and nowhere else.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, text: &str) -> Result<()> {
        info!(chars = text.len(), "notifier unconfigured — logging alert\n{text}");
        Ok(())
    }
}
