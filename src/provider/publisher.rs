//! Producer side of the output channel.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::core::{ConfigMessage, Configuration};
use crate::error::{ProviderError, Result};

/// Sends one provider's configurations downstream, skipping repeats.
///
/// The last configuration sent is kept in an [`ArcSwapOption`] so that it can
/// be read lock-free from other tasks.
pub struct Publisher {
    provider_name: String,
    tx: mpsc::Sender<ConfigMessage>,
    latest: Arc<ArcSwapOption<Configuration>>,
}

impl Publisher {
    /// Create a publisher for `provider_name` writing to `tx`.
    pub fn new(provider_name: impl Into<String>, tx: mpsc::Sender<ConfigMessage>) -> Self {
        Self {
            provider_name: provider_name.into(),
            tx,
            latest: Arc::new(ArcSwapOption::empty()),
        }
    }

    /// Name attached to every message.
    pub fn provider_name(&self) -> &str {
        &self.provider_name
    }

    /// Shared view of the last configuration sent.
    pub fn latest(&self) -> Arc<ArcSwapOption<Configuration>> {
        Arc::clone(&self.latest)
    }

    /// Send `configuration` unless it equals the last one sent.
    ///
    /// Waits for room in the channel. Returns whether a message was sent.
    ///
    /// # Errors
    ///
    /// - [`ProviderError::Stopped`] if `cancel` fires while waiting
    /// - [`ProviderError::ChannelClosed`] if the consumer is gone
    pub async fn publish(
        &self,
        configuration: Configuration,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        if self.latest.load().as_deref() == Some(&configuration) {
            debug!(provider = %self.provider_name, "Configuration unchanged, not publishing");
            return Ok(false);
        }

        let configuration = Arc::new(configuration);
        let message = ConfigMessage {
            provider_name: self.provider_name.clone(),
            configuration: Configuration::clone(&configuration),
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ProviderError::Stopped),
            sent = self.tx.send(message) => sent.map_err(|_| ProviderError::ChannelClosed)?,
        }

        info!(
            provider = %self.provider_name,
            backends = configuration.backends.len(),
            frontends = configuration.frontends.len(),
            "Published configuration"
        );
        self.latest.store(Some(configuration));
        Ok(true)
    }
}
