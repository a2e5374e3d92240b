//! Provider workers: watch a source, rebuild, publish, retry.
//!
//! A worker moves through [`ProviderState`]s:
//!
//! ```text
//! Idle -> Connecting -> Watching -> (Rebuilding -> Watching)*
//!             ^             |
//!             +-- Backoff <-+  on any connection or fetch error
//! ```
//!
//! and ends in `Stopped` once its [`CancellationToken`] fires.

mod backoff;
mod catalog;
mod kv;
mod publisher;
mod sync;

pub use backoff::{BackoffPolicy, ExponentialBackoff};
pub use catalog::CatalogProvider;
pub use kv::KvProvider;
pub use publisher::Publisher;
pub use sync::{ConfigSync, ConfigSyncHandle};

use std::fmt;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::core::Configuration;
use crate::error::{ProviderError, Result};

#[cfg(feature = "metrics")]
use crate::metrics::ProviderMetrics;

/// Lifecycle state of a worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ProviderState {
    /// Not started.
    #[default]
    Idle,
    /// Opening the subscription.
    Connecting,
    /// Waiting for a change notification.
    Watching,
    /// Fetching, building and publishing.
    Rebuilding,
    /// Waiting before reconnecting.
    Backoff,
    /// Finished; nothing more will be published.
    Stopped,
}

impl fmt::Display for ProviderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Watching => "watching",
            Self::Rebuilding => "rebuilding",
            Self::Backoff => "backoff",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Everything a worker needs besides its own source.
pub struct WatchContext {
    publisher: Publisher,
    cancel: CancellationToken,
    backoff: ExponentialBackoff,
    state: watch::Sender<ProviderState>,
    #[cfg(feature = "metrics")]
    metrics: Option<ProviderMetrics>,
}

impl WatchContext {
    /// Create a context and the receiver observing its state.
    pub fn new(
        publisher: Publisher,
        cancel: CancellationToken,
        backoff: ExponentialBackoff,
    ) -> (Self, watch::Receiver<ProviderState>) {
        let (state, state_rx) = watch::channel(ProviderState::Idle);
        let ctx = Self {
            publisher,
            cancel,
            backoff,
            state,
            #[cfg(feature = "metrics")]
            metrics: None,
        };
        (ctx, state_rx)
    }

    /// Record measurements with `metrics`.
    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, metrics: ProviderMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// The stop signal.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Name attached to published messages.
    pub fn provider_name(&self) -> &str {
        self.publisher.provider_name()
    }

    /// Current state.
    pub fn state(&self) -> ProviderState {
        *self.state.borrow()
    }

    /// Move to `state`, notifying observers on change.
    pub fn set_state(&self, state: ProviderState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
        if changed {
            debug!(provider = %self.provider_name(), %state, "State changed");
        }
    }

    /// Mark the subscription as established.
    ///
    /// The backoff is only cleared by [`healthy`](Self::healthy).
    pub fn connected(&self) {
        self.set_state(ProviderState::Watching);
    }

    /// Clear the backoff after a successful rebuild.
    pub fn healthy(&mut self) {
        if self.backoff.attempts() > 0 {
            info!(provider = %self.provider_name(), "Recovered");
            self.backoff.reset();
        }
    }

    /// Number of consecutive failed attempts.
    pub fn retry_attempts(&self) -> u32 {
        self.backoff.attempts()
    }

    /// Publish through the context's [`Publisher`].
    ///
    /// # Errors
    ///
    /// See [`Publisher::publish`].
    pub async fn publish(&self, configuration: Configuration) -> Result<bool> {
        let sent = self.publisher.publish(configuration, &self.cancel).await?;
        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.metrics {
            metrics.record_publication(sent);
        }
        Ok(sent)
    }

    /// Enter [`ProviderState::Rebuilding`] and start timing.
    pub fn start_rebuild(&self) -> Instant {
        self.set_state(ProviderState::Rebuilding);
        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.metrics {
            return metrics.start_rebuild();
        }
        Instant::now()
    }

    /// Finish a rebuild started with [`start_rebuild`](Self::start_rebuild).
    pub fn finish_rebuild(&self, start: Instant, success: bool) {
        debug!(
            provider = %self.provider_name(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            success,
            "Rebuild finished"
        );
        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.metrics {
            metrics.record_rebuild(start, success);
        }
        if success {
            self.set_state(ProviderState::Watching);
        }
    }

    fn record_retry(&self) {
        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.metrics {
            metrics.record_retry();
        }
    }
}

/// A configuration source watched by one worker.
///
/// Implementations own their client. `watch` connects, publishes the
/// initial configuration, then republishes on every meaningful change. It
/// returns `Ok(())` when the source is done (cancellation or a one-shot
/// load) and an error on any failure; [`run_provider`] reconnects after a
/// backoff.
#[async_trait]
pub trait Provider: Send {
    /// Name attached to published messages.
    fn name(&self) -> &str;

    /// Connect and watch until done or failed.
    ///
    /// # Errors
    ///
    /// Returns the connection, fetch or publication error that ended the watch.
    async fn watch(&mut self, ctx: &mut WatchContext) -> Result<()>;
}

/// Run `provider` until it finishes or `ctx` is cancelled, retrying every
/// recoverable error with exponential backoff.
///
/// # Errors
///
/// Returns [`ProviderError::ChannelClosed`] if the consumer went away.
pub async fn run_provider<P>(provider: &mut P, ctx: &mut WatchContext) -> Result<()>
where
    P: Provider + ?Sized,
{
    loop {
        if ctx.cancel.is_cancelled() {
            break;
        }

        ctx.set_state(ProviderState::Connecting);
        let err = match provider.watch(ctx).await {
            Ok(()) => break,
            Err(ProviderError::Stopped) => break,
            Err(err) if err.is_terminal() => {
                error!(provider = %provider.name(), error = %err, "Provider stopped");
                ctx.set_state(ProviderState::Stopped);
                return Err(err);
            }
            Err(err) => err,
        };
        if ctx.cancel.is_cancelled() {
            break;
        }

        let delay = ctx.backoff.next_delay();
        error!(
            provider = %provider.name(),
            error = %err,
            delay_ms = delay.as_millis() as u64,
            attempt = ctx.backoff.attempts(),
            "Provider connection error, retrying"
        );
        ctx.record_retry();
        ctx.set_state(ProviderState::Backoff);

        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    ctx.set_state(ProviderState::Stopped);
    info!(provider = %provider.name(), "Provider stopped");
    Ok(())
}
