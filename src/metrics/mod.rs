//! OpenTelemetry metrics for provider workers.
//!
//! Tracks, per provider name:
//! - Rebuild attempts and duration
//! - Publications and suppressed publications
//! - Connection retries
//!
//! # Examples
//!
//! ```rust,no_run
//! use routesync::metrics::ProviderMetrics;
//! use opentelemetry::global;
//!
//! let metrics = ProviderMetrics::new(global::meter("routesync"), "consul_catalog");
//! let timer = metrics.start_rebuild();
//! metrics.record_rebuild(timer, true);
//! ```

mod provider_metrics;

pub use provider_metrics::ProviderMetrics;
