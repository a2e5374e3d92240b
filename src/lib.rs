//! # routesync
//!
//! Watches service catalogs and key/value stores and publishes reverse-proxy
//! routing configuration snapshots.
//!
//! ## Overview
//!
//! Each configured source runs as one worker that:
//! - Long-polls or watches the source for changes
//! - Rebuilds a complete [`Configuration`](core::Configuration) of backends,
//!   servers and frontends from tags or key paths
//! - Sends it downstream only when it differs from the last one sent
//! - Reconnects with exponential backoff after any error
//!
//! Any number of workers share one bounded output channel; every message
//! carries the name of the worker that produced it.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use routesync::prelude::*;
//!
//! # async fn example() -> routesync::error::Result<()> {
//! // ROUTESYNC_CATALOG__DOMAIN=example.com overrides the file
//! let settings = SettingsLoader::new()
//!     .with_file("routesync.yaml")
//!     .with_env_overrides("ROUTESYNC")
//!     .load()?;
//!
//! let (handle, mut updates) = ConfigSync::from_settings(&settings)?.start();
//! while let Some(message) = updates.recv().await {
//!     println!("{}: {} frontends", message.provider_name, message.configuration.frontends.len());
//! }
//! handle.join().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Tag conventions
//!
//! Catalog services are configured through `traefik.*` tags, e.g.
//! `traefik.backend.loadbalancer=drr`, `traefik.frontend.rule=Host:api.example.com`
//! or `traefik.backend.weight=10`. The prefix is configurable.
//!
//! ## Feature Flags
//!
//! - `consul` (default): Consul HTTP catalog client
//! - `metrics`: OpenTelemetry counters per worker

#![warn(missing_docs, rust_2024_compatibility)]
#![deny(unsafe_code)]

pub mod core;
pub mod error;
pub mod provider;
pub mod settings;
pub mod sources;

#[cfg(feature = "metrics")]
pub mod metrics;

/// Convenient re-exports for common usage patterns.
pub mod prelude {
    pub use crate::core::{ConfigMessage, Configuration};
    pub use crate::error::{ProviderError, Result, StoreError, ValidationError};
    pub use crate::provider::{CatalogProvider, ConfigSync, ConfigSyncHandle, KvProvider, ProviderState};
    pub use crate::settings::{ProviderSettings, SettingsLoader, Validate};
    pub use crate::sources::{CatalogClient, KvStore, StoreBackend};
}
