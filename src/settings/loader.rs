//! Loads [`ProviderSettings`] from files and environment overrides.

use std::path::PathBuf;

use config::{Config, Environment, File};
use tracing::debug;

use super::{ProviderSettings, Validate};
use crate::error::{ProviderError, Result};

/// Keys whose environment values are comma separated lists.
const LIST_KEYS: [&str; 3] = ["kv.endpoints", "kv.constraints", "catalog.constraints"];

/// Builds [`ProviderSettings`] from settings files and the environment.
///
/// Files are merged in the order they were added; environment overrides
/// named `<PREFIX>_<SECTION>__<KEY>` are applied last.
///
/// # Examples
///
/// ```rust,no_run
/// use routesync::settings::SettingsLoader;
///
/// # fn example() -> routesync::error::Result<()> {
/// // ROUTESYNC_CATALOG__DOMAIN=example.com overrides catalog.domain
/// let settings = SettingsLoader::new()
///     .with_file("routesync.yaml")
///     .with_env_overrides("ROUTESYNC")
///     .load()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct SettingsLoader {
    files: Vec<(PathBuf, bool)>,
    env_prefix: Option<String>,
    env_vars: Option<config::Map<String, String>>,
}

impl SettingsLoader {
    /// Create a loader with no sources; loading it yields the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a settings file; its format follows its extension.
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.files.push((path.into(), true));
        self
    }

    /// Merge a settings file if it exists.
    pub fn with_optional_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.files.push((path.into(), false));
        self
    }

    /// Apply environment overrides with the given prefix.
    pub fn with_env_overrides(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = Some(prefix.into());
        self
    }

    /// Read overrides from `vars` instead of the process environment.
    pub fn with_env_vars<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env_vars = Some(
            vars.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        );
        self
    }

    /// Load and validate the settings.
    ///
    /// # Errors
    ///
    /// - [`ProviderError::Settings`] if a source cannot be read or parsed
    /// - [`ProviderError::Validation`] if the merged settings are invalid
    pub fn load(self) -> Result<ProviderSettings> {
        let mut builder = Config::builder();

        for (path, required) in &self.files {
            debug!(path = %path.display(), required, "Adding settings file");
            builder = builder.add_source(File::from(path.as_path()).required(*required));
        }

        if let Some(prefix) = &self.env_prefix {
            let mut environment = Environment::with_prefix(prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(",");
            for key in LIST_KEYS {
                environment = environment.with_list_parse_key(key);
            }
            if let Some(vars) = self.env_vars.clone() {
                environment = environment.source(Some(vars));
            }
            builder = builder.add_source(environment);
        }

        let settings: ProviderSettings = builder
            .build()
            .map_err(|e| ProviderError::Settings(format!("Failed to build settings: {}", e)))?
            .try_deserialize()
            .map_err(|e| ProviderError::Settings(format!("Failed to deserialize settings: {}", e)))?;

        settings.validate()?;
        Ok(settings)
    }
}
