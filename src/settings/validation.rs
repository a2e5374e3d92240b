//! Settings validation.

use tracing::warn;

use super::{BackoffSettings, CatalogSettings, KvSettings, ProviderSettings};
use crate::core::{RuleTemplate, parse_constraints};
use crate::error::ValidationError;

/// Trait for settings validation.
///
/// # Examples
///
/// ```rust
/// use routesync::settings::{ProviderSettings, Validate};
///
/// let mut settings = ProviderSettings::default();
/// assert!(settings.validate().is_ok());
///
/// settings.channel_capacity = 0;
/// assert!(settings.validate().is_err());
/// ```
pub trait Validate {
    /// Validate the settings.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` describing every problem found.
    fn validate(&self) -> Result<(), ValidationError>;
}

impl Validate for ProviderSettings {
    fn validate(&self) -> Result<(), ValidationError> {
        let mut errors = Vec::new();
        if self.channel_capacity == 0 {
            errors.push(ValidationError::invalid_field(
                "channel_capacity",
                "must be greater than 0",
            ));
        }
        if let Err(err) = self.backoff.validate() {
            errors.push(err);
        }
        if let Some(catalog) = &self.catalog {
            if let Err(err) = catalog.validate() {
                errors.push(err);
            }
        }
        if let Some(kv) = &self.kv {
            if let Err(err) = kv.validate() {
                errors.push(err);
            }
        }
        ValidationError::from_list(errors)
    }
}

impl Validate for BackoffSettings {
    fn validate(&self) -> Result<(), ValidationError> {
        let mut errors = Vec::new();
        if self.max_interval_ms < self.initial_interval_ms {
            errors.push(ValidationError::invalid_field(
                "backoff.max_interval_ms",
                "must not be smaller than backoff.initial_interval_ms",
            ));
        }
        if !(self.multiplier >= 1.0) {
            errors.push(ValidationError::invalid_field(
                "backoff.multiplier",
                "must be at least 1",
            ));
        }
        if !(0.0..1.0).contains(&self.randomization_factor) {
            errors.push(ValidationError::invalid_field(
                "backoff.randomization_factor",
                "must be in [0, 1)",
            ));
        }
        ValidationError::from_list(errors)
    }
}

impl Validate for CatalogSettings {
    fn validate(&self) -> Result<(), ValidationError> {
        let mut errors = Vec::new();
        if let Err(err) = parse_constraints(&self.constraints) {
            errors.push(err);
        }
        if let Err(err) = RuleTemplate::parse(&self.frontend_rule) {
            errors.push(ValidationError::invalid_field(
                "catalog.frontend_rule",
                err.to_string(),
            ));
        }
        if self.domain.is_empty() && self.frontend_rule.contains(".Domain") {
            warn!("catalog.domain is empty but the frontend rule uses .Domain");
        }
        if self.prefix.is_empty() {
            errors.push(ValidationError::invalid_field("catalog.prefix", "must not be empty"));
        }
        ValidationError::from_list(errors)
    }
}

impl Validate for KvSettings {
    fn validate(&self) -> Result<(), ValidationError> {
        let mut errors = Vec::new();
        if self.endpoints.iter().all(|endpoint| endpoint.trim().is_empty()) {
            errors.push(ValidationError::invalid_field(
                "kv.endpoints",
                "at least one endpoint is required",
            ));
        }
        if let Err(err) = parse_constraints(&self.constraints) {
            errors.push(err);
        }
        ValidationError::from_list(errors)
    }
}
