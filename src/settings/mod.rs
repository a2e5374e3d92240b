//! Worker settings: schema, loading and validation.

mod loader;
mod schema;
mod validation;

pub use loader::SettingsLoader;
pub use schema::{BackoffSettings, CatalogSettings, ClientTlsSettings, KvSettings, ProviderSettings};
pub use validation::Validate;
