//! Error types for routesync.

use std::fmt;

/// Result type alias for routesync operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Errors raised by a configuration provider worker.
///
/// Only connection-level and fetch errors unwind past a single build cycle.
/// Attribute and template problems are absorbed where they occur.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The external source could not be reached, or a watch subscription failed.
    #[error("Connection error: {0}")]
    Connection(#[source] StoreError),

    /// Fetching the node list of one service failed mid-batch.
    #[error("Failed to fetch nodes of service '{service}': {source}")]
    Fetch {
        /// Name of the service whose fetch failed
        service: String,
        /// Underlying client error
        #[source]
        source: StoreError,
    },

    /// The watch notification channel closed unexpectedly.
    #[error("Watch channel closed")]
    WatchClosed,

    /// The downstream consumer dropped its receiver.
    #[error("Output channel closed")]
    ChannelClosed,

    /// The worker received the stop signal while blocked.
    #[error("Provider stopped")]
    Stopped,

    /// Provider settings could not be loaded.
    #[error("Failed to load settings: {0}")]
    Settings(String),

    /// Provider settings failed validation.
    #[error("Settings validation failed: {0}")]
    Validation(String),
}

impl ProviderError {
    /// Whether the retry wrapper should give up instead of backing off.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::ChannelClosed | Self::Stopped)
    }
}

/// Errors reported by KV store and catalog clients.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The store did not answer.
    #[error("store unreachable: {0}")]
    Unreachable(String),

    /// The store answered with an error.
    #[error("store error: {0}")]
    Backend(String),
}

/// Errors raised while parsing or evaluating a frontend rule template.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    /// The template text is malformed.
    #[error("malformed template at byte {offset}: {reason}")]
    Parse {
        /// Byte offset of the offending action
        offset: usize,
        /// What went wrong
        reason: String,
    },

    /// A field reference other than `.ServiceName`, `.Domain` or `.Attributes`.
    #[error("unknown field '.{0}'")]
    UnknownField(String),

    /// A call to a function that is not registered.
    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    /// A function was called with the wrong number of arguments.
    #[error("function '{function}' takes {expected} arguments, got {actual}")]
    Arity {
        /// Function name
        function: &'static str,
        /// Declared argument count
        expected: usize,
        /// Supplied argument count
        actual: usize,
    },

    /// An argument or action result had the wrong type.
    #[error("type mismatch: {0}")]
    Type(String),
}

/// Validation error for provider settings.
#[derive(Debug)]
pub enum ValidationError {
    /// Custom validation error with a message.
    Custom(String),

    /// A specific field has an invalid value.
    InvalidField {
        /// The field name/path
        field: String,
        /// The reason why it's invalid
        reason: String,
    },

    /// Multiple validation errors occurred.
    Multiple(Vec<ValidationError>),
}

impl ValidationError {
    /// Create a custom validation error.
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }

    /// Create an invalid field error.
    pub fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Collapse a list of errors, returning `Ok` when it is empty.
    pub fn from_list(mut errors: Vec<ValidationError>) -> std::result::Result<(), Self> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Self::Multiple(errors)),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Custom(msg) => write!(f, "{}", msg),
            Self::InvalidField { field, reason } => {
                write!(f, "Field '{}' is invalid: {}", field, reason)
            }
            Self::Multiple(errors) => {
                writeln!(f, "Multiple validation errors:")?;
                for (i, err) in errors.iter().enumerate() {
                    writeln!(f, "  {}. {}", i + 1, err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ValidationError {}

impl From<ValidationError> for ProviderError {
    fn from(err: ValidationError) -> Self {
        ProviderError::Validation(err.to_string())
    }
}
