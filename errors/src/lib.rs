//! # layerconf Errors
//!
//! Error handling for the layerconf resolution engine.
//!
//! The taxonomy follows the lifecycle of a config:
//! - [`DeclarationError`]: raised while building a schema (programmer error)
//! - [`CoercionError`]: raised by the type registry
//! - [`RegistryError`]: raised when the source registry is misused
//! - [`SourceError`]: raised by a loader plugin
//! - [`ValidationError`]: raised at load time when required data is missing
//!
//! [`ConfigError`] wraps all of them and is what public APIs return.

use std::path::PathBuf;

use thiserror::Error;

/// Boxed error type used by caller-supplied loaders and callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised while declaring a schema.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeclarationError {
    #[error("Config name is missing: specify it explicitly via `config_name`")]
    MissingConfigName,

    #[error("Invalid attribute name: {names}. Valid names must satisfy /^[a-z_][A-Za-z0-9_]*$/")]
    InvalidName { names: String },

    #[error("Can not use the following reserved names as config attributes: {names}")]
    ReservedName { names: String },

    #[error("Attribute is already declared: {name}")]
    DuplicateAttribute { name: String },

    #[error("Unknown config param: {names}")]
    UnknownRequired { names: String },

    #[error("Unknown config param in coercion rules: {names}")]
    UnknownCoercionKey { names: String },
}

/// Errors raised at load time when the resolved values are unusable.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Every offending attribute, in declaration order.
    #[error("The following config parameters are missing or empty: {}", names.join(", "))]
    MissingRequired { names: Vec<String> },

    #[error("{message}")]
    Custom { message: String },
}

impl ValidationError {
    /// Shorthand for callbacks rejecting a loaded config.
    pub fn custom(message: impl Into<String>) -> Self {
        Self::Custom {
            message: message.into(),
        }
    }
}

/// Errors raised by the type registry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoercionError {
    #[error("Unknown type: {type_id}")]
    UnknownType { type_id: String },

    #[error("Cannot cast {value} to {type_id}: {reason}")]
    InvalidValue {
        type_id: String,
        value: String,
        reason: String,
    },
}

/// Errors raised when mutating the source registry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Loader already exists: {id}")]
    DuplicateSource { id: String },

    #[error("Loader not found: {id}")]
    UnknownSource { id: String },

    #[error("Loaders registry is frozen; it cannot be modified after boot")]
    Frozen,
}

/// Errors raised by loader plugins.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {format} file {path}: {reason}")]
    Parse {
        path: PathBuf,
        format: String,
        reason: String,
    },

    #[error("Unsupported config file format: {extension}")]
    UnsupportedFormat { extension: String },

    #[error("Please specify `{var}` env variable")]
    MissingToken { var: String },

    #[error("Request to {endpoint} failed: {reason}")]
    Transport { endpoint: String, reason: String },

    #[error("Remote store error {status}: {messages}")]
    Remote { status: u16, messages: String },

    #[error(transparent)]
    Other(#[from] BoxError),
}

impl SourceError {
    /// Wrap an arbitrary loader failure.
    pub fn other<E>(err: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::Other(err.into())
    }
}

/// Top-level error returned by the layerconf public API.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Declaration(#[from] DeclarationError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Coercion(#[from] CoercionError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Source `{id}` failed: {source}")]
    Source {
        id: String,
        #[source]
        source: SourceError,
    },

    #[error("Unknown config attribute: {name}")]
    UnknownAttribute { name: String },

    #[error("Failed to extract typed config: {reason}")]
    Extract { reason: String },
}

impl ConfigError {
    /// Attach the id of the loader that produced `source`.
    pub fn loader(id: impl Into<String>, source: SourceError) -> Self {
        Self::Source {
            id: id.into(),
            source,
        }
    }

    /// Names of the missing required attributes, if this is that error.
    pub fn missing_attributes(&self) -> Option<&[String]> {
        match self {
            Self::Validation(ValidationError::MissingRequired { names }) => Some(names),
            _ => None,
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T, E = ConfigError> = std::result::Result<T, E>;
