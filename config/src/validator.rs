//! # Configuration Validation
//!
//! Required-attribute checks run on every load, plus typed validation of
//! extracted structs through the `validator` crate.

use errors::{ConfigError, ValidationError};
use serde::de::DeserializeOwned;
use validator::Validate;

use crate::schema::Schema;
use crate::value::{Map, Value};

/// Check that every required attribute enforced in `current_environment`
/// has a non-blank value.
///
/// # M-CANONICAL-DOCS
///
/// ## Purpose
/// Collects all offending names, in declaration order, so a single error
/// reports everything that is missing.
///
/// ## Blank Values
/// - `Null`, or a key that is absent
/// - an empty string
///
/// `false`, `0` and empty collections count as present.
pub fn validate_required(
    schema: &Schema,
    values: &Map,
    current_environment: Option<&str>,
) -> Result<(), ValidationError> {
    let mut missing: Vec<String> = Vec::new();
    for required in schema.required() {
        if !required.guard.matches(current_environment) {
            continue;
        }
        let blank = values.get(&required.name).is_none_or(Value::is_blank);
        if blank && !missing.contains(&required.name) {
            missing.push(required.name.clone());
        }
    }

    if missing.is_empty() {
        return Ok(());
    }
    tracing::debug!(config = schema.name(), missing = ?missing, "Required config parameters missing");
    Err(ValidationError::MissingRequired { names: missing })
}

/// Deserialize resolved values into a typed struct.
pub fn extract<T: DeserializeOwned>(values: &Map) -> Result<T, ConfigError> {
    serde_json::from_value(Value::Map(values.clone()).to_json()).map_err(|e| {
        ConfigError::Extract {
            reason: e.to_string(),
        }
    })
}

/// [`extract`] followed by the struct's own `validator` rules.
pub fn extract_validated<T>(values: &Map) -> Result<T, ConfigError>
where
    T: DeserializeOwned + Validate,
{
    let typed: T = extract(values)?;
    validate(&typed)?;
    Ok(typed)
}

/// Run `validator` rules, flattening failures into one message.
pub fn validate<T: Validate>(typed: &T) -> Result<(), ValidationError> {
    typed
        .validate()
        .map_err(|errors| ValidationError::custom(errors.to_string()))
}
