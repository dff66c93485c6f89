//! # Schema Declaration
//!
//! A [`Schema`] names a config, lists its attributes with their defaults,
//! and carries the required list, coercion rules and load callbacks.
//! Schemas are built once through [`SchemaBuilder`] and immutable
//! afterwards; [`Schema::extend`] derives a new builder from an existing
//! schema.

use std::fmt;
use std::sync::{Arc, LazyLock};

use errors::{DeclarationError, Result};
use regex::Regex;

use crate::config::Config;
use crate::type_casting::{CoercionRule, Rules};
use crate::value::{Map, Value};

static PARAM_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z_][A-Za-z0-9_]*$").expect("valid param name regex"));

/// Names that cannot be attributes because [`Config`] uses them.
pub const RESERVED_NAMES: &[&str] = &[
    "clear",
    "config_name",
    "dig",
    "dup",
    "env_prefix",
    "extract",
    "extract_validated",
    "flag",
    "get",
    "load",
    "reload",
    "resolver",
    "schema",
    "set",
    "to_h",
    "to_source_trace",
    "values",
];

/// Environments in which a required attribute is enforced.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum EnvGuard {
    #[default]
    Always,
    /// Only in the listed environments.
    Only(Vec<String>),
    /// Everywhere except the listed environments.
    Except(Vec<String>),
}

impl EnvGuard {
    pub fn only<I, S>(envs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Only(envs.into_iter().map(Into::into).collect())
    }

    pub fn except<I, S>(envs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Except(envs.into_iter().map(Into::into).collect())
    }

    /// Whether the guard applies in `current`. Without a current
    /// environment only `Always` and `Except` apply.
    pub fn matches(&self, current: Option<&str>) -> bool {
        match self {
            Self::Always => true,
            Self::Only(envs) => current.is_some_and(|env| envs.iter().any(|e| e == env)),
            Self::Except(envs) => !current.is_some_and(|env| envs.iter().any(|e| e == env)),
        }
    }
}

/// A required attribute and the environments it is enforced in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Required {
    pub name: String,
    pub guard: EnvGuard,
}

/// Hook run after every load, in declaration order.
pub type LoadCallback = Arc<dyn Fn(&mut Config) -> Result<()> + Send + Sync>;

/// Immutable description of a config.
#[derive(Clone)]
pub struct Schema {
    name: String,
    env_prefix: String,
    attributes: Vec<String>,
    defaults: Map,
    required: Vec<Required>,
    coercion: Rules,
    auto_cast: bool,
    callbacks: Vec<LoadCallback>,
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("name", &self.name)
            .field("env_prefix", &self.env_prefix)
            .field("attributes", &self.attributes)
            .field("defaults", &self.defaults)
            .field("required", &self.required)
            .field("coercion", &self.coercion)
            .field("auto_cast", &self.auto_cast)
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

impl Schema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    /// Builder pre-filled with everything declared here. The name and env
    /// prefix carry over unless the builder sets its own.
    pub fn extend(&self) -> SchemaBuilder {
        SchemaBuilder {
            name: Some(self.name.clone()),
            env_prefix: Some(self.env_prefix.clone()),
            attributes: self.attributes.clone(),
            defaults: self.defaults.clone(),
            required: self.required.clone(),
            coercion: self.coercion.clone(),
            auto_cast_disabled: !self.auto_cast,
            callbacks: self.callbacks.clone(),
            duplicate: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn env_prefix(&self) -> &str {
        &self.env_prefix
    }

    pub fn attributes(&self) -> &[String] {
        &self.attributes
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.iter().any(|attr| attr == name)
    }

    pub fn defaults(&self) -> &Map {
        &self.defaults
    }

    pub fn required(&self) -> &[Required] {
        &self.required
    }

    pub fn coercion_rules(&self) -> &Rules {
        &self.coercion
    }

    pub fn auto_cast(&self) -> bool {
        self.auto_cast
    }

    pub(crate) fn callbacks(&self) -> &[LoadCallback] {
        &self.callbacks
    }
}

/// Declarative builder for [`Schema`].
///
/// # M-CANONICAL-DOCS
///
/// ## Usage
/// ```rust
/// use config::{CoercionRule, EnvGuard, Schema};
///
/// let schema = Schema::builder()
///     .config_name("my_app")
///     .attr_default("host", "localhost")
///     .attr_default("port", 8080)
///     .attrs(["user", "password"])
///     .required(["host"])
///     .required_in(["password"], EnvGuard::only(["production"]))
///     .coerce_types([("port", CoercionRule::of("integer"))])
///     .build()
///     .unwrap();
///
/// assert_eq!(schema.env_prefix(), "MY_APP");
/// ```
///
/// ## Validation
/// `build` fails with a [`DeclarationError`] for:
/// - a missing config name
/// - attribute names not matching `^[a-z_][A-Za-z0-9_]*$`
/// - attribute names listed in [`RESERVED_NAMES`]
/// - attributes declared twice
/// - required names or coercion keys that are not attributes
#[derive(Default)]
pub struct SchemaBuilder {
    name: Option<String>,
    env_prefix: Option<String>,
    attributes: Vec<String>,
    defaults: Map,
    required: Vec<Required>,
    coercion: Rules,
    auto_cast_disabled: bool,
    callbacks: Vec<LoadCallback>,
    duplicate: Option<String>,
}

impl SchemaBuilder {
    pub fn config_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Env prefix; upper-cased. Defaults to the upper-cased config name.
    pub fn env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = Some(prefix.into().to_uppercase());
        self
    }

    /// Declare an attribute with no default.
    pub fn attr(mut self, name: impl Into<String>) -> Self {
        self.declare(name.into());
        self
    }

    pub fn attrs<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in names {
            self.declare(name.into());
        }
        self
    }

    /// Declare an attribute with a default value.
    pub fn attr_default(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let name = name.into();
        self.defaults.insert(name.clone(), value.into());
        self.declare(name);
        self
    }

    /// Attributes that must be present and non-empty after every load.
    pub fn required<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_in(names, EnvGuard::Always)
    }

    pub fn required_in<I, S>(mut self, names: I, guard: EnvGuard) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required.extend(names.into_iter().map(|name| Required {
            name: name.into(),
            guard: guard.clone(),
        }));
        self
    }

    pub fn coerce_types<I, K>(mut self, rules: I) -> Self
    where
        I: IntoIterator<Item = (K, CoercionRule)>,
        K: Into<String>,
    {
        self.coercion
            .extend(rules.into_iter().map(|(key, rule)| (key.into(), rule)));
        self
    }

    /// Keep raw strings: no auto-cast for undeclared types or env values.
    pub fn disable_auto_cast(mut self) -> Self {
        self.auto_cast_disabled = true;
        self
    }

    pub fn on_load<F>(mut self, callback: F) -> Self
    where
        F: Fn(&mut Config) -> Result<()> + Send + Sync + 'static,
    {
        self.callbacks.push(Arc::new(callback));
        self
    }

    pub fn build(self) -> std::result::Result<Schema, DeclarationError> {
        let name = self.name.ok_or(DeclarationError::MissingConfigName)?;
        if name.is_empty() {
            return Err(DeclarationError::MissingConfigName);
        }

        let invalid: Vec<&str> = self
            .attributes
            .iter()
            .filter(|attr| !PARAM_NAME.is_match(attr.as_str()))
            .map(String::as_str)
            .collect();
        if !invalid.is_empty() {
            return Err(DeclarationError::InvalidName {
                names: invalid.join(", "),
            });
        }

        let mut reserved: Vec<&str> = self
            .attributes
            .iter()
            .filter(|attr| RESERVED_NAMES.contains(&attr.as_str()))
            .map(String::as_str)
            .collect();
        if !reserved.is_empty() {
            reserved.sort_unstable();
            return Err(DeclarationError::ReservedName {
                names: reserved.join(", "),
            });
        }

        if let Some(name) = self.duplicate {
            return Err(DeclarationError::DuplicateAttribute { name });
        }

        let has = |name: &str| self.attributes.iter().any(|attr| attr == name);

        let unknown_required: Vec<&str> = self
            .required
            .iter()
            .filter(|req| !has(&req.name))
            .map(|req| req.name.as_str())
            .collect();
        if !unknown_required.is_empty() {
            return Err(DeclarationError::UnknownRequired {
                names: unknown_required.join(", "),
            });
        }

        let unknown_rules: Vec<&str> = self
            .coercion
            .keys()
            .filter(|key| !has(key.as_str()))
            .map(String::as_str)
            .collect();
        if !unknown_rules.is_empty() {
            return Err(DeclarationError::UnknownCoercionKey {
                names: unknown_rules.join(", "),
            });
        }

        let env_prefix = self.env_prefix.unwrap_or_else(|| name.to_uppercase());
        Ok(Schema {
            name,
            env_prefix,
            attributes: self.attributes,
            defaults: self.defaults,
            required: self.required,
            coercion: self.coercion,
            auto_cast: !self.auto_cast_disabled,
            callbacks: self.callbacks,
        })
    }

    fn declare(&mut self, name: String) {
        if self.attributes.contains(&name) {
            self.duplicate.get_or_insert(name);
            return;
        }
        self.attributes.push(name);
    }
}
