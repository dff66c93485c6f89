//! # Config Instances
//!
//! A [`Config`] pairs a [`Schema`] with the values one resolution pass
//! produced, plus their provenance when tracing is on.

use std::fmt;
use std::panic::Location;
use std::sync::Arc;

use errors::{ConfigError, Result};
use serde::de::DeserializeOwned;
use validator::Validate;

use crate::provenance::{Origin, TraceTree};
use crate::resolver::Resolver;
use crate::schema::Schema;
use crate::validator::{extract, extract_validated, validate_required};
use crate::value::{Map, Value};

/// Resolved configuration for one schema.
///
/// # M-CANONICAL-DOCS
///
/// ## Purpose
/// Holds the coerced values of every declared attribute and answers
/// "where did this value come from" through [`Config::to_source_trace`].
///
/// ## Usage
/// ```rust
/// use std::sync::Arc;
/// use config::{Config, Env, Resolver, Schema, Settings, Value};
///
/// let env = Env::with_source([("MY_APP_PORT".to_string(), "9090".to_string())]
///     .into_iter()
///     .collect::<std::collections::BTreeMap<_, _>>());
/// let resolver = Resolver::with_default_sources(Settings::default(), env).unwrap();
/// let schema = Schema::builder()
///     .config_name("my_app")
///     .attr_default("host", "localhost")
///     .attr_default("port", 8080)
///     .build()
///     .unwrap();
///
/// let config = Config::new(Arc::new(schema), Arc::new(resolver)).unwrap();
/// assert_eq!(config.get("port"), Some(&Value::Integer(9090)));
/// assert_eq!(config.get("host"), Some(&Value::from("localhost")));
/// ```
///
/// ## Loading
/// A load either fully succeeds or leaves the instance empty. After the
/// values are resolved, load callbacks run in declaration order, then
/// required attributes are checked.
///
/// ## Copies
/// `clone()` deep-copies values and trace; the schema and resolver are
/// shared.
#[derive(Clone)]
pub struct Config {
    schema: Arc<Schema>,
    resolver: Arc<Resolver>,
    values: Map,
    trace: Option<TraceTree>,
}

impl Config {
    /// Build and load.
    pub fn new(schema: Arc<Schema>, resolver: Arc<Resolver>) -> Result<Self> {
        let mut config = Self::unloaded(schema, resolver);
        config.load(None)?;
        Ok(config)
    }

    /// Build and load with `overrides` applied on top of every source.
    pub fn with_overrides(
        schema: Arc<Schema>,
        resolver: Arc<Resolver>,
        overrides: Map,
    ) -> Result<Self> {
        let mut config = Self::unloaded(schema, resolver);
        config.load(Some(overrides))?;
        Ok(config)
    }

    /// Build without loading; every attribute reads as absent.
    pub fn unloaded(schema: Arc<Schema>, resolver: Arc<Resolver>) -> Self {
        Self {
            schema,
            resolver,
            values: Map::new(),
            trace: None,
        }
    }

    /// Run a resolution pass and replace the current values.
    ///
    /// On failure the instance is cleared and the error returned.
    pub fn load(&mut self, overrides: Option<Map>) -> Result<()> {
        if let Err(e) = self.try_load(overrides) {
            self.clear();
            return Err(e);
        }
        Ok(())
    }

    fn try_load(&mut self, overrides: Option<Map>) -> Result<()> {
        let resolved = self.resolver.resolve(&self.schema, overrides)?;
        self.values = resolved.values;
        self.trace = resolved.trace;

        let schema = Arc::clone(&self.schema);
        for callback in schema.callbacks() {
            callback(self)?;
        }

        let current_environment = self.resolver.settings().current_environment.as_deref();
        validate_required(&schema, &self.values, current_environment)?;

        tracing::info!(
            config = schema.name(),
            attributes = self.values.len(),
            "Config loaded"
        );
        Ok(())
    }

    /// Drop cached env values, then load from scratch.
    pub fn reload(&mut self, overrides: Option<Map>) -> Result<()> {
        self.resolver.env().clear();
        self.clear();
        self.load(overrides)
    }

    /// Forget all values and the trace.
    pub fn clear(&mut self) {
        self.values.clear();
        self.trace = None;
    }

    pub fn config_name(&self) -> &str {
        self.schema.name()
    }

    pub fn env_prefix(&self) -> &str {
        self.schema.env_prefix()
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn resolver(&self) -> &Arc<Resolver> {
        &self.resolver
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Walk nested maps: `dig(&["db", "host"])`.
    pub fn dig<S: AsRef<str>>(&self, path: &[S]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        let value = self.values.get(first.as_ref())?;
        if rest.is_empty() {
            return Some(value);
        }
        value.dig(rest)
    }

    /// Assign an attribute directly. The assignment is traced to the
    /// caller's source location.
    #[track_caller]
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        if !self.schema.has_attribute(name) {
            return Err(ConfigError::UnknownAttribute {
                name: name.to_string(),
            });
        }

        let value = value.into();
        if let Some(trace) = self.trace.as_mut() {
            let origin = Origin::accessor(Location::caller());
            trace.remove(name);
            trace.record_value(&value, &[] as &[&str], name, &origin);
        }
        self.values.insert(name.to_string(), value);
        Ok(())
    }

    /// Truthiness of an attribute: `false` and `null` are false,
    /// everything else is true.
    pub fn flag(&self, name: &str) -> Result<bool> {
        if !self.schema.has_attribute(name) {
            return Err(ConfigError::UnknownAttribute {
                name: name.to_string(),
            });
        }
        Ok(match self.values.get(name) {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => *b,
            Some(_) => true,
        })
    }

    pub fn values(&self) -> &Map {
        &self.values
    }

    /// Deep copy of the values.
    pub fn to_h(&self) -> Map {
        self.values.clone()
    }

    /// Provenance of every value; `None` when tracing is disabled.
    pub fn to_source_trace(&self) -> Option<&TraceTree> {
        self.trace.as_ref()
    }

    /// Values as a typed struct.
    pub fn extract<T: DeserializeOwned>(&self) -> Result<T> {
        extract(&self.values)
    }

    /// Values as a typed struct that also passes its `validator` rules.
    pub fn extract_validated<T: DeserializeOwned + Validate>(&self) -> Result<T> {
        extract_validated(&self.values)
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("config_name", &self.schema.name())
            .field("env_prefix", &self.schema.env_prefix())
            .field("values", &self.values)
            .finish_non_exhaustive()
    }
}

/// One line per leaf, annotated with its origin when traced.
impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} (env prefix: {})",
            self.schema.name(),
            self.schema.env_prefix()
        )?;
        for (path, value) in crate::value::flatten(&self.values) {
            let segments: Vec<&str> = path.split('.').collect();
            let origin = self
                .trace
                .as_ref()
                .and_then(|trace| trace.dig(&segments))
                .and_then(|node| node.origin());
            match origin {
                Some(origin) => writeln!(f, "  {path} => {value} ({origin})")?,
                None => writeln!(f, "  {path} => {value}")?,
            }
        }
        Ok(())
    }
}
