//! # Layered Configuration
//!
//! Resolves a named configuration from an ordered pipeline of sources and
//! records, for every value, which source produced it.
//!
//! This crate provides:
//! - Declarative schemas with defaults, required attributes and coercion rules
//! - A pluggable, ordered source registry
//! - Built-in sources: config files (YAML/JSON/TOML), environment
//!   variables, ejson-encrypted secrets and Doppler
//! - Deep merge precedence (defaults < sources in order < load overrides)
//! - Per-value provenance traces
//! - Typed extraction with `validator` rules
//!
//! # Best Practices
//!
//! - Build the [`Resolver`] once at startup, then freeze its registry
//! - Share schemas and the resolver behind `Arc`
//! - Use [`Config::to_source_trace`] to debug unexpected values

pub mod auto_cast;
pub mod config;
pub mod doppler;
pub mod ejson;
pub mod env;
pub mod file_loader;
pub mod loader;
pub mod precedence;
pub mod provenance;
pub mod registry;
pub mod resolver;
pub mod schema;
pub mod settings;
pub mod type_casting;
pub mod validator;
pub mod value;

pub use auto_cast::{auto_cast, auto_cast_value};
pub use config::Config;
pub use doppler::{DOPPLER_SOURCE, DopplerLoader};
pub use ejson::{EJSON_SOURCE, EjsonLoader, EjsonParser};
pub use env::{Env, EnvSource, ProcessEnv};
pub use file_loader::{
    FILE_SOURCE, FileLoader, load_from_file, load_from_json, load_from_toml, load_from_yaml,
};
pub use errors::{
    ConfigError, CoercionError, DeclarationError, RegistryError, Result, SourceError,
    ValidationError,
};
pub use loader::{ENV_SOURCE, EnvLoader};
pub use precedence::{deep_merge, merge_with_logging};
pub use provenance::{Locator, Origin, TraceNode, TraceTree, Tracer};
pub use registry::{LoadContext, Loaded, Loader, SourceRegistry};
pub use resolver::{Resolved, Resolver};
pub use schema::{EnvGuard, Required, Schema, SchemaBuilder};
pub use settings::Settings;
pub use type_casting::{Caster, CoercionRule, TypeCaster, TypeRef, TypeRegistry};
pub use value::{Map, Value, bury, flatten, flatten_names, map_from_json};
