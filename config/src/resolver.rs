//! # Resolution Orchestrator
//!
//! A [`Resolver`] owns everything a resolution pass needs: settings, the
//! source registry, the type registry and the cached environment. It is
//! configured once at startup, then shared (usually behind an `Arc`) by
//! every [`Config`](crate::Config) it loads.

use std::path::PathBuf;
use std::sync::Arc;

use errors::{ConfigError, Result};

use crate::doppler::{DOPPLER_SOURCE, DopplerLoader};
use crate::ejson::{EJSON_SOURCE, EjsonLoader};
use crate::env::Env;
use crate::file_loader::{FILE_SOURCE, FileLoader};
use crate::loader::{ENV_SOURCE, EnvLoader};
use crate::precedence::merge_with_logging;
use crate::provenance::{Origin, SOURCE_LOAD, TraceTree, Tracer};
use crate::registry::{LoadContext, SourceRegistry};
use crate::schema::Schema;
use crate::settings::Settings;
use crate::type_casting::{TypeCaster, TypeRegistry};
use crate::value::{Map, Value};

/// Env key (under the config's prefix) overriding the config file path.
pub const CONFIG_PATH_KEY: &str = "conf";

/// Outcome of one resolution pass: coerced values of declared attributes
/// and, when tracing is enabled, their provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub values: Map,
    pub trace: Option<TraceTree>,
}

/// Drives resolution passes.
///
/// # M-CANONICAL-DOCS
///
/// ## Usage
/// ```rust,no_run
/// use std::sync::Arc;
/// use config::{Config, Resolver, Schema};
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut resolver = Resolver::from_env()?;
///     resolver.registry_mut().freeze();
///     let resolver = Arc::new(resolver);
///
///     let schema = Schema::builder()
///         .config_name("my_app")
///         .attr_default("port", 8080)
///         .build()?;
///     let config = Config::new(Arc::new(schema), resolver)?;
///     println!("{config}");
///     Ok(())
/// }
/// ```
///
/// ## Default Sources
/// In precedence order, lowest first:
/// - `yml`: the config file (see [`FileLoader`])
/// - `ejson`: encrypted secrets, when the `ejson` binary is on `PATH`
/// - `env`: `<PREFIX>_*` environment variables
/// - `doppler`: remote secrets, when `DOPPLER_TOKEN` is set
#[derive(Debug)]
pub struct Resolver {
    settings: Settings,
    registry: SourceRegistry,
    types: TypeRegistry,
    env: Arc<Env>,
}

impl Resolver {
    /// Resolver with no sources over the process environment.
    pub fn new(settings: Settings) -> Self {
        Self::with_env(settings, Env::new())
    }

    /// Resolver with no sources over a caller-supplied environment.
    pub fn with_env(settings: Settings, env: Env) -> Self {
        Self {
            settings,
            registry: SourceRegistry::new(),
            types: TypeRegistry::default(),
            env: Arc::new(env),
        }
    }

    /// Resolver with the default source pipeline.
    pub fn with_default_sources(settings: Settings, env: Env) -> Result<Self> {
        let mut resolver = Self::with_env(settings, env);
        let env = Arc::clone(&resolver.env);

        resolver
            .registry
            .append(FILE_SOURCE, FileLoader::new(&resolver.settings))?;
        if let Some(ejson) = EjsonLoader::detect(&resolver.settings) {
            resolver.registry.append(EJSON_SOURCE, ejson)?;
        }
        resolver
            .registry
            .append(ENV_SOURCE, EnvLoader::new(Arc::clone(&env)))?;
        if let Ok(doppler) = DopplerLoader::from_env(&env) {
            resolver.registry.append(DOPPLER_SOURCE, doppler)?;
        }

        Ok(resolver)
    }

    /// Default pipeline over the process environment, with settings read
    /// from it.
    ///
    /// When `DOPPLER_TOKEN` is set the pipeline includes the blocking
    /// [`DopplerLoader`]; from async code, load inside
    /// `tokio::task::spawn_blocking`.
    pub fn from_env() -> Result<Self> {
        Self::with_default_sources(Settings::from_env(), Env::new())
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut SourceRegistry {
        &mut self.registry
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    pub fn types_mut(&mut self) -> &mut TypeRegistry {
        &mut self.types
    }

    pub fn env(&self) -> &Arc<Env> {
        &self.env
    }

    /// Config file for `name`: `<PREFIX>_CONF` when set, otherwise the
    /// settings' path resolver.
    pub fn config_path(&self, name: &str, env_prefix: &str) -> PathBuf {
        self.env
            .fetch(env_prefix, false)
            .get(CONFIG_PATH_KEY)
            .and_then(Value::as_str)
            .map_or_else(|| self.settings.config_path(name), PathBuf::from)
    }

    /// Run the source pipeline for an arbitrary name with no schema.
    ///
    /// Every key any source returns is kept, with no coercion beyond what
    /// the sources themselves apply.
    pub fn load_for(&self, name: &str) -> Result<Resolved> {
        let env_prefix = name.to_uppercase();
        let mut values = Map::new();
        let mut tracer = Tracer::new(self.settings.tracing_enabled);

        let (result, trace) = tracer.capture(|tracer| {
            self.load_from_sources(&mut values, tracer, name, &env_prefix, true)
        });
        result?;

        Ok(Resolved { values, trace })
    }

    /// One resolution pass for `schema`: defaults, every source in order,
    /// then `overrides`; coerced and narrowed to declared attributes.
    pub fn resolve(&self, schema: &Schema, overrides: Option<Map>) -> Result<Resolved> {
        let mut accumulated = schema.defaults().clone();
        let mut tracer = Tracer::new(self.settings.tracing_enabled);

        let (result, trace) = tracer.capture(|tracer| -> Result<()> {
            tracer.trace_map(&accumulated, &Origin::defaults());
            self.load_from_sources(
                &mut accumulated,
                tracer,
                schema.name(),
                schema.env_prefix(),
                schema.auto_cast(),
            )?;

            if let Some(overrides) = overrides {
                tracer.trace_map(&overrides, &Origin::load());
                merge_with_logging(&mut accumulated, overrides, SOURCE_LOAD);
            }
            Ok(())
        });
        result?;

        let caster = TypeCaster::new(schema.coercion_rules(), &self.types, schema.auto_cast());
        let mut values = Map::new();
        for (key, value) in accumulated {
            if !schema.has_attribute(&key) {
                continue;
            }
            let coerced = caster.coerce(&key, value)?;
            values.insert(key, coerced);
        }

        let trace = trace.map(|mut trace| {
            trace.keep_if(|key| schema.has_attribute(key));
            trace
        });

        Ok(Resolved { values, trace })
    }

    fn load_from_sources(
        &self,
        accumulated: &mut Map,
        tracer: &mut Tracer,
        name: &str,
        env_prefix: &str,
        auto_cast: bool,
    ) -> Result<()> {
        let config_path = self.config_path(name, env_prefix);

        for (id, loader) in self.registry.iter() {
            let ctx = LoadContext {
                name: name.to_string(),
                env_prefix: env_prefix.to_string(),
                config_path: config_path.clone(),
                local_files_enabled: self.settings.use_local_files,
                auto_cast,
                tracing_enabled: tracer.is_active(),
            };

            tracing::debug!(source = id, config = name, "Loading config source");
            let loaded = loader
                .load(&ctx)
                .map_err(|source| ConfigError::loader(id, source))?;

            if tracer.is_active() {
                match loaded.trace {
                    Some(trace) => tracer.trace_merge(trace),
                    None => tracer.trace_map(&loaded.values, &Origin::new(id)),
                }
            }
            merge_with_logging(accumulated, loaded.values, id);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provenance::TraceNode;
    use crate::registry::Loaded;
    use crate::type_casting::CoercionRule;
    use crate::value::map_from_json;
    use errors::SourceError;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn env_of(pairs: &[(&str, &str)]) -> Env {
        Env::with_source(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        )
    }

    type LoadResult = std::result::Result<Loaded, SourceError>;

    fn static_source(values: serde_json::Value) -> impl Fn(&LoadContext) -> LoadResult {
        let values = map_from_json(values);
        move |_: &LoadContext| -> LoadResult { Ok(values.clone().into()) }
    }

    #[test]
    fn test_resolve_applies_sources_in_order() {
        let mut resolver = Resolver::with_env(Settings::default(), env_of(&[]));
        resolver
            .registry_mut()
            .append("first", static_source(json!({"host": "a", "port": 1})))
            .unwrap();
        resolver
            .registry_mut()
            .append("second", static_source(json!({"host": "b", "stray": true})))
            .unwrap();

        let schema = Schema::builder()
            .config_name("app")
            .attr_default("host", "localhost")
            .attr_default("port", 80)
            .attr_default("debug", false)
            .build()
            .unwrap();

        let resolved = resolver.resolve(&schema, None).unwrap();
        assert_eq!(
            Value::Map(resolved.values).to_json(),
            json!({"host": "b", "port": 1, "debug": false})
        );

        let trace = resolved.trace.unwrap();
        assert_eq!(trace.get("host").and_then(TraceNode::origin), Some(&Origin::new("second")));
        assert_eq!(trace.get("port").and_then(TraceNode::origin), Some(&Origin::new("first")));
        assert_eq!(trace.get("debug").and_then(TraceNode::origin), Some(&Origin::defaults()));
        assert!(trace.get("stray").is_none());
    }

    #[test]
    fn test_overrides_win_and_are_traced_as_load() {
        let mut resolver = Resolver::with_env(Settings::default(), env_of(&[]));
        resolver
            .registry_mut()
            .append("file", static_source(json!({"host": "file"})))
            .unwrap();
        let schema = Schema::builder().config_name("app").attr("host").build().unwrap();

        let overrides = map_from_json(json!({"host": "override"}));
        let resolved = resolver.resolve(&schema, Some(overrides)).unwrap();
        assert_eq!(resolved.values.get("host"), Some(&Value::from("override")));
        assert_eq!(
            resolved.trace.unwrap().get("host").and_then(TraceNode::origin),
            Some(&Origin::load())
        );
    }

    #[test]
    fn test_coercion_rules_and_auto_cast_fallback() {
        let mut resolver = Resolver::with_env(Settings::default(), env_of(&[]));
        resolver
            .registry_mut()
            .append("raw", static_source(json!({"port": "8080", "ratio": "0.5", "tags": "a,b"})))
            .unwrap();
        let schema = Schema::builder()
            .config_name("app")
            .attrs(["port", "ratio", "tags"])
            .coerce_types([("port", CoercionRule::of("string"))])
            .build()
            .unwrap();

        let values = resolver.resolve(&schema, None).unwrap().values;
        assert_eq!(values.get("port"), Some(&Value::from("8080")));
        assert_eq!(values.get("ratio"), Some(&Value::Float(0.5)));
        assert_eq!(values.get("tags"), Some(&Value::from(vec!["a", "b"])));
    }

    #[test]
    fn test_source_errors_name_the_source() {
        let mut resolver = Resolver::with_env(Settings::default(), env_of(&[]));
        resolver
            .registry_mut()
            .append("vault", |_: &LoadContext| -> LoadResult {
                Err(SourceError::other("sealed"))
            })
            .unwrap();
        let schema = Schema::builder().config_name("app").attr("host").build().unwrap();

        let err = resolver.resolve(&schema, None).unwrap_err();
        assert!(matches!(err, ConfigError::Source { ref id, .. } if id == "vault"));
    }

    #[test]
    fn test_config_path_from_env_conf() {
        let resolver = Resolver::with_env(
            Settings::default(),
            env_of(&[("APP_CONF", "/etc/app/custom,name.yml")]),
        );
        assert_eq!(
            resolver.config_path("app", "APP"),
            PathBuf::from("/etc/app/custom,name.yml")
        );
        assert_eq!(
            resolver.config_path("other", "OTHER"),
            PathBuf::from("./config/other.yml")
        );
    }

    #[test]
    fn test_local_files_setting_reaches_closure_loaders() {
        let mut resolver =
            Resolver::with_env(Settings::default().with_local_files(true), env_of(&[]));
        resolver
            .registry_mut()
            .append("secrets", |ctx: &LoadContext| -> LoadResult {
                let mut values = Map::new();
                values.insert("local".to_string(), Value::Bool(ctx.local_files_enabled));
                Ok(values.into())
            })
            .unwrap();

        let resolved = resolver.load_for("app").unwrap();
        assert_eq!(resolved.values.get("local"), Some(&Value::Bool(true)));

        let mut resolver =
            Resolver::with_env(Settings::default().with_local_files(false), env_of(&[]));
        resolver
            .registry_mut()
            .append("secrets", |ctx: &LoadContext| -> LoadResult {
                let mut values = Map::new();
                values.insert("local".to_string(), Value::Bool(ctx.local_files_enabled));
                Ok(values.into())
            })
            .unwrap();
        let resolved = resolver.load_for("app").unwrap();
        assert_eq!(resolved.values.get("local"), Some(&Value::Bool(false)));
    }

    #[test]
    fn test_load_for_keeps_every_key() {
        let resolver = Resolver::with_default_sources(
            Settings::default(),
            env_of(&[("MY_SERVICE_HOST", "x"), ("MY_SERVICE_RETRIES", "3")]),
        )
        .unwrap();

        let resolved = resolver.load_for("my_service").unwrap();
        assert_eq!(
            Value::Map(resolved.values).to_json(),
            json!({"host": "x", "retries": 3})
        );
        assert_eq!(
            resolved.trace.unwrap().get("host").and_then(TraceNode::origin),
            Some(&Origin::env("MY_SERVICE_HOST"))
        );
    }

    #[test]
    fn test_tracing_disabled_yields_no_trace() {
        let resolver = Resolver::with_default_sources(
            Settings::default().with_tracing(false),
            env_of(&[("APP_HOST", "x")]),
        )
        .unwrap();
        let schema = Schema::builder().config_name("app").attr("host").build().unwrap();

        let resolved = resolver.resolve(&schema, None).unwrap();
        assert_eq!(resolved.values.get("host"), Some(&Value::from("x")));
        assert!(resolved.trace.is_none());
    }

    #[test]
    fn test_default_pipeline_order() {
        let env = env_of(&[("DOPPLER_TOKEN", "dp.st.x")]);
        let resolver = Resolver::with_default_sources(Settings::default(), env).unwrap();
        let keys = resolver.registry().keys();
        assert_eq!(keys.first(), Some(&FILE_SOURCE));
        assert_eq!(keys.last(), Some(&DOPPLER_SOURCE));
        assert!(keys.contains(&ENV_SOURCE));
    }
}
