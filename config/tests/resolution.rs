//! End-to-end resolution through the public API.

use std::sync::Arc;

use config::{
    Config, ConfigError, DOPPLER_SOURCE, DopplerLoader, EnvGuard, Map, Origin, RegistryError,
    Resolver, Schema, Settings, TraceNode, Value, flatten_names, map_from_json,
};
use testing::{
    AppRoot, DOPPLER_DOWNLOAD_PATH, FailingLoader, StaticLoader, doppler_server, env_from,
};
use proptest::prelude::*;
use serde_json::json;

fn empty_env() -> config::Env {
    env_from(Vec::<(String, String)>::new())
}

fn schema_with(attrs: &[&str]) -> Arc<Schema> {
    Arc::new(
        Schema::builder()
            .config_name("app")
            .attrs(attrs.iter().copied())
            .build()
            .unwrap(),
    )
}

fn origin_of<'a>(config: &'a Config, path: &[&str]) -> Option<&'a Origin> {
    config
        .to_source_trace()
        .and_then(|trace| trace.dig(path))
        .and_then(TraceNode::origin)
}

#[test]
fn test_env_nesting() {
    let env = env_from([("APP_USER__NAME", "john"), ("APP_USER__AGE", "9"), ("OTHER_X", "1")]);
    let resolver = Resolver::with_default_sources(Settings::default(), env).unwrap();

    let config = Config::new(schema_with(&["user"]), Arc::new(resolver)).unwrap();
    assert_eq!(
        Value::Map(config.to_h()).to_json(),
        json!({"user": {"name": "john", "age": 9}})
    );
    assert_eq!(
        origin_of(&config, &["user", "age"]),
        Some(&Origin::env("APP_USER__AGE"))
    );
}

#[test]
fn test_required_validation_lists_every_missing_attribute() {
    let mut resolver = Resolver::with_env(Settings::default(), empty_env());
    resolver
        .registry_mut()
        .append("file", StaticLoader::new(json!({"host": ""})))
        .unwrap();
    let schema = Schema::builder()
        .config_name("app")
        .attrs(["host", "port"])
        .required(["host", "port"])
        .build()
        .unwrap();

    let err = Config::new(Arc::new(schema), Arc::new(resolver)).unwrap_err();
    assert_eq!(
        err.missing_attributes(),
        Some(&["host".to_string(), "port".to_string()][..])
    );
    assert!(err.to_string().contains("host, port"));
}

#[test]
fn test_required_only_in_guarded_environment() {
    let schema = Arc::new(
        Schema::builder()
            .config_name("app")
            .attr("secret")
            .required_in(["secret"], EnvGuard::except(["test"]))
            .build()
            .unwrap(),
    );

    let testing = Resolver::with_env(Settings::default().with_environment("test"), empty_env());
    assert!(Config::new(Arc::clone(&schema), Arc::new(testing)).is_ok());

    let production =
        Resolver::with_env(Settings::default().with_environment("production"), empty_env());
    let err = Config::new(schema, Arc::new(production)).unwrap_err();
    assert_eq!(err.missing_attributes(), Some(&["secret".to_string()][..]));
}

#[test]
fn test_local_override_file() {
    let root = AppRoot::new().unwrap();
    let base = root.write("app.yml", "a: 1\nb:\n  c: 2\n").unwrap();
    let local = root.write("app.local.yml", "b:\n  c: 3\n  d: 4\n").unwrap();

    let settings = root.settings().with_local_files(true);
    let resolver = Resolver::with_default_sources(settings, empty_env()).unwrap();
    let config = Config::new(schema_with(&["a", "b"]), Arc::new(resolver)).unwrap();

    assert_eq!(
        Value::Map(config.to_h()).to_json(),
        json!({"a": 1, "b": {"c": 3, "d": 4}})
    );
    assert_eq!(origin_of(&config, &["a"]), Some(&Origin::file("yml", base)));
    assert_eq!(origin_of(&config, &["b", "d"]), Some(&Origin::file("yml", local)));

    let without_local = Resolver::with_default_sources(root.settings(), empty_env()).unwrap();
    let config = Config::new(schema_with(&["a", "b"]), Arc::new(without_local)).unwrap();
    assert_eq!(
        Value::Map(config.to_h()).to_json(),
        json!({"a": 1, "b": {"c": 2}})
    );
}

#[test]
fn test_environment_keyed_file() {
    let root = AppRoot::new().unwrap();
    root.write(
        "app.yml",
        "default:\n  host: localhost\n  port: 5432\nproduction:\n  host: db.internal\n",
    )
    .unwrap();

    let settings = root
        .settings()
        .with_environment("production")
        .with_default_environmental_key("default");
    let resolver = Resolver::with_default_sources(settings, empty_env()).unwrap();
    let config = Config::new(schema_with(&["host", "port"]), Arc::new(resolver)).unwrap();

    assert_eq!(config.get("host"), Some(&Value::from("db.internal")));
    assert_eq!(config.get("port"), Some(&Value::Integer(5432)));
}

#[test]
fn test_env_beats_file_and_conf_var_moves_file() {
    let root = AppRoot::new().unwrap();
    let custom = root.write("elsewhere/custom.yml", "host: from-file\nport: 1\n").unwrap();
    let env = env_from([
        ("APP_CONF".to_string(), custom.display().to_string()),
        ("APP_PORT".to_string(), "2".to_string()),
    ]);

    let resolver = Resolver::with_default_sources(root.settings(), env).unwrap();
    let config = Config::new(schema_with(&["host", "port"]), Arc::new(resolver)).unwrap();

    assert_eq!(config.get("host"), Some(&Value::from("from-file")));
    assert_eq!(config.get("port"), Some(&Value::Integer(2)));
    assert_eq!(origin_of(&config, &["port"]), Some(&Origin::env("APP_PORT")));
}

#[test]
fn test_dup_is_deep_and_independent() {
    let mut resolver = Resolver::with_env(Settings::default(), empty_env());
    resolver
        .registry_mut()
        .append("file", StaticLoader::new(json!({"db": {"primary": {"host": "pg"}}})))
        .unwrap();
    let original = Config::new(schema_with(&["db"]), Arc::new(resolver)).unwrap();

    let mut copy = original.clone();
    assert_eq!(copy.to_h(), original.to_h());
    assert_eq!(copy.to_source_trace(), original.to_source_trace());

    let mut db = copy.get("db").and_then(Value::as_map).cloned().unwrap();
    db.insert("replica".to_string(), Value::from("pg-2"));
    copy.set("db", db).unwrap();

    assert!(original.dig(&["db", "replica"]).is_none());
    assert_eq!(copy.dig(&["db", "replica"]), Some(&Value::from("pg-2")));
    assert_eq!(
        origin_of(&original, &["db", "primary", "host"]),
        Some(&Origin::new("file"))
    );
}

#[test]
fn test_registry_order_and_freeze() {
    let mut resolver = Resolver::with_env(Settings::default(), empty_env());
    let registry = resolver.registry_mut();
    registry.append("b", StaticLoader::new(json!({"x": "b"}))).unwrap();
    registry.prepend("a", StaticLoader::new(json!({"x": "a"}))).unwrap();
    registry
        .insert_after("b", "c", StaticLoader::new(json!({"x": "c"})))
        .unwrap();
    registry
        .insert_before("c", "bc", StaticLoader::new(json!({"x": "bc"})))
        .unwrap();
    assert_eq!(registry.keys(), vec!["a", "b", "bc", "c"]);

    registry.freeze();
    assert_eq!(
        registry.append("d", StaticLoader::new(json!({}))),
        Err(RegistryError::Frozen)
    );
    assert_eq!(registry.delete("a"), Err(RegistryError::Frozen));

    let config = Config::new(schema_with(&["x"]), Arc::new(resolver)).unwrap();
    assert_eq!(config.get("x"), Some(&Value::from("c")));
    assert_eq!(origin_of(&config, &["x"]), Some(&Origin::new("c")));
}

#[test]
fn test_failing_source_aborts_with_its_id() {
    let mut resolver = Resolver::with_env(Settings::default(), empty_env());
    let ok = StaticLoader::new(json!({"x": 1}));
    resolver.registry_mut().append("ok", ok.clone()).unwrap();
    resolver
        .registry_mut()
        .append("broken", FailingLoader::new("boom"))
        .unwrap();

    let err = Config::new(schema_with(&["x"]), Arc::new(resolver)).unwrap_err();
    assert!(matches!(err, ConfigError::Source { ref id, .. } if id == "broken"));
    assert_eq!(err.to_string(), "Source `broken` failed: boom");
    assert_eq!(ok.calls(), 1);
}

#[test]
fn test_reload_sees_new_sources_output() {
    let root = AppRoot::new().unwrap();
    root.write("app.yml", "x: 1\n").unwrap();
    let resolver = Resolver::with_default_sources(root.settings(), empty_env()).unwrap();
    let mut config = Config::new(schema_with(&["x"]), Arc::new(resolver)).unwrap();
    assert_eq!(config.get("x"), Some(&Value::Integer(1)));

    root.write("app.yml", "x: 2\n").unwrap();
    config.reload(None).unwrap();
    assert_eq!(config.get("x"), Some(&Value::Integer(2)));
}

#[test]
fn test_extended_schema_resolves_parent_attributes() {
    let parent = Schema::builder()
        .config_name("app")
        .attr_default("host", "localhost")
        .build()
        .unwrap();
    let child = parent.extend().attr_default("port", 80).build().unwrap();
    assert_eq!(child.env_prefix(), "APP");

    let env = env_from([("APP_HOST", "example.com")]);
    let resolver = Resolver::with_default_sources(Settings::default(), env).unwrap();
    let config = Config::new(Arc::new(child), Arc::new(resolver)).unwrap();
    assert_eq!(
        Value::Map(config.to_h()).to_json(),
        json!({"host": "example.com", "port": 80})
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_doppler_secrets_override_env() {
    let server = doppler_server(
        "dp.st.test",
        json!({"APP_PASSWORD": "from-doppler", "APP_DB__USER": "admin"}),
    )
    .await;
    let endpoint = format!("{}{DOPPLER_DOWNLOAD_PATH}", server.uri());

    let config = tokio::task::spawn_blocking(move || {
        let env = env_from([
            ("DOPPLER_TOKEN", "dp.st.test"),
            ("APP_PASSWORD", "from-env"),
        ]);
        let mut resolver = Resolver::with_default_sources(Settings::default(), env).unwrap();
        resolver
            .registry_mut()
            .override_loader(
                DOPPLER_SOURCE,
                DopplerLoader::new("dp.st.test").with_endpoint(endpoint),
            )
            .unwrap();
        Config::new(schema_with(&["password", "db"]), Arc::new(resolver))
    })
    .await
    .unwrap()
    .unwrap();

    assert_eq!(config.get("password"), Some(&Value::from("from-doppler")));
    assert_eq!(config.dig(&["db", "user"]), Some(&Value::from("admin")));
    assert_eq!(
        origin_of(&config, &["password"]).map(|o| o.source.as_str()),
        Some(DOPPLER_SOURCE)
    );
}

fn leaf_maps() -> impl Strategy<Value = std::collections::BTreeMap<String, i64>> {
    prop::collection::btree_map("[a-e]", any::<i64>(), 0..4)
}

proptest! {
    #[test]
    fn prop_last_source_wins_and_trace_mirrors_values(
        sources in prop::collection::vec(leaf_maps(), 1..5),
        overrides in prop::option::of(leaf_maps()),
    ) {
        let mut resolver = Resolver::with_env(Settings::default(), empty_env());
        let mut expected: std::collections::BTreeMap<String, (i64, String)> = Default::default();

        for (i, source) in sources.iter().enumerate() {
            let id = format!("s{i}");
            let json = serde_json::to_value(source).unwrap();
            resolver.registry_mut().append(id.clone(), StaticLoader::new(json)).unwrap();
            for (key, value) in source {
                expected.insert(key.clone(), (*value, id.clone()));
            }
        }
        let override_map: Option<Map> = overrides.as_ref().map(|o| {
            for (key, value) in o {
                expected.insert(key.clone(), (*value, "load".to_string()));
            }
            map_from_json(serde_json::to_value(o).unwrap())
        });

        let resolver = Arc::new(resolver);
        let schema = schema_with(&["a", "b", "c", "d", "e"]);
        let config = match override_map {
            Some(o) => Config::with_overrides(schema, resolver, o).unwrap(),
            None => Config::new(schema, resolver).unwrap(),
        };

        for (key, (value, source)) in &expected {
            prop_assert_eq!(config.get(key), Some(&Value::Integer(*value)));
            prop_assert_eq!(
                origin_of(&config, &[key.as_str()]).map(|o| o.source.clone()),
                Some(source.clone())
            );
        }

        let trace = config.to_source_trace().unwrap();
        let traced: Vec<String> = trace.leaves().into_iter().map(|(path, _)| path).collect();
        prop_assert_eq!(traced, flatten_names(config.values()));
    }
}
