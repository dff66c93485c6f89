//! Resolution against the real process environment.

use std::sync::Arc;

use config::{Config, Resolver, Schema, Value};
use testing::{ScopedEnv, unique_config_name};
use serial_test::serial;

#[test]
#[serial]
fn test_from_env_reads_process_variables_and_app_env() {
    let name = unique_config_name();
    let prefix = name.to_uppercase();
    let _env = ScopedEnv::set([
        ("APP_ENV".to_string(), "staging".to_string()),
        (format!("{prefix}_PORT"), "7000".to_string()),
        (format!("{prefix}_HOSTS"), "a, b".to_string()),
    ]);

    let resolver = Resolver::from_env().unwrap();
    assert_eq!(
        resolver.settings().current_environment.as_deref(),
        Some("staging")
    );
    assert!(!resolver.settings().use_local_files);

    let schema = Schema::builder()
        .config_name(name.as_str())
        .attrs(["port", "hosts"])
        .build()
        .unwrap();
    let config = Config::new(Arc::new(schema), Arc::new(resolver)).unwrap();
    assert_eq!(config.get("port"), Some(&Value::Integer(7000)));
    assert_eq!(config.get("hosts"), Some(&Value::from(vec!["a", "b"])));
}

#[test]
#[serial]
fn test_reload_picks_up_changed_variables() {
    let name = unique_config_name();
    let key = format!("{}_LEVEL", name.to_uppercase());
    let schema = Arc::new(
        Schema::builder()
            .config_name(name.as_str())
            .attr_default("level", "info")
            .build()
            .unwrap(),
    );
    let resolver = Arc::new(Resolver::from_env().unwrap());

    let mut config = {
        let _env = ScopedEnv::set([(key.as_str(), "debug")]);
        Config::new(Arc::clone(&schema), Arc::clone(&resolver)).unwrap()
    };
    assert_eq!(config.get("level"), Some(&Value::from("debug")));

    config.load(None).unwrap();
    assert_eq!(config.get("level"), Some(&Value::from("debug")));

    config.reload(None).unwrap();
    assert_eq!(config.get("level"), Some(&Value::from("info")));
}
