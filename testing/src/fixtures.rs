use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use config::{Env, LoadContext, Loaded, Loader, Map, Settings, SourceError, map_from_json};
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

pub fn unique_id(prefix: &str) -> String {
    let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("{}_{}", prefix, id)
}

/// Config name unlikely to collide with another test's env prefix.
pub fn unique_config_name() -> String {
    unique_id("test_config")
}

/// Temporary application root with a `config/` directory.
pub struct AppRoot {
    dir: TempDir,
}

impl AppRoot {
    pub fn new() -> std::io::Result<Self> {
        let dir = TempDir::new()?;
        fs::create_dir_all(dir.path().join("config"))?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn config_dir(&self) -> PathBuf {
        self.dir.path().join("config")
    }

    /// Write `config/<relative>`, creating parent directories.
    pub fn write(&self, relative: &str, contents: &str) -> std::io::Result<PathBuf> {
        let path = self.config_dir().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, contents)?;
        Ok(path)
    }

    /// Settings rooted here, resolving `<name>.yml` under `config/`.
    pub fn settings(&self) -> Settings {
        Settings::default()
            .with_app_root(self.path())
            .with_config_dir(self.config_dir())
    }
}

/// In-memory environment from `(key, value)` pairs.
pub fn env_from<I, K, V>(pairs: I) -> Env
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    let vars: BTreeMap<String, String> = pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect();
    Env::with_source(vars)
}

/// Sets process variables and restores the previous values on drop.
///
/// Tests using it must be `#[serial]`.
pub struct ScopedEnv {
    saved: Vec<(String, Option<String>)>,
}

impl ScopedEnv {
    pub fn set<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut saved = Vec::new();
        for (key, value) in pairs {
            let key = key.into();
            saved.push((key.clone(), std::env::var(&key).ok()));
            unsafe {
                std::env::set_var(&key, value.into());
            }
        }
        Self { saved }
    }
}

impl Drop for ScopedEnv {
    fn drop(&mut self) {
        for (key, previous) in self.saved.drain(..).rev() {
            unsafe {
                match previous {
                    Some(value) => std::env::set_var(&key, value),
                    None => std::env::remove_var(&key),
                }
            }
        }
    }
}

/// Loader returning fixed values and counting its calls.
#[derive(Clone)]
pub struct StaticLoader {
    values: Map,
    calls: Arc<AtomicU32>,
}

impl StaticLoader {
    pub fn new(values: serde_json::Value) -> Self {
        Self {
            values: map_from_json(values),
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Loader for StaticLoader {
    fn load(&self, ctx: &LoadContext) -> Result<Loaded, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(config = %ctx.name, "Static loader called");
        Ok(self.values.clone().into())
    }
}

/// Loader that always fails with `message`.
#[derive(Debug, Clone)]
pub struct FailingLoader {
    message: String,
}

impl FailingLoader {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Loader for FailingLoader {
    fn load(&self, _ctx: &LoadContext) -> Result<Loaded, SourceError> {
        Err(SourceError::other(self.message.clone()))
    }
}

/// Path the Doppler mock serves the secrets download on.
pub const DOPPLER_DOWNLOAD_PATH: &str = "/v3/configs/config/secrets/download";

/// Mock Doppler API answering `token` with `secrets`.
///
/// Use `format!("{}{DOPPLER_DOWNLOAD_PATH}", server.uri())` as the endpoint.
pub async fn doppler_server(token: &str, secrets: serde_json::Value) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(DOPPLER_DOWNLOAD_PATH))
        .and(header("Authorization", format!("Bearer {token}").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(secrets))
        .mount(&server)
        .await;
    server
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_id() {
        let a = unique_id("cfg");
        let b = unique_id("cfg");
        assert_ne!(a, b);
        assert!(a.starts_with("cfg_"));
    }

    #[test]
    fn test_app_root_writes_nested_files() {
        let root = AppRoot::new().unwrap();
        let path = root.write("production/secrets.ejson", "{}").unwrap();
        assert!(path.is_file());
        assert_eq!(
            root.settings().config_path("app"),
            root.config_dir().join("app.yml")
        );
    }

    #[test]
    fn test_scoped_env_restores() {
        let key = unique_id("LAYERCONF_TESTING_SCOPED").to_uppercase();
        {
            let _guard = ScopedEnv::set([(key.as_str(), "1")]);
            assert_eq!(std::env::var(&key).unwrap(), "1");
        }
        assert!(std::env::var(&key).is_err());
    }
}
