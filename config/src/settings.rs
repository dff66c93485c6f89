//! # Engine Settings
//!
//! Library-wide knobs for a [`Resolver`](crate::Resolver). Built once at
//! startup and then shared read-only by every resolution pass.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Environment variable naming the current environment.
pub const APP_ENV_VAR: &str = "APP_ENV";

/// Environment in which `*.local.*` overlays are read by default.
pub const DEVELOPMENT: &str = "development";

/// Maps a config name to the path of its config file.
pub type ConfigPathResolver = Arc<dyn Fn(&str) -> PathBuf + Send + Sync>;

/// Settings shared by every config a resolver loads.
///
/// # M-CANONICAL-DOCS
///
/// ## Fields
/// - `use_local_files`: read `*.local.*` overlays (default: only in
///   `development`)
/// - `tracing_enabled`: record provenance (default: true)
/// - `current_environment`: selects the section of environment-keyed files
/// - `known_environments`: extra top-level keys marking a file as
///   environment-keyed
/// - `default_environmental_key`: section merged under every environment
/// - `app_root`: root for the encrypted secrets file
///
/// ## Usage
/// ```rust
/// use config::Settings;
///
/// let settings = Settings::default()
///     .with_environment("production")
///     .with_config_dir("/etc/myapp");
///
/// assert_eq!(
///     settings.config_path("db"),
///     std::path::PathBuf::from("/etc/myapp/db.yml")
/// );
/// assert!(!settings.use_local_files);
/// ```
#[derive(Clone)]
pub struct Settings {
    pub use_local_files: bool,
    pub tracing_enabled: bool,
    pub current_environment: Option<String>,
    pub known_environments: Vec<String>,
    pub default_environmental_key: Option<String>,
    pub app_root: PathBuf,
    config_path_resolver: ConfigPathResolver,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            use_local_files: false,
            tracing_enabled: true,
            current_environment: None,
            known_environments: Vec::new(),
            default_environmental_key: None,
            app_root: PathBuf::from("."),
            config_path_resolver: Arc::new(|name| PathBuf::from(format!("./config/{name}.yml"))),
        }
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("use_local_files", &self.use_local_files)
            .field("tracing_enabled", &self.tracing_enabled)
            .field("current_environment", &self.current_environment)
            .field("known_environments", &self.known_environments)
            .field("default_environmental_key", &self.default_environmental_key)
            .field("app_root", &self.app_root)
            .finish_non_exhaustive()
    }
}

impl Settings {
    /// Defaults, with the current environment read from `APP_ENV`.
    pub fn from_env() -> Self {
        match std::env::var(APP_ENV_VAR) {
            Ok(environment) if !environment.is_empty() => {
                Self::default().with_environment(environment)
            }
            _ => Self::default(),
        }
    }

    /// Set the current environment. Local overlays follow it: on in
    /// `development`, off elsewhere.
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        let environment = environment.into();
        self.use_local_files = environment == DEVELOPMENT;
        self.current_environment = Some(environment);
        self
    }

    pub fn with_local_files(mut self, enabled: bool) -> Self {
        self.use_local_files = enabled;
        self
    }

    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.tracing_enabled = enabled;
        self
    }

    pub fn with_known_environments<I, S>(mut self, environments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.known_environments = environments.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_default_environmental_key(mut self, key: impl Into<String>) -> Self {
        self.default_environmental_key = Some(key.into());
        self
    }

    pub fn with_app_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.app_root = root.into();
        self
    }

    /// Look config files up as `<dir>/<name>.yml`.
    pub fn with_config_dir(mut self, dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref().to_path_buf();
        self.config_path_resolver = Arc::new(move |name| dir.join(format!("{name}.yml")));
        self
    }

    pub fn with_config_path_resolver<F>(mut self, resolver: F) -> Self
    where
        F: Fn(&str) -> PathBuf + Send + Sync + 'static,
    {
        self.config_path_resolver = Arc::new(resolver);
        self
    }

    /// Default config file path for `name`.
    pub fn config_path(&self, name: &str) -> PathBuf {
        (self.config_path_resolver)(name)
    }

    pub fn is_environment(&self, environment: &str) -> bool {
        self.current_environment.as_deref() == Some(environment)
    }
}
