//! # Configuration File Loading
//!
//! Loads value trees from YAML, JSON or TOML files.
//!
//! Supports automatic format detection based on file extension, sections
//! keyed by environment, and a `*.local.<ext>` sibling overlaid on top when
//! local files are enabled.

use std::path::{Path, PathBuf};

use errors::SourceError;

use crate::precedence::deep_merge;
use crate::provenance::{Origin, TraceTree};
use crate::registry::{LoadContext, Loaded, Loader};
use crate::settings::Settings;
use crate::value::{Map, Value};

/// Source id the file loader is registered under.
pub const FILE_SOURCE: &str = "yml";

/// Load a value tree from a YAML file.
///
/// An empty document is an empty tree.
pub fn load_from_yaml(path: &Path) -> Result<Map, SourceError> {
    let contents = read(path)?;
    let value: Value = serde_yaml::from_str(&contents).map_err(|e| parse_error(path, "YAML", e))?;
    top_level_map(path, "YAML", value)
}

/// Load a value tree from a JSON file.
pub fn load_from_json(path: &Path) -> Result<Map, SourceError> {
    let contents = read(path)?;
    let value: Value = serde_json::from_str(&contents).map_err(|e| parse_error(path, "JSON", e))?;
    top_level_map(path, "JSON", value)
}

/// Load a value tree from a TOML file.
pub fn load_from_toml(path: &Path) -> Result<Map, SourceError> {
    let contents = read(path)?;
    let value: Value = toml::from_str(&contents).map_err(|e| parse_error(path, "TOML", e))?;
    top_level_map(path, "TOML", value)
}

/// Load a value tree from file with auto-detection.
///
/// # M-CANONICAL-DOCS
///
/// ## Supported Formats
/// - `.yml` / `.yaml`: YAML format
/// - `.json`: JSON format
/// - `.toml`: TOML format
///
/// ## Usage
/// ```rust,no_run
/// use config::load_from_file;
/// use std::path::Path;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let values = load_from_file(Path::new("config/app.yml"))?;
///     println!("{} top-level keys", values.len());
///     Ok(())
/// }
/// ```
///
/// ## Error Handling
/// A missing file is an empty tree, not an error. Returns `SourceError` for:
/// - Unknown file extension
/// - Read failures
/// - Parse errors for the detected format
pub fn load_from_file(path: &Path) -> Result<Map, SourceError> {
    if !path.is_file() {
        return Ok(Map::new());
    }

    let extension = path
        .extension()
        .and_then(|s| s.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();

    match extension.as_str() {
        "yml" | "yaml" => load_from_yaml(path),
        "json" => load_from_json(path),
        "toml" => load_from_toml(path),
        other => Err(SourceError::UnsupportedFormat {
            extension: other.to_string(),
        }),
    }
}

/// Sibling overlay path: `config/app.yml` becomes `config/app.local.yml`.
pub fn local_config_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem}.local.{}", ext.to_string_lossy()),
        None => format!("{stem}.local"),
    };
    path.with_file_name(name)
}

fn read(path: &Path) -> Result<String, SourceError> {
    std::fs::read_to_string(path).map_err(|source| SourceError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_error(path: &Path, format: &str, err: impl std::fmt::Display) -> SourceError {
    SourceError::Parse {
        path: path.to_path_buf(),
        format: format.to_string(),
        reason: err.to_string(),
    }
}

fn top_level_map(path: &Path, format: &str, value: Value) -> Result<Map, SourceError> {
    match value {
        Value::Null => Ok(Map::new()),
        Value::Map(map) => Ok(map),
        other => Err(parse_error(
            path,
            format,
            format!("expected a mapping at the top level, found {}", other.type_name()),
        )),
    }
}

/// Loader reading the config file resolved for each config name.
#[derive(Debug, Clone, Default)]
pub struct FileLoader {
    current_environment: Option<String>,
    known_environments: Vec<String>,
    default_environmental_key: Option<String>,
}

impl FileLoader {
    pub fn new(settings: &Settings) -> Self {
        Self {
            current_environment: settings.current_environment.clone(),
            known_environments: settings.known_environments.clone(),
            default_environmental_key: settings.default_environmental_key.clone(),
        }
    }

    /// Parse `path` and narrow it to the current environment's section.
    pub fn read_file(&self, path: &Path) -> Result<Map, SourceError> {
        Ok(self.select_environment(load_from_file(path)?))
    }

    fn is_environmental(&self, config: &Map, current: &str) -> bool {
        config.contains_key(current)
            || self
                .known_environments
                .iter()
                .any(|env| config.contains_key(env))
            || self
                .default_environmental_key
                .as_ref()
                .is_some_and(|key| config.contains_key(key))
    }

    fn select_environment(&self, mut config: Map) -> Map {
        let Some(current) = self.current_environment.as_deref() else {
            return config;
        };
        if !self.is_environmental(&config, current) {
            return config;
        }

        let section = config
            .remove(current)
            .and_then(Value::into_map)
            .unwrap_or_default();
        match &self.default_environmental_key {
            Some(key) => {
                let mut merged = config
                    .remove(key)
                    .and_then(Value::into_map)
                    .unwrap_or_default();
                deep_merge(&mut merged, section);
                merged
            }
            None => section,
        }
    }
}

impl Loader for FileLoader {
    fn load(&self, ctx: &LoadContext) -> Result<Loaded, SourceError> {
        let base_path = ctx.config_path.as_path();
        let mut values = self.read_file(base_path)?;
        let mut trace = TraceTree::from_values(&values, &Origin::file(FILE_SOURCE, base_path));

        if ctx.local_files_enabled {
            let local_path = local_config_path(base_path);
            let local = self.read_file(&local_path)?;
            if !local.is_empty() {
                tracing::debug!(path = %local_path.display(), "Applying local config overlay");
                trace.merge(TraceTree::from_values(
                    &local,
                    &Origin::file(FILE_SOURCE, &local_path),
                ));
                deep_merge(&mut values, local);
            }
        }

        if !ctx.tracing_enabled {
            return Ok(values.into());
        }
        Ok(Loaded::traced(values, trace))
    }
}
