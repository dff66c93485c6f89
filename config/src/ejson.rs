//! # Encrypted Secrets Loader
//!
//! Reads `secrets.ejson` files by shelling out to the `ejson` binary:
//! `ejson decrypt <path>` prints the decrypted JSON document on stdout.
//!
//! Keys starting with `_` (ejson's marker for plaintext entries) lose the
//! underscore, and the section named after the config is returned.

use std::env;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Command;

use errors::SourceError;

use crate::precedence::deep_merge;
use crate::provenance::{Origin, TraceTree};
use crate::registry::{LoadContext, Loaded, Loader};
use crate::settings::Settings;
use crate::value::{Map, Value};

/// Source id the encrypted secrets loader is registered under.
pub const EJSON_SOURCE: &str = "ejson";

/// Default name of the decrypt executable.
pub const EJSON_BIN: &str = "ejson";

/// Locate `cmd` on `PATH`, honouring `PATHEXT` where it is set.
pub fn which(cmd: &str) -> Option<PathBuf> {
    let path = env::var_os("PATH")?;
    let pathext = env::var("PATHEXT").ok();
    which_in(cmd, &path, pathext.as_deref())
}

/// [`which`] against explicit `PATH` / `PATHEXT` values.
pub fn which_in(cmd: &str, path: &OsStr, pathext: Option<&str>) -> Option<PathBuf> {
    let extensions: Vec<&str> = match pathext {
        Some(exts) => exts.split(';').collect(),
        None => vec![""],
    };

    env::split_paths(path).find_map(|dir| {
        extensions
            .iter()
            .map(|ext| dir.join(format!("{cmd}{ext}")))
            .find(|candidate| is_executable(candidate))
    })
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Rename `_key` to `key` throughout the tree.
fn strip_underscores(value: Value) -> Value {
    match value {
        Value::Map(map) => Value::Map(
            map.into_iter()
                .map(|(key, value)| {
                    let key = match key.strip_prefix('_') {
                        Some(stripped) => stripped.to_string(),
                        None => key,
                    };
                    (key, strip_underscores(value))
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(strip_underscores).collect()),
        other => other,
    }
}

/// Runs the decrypt binary over a single file.
#[derive(Debug, Clone)]
pub struct EjsonParser {
    bin_path: PathBuf,
}

impl Default for EjsonParser {
    fn default() -> Self {
        Self::new(EJSON_BIN)
    }
}

impl EjsonParser {
    pub fn new(bin_path: impl Into<PathBuf>) -> Self {
        Self {
            bin_path: bin_path.into(),
        }
    }

    /// Decrypted contents of `path`.
    ///
    /// `None` when the file does not exist or decryption fails; the
    /// failure is logged.
    pub fn parse(&self, path: &Path) -> Result<Option<Map>, SourceError> {
        if !path.exists() {
            return Ok(None);
        }

        let output = match Command::new(&self.bin_path).arg("decrypt").arg(path).output() {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to run ejson");
                return Ok(None);
            }
        };

        if !output.status.success() {
            tracing::warn!(
                path = %path.display(),
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "Failed to decrypt secrets file"
            );
            return Ok(None);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let value: Value =
            serde_json::from_str(stdout.trim_end()).map_err(|e| SourceError::Parse {
                path: path.to_path_buf(),
                format: "EJSON".to_string(),
                reason: e.to_string(),
            })?;

        Ok(strip_underscores(value).into_map())
    }
}

/// Loader reading the config's section out of the encrypted secrets files.
///
/// Files, later ones overlaid on earlier ones:
/// 1. `<app_root>/config/<environment>/secrets.ejson`, or
///    `<app_root>/config/secrets.ejson` without a current environment
/// 2. `<app_root>/config/secrets.local.ejson` when local files are enabled
#[derive(Debug, Clone)]
pub struct EjsonLoader {
    parser: EjsonParser,
    app_root: PathBuf,
    current_environment: Option<String>,
}

impl EjsonLoader {
    pub fn new(settings: &Settings, parser: EjsonParser) -> Self {
        Self {
            parser,
            app_root: settings.app_root.clone(),
            current_environment: settings.current_environment.clone(),
        }
    }

    /// Loader using the `ejson` binary found on `PATH`, if there is one.
    pub fn detect(settings: &Settings) -> Option<Self> {
        which(EJSON_BIN).map(|bin| Self::new(settings, EjsonParser::new(bin)))
    }

    fn paths(&self, local: bool) -> Vec<PathBuf> {
        let config_dir = self.app_root.join("config");
        let mut paths = vec![match &self.current_environment {
            Some(environment) => config_dir.join(environment).join("secrets.ejson"),
            None => config_dir.join("secrets.ejson"),
        }];
        if local {
            paths.push(config_dir.join("secrets.local.ejson"));
        }
        paths
    }
}

impl Loader for EjsonLoader {
    fn load(&self, ctx: &LoadContext) -> Result<Loaded, SourceError> {
        let mut values = Map::new();
        let mut trace = TraceTree::new();

        for path in self.paths(ctx.local_files_enabled) {
            let Some(mut secrets) = self.parser.parse(&path)? else {
                continue;
            };
            let Some(section) = secrets.remove(&ctx.name).and_then(Value::into_map) else {
                continue;
            };
            trace.merge(TraceTree::from_values(
                &section,
                &Origin::file(EJSON_SOURCE, &path),
            ));
            deep_merge(&mut values, section);
        }

        if !ctx.tracing_enabled {
            return Ok(values.into());
        }
        Ok(Loaded::traced(values, trace))
    }
}
