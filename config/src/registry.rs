//! # Source Registry
//!
//! Ordered, named list of loader plugins. Order is precedence: on
//! overlapping leaves, later sources override earlier ones.
//!
//! A registry is configured once at startup and may then be frozen, after
//! which every mutator fails with [`RegistryError::Frozen`].

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use errors::{RegistryError, SourceError};

use crate::provenance::TraceTree;
use crate::value::Map;

/// Per-call record handed to every loader during a resolution pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadContext {
    /// Config name.
    pub name: String,
    /// Upper-cased environment variable prefix.
    pub env_prefix: String,
    /// Resolved path of the config file for this name.
    pub config_path: PathBuf,
    /// Whether `*.local.*` overlays should be read.
    pub local_files_enabled: bool,
    /// Whether raw strings are auto-cast.
    pub auto_cast: bool,
    /// Whether the pass records provenance; loaders may skip building a
    /// trace when this is false.
    pub tracing_enabled: bool,
}

/// What a loader contributes: a partial value tree, optionally with its own
/// trace. Without a trace every leaf is attributed to the loader's id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Loaded {
    pub values: Map,
    pub trace: Option<TraceTree>,
}

impl Loaded {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn traced(values: Map, trace: TraceTree) -> Self {
        Self {
            values,
            trace: Some(trace),
        }
    }
}

impl From<Map> for Loaded {
    fn from(values: Map) -> Self {
        Self {
            values,
            trace: None,
        }
    }
}

/// A source of configuration values.
pub trait Loader: Send + Sync {
    fn load(&self, ctx: &LoadContext) -> Result<Loaded, SourceError>;
}

impl<F> Loader for F
where
    F: Fn(&LoadContext) -> Result<Loaded, SourceError> + Send + Sync,
{
    fn load(&self, ctx: &LoadContext) -> Result<Loaded, SourceError> {
        self(ctx)
    }
}

/// Shared handle to a registered loader.
pub type LoaderRef = Arc<dyn Loader>;

/// Ordered collection of `(id, loader)` pairs.
#[derive(Clone, Default)]
pub struct SourceRegistry {
    entries: Vec<(String, LoaderRef)>,
    frozen: bool,
}

impl fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("keys", &self.keys())
            .field("frozen", &self.frozen)
            .finish()
    }
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append<L>(&mut self, id: impl Into<String>, loader: L) -> Result<(), RegistryError>
    where
        L: Loader + 'static,
    {
        let id = self.vacant(id.into())?;
        self.entries.push((id, Arc::new(loader)));
        Ok(())
    }

    pub fn prepend<L>(&mut self, id: impl Into<String>, loader: L) -> Result<(), RegistryError>
    where
        L: Loader + 'static,
    {
        let id = self.vacant(id.into())?;
        self.entries.insert(0, (id, Arc::new(loader)));
        Ok(())
    }

    pub fn insert_before<L>(
        &mut self,
        anchor: &str,
        id: impl Into<String>,
        loader: L,
    ) -> Result<(), RegistryError>
    where
        L: Loader + 'static,
    {
        let id = self.vacant(id.into())?;
        let index = self.position(anchor)?;
        self.entries.insert(index, (id, Arc::new(loader)));
        Ok(())
    }

    pub fn insert_after<L>(
        &mut self,
        anchor: &str,
        id: impl Into<String>,
        loader: L,
    ) -> Result<(), RegistryError>
    where
        L: Loader + 'static,
    {
        let id = self.vacant(id.into())?;
        let index = self.position(anchor)?;
        self.entries.insert(index + 1, (id, Arc::new(loader)));
        Ok(())
    }

    /// Swap the loader behind an existing id, keeping its position.
    pub fn override_loader<L>(&mut self, id: &str, loader: L) -> Result<(), RegistryError>
    where
        L: Loader + 'static,
    {
        self.ensure_mutable()?;
        let index = self.position(id)?;
        self.entries[index].1 = Arc::new(loader);
        Ok(())
    }

    pub fn delete(&mut self, id: &str) -> Result<(), RegistryError> {
        self.ensure_mutable()?;
        let index = self.position(id)?;
        self.entries.remove(index);
        Ok(())
    }

    pub fn keys(&self) -> Vec<&str> {
        self.entries.iter().map(|(id, _)| id.as_str()).collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.iter().any(|(existing, _)| existing == id)
    }

    pub fn get(&self, id: &str) -> Option<&LoaderRef> {
        self.entries
            .iter()
            .find_map(|(existing, loader)| (existing == id).then_some(loader))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &LoaderRef)> {
        self.entries.iter().map(|(id, loader)| (id.as_str(), loader))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Reject every later mutation. Reads stay available.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    fn ensure_mutable(&self) -> Result<(), RegistryError> {
        if self.frozen {
            return Err(RegistryError::Frozen);
        }
        Ok(())
    }

    fn vacant(&self, id: String) -> Result<String, RegistryError> {
        self.ensure_mutable()?;
        if self.contains(&id) {
            return Err(RegistryError::DuplicateSource { id });
        }
        Ok(id)
    }

    fn position(&self, id: &str) -> Result<usize, RegistryError> {
        self.entries
            .iter()
            .position(|(existing, _)| existing == id)
            .ok_or_else(|| RegistryError::UnknownSource { id: id.to_string() })
    }
}
