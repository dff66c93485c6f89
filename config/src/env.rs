//! # Environment Parser
//!
//! Turns the flat environment into nested value trees scoped by prefix.
//!
//! # Naming Convention
//! `<PREFIX>_<SEGMENT>__<SEGMENT>=value` becomes
//! `{segment: {segment: value}}`: the prefix match is exact and
//! case-sensitive, the remaining path is lower-cased and split on `__`.
//!
//! Keys are processed in lexicographic order, so when two variables
//! normalize to the same path the later one wins, and a longer path turns
//! a shorter path's scalar into a branch.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::provenance::{Origin, TraceTree};
use crate::type_casting::cast_env_string;
use crate::value::{Map, bury};

/// Where the parser reads variables from.
pub trait EnvSource: Send + Sync {
    /// Every variable as a `(key, value)` pair, in any order.
    fn vars(&self) -> Vec<(String, String)>;

    fn var(&self, key: &str) -> Option<String> {
        self.vars()
            .into_iter()
            .find_map(|(k, v)| (k == key).then_some(v))
    }
}

/// The real process environment. Variables that are not valid UTF-8 are
/// skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn vars(&self) -> Vec<(String, String)> {
        std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect()
    }

    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvSource for BTreeMap<String, String> {
    fn vars(&self) -> Vec<(String, String)> {
        self.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    fn var(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

impl EnvSource for HashMap<String, String> {
    fn vars(&self) -> Vec<(String, String)> {
        self.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    fn var(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

#[derive(Debug, Clone)]
struct Parsed {
    values: Map,
    trace: TraceTree,
}

/// Prefix-scoped, memoized view of an [`EnvSource`].
///
/// Results are cached per `(prefix, auto_cast)` until [`Env::clear`].
/// Every fetch hands out a fresh copy.
pub struct Env {
    source: Arc<dyn EnvSource>,
    cache: Mutex<HashMap<(String, bool), Parsed>>,
}

impl Default for Env {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Env {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Env")
            .field("cached_prefixes", &self.cache.lock().len())
            .finish_non_exhaustive()
    }
}

impl Env {
    /// Parser over the process environment.
    pub fn new() -> Self {
        Self::with_source(ProcessEnv)
    }

    pub fn with_source<S: EnvSource + 'static>(source: S) -> Self {
        Self {
            source: Arc::new(source),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Raw lookup of a single variable, bypassing the cache.
    pub fn var(&self, key: &str) -> Option<String> {
        self.source.var(key)
    }

    /// Value tree for `prefix`. An empty prefix yields an empty tree.
    pub fn fetch(&self, prefix: &str, auto_cast: bool) -> Map {
        self.fetch_with_trace(prefix, auto_cast).0
    }

    /// Value tree for `prefix` plus a trace naming the variable behind
    /// every leaf.
    pub fn fetch_with_trace(&self, prefix: &str, auto_cast: bool) -> (Map, TraceTree) {
        if prefix.is_empty() {
            return (Map::new(), TraceTree::new());
        }

        let mut cache = self.cache.lock();
        let parsed = cache
            .entry((prefix.to_string(), auto_cast))
            .or_insert_with(|| self.parse(prefix, auto_cast));
        (parsed.values.clone(), parsed.trace.clone())
    }

    /// Forget every cached prefix so the next fetch re-reads the source.
    pub fn clear(&self) {
        self.cache.lock().clear();
    }

    fn parse(&self, prefix: &str, auto_cast: bool) -> Parsed {
        let match_prefix = format!("{prefix}_");
        let mut vars: Vec<(String, String)> = self
            .source
            .vars()
            .into_iter()
            .filter(|(key, _)| key.starts_with(&match_prefix) && key.len() > match_prefix.len())
            .collect();
        vars.sort_by(|a, b| a.0.cmp(&b.0));

        let mut values = Map::new();
        let mut trace = TraceTree::new();
        for (key, raw) in vars {
            let path: Vec<String> = key[match_prefix.len()..]
                .to_lowercase()
                .split("__")
                .map(str::to_string)
                .collect();
            let value = cast_env_string(&raw, auto_cast);

            if let Some((last, parents)) = path.split_last() {
                trace.record_value(&value, parents, last, &Origin::env(key.as_str()));
            }
            bury(&mut values, &path, value);
        }

        tracing::debug!(prefix, keys = values.len(), "Parsed environment");
        Parsed { values, trace }
    }
}
