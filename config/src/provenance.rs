//! # Provenance
//!
//! A trace tree runs parallel to the value tree and records, for every
//! resolved leaf, which source produced it and where that source found it.
//!
//! Traces are collected through a [`Tracer`]: a stack of capture scopes
//! owned by a single resolution pass and handed down the call graph.
//! Concurrent resolutions each own their tracer, so nothing is shared.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

use crate::value::{Map, Value};

/// Source type recorded for schema defaults.
pub const SOURCE_DEFAULTS: &str = "defaults";
/// Source type recorded for explicit overrides passed to a load.
pub const SOURCE_LOAD: &str = "load";
/// Source type recorded for values assigned directly through a setter.
pub const SOURCE_ACCESSOR: &str = "accessor";

/// Source-specific metadata telling where a value was found.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Locator {
    #[default]
    None,
    File { path: PathBuf },
    Env { key: String },
    Remote { store: String, key: String },
    CallSite { file: String, line: u32 },
}

/// Who produced a value: the source type plus its locator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub source: String,
    pub locator: Locator,
}

impl Origin {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            locator: Locator::None,
        }
    }

    pub fn with_locator(source: impl Into<String>, locator: Locator) -> Self {
        Self {
            source: source.into(),
            locator,
        }
    }

    pub fn defaults() -> Self {
        Self::new(SOURCE_DEFAULTS)
    }

    pub fn load() -> Self {
        Self::new(SOURCE_LOAD)
    }

    pub fn file(source: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self::with_locator(source, Locator::File { path: path.into() })
    }

    pub fn env(key: impl Into<String>) -> Self {
        Self::with_locator("env", Locator::Env { key: key.into() })
    }

    pub fn remote(
        source: impl Into<String>,
        store: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self::with_locator(
            source,
            Locator::Remote {
                store: store.into(),
                key: key.into(),
            },
        )
    }

    /// Origin of a direct assignment made at `location`.
    pub fn accessor(location: &std::panic::Location<'_>) -> Self {
        Self::with_locator(
            SOURCE_ACCESSOR,
            Locator::CallSite {
                file: location.file().to_string(),
                line: location.line(),
            },
        )
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.locator {
            Locator::None => write!(f, "{}", self.source),
            Locator::File { path } => write!(f, "{} ({})", self.source, path.display()),
            Locator::Env { key } => write!(f, "{} ({key})", self.source),
            Locator::Remote { store, key } => write!(f, "{} ({store}: {key})", self.source),
            Locator::CallSite { file, line } => write!(f, "{} ({file}:{line})", self.source),
        }
    }
}

impl Serialize for Origin {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("type", &self.source)?;
        match &self.locator {
            Locator::None => {}
            Locator::File { path } => map.serialize_entry("path", &path.display().to_string())?,
            Locator::Env { key } => map.serialize_entry("key", key)?,
            Locator::Remote { store, key } => {
                map.serialize_entry("store", store)?;
                map.serialize_entry("key", key)?;
            }
            Locator::CallSite { file, line } => {
                map.serialize_entry("called_from", &format!("{file}:{line}"))?;
            }
        }
        map.end()
    }
}

/// A node of the trace tree.
#[derive(Debug, Clone, PartialEq)]
pub enum TraceNode {
    Branch(TraceTree),
    Leaf { value: Value, origin: Origin },
}

impl TraceNode {
    pub fn leaf(value: Value, origin: Origin) -> Self {
        Self::Leaf { value, origin }
    }

    pub fn is_branch(&self) -> bool {
        matches!(self, Self::Branch(_))
    }

    pub fn origin(&self) -> Option<&Origin> {
        match self {
            Self::Leaf { origin, .. } => Some(origin),
            Self::Branch(_) => None,
        }
    }

    pub fn as_branch(&self) -> Option<&TraceTree> {
        match self {
            Self::Branch(tree) => Some(tree),
            Self::Leaf { .. } => None,
        }
    }

    /// Trace for `value`: a branch mirroring a map, a single leaf otherwise.
    fn for_value(value: &Value, origin: &Origin) -> Self {
        match value {
            Value::Map(map) => Self::Branch(TraceTree::from_values(map, origin)),
            other => Self::leaf(other.clone(), origin.clone()),
        }
    }
}

impl Serialize for TraceNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Branch(tree) => tree.serialize(serializer),
            Self::Leaf { value, origin } => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("value", value)?;
                map.serialize_entry("source", origin)?;
                map.end()
            }
        }
    }
}

/// A branch of the trace tree, keyed like the value tree it mirrors.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TraceTree {
    children: BTreeMap<String, TraceNode>,
}

impl TraceTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// A trace attributing every leaf of `map` to `origin`.
    pub fn from_values(map: &Map, origin: &Origin) -> Self {
        let mut tree = Self::new();
        tree.merge_values(map, origin);
        tree
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn get(&self, key: &str) -> Option<&TraceNode> {
        self.children.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.children.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TraceNode)> {
        self.children.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Follow `path` through nested branches.
    pub fn dig<S: AsRef<str>>(&self, path: &[S]) -> Option<&TraceNode> {
        let (first, rest) = path.split_first()?;
        let node = self.children.get(first.as_ref())?;
        if rest.is_empty() {
            return Some(node);
        }
        node.as_branch()?.dig(rest)
    }

    /// Attribute `value` at `path`/`key` to `origin`, replacing whatever
    /// was recorded there. A map value records a sub-trace.
    pub fn record_value<S: AsRef<str>>(
        &mut self,
        value: &Value,
        path: &[S],
        key: &str,
        origin: &Origin,
    ) {
        let mut target = self;
        for segment in path {
            target = target.branch_mut(segment.as_ref());
        }
        target
            .children
            .insert(key.to_string(), TraceNode::for_value(value, origin));
    }

    /// Attribute every leaf of `map` to `origin`, recursing into branches
    /// that already exist.
    pub fn merge_values(&mut self, map: &Map, origin: &Origin) {
        for (key, value) in map {
            match value {
                Value::Map(child) => self.branch_mut(key).merge_values(child, origin),
                other => {
                    self.children
                        .insert(key.clone(), TraceNode::leaf(other.clone(), origin.clone()));
                }
            }
        }
    }

    /// Overlay `other` onto this trace: branches merge, leaves replace.
    pub fn merge(&mut self, other: TraceTree) {
        for (key, node) in other.children {
            match node {
                TraceNode::Branch(sub) => self.branch_mut(&key).merge(sub),
                leaf => {
                    self.children.insert(key, leaf);
                }
            }
        }
    }

    /// Drop top-level keys rejected by `keep`.
    pub fn keep_if<F>(&mut self, mut keep: F)
    where
        F: FnMut(&str) -> bool,
    {
        self.children.retain(|key, _| keep(key));
    }

    pub fn remove(&mut self, key: &str) -> Option<TraceNode> {
        self.children.remove(key)
    }

    pub fn clear(&mut self) {
        self.children.clear();
    }

    /// Dotted leaf paths paired with their origins, in key order.
    pub fn leaves(&self) -> Vec<(String, &Origin)> {
        let mut out = Vec::new();
        self.leaves_into(None, &mut out);
        out
    }

    fn leaves_into<'a>(&'a self, prefix: Option<&str>, out: &mut Vec<(String, &'a Origin)>) {
        for (key, node) in &self.children {
            let path = match prefix {
                Some(prefix) => format!("{prefix}.{key}"),
                None => key.clone(),
            };
            match node {
                TraceNode::Branch(tree) => tree.leaves_into(Some(&path), out),
                TraceNode::Leaf { origin, .. } => out.push((path, origin)),
            }
        }
    }

    /// The branch at `key`, created (or replacing a leaf) when needed.
    fn branch_mut(&mut self, key: &str) -> &mut TraceTree {
        let node = self
            .children
            .entry(key.to_string())
            .or_insert_with(|| TraceNode::Branch(TraceTree::new()));
        if !node.is_branch() {
            *node = TraceNode::Branch(TraceTree::new());
        }
        match node {
            TraceNode::Branch(tree) => tree,
            TraceNode::Leaf { .. } => unreachable!("node was just replaced with a branch"),
        }
    }
}

impl Serialize for TraceTree {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.children.len()))?;
        for (key, node) in &self.children {
            map.serialize_entry(key, node)?;
        }
        map.end()
    }
}

/// Stack of capture scopes for one resolution pass.
///
/// While a scope is open, recording calls write into the innermost one.
/// With tracing disabled every call is a no-op and scopes yield `None`.
#[derive(Debug, Default)]
pub struct Tracer {
    enabled: bool,
    stack: Vec<TraceTree>,
}

impl Tracer {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            stack: Vec::new(),
        }
    }

    pub fn disabled() -> Self {
        Self::new(false)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// True when a scope is open and recording calls take effect.
    pub fn is_active(&self) -> bool {
        self.enabled && !self.stack.is_empty()
    }

    pub fn open_scope(&mut self) {
        if self.enabled {
            self.stack.push(TraceTree::new());
        }
    }

    pub fn close_scope(&mut self) -> Option<TraceTree> {
        if !self.enabled {
            return None;
        }
        self.stack.pop()
    }

    /// Run `f` inside a fresh scope and return its result with the
    /// captured trace. The scope is closed even when `f` fails.
    pub fn capture<T, F>(&mut self, f: F) -> (T, Option<TraceTree>)
    where
        F: FnOnce(&mut Tracer) -> T,
    {
        self.open_scope();
        let result = f(self);
        let trace = self.close_scope();
        (result, trace)
    }

    pub fn trace_value<S: AsRef<str>>(
        &mut self,
        value: &Value,
        path: &[S],
        key: &str,
        origin: &Origin,
    ) {
        if let Some(current) = self.current_mut() {
            current.record_value(value, path, key, origin);
        }
    }

    pub fn trace_map(&mut self, map: &Map, origin: &Origin) {
        if let Some(current) = self.current_mut() {
            current.merge_values(map, origin);
        }
    }

    pub fn trace_merge(&mut self, other: TraceTree) {
        if let Some(current) = self.current_mut() {
            current.merge(other);
        }
    }

    fn current_mut(&mut self) -> Option<&mut TraceTree> {
        if !self.enabled {
            return None;
        }
        self.stack.last_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::map_from_json;
    use serde_json::json;

    #[test]
    fn test_merge_values_mirrors_map_shape() {
        let map = map_from_json(json!({"host": "x", "db": {"port": 1, "opts": {"ssl": true}}}));
        let trace = TraceTree::from_values(&map, &Origin::defaults());

        let paths: Vec<String> = trace.leaves().into_iter().map(|(p, _)| p).collect();
        assert_eq!(paths, vec!["db.opts.ssl", "db.port", "host"]);
        assert_eq!(
            trace.dig(&["db", "port"]).and_then(TraceNode::origin),
            Some(&Origin::defaults())
        );
    }

    #[test]
    fn test_record_value_replaces_existing_leaf() {
        let mut trace = TraceTree::from_values(
            &map_from_json(json!({"db": {"host": "a"}})),
            &Origin::defaults(),
        );
        trace.record_value(&Value::from("b"), &["db"], "host", &Origin::load());

        assert_eq!(
            trace.dig(&["db", "host"]),
            Some(&TraceNode::leaf("b".into(), Origin::load()))
        );
    }

    #[test]
    fn test_record_branch_value_replaces_sub_trace() {
        let mut trace = TraceTree::from_values(
            &map_from_json(json!({"db": {"host": "a", "port": 1}})),
            &Origin::defaults(),
        );
        let replacement = Value::Map(map_from_json(json!({"host": "b"})));
        let empty: [&str; 0] = [];
        trace.record_value(&replacement, &empty, "db", &Origin::load());

        assert!(trace.dig(&["db", "port"]).is_none());
        assert_eq!(
            trace.dig(&["db", "host"]).and_then(TraceNode::origin),
            Some(&Origin::load())
        );
    }

    #[test]
    fn test_merge_overlays_branches() {
        let mut base = TraceTree::from_values(
            &map_from_json(json!({"a": 1, "b": {"c": 2, "d": 3}})),
            &Origin::defaults(),
        );
        let other = TraceTree::from_values(
            &map_from_json(json!({"b": {"c": 9}})),
            &Origin::remote("doppler", "api", "B_C"),
        );
        base.merge(other);

        assert_eq!(
            base.dig(&["b", "c"]).and_then(TraceNode::origin),
            Some(&Origin::remote("doppler", "api", "B_C"))
        );
        assert_eq!(
            base.dig(&["b", "d"]).and_then(TraceNode::origin),
            Some(&Origin::defaults())
        );
        assert_eq!(base.get("a").and_then(TraceNode::origin), Some(&Origin::defaults()));
    }

    #[test]
    fn test_keep_if_drops_unknown_keys() {
        let mut trace = TraceTree::from_values(
            &map_from_json(json!({"known": 1, "stray": 2})),
            &Origin::defaults(),
        );
        trace.keep_if(|key| key == "known");
        assert_eq!(trace.keys().collect::<Vec<_>>(), vec!["known"]);
    }

    #[test]
    fn test_nested_capture_scopes() {
        let mut tracer = Tracer::new(true);
        let ((), outer) = tracer.capture(|tracer| {
            tracer.trace_map(&map_from_json(json!({"a": 1})), &Origin::defaults());
            let ((), inner) = tracer.capture(|tracer| {
                tracer.trace_map(&map_from_json(json!({"b": 2})), &Origin::new("inner"));
            });
            tracer.trace_merge(inner.unwrap());
        });

        let outer = outer.unwrap();
        assert_eq!(outer.get("a").and_then(TraceNode::origin), Some(&Origin::defaults()));
        assert_eq!(
            outer.get("b").and_then(TraceNode::origin),
            Some(&Origin::new("inner"))
        );
        assert!(!tracer.is_active());
    }

    #[test]
    fn test_disabled_tracer_is_noop() {
        let mut tracer = Tracer::disabled();
        let (value, trace) = tracer.capture(|tracer| {
            tracer.trace_map(&map_from_json(json!({"a": 1})), &Origin::defaults());
            42
        });
        assert_eq!(value, 42);
        assert!(trace.is_none());
    }

    #[test]
    fn test_recording_outside_scope_is_ignored() {
        let mut tracer = Tracer::new(true);
        tracer.trace_map(&map_from_json(json!({"a": 1})), &Origin::defaults());
        assert!(!tracer.is_active());
        assert!(tracer.close_scope().is_none());
    }

    #[test]
    fn test_serializes_leaves_with_source() {
        let mut trace = TraceTree::new();
        trace.record_value(
            &Value::from("john"),
            &["user"],
            "name",
            &Origin::env("APP_USER__NAME"),
        );
        trace.record_value(
            &Value::Integer(1),
            &[] as &[&str],
            "port",
            &Origin::file("yml", "config/app.yml"),
        );

        assert_eq!(
            serde_json::to_value(&trace).unwrap(),
            json!({
                "port": {"value": 1, "source": {"type": "yml", "path": "config/app.yml"}},
                "user": {
                    "name": {"value": "john", "source": {"type": "env", "key": "APP_USER__NAME"}}
                }
            })
        );
    }

    #[test]
    fn test_accessor_origin_records_call_site() {
        let origin = Origin::accessor(std::panic::Location::caller());
        assert_eq!(origin.source, SOURCE_ACCESSOR);
        assert!(matches!(origin.locator, Locator::CallSite { line, .. } if line > 0));
    }
}
