//! # Type Casting
//!
//! Explicit per-attribute coercion. A [`TypeRegistry`] maps type ids to
//! casters; a tree of [`CoercionRule`]s, declared on the schema, says which
//! caster applies to which attribute. Attributes without a rule fall back
//! to [`auto_cast`](crate::auto_cast::auto_cast_value).

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, LazyLock};

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use errors::CoercionError;
use regex::Regex;
use url::Url;

use crate::auto_cast::{auto_cast, auto_cast_value, split_list};
use crate::value::Value;

static TRUTHY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(true|t|yes|y|1)$").expect("valid boolean regex"));

/// Converts a raw value into a typed one.
pub trait Caster: Send + Sync {
    fn cast(&self, raw: &Value) -> Result<Value, CoercionError>;
}

impl<F> Caster for F
where
    F: Fn(&Value) -> Result<Value, CoercionError> + Send + Sync,
{
    fn cast(&self, raw: &Value) -> Result<Value, CoercionError> {
        self(raw)
    }
}

/// Reference to a caster: a registered type id or an inline caster.
#[derive(Clone)]
pub enum TypeRef {
    Named(String),
    Custom(Arc<dyn Caster>),
}

impl TypeRef {
    pub fn custom<C: Caster + 'static>(caster: C) -> Self {
        TypeRef::Custom(Arc::new(caster))
    }
}

impl fmt::Debug for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Named(name) => write!(f, "{name}"),
            TypeRef::Custom(_) => f.write_str("<custom>"),
        }
    }
}

impl From<&str> for TypeRef {
    fn from(name: &str) -> Self {
        TypeRef::Named(name.to_string())
    }
}

/// Coercion rules keyed by attribute (or nested key) name.
pub type Rules = BTreeMap<String, CoercionRule>;

/// One node of a coercion-rule tree.
#[derive(Clone, Debug)]
pub enum CoercionRule {
    /// Cast the value with a single caster.
    Type(TypeRef),
    /// Treat the value as a list; strings are split on commas. Elements are
    /// cast with `ty`, or auto-cast when `ty` is `None`.
    Array { ty: Option<TypeRef> },
    /// Apply nested rules to a map-shaped value.
    Nested(Rules),
}

impl CoercionRule {
    pub fn of(type_id: impl Into<TypeRef>) -> Self {
        CoercionRule::Type(type_id.into())
    }

    pub fn array_of(type_id: impl Into<TypeRef>) -> Self {
        CoercionRule::Array {
            ty: Some(type_id.into()),
        }
    }

    pub fn array() -> Self {
        CoercionRule::Array { ty: None }
    }

    pub fn nested<K, I>(rules: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, CoercionRule)>,
    {
        CoercionRule::Nested(rules.into_iter().map(|(k, r)| (k.into(), r)).collect())
    }
}

/// Mapping from type ids to casters.
#[derive(Clone)]
pub struct TypeRegistry {
    casters: HashMap<String, Arc<dyn Caster>>,
}

impl Default for TypeRegistry {
    /// Registry with the built-in types: `string`, `integer`, `float`,
    /// `date`, `datetime`, `uri` and `boolean`.
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.accept("string", cast_string);
        registry.accept("integer", cast_integer);
        registry.accept("float", cast_float);
        registry.accept("date", cast_date);
        registry.accept("datetime", cast_datetime);
        registry.accept("uri", cast_uri);
        registry.accept("boolean", cast_boolean);
        registry
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.casters.keys().collect();
        names.sort();
        f.debug_struct("TypeRegistry").field("types", &names).finish()
    }
}

impl TypeRegistry {
    pub fn empty() -> Self {
        Self {
            casters: HashMap::new(),
        }
    }

    /// Register (or replace) the caster for `name`.
    pub fn accept<C: Caster + 'static>(&mut self, name: impl Into<String>, caster: C) {
        self.casters.insert(name.into(), Arc::new(caster));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.casters.contains_key(name)
    }

    /// Cast `raw` with the caster `ty` refers to. `Null` is never cast.
    pub fn deserialize(&self, raw: Value, ty: &TypeRef) -> Result<Value, CoercionError> {
        let caster = self.resolve(ty)?;
        if raw.is_null() {
            return Ok(raw);
        }
        caster.cast(&raw)
    }

    /// Cast every element of a list-shaped `raw`. Strings are split on
    /// commas; a lone scalar becomes a one-element list.
    pub fn deserialize_array(
        &self,
        raw: Value,
        ty: Option<&TypeRef>,
    ) -> Result<Value, CoercionError> {
        let caster = ty.map(|ty| self.resolve(ty)).transpose()?;

        let elements: Vec<Value> = match raw {
            Value::Null => return Ok(Value::Null),
            Value::String(s) => split_list(&s)
                .map(|part| Value::String(part.to_string()))
                .collect(),
            Value::Array(items) => items,
            other => vec![other],
        };

        elements
            .into_iter()
            .map(|element| match &caster {
                Some(caster) if !element.is_null() => caster.cast(&element),
                Some(_) => Ok(element),
                None => Ok(auto_cast_value(element)),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array)
    }

    fn resolve(&self, ty: &TypeRef) -> Result<Arc<dyn Caster>, CoercionError> {
        match ty {
            TypeRef::Named(name) => {
                self.casters
                    .get(name)
                    .cloned()
                    .ok_or_else(|| CoercionError::UnknownType {
                        type_id: name.clone(),
                    })
            }
            TypeRef::Custom(caster) => Ok(Arc::clone(caster)),
        }
    }
}

/// Applies a rule tree to attribute values.
pub struct TypeCaster<'a> {
    rules: &'a Rules,
    registry: &'a TypeRegistry,
    auto_cast: bool,
}

impl<'a> TypeCaster<'a> {
    pub fn new(rules: &'a Rules, registry: &'a TypeRegistry, auto_cast: bool) -> Self {
        Self {
            rules,
            registry,
            auto_cast,
        }
    }

    /// Coerce the value of the top-level attribute `key`.
    pub fn coerce(&self, key: &str, value: Value) -> Result<Value, CoercionError> {
        self.coerce_with(self.rules, key, value)
    }

    fn coerce_with(&self, rules: &Rules, key: &str, value: Value) -> Result<Value, CoercionError> {
        let Some(rule) = rules.get(key) else {
            return Ok(self.fallback(value));
        };

        match rule {
            CoercionRule::Type(ty) => self.registry.deserialize(value, ty),
            CoercionRule::Array { ty } => self.registry.deserialize_array(value, ty.as_ref()),
            CoercionRule::Nested(nested) => match value {
                Value::Map(mut map) => {
                    for child in nested.keys() {
                        if let Some(raw) = map.remove(child) {
                            let coerced = self.coerce_with(nested, child, raw)?;
                            map.insert(child.clone(), coerced);
                        }
                    }
                    Ok(Value::Map(map))
                }
                other => Ok(other),
            },
        }
    }

    fn fallback(&self, value: Value) -> Value {
        if self.auto_cast {
            auto_cast_value(value)
        } else {
            value
        }
    }
}

fn invalid(type_id: &str, raw: &Value, reason: impl Into<String>) -> CoercionError {
    CoercionError::InvalidValue {
        type_id: type_id.to_string(),
        value: raw.to_string(),
        reason: reason.into(),
    }
}

fn cast_string(raw: &Value) -> Result<Value, CoercionError> {
    Ok(match raw {
        Value::String(_) => raw.clone(),
        other => Value::String(other.to_string()),
    })
}

fn cast_integer(raw: &Value) -> Result<Value, CoercionError> {
    match raw {
        Value::Integer(_) => Ok(raw.clone()),
        Value::Float(f) => truncate_float(*f, raw),
        Value::String(s) => {
            let trimmed = s.trim();
            if let Ok(int) = trimmed.parse::<i64>() {
                return Ok(Value::Integer(int));
            }
            let f = trimmed
                .parse::<f64>()
                .map_err(|e| invalid("integer", raw, e.to_string()))?;
            truncate_float(f, raw)
        }
        other => Err(invalid("integer", raw, format!("unexpected {}", other.type_name()))),
    }
}

// i64::MAX as f64 rounds up to 2^63, so the upper bound is exclusive.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn truncate_float(f: f64, raw: &Value) -> Result<Value, CoercionError> {
    let truncated = f.trunc();
    if !truncated.is_finite() || truncated < i64::MIN as f64 || truncated >= i64::MAX as f64 {
        return Err(invalid("integer", raw, "out of range for a 64-bit integer"));
    }
    Ok(Value::Integer(truncated as i64))
}

fn cast_float(raw: &Value) -> Result<Value, CoercionError> {
    match raw {
        Value::Float(_) => Ok(raw.clone()),
        Value::Integer(i) => Ok(Value::Float(*i as f64)),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|e| invalid("float", raw, e.to_string())),
        other => Err(invalid("float", raw, format!("unexpected {}", other.type_name()))),
    }
}

fn cast_date(raw: &Value) -> Result<Value, CoercionError> {
    match raw {
        Value::Date(_) => Ok(raw.clone()),
        Value::DateTime(dt) => Ok(Value::Date(dt.date_naive())),
        Value::String(s) => {
            let s = s.trim();
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .or_else(|_| DateTime::parse_from_rfc3339(s).map(|dt| dt.date_naive()))
                .map(Value::Date)
                .map_err(|e| invalid("date", raw, e.to_string()))
        }
        other => Err(invalid("date", raw, format!("unexpected {}", other.type_name()))),
    }
}

fn cast_datetime(raw: &Value) -> Result<Value, CoercionError> {
    let utc = |naive: NaiveDateTime| -> DateTime<FixedOffset> {
        naive.and_utc().fixed_offset()
    };

    match raw {
        Value::DateTime(_) => Ok(raw.clone()),
        Value::Date(d) => Ok(Value::DateTime(utc(d.and_time(NaiveTime::MIN)))),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Ok(Value::DateTime(dt));
            }
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
                return Ok(Value::DateTime(utc(naive)));
            }
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map(|d| Value::DateTime(utc(d.and_time(NaiveTime::MIN))))
                .map_err(|e| invalid("datetime", raw, e.to_string()))
        }
        other => Err(invalid("datetime", raw, format!("unexpected {}", other.type_name()))),
    }
}

fn cast_uri(raw: &Value) -> Result<Value, CoercionError> {
    match raw {
        Value::Uri(_) => Ok(raw.clone()),
        Value::String(s) => Url::parse(s.trim())
            .map(Value::Uri)
            .map_err(|e| invalid("uri", raw, e.to_string())),
        other => Err(invalid("uri", raw, format!("unexpected {}", other.type_name()))),
    }
}

fn cast_boolean(raw: &Value) -> Result<Value, CoercionError> {
    match raw {
        Value::Bool(_) => Ok(raw.clone()),
        Value::Integer(i) => Ok(Value::Bool(*i == 1)),
        Value::String(s) => Ok(Value::Bool(TRUTHY_RE.is_match(s.trim()))),
        other => Err(invalid("boolean", raw, format!("unexpected {}", other.type_name()))),
    }
}

/// Auto-cast a raw environment string unless casting is disabled.
pub(crate) fn cast_env_string(raw: &str, auto_cast_enabled: bool) -> Value {
    if auto_cast_enabled {
        auto_cast(raw)
    } else {
        Value::String(raw.to_string())
    }
}
