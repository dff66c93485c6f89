//! # AutoCast
//!
//! Heuristic string-to-value inference used whenever no explicit coercion
//! rule is declared for an attribute.
//!
//! Rules apply in order, first match wins:
//! 1. array: a comma-separated list that does not start or end with a quote
//! 2. `true|t|yes|y` (any case) => `true`
//! 3. `false|f|no|n` (any case) => `false`
//! 4. `nil|null` (any case) => null
//! 5. all digits => integer
//! 6. `digits? . digits` => float
//! 7. wrapped in matching quotes => the inner string
//! 8. anything else is returned unchanged

use std::sync::LazyLock;

use regex::Regex;

use crate::value::Value;

static ARRAY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^[^'"].*\s*,\s*.*[^'"]$"#).expect("valid array regex"));
static SPLIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*,\s*").expect("valid split regex"));
static TRUE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(true|t|yes|y)$").expect("valid true regex"));
static FALSE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(false|f|no|n)$").expect("valid false regex"));
static NULL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(nil|null)$").expect("valid null regex"));
static INTEGER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]+$").expect("valid integer regex"));
static FLOAT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]*\.[0-9]+$").expect("valid float regex"));

/// Infer a typed value from a raw string.
pub fn auto_cast(raw: &str) -> Value {
    if ARRAY_RE.is_match(raw) {
        return Value::Array(split_list(raw).map(auto_cast).collect());
    }
    if TRUE_RE.is_match(raw) {
        return Value::Bool(true);
    }
    if FALSE_RE.is_match(raw) {
        return Value::Bool(false);
    }
    if NULL_RE.is_match(raw) {
        return Value::Null;
    }
    if INTEGER_RE.is_match(raw) {
        if let Ok(int) = raw.parse::<i64>() {
            return Value::Integer(int);
        }
    }
    if FLOAT_RE.is_match(raw) {
        if let Ok(float) = raw.parse::<f64>() {
            return Value::Float(float);
        }
    }
    if let Some(inner) = unquote(raw) {
        return Value::String(inner.to_string());
    }
    Value::String(raw.to_string())
}

/// Cast string values; every other value passes through unchanged.
pub fn auto_cast_value(value: Value) -> Value {
    match value {
        Value::String(raw) => auto_cast(&raw),
        other => other,
    }
}

/// Split a comma-separated list, trimming whitespace around the commas.
pub fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    SPLIT_RE.split(raw)
}

fn unquote(raw: &str) -> Option<&str> {
    let first = raw.chars().next()?;
    if raw.len() < 2 || !matches!(first, '\'' | '"') || !raw.ends_with(first) {
        return None;
    }
    Some(&raw[1..raw.len() - 1])
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_arrays() {
        assert_eq!(
            auto_cast("1,2, 3"),
            Value::Array(vec![1.into(), 2.into(), 3.into()])
        );
        assert_eq!(
            auto_cast("meta, kotleta"),
            Value::Array(vec!["meta".into(), "kotleta".into()])
        );
        assert_eq!(
            auto_cast("yes, 1.5,null"),
            Value::Array(vec![true.into(), 1.5.into(), Value::Null])
        );
    }

    #[test]
    fn test_quoted_commas_are_not_split() {
        assert_eq!(auto_cast("'a,b'"), Value::from("a,b"));
        assert_eq!(
            auto_cast(r#""C'mon, everybody""#),
            Value::from("C'mon, everybody")
        );
    }

    #[test]
    fn test_booleans() {
        for raw in ["true", "T", "yes", "Y", "TRUE"] {
            assert_eq!(auto_cast(raw), Value::Bool(true), "{raw}");
        }
        for raw in ["false", "f", "NO", "n"] {
            assert_eq!(auto_cast(raw), Value::Bool(false), "{raw}");
        }
        assert_eq!(auto_cast("truthy"), Value::from("truthy"));
    }

    #[test]
    fn test_nulls() {
        assert_eq!(auto_cast("nil"), Value::Null);
        assert_eq!(auto_cast("NULL"), Value::Null);
    }

    #[test]
    fn test_numbers() {
        assert_eq!(auto_cast("42"), Value::Integer(42));
        assert_eq!(auto_cast("2.25"), Value::Float(2.25));
        assert_eq!(auto_cast(".5"), Value::Float(0.5));
        assert_eq!(auto_cast("1.2.3"), Value::from("1.2.3"));
        assert_eq!(auto_cast("-1"), Value::from("-1"));
    }

    #[test]
    fn test_integer_overflow_stays_string() {
        let huge = "99999999999999999999999";
        assert_eq!(auto_cast(huge), Value::from(huge));
    }

    #[test]
    fn test_quoted_numbers_stay_strings() {
        assert_eq!(auto_cast("'42'"), Value::from("42"));
        assert_eq!(auto_cast("\"true\""), Value::from("true"));
    }

    #[test]
    fn test_mismatched_quotes_are_kept() {
        assert_eq!(auto_cast("'abc\""), Value::from("'abc\""));
        assert_eq!(auto_cast("'"), Value::from("'"));
    }

    #[test]
    fn test_fallback_returns_original() {
        assert_eq!(auto_cast("red"), Value::from("red"));
        assert_eq!(auto_cast(""), Value::from(""));
    }

    proptest! {
        #[test]
        fn test_non_strings_pass_through(i in any::<i64>(), b in any::<bool>()) {
            prop_assert_eq!(auto_cast_value(Value::Integer(i)), Value::Integer(i));
            prop_assert_eq!(auto_cast_value(Value::Bool(b)), Value::Bool(b));
            let arr = Value::Array(vec![Value::from("1"), Value::Integer(i)]);
            prop_assert_eq!(auto_cast_value(arr.clone()), arr);
        }

        #[test]
        fn test_digit_strings_become_integers(n in 0u32..1_000_000) {
            prop_assert_eq!(auto_cast(&n.to_string()), Value::Integer(i64::from(n)));
        }
    }
}
