//! Deep merge and dotted-path overrides on the dynamic config tree

use crate::{Error, Result};
use serde_json::{Map, Number, Value};

/// Merge `overlay` onto `base`.
///
/// Mappings merge key by key, recursively. Anything else in the overlay
/// (sequences, scalars, null) replaces the base value outright.
#[must_use]
pub fn deep_merge(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            let mut merged = base_map.clone();
            for (key, value) in overlay_map {
                let next = match merged.get(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value.clone(),
                };
                merged.insert(key.clone(), next);
            }
            Value::Object(merged)
        }
        (_, overlay) => overlay.clone(),
    }
}

/// Rebuild `value` with every mapping's keys in sorted order
#[must_use]
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// A parsed `dotted.path=literal` override
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Override {
    path: Vec<String>,
    literal: String,
}

impl Override {
    /// Parse `a.b.c=value`
    ///
    /// # Errors
    /// Returns error if `=` is missing or the path has an empty segment
    pub fn parse(text: &str) -> Result<Self> {
        let (path, literal) = text
            .split_once('=')
            .ok_or_else(|| Error::Config(format!("override '{text}' is not of the form key=value")))?;
        let path: Vec<String> = path.trim().split('.').map(str::to_string).collect();
        if path.iter().any(String::is_empty) {
            return Err(Error::Config(format!("override '{text}' has an empty path segment")));
        }
        Ok(Self {
            path,
            literal: literal.trim().to_string(),
        })
    }

    /// Dotted path
    #[must_use]
    pub fn path(&self) -> String {
        self.path.join(".")
    }

    /// Raw value text
    #[must_use]
    pub fn literal(&self) -> &str {
        &self.literal
    }

    /// Replace the value at the path, typed after the value it replaces
    ///
    /// # Errors
    /// Returns error if the path does not exist or the literal does not fit
    pub fn apply(&self, root: &mut Value) -> Result<()> {
        let mut current = root;
        for (depth, segment) in self.path.iter().enumerate() {
            current = current
                .as_object_mut()
                .and_then(|map| map.get_mut(segment))
                .ok_or_else(|| {
                    Error::Config(format!(
                        "override path '{}' does not exist (no '{}')",
                        self.path(),
                        self.path[..=depth].join(".")
                    ))
                })?;
        }
        let typed = coerce(current, &self.literal).map_err(|reason| {
            Error::Config(format!("override '{}={}': {reason}", self.path(), self.literal))
        })?;
        *current = typed;
        Ok(())
    }
}

fn coerce(existing: &Value, literal: &str) -> std::result::Result<Value, String> {
    match existing {
        Value::Bool(_) => parse_bool(literal).ok_or_else(|| "expected true or false".to_string()),
        Value::Number(n) if n.is_f64() => parse_float(literal).ok_or_else(|| "expected a number".to_string()),
        Value::Number(_) => parse_int(literal).ok_or_else(|| "expected an integer".to_string()),
        Value::String(_) => Ok(Value::String(literal.to_string())),
        Value::Array(_) | Value::Object(_) => {
            let parsed: Value =
                serde_json::from_str(literal).map_err(|e| format!("expected a JSON literal: {e}"))?;
            let same_kind = matches!(
                (existing, &parsed),
                (Value::Array(_), Value::Array(_)) | (Value::Object(_), Value::Object(_))
            );
            if same_kind {
                Ok(parsed)
            } else {
                Err("JSON literal does not match the existing value's type".to_string())
            }
        }
        Value::Null => Ok(infer(literal)),
    }
}

fn infer(literal: &str) -> Value {
    if let Some(v) = parse_int(literal) {
        return v;
    }
    if let Some(v) = parse_float(literal) {
        return v;
    }
    if let Some(v) = parse_bool(literal) {
        return v;
    }
    if literal.eq_ignore_ascii_case("null") || literal.eq_ignore_ascii_case("none") {
        return Value::Null;
    }
    Value::String(literal.to_string())
}

fn parse_int(literal: &str) -> Option<Value> {
    literal
        .parse::<i64>()
        .map(Value::from)
        .ok()
        .or_else(|| literal.parse::<u64>().map(Value::from).ok())
}

fn parse_float(literal: &str) -> Option<Value> {
    literal
        .parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
}

fn parse_bool(literal: &str) -> Option<Value> {
    if literal.eq_ignore_ascii_case("true") {
        Some(Value::Bool(true))
    } else if literal.eq_ignore_ascii_case("false") {
        Some(Value::Bool(false))
    } else {
        None
    }
}
