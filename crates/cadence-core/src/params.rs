//! Action parameters.
//!
//! Parameters are JSON values. Identity between parameter values is
//! structural: [`ParamsKey`] is a canonical encoding (object keys sorted,
//! no whitespace) so deeply equal values produce equal keys regardless of
//! how the map was built.

use serde_json::Value;
use std::fmt;

/// Parameters bound to an action.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Params {
    /// The "no params" sentinel carried by root actions.
    #[default]
    Unset,
    /// A concrete parameter value.
    Value(Value),
}

impl Params {
    /// Whether this is the "no params" sentinel.
    pub fn is_unset(&self) -> bool {
        matches!(self, Params::Unset)
    }

    /// The value, if set.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Params::Unset => None,
            Params::Value(v) => Some(v),
        }
    }

    /// The value, or JSON null for the sentinel.
    pub fn to_value(&self) -> Value {
        self.as_value().cloned().unwrap_or(Value::Null)
    }

    /// Structural identity key.
    pub fn key(&self) -> ParamsKey {
        match self {
            Params::Unset => ParamsKey(String::from("#unset")),
            Params::Value(v) => ParamsKey::of(v),
        }
    }
}

impl From<Value> for Params {
    fn from(value: Value) -> Self {
        Params::Value(value)
    }
}

impl fmt::Display for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Params::Unset => Ok(()),
            Params::Value(v) => f.write_str(&canonical(v)),
        }
    }
}

/// Canonical structural key of a parameter value.
///
/// Two keys are equal exactly when the values are equal as `serde_json`
/// values. Numbers keep their representation: `1` and `1.0` are different
/// values and bind to different children. Callers that mix integer and
/// float encodings of the same quantity should normalize before binding.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamsKey(String);

impl ParamsKey {
    /// Key for a JSON value.
    pub fn of(value: &Value) -> Self {
        ParamsKey(canonical(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParamsKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn canonical(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                if let Some(v) = map.get(key) {
                    write_canonical(v, out);
                }
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Whether a value is a scalar (not an object or array).
pub fn is_primitive(value: &Value) -> bool {
    !matches!(value, Value::Object(_) | Value::Array(_))
}

/// Deep merge `source` into `target`.
///
/// Objects merge key-wise and arrays merge index-wise, recursively. Keys or
/// indices present on only one side are carried through; for any other
/// overlap the source value wins. Returns whether `target` changed.
pub fn merge_into(target: &mut Value, source: &Value) -> bool {
    match (target, source) {
        (Value::Object(target_obj), Value::Object(source_obj)) => {
            let mut changed = false;
            for (key, source_value) in source_obj {
                match target_obj.get_mut(key) {
                    Some(target_value) => {
                        changed |= merge_into(target_value, source_value);
                    }
                    None => {
                        target_obj.insert(key.clone(), source_value.clone());
                        changed = true;
                    }
                }
            }
            changed
        }
        (Value::Array(target_items), Value::Array(source_items)) => {
            let mut changed = false;
            for (i, source_item) in source_items.iter().enumerate() {
                match target_items.get_mut(i) {
                    Some(target_item) => changed |= merge_into(target_item, source_item),
                    None => {
                        target_items.push(source_item.clone());
                        changed = true;
                    }
                }
            }
            changed
        }
        (target, source) => {
            if *target == *source {
                false
            } else {
                *target = source.clone();
                true
            }
        }
    }
}

/// Deep merge returning a new value.
pub fn merged(base: &Value, overlay: &Value) -> Value {
    let mut out = base.clone();
    merge_into(&mut out, overlay);
    out
}

/// Merge `overlay` over parent params. The sentinel contributes nothing.
pub fn merge_with_parent(parent: &Params, overlay: &Value) -> Value {
    match parent {
        Params::Value(base) if !is_primitive(base) => merged(base, overlay),
        _ => overlay.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_ignores_insertion_order() {
        let mut a = serde_json::Map::new();
        a.insert("b".into(), json!(2));
        a.insert("a".into(), json!(1));
        let b = json!({"a": 1, "b": 2});
        assert_eq!(ParamsKey::of(&Value::Object(a)), ParamsKey::of(&b));
    }

    #[test]
    fn test_key_distinguishes_types() {
        assert_ne!(ParamsKey::of(&json!(1)), ParamsKey::of(&json!("1")));
        assert_ne!(Params::Unset.key(), Params::Value(Value::Null).key());
    }

    #[test]
    fn test_key_keeps_number_representation() {
        assert_ne!(json!(1), json!(1.0));
        assert_ne!(ParamsKey::of(&json!({"id": 1})), ParamsKey::of(&json!({"id": 1.0})));
        assert_eq!(ParamsKey::of(&json!({"id": 1.5})), ParamsKey::of(&json!({"id": 1.5})));
    }

    #[test]
    fn test_merge_nested_objects_and_arrays() {
        let base = json!({"page": 1, "filter": {"tag": "a", "limit": 10}, "ids": [1, {"x": 1}]});
        let overlay = json!({"filter": {"tag": "b"}, "ids": [5, {"y": 2}, 9], "extra": true});
        let out = merged(&base, &overlay);
        assert_eq!(
            out,
            json!({
                "page": 1,
                "filter": {"tag": "b", "limit": 10},
                "ids": [5, {"x": 1, "y": 2}, 9],
                "extra": true
            })
        );
    }

    #[test]
    fn test_merge_into_reports_change() {
        let mut v = json!({"a": {"b": 1}});
        assert!(!merge_into(&mut v, &json!({"a": {"b": 1}})));
        assert!(merge_into(&mut v, &json!({"a": {"c": 2}})));
        assert_eq!(v, json!({"a": {"b": 1, "c": 2}}));
    }

    #[test]
    fn test_merge_with_unset_parent() {
        let out = merge_with_parent(&Params::Unset, &json!({"id": 1}));
        assert_eq!(out, json!({"id": 1}));
    }

    #[test]
    fn test_display() {
        assert_eq!(Params::Unset.to_string(), "");
        assert_eq!(
            Params::Value(json!({"b": 1, "a": "x"})).to_string(),
            r#"{"a":"x","b":1}"#
        );
    }
}
