// ── Loose-value coercion ──
//
// Vendor payloads mix "1", 1 and true for the same flag, and numeric
// strings for readings. Known sensor fields are coerced to one JSON type
// before they reach the cache; values that cannot be coerced are dropped
// so the cached value survives.

use serde_json::{Map, Number, Value};

/// Target type of a known sensor field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Int,
    Float,
    Bool,
}

const INT_FIELDS: &[&str] = &[
    "alarmStatus",
    "batInfo",
    "coPpm",
    "coLevel",
    "rfLevel",
    "wifiRssi",
    "muteStatus",
];
const FLOAT_FIELDS: &[&str] = &["temperature", "humidity"];
const BOOL_FIELDS: &[&str] = &["isOpen", "isMoved", "onLine", "online", "isLifeEnd"];

/// Minified keys inside a raw `status` object.
const STATUS_ALIASES: &[(&str, &str)] = &[
    ("a", "alarmStatus"),
    ("b", "temperature"),
    ("c", "humidity"),
];

pub fn field_kind(key: &str) -> Option<FieldKind> {
    if INT_FIELDS.contains(&key) {
        Some(FieldKind::Int)
    } else if FLOAT_FIELDS.contains(&key) {
        Some(FieldKind::Float)
    } else if BOOL_FIELDS.contains(&key) {
        Some(FieldKind::Bool)
    } else {
        None
    }
}

// ── Scalar coercion ──────────────────────────────────────────────────

/// `1`, `"1"`, `true`, `"on"`, `"yes"` are true; their opposites false.
pub fn to_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f == 1.0 => Some(true),
            Some(f) if f == 0.0 => Some(false),
            _ => None,
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "on" | "yes" => Some(true),
            "0" | "false" | "off" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Leading integer of a number or numeric string (`"3.7"` is 3).
#[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
pub fn to_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
        Value::String(s) => numeric_prefix(s, false)?.parse().ok(),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

/// Leading decimal of a number or numeric string (`"21.5C"` is 21.5).
pub fn to_float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => numeric_prefix(s, true)?.parse().ok(),
        _ => None,
    }
}

/// Longest prefix of `s` (after leading whitespace) that forms a number.
fn numeric_prefix(s: &str, fraction: bool) -> Option<&str> {
    let s = s.trim_start();
    let bytes = s.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end = 1;
    }
    let int_start = end;
    while bytes.get(end).is_some_and(u8::is_ascii_digit) {
        end += 1;
    }
    let mut digits = end - int_start;
    if fraction && bytes.get(end) == Some(&b'.') {
        let mut frac_end = end + 1;
        while bytes.get(frac_end).is_some_and(u8::is_ascii_digit) {
            frac_end += 1;
        }
        if frac_end > end + 1 {
            digits += frac_end - end - 1;
            end = frac_end;
        }
    }
    (digits > 0).then(|| s.get(..end)).flatten()
}

/// Coerce `value` to the JSON type of `kind`.
pub fn coerce(kind: FieldKind, value: &Value) -> Option<Value> {
    match kind {
        FieldKind::Int => to_int(value).map(Value::from),
        FieldKind::Float => to_float(value)
            .and_then(Number::from_f64)
            .map(Value::Number),
        FieldKind::Bool => to_bool(value).map(Value::Bool),
    }
}

// ── Update maps ──────────────────────────────────────────────────────

/// Coerce every known field of an incoming update.
///
/// Nulls and uncoercible known fields are removed, so merging the result
/// never erases a previously known value.
pub fn sanitize_update(update: Map<String, Value>) -> Map<String, Value> {
    update
        .into_iter()
        .filter_map(|(key, value)| {
            if value.is_null() {
                return None;
            }
            match field_kind(&key) {
                Some(kind) => coerce(kind, &value).map(|v| (key, v)),
                None => Some((key, value)),
            }
        })
        .collect()
}

/// Copy a nested `status` object onto the top level.
///
/// Plain status keys never override keys already present at the top
/// level. The minified `a`/`b`/`c` keys always map onto their named
/// fields. The raw `status` object is kept.
pub fn lift_status(update: &mut Map<String, Value>) {
    let Some(Value::Object(status)) = update.get("status").cloned() else {
        return;
    };
    for (key, value) in &status {
        if STATUS_ALIASES.iter().any(|(alias, _)| alias == key) {
            continue;
        }
        if !update.contains_key(key) {
            update.insert(key.clone(), value.clone());
        }
    }
    for (alias, field) in STATUS_ALIASES {
        if let Some(value) = status.get(*alias).filter(|v| !v.is_null()) {
            update.insert((*field).to_owned(), value.clone());
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn bool_spellings() {
        for v in [json!(1), json!("1"), json!(true), json!("true"), json!(" ON "), json!("yes")] {
            assert_eq!(to_bool(&v), Some(true), "{v}");
        }
        for v in [json!(0), json!("0"), json!(false), json!("off"), json!("No")] {
            assert_eq!(to_bool(&v), Some(false), "{v}");
        }
        assert_eq!(to_bool(&json!("maybe")), None);
        assert_eq!(to_bool(&json!(2)), None);
    }

    #[test]
    fn int_takes_leading_digits() {
        assert_eq!(to_int(&json!("3")), Some(3));
        assert_eq!(to_int(&json!("3.7")), Some(3));
        assert_eq!(to_int(&json!(" -42dBm")), Some(-42));
        assert_eq!(to_int(&json!(2.9)), Some(2));
        assert_eq!(to_int(&json!("abc")), None);
        assert_eq!(to_int(&json!("")), None);
    }

    #[test]
    fn float_takes_leading_decimal() {
        assert_eq!(to_float(&json!("21.5")), Some(21.5));
        assert_eq!(to_float(&json!("21.5C")), Some(21.5));
        assert_eq!(to_float(&json!(".5")), Some(0.5));
        assert_eq!(to_float(&json!("7.")), Some(7.0));
        assert_eq!(to_float(&json!("-")), None);
        assert_eq!(to_float(&json!(null)), None);
    }

    #[test]
    fn sanitize_coerces_known_and_keeps_unknown() {
        let out = sanitize_update(map(json!({
            "batInfo": "3",
            "onLine": "1",
            "temperature": "19.25",
            "firmware": "1.6.9",
            "coPpm": "n/a",
            "humidity": null,
        })));
        assert_eq!(
            Value::Object(out),
            json!({
                "batInfo": 3,
                "onLine": true,
                "temperature": 19.25,
                "firmware": "1.6.9",
            })
        );
    }

    #[test]
    fn lift_status_maps_minified_keys() {
        let mut update = map(json!({
            "rfLevel": "2",
            "status": { "a": "0", "b": "21.0", "c": "29.6", "rfLevel": "1", "d": "1" }
        }));
        lift_status(&mut update);
        assert_eq!(update["alarmStatus"], "0");
        assert_eq!(update["temperature"], "21.0");
        assert_eq!(update["humidity"], "29.6");
        assert_eq!(update["rfLevel"], "2");
        assert_eq!(update["d"], "1");
        assert!(update["status"].is_object());
    }

    #[test]
    fn lift_status_without_status_is_noop() {
        let mut update = map(json!({ "batInfo": "3" }));
        lift_status(&mut update);
        assert_eq!(update.len(), 1);
    }
}
