//! JSON text rendering of snapshot documents.
//!
//! The binary document and the JSON text carry the same tree; JSON is
//! for human eyes and interoperability, the binary form for fidelity
//! (it keeps exact scalar widths, which JSON numbers do not).

use herd_core::value::Value;

use crate::error::SnapshotError;

/// Convert a document into a `serde_json` tree.
///
/// Unsigned and signed integers map to JSON numbers; an `f32` widens to
/// `f64`. Non-finite floats render as null, which JSON cannot express.
pub fn to_json(value: &Value) -> serde_json::Value {
    use serde_json::Value as J;
    match value {
        Value::Null => J::Null,
        Value::Bool(b) => J::Bool(*b),
        Value::I8(v) => J::from(*v),
        Value::I16(v) => J::from(*v),
        Value::I32(v) => J::from(*v),
        Value::I64(v) => J::from(*v),
        Value::U8(v) => J::from(*v),
        Value::U16(v) => J::from(*v),
        Value::U32(v) => J::from(*v),
        Value::U64(v) => J::from(*v),
        Value::F32(v) => serde_json::Number::from_f64(f64::from(*v))
            .map(J::Number)
            .unwrap_or(J::Null),
        Value::F64(v) => serde_json::Number::from_f64(*v)
            .map(J::Number)
            .unwrap_or(J::Null),
        Value::Str(s) => J::String(s.clone()),
        Value::Array(items) => J::Array(items.iter().map(to_json).collect()),
        Value::Object(map) => J::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), to_json(v)))
                .collect(),
        ),
    }
}

/// Convert a `serde_json` tree into a document.
///
/// JSON numbers become `I64`, `U64`, or `F64` by representability.
pub fn from_json(value: &serde_json::Value) -> Value {
    use serde_json::Value as J;
    match value {
        J::Null => Value::Null,
        J::Bool(b) => Value::Bool(*b),
        J::Number(n) => {
            if let Some(v) = n.as_i64() {
                Value::I64(v)
            } else if let Some(v) = n.as_u64() {
                Value::U64(v)
            } else {
                Value::F64(n.as_f64().unwrap_or(0.0))
            }
        }
        J::String(s) => Value::Str(s.clone()),
        J::Array(items) => Value::Array(items.iter().map(from_json).collect()),
        J::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), from_json(v)))
                .collect(),
        ),
    }
}

/// Render a document as pretty-printed JSON text.
pub fn to_json_string_pretty(value: &Value) -> Result<String, SnapshotError> {
    Ok(serde_json::to_string_pretty(&to_json(value))?)
}

/// Parse JSON text into a document.
pub fn from_json_str(text: &str) -> Result<Value, SnapshotError> {
    Ok(from_json(&serde_json::from_str(text)?))
}
