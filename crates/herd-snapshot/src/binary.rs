//! The tagged binary document encoding.
//!
//! A dialect of binary JSON: every value starts with a one-byte type
//! marker; multi-byte integers are little-endian. Strings are an
//! integer length followed by UTF-8 bytes; arrays and objects are
//! bracketed by open/close markers with object keys written as bare
//! length-prefixed strings. The encoding is self-describing — a reader
//! needs no schema.
//!
//! Markers: `Z` null, `T`/`F` booleans, `i` i8, `I` i16, `l` i32, `L`
//! i64, `U` u8, `u` u16, `m` u32, `M` u64, `d` f32, `D` f64, `S`
//! string, `[`/`]` array, `{`/`}` object.

use herd_core::codec::ByteReader;
use herd_core::error::CodecError;
use herd_core::value::Value;

use indexmap::IndexMap;

const M_NULL: u8 = b'Z';
const M_TRUE: u8 = b'T';
const M_FALSE: u8 = b'F';
const M_I8: u8 = b'i';
const M_I16: u8 = b'I';
const M_I32: u8 = b'l';
const M_I64: u8 = b'L';
const M_U8: u8 = b'U';
const M_U16: u8 = b'u';
const M_U32: u8 = b'm';
const M_U64: u8 = b'M';
const M_F32: u8 = b'd';
const M_F64: u8 = b'D';
const M_STR: u8 = b'S';
const M_ARR_OPEN: u8 = b'[';
const M_ARR_CLOSE: u8 = b']';
const M_OBJ_OPEN: u8 = b'{';
const M_OBJ_CLOSE: u8 = b'}';

/// Write a length using the smallest integer marker that fits.
fn write_length(out: &mut Vec<u8>, len: usize) {
    let len = len as u64;
    if len <= u8::MAX as u64 {
        out.push(M_U8);
        out.push(len as u8);
    } else if len <= u32::MAX as u64 {
        out.push(M_U32);
        out.extend_from_slice(&(len as u32).to_le_bytes());
    } else {
        out.push(M_U64);
        out.extend_from_slice(&len.to_le_bytes());
    }
}

fn read_length(r: &mut ByteReader<'_>) -> Result<usize, CodecError> {
    let marker = r.read_u8()?;
    let len = match marker {
        M_U8 => u64::from(r.read_u8()?),
        M_U16 => u64::from(r.read_u16_le()?),
        M_U32 => u64::from(r.read_u32_le()?),
        M_U64 => r.read_u64_le()?,
        M_I8 => {
            let v = r.read_u8()? as i8;
            u64::try_from(v).map_err(|_| CodecError::BadMarker { found: marker })?
        }
        found => return Err(CodecError::BadMarker { found }),
    };
    if len > r.remaining() as u64 {
        return Err(CodecError::LengthOverflow { len });
    }
    Ok(len as usize)
}

fn write_key(out: &mut Vec<u8>, key: &str) {
    write_length(out, key.len());
    out.extend_from_slice(key.as_bytes());
}

fn read_key(r: &mut ByteReader<'_>) -> Result<String, CodecError> {
    let len = read_length(r)?;
    let bytes = r.read_exact(len)?;
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|_| CodecError::InvalidUtf8)
}

/// Append the binary form of a value to `out`.
pub fn write_value(out: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Null => out.push(M_NULL),
        Value::Bool(true) => out.push(M_TRUE),
        Value::Bool(false) => out.push(M_FALSE),
        Value::I8(v) => {
            out.push(M_I8);
            out.extend_from_slice(&v.to_le_bytes());
        }
        Value::I16(v) => {
            out.push(M_I16);
            out.extend_from_slice(&v.to_le_bytes());
        }
        Value::I32(v) => {
            out.push(M_I32);
            out.extend_from_slice(&v.to_le_bytes());
        }
        Value::I64(v) => {
            out.push(M_I64);
            out.extend_from_slice(&v.to_le_bytes());
        }
        Value::U8(v) => {
            out.push(M_U8);
            out.push(*v);
        }
        Value::U16(v) => {
            out.push(M_U16);
            out.extend_from_slice(&v.to_le_bytes());
        }
        Value::U32(v) => {
            out.push(M_U32);
            out.extend_from_slice(&v.to_le_bytes());
        }
        Value::U64(v) => {
            out.push(M_U64);
            out.extend_from_slice(&v.to_le_bytes());
        }
        Value::F32(v) => {
            out.push(M_F32);
            out.extend_from_slice(&v.to_le_bytes());
        }
        Value::F64(v) => {
            out.push(M_F64);
            out.extend_from_slice(&v.to_le_bytes());
        }
        Value::Str(s) => {
            out.push(M_STR);
            write_key(out, s);
        }
        Value::Array(items) => {
            out.push(M_ARR_OPEN);
            for item in items {
                write_value(out, item);
            }
            out.push(M_ARR_CLOSE);
        }
        Value::Object(map) => {
            out.push(M_OBJ_OPEN);
            for (key, item) in map {
                write_key(out, key);
                write_value(out, item);
            }
            out.push(M_OBJ_CLOSE);
        }
    }
}

/// Read one value from the cursor.
pub fn read_value(r: &mut ByteReader<'_>) -> Result<Value, CodecError> {
    let marker = r.read_u8()?;
    Ok(match marker {
        M_NULL => Value::Null,
        M_TRUE => Value::Bool(true),
        M_FALSE => Value::Bool(false),
        M_I8 => Value::I8(r.read_u8()? as i8),
        M_I16 => Value::I16(r.read_u16_le()? as i16),
        M_I32 => Value::I32(r.read_u32_le()? as i32),
        M_I64 => Value::I64(r.read_i64_le()?),
        M_U8 => Value::U8(r.read_u8()?),
        M_U16 => Value::U16(r.read_u16_le()?),
        M_U32 => Value::U32(r.read_u32_le()?),
        M_U64 => Value::U64(r.read_u64_le()?),
        M_F32 => Value::F32(r.read_f32_le()?),
        M_F64 => Value::F64(r.read_f64_le()?),
        M_STR => Value::Str(read_key(r)?),
        M_ARR_OPEN => {
            let mut items = Vec::new();
            loop {
                if peek(r)? == M_ARR_CLOSE {
                    r.read_u8()?;
                    break;
                }
                items.push(read_value(r)?);
            }
            Value::Array(items)
        }
        M_OBJ_OPEN => {
            let mut map = IndexMap::new();
            loop {
                if peek(r)? == M_OBJ_CLOSE {
                    r.read_u8()?;
                    break;
                }
                let key = read_key(r)?;
                map.insert(key, read_value(r)?);
            }
            Value::Object(map)
        }
        found => return Err(CodecError::BadMarker { found }),
    })
}

fn peek(r: &mut ByteReader<'_>) -> Result<u8, CodecError> {
    let mut probe = r.clone();
    probe.read_u8()
}

/// Serialize a document to bytes.
pub fn to_bytes(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    write_value(&mut out, value);
    out
}

/// Parse a document from bytes, requiring full consumption.
pub fn from_bytes(bytes: &[u8]) -> Result<Value, CodecError> {
    let mut r = ByteReader::new(bytes);
    let value = read_value(&mut r)?;
    if !r.is_exhausted() {
        return Err(CodecError::LengthOverflow {
            len: r.remaining() as u64,
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn obj(pairs: Vec<(&str, Value)>) -> Value {
        Value::Object(pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
    }

    #[test]
    fn scalar_markers_roundtrip() {
        let values = vec![
            Value::Null,
            Value::Bool(true),
            Value::Bool(false),
            Value::I8(-5),
            Value::I16(-300),
            Value::I32(70_000),
            Value::I64(i64::MIN),
            Value::U8(200),
            Value::U16(60_000),
            Value::U32(4_000_000_000),
            Value::U64(u64::MAX),
            Value::F32(1.5),
            Value::F64(-0.25),
            Value::Str("héllo".into()),
        ];
        for v in values {
            assert_eq!(from_bytes(&to_bytes(&v)).unwrap(), v, "{v:?}");
        }
    }

    #[test]
    fn nested_document_roundtrips() {
        let doc = obj(vec![(
            "agents",
            obj(vec![(
                "cell",
                Value::Array(vec![
                    obj(vec![
                        ("id", Value::U64(0)),
                        ("attributes", obj(vec![("v", Value::I64(7))])),
                    ]),
                    obj(vec![
                        ("id", Value::U64(1)),
                        ("attributes", obj(vec![("v", Value::I64(11))])),
                    ]),
                ]),
            )]),
        )]);
        assert_eq!(from_bytes(&to_bytes(&doc)).unwrap(), doc);
    }

    #[test]
    fn empty_containers_roundtrip() {
        let doc = obj(vec![
            ("arr", Value::Array(vec![])),
            ("map", Value::Object(Default::default())),
        ]);
        assert_eq!(from_bytes(&to_bytes(&doc)).unwrap(), doc);
    }

    #[test]
    fn trailing_garbage_is_rejected() {
        let mut bytes = to_bytes(&Value::Bool(true));
        bytes.push(0);
        assert!(from_bytes(&bytes).is_err());
    }

    #[test]
    fn unknown_marker_is_rejected() {
        assert!(matches!(
            from_bytes(&[b'Q']),
            Err(CodecError::BadMarker { found: b'Q' })
        ));
    }

    #[test]
    fn truncated_array_is_rejected() {
        let mut bytes = to_bytes(&Value::Array(vec![Value::U8(1)]));
        bytes.pop(); // drop the close marker
        assert!(from_bytes(&bytes).is_err());
    }

    proptest! {
        #[test]
        fn arbitrary_int_tree_roundtrips(items in prop::collection::vec(any::<i64>(), 0..20)) {
            let doc = Value::Array(items.into_iter().map(Value::I64).collect());
            prop_assert_eq!(from_bytes(&to_bytes(&doc)).unwrap(), doc);
        }

        #[test]
        fn arbitrary_strings_roundtrip(s in ".*") {
            let doc = Value::Str(s.clone());
            prop_assert_eq!(from_bytes(&to_bytes(&doc)).unwrap(), Value::Str(s));
        }
    }
}
