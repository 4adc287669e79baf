//! The dynamic [`Value`] tree: the in-memory form of attribute payloads
//! and snapshot documents.
//!
//! Attribute values are decoded from and encoded into raw payload bytes
//! against a [`WireShape`]; snapshot documents additionally use the
//! string, array, and object variants, which never appear in structural
//! attribute shapes.

use indexmap::IndexMap;

use crate::error::{CodecError, ConfigError};
use crate::wire::{ScalarKind, WireShape};

/// A dynamically typed value.
///
/// Scalar variants mirror [`ScalarKind`] one-to-one so that encoded
/// attribute bytes round-trip without loss. `Str`, `Array`, and `Object`
/// exist for the snapshot container only.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// Absence of a value (opaque fields export as null).
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed 8-bit integer.
    I8(i8),
    /// Signed 16-bit integer.
    I16(i16),
    /// Signed 32-bit integer.
    I32(i32),
    /// Signed 64-bit integer.
    I64(i64),
    /// Unsigned 8-bit integer.
    U8(u8),
    /// Unsigned 16-bit integer.
    U16(u16),
    /// Unsigned 32-bit integer.
    U32(u32),
    /// Unsigned 64-bit integer.
    U64(u64),
    /// Single-precision float.
    F32(f32),
    /// Double-precision float.
    F64(f64),
    /// UTF-8 string (snapshot container only).
    Str(String),
    /// Ordered list (snapshot container only).
    Array(Vec<Value>),
    /// String-keyed map preserving insertion order (snapshot container
    /// and struct-shaped attributes).
    Object(IndexMap<String, Value>),
}

impl Value {
    /// The zero value of a wire shape: scalars are zero/false, structs
    /// are objects of zeroed fields, opaque blobs are null.
    pub fn zero_of(shape: &WireShape) -> Value {
        match shape {
            WireShape::Scalar(kind) => match kind {
                ScalarKind::Bool => Value::Bool(false),
                ScalarKind::I8 => Value::I8(0),
                ScalarKind::I16 => Value::I16(0),
                ScalarKind::I32 => Value::I32(0),
                ScalarKind::I64 => Value::I64(0),
                ScalarKind::U8 => Value::U8(0),
                ScalarKind::U16 => Value::U16(0),
                ScalarKind::U32 => Value::U32(0),
                ScalarKind::U64 => Value::U64(0),
                ScalarKind::F32 => Value::F32(0.0),
                ScalarKind::F64 => Value::F64(0.0),
            },
            WireShape::Struct(fields) => Value::Object(
                fields
                    .iter()
                    .map(|f| (f.name.clone(), Value::zero_of(&f.shape)))
                    .collect(),
            ),
            WireShape::Opaque { .. } => Value::Null,
        }
    }

    /// View this value as an i64, coercing from any integer or bool
    /// variant. Returns `None` for floats, strings, and containers, and
    /// for unsigned values that do not fit.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Bool(b) => Some(i64::from(b)),
            Value::I8(v) => Some(v.into()),
            Value::I16(v) => Some(v.into()),
            Value::I32(v) => Some(v.into()),
            Value::I64(v) => Some(v),
            Value::U8(v) => Some(v.into()),
            Value::U16(v) => Some(v.into()),
            Value::U32(v) => Some(v.into()),
            Value::U64(v) => i64::try_from(v).ok(),
            _ => None,
        }
    }

    /// View this value as an f64, coercing from any numeric variant.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::F32(v) => Some(v.into()),
            Value::F64(v) => Some(v),
            _ => self.as_i64().map(|v| v as f64),
        }
    }

    /// Field access on an object variant.
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Object(map) => map.get(name),
            _ => None,
        }
    }

    /// Encode this value into `out` according to `shape`.
    ///
    /// `out` must be exactly `shape.size()` bytes. Numeric variants are
    /// coerced to the declared scalar kind when the conversion is exact;
    /// otherwise a [`ConfigError::ValueShapeMismatch`] is returned.
    /// Opaque components are skipped (their bytes are left untouched).
    pub fn encode_into(&self, shape: &WireShape, out: &mut [u8]) -> Result<(), ConfigError> {
        debug_assert_eq!(out.len(), shape.size() as usize);
        match shape {
            WireShape::Scalar(kind) => self.encode_scalar(*kind, out),
            WireShape::Struct(fields) => {
                let map = match self {
                    Value::Object(map) => map,
                    other => {
                        return Err(ConfigError::ValueShapeMismatch {
                            detail: format!("expected struct value, got {other:?}"),
                        })
                    }
                };
                let mut cursor = 0usize;
                for field in fields {
                    let len = field.shape.size() as usize;
                    let slot = &mut out[cursor..cursor + len];
                    match map.get(&field.name) {
                        Some(v) => v.encode_into(&field.shape, slot)?,
                        None => Value::zero_of(&field.shape).encode_into(&field.shape, slot)?,
                    }
                    cursor += len;
                }
                Ok(())
            }
            WireShape::Opaque { .. } => Ok(()),
        }
    }

    fn encode_scalar(&self, kind: ScalarKind, out: &mut [u8]) -> Result<(), ConfigError> {
        let mismatch = || ConfigError::ValueShapeMismatch {
            detail: format!("cannot encode {self:?} as {kind:?}"),
        };
        match kind {
            ScalarKind::Bool => {
                let b = match *self {
                    Value::Bool(b) => b,
                    _ => self.as_i64().map(|v| v != 0).ok_or_else(mismatch)?,
                };
                out[0] = u8::from(b);
            }
            ScalarKind::I8 => {
                let v = i8::try_from(self.as_i64().ok_or_else(mismatch)?).map_err(|_| mismatch())?;
                out.copy_from_slice(&v.to_le_bytes());
            }
            ScalarKind::I16 => {
                let v =
                    i16::try_from(self.as_i64().ok_or_else(mismatch)?).map_err(|_| mismatch())?;
                out.copy_from_slice(&v.to_le_bytes());
            }
            ScalarKind::I32 => {
                let v =
                    i32::try_from(self.as_i64().ok_or_else(mismatch)?).map_err(|_| mismatch())?;
                out.copy_from_slice(&v.to_le_bytes());
            }
            ScalarKind::I64 => {
                let v = self.as_i64().ok_or_else(mismatch)?;
                out.copy_from_slice(&v.to_le_bytes());
            }
            ScalarKind::U8 => {
                let v = u8::try_from(self.as_i64().ok_or_else(mismatch)?).map_err(|_| mismatch())?;
                out.copy_from_slice(&v.to_le_bytes());
            }
            ScalarKind::U16 => {
                let v =
                    u16::try_from(self.as_i64().ok_or_else(mismatch)?).map_err(|_| mismatch())?;
                out.copy_from_slice(&v.to_le_bytes());
            }
            ScalarKind::U32 => {
                let v =
                    u32::try_from(self.as_i64().ok_or_else(mismatch)?).map_err(|_| mismatch())?;
                out.copy_from_slice(&v.to_le_bytes());
            }
            ScalarKind::U64 => {
                let v = match *self {
                    Value::U64(v) => v,
                    _ => u64::try_from(self.as_i64().ok_or_else(mismatch)?)
                        .map_err(|_| mismatch())?,
                };
                out.copy_from_slice(&v.to_le_bytes());
            }
            ScalarKind::F32 => {
                let v = self.as_f64().ok_or_else(mismatch)? as f32;
                out.copy_from_slice(&v.to_le_bytes());
            }
            ScalarKind::F64 => {
                let v = self.as_f64().ok_or_else(mismatch)?;
                out.copy_from_slice(&v.to_le_bytes());
            }
        }
        Ok(())
    }

    /// Decode a value of `shape` from `bytes`.
    ///
    /// `bytes` must be exactly `shape.size()` long. Opaque components
    /// decode as [`Value::Null`].
    pub fn decode_from(shape: &WireShape, bytes: &[u8]) -> Result<Value, CodecError> {
        if bytes.len() != shape.size() as usize {
            return Err(CodecError::Truncated {
                needed: shape.size() as usize,
                remaining: bytes.len(),
            });
        }
        Ok(match shape {
            WireShape::Scalar(kind) => Self::decode_scalar(*kind, bytes),
            WireShape::Struct(fields) => {
                let mut map = IndexMap::with_capacity(fields.len());
                let mut cursor = 0usize;
                for field in fields {
                    let len = field.shape.size() as usize;
                    let v = Value::decode_from(&field.shape, &bytes[cursor..cursor + len])?;
                    map.insert(field.name.clone(), v);
                    cursor += len;
                }
                Value::Object(map)
            }
            WireShape::Opaque { .. } => Value::Null,
        })
    }

    fn decode_scalar(kind: ScalarKind, bytes: &[u8]) -> Value {
        // The caller sized `bytes` from the same kind, so the copies
        // below cannot mismatch.
        fn arr<const N: usize>(bytes: &[u8]) -> [u8; N] {
            let mut buf = [0u8; N];
            buf.copy_from_slice(bytes);
            buf
        }
        match kind {
            ScalarKind::Bool => Value::Bool(bytes[0] != 0),
            ScalarKind::I8 => Value::I8(i8::from_le_bytes([bytes[0]])),
            ScalarKind::I16 => Value::I16(i16::from_le_bytes(arr(bytes))),
            ScalarKind::I32 => Value::I32(i32::from_le_bytes(arr(bytes))),
            ScalarKind::I64 => Value::I64(i64::from_le_bytes(arr(bytes))),
            ScalarKind::U8 => Value::U8(bytes[0]),
            ScalarKind::U16 => Value::U16(u16::from_le_bytes(arr(bytes))),
            ScalarKind::U32 => Value::U32(u32::from_le_bytes(arr(bytes))),
            ScalarKind::U64 => Value::U64(u64::from_le_bytes(arr(bytes))),
            ScalarKind::F32 => Value::F32(f32::from_le_bytes(arr(bytes))),
            ScalarKind::F64 => Value::F64(f64::from_le_bytes(arr(bytes))),
        }
    }
}
