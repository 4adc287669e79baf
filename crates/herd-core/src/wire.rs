//! Wire shapes: the recursive description of user-defined structured
//! types, and the flat transport descriptors derived from them.
//!
//! Agent and interaction payloads are arbitrary nestings of built-in
//! scalars. The registry stores one [`WireShape`] per attribute; the
//! messaging substrate consumes the flattened [`FlatRun`] form when it
//! builds typed put/get operations.

use smallvec::SmallVec;

/// Built-in scalar kinds supported in structural wire shapes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    /// One-byte boolean (0 or 1 on the wire).
    Bool,
    /// Signed 8-bit integer.
    I8,
    /// Signed 16-bit integer.
    I16,
    /// Signed 32-bit integer.
    I32,
    /// Signed 64-bit integer.
    I64,
    /// Unsigned 8-bit integer.
    U8,
    /// Unsigned 16-bit integer.
    U16,
    /// Unsigned 32-bit integer.
    U32,
    /// Unsigned 64-bit integer.
    U64,
    /// IEEE-754 single-precision float.
    F32,
    /// IEEE-754 double-precision float.
    F64,
}

impl ScalarKind {
    /// Wire size of this scalar in bytes.
    pub fn size(self) -> u32 {
        match self {
            Self::Bool | Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::U32 | Self::F32 => 4,
            Self::I64 | Self::U64 | Self::F64 => 8,
        }
    }
}

/// A named field inside a [`WireShape::Struct`].
#[derive(Clone, Debug, PartialEq)]
pub struct WireField {
    /// Field name, used in snapshots and diagnostics.
    pub name: String,
    /// The field's own shape.
    pub shape: WireShape,
}

/// Recursive description of an attribute's layout.
///
/// Structural shapes are nested structs bottoming out in scalars; they
/// can cross the wire. `Opaque` stands for a non-structural field
/// (pointers, containers, non-POD state): it occupies space in the
/// owner's payload but is permitted only on the private side of an agent
/// type and makes the type non-sendable.
#[derive(Clone, Debug, PartialEq)]
pub enum WireShape {
    /// A single built-in scalar.
    Scalar(ScalarKind),
    /// An ordered sequence of named fields, packed without padding.
    Struct(Vec<WireField>),
    /// A non-structural blob of fixed size. Private-only.
    Opaque {
        /// Size the blob occupies in the agent payload.
        size: u32,
    },
}

impl WireShape {
    /// Total packed size of this shape in bytes.
    pub fn size(&self) -> u32 {
        match self {
            Self::Scalar(k) => k.size(),
            Self::Struct(fields) => fields.iter().map(|f| f.shape.size()).sum(),
            Self::Opaque { size } => *size,
        }
    }

    /// Whether this shape is purely structural (no opaque component).
    pub fn is_structural(&self) -> bool {
        match self {
            Self::Scalar(_) => true,
            Self::Struct(fields) => fields.iter().all(|f| f.shape.is_structural()),
            Self::Opaque { .. } => false,
        }
    }

    /// Flatten this shape into transport runs starting at `base` bytes.
    ///
    /// Produces `(offset, scalar kind, count)` triples in layout order.
    /// Adjacent scalars of the same kind at contiguous offsets coalesce
    /// into a single run, which is what the substrate wants when it builds
    /// a native typed datatype for the shape.
    ///
    /// Opaque components produce no runs: they never cross the wire.
    pub fn flatten(&self, base: u32) -> SmallVec<[FlatRun; 4]> {
        let mut runs = SmallVec::new();
        let mut cursor = base;
        self.flatten_into(&mut cursor, &mut runs);
        runs
    }

    fn flatten_into(&self, cursor: &mut u32, runs: &mut SmallVec<[FlatRun; 4]>) {
        match self {
            Self::Scalar(kind) => {
                let offset = *cursor;
                *cursor += kind.size();
                if let Some(last) = runs.last_mut() {
                    if last.kind == *kind && last.offset + last.count * last.kind.size() == offset {
                        last.count += 1;
                        return;
                    }
                }
                runs.push(FlatRun {
                    offset,
                    kind: *kind,
                    count: 1,
                });
            }
            Self::Struct(fields) => {
                for field in fields {
                    field.shape.flatten_into(cursor, runs);
                }
            }
            Self::Opaque { size } => {
                *cursor += size;
            }
        }
    }
}

/// One run of a flat transport descriptor: `count` scalars of `kind`
/// starting at `offset` bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FlatRun {
    /// Byte offset of the first scalar in the run.
    pub offset: u32,
    /// Scalar kind shared by every element of the run.
    pub kind: ScalarKind,
    /// Number of consecutive scalars.
    pub count: u32,
}

impl FlatRun {
    /// Total byte length covered by this run.
    pub fn len(&self) -> u32 {
        self.count * self.kind.size()
    }

    /// Whether the run covers zero bytes.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Convenience constructor for a struct shape.
pub fn struct_of(fields: Vec<(&str, WireShape)>) -> WireShape {
    WireShape::Struct(
        fields
            .into_iter()
            .map(|(name, shape)| WireField {
                name: name.to_string(),
                shape,
            })
            .collect(),
    )
}
