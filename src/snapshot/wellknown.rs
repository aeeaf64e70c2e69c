//! Runtime types the crawler needs to recognise by name.

use std::collections::HashMap;

use strum::{EnumCount, EnumIter, IntoEnumIterator, IntoStaticStr};

/// A runtime type with special decoding or analysis rules.
///
/// The string form of each variant is the fully qualified type name as it appears in the
/// type description name chapter.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, EnumCount, EnumIter, IntoStaticStr,
)]
#[allow(missing_docs)]
pub enum WellKnownType {
    #[strum(serialize = "System.String")]
    String,
    #[strum(serialize = "System.Boolean")]
    Boolean,
    #[strum(serialize = "System.Byte")]
    Byte,
    #[strum(serialize = "System.SByte")]
    SByte,
    #[strum(serialize = "System.Int16")]
    Int16,
    #[strum(serialize = "System.UInt16")]
    UInt16,
    #[strum(serialize = "System.Char")]
    Char,
    #[strum(serialize = "System.Int32")]
    Int32,
    #[strum(serialize = "System.UInt32")]
    UInt32,
    #[strum(serialize = "System.Int64")]
    Int64,
    #[strum(serialize = "System.UInt64")]
    UInt64,
    #[strum(serialize = "System.IntPtr")]
    IntPtr,
    #[strum(serialize = "System.Single")]
    Single,
    #[strum(serialize = "System.Double")]
    Double,
    #[strum(serialize = "System.Object")]
    Object,
    #[strum(serialize = "System.ValueType")]
    ValueType,
    #[strum(serialize = "System.Enum")]
    Enum,
    #[strum(serialize = "UnityEngine.Object")]
    UnityEngineObject,
    #[strum(serialize = "UnityEngine.MonoBehaviour")]
    MonoBehaviour,
    #[strum(serialize = "UnityEngine.Component")]
    Component,
}

/// How a field of a well-known type is decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Primitive {
    /// Little-endian integer of the given width, reinterpreted as signed
    Integer(usize),
    /// IEEE 754 single precision
    Float32,
    /// IEEE 754 double precision
    Float64,
    /// Pointer to a length-prefixed UTF-16 string object
    String,
}

impl WellKnownType {
    /// The type's name as stored in the capture.
    #[must_use]
    pub fn name(self) -> &'static str {
        self.into()
    }

    /// The decoding rule for fields of this type, if it is a primitive.
    #[must_use]
    pub fn primitive(self) -> Option<Primitive> {
        match self {
            WellKnownType::String => Some(Primitive::String),
            WellKnownType::Boolean | WellKnownType::Byte | WellKnownType::SByte => {
                Some(Primitive::Integer(1))
            }
            WellKnownType::Int16 | WellKnownType::UInt16 | WellKnownType::Char => {
                Some(Primitive::Integer(2))
            }
            WellKnownType::Int32 | WellKnownType::UInt32 => Some(Primitive::Integer(4)),
            WellKnownType::Int64 | WellKnownType::UInt64 | WellKnownType::IntPtr => {
                Some(Primitive::Integer(8))
            }
            WellKnownType::Single => Some(Primitive::Float32),
            WellKnownType::Double => Some(Primitive::Float64),
            _ => None,
        }
    }
}

/// Type indices of the [`WellKnownType`]s present in one capture.
///
/// Missing types resolve to `None` so that comparisons against them can never match a real type
/// index by accident.
#[derive(Debug, Clone, Default)]
pub struct WellKnownTypes {
    indices: [Option<u32>; WellKnownType::COUNT],
    by_index: HashMap<u32, WellKnownType>,
}

impl WellKnownTypes {
    /// Scans a type name table, indexed by type index, for the well-known names.
    ///
    /// The first occurrence of each name wins.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> WellKnownTypes {
        let wanted: HashMap<&'static str, WellKnownType> =
            WellKnownType::iter().map(|t| (t.name(), t)).collect();

        let mut types = WellKnownTypes::default();
        for (index, name) in names.iter().enumerate() {
            let Some(&kind) = wanted.get(name.as_ref()) else {
                continue;
            };
            if types.indices[kind as usize].is_some() {
                continue;
            }

            let Ok(index) = u32::try_from(index) else {
                break;
            };
            types.indices[kind as usize] = Some(index);
            types.by_index.insert(index, kind);

            if types.by_index.len() == WellKnownType::COUNT {
                break;
            }
        }

        log::info!(
            "Found {}/{} well known types",
            types.by_index.len(),
            WellKnownType::COUNT
        );
        types
    }

    /// Type index of `kind`, if the capture contains it.
    #[must_use]
    pub fn get(&self, kind: WellKnownType) -> Option<u32> {
        self.indices[kind as usize]
    }

    /// Returns `true` if `type_index` is the index of `kind`.
    #[must_use]
    pub fn is(&self, kind: WellKnownType, type_index: u32) -> bool {
        self.get(kind) == Some(type_index)
    }

    /// The well-known type at `type_index`, if any.
    #[must_use]
    pub fn classify(&self, type_index: u32) -> Option<WellKnownType> {
        self.by_index.get(&type_index).copied()
    }

    /// Type index of `System.String`.
    #[must_use]
    pub fn string(&self) -> Option<u32> {
        self.get(WellKnownType::String)
    }

    /// Type index of `System.Enum`.
    #[must_use]
    pub fn enum_base(&self) -> Option<u32> {
        self.get(WellKnownType::Enum)
    }

    /// Type index of `UnityEngine.Object`.
    #[must_use]
    pub fn unity_engine_object(&self) -> Option<u32> {
        self.get(WellKnownType::UnityEngineObject)
    }

    /// Number of well-known types found.
    #[must_use]
    pub fn found(&self) -> usize {
        self.by_index.len()
    }
}
