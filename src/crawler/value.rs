//! Decoded field values.

use std::fmt;

use crate::crawler::InstanceId;

/// Outcome of following a pointer stored in a field.
#[derive(Debug, Clone, PartialEq)]
pub enum Target<T> {
    /// The pointer was zero
    Null,
    /// The pointer led to a decodable object
    Resolved(T),
    /// The pointer was non-zero but could not be resolved; the raw value is kept
    Unresolved(u64),
}

impl<T> Target<T> {
    /// The resolved value, if any.
    pub fn resolved(&self) -> Option<&T> {
        match self {
            Target::Resolved(value) => Some(value),
            _ => None,
        }
    }
}

/// One decoded field of an instance, or one element of an array.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Any integer primitive, reinterpreted as signed
    Integer(i64),
    /// `System.Single` or `System.Double`
    FloatingPoint(f64),
    /// A string reference
    String(Target<String>),
    /// An enum value and the enum's type index
    Enum {
        /// Type index of the enum
        type_index: u32,
        /// Backing integer value
        value: i64,
    },
    /// An object reference or an inline value type
    Reference(Target<InstanceId>),
    /// The field's bytes lie outside the object, or its layout could not be decoded
    Unreadable,
}

impl FieldValue {
    /// Returns `true` for null string and object references.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(
            self,
            FieldValue::String(Target::Null) | FieldValue::Reference(Target::Null)
        )
    }

    /// Returns `true` if the value could not be decoded.
    #[must_use]
    pub fn failed_to_parse(&self) -> bool {
        matches!(
            self,
            FieldValue::String(Target::Unresolved(_))
                | FieldValue::Reference(Target::Unresolved(_))
                | FieldValue::Unreadable
        )
    }

    /// The raw pointer of a reference that could not be resolved.
    #[must_use]
    pub fn failed_parse_from_pointer(&self) -> Option<u64> {
        match self {
            FieldValue::String(Target::Unresolved(pointer))
            | FieldValue::Reference(Target::Unresolved(pointer)) => Some(*pointer),
            _ => None,
        }
    }

    /// The integer value of integer and enum fields.
    #[must_use]
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(value) | FieldValue::Enum { value, .. } => Some(*value),
            _ => None,
        }
    }

    /// The instance an object or value type field refers to.
    #[must_use]
    pub fn as_instance(&self) -> Option<InstanceId> {
        match self {
            FieldValue::Reference(Target::Resolved(id)) => Some(*id),
            _ => None,
        }
    }

    /// The text of a resolved string field.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(Target::Resolved(text)) => Some(text),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Integer(value) => write!(f, "{value}"),
            FieldValue::FloatingPoint(value) => write!(f, "{value}"),
            FieldValue::String(Target::Resolved(text)) => write!(f, "{text:?}"),
            FieldValue::Enum { type_index, value } => write!(f, "(enum #{type_index}) {value}"),
            FieldValue::Reference(Target::Resolved(id)) => write!(f, "-> {id}"),
            FieldValue::String(Target::Null) | FieldValue::Reference(Target::Null) => f.write_str("null"),
            FieldValue::String(Target::Unresolved(pointer))
            | FieldValue::Reference(Target::Unresolved(pointer)) => {
                write!(f, "<unresolved 0x{pointer:X}>")
            }
            FieldValue::Unreadable => f.write_str("<unreadable>"),
        }
    }
}
