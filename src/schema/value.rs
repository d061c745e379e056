//! Native values and identities.
//!
//! [`Value`] is the in-memory form of one persisted field. Model types move
//! their fields in and out of a [`Record`](crate::schema::Record) through the
//! [`Native`] trait, which is implemented for every built-in field type and for
//! `Option<T>` (a nullable column).
//!
//! Types without a built-in entry are stored through the structured fallback:
//! see [`Record::with_json`](crate::schema::Record::with_json).

use crate::error::DecodeError;
use crate::schema::NativeType;
use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime, Utc};
use std::fmt;
use uuid::Uuid;

/// A single field value in its native form.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Text(String),
    Uuid(Uuid),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Bool(bool),
    Char(char),
    Bytes(Bytes),
    Timestamp(NaiveDateTime),
    Instant(DateTime<Utc>),
    Structured(serde_json::Value),
}

impl Value {
    /// The native type this value belongs to, or `None` for `Null`.
    pub fn native_type(&self) -> Option<NativeType> {
        let kind = match self {
            Value::Null => return None,
            Value::Text(_) => NativeType::Text,
            Value::Uuid(_) => NativeType::Uuid,
            Value::I8(_) => NativeType::I8,
            Value::I16(_) => NativeType::I16,
            Value::I32(_) => NativeType::I32,
            Value::I64(_) => NativeType::I64,
            Value::F32(_) => NativeType::F32,
            Value::F64(_) => NativeType::F64,
            Value::Bool(_) => NativeType::Bool,
            Value::Char(_) => NativeType::Char,
            Value::Bytes(_) => NativeType::Bytes,
            Value::Timestamp(_) => NativeType::Timestamp,
            Value::Instant(_) => NativeType::Instant,
            Value::Structured(_) => NativeType::Structured,
        };
        Some(kind)
    }

    /// Short name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self.native_type() {
            Some(kind) => kind.name(),
            None => "NULL",
        }
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the value as an `i64` if it is any integer variant.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::I8(v) => Some(v.into()),
            Value::I16(v) => Some(v.into()),
            Value::I32(v) => Some(v.into()),
            Value::I64(v) => Some(v),
            _ => None,
        }
    }
}

/// Conversion between a Rust field type and [`Value`].
pub trait Native: Sized {
    /// The native type recorded in the schema for fields of this type.
    const KIND: NativeType;

    /// Whether the field accepts `NULL`.
    const NULLABLE: bool = false;

    fn into_value(self) -> Value;

    fn from_value(value: Value) -> Result<Self, DecodeError>;
}

fn unexpected(expected: NativeType, found: &Value) -> DecodeError {
    DecodeError::UnexpectedType {
        expected,
        found: found.type_name(),
    }
}

macro_rules! native_integer {
    ($ty:ty, $kind:ident) => {
        impl Native for $ty {
            const KIND: NativeType = NativeType::$kind;

            fn into_value(self) -> Value {
                Value::$kind(self)
            }

            fn from_value(value: Value) -> Result<Self, DecodeError> {
                let wide = value
                    .as_i64()
                    .ok_or_else(|| unexpected(NativeType::$kind, &value))?;
                <$ty>::try_from(wide).map_err(|_| {
                    DecodeError::invalid(NativeType::$kind, format!("{} is out of range", wide))
                })
            }
        }
    };
}

native_integer!(i8, I8);
native_integer!(i16, I16);
native_integer!(i32, I32);
native_integer!(i64, I64);

macro_rules! native_simple {
    ($ty:ty, $kind:ident) => {
        impl Native for $ty {
            const KIND: NativeType = NativeType::$kind;

            fn into_value(self) -> Value {
                Value::$kind(self)
            }

            fn from_value(value: Value) -> Result<Self, DecodeError> {
                match value {
                    Value::$kind(v) => Ok(v),
                    other => Err(unexpected(NativeType::$kind, &other)),
                }
            }
        }
    };
}

native_simple!(String, Text);
native_simple!(Uuid, Uuid);
native_simple!(f32, F32);
native_simple!(bool, Bool);
native_simple!(char, Char);
native_simple!(Bytes, Bytes);
native_simple!(NaiveDateTime, Timestamp);
native_simple!(DateTime<Utc>, Instant);

impl Native for f64 {
    const KIND: NativeType = NativeType::F64;

    fn into_value(self) -> Value {
        Value::F64(self)
    }

    fn from_value(value: Value) -> Result<Self, DecodeError> {
        match value {
            Value::F64(v) => Ok(v),
            Value::F32(v) => Ok(v.into()),
            other => Err(unexpected(NativeType::F64, &other)),
        }
    }
}

impl Native for Vec<u8> {
    const KIND: NativeType = NativeType::Bytes;

    fn into_value(self) -> Value {
        Value::Bytes(Bytes::from(self))
    }

    fn from_value(value: Value) -> Result<Self, DecodeError> {
        Bytes::from_value(value).map(|b| b.to_vec())
    }
}

impl<T: Native> Native for Option<T> {
    const KIND: NativeType = T::KIND;
    const NULLABLE: bool = true;

    fn into_value(self) -> Value {
        match self {
            Some(v) => v.into_value(),
            None => Value::Null,
        }
    }

    fn from_value(value: Value) -> Result<Self, DecodeError> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

/// The value that addresses one record: cache key, primary key, document key
/// and record file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Identity {
    Int(i64),
    Text(String),
    Uuid(Uuid),
}

impl Identity {
    /// Extracts an identity from an identity-capable value.
    pub fn from_value(value: &Value) -> Option<Identity> {
        if let Some(n) = value.as_i64() {
            return Some(Identity::Int(n));
        }
        match value {
            Value::Text(s) => Some(Identity::Text(s.clone())),
            Value::Char(c) => Some(Identity::Text(c.to_string())),
            Value::Uuid(u) => Some(Identity::Uuid(*u)),
            _ => None,
        }
    }

    /// Converts the identity into a value of the identity field's type.
    pub fn to_value(&self, kind: NativeType) -> Result<Value, DecodeError> {
        let out_of_range = |n: i64| DecodeError::invalid(kind, format!("{} is out of range", n));
        match (kind, self) {
            (NativeType::I8, Identity::Int(n)) => {
                i8::try_from(*n).map(Value::I8).map_err(|_| out_of_range(*n))
            }
            (NativeType::I16, Identity::Int(n)) => {
                i16::try_from(*n).map(Value::I16).map_err(|_| out_of_range(*n))
            }
            (NativeType::I32, Identity::Int(n)) => {
                i32::try_from(*n).map(Value::I32).map_err(|_| out_of_range(*n))
            }
            (NativeType::I64, Identity::Int(n)) => Ok(Value::I64(*n)),
            (NativeType::Text, Identity::Text(s)) => Ok(Value::Text(s.clone())),
            (NativeType::Text, Identity::Uuid(u)) => Ok(Value::Text(u.to_string())),
            (NativeType::Uuid, Identity::Uuid(u)) => Ok(Value::Uuid(*u)),
            (NativeType::Uuid, Identity::Text(s)) => Uuid::parse_str(s)
                .map(Value::Uuid)
                .map_err(|e| DecodeError::invalid(kind, e)),
            (NativeType::Char, Identity::Text(s)) => {
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Ok(Value::Char(c)),
                    _ => Err(DecodeError::invalid(kind, "expected a single character")),
                }
            }
            (_, identity) => Err(DecodeError::UnexpectedType {
                expected: kind,
                found: identity.type_name(),
            }),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match *self {
            Identity::Int(n) => Some(n),
            _ => None,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Identity::Int(_) => "integer",
            Identity::Text(_) => "text",
            Identity::Uuid(_) => "UUID",
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Int(n) => write!(f, "{}", n),
            Identity::Text(s) => f.write_str(s),
            Identity::Uuid(u) => write!(f, "{}", u.hyphenated()),
        }
    }
}

macro_rules! identity_from_int {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Identity {
                fn from(n: $ty) -> Self {
                    Identity::Int(n.into())
                }
            }
        )*
    };
}

identity_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<String> for Identity {
    fn from(s: String) -> Self {
        Identity::Text(s)
    }
}

impl From<&str> for Identity {
    fn from(s: &str) -> Self {
        Identity::Text(s.to_string())
    }
}

impl From<char> for Identity {
    fn from(c: char) -> Self {
        Identity::Text(c.to_string())
    }
}

impl From<Uuid> for Identity {
    fn from(u: Uuid) -> Self {
        Identity::Uuid(u)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_integers_widen_and_narrow() {
        assert_eq!(i64::from_value(Value::I8(-3)), Ok(-3));
        assert_eq!(i16::from_value(Value::I64(300)), Ok(300));
        assert!(matches!(
            i8::from_value(Value::I64(300)),
            Err(DecodeError::InvalidValue { .. })
        ));
        assert!(matches!(
            i32::from_value(Value::Text("1".into())),
            Err(DecodeError::UnexpectedType { .. })
        ));
    }

    #[test]
    fn test_option_is_nullable() {
        assert_eq!(Option::<String>::from_value(Value::Null), Ok(None));
        assert_eq!(
            Option::<String>::from_value(Value::Text("x".into())),
            Ok(Some("x".to_string()))
        );
        assert_eq!(None::<i32>.into_value(), Value::Null);
        assert!(<Option<i32> as Native>::NULLABLE);
        assert!(!<i32 as Native>::NULLABLE);
        assert_eq!(<Option<i32> as Native>::KIND, NativeType::I32);
    }

    #[test]
    fn test_identity_from_value() {
        assert_eq!(Identity::from_value(&Value::I32(7)), Some(Identity::Int(7)));
        assert_eq!(
            Identity::from_value(&Value::Char('a')),
            Some(Identity::Text("a".into()))
        );
        assert_eq!(Identity::from_value(&Value::F64(1.0)), None);
        assert_eq!(Identity::from_value(&Value::Null), None);
    }

    #[test]
    fn test_identity_to_value() {
        assert_eq!(Identity::Int(5).to_value(NativeType::I16), Ok(Value::I16(5)));
        assert!(Identity::Int(1 << 40).to_value(NativeType::I32).is_err());

        let id = Uuid::new_v4();
        assert_eq!(
            Identity::Text(id.to_string()).to_value(NativeType::Uuid),
            Ok(Value::Uuid(id))
        );
        assert_eq!(
            Identity::from('x').to_value(NativeType::Char),
            Ok(Value::Char('x'))
        );
        assert!(Identity::Text("xy".into()).to_value(NativeType::Char).is_err());
        assert!(Identity::Text("a".into()).to_value(NativeType::I64).is_err());
    }

    #[test]
    fn test_identity_display() {
        assert_eq!(Identity::from(42).to_string(), "42");
        assert_eq!(Identity::from("ada").to_string(), "ada");
        let id = Uuid::nil();
        assert_eq!(
            Identity::from(id).to_string(),
            "00000000-0000-0000-0000-000000000000"
        );
    }
}
