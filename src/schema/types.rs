//! Type Map
//!
//! Maps each [`NativeType`] to its SQL column type and converts values between
//! their native form and the representation each backend stores:
//!
//! ```text
//!                   encode_sql            encode_document
//!   SqlValue  <───────────────  Value  ───────────────>  serde_json::Value
//!             ───────────────>         <───────────────
//!                   decode_sql            decode_document
//! ```
//!
//! | Native type  | Column type    | SQL value             | Document value       |
//! |--------------|----------------|-----------------------|----------------------|
//! | `Text`       | `VARCHAR(255)` | text                  | string               |
//! | `Uuid`       | `VARCHAR(36)`  | hyphenated text       | string               |
//! | `I8`..`I64`  | `TINYINT`..`BIGINT` | integer          | number               |
//! | `F32`, `F64` | `FLOAT`, `DOUBLE` | float              | number               |
//! | `Bool`       | `BOOLEAN`      | boolean               | boolean              |
//! | `Char`       | `CHAR(1)`      | one-character text    | string               |
//! | `Bytes`      | `BLOB`         | bytes                 | array of numbers     |
//! | `Timestamp`  | `DATETIME`     | date-time             | ISO-8601 string      |
//! | `Instant`    | `BIGINT`       | epoch seconds         | epoch seconds        |
//! | `Structured` | `JSON`         | codec text            | embedded JSON        |
//!
//! Instants are stored as epoch seconds so they sort numerically and carry no
//! timezone; sub-second precision is dropped.

use crate::error::DecodeError;
use crate::schema::codec::{JsonCodec, StructuredCodec};
use crate::schema::Value;
use crate::sql::SqlValue;
use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value as JsonValue;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Formats accepted when reading a timestamp from text.
const TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Every field type the Type Map knows about.
///
/// `Structured` is the fallback for any other type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeType {
    Text,
    Uuid,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    Bool,
    Char,
    Bytes,
    Timestamp,
    Instant,
    Structured,
}

impl NativeType {
    /// The SQL column type for this native type.
    pub const fn column_type(self) -> &'static str {
        match self {
            NativeType::Text => "VARCHAR(255)",
            NativeType::Uuid => "VARCHAR(36)",
            NativeType::I8 => "TINYINT",
            NativeType::I16 => "SMALLINT",
            NativeType::I32 => "INT",
            NativeType::I64 => "BIGINT",
            NativeType::F32 => "FLOAT",
            NativeType::F64 => "DOUBLE",
            NativeType::Bool => "BOOLEAN",
            NativeType::Char => "CHAR(1)",
            NativeType::Bytes => "BLOB",
            NativeType::Timestamp => "DATETIME",
            NativeType::Instant => "BIGINT",
            NativeType::Structured => "JSON",
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            NativeType::Text => "text",
            NativeType::Uuid => "UUID",
            NativeType::I8 => "i8",
            NativeType::I16 => "i16",
            NativeType::I32 => "i32",
            NativeType::I64 => "i64",
            NativeType::F32 => "f32",
            NativeType::F64 => "f64",
            NativeType::Bool => "bool",
            NativeType::Char => "char",
            NativeType::Bytes => "bytes",
            NativeType::Timestamp => "timestamp",
            NativeType::Instant => "instant",
            NativeType::Structured => "structured",
        }
    }

    #[inline]
    pub const fn is_integer(self) -> bool {
        matches!(
            self,
            NativeType::I8 | NativeType::I16 | NativeType::I32 | NativeType::I64
        )
    }

    #[inline]
    pub const fn is_structured(self) -> bool {
        matches!(self, NativeType::Structured)
    }

    /// Whether values of this type can address a record.
    pub const fn is_identity_capable(self) -> bool {
        self.is_integer() || matches!(self, NativeType::Text | NativeType::Uuid | NativeType::Char)
    }
}

impl fmt::Display for NativeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Converts values between their native form and backend representations.
///
/// Cheap to clone; the structured codec is shared.
#[derive(Debug, Clone)]
pub struct TypeMap {
    codec: Arc<dyn StructuredCodec>,
}

impl Default for TypeMap {
    fn default() -> Self {
        Self::new(Arc::new(JsonCodec::default()))
    }
}

impl TypeMap {
    pub fn new(codec: Arc<dyn StructuredCodec>) -> Self {
        Self { codec }
    }

    pub fn codec(&self) -> &dyn StructuredCodec {
        self.codec.as_ref()
    }

    #[inline]
    pub fn column_type(&self, kind: NativeType) -> &'static str {
        kind.column_type()
    }

    // ========================================================================
    // SQL REPRESENTATION
    // ========================================================================

    /// Converts a native value to the value bound to a SQL statement.
    pub fn encode_sql(&self, value: &Value) -> SqlValue {
        match value {
            Value::Null => SqlValue::Null,
            Value::Text(s) => SqlValue::Text(s.clone()),
            Value::Uuid(u) => SqlValue::Text(u.hyphenated().to_string()),
            Value::I8(v) => SqlValue::Int((*v).into()),
            Value::I16(v) => SqlValue::Int((*v).into()),
            Value::I32(v) => SqlValue::Int((*v).into()),
            Value::I64(v) => SqlValue::Int(*v),
            Value::F32(v) => SqlValue::Float((*v).into()),
            Value::F64(v) => SqlValue::Float(*v),
            Value::Bool(v) => SqlValue::Bool(*v),
            Value::Char(c) => SqlValue::Text(c.to_string()),
            Value::Bytes(b) => SqlValue::Bytes(b.clone()),
            Value::Timestamp(t) => SqlValue::DateTime(*t),
            Value::Instant(t) => SqlValue::Int(t.timestamp()),
            Value::Structured(json) => SqlValue::Text(self.codec.encode(json)),
        }
    }

    /// Converts a value read from a SQL column back to its native form.
    ///
    /// Accepts the loose shapes drivers report (integers as text, booleans as
    /// 0/1, timestamps as text).
    pub fn decode_sql(&self, kind: NativeType, value: SqlValue) -> Result<Value, DecodeError> {
        if matches!(value, SqlValue::Null) {
            return Ok(Value::Null);
        }
        let mismatch = |found: &SqlValue| DecodeError::UnexpectedType {
            expected: kind,
            found: found.type_name(),
        };

        let decoded = match kind {
            NativeType::Text => match value {
                SqlValue::Text(s) => Value::Text(s),
                SqlValue::Bytes(b) => Value::Text(utf8(kind, b)?),
                other => return Err(mismatch(&other)),
            },
            NativeType::Uuid => match value {
                SqlValue::Text(s) => Value::Uuid(parse_uuid(&s)?),
                SqlValue::Bytes(b) => Value::Uuid(
                    Uuid::from_slice(&b).map_err(|e| DecodeError::invalid(kind, e))?,
                ),
                other => return Err(mismatch(&other)),
            },
            NativeType::I8 | NativeType::I16 | NativeType::I32 | NativeType::I64 => {
                let wide = match value {
                    SqlValue::Int(n) => n,
                    SqlValue::Bool(b) => i64::from(b),
                    SqlValue::Text(s) => s
                        .trim()
                        .parse::<i64>()
                        .map_err(|e| DecodeError::invalid(kind, e))?,
                    other => return Err(mismatch(&other)),
                };
                narrow_integer(kind, wide)?
            }
            NativeType::F32 | NativeType::F64 => {
                let wide = match value {
                    SqlValue::Float(f) => f,
                    SqlValue::Int(n) => n as f64,
                    SqlValue::Text(s) => s
                        .trim()
                        .parse::<f64>()
                        .map_err(|e| DecodeError::invalid(kind, e))?,
                    other => return Err(mismatch(&other)),
                };
                if kind == NativeType::F32 {
                    Value::F32(wide as f32)
                } else {
                    Value::F64(wide)
                }
            }
            NativeType::Bool => match value {
                SqlValue::Bool(b) => Value::Bool(b),
                SqlValue::Int(n) => Value::Bool(n != 0),
                SqlValue::Text(s) => Value::Bool(parse_bool(&s)?),
                other => return Err(mismatch(&other)),
            },
            NativeType::Char => match value {
                SqlValue::Text(s) => Value::Char(single_char(&s)?),
                other => return Err(mismatch(&other)),
            },
            NativeType::Bytes => match value {
                SqlValue::Bytes(b) => Value::Bytes(b),
                SqlValue::Text(s) => Value::Bytes(Bytes::from(s)),
                other => return Err(mismatch(&other)),
            },
            NativeType::Timestamp => match value {
                SqlValue::DateTime(t) => Value::Timestamp(t),
                SqlValue::Text(s) => Value::Timestamp(parse_timestamp(&s)?),
                other => return Err(mismatch(&other)),
            },
            NativeType::Instant => {
                let secs = match value {
                    SqlValue::Int(n) => n,
                    SqlValue::Text(s) => s
                        .trim()
                        .parse::<i64>()
                        .map_err(|e| DecodeError::invalid(kind, e))?,
                    other => return Err(mismatch(&other)),
                };
                Value::Instant(instant_from_secs(secs)?)
            }
            NativeType::Structured => match value {
                SqlValue::Text(s) => Value::Structured(self.codec.decode(&s)?),
                SqlValue::Bytes(b) => Value::Structured(self.codec.decode(&utf8(kind, b)?)?),
                other => return Err(mismatch(&other)),
            },
        };
        Ok(decoded)
    }

    // ========================================================================
    // DOCUMENT REPRESENTATION
    // ========================================================================

    /// Converts a native value to its document (JSON) form.
    ///
    /// Non-finite floats have no JSON form and are written as `null`.
    pub fn encode_document(&self, value: &Value) -> JsonValue {
        match value {
            Value::Null => JsonValue::Null,
            Value::Text(s) => JsonValue::String(s.clone()),
            Value::Uuid(u) => JsonValue::String(u.hyphenated().to_string()),
            Value::I8(v) => JsonValue::from(*v),
            Value::I16(v) => JsonValue::from(*v),
            Value::I32(v) => JsonValue::from(*v),
            Value::I64(v) => JsonValue::from(*v),
            Value::F32(v) => float_document(f64::from(*v)),
            Value::F64(v) => float_document(*v),
            Value::Bool(v) => JsonValue::Bool(*v),
            Value::Char(c) => JsonValue::String(c.to_string()),
            Value::Bytes(b) => JsonValue::Array(b.iter().map(|byte| JsonValue::from(*byte)).collect()),
            Value::Timestamp(t) => JsonValue::String(t.format(TIMESTAMP_FORMATS[0]).to_string()),
            Value::Instant(t) => JsonValue::from(t.timestamp()),
            Value::Structured(json) => json.clone(),
        }
    }

    /// Converts a document (JSON) value back to its native form.
    pub fn decode_document(&self, kind: NativeType, value: JsonValue) -> Result<Value, DecodeError> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        let mismatch = |found: &JsonValue| DecodeError::UnexpectedType {
            expected: kind,
            found: json_type_name(found),
        };

        let decoded = match kind {
            NativeType::Text => match value {
                JsonValue::String(s) => Value::Text(s),
                other => return Err(mismatch(&other)),
            },
            NativeType::Uuid => match value {
                JsonValue::String(s) => Value::Uuid(parse_uuid(&s)?),
                other => return Err(mismatch(&other)),
            },
            NativeType::I8 | NativeType::I16 | NativeType::I32 | NativeType::I64 => {
                let wide = value.as_i64().ok_or_else(|| mismatch(&value))?;
                narrow_integer(kind, wide)?
            }
            NativeType::F32 => Value::F32(value.as_f64().ok_or_else(|| mismatch(&value))? as f32),
            NativeType::F64 => Value::F64(value.as_f64().ok_or_else(|| mismatch(&value))?),
            NativeType::Bool => Value::Bool(value.as_bool().ok_or_else(|| mismatch(&value))?),
            NativeType::Char => match value {
                JsonValue::String(s) => Value::Char(single_char(&s)?),
                other => return Err(mismatch(&other)),
            },
            NativeType::Bytes => match value {
                JsonValue::Array(items) => {
                    let bytes = items
                        .iter()
                        .map(|item| {
                            item.as_u64()
                                .and_then(|n| u8::try_from(n).ok())
                                .ok_or_else(|| DecodeError::invalid(kind, "array item is not a byte"))
                        })
                        .collect::<Result<Vec<u8>, _>>()?;
                    Value::Bytes(Bytes::from(bytes))
                }
                other => return Err(mismatch(&other)),
            },
            NativeType::Timestamp => match value {
                JsonValue::String(s) => Value::Timestamp(parse_timestamp(&s)?),
                other => return Err(mismatch(&other)),
            },
            NativeType::Instant => {
                let secs = value.as_i64().ok_or_else(|| mismatch(&value))?;
                Value::Instant(instant_from_secs(secs)?)
            }
            NativeType::Structured => Value::Structured(value),
        };
        Ok(decoded)
    }

    // ========================================================================
    // DEFAULT LITERALS
    // ========================================================================

    /// Renders a value as a SQL literal for a `DEFAULT` clause.
    pub fn default_literal(&self, value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            Value::Text(s) => quote(s),
            Value::Uuid(u) => quote(&u.hyphenated().to_string()),
            Value::Char(c) => quote(&c.to_string()),
            Value::I8(v) => v.to_string(),
            Value::I16(v) => v.to_string(),
            Value::I32(v) => v.to_string(),
            Value::I64(v) => v.to_string(),
            Value::F32(v) => v.to_string(),
            Value::F64(v) => v.to_string(),
            Value::Bool(true) => "TRUE".to_string(),
            Value::Bool(false) => "FALSE".to_string(),
            Value::Bytes(b) => {
                let hex: String = b.iter().map(|byte| format!("{:02X}", byte)).collect();
                format!("X'{}'", hex)
            }
            Value::Timestamp(t) => quote(&t.format("%Y-%m-%dT%H:%M:%S").to_string()),
            Value::Instant(t) => t.timestamp().to_string(),
            Value::Structured(json) => quote(&self.codec.encode(json)),
        }
    }
}

/// Single-quotes a SQL string literal, doubling embedded quotes.
fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn narrow_integer(kind: NativeType, wide: i64) -> Result<Value, DecodeError> {
    let out_of_range = || DecodeError::invalid(kind, format!("{} is out of range", wide));
    Ok(match kind {
        NativeType::I8 => Value::I8(i8::try_from(wide).map_err(|_| out_of_range())?),
        NativeType::I16 => Value::I16(i16::try_from(wide).map_err(|_| out_of_range())?),
        NativeType::I32 => Value::I32(i32::try_from(wide).map_err(|_| out_of_range())?),
        _ => Value::I64(wide),
    })
}

fn parse_uuid(s: &str) -> Result<Uuid, DecodeError> {
    Uuid::parse_str(s.trim()).map_err(|e| DecodeError::invalid(NativeType::Uuid, e))
}

fn parse_bool(s: &str) -> Result<bool, DecodeError> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        other => Err(DecodeError::invalid(
            NativeType::Bool,
            format!("'{}' is not a boolean", other),
        )),
    }
}

fn single_char(s: &str) -> Result<char, DecodeError> {
    s.chars()
        .next()
        .ok_or_else(|| DecodeError::invalid(NativeType::Char, "empty string"))
}

fn utf8(kind: NativeType, bytes: Bytes) -> Result<String, DecodeError> {
    String::from_utf8(bytes.to_vec()).map_err(|e| DecodeError::invalid(kind, e))
}

fn parse_timestamp(s: &str) -> Result<NaiveDateTime, DecodeError> {
    let s = s.trim();
    for format in TIMESTAMP_FORMATS {
        if let Ok(t) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(t);
        }
    }
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.naive_utc())
        .map_err(|e| DecodeError::invalid(NativeType::Timestamp, e))
}

fn instant_from_secs(secs: i64) -> Result<DateTime<Utc>, DecodeError> {
    DateTime::<Utc>::from_timestamp(secs, 0).ok_or_else(|| {
        DecodeError::invalid(NativeType::Instant, format!("{} is out of range", secs))
    })
}

fn float_document(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or(JsonValue::Null)
}

fn json_type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}
