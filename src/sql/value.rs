//! Values bound to and read from SQL statements.

use bytes::Bytes;
use chrono::NaiveDateTime;
use std::cmp::Ordering;
use std::fmt;

/// A column value as a SQL driver reports it.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Bytes),
    Bool(bool),
    DateTime(NaiveDateTime),
}

impl SqlValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            SqlValue::Null => "NULL",
            SqlValue::Int(_) => "SQL integer",
            SqlValue::Float(_) => "SQL float",
            SqlValue::Text(_) => "SQL text",
            SqlValue::Bytes(_) => "SQL blob",
            SqlValue::Bool(_) => "SQL boolean",
            SqlValue::DateTime(_) => "SQL datetime",
        }
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Equality the way a `WHERE column = ?` predicate sees it: numbers
    /// compare across integer, float and boolean forms, and `NULL` equals
    /// nothing.
    pub fn sql_eq(&self, other: &SqlValue) -> bool {
        match (self, other) {
            (SqlValue::Null, _) | (_, SqlValue::Null) => false,
            _ => self.sql_cmp(other) == Some(Ordering::Equal),
        }
    }

    /// Ordering used by `ORDER BY`. `NULL` sorts first; values of unrelated
    /// kinds do not compare.
    pub fn sql_cmp(&self, other: &SqlValue) -> Option<Ordering> {
        match (self, other) {
            (SqlValue::Null, SqlValue::Null) => Some(Ordering::Equal),
            (SqlValue::Null, _) => Some(Ordering::Less),
            (_, SqlValue::Null) => Some(Ordering::Greater),
            (SqlValue::Text(a), SqlValue::Text(b)) => Some(a.cmp(b)),
            (SqlValue::Bytes(a), SqlValue::Bytes(b)) => Some(a.cmp(b)),
            (SqlValue::DateTime(a), SqlValue::DateTime(b)) => Some(a.cmp(b)),
            (SqlValue::Int(a), SqlValue::Int(b)) => Some(a.cmp(b)),
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => None,
            },
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match *self {
            SqlValue::Int(n) => Some(n as f64),
            SqlValue::Float(f) => Some(f),
            SqlValue::Bool(b) => Some(if b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => f.write_str("NULL"),
            SqlValue::Int(n) => write!(f, "{}", n),
            SqlValue::Float(v) => write!(f, "{}", v),
            SqlValue::Text(s) => write!(f, "'{}'", s.replace('\'', "''")),
            SqlValue::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            SqlValue::Bool(b) => f.write_str(if *b { "TRUE" } else { "FALSE" }),
            SqlValue::DateTime(t) => write!(f, "'{}'", t.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}
