//! The tagged value union and entry row stored by the key-value table.

use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteValueRef;
use sqlx::{TypeInfo, Value as _, ValueRef};

use crate::Error;

/// A stored value: SQLite's dynamic typing restricted to a small tagged union.
///
/// Values round-trip through a `STRICT` table with an `ANY` column, so the
/// stored type is exactly the bound type. A `REAL` or `BLOB` appearing in the
/// column (e.g. written by an external tool) decodes to
/// [`Error::UnsupportedDatatype`], never a panic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
   Null,
   Text(String),
   Integer(i64),
}

impl Value {
   /// The type tag name, used in diagnostics and type-mismatch errors.
   pub fn type_name(&self) -> &'static str {
      match self {
         Value::Null => "Null",
         Value::Text(_) => "Text",
         Value::Integer(_) => "Integer",
      }
   }

   /// Returns the inner integer, or `None` for non-integer values.
   pub fn as_integer(&self) -> Option<i64> {
      match self {
         Value::Integer(n) => Some(*n),
         _ => None,
      }
   }

   /// Returns the inner text, or `None` for non-text values.
   pub fn as_text(&self) -> Option<&str> {
      match self {
         Value::Text(s) => Some(s),
         _ => None,
      }
   }
}

impl From<i64> for Value {
   fn from(n: i64) -> Self {
      Value::Integer(n)
   }
}

impl From<String> for Value {
   fn from(s: String) -> Self {
      Value::Text(s)
   }
}

impl From<&str> for Value {
   fn from(s: &str) -> Self {
      Value::Text(s.to_string())
   }
}

impl std::fmt::Display for Value {
   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      match self {
         Value::Null => write!(f, "NULL"),
         Value::Text(s) => write!(f, "{}", s),
         Value::Integer(n) => write!(f, "{}", n),
      }
   }
}

/// A live row in the store: one per key.
///
/// `last_updated` is a caller-supplied logical timestamp. The store does not
/// read a clock; an opaque monotonic i64 keeps predicate semantics
/// deterministic and testable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
   /// Unique key, immutable once created.
   pub key: String,

   /// Current value; mutated in place by upserts.
   pub value: Value,

   /// Logical timestamp of the last mutation, if the caller supplied one.
   pub last_updated: Option<i64>,
}

/// Decode a raw SQLite value into the tagged union by inspecting the stored
/// type affinity.
pub(crate) fn decode_value(value: SqliteValueRef<'_>) -> Result<Value, Error> {
   if value.is_null() {
      return Ok(Value::Null);
   }

   let column_type = value.type_info();

   match column_type.name() {
      "TEXT" => {
         let v = value.to_owned().try_decode::<String>().map_err(|e| {
            Error::UnsupportedDatatype(format!("TEXT value failed to decode: {}", e))
         })?;
         Ok(Value::Text(v))
      }

      "INTEGER" => {
         let v = value.to_owned().try_decode::<i64>().map_err(|e| {
            Error::UnsupportedDatatype(format!("INTEGER value failed to decode: {}", e))
         })?;
         Ok(Value::Integer(v))
      }

      "NULL" => Ok(Value::Null),

      other => Err(Error::UnsupportedDatatype(format!(
         "stored value has SQLite type {}, expected NULL, TEXT, or INTEGER",
         other
      ))),
   }
}
