//! Records: the immutable, named-field tuples that flow through a topology.
//!
//! A [`Record`] is an ordered mapping from declared field name to [`Value`].
//! The field set is fixed per producing unit by its [`Schema`]; values are
//! dynamically typed (a tagged union covering scalars, lists, and maps, so
//! nested domain objects like an "event" travel as structured data).
//!
//! Records are immutable once emitted and cheap to clone: the schema and the
//! value vector are both `Arc`-shared, so a broadcast to N instances increments
//! refcounts instead of deep-copying.
//!
//! Field presence and arity are validated at the unit boundary
//! ([`Record::new`] / [`Schema::new`]); nothing downstream relies on implicit
//! structure.

use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::RecordError;

/// A dynamically-typed value carried in a record field.
///
/// Nested maps use `BTreeMap` so iteration order (and therefore hashing) is
/// deterministic, which the fields grouping depends on.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Value {
  /// Absent / null.
  Null,
  /// Boolean.
  Bool(bool),
  /// Signed 64-bit integer.
  Int(i64),
  /// 64-bit float. Compared and hashed by bit pattern.
  Float(f64),
  /// UTF-8 string.
  Str(String),
  /// Ordered list of values.
  List(Vec<Value>),
  /// String-keyed map of values, deterministically ordered.
  Map(BTreeMap<String, Value>),
}

impl PartialEq for Value {
  fn eq(&self, other: &Self) -> bool {
    match (self, other) {
      (Value::Null, Value::Null) => true,
      (Value::Bool(a), Value::Bool(b)) => a == b,
      (Value::Int(a), Value::Int(b)) => a == b,
      // Bit equality keeps Eq lawful (NaN == NaN here).
      (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
      (Value::Str(a), Value::Str(b)) => a == b,
      (Value::List(a), Value::List(b)) => a == b,
      (Value::Map(a), Value::Map(b)) => a == b,
      _ => false,
    }
  }
}

impl Eq for Value {}

impl Hash for Value {
  fn hash<H: Hasher>(&self, state: &mut H) {
    std::mem::discriminant(self).hash(state);
    match self {
      Value::Null => {}
      Value::Bool(b) => b.hash(state),
      Value::Int(i) => i.hash(state),
      Value::Float(f) => f.to_bits().hash(state),
      Value::Str(s) => s.hash(state),
      Value::List(items) => items.hash(state),
      Value::Map(map) => map.hash(state),
    }
  }
}

impl Value {
  /// Returns the string content if this is a `Str` value.
  pub fn as_str(&self) -> Option<&str> {
    match self {
      Value::Str(s) => Some(s.as_str()),
      _ => None,
    }
  }

  /// Returns the integer content if this is an `Int` value.
  pub fn as_int(&self) -> Option<i64> {
    match self {
      Value::Int(i) => Some(*i),
      _ => None,
    }
  }

  /// Returns the map content if this is a `Map` value.
  pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
    match self {
      Value::Map(m) => Some(m),
      _ => None,
    }
  }

  /// Returns true if this value is `Null`.
  pub fn is_null(&self) -> bool {
    matches!(self, Value::Null)
  }
}

impl Display for Value {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    match self {
      Value::Null => write!(f, "null"),
      Value::Bool(b) => write!(f, "{}", b),
      Value::Int(i) => write!(f, "{}", i),
      Value::Float(x) => write!(f, "{}", x),
      Value::Str(s) => write!(f, "{}", s),
      Value::List(items) => {
        write!(f, "[")?;
        for (i, item) in items.iter().enumerate() {
          if i > 0 {
            write!(f, ", ")?;
          }
          write!(f, "{}", item)?;
        }
        write!(f, "]")
      }
      Value::Map(map) => {
        write!(f, "{{")?;
        for (i, (k, v)) in map.iter().enumerate() {
          if i > 0 {
            write!(f, ", ")?;
          }
          write!(f, "{}: {}", k, v)?;
        }
        write!(f, "}}")
      }
    }
  }
}

impl From<bool> for Value {
  fn from(b: bool) -> Self {
    Value::Bool(b)
  }
}

impl From<i64> for Value {
  fn from(i: i64) -> Self {
    Value::Int(i)
  }
}

impl From<f64> for Value {
  fn from(x: f64) -> Self {
    Value::Float(x)
  }
}

impl From<&str> for Value {
  fn from(s: &str) -> Self {
    Value::Str(s.to_string())
  }
}

impl From<String> for Value {
  fn from(s: String) -> Self {
    Value::Str(s)
  }
}

impl From<serde_json::Value> for Value {
  fn from(v: serde_json::Value) -> Self {
    match v {
      serde_json::Value::Null => Value::Null,
      serde_json::Value::Bool(b) => Value::Bool(b),
      serde_json::Value::Number(n) => {
        if let Some(i) = n.as_i64() {
          Value::Int(i)
        } else {
          Value::Float(n.as_f64().unwrap_or(f64::NAN))
        }
      }
      serde_json::Value::String(s) => Value::Str(s),
      serde_json::Value::Array(items) => Value::List(items.into_iter().map(Value::from).collect()),
      serde_json::Value::Object(map) => Value::Map(
        map
          .into_iter()
          .map(|(k, v)| (k, Value::from(v)))
          .collect(),
      ),
    }
  }
}

impl From<Value> for serde_json::Value {
  fn from(v: Value) -> Self {
    match v {
      Value::Null => serde_json::Value::Null,
      Value::Bool(b) => serde_json::Value::Bool(b),
      Value::Int(i) => serde_json::Value::from(i),
      Value::Float(x) => {
        serde_json::Number::from_f64(x).map_or(serde_json::Value::Null, serde_json::Value::Number)
      }
      Value::Str(s) => serde_json::Value::String(s),
      Value::List(items) => {
        serde_json::Value::Array(items.into_iter().map(serde_json::Value::from).collect())
      }
      Value::Map(map) => serde_json::Value::Object(
        map
          .into_iter()
          .map(|(k, v)| (k, serde_json::Value::from(v)))
          .collect(),
      ),
    }
  }
}

/// An immutable, `Arc`-shared ordered list of field names.
///
/// Built once per producing unit; duplicate field names are rejected at
/// construction.
#[derive(Clone, Debug)]
pub struct Schema {
  inner: Arc<SchemaInner>,
}

#[derive(Debug)]
struct SchemaInner {
  fields: Vec<String>,
}

impl Schema {
  /// Creates a schema from an ordered list of field names.
  ///
  /// Returns `RecordError::DuplicateField` if a name repeats.
  pub fn new<I, S>(fields: I) -> Result<Self, RecordError>
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    let fields: Vec<String> = fields.into_iter().map(Into::into).collect();
    for (i, name) in fields.iter().enumerate() {
      if fields[..i].contains(name) {
        return Err(RecordError::DuplicateField { name: name.clone() });
      }
    }
    Ok(Self {
      inner: Arc::new(SchemaInner { fields }),
    })
  }

  /// Returns the field names in declaration order.
  pub fn fields(&self) -> &[String] {
    &self.inner.fields
  }

  /// Returns the number of fields.
  pub fn len(&self) -> usize {
    self.inner.fields.len()
  }

  /// Returns true if the schema declares no fields (a pure-sink unit).
  pub fn is_empty(&self) -> bool {
    self.inner.fields.is_empty()
  }

  /// Returns the position of `name`, if declared.
  pub fn position(&self, name: &str) -> Option<usize> {
    self.inner.fields.iter().position(|f| f == name)
  }

  /// Returns true if the schema declares `name`.
  pub fn contains(&self, name: &str) -> bool {
    self.position(name).is_some()
  }
}

impl PartialEq for Schema {
  fn eq(&self, other: &Self) -> bool {
    Arc::ptr_eq(&self.inner, &other.inner) || self.inner.fields == other.inner.fields
  }
}

impl Eq for Schema {}

/// An immutable named-field tuple: one schema plus exactly one value per field.
///
/// Cloning is cheap (both parts are `Arc`-shared); consumers never mutate a
/// record they receive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
  schema: Schema,
  values: Arc<Vec<Value>>,
}

impl Record {
  /// Creates a record binding `values` to `schema` positionally.
  ///
  /// Returns `RecordError::ArityMismatch` unless exactly one value per
  /// declared field is supplied.
  pub fn new(schema: Schema, values: Vec<Value>) -> Result<Self, RecordError> {
    if values.len() != schema.len() {
      return Err(RecordError::ArityMismatch {
        expected: schema.len(),
        actual: values.len(),
      });
    }
    Ok(Self {
      schema,
      values: Arc::new(values),
    })
  }

  /// Returns the record's schema.
  pub fn schema(&self) -> &Schema {
    &self.schema
  }

  /// Returns the value of the named field, if declared.
  pub fn get(&self, name: &str) -> Option<&Value> {
    self.schema.position(name).map(|i| &self.values[i])
  }

  /// Returns the value of the named field, or `RecordError::UnknownField`.
  ///
  /// The fallible form used at unit boundaries where a missing field is a
  /// processing failure rather than an optional lookup.
  pub fn require(&self, name: &str) -> Result<&Value, RecordError> {
    self.get(name).ok_or_else(|| RecordError::UnknownField {
      name: name.to_string(),
    })
  }

  /// Returns the value at positional index `i`, if in range.
  pub fn field(&self, i: usize) -> Option<&Value> {
    self.values.get(i)
  }

  /// Returns the number of fields.
  pub fn len(&self) -> usize {
    self.values.len()
  }

  /// Returns true if the record carries no fields.
  pub fn is_empty(&self) -> bool {
    self.values.is_empty()
  }

  /// Iterates `(field name, value)` pairs in declaration order.
  pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
    self
      .schema
      .inner
      .fields
      .iter()
      .map(String::as_str)
      .zip(self.values.iter())
  }
}

impl Display for Record {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    write!(f, "(")?;
    for (i, (name, value)) in self.iter().enumerate() {
      if i > 0 {
        write!(f, ", ")?;
      }
      write!(f, "{}: {}", name, value)?;
    }
    write!(f, ")")
  }
}
