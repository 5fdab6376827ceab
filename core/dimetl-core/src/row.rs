//! Row model: the unit of data flowing through a pipeline.
//!
//! A [`Row`] is an insertion-ordered list of `(field, Value)` pairs. Field
//! names are logical: each table or source call site may pass a
//! [`NameMapping`] that redirects a logical name to the field actually present
//! in the row, so one table definition can serve differently-named inputs.

use crate::error::{EtlError, EtlResult};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Tuple of values extracted from a row, e.g. the lookup attributes of a
/// dimension. Most business keys have one to four parts.
pub type ValueTuple = SmallVec<[Value; 4]>;

/// A single field value.
///
/// Ordering is total: `Null < Bool < numbers < Text`. Integers and floats
/// compare numerically; when numerically equal the integer sorts first, so
/// `Ord` stays consistent with the structural `Eq`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Integer view of the value. Text is parsed, integral floats are accepted.
    pub fn to_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
            Value::Text(s) => s.trim().parse().ok(),
            Value::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// Floating point view of the value. Text is parsed.
    pub fn to_float(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) | Value::Float(_) => 2,
            Value::Text(_) => 3,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Int(a), Value::Float(b)) => (*a as f64).total_cmp(b).then(Ordering::Less),
            (Value::Float(a), Value::Int(b)) => a.total_cmp(&(*b as f64)).then(Ordering::Greater),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Bool(b) => b.hash(state),
            Value::Int(i) => i.hash(state),
            Value::Float(f) => f.to_bits().hash(state),
            Value::Text(s) => s.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Logical → actual field-name mapping supplied at a call site.
///
/// Names without an entry resolve to themselves.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameMapping(HashMap<String, String>);

impl NameMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `logical` to `actual` (builder style).
    pub fn with(mut self, logical: impl Into<String>, actual: impl Into<String>) -> Self {
        self.0.insert(logical.into(), actual.into());
        self
    }

    /// Actual field name for a logical name.
    pub fn resolve<'a>(&'a self, logical: &'a str) -> &'a str {
        self.0.get(logical).map(String::as_str).unwrap_or(logical)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<const N: usize> From<[(&str, &str); N]> for NameMapping {
    fn from(pairs: [(&str, &str); N]) -> Self {
        Self(
            pairs
                .into_iter()
                .map(|(l, a)| (l.to_string(), a.to_string()))
                .collect(),
        )
    }
}

/// A mutable, insertion-ordered record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Row {
    fields: Vec<(String, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fields: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|(n, _)| n == name)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.position(name).map(|i| &self.fields[i].1)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.position(name).map(|i| &mut self.fields[i].1)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Set a field, replacing an existing value in place or appending.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.position(&name) {
            Some(i) => self.fields[i].1 = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.position(name).map(|i| self.fields.remove(i).1)
    }

    /// Look up a logical field through a name mapping.
    pub fn get_mapped(&self, name: &str, mapping: &NameMapping) -> Option<&Value> {
        self.get(mapping.resolve(name))
    }

    /// Set a logical field through a name mapping.
    pub fn set_mapped(&mut self, name: &str, mapping: &NameMapping, value: impl Into<Value>) {
        let actual = mapping.resolve(name).to_string();
        self.set(actual, value);
    }

    /// Copy every field of `other` into this row; `other` wins on conflict.
    pub fn merge(&mut self, other: &Row) {
        for (name, value) in &other.fields {
            self.set(name.clone(), value.clone());
        }
    }

    /// Values of the given logical fields, in order.
    ///
    /// A field absent from the row (after mapping) is a configuration error:
    /// the table definition and the row disagree.
    pub fn values_of<S: AsRef<str>>(
        &self,
        names: &[S],
        mapping: &NameMapping,
    ) -> EtlResult<ValueTuple> {
        names
            .iter()
            .map(|name| {
                let name = name.as_ref();
                self.get_mapped(name, mapping).cloned().ok_or_else(|| {
                    EtlError::config(format!(
                        "field '{}' (mapped to '{}') is missing from row",
                        name,
                        mapping.resolve(name)
                    ))
                })
            })
            .collect()
    }

    /// New row holding the given logical fields under their logical names.
    /// Missing fields become `Null`.
    pub fn project<S: AsRef<str>>(&self, names: &[S], mapping: &NameMapping) -> Row {
        let mut out = Row::with_capacity(names.len());
        for name in names {
            let name = name.as_ref();
            let value = self.get_mapped(name, mapping).cloned().unwrap_or_default();
            out.fields.push((name.to_string(), value));
        }
        out
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(n, _)| n.as_str())
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (k, v) in iter {
            row.set(k, v);
        }
        row
    }
}

impl IntoIterator for Row {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

/// Build a [`Row`] from `field => value` pairs.
///
/// ```rust
/// use dimetl_core::row;
/// let r = row! { "url" => "http://example.org/", "size" => 1024 };
/// assert_eq!(r.len(), 2);
/// ```
#[macro_export]
macro_rules! row {
    () => { $crate::row::Row::new() };
    ($($name:expr => $value:expr),+ $(,)?) => {{
        let mut r = $crate::row::Row::new();
        $( r.set($name, $crate::row::Value::from($value)); )+
        r
    }};
}
