//! Field values, identities and rows.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Column values of a persistent object, keyed by field name.
pub type Fields = BTreeMap<String, Value>;

/// Builds a [`Fields`] map from name/value pairs.
///
/// ```rust
/// use graphtx_store::{fields, Value};
///
/// let f = fields([("name", Value::from("tools")), ("rank", Value::from(3))]);
/// assert_eq!(f["rank"], Value::Integer(3));
/// ```
pub fn fields<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Fields
where
    K: Into<String>,
    V: Into<Value>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// A single column value.
///
/// Floats are not supported so that values stay `Eq + Ord + Hash` and can
/// be used as key components.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Value {
    /// SQL-style null; also the value of a broken reference.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed 64-bit integer.
    Integer(i64),
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// UUID, used for generated keys.
    Uuid(Uuid),
    /// A 1:1 reference (foreign key) to another object.
    Ref(Identity),
    /// A list of values; a list of `Ref`s models a 1:N or M:N reference.
    List(Vec<Value>),
}

impl Value {
    /// Returns true for [`Value::Null`].
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the integer, if this is one.
    #[must_use]
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the text, if this is text.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the referenced identity for a 1:1 reference.
    #[must_use]
    pub fn as_identity(&self) -> Option<&Identity> {
        match self {
            Value::Ref(id) => Some(id),
            _ => None,
        }
    }

    /// Returns every identity this value references.
    ///
    /// A `Ref` yields one identity, a `List` yields the `Ref`s it contains,
    /// anything else yields nothing.
    #[must_use]
    pub fn references(&self) -> Vec<&Identity> {
        match self {
            Value::Ref(id) => vec![id],
            Value::List(items) => items.iter().filter_map(Value::as_identity).collect(),
            _ => Vec::new(),
        }
    }

    /// Returns true if this value references `target`.
    #[must_use]
    pub fn refers_to(&self, target: &Identity) -> bool {
        match self {
            Value::Ref(id) => id == target,
            Value::List(items) => items.iter().any(|v| v.as_identity() == Some(target)),
            _ => false,
        }
    }

    /// Removes every reference to `target`, returning true if anything changed.
    ///
    /// A matching `Ref` becomes `Null`; matching list elements are dropped.
    pub fn break_reference(&mut self, target: &Identity) -> bool {
        match self {
            Value::Ref(id) if id == target => {
                *self = Value::Null;
                true
            }
            Value::List(items) => {
                let before = items.len();
                items.retain(|v| v.as_identity() != Some(target));
                items.len() != before
            }
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Integer(n) => write!(f, "{n}"),
            Value::Text(s) => write!(f, "{s:?}"),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::Uuid(u) => write!(f, "{u}"),
            Value::Ref(id) => write!(f, "&{id}"),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
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
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<Uuid> for Value {
    fn from(u: Uuid) -> Self {
        Value::Uuid(u)
    }
}

impl From<Identity> for Value {
    fn from(id: Identity) -> Self {
        Value::Ref(id)
    }
}

impl From<&Identity> for Value {
    fn from(id: &Identity) -> Self {
        Value::Ref(id.clone())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Stable identity of one logical persistent object.
///
/// An identity is the object kind plus its primary-key values. It is
/// immutable once built and is never recomputed from a mutated object.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Identity {
    kind: String,
    key: Vec<Value>,
}

impl Identity {
    /// Creates an identity from a kind and its key values.
    pub fn new(kind: impl Into<String>, key: impl IntoIterator<Item = Value>) -> Self {
        Self {
            kind: kind.into(),
            key: key.into_iter().collect(),
        }
    }

    /// Creates an identity with a single key value.
    pub fn of(kind: impl Into<String>, key: impl Into<Value>) -> Self {
        Self::new(kind, [key.into()])
    }

    /// Creates an identity with a freshly generated UUID key.
    #[must_use]
    pub fn generated(kind: impl Into<String>) -> Self {
        Self::of(kind, Uuid::new_v4())
    }

    /// Returns the object kind.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Returns the key values.
    #[must_use]
    pub fn key(&self) -> &[Value] {
        &self.key
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.kind)?;
        for (i, v) in self.key.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{v}")?;
        }
        write!(f, ")")
    }
}

/// A stored row: identity plus field values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    /// Identity of the object the row belongs to.
    pub identity: Identity,
    /// Column values.
    pub fields: Fields,
}

impl Row {
    /// Creates a row.
    #[must_use]
    pub fn new(identity: Identity, fields: Fields) -> Self {
        Self { identity, fields }
    }
}
