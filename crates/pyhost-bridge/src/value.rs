//! Host Value Model
//!
//! The tagged union used to move data across the bridge in both directions.
//!
//! ## Type Hierarchy
//!
//! - `Value`: closed enum over every shape the bridge can carry
//! - `Mapping`: key/value table with value-equality keys
//!
//! A `Value` is an owned tree, so it is acyclic by construction. Native
//! structures that contain themselves are rejected by the marshaller.

use std::fmt;
use std::hash::{Hash, Hasher};

use indexmap::IndexMap;
use smol_str::SmolStr;

// ============================================================================
// Value Enum
// ============================================================================

/// A host-side value.
///
/// Equality is structural. `Mapping` equality ignores entry order because
/// the interpreter is free to reorder its tables between calls.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// The interpreter's `None`
    #[default]
    Nil,

    /// Boolean
    Bool(bool),

    /// 64-bit signed integer
    Integer(i64),

    /// IEEE 754 double
    Real(f64),

    /// UTF-8 text
    Text(SmolStr),

    /// Ordered list of values
    Sequence(Vec<Value>),

    /// Key/value table
    Mapping(Mapping),
}

impl Value {
    /// Build a `Text` value.
    pub fn text(s: impl Into<SmolStr>) -> Self {
        Value::Text(s.into())
    }

    /// Name of the variant, used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "Nil",
            Value::Bool(_) => "Bool",
            Value::Integer(_) => "Integer",
            Value::Real(_) => "Real",
            Value::Text(_) => "Text",
            Value::Sequence(_) => "Sequence",
            Value::Mapping(_) => "Mapping",
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// The boolean, if this is a `Bool`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The integer, if this is an `Integer`. Reals are not truncated.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// The float, if this is a `Real`.
    pub fn as_real(&self) -> Option<f64> {
        match self {
            Value::Real(f) => Some(*f),
            _ => None,
        }
    }

    /// Borrow the text, if this is a `Text`.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Borrow the items, if this is a `Sequence`.
    pub fn as_sequence(&self) -> Option<&[Value]> {
        match self {
            Value::Sequence(items) => Some(items),
            _ => None,
        }
    }

    /// Borrow the table, if this is a `Mapping`.
    pub fn as_mapping(&self) -> Option<&Mapping> {
        match self {
            Value::Mapping(map) => Some(map),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Integer(n) => write!(f, "{}", n),
            Value::Real(n) => write!(f, "{}", n),
            Value::Text(s) => write!(f, "{:?}", s.as_str()),
            Value::Sequence(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Mapping(map) => write!(f, "{}", map),
        }
    }
}

// `Value` keys a `Mapping`, so equal values must hash equally. Reals hash by
// bit pattern with `-0.0` folded into `0.0`; a NaN key never equals itself
// and so can be stored but not looked up again.
impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Nil => {}
            Value::Bool(b) => b.hash(state),
            Value::Integer(n) => n.hash(state),
            Value::Real(f) => {
                let f = if *f == 0.0 { 0.0 } else { *f };
                f.to_bits().hash(state);
            }
            Value::Text(s) => s.hash(state),
            Value::Sequence(items) => items.hash(state),
            Value::Mapping(map) => map.hash(state),
        }
    }
}

// ============================================================================
// Conversions from Rust primitives
// ============================================================================

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Nil
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(n as i64)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Real(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(SmolStr::new(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(SmolStr::new(s))
    }
}

impl From<SmolStr> for Value {
    fn from(s: SmolStr) -> Self {
        Value::Text(s)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map_or(Value::Nil, Into::into)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::Sequence(items.into_iter().map(Into::into).collect())
    }
}

impl From<Mapping> for Value {
    fn from(map: Mapping) -> Self {
        Value::Mapping(map)
    }
}

// ============================================================================
// Mapping
// ============================================================================

/// Key/value table with unique keys under value-equality.
///
/// Entries keep the order they were inserted in, which for values coming out
/// of the interpreter is whatever order it iterated its table in. Equality
/// ignores that order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mapping {
    entries: IndexMap<Value, Value>,
}

impl Mapping {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: IndexMap::with_capacity(capacity),
        }
    }

    /// Insert an entry, replacing the value of an equal key.
    ///
    /// A replaced entry keeps its original position. Returns the previous
    /// value if the key was already present.
    pub fn insert(&mut self, key: impl Into<Value>, value: impl Into<Value>) -> Option<Value> {
        self.entries.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &Value) -> bool {
        self.entries.contains_key(key)
    }

    /// Remove an entry, keeping the order of the rest.
    pub fn remove(&mut self, key: &Value) -> Option<Value> {
        self.entries.shift_remove(key)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &Value> {
        self.entries.keys()
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.entries.values()
    }
}

// Order-insensitive to agree with equality: only the length is mixed in.
impl Hash for Mapping {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.entries.len().hash(state);
    }
}

impl<K: Into<Value>, V: Into<Value>> FromIterator<(K, V)> for Mapping {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Mapping::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

impl IntoIterator for Mapping {
    type Item = (Value, Value);
    type IntoIter = indexmap::map::IntoIter<Value, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl fmt::Display for Mapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (k, v)) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", k, v)?;
        }
        write!(f, "}}")
    }
}
