//! Receiver, argument and result values seen by the dispatch layer.
//!
//! Values are cheap to clone: strings and objects sit behind `Arc`, so a
//! cached call target can be invoked concurrently from many threads with
//! shared receivers.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};


/// Class identifier handed out by a method resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ClassId(pub u32);

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

/// Heap object carrying only what dispatch needs: its class and an identity.
#[derive(Debug)]
pub struct ObjectValue {
    pub class: ClassId,
    pub id: u64,
}

#[derive(Debug, Default, Clone)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Interned-style symbol, compared by content
    Symbol(Arc<str>),
    Str(Arc<str>),
    Object(Arc<ObjectValue>),
}

/// Receiver-shape discriminant tested by cache guards.
///
/// Primitive kinds stand for their builtin class; objects are keyed by their
/// concrete class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shape {
    Nil,
    Bool(bool),
    Int,
    Float,
    Symbol,
    Str,
    Class(ClassId),
}

impl Shape {
    #[inline]
    pub fn is_bool(&self) -> bool {
        matches!(self, Shape::Bool(_))
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Nil => write!(f, "nil"),
            Shape::Bool(b) => write!(f, "{b}"),
            Shape::Int => write!(f, "Integer"),
            Shape::Float => write!(f, "Float"),
            Shape::Symbol => write!(f, "Symbol"),
            Shape::Str => write!(f, "String"),
            Shape::Class(id) => write!(f, "class {id}"),
        }
    }
}

impl Value {
    /// Allocate a fresh object of `class`.
    pub fn object(class: ClassId) -> Self {
        Value::Object(Arc::new(ObjectValue {
            class,
            id: NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed),
        }))
    }

    pub fn symbol(name: impl AsRef<str>) -> Self {
        Value::Symbol(Arc::from(name.as_ref()))
    }

    pub fn str(text: impl AsRef<str>) -> Self {
        Value::Str(Arc::from(text.as_ref()))
    }

    #[inline]
    pub fn shape(&self) -> Shape {
        match self {
            Value::Nil => Shape::Nil,
            Value::Bool(b) => Shape::Bool(*b),
            Value::Int(_) => Shape::Int,
            Value::Float(_) => Shape::Float,
            Value::Symbol(_) => Shape::Symbol,
            Value::Str(_) => Shape::Str,
            Value::Object(obj) => Shape::Class(obj.class),
        }
    }

    #[inline]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "Nil",
            Value::Bool(_) => "Bool",
            Value::Int(_) => "Int",
            Value::Float(_) => "Float",
            Value::Symbol(_) => "Symbol",
            Value::Str(_) => "String",
            Value::Object(_) => "Object",
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(fl) => write!(f, "{fl}"),
            Value::Symbol(s) => write!(f, ":{}", s.as_ref()),
            Value::Str(s) => write!(f, "{:?}", s.as_ref()),
            Value::Object(obj) => write!(f, "#<object {} of {}>", obj.id, obj.class),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Nil => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(fl) => serializer.serialize_f64(*fl),
            Value::Symbol(s) => serializer.serialize_str(&format!(":{}", s.as_ref())),
            Value::Str(s) => serializer.serialize_str(s),
            Value::Object(obj) => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("object", &obj.id)?;
                map.serialize_entry("class", &obj.class.0)?;
                map.end()
            }
        }
    }
}
