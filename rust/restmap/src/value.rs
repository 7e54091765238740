//! In-process property values and identity keys.
//!
//! Wire records stay untyped (`serde_json`), entity properties are held as
//! [`PropertyValue`]. Conversion between the two is the job of the
//! transformers in [`crate::normalizer`].

use crate::collection::EntityCollection;
use crate::entity::Entity;
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;
use std::fmt;

/// A raw wire record as received from (or sent to) a connection.
pub type Record = Map<String, Value>;

/// Identity of an entity within its type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Identifier {
    Int(i64),
    Str(String),
}

impl Identifier {
    /// Reads an identifier from a wire value. Only integers and strings
    /// qualify.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(Identifier::Int),
            Value::String(s) => Some(Identifier::Str(s.clone())),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Identifier::Int(i) => Value::from(*i),
            Identifier::Str(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::Int(i) => write!(f, "{}", i),
            Identifier::Str(s) => f.write_str(s),
        }
    }
}

impl From<i64> for Identifier {
    fn from(value: i64) -> Self {
        Identifier::Int(value)
    }
}

impl From<i32> for Identifier {
    fn from(value: i32) -> Self {
        Identifier::Int(value.into())
    }
}

impl From<&str> for Identifier {
    fn from(value: &str) -> Self {
        Identifier::Str(value.to_string())
    }
}

impl From<String> for Identifier {
    fn from(value: String) -> Self {
        Identifier::Str(value)
    }
}

impl TryFrom<&PropertyValue> for Identifier {
    type Error = ConversionError;

    fn try_from(value: &PropertyValue) -> Result<Self, Self::Error> {
        match value {
            PropertyValue::Int(i) => Ok(Identifier::Int(*i)),
            PropertyValue::String(s) => Ok(Identifier::Str(s.clone())),
            other => Err(ConversionError::new("identifier", other)),
        }
    }
}

impl From<Identifier> for PropertyValue {
    fn from(value: Identifier) -> Self {
        match value {
            Identifier::Int(i) => PropertyValue::Int(i),
            Identifier::Str(s) => PropertyValue::String(s),
        }
    }
}

/// Typed value of a mapped property.
///
/// Entity and collection variants are shared handles: equality on them is
/// reference identity, not structural.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum PropertyValue {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<PropertyValue>),
    Object(BTreeMap<String, PropertyValue>),
    Entity(Entity),
    Collection(EntityCollection),
}

impl PropertyValue {
    pub fn is_null(&self) -> bool {
        matches!(self, PropertyValue::Null)
    }

    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            PropertyValue::Bool(_)
                | PropertyValue::Int(_)
                | PropertyValue::Float(_)
                | PropertyValue::String(_)
        )
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            PropertyValue::Null => "null",
            PropertyValue::Bool(_) => "boolean",
            PropertyValue::Int(_) => "integer",
            PropertyValue::Float(_) => "float",
            PropertyValue::String(_) => "string",
            PropertyValue::List(_) => "list",
            PropertyValue::Object(_) => "object",
            PropertyValue::Entity(_) => "entity",
            PropertyValue::Collection(_) => "collection",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PropertyValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Float(f) => Some(*f),
            PropertyValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_entity(&self) -> Option<&Entity> {
        match self {
            PropertyValue::Entity(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_collection(&self) -> Option<&EntityCollection> {
        match self {
            PropertyValue::Collection(c) => Some(c),
            _ => None,
        }
    }

    /// Wire form of a null or scalar value; `None` for anything structured.
    pub fn scalar_to_json(&self) -> Option<Value> {
        match self {
            PropertyValue::Null => Some(Value::Null),
            PropertyValue::Bool(b) => Some(Value::Bool(*b)),
            PropertyValue::Int(i) => Some(Value::from(*i)),
            PropertyValue::Float(f) => Some(Number::from_f64(*f).map_or(Value::Null, Value::Number)),
            PropertyValue::String(s) => Some(Value::String(s.clone())),
            _ => None,
        }
    }

    /// Plain-text rendering used for path parameters and query strings.
    pub fn to_path_segment(&self) -> Option<String> {
        match self {
            PropertyValue::Bool(b) => Some(b.to_string()),
            PropertyValue::Int(i) => Some(i.to_string()),
            PropertyValue::Float(f) => Some(f.to_string()),
            PropertyValue::String(s) => Some(s.clone()),
            _ => None,
        }
    }
}

/// Failed conversion out of a [`PropertyValue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionError {
    pub expected: &'static str,
    pub found: &'static str,
}

impl ConversionError {
    fn new(expected: &'static str, found: &PropertyValue) -> Self {
        Self {
            expected,
            found: found.kind_name(),
        }
    }
}

impl fmt::Display for ConversionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "expected {}, found {}", self.expected, self.found)
    }
}

impl std::error::Error for ConversionError {}

macro_rules! impl_conversions {
    ($ty:ty, $variant:ident, $expected:literal) => {
        impl From<$ty> for PropertyValue {
            fn from(value: $ty) -> Self {
                PropertyValue::$variant(value)
            }
        }

        impl TryFrom<PropertyValue> for $ty {
            type Error = ConversionError;

            fn try_from(value: PropertyValue) -> Result<Self, Self::Error> {
                match value {
                    PropertyValue::$variant(inner) => Ok(inner),
                    other => Err(ConversionError::new($expected, &other)),
                }
            }
        }
    };
}

impl_conversions!(bool, Bool, "boolean");
impl_conversions!(i64, Int, "integer");
impl_conversions!(String, String, "string");
impl_conversions!(Entity, Entity, "entity");
impl_conversions!(EntityCollection, Collection, "collection");
impl_conversions!(Vec<PropertyValue>, List, "list");
impl_conversions!(BTreeMap<String, PropertyValue>, Object, "object");

impl TryFrom<PropertyValue> for f64 {
    type Error = ConversionError;

    fn try_from(value: PropertyValue) -> Result<Self, Self::Error> {
        value
            .as_f64()
            .ok_or_else(|| ConversionError::new("float", &value))
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Float(value)
    }
}

impl From<i32> for PropertyValue {
    fn from(value: i32) -> Self {
        PropertyValue::Int(value.into())
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::String(value.to_string())
    }
}

impl From<&Entity> for PropertyValue {
    fn from(value: &Entity) -> Self {
        PropertyValue::Entity(value.clone())
    }
}

impl<T: Into<PropertyValue>> From<Option<T>> for PropertyValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(PropertyValue::Null, Into::into)
    }
}
