//! Scalar and structured-object transformers.

use crate::error::{RestmapError, Result};
use crate::mapping::{EntityMapping, PropertySpec, PropertyType};
use crate::value::{PropertyValue, Record};
use serde_json::{Map, Number, Value};
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

/// What a transformer may know about the record being denormalized.
#[derive(Debug, Clone, Copy)]
pub struct DenormalizeContext<'a> {
    pub mapping: &'a EntityMapping,
    pub record: &'a Record,
    pub partial: bool,
}

/// Bidirectional conversion between a wire value and a property value.
pub trait Transformer {
    fn normalize(&self, value: &PropertyValue, spec: &PropertySpec) -> Result<Value>;

    fn denormalize(
        &self,
        value: &Value,
        spec: &PropertySpec,
        context: &DenormalizeContext<'_>,
    ) -> Result<PropertyValue>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    Boolean,
    Integer,
    Float,
    String,
}

/// Coerces wire scalars to one scalar kind, or passes any scalar through
/// untouched when no kind is fixed. Null always passes through.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScalarTransformer {
    kind: Option<ScalarKind>,
}

impl ScalarTransformer {
    pub fn new(kind: ScalarKind) -> Self {
        Self { kind: Some(kind) }
    }

    pub fn untyped() -> Self {
        Self { kind: None }
    }

    fn coerce(&self, value: PropertyValue, property: &str) -> Result<PropertyValue> {
        if !value.is_scalar() && !value.is_null() {
            return Err(RestmapError::invalid_value(
                property,
                format!("expected a scalar value, got {}", value.kind_name()),
            ));
        }
        match (self.kind, value) {
            (_, PropertyValue::Null) => Ok(PropertyValue::Null),
            (None, value) => Ok(value),
            (Some(ScalarKind::Boolean), value) => Ok(PropertyValue::Bool(match value {
                PropertyValue::Bool(b) => b,
                PropertyValue::Int(i) => i != 0,
                PropertyValue::Float(f) => f != 0.0,
                PropertyValue::String(s) => !(s.is_empty() || s == "0" || s == "false"),
                _ => false,
            })),
            (Some(ScalarKind::Integer), value) => match value {
                PropertyValue::Int(i) => Ok(PropertyValue::Int(i)),
                PropertyValue::Bool(b) => Ok(PropertyValue::Int(b.into())),
                PropertyValue::Float(f) if f.is_finite() => Ok(PropertyValue::Int(f.trunc() as i64)),
                PropertyValue::String(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(PropertyValue::Int)
                    .map_err(|_| {
                        RestmapError::invalid_value(property, format!("\"{}\" is not an integer", s))
                    }),
                other => Err(RestmapError::invalid_value(
                    property,
                    format!("cannot coerce {} to integer", other.kind_name()),
                )),
            },
            (Some(ScalarKind::Float), value) => match value {
                PropertyValue::Float(f) => Ok(PropertyValue::Float(f)),
                PropertyValue::Int(i) => Ok(PropertyValue::Float(i as f64)),
                PropertyValue::Bool(b) => Ok(PropertyValue::Float(if b { 1.0 } else { 0.0 })),
                PropertyValue::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .map(PropertyValue::Float)
                    .map_err(|_| {
                        RestmapError::invalid_value(property, format!("\"{}\" is not a number", s))
                    }),
                other => Err(RestmapError::invalid_value(
                    property,
                    format!("cannot coerce {} to float", other.kind_name()),
                )),
            },
            (Some(ScalarKind::String), value) => Ok(PropertyValue::String(
                value.to_path_segment().unwrap_or_default(),
            )),
        }
    }
}

impl Transformer for ScalarTransformer {
    fn normalize(&self, value: &PropertyValue, spec: &PropertySpec) -> Result<Value> {
        match value {
            PropertyValue::Null => Ok(Value::Null),
            PropertyValue::List(items) if spec.multiple => items
                .iter()
                .map(|item| self.normalize_one(item, &spec.name))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            _ if spec.multiple => Err(RestmapError::invalid_value(
                &spec.name,
                "a multiple property must hold a list",
            )),
            value => self.normalize_one(value, &spec.name),
        }
    }

    fn denormalize(
        &self,
        value: &Value,
        spec: &PropertySpec,
        _context: &DenormalizeContext<'_>,
    ) -> Result<PropertyValue> {
        match value {
            Value::Null => Ok(PropertyValue::Null),
            Value::Array(items) if spec.multiple => items
                .iter()
                .enumerate()
                .map(|(position, item)| {
                    if !is_json_scalar(item) {
                        return Err(RestmapError::invalid_value(
                            &spec.name,
                            format!("expected a list of scalar values, found a non-scalar at position {}", position),
                        ));
                    }
                    self.coerce(json_to_value(item), &spec.name)
                })
                .collect::<Result<Vec<_>>>()
                .map(PropertyValue::List),
            _ if spec.multiple => Err(RestmapError::invalid_value(
                &spec.name,
                "the wire value must be an array when the property is multiple",
            )),
            value if is_json_scalar(value) => self.coerce(json_to_value(value), &spec.name),
            _ => Err(RestmapError::invalid_value(
                &spec.name,
                "expected a scalar value on the wire",
            )),
        }
    }
}

impl ScalarTransformer {
    fn normalize_one(&self, value: &PropertyValue, property: &str) -> Result<Value> {
        let coerced = self.coerce(value.clone(), property)?;
        coerced.scalar_to_json().ok_or_else(|| {
            RestmapError::invalid_value(property, format!("cannot write {}", coerced.kind_name()))
        })
    }
}

/// Free-form nested data. Structure is inferred from the value itself:
/// objects, arrays and scalars map one-to-one.
#[derive(Debug, Clone, Copy, Default)]
pub struct ObjectTransformer;

impl Transformer for ObjectTransformer {
    fn normalize(&self, value: &PropertyValue, spec: &PropertySpec) -> Result<Value> {
        value_to_json(value).ok_or_else(|| {
            RestmapError::invalid_value(
                &spec.name,
                "object properties cannot hold entities or collections",
            )
        })
    }

    fn denormalize(
        &self,
        value: &Value,
        _spec: &PropertySpec,
        _context: &DenormalizeContext<'_>,
    ) -> Result<PropertyValue> {
        Ok(json_to_value(value))
    }
}

fn is_json_scalar(value: &Value) -> bool {
    matches!(value, Value::Bool(_) | Value::Number(_) | Value::String(_))
}

/// Structural conversion of a wire value.
pub(crate) fn json_to_value(value: &Value) -> PropertyValue {
    match value {
        Value::Null => PropertyValue::Null,
        Value::Bool(b) => PropertyValue::Bool(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => PropertyValue::Int(i),
            None => PropertyValue::Float(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => PropertyValue::String(s.clone()),
        Value::Array(items) => PropertyValue::List(items.iter().map(json_to_value).collect()),
        Value::Object(map) => PropertyValue::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), json_to_value(v)))
                .collect::<BTreeMap<_, _>>(),
        ),
    }
}

/// Inverse of [`json_to_value`]; `None` if an entity handle is reached.
pub(crate) fn value_to_json(value: &PropertyValue) -> Option<Value> {
    match value {
        PropertyValue::List(items) => items
            .iter()
            .map(value_to_json)
            .collect::<Option<Vec<_>>>()
            .map(Value::Array),
        PropertyValue::Object(map) => map
            .iter()
            .map(|(k, v)| value_to_json(v).map(|v| (k.clone(), v)))
            .collect::<Option<Map<_, _>>>()
            .map(Value::Object),
        PropertyValue::Float(f) => Some(Number::from_f64(*f).map_or(Value::Null, Value::Number)),
        PropertyValue::Entity(_) | PropertyValue::Collection(_) => None,
        scalar => scalar.scalar_to_json(),
    }
}

/// Transformers keyed by property type name.
#[derive(Clone)]
pub struct TransformerRegister {
    transformers: HashMap<String, Rc<dyn Transformer>>,
}

impl TransformerRegister {
    pub fn empty() -> Self {
        Self {
            transformers: HashMap::new(),
        }
    }

    /// Register with the built-in scalar and object transformers.
    pub fn with_defaults() -> Self {
        let mut register = Self::empty();
        register.register(PropertyType::Boolean, Rc::new(ScalarTransformer::new(ScalarKind::Boolean)));
        register.register(PropertyType::Integer, Rc::new(ScalarTransformer::new(ScalarKind::Integer)));
        register.register(PropertyType::Float, Rc::new(ScalarTransformer::new(ScalarKind::Float)));
        register.register(PropertyType::String, Rc::new(ScalarTransformer::new(ScalarKind::String)));
        register.register(PropertyType::Object, Rc::new(ObjectTransformer));
        register
    }

    /// Adds or replaces the transformer for a type.
    pub fn register(&mut self, property_type: impl Into<PropertyType>, transformer: Rc<dyn Transformer>) {
        let property_type = property_type.into();
        self.transformers
            .insert(property_type.as_str().to_string(), transformer);
    }

    pub fn get(&self, property_type: &PropertyType) -> Result<Rc<dyn Transformer>> {
        self.transformers
            .get(property_type.as_str())
            .cloned()
            .ok_or_else(|| RestmapError::UnknownTransformer(property_type.to_string()))
    }

    pub fn contains(&self, property_type: &PropertyType) -> bool {
        self.transformers.contains_key(property_type.as_str())
    }
}

impl Default for TransformerRegister {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for TransformerRegister {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<&String> = self.transformers.keys().collect();
        types.sort();
        f.debug_struct("TransformerRegister")
            .field("types", &types)
            .finish()
    }
}
