//! Entity-reference properties.
//!
//! A reference arrives on the wire as an identifier (or list of
//! identifiers) or, when declared `inline`, as the full nested record(s).
//! Identifiers become partial builds, so the identity map hands back a known
//! instance or the lazy-reference stage supplies a placeholder. Inverse
//! relations carry nothing on the wire; they become a collection that
//! queries the target type by foreign key when first iterated.

use super::transformer::{json_to_value, DenormalizeContext, Transformer};
use crate::collection::EntityCollection;
use crate::entity::Entity;
use crate::error::{RestmapError, Result};
use crate::manager::ManagerRef;
use crate::mapping::{PropertySpec, ReferenceOptions};
use crate::value::{PropertyValue, Record};
use serde_json::Value;
use std::rc::Rc;

pub struct EntityTransformer {
    manager: ManagerRef,
}

impl EntityTransformer {
    pub fn new(manager: ManagerRef) -> Self {
        Self { manager }
    }

    fn reference<'a>(&self, spec: &'a PropertySpec) -> Result<&'a ReferenceOptions> {
        spec.reference.as_ref().ok_or_else(|| {
            RestmapError::invalid_value(&spec.name, "entity property declares no target entity")
        })
    }

    fn build_one(
        &self,
        value: &Value,
        spec: &PropertySpec,
        reference: &ReferenceOptions,
        context: &DenormalizeContext<'_>,
    ) -> Result<PropertyValue> {
        let manager = self.manager.upgrade()?;
        let entity = match value {
            Value::Null => return Ok(PropertyValue::Null),
            Value::Object(record) => {
                let partial = if reference.inline { context.partial } else { true };
                manager
                    .entity_builder()
                    .build_entity(&reference.entity, record.clone(), partial)?
            }
            Value::Bool(_) | Value::Number(_) | Value::String(_) if !reference.inline => {
                let target = manager.mappings().get(&reference.entity)?;
                let identifier = target.identifier().ok_or_else(|| {
                    RestmapError::invalid_value(
                        &spec.name,
                        format!(
                            "\"{}\" has no identifier and can only be referenced inline",
                            reference.entity
                        ),
                    )
                })?;
                let mut record = Record::new();
                record.insert(identifier.wire_name().to_string(), value.clone());
                manager.entity_builder().build_entity(&reference.entity, record, true)?
            }
            _ => {
                return Err(RestmapError::invalid_value(
                    &spec.name,
                    if reference.inline {
                        "expected an inline record"
                    } else {
                        "expected an identifier"
                    },
                ))
            }
        };
        Ok(PropertyValue::Entity(entity))
    }

    fn inverse_collection(
        &self,
        field: &str,
        reference: &ReferenceOptions,
        context: &DenormalizeContext<'_>,
    ) -> Result<PropertyValue> {
        let owner_id = context
            .mapping
            .identifier()
            .and_then(|id| context.record.get(id.wire_name()))
            .filter(|value| !value.is_null());

        let Some(owner_id) = owner_id else {
            return Ok(PropertyValue::Collection(EntityCollection::new()));
        };

        let manager = self.manager.upgrade()?;
        let query = manager
            .query_builder()
            .get(reference.entity.as_str())
            .and_where(field, json_to_value(owner_id))
            .get_query()?;

        tracing::debug!(
            entity_type = %reference.entity,
            foreign_key = %field,
            "deferred inverse collection"
        );
        Ok(PropertyValue::Collection(EntityCollection::deferred(
            Rc::new(query),
            1,
        )))
    }

    fn normalize_one(
        &self,
        entity: &Entity,
        spec: &PropertySpec,
        reference: &ReferenceOptions,
    ) -> Result<Value> {
        if reference.inline {
            let manager = self.manager.upgrade()?;
            return manager
                .normalizer()
                .normalize(&entity.metadata())
                .map(Value::Object);
        }
        entity
            .identifier()
            .map(|id| id.to_json())
            .ok_or_else(|| {
                RestmapError::invalid_value(
                    &spec.name,
                    format!(
                        "referenced \"{}\" has no identifier yet; persist it first",
                        entity.entity_type()
                    ),
                )
            })
    }
}

impl Transformer for EntityTransformer {
    fn normalize(&self, value: &PropertyValue, spec: &PropertySpec) -> Result<Value> {
        let reference = self.reference(spec)?;
        match value {
            PropertyValue::Null => Ok(Value::Null),
            PropertyValue::Entity(entity) => self.normalize_one(entity, spec, reference),
            PropertyValue::Collection(collection) => collection
                .iter()
                .map(|entity| self.normalize_one(&entity, spec, reference))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            PropertyValue::List(items) => items
                .iter()
                .map(|item| match item {
                    PropertyValue::Entity(entity) => self.normalize_one(entity, spec, reference),
                    other => Err(RestmapError::invalid_value(
                        &spec.name,
                        format!("expected entities, found {}", other.kind_name()),
                    )),
                })
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            other => Err(RestmapError::invalid_value(
                &spec.name,
                format!("expected an entity reference, found {}", other.kind_name()),
            )),
        }
    }

    fn denormalize(
        &self,
        value: &Value,
        spec: &PropertySpec,
        context: &DenormalizeContext<'_>,
    ) -> Result<PropertyValue> {
        let reference = self.reference(spec)?;

        if let Some(field) = &reference.inverse_field {
            return self.inverse_collection(field, reference, context);
        }

        if !spec.multiple {
            return self.build_one(value, spec, reference, context);
        }

        match value {
            Value::Null => Ok(PropertyValue::Null),
            Value::Array(items) => {
                let collection = EntityCollection::new();
                for item in items {
                    if let PropertyValue::Entity(entity) =
                        self.build_one(item, spec, reference, context)?
                    {
                        collection.add(entity);
                    }
                }
                Ok(PropertyValue::Collection(collection))
            }
            _ => Err(RestmapError::invalid_value(
                &spec.name,
                "the wire value must be an array when the property is multiple",
            )),
        }
    }
}
