use super::Entity;
use crate::error::{RestmapError, Result};
use crate::mapping::{EntityMapping, PropertySpec};
use crate::value::{Identifier, PropertyValue};
use std::rc::Rc;

/// Raw accessor over an entity's mapped state.
///
/// Reads and writes here never initialize lazy references and ignore
/// read-only declarations; the normalizer and identity map rely on both.
#[derive(Debug, Clone)]
pub struct EntityMetadata {
    entity: Entity,
}

impl EntityMetadata {
    pub(crate) fn new(entity: Entity) -> Self {
        Self { entity }
    }

    pub fn entity(&self) -> &Entity {
        &self.entity
    }

    pub fn mapping(&self) -> &Rc<EntityMapping> {
        self.entity.mapping()
    }

    pub fn entity_type(&self) -> &str {
        self.entity.entity_type()
    }

    pub fn identifier_value(&self) -> Option<Identifier> {
        self.entity.identifier()
    }

    pub fn property_value(&self, property: &str) -> Result<PropertyValue> {
        self.spec(property)?;
        Ok(self.entity.read_field(property))
    }

    pub fn set_property_value(&self, property: &str, value: PropertyValue) -> Result<()> {
        self.spec(property)?;
        self.entity.write_field(property, value);
        Ok(())
    }

    /// Whether the property has been assigned at all, null included.
    pub fn is_set(&self, property: &str) -> bool {
        self.entity.has_field(property)
    }

    pub fn writable_properties(&self) -> impl Iterator<Item = &PropertySpec> {
        self.entity.mapping().writable_properties()
    }

    fn spec(&self, property: &str) -> Result<&PropertySpec> {
        self.entity
            .mapping()
            .property(property)
            .ok_or_else(|| RestmapError::UnknownProperty {
                entity_type: self.entity_type().to_string(),
                property: property.to_string(),
            })
    }
}
