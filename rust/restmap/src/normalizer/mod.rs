//! Conversion between wire records and entity state.

pub mod entity_transformer;
pub mod transformer;

pub use entity_transformer::EntityTransformer;
pub use transformer::{
    DenormalizeContext, ObjectTransformer, ScalarKind, ScalarTransformer, Transformer,
    TransformerRegister,
};

use crate::entity::EntityMetadata;
use crate::error::{RestmapError, Result};
use crate::mapping::{EntityMapping, PropertySpec};
use crate::value::{Identifier, Record};
use serde_json::Value;
use std::rc::Rc;

#[derive(Debug, Default)]
pub struct Normalizer {
    transformers: TransformerRegister,
}

impl Normalizer {
    pub fn new(transformers: TransformerRegister) -> Self {
        Self { transformers }
    }

    pub fn transformer(&self, spec: &PropertySpec) -> Result<Rc<dyn Transformer>> {
        self.transformers.get(&spec.property_type)
    }

    /// Wire record of every writable property. Unset properties are written
    /// as null.
    pub fn normalize(&self, metadata: &EntityMetadata) -> Result<Record> {
        let mut record = Record::new();
        for spec in metadata.writable_properties() {
            let value = metadata.property_value(&spec.name)?;
            let normalized = self.transformer(spec)?.normalize(&value, spec)?;
            record.insert(spec.wire_name().to_string(), normalized);
        }
        Ok(record)
    }

    /// Populates an entity from a wire record, in mapping order.
    ///
    /// A missing wire field is skipped for partial records and is an error
    /// otherwise. Inverse relations are never read from the wire; a partial
    /// record keeps an already attached one.
    pub fn denormalize(&self, record: &Record, metadata: &EntityMetadata, partial: bool) -> Result<()> {
        let mapping = metadata.mapping().clone();
        let context = DenormalizeContext {
            mapping: &mapping,
            record,
            partial,
        };
        let absent = Value::Null;

        for spec in mapping.properties() {
            let value = match record.get(spec.wire_name()) {
                Some(value) => value,
                None if spec.is_inverse() && partial && metadata.is_set(&spec.name) => continue,
                None if spec.is_inverse() => &absent,
                None if partial => continue,
                None => {
                    return Err(RestmapError::MissingProperty {
                        entity_type: mapping.entity_type().to_string(),
                        field: spec.wire_name().to_string(),
                    })
                }
            };

            let denormalized = self.transformer(spec)?.denormalize(value, spec, &context)?;
            metadata.set_property_value(&spec.name, denormalized)?;
        }
        Ok(())
    }

    /// Identity key carried by a wire record, canonicalized through the
    /// identifier property's transformer. `None` when the type has no
    /// identifier or the record carries none.
    pub fn identifier_from_record(&self, mapping: &EntityMapping, record: &Record) -> Result<Option<Identifier>> {
        let Some(spec) = mapping.identifier() else {
            return Ok(None);
        };
        let raw = match record.get(spec.wire_name()) {
            None | Some(Value::Null) => return Ok(None),
            Some(raw) => raw,
        };

        let context = DenormalizeContext {
            mapping,
            record,
            partial: true,
        };
        let value = self.transformer(spec)?.denormalize(raw, spec, &context)?;
        Identifier::try_from(&value)
            .map(Some)
            .map_err(|e| RestmapError::InvalidIdentifier {
                entity_type: mapping.entity_type().to_string(),
                reason: e.to_string(),
            })
    }
}
