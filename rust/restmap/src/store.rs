//! Identity map and last-known wire state.
//!
//! The store keeps, per `(entity type, identifier)`, the one live instance
//! and the last wire record seen for it (the baseline). It takes part in
//! every build through pipeline stages, which is how fetched records are
//! merged into existing instances instead of producing duplicates.

use crate::entity::Entity;
use crate::error::{RestmapError, Result};
use crate::event::{EventDispatcher, PostBuildEvent, PreBuildEvent, PrePersistEvent};
use crate::mapping::{EntityMapping, PropertySpec};
use crate::normalizer::{DenormalizeContext, Normalizer};
use crate::value::{Identifier, Record};
use serde_json::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

pub const CACHE_ENTITY_DATA: &str = "store.cache_entity_data";
pub const FIND_EXISTING_ENTITY: &str = "store.find_existing_entity";
pub const PROTECT_PENDING_CHANGES: &str = "store.protect_pending_changes";
pub const CACHE_ENTITY: &str = "store.cache_entity";
pub const TRACK_NEW_ENTITY: &str = "store.track_new_entity";

type Key = (String, Identifier);

pub struct EntityStore {
    normalizer: Rc<Normalizer>,
    entity_data: RefCell<HashMap<Key, Record>>,
    instances: RefCell<HashMap<Key, Entity>>,
    new_entity: RefCell<Option<Entity>>,
}

impl EntityStore {
    pub fn new(normalizer: Rc<Normalizer>) -> Self {
        Self {
            normalizer,
            entity_data: RefCell::new(HashMap::new()),
            instances: RefCell::new(HashMap::new()),
            new_entity: RefCell::new(None),
        }
    }

    /// Hooks the store into the build and persist pipelines.
    pub fn subscribe(self: &Rc<Self>, dispatcher: &EventDispatcher) {
        let store = self.clone();
        dispatcher
            .pre_build()
            .add_stage(CACHE_ENTITY_DATA, move |event| store.cache_entity_data(event));
        let store = self.clone();
        dispatcher
            .pre_build()
            .add_stage(FIND_EXISTING_ENTITY, move |event| store.find_existing_entity(event));
        let store = self.clone();
        dispatcher
            .pre_build()
            .add_stage(PROTECT_PENDING_CHANGES, move |event| {
                store.protect_pending_changes(event)
            });
        let store = self.clone();
        dispatcher
            .post_build()
            .add_stage(CACHE_ENTITY, move |event| store.cache_entity(event));
        let store = self.clone();
        dispatcher
            .pre_persist()
            .add_stage(TRACK_NEW_ENTITY, move |event| store.track_new_entity(event));
    }

    fn key(&self, mapping: &EntityMapping, record: &Record) -> Result<Option<Key>> {
        Ok(self
            .normalizer
            .identifier_from_record(mapping, record)?
            .map(|id| (mapping.entity_type().to_string(), id)))
    }

    fn entity_key(entity: &Entity) -> Option<Key> {
        entity
            .identifier()
            .map(|id| (entity.entity_type().to_string(), id))
    }

    /// Records the incoming data as the new baseline. The baseline it
    /// replaces travels on the event for the protection stage.
    pub fn cache_entity_data(&self, event: &mut PreBuildEvent) -> Result<()> {
        let Some(key) = self.key(event.mapping(), event.record())? else {
            return Ok(());
        };

        let mut entity_data = self.entity_data.borrow_mut();
        let previous = entity_data.get(&key).cloned();
        let baseline = match (&previous, event.is_partial()) {
            (Some(existing), true) => {
                let mut merged = existing.clone();
                for (field, value) in event.record() {
                    merged.insert(field.clone(), value.clone());
                }
                merged
            }
            _ => event.record().clone(),
        };
        entity_data.insert(key, baseline);
        event.set_previous_data(previous);
        Ok(())
    }

    /// Supplies the live instance for the record's identity, or the entity
    /// whose POST response is being built.
    pub fn find_existing_entity(&self, event: &mut PreBuildEvent) -> Result<()> {
        if event.entity().is_some() {
            return Ok(());
        }

        let pending_new = {
            let mut slot = self.new_entity.borrow_mut();
            match slot.as_ref() {
                Some(entity) if entity.entity_type() == event.entity_type() => slot.take(),
                _ => None,
            }
        };
        if let Some(entity) = pending_new {
            event.set_entity(entity);
            return Ok(());
        }

        let Some(key) = self.key(event.mapping(), event.record())? else {
            return Ok(());
        };
        if let Some(entity) = self.instances.borrow().get(&key).cloned() {
            tracing::debug!(entity_type = %key.0, identifier = %key.1, "identity map hit");
            event.set_entity(entity);
        }
        Ok(())
    }

    /// Rewrites the incoming record so local, unpersisted scalar edits
    /// survive the build. Structured values are not protected, and an
    /// entity never synced before (a POST response) takes the record as is.
    pub fn protect_pending_changes(&self, event: &mut PreBuildEvent) -> Result<()> {
        let (Some(entity), Some(baseline)) = (event.entity().cloned(), event.previous_data().cloned()) else {
            return Ok(());
        };
        let metadata = entity.metadata();

        for spec in metadata.writable_properties() {
            let wire_name = spec.wire_name();
            if !spec.property_type.is_scalar()
                || !metadata.is_set(&spec.name)
                || !event.record().contains_key(wire_name)
            {
                continue;
            }
            let local = metadata.property_value(&spec.name)?;
            if !local.is_scalar() {
                continue;
            }
            let Some(local_wire) = local.scalar_to_json() else {
                continue;
            };

            let known = baseline
                .get(wire_name)
                .map(|raw| self.canonical_wire(raw, spec, event.mapping(), &baseline));
            if known.as_ref() == Some(&local_wire) {
                continue;
            }

            tracing::debug!(
                entity_type = %event.entity_type(),
                property = %spec.name,
                "keeping pending local change"
            );
            event.record_mut().insert(wire_name.to_string(), local_wire);
        }
        Ok(())
    }

    /// A baseline value as the property would write it back, so `"5"` and
    /// `5` compare equal for an integer property.
    fn canonical_wire(&self, raw: &Value, spec: &PropertySpec, mapping: &EntityMapping, baseline: &Record) -> Value {
        let context = DenormalizeContext {
            mapping,
            record: baseline,
            partial: true,
        };
        self.normalizer
            .transformer(spec)
            .and_then(|transformer| transformer.denormalize(raw, spec, &context))
            .ok()
            .and_then(|value| value.scalar_to_json())
            .unwrap_or_else(|| raw.clone())
    }

    /// Registers a built entity as the live instance for its identity.
    pub fn cache_entity(&self, event: &mut PostBuildEvent) -> Result<()> {
        self.attach(event.entity())
    }

    /// Makes `entity` the live instance for its identity. Fails if another
    /// instance already holds it.
    pub fn attach(&self, entity: &Entity) -> Result<()> {
        if !entity.mapping().has_identifier() {
            return Ok(());
        }
        let Some(key) = Self::entity_key(entity) else {
            return Ok(());
        };

        let mut instances = self.instances.borrow_mut();
        if let Some(existing) = instances.get(&key) {
            if !existing.ptr_eq(entity) {
                tracing::error!(
                    entity_type = %key.0,
                    identifier = %key.1,
                    "a second instance was built for a known identity"
                );
                return Err(RestmapError::IdentityConflict {
                    entity_type: key.0,
                    identifier: key.1.to_string(),
                });
            }
            return Ok(());
        }
        tracing::debug!(entity_type = %key.0, identifier = %key.1, "cached entity");
        instances.insert(key, entity.clone());
        Ok(())
    }

    /// Holds an entity with no baseline so its POST response is built into
    /// it.
    pub fn track_new_entity(&self, event: &mut PrePersistEvent) -> Result<()> {
        let entity = event.entity();
        let is_new = self.entity_data(entity).is_none();
        *self.new_entity.borrow_mut() = is_new.then(|| entity.clone());
        Ok(())
    }

    /// Last known wire state of an entity.
    pub fn entity_data(&self, entity: &Entity) -> Option<Record> {
        let key = Self::entity_key(entity)?;
        self.entity_data.borrow().get(&key).cloned()
    }

    /// Merges a successfully written payload into an entity's baseline.
    pub fn merge_entity_data(&self, entity: &Entity, payload: &Record) {
        let Some(key) = Self::entity_key(entity) else {
            return;
        };
        let mut entity_data = self.entity_data.borrow_mut();
        let baseline = entity_data.entry(key).or_default();
        for (field, value) in payload {
            baseline.insert(field.clone(), value.clone());
        }
    }

    pub fn get(&self, entity_type: &str, identifier: &Identifier) -> Option<Entity> {
        self.instances
            .borrow()
            .get(&(entity_type.to_string(), identifier.clone()))
            .cloned()
    }

    pub fn contains(&self, entity: &Entity) -> bool {
        Self::entity_key(entity)
            .and_then(|key| self.instances.borrow().get(&key).cloned())
            .is_some_and(|known| known.ptr_eq(entity))
    }

    pub fn clear_new_entity(&self) {
        self.new_entity.borrow_mut().take();
    }

    /// Forgets one identity: its live instance and baseline.
    pub fn detach(&self, entity: &Entity) {
        if let Some(key) = Self::entity_key(entity) {
            self.instances.borrow_mut().remove(&key);
            self.entity_data.borrow_mut().remove(&key);
        }
    }

    pub fn clear(&self) {
        self.instances.borrow_mut().clear();
        self.entity_data.borrow_mut().clear();
        self.new_entity.borrow_mut().take();
    }

    pub fn len(&self) -> usize {
        self.instances.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for EntityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityStore")
            .field("instances", &self.instances.borrow().len())
            .field("baselines", &self.entity_data.borrow().len())
            .finish()
    }
}
