//! The entity manager: one context owning mappings, connections, the
//! identity map and the build pipelines.

use crate::builder::EntityBuilder;
use crate::config::RestmapConfig;
use crate::connection::{Connection, ConnectionRegister};
use crate::entity::{Entity, Proxy};
use crate::error::{RestmapError, Result};
use crate::event::{EventDispatcher, PrePersistEvent};
use crate::mapping::{EntityMapping, EntityMappingRegister, PropertyType};
use crate::normalizer::{DenormalizeContext, EntityTransformer, Normalizer, Transformer, TransformerRegister};
use crate::query::QueryBuilder;
use crate::repository::EntityRepository;
use crate::store::EntityStore;
use crate::value::Record;
use serde_json::Value;
use std::fmt;
use std::rc::{Rc, Weak};

type TransformerFactory = Box<dyn FnOnce(ManagerRef) -> Rc<dyn Transformer>>;

struct ManagerInner {
    mappings: Rc<EntityMappingRegister>,
    connections: ConnectionRegister,
    dispatcher: Rc<EventDispatcher>,
    normalizer: Rc<Normalizer>,
    store: Rc<EntityStore>,
    builder: EntityBuilder,
}

/// Non-owning handle to a manager, held by the parts the manager itself
/// owns (queries, transformers, lazy references).
#[derive(Clone, Default)]
pub struct ManagerRef(Weak<ManagerInner>);

impl ManagerRef {
    pub fn upgrade(&self) -> Result<EntityManager> {
        self.0
            .upgrade()
            .map(|inner| EntityManager { inner })
            .ok_or(RestmapError::ManagerDropped)
    }
}

impl fmt::Debug for ManagerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ManagerRef")
            .field(&(self.0.strong_count() > 0))
            .finish()
    }
}

/// What [`EntityManager::persist`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistOutcome {
    /// The entity had no baseline and was POSTed.
    Created,
    /// A PATCH was sent for these properties.
    Updated(Vec<String>),
    /// Nothing differed from the baseline; no request was made.
    Unchanged,
}

/// Cheaply cloneable handle to a manager.
#[derive(Clone)]
pub struct EntityManager {
    inner: Rc<ManagerInner>,
}

impl EntityManager {
    pub fn builder() -> EntityManagerBuilder {
        EntityManagerBuilder::new()
    }

    /// A manager over the mappings declared in `config`.
    pub fn from_config(config: &RestmapConfig, connections: ConnectionRegister) -> Result<Self> {
        EntityManagerBuilder::new()
            .mappings(config.entity_mappings()?)
            .connections(connections)
            .build()
    }

    pub fn mappings(&self) -> &Rc<EntityMappingRegister> {
        &self.inner.mappings
    }

    pub fn connections(&self) -> &ConnectionRegister {
        &self.inner.connections
    }

    pub fn dispatcher(&self) -> &Rc<EventDispatcher> {
        &self.inner.dispatcher
    }

    pub fn normalizer(&self) -> &Rc<Normalizer> {
        &self.inner.normalizer
    }

    pub fn store(&self) -> &Rc<EntityStore> {
        &self.inner.store
    }

    pub fn entity_builder(&self) -> &EntityBuilder {
        &self.inner.builder
    }

    pub fn downgrade(&self) -> ManagerRef {
        ManagerRef(Rc::downgrade(&self.inner))
    }

    pub fn query_builder(&self) -> QueryBuilder {
        QueryBuilder::new(self.clone())
    }

    pub fn repository(&self, entity_type: &str) -> Result<EntityRepository> {
        let mapping = self.inner.mappings.get(entity_type)?;
        Ok(EntityRepository::new(self.clone(), mapping))
    }

    /// A new, unsaved entity of a mapped type.
    pub fn create(&self, entity_type: &str) -> Result<Entity> {
        self.inner.builder.instantiate(entity_type)
    }

    /// Writes an entity to its connection.
    ///
    /// An entity without a baseline is POSTed in full and the response is
    /// built into the same instance. Otherwise only the properties whose wire
    /// value differs from the baseline are PATCHed.
    pub fn persist(&self, entity: &Entity) -> Result<PersistOutcome> {
        entity.initialize()?;
        let outcome = self.persist_entity(entity);
        self.inner.store.clear_new_entity();
        outcome
    }

    fn persist_entity(&self, entity: &Entity) -> Result<PersistOutcome> {
        let mut event = PrePersistEvent::new(entity.clone());
        self.inner.dispatcher.pre_persist().dispatch(&mut event)?;

        let metadata = entity.metadata();
        let payload = self.inner.normalizer.normalize(&metadata)?;

        let (sent, outcome) = match self.inner.store.entity_data(entity) {
            None => (payload, PersistOutcome::Created),
            Some(baseline) => {
                let (diff, changed) = self.diff(entity.mapping(), &payload, &baseline)?;
                if diff.is_empty() {
                    tracing::debug!(
                        entity_type = %entity.entity_type(),
                        identifier = ?entity.identifier(),
                        "nothing to persist"
                    );
                    return Ok(PersistOutcome::Unchanged);
                }
                (diff, PersistOutcome::Updated(changed))
            }
        };

        let query = match outcome {
            PersistOutcome::Created => self.query_builder().post(entity),
            _ => self.query_builder().patch(entity),
        }
        .set_data(Value::Object(sent.clone()))
        .get_query()?;
        tracing::info!(
            entity_type = %entity.entity_type(),
            method = %query.method(),
            path = %query.path(),
            fields = sent.len(),
            "persisting entity"
        );

        let response = query.execute()?;
        // What was just written is the new baseline, so the response is not
        // mistaken for a conflict with local edits.
        self.inner.store.merge_entity_data(entity, &sent);
        match response {
            Some((Value::Object(response), _)) => {
                let mut record = sent;
                record.extend(response);
                if let (Some(spec), Some(identifier)) = (entity.mapping().identifier(), entity.identifier()) {
                    record
                        .entry(spec.wire_name().to_string())
                        .or_insert_with(|| identifier.to_json());
                }
                self.inner
                    .builder
                    .build_entity(entity.entity_type(), record, true)?;
            }
            _ => self.inner.store.attach(entity)?,
        }

        if outcome == PersistOutcome::Created && entity.identifier().is_none() && entity.mapping().has_identifier() {
            tracing::warn!(
                entity_type = %entity.entity_type(),
                "created entity came back without an identifier"
            );
        }
        Ok(outcome)
    }

    /// Wire fields of `payload` whose value differs from `baseline`, and the
    /// names of the properties they belong to. Scalar baselines are compared
    /// in the form the property would write them back.
    fn diff(&self, mapping: &Rc<EntityMapping>, payload: &Record, baseline: &Record) -> Result<(Record, Vec<String>)> {
        let mut diff = Record::new();
        let mut changed = Vec::new();
        for spec in mapping.writable_properties() {
            let wire_name = spec.wire_name();
            let Some(current) = payload.get(wire_name) else {
                continue;
            };
            let known = match baseline.get(wire_name) {
                Some(raw) if spec.property_type.is_scalar() => {
                    let transformer = self.inner.normalizer.transformer(spec)?;
                    let context = DenormalizeContext {
                        mapping,
                        record: baseline,
                        partial: true,
                    };
                    let value = transformer.denormalize(raw, spec, &context)?;
                    Some(transformer.normalize(&value, spec)?)
                }
                Some(raw) => Some(raw.clone()),
                None => None,
            };
            if known.as_ref() != Some(current) {
                diff.insert(wire_name.to_string(), current.clone());
                changed.push(spec.name.clone());
            }
        }
        Ok((diff, changed))
    }

    /// Deletes an entity remotely and forgets it locally.
    pub fn remove(&self, entity: &Entity) -> Result<()> {
        let query = self.query_builder().delete(entity).get_query()?;
        tracing::info!(
            entity_type = %entity.entity_type(),
            path = %query.path(),
            "removing entity"
        );
        query.execute()?;
        self.detach(entity);
        Ok(())
    }

    /// Drops an entity from the identity map without touching the remote.
    pub fn detach(&self, entity: &Entity) {
        self.inner.store.detach(entity);
    }

    pub fn clear(&self) {
        self.inner.store.clear();
    }
}

impl fmt::Debug for EntityManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityManager")
            .field("mappings", &self.inner.mappings.len())
            .field("connections", &self.inner.connections)
            .field("store", &self.inner.store)
            .finish()
    }
}

/// Assembles an [`EntityManager`].
///
/// ```ignore
/// let manager = EntityManager::builder()
///     .mapping(user_mapping)
///     .connection("default", Rc::new(HttpConnection::new(config)?))
///     .build()?;
/// ```
pub struct EntityManagerBuilder {
    mappings: EntityMappingRegister,
    pending: Vec<EntityMapping>,
    connections: ConnectionRegister,
    transformers: TransformerRegister,
    factories: Vec<(PropertyType, TransformerFactory)>,
}

impl EntityManagerBuilder {
    pub fn new() -> Self {
        Self {
            mappings: EntityMappingRegister::new(),
            pending: Vec::new(),
            connections: ConnectionRegister::new(),
            transformers: TransformerRegister::with_defaults(),
            factories: Vec::new(),
        }
    }

    pub fn mapping(mut self, mapping: EntityMapping) -> Self {
        self.pending.push(mapping);
        self
    }

    /// Starts from an existing register. Mappings added with
    /// [`mapping`](Self::mapping) are registered on top of it.
    pub fn mappings(mut self, mappings: EntityMappingRegister) -> Self {
        self.mappings = mappings;
        self
    }

    pub fn connection(mut self, name: impl Into<String>, connection: Rc<dyn Connection>) -> Self {
        self.connections.register(name, connection);
        self
    }

    pub fn connections(mut self, connections: ConnectionRegister) -> Self {
        self.connections = connections;
        self
    }

    pub fn transformer(mut self, property_type: impl Into<PropertyType>, transformer: Rc<dyn Transformer>) -> Self {
        self.transformers.register(property_type, transformer);
        self
    }

    /// Registers a transformer that needs the manager, such as one that
    /// builds nested entities.
    pub fn advanced_transformer<F>(mut self, property_type: impl Into<PropertyType>, factory: F) -> Self
    where
        F: FnOnce(ManagerRef) -> Rc<dyn Transformer> + 'static,
    {
        self.factories.push((property_type.into(), Box::new(factory)));
        self
    }

    pub fn build(self) -> Result<EntityManager> {
        let Self {
            mut mappings,
            pending,
            connections,
            mut transformers,
            factories,
        } = self;

        for mapping in pending {
            mappings.register(mapping)?;
        }
        mappings.validate_references()?;
        for mapping in mappings.iter() {
            if !connections.contains(mapping.connection()) {
                return Err(RestmapError::UnknownConnection(mapping.connection().to_string()));
            }
        }
        let mappings = Rc::new(mappings);

        let inner = Rc::new_cyclic(|weak: &Weak<ManagerInner>| {
            let manager = ManagerRef(weak.clone());
            if !transformers.contains(&PropertyType::Entity) {
                transformers.register(
                    PropertyType::Entity,
                    Rc::new(EntityTransformer::new(manager.clone())),
                );
            }
            for (property_type, factory) in factories {
                transformers.register(property_type, factory(manager.clone()));
            }

            let normalizer = Rc::new(Normalizer::new(transformers));
            let dispatcher = Rc::new(EventDispatcher::new());
            let store = Rc::new(EntityStore::new(normalizer.clone()));
            store.subscribe(&dispatcher);
            Proxy::new(manager).subscribe(&dispatcher);

            let builder = EntityBuilder::new(mappings.clone(), dispatcher.clone(), normalizer.clone());
            ManagerInner {
                mappings,
                connections,
                dispatcher,
                normalizer,
                store,
                builder,
            }
        });

        for mapping in inner.mappings.iter() {
            for spec in mapping.properties() {
                inner.normalizer.transformer(spec)?;
            }
        }

        tracing::debug!(
            mappings = inner.mappings.len(),
            "entity manager ready"
        );
        Ok(EntityManager { inner })
    }
}

impl Default for EntityManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
