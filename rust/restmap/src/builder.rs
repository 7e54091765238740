use crate::entity::Entity;
use crate::error::Result;
use crate::event::{EventDispatcher, PostBuildEvent, PreBuildEvent};
use crate::mapping::EntityMappingRegister;
use crate::normalizer::Normalizer;
use crate::value::Record;
use std::rc::Rc;

/// Turns wire records into entities, running the build pipelines around
/// population.
#[derive(Debug, Clone)]
pub struct EntityBuilder {
    mappings: Rc<EntityMappingRegister>,
    dispatcher: Rc<EventDispatcher>,
    normalizer: Rc<Normalizer>,
}

impl EntityBuilder {
    pub fn new(
        mappings: Rc<EntityMappingRegister>,
        dispatcher: Rc<EventDispatcher>,
        normalizer: Rc<Normalizer>,
    ) -> Self {
        Self {
            mappings,
            dispatcher,
            normalizer,
        }
    }

    /// A fresh, empty instance of a mapped type.
    pub fn instantiate(&self, entity_type: &str) -> Result<Entity> {
        Ok(Entity::new(self.mappings.get(entity_type)?))
    }

    /// Builds (or refreshes) the entity a record describes.
    ///
    /// Pre-build stages may substitute an existing instance or a lazy
    /// placeholder; otherwise a new one is allocated. With `partial`, fields
    /// missing from the record are left untouched.
    pub fn build_entity(&self, entity_type: &str, record: Record, partial: bool) -> Result<Entity> {
        let mapping = self.mappings.get(entity_type)?;

        let mut pre_build = PreBuildEvent::new(mapping.clone(), record, partial);
        self.dispatcher.pre_build().dispatch(&mut pre_build)?;
        let (record, supplied) = pre_build.into_parts();

        let entity = supplied.unwrap_or_else(|| Entity::new(mapping));
        self.normalizer
            .denormalize(&record, &entity.metadata(), partial)?;
        if !partial {
            entity.mark_initialized();
        }

        tracing::debug!(
            entity_type = %entity_type,
            identifier = ?entity.identifier(),
            partial,
            "built entity"
        );

        let mut post_build = PostBuildEvent::new(entity, record, partial);
        self.dispatcher.post_build().dispatch(&mut post_build)?;
        Ok(post_build.into_entity())
    }
}
