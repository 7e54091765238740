//! Build and persist lifecycle events.
//!
//! Each event kind has its own [`Pipeline`]: an ordered list of named
//! stages. Stages run in order and a failing stage aborts the dispatch.
//! The identity map and the lazy-reference factory hook in here, and
//! embedding code can insert its own stages relative to theirs.

use crate::entity::Entity;
use crate::error::{RestmapError, Result};
use crate::mapping::EntityMapping;
use crate::value::Record;
use std::cell::RefCell;
use std::rc::Rc;

pub type StageHandler<E> = Rc<dyn Fn(&mut E) -> Result<()>>;

struct Stage<E> {
    name: String,
    handler: StageHandler<E>,
}

impl<E> Clone for Stage<E> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            handler: self.handler.clone(),
        }
    }
}

pub struct Pipeline<E> {
    stages: RefCell<Vec<Stage<E>>>,
}

impl<E> Default for Pipeline<E> {
    fn default() -> Self {
        Self {
            stages: RefCell::new(Vec::new()),
        }
    }
}

impl<E> Pipeline<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a stage at the end of the pipeline.
    pub fn add_stage<F>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(&mut E) -> Result<()> + 'static,
    {
        self.stages.borrow_mut().push(Stage {
            name: name.into(),
            handler: Rc::new(handler),
        });
    }

    pub fn insert_before<F>(&self, anchor: &str, name: impl Into<String>, handler: F) -> Result<()>
    where
        F: Fn(&mut E) -> Result<()> + 'static,
    {
        let index = self.position(anchor)?;
        self.insert_at(index, name.into(), Rc::new(handler));
        Ok(())
    }

    pub fn insert_after<F>(&self, anchor: &str, name: impl Into<String>, handler: F) -> Result<()>
    where
        F: Fn(&mut E) -> Result<()> + 'static,
    {
        let index = self.position(anchor)?;
        self.insert_at(index + 1, name.into(), Rc::new(handler));
        Ok(())
    }

    /// Removes a stage by name. Returns whether one was removed.
    pub fn remove_stage(&self, name: &str) -> bool {
        let mut stages = self.stages.borrow_mut();
        let before = stages.len();
        stages.retain(|stage| stage.name != name);
        stages.len() != before
    }

    pub fn stage_names(&self) -> Vec<String> {
        self.stages
            .borrow()
            .iter()
            .map(|stage| stage.name.clone())
            .collect()
    }

    pub fn dispatch(&self, event: &mut E) -> Result<()> {
        // Stages may re-enter the builder, which dispatches again.
        let stages = self.stages.borrow().clone();
        for stage in stages {
            (stage.handler)(event)?;
        }
        Ok(())
    }

    fn position(&self, anchor: &str) -> Result<usize> {
        self.stages
            .borrow()
            .iter()
            .position(|stage| stage.name == anchor)
            .ok_or_else(|| RestmapError::Config(format!("no pipeline stage named \"{}\"", anchor)))
    }

    fn insert_at(&self, index: usize, name: String, handler: StageHandler<E>) {
        self.stages
            .borrow_mut()
            .insert(index, Stage { name, handler });
    }
}

/// Raised before a record is turned into an entity. Stages may rewrite the
/// record or supply the instance to populate.
#[derive(Debug)]
pub struct PreBuildEvent {
    mapping: Rc<EntityMapping>,
    record: Record,
    partial: bool,
    entity: Option<Entity>,
    previous_data: Option<Record>,
}

impl PreBuildEvent {
    pub fn new(mapping: Rc<EntityMapping>, record: Record, partial: bool) -> Self {
        Self {
            mapping,
            record,
            partial,
            entity: None,
            previous_data: None,
        }
    }

    pub fn mapping(&self) -> &Rc<EntityMapping> {
        &self.mapping
    }

    pub fn entity_type(&self) -> &str {
        self.mapping.entity_type()
    }

    pub fn record(&self) -> &Record {
        &self.record
    }

    pub fn record_mut(&mut self) -> &mut Record {
        &mut self.record
    }

    pub fn is_partial(&self) -> bool {
        self.partial
    }

    pub fn entity(&self) -> Option<&Entity> {
        self.entity.as_ref()
    }

    pub fn set_entity(&mut self, entity: Entity) {
        self.entity = Some(entity);
    }

    /// Last known wire state before this record was cached.
    pub fn previous_data(&self) -> Option<&Record> {
        self.previous_data.as_ref()
    }

    pub fn set_previous_data(&mut self, data: Option<Record>) {
        self.previous_data = data;
    }

    pub(crate) fn into_parts(self) -> (Record, Option<Entity>) {
        (self.record, self.entity)
    }
}

/// Raised once an entity has been populated.
#[derive(Debug)]
pub struct PostBuildEvent {
    entity: Entity,
    record: Record,
    partial: bool,
}

impl PostBuildEvent {
    pub fn new(entity: Entity, record: Record, partial: bool) -> Self {
        Self {
            entity,
            record,
            partial,
        }
    }

    pub fn entity(&self) -> &Entity {
        &self.entity
    }

    pub fn record(&self) -> &Record {
        &self.record
    }

    pub fn is_partial(&self) -> bool {
        self.partial
    }

    pub(crate) fn into_entity(self) -> Entity {
        self.entity
    }
}

/// Raised before an entity's state is written to its connection.
#[derive(Debug)]
pub struct PrePersistEvent {
    entity: Entity,
}

impl PrePersistEvent {
    pub fn new(entity: Entity) -> Self {
        Self { entity }
    }

    pub fn entity(&self) -> &Entity {
        &self.entity
    }
}

#[derive(Default)]
pub struct EventDispatcher {
    pre_build: Pipeline<PreBuildEvent>,
    post_build: Pipeline<PostBuildEvent>,
    pre_persist: Pipeline<PrePersistEvent>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pre_build(&self) -> &Pipeline<PreBuildEvent> {
        &self.pre_build
    }

    pub fn post_build(&self) -> &Pipeline<PostBuildEvent> {
        &self.post_build
    }

    pub fn pre_persist(&self) -> &Pipeline<PrePersistEvent> {
        &self.pre_persist
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("pre_build", &self.pre_build.stage_names())
            .field("post_build", &self.post_build.stage_names())
            .field("pre_persist", &self.pre_persist.stage_names())
            .finish()
    }
}
