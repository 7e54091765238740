//! Lazy references.
//!
//! A partial build with no known instance gets a deferred entity: it holds
//! whatever the partial record carried (normally just the identifier) and
//! is fully fetched from its repository the first time application code
//! touches it.

use super::Entity;
use crate::error::{RestmapError, Result};
use crate::event::{EventDispatcher, PreBuildEvent};
use crate::manager::ManagerRef;
use crate::repository::Lookup;
use std::rc::Rc;

pub const BUILD_PROXY: &str = "proxy.build_proxy";

/// Populates a deferred entity on first access.
pub trait Resolver {
    fn resolve(&self, entity: &Entity) -> Result<()>;
}

/// Pre-build stage producing lazy placeholders.
#[derive(Clone)]
pub struct Proxy {
    manager: ManagerRef,
}

impl Proxy {
    pub fn new(manager: ManagerRef) -> Self {
        Self { manager }
    }

    pub fn subscribe(self, dispatcher: &EventDispatcher) {
        dispatcher
            .pre_build()
            .add_stage(BUILD_PROXY, move |event| self.build_proxy(event));
    }

    pub fn build_proxy(&self, event: &mut PreBuildEvent) -> Result<()> {
        if !event.is_partial() || event.entity().is_some() {
            return Ok(());
        }
        let resolver = Rc::new(RepositoryResolver {
            manager: self.manager.clone(),
        });
        event.set_entity(Entity::deferred(event.mapping().clone(), resolver));
        Ok(())
    }
}

/// Loads a placeholder by identifier through its repository. The identity
/// map makes the lookup populate the placeholder itself.
struct RepositoryResolver {
    manager: ManagerRef,
}

impl Resolver for RepositoryResolver {
    fn resolve(&self, entity: &Entity) -> Result<()> {
        let identifier = entity
            .identifier()
            .ok_or_else(|| RestmapError::InvalidIdentifier {
                entity_type: entity.entity_type().to_string(),
                reason: "lazy reference carries no identifier".to_string(),
            })?;

        let manager = self.manager.upgrade()?;
        tracing::debug!(
            entity_type = %entity.entity_type(),
            identifier = %identifier,
            "initializing lazy reference"
        );

        match manager
            .repository(entity.entity_type())?
            .find_one(Lookup::Id(identifier.clone()))?
        {
            Some(found) if found.ptr_eq(entity) => {}
            Some(_) => tracing::warn!(
                entity_type = %entity.entity_type(),
                identifier = %identifier,
                "lazy reference resolved to a different instance"
            ),
            None => tracing::warn!(
                entity_type = %entity.entity_type(),
                identifier = %identifier,
                "lazy reference not found on any connection"
            ),
        }
        Ok(())
    }
}
