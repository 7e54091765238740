use crate::collection::EntityCollection;
use crate::entity::Entity;
use crate::error::{RestmapError, Result};
use crate::manager::EntityManager;
use crate::mapping::EntityMapping;
use crate::query::QueryBuilder;
use crate::value::{Identifier, PropertyValue};
use std::rc::Rc;

pub type Filter = Vec<(String, PropertyValue)>;

/// How [`EntityRepository::find_one`] locates an entity.
#[derive(Debug, Clone)]
pub enum Lookup {
    Id(Identifier),
    Filter(Filter),
}

impl Lookup {
    pub fn filter<K, V>(conditions: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<PropertyValue>,
    {
        Lookup::Filter(
            conditions
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl From<Identifier> for Lookup {
    fn from(value: Identifier) -> Self {
        Lookup::Id(value)
    }
}

impl From<i64> for Lookup {
    fn from(value: i64) -> Self {
        Lookup::Id(value.into())
    }
}

impl From<i32> for Lookup {
    fn from(value: i32) -> Self {
        Lookup::Id(value.into())
    }
}

impl From<&str> for Lookup {
    fn from(value: &str) -> Self {
        Lookup::Id(value.into())
    }
}

impl From<Filter> for Lookup {
    fn from(value: Filter) -> Self {
        Lookup::Filter(value)
    }
}

/// Application-facing reads and deletes for one entity type.
#[derive(Debug, Clone)]
pub struct EntityRepository {
    manager: EntityManager,
    mapping: Rc<EntityMapping>,
}

impl EntityRepository {
    pub(crate) fn new(manager: EntityManager, mapping: Rc<EntityMapping>) -> Self {
        Self { manager, mapping }
    }

    pub fn entity_type(&self) -> &str {
        self.mapping.entity_type()
    }

    pub fn name(&self) -> &str {
        self.mapping.repository_name()
    }

    pub fn mapping(&self) -> &Rc<EntityMapping> {
        &self.mapping
    }

    pub fn query_builder(&self) -> QueryBuilder {
        self.manager.query_builder()
    }

    /// Entities matching `filter`. Without a page the result fetches
    /// further pages lazily.
    pub fn find<K, V>(
        &self,
        filter: impl IntoIterator<Item = (K, V)>,
        page: Option<u32>,
        per_page: Option<u32>,
    ) -> Result<EntityCollection>
    where
        K: Into<String>,
        V: Into<PropertyValue>,
    {
        let mut builder = self.query_builder().get(self.entity_type()).where_(filter);
        if let Some(page) = page {
            builder = builder.page(page, per_page.unwrap_or(0));
        }
        builder.get_query()?.get_result()
    }

    pub fn find_all(&self) -> Result<EntityCollection> {
        self.find(Filter::new(), None, None)
    }

    pub fn find_one(&self, lookup: impl Into<Lookup>) -> Result<Option<Entity>> {
        let filter = match lookup.into() {
            Lookup::Id(identifier) => {
                let spec = self.mapping.identifier().ok_or_else(|| {
                    RestmapError::InvalidIdentifier {
                        entity_type: self.entity_type().to_string(),
                        reason: "type declares no identifier".to_string(),
                    }
                })?;
                vec![(spec.name.clone(), PropertyValue::from(identifier))]
            }
            Lookup::Filter(filter) => filter,
        };

        self.query_builder()
            .get(self.entity_type())
            .where_(filter)
            .get_query()?
            .get_single_result()
    }

    /// Issues a filtered DELETE.
    pub fn remove<K, V>(&self, filter: impl IntoIterator<Item = (K, V)>) -> Result<()>
    where
        K: Into<String>,
        V: Into<PropertyValue>,
    {
        let query = self
            .query_builder()
            .delete(self.entity_type())
            .where_(filter)
            .get_query()?;
        tracing::debug!(entity_type = %self.entity_type(), filter = ?query.filter(), "removing by filter");
        query.execute()?;
        Ok(())
    }
}
