use super::{Method, Query, SortDirection};
use crate::entity::Entity;
use crate::error::{RestmapError, Result};
use crate::manager::EntityManager;
use crate::mapping::{EntityMapping, PathKind};
use crate::value::{PropertyValue, Record};
use serde_json::Value;
use std::collections::BTreeMap;

/// What a query is about: a type, or one instance of it.
#[derive(Debug, Clone)]
pub enum QueryTarget {
    Type(String),
    Entity(Entity),
}

impl QueryTarget {
    pub fn entity_type(&self) -> &str {
        match self {
            QueryTarget::Type(name) => name,
            QueryTarget::Entity(entity) => entity.entity_type(),
        }
    }
}

impl From<&str> for QueryTarget {
    fn from(value: &str) -> Self {
        QueryTarget::Type(value.to_string())
    }
}

impl From<String> for QueryTarget {
    fn from(value: String) -> Self {
        QueryTarget::Type(value)
    }
}

impl From<Entity> for QueryTarget {
    fn from(value: Entity) -> Self {
        QueryTarget::Entity(value)
    }
}

impl From<&Entity> for QueryTarget {
    fn from(value: &Entity) -> Self {
        QueryTarget::Entity(value.clone())
    }
}

/// Fluent construction of a [`Query`].
///
/// ```ignore
/// let posts = manager
///     .query_builder()
///     .get("Post")
///     .and_where("author", 7)
///     .sort_by("createdAt", SortDirection::Descending)
///     .page(1, 20)
///     .get_query()?
///     .get_result()?;
/// ```
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    manager: EntityManager,
    method: Method,
    target: Option<QueryTarget>,
    data: Option<Value>,
    filter: Vec<(String, PropertyValue)>,
    sort: Vec<(String, SortDirection)>,
    page: Option<u32>,
    per_page: Option<u32>,
    headers: BTreeMap<String, String>,
}

impl QueryBuilder {
    pub fn new(manager: EntityManager) -> Self {
        Self {
            manager,
            method: Method::Get,
            target: None,
            data: None,
            filter: Vec::new(),
            sort: Vec::new(),
            page: None,
            per_page: None,
            headers: BTreeMap::new(),
        }
    }

    pub fn get(self, target: impl Into<QueryTarget>) -> Self {
        self.action(Method::Get, target)
    }

    pub fn post(self, target: impl Into<QueryTarget>) -> Self {
        self.action(Method::Post, target)
    }

    pub fn put(self, target: impl Into<QueryTarget>) -> Self {
        self.action(Method::Put, target)
    }

    pub fn patch(self, target: impl Into<QueryTarget>) -> Self {
        self.action(Method::Patch, target)
    }

    pub fn delete(self, target: impl Into<QueryTarget>) -> Self {
        self.action(Method::Delete, target)
    }

    pub fn action(mut self, method: Method, target: impl Into<QueryTarget>) -> Self {
        self.method = method;
        self.target = Some(target.into());
        self
    }

    /// Replaces the filter. Keys are property names.
    pub fn where_<K, V>(mut self, filter: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<PropertyValue>,
    {
        self.filter = filter
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self
    }

    /// Adds one filter condition, replacing an earlier one on the same key.
    pub fn and_where(mut self, property: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        let property = property.into();
        self.filter.retain(|(k, _)| *k != property);
        self.filter.push((property, value.into()));
        self
    }

    pub fn sort_by(mut self, property: impl Into<String>, direction: SortDirection) -> Self {
        self.sort.push((property.into(), direction));
        self
    }

    pub fn page(mut self, page: u32, per_page: u32) -> Self {
        self.page = Some(page);
        self.per_page = (per_page > 0).then_some(per_page);
        self
    }

    pub fn set_data(mut self, data: impl Into<Value>) -> Self {
        self.data = Some(data.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Resolves the path template and wire names, and picks the candidate
    /// connections.
    pub fn get_query(self) -> Result<Query> {
        let target = self
            .target
            .clone()
            .ok_or_else(|| RestmapError::Config("query has no target entity".to_string()))?;
        let mapping = self.manager.mappings().get(target.entity_type())?;
        let mut filter = self.filter.clone();

        let kind = self.path_kind(&mapping, &filter);
        let template = mapping.require_path(kind)?;
        let path = resolve_path(template, &mapping, &target, &mut filter, kind)?;

        let connections = self.manager.connections().connections(mapping.connection())?;

        let mut wire_filter = Record::new();
        for (property, value) in filter {
            wire_filter.insert(wire_key(&mapping, &property), filter_value(&property, &value)?);
        }
        let sort = self
            .sort
            .iter()
            .map(|(property, direction)| (wire_key(&mapping, property), *direction))
            .collect();

        let mut query = Query::new(mapping.entity_type(), self.method, path)
            .with_manager(self.manager.downgrade())
            .with_connections(connections)
            .with_filter(wire_filter)
            .with_sort(sort)
            .with_page(self.page, self.per_page)
            .with_headers(self.headers);
        if let Some(data) = self.data {
            query = query.with_data(data);
        }
        Ok(query)
    }

    fn path_kind(&self, mapping: &EntityMapping, filter: &[(String, PropertyValue)]) -> PathKind {
        match self.method {
            Method::Get => {
                let by_identifier = mapping.identifier().is_some_and(|id| {
                    filter
                        .iter()
                        .any(|(k, _)| *k == id.name || k == id.wire_name())
                });
                if by_identifier {
                    PathKind::Get
                } else {
                    PathKind::List
                }
            }
            Method::Post => PathKind::Post,
            Method::Put => PathKind::Put,
            Method::Patch => PathKind::Patch,
            Method::Delete => PathKind::Delete,
        }
    }
}

/// Substitutes `{name}` placeholders from the target entity, then from the
/// filter (consuming the filter entry). A single-resource path whose
/// template has no identifier placeholder gets the identifier appended.
fn resolve_path(
    template: &str,
    mapping: &EntityMapping,
    target: &QueryTarget,
    filter: &mut Vec<(String, PropertyValue)>,
    kind: PathKind,
) -> Result<String> {
    let mut path = String::with_capacity(template.len());
    let mut rest = template;
    let mut used_identifier = false;

    while let Some(start) = rest.find('{') {
        let Some(len) = rest[start..].find('}') else {
            break;
        };
        let name = &rest[start + 1..start + len];
        path.push_str(&rest[..start]);

        let value = placeholder_value(name, mapping, target, filter).ok_or_else(|| {
            RestmapError::UnresolvedPathParameter {
                path: template.to_string(),
                parameter: name.to_string(),
            }
        })?;
        if mapping
            .identifier()
            .is_some_and(|id| id.name == name || id.wire_name() == name)
        {
            used_identifier = true;
        }
        path.push_str(&value);
        rest = &rest[start + len + 1..];
    }
    path.push_str(rest);

    let single = matches!(
        kind,
        PathKind::Get | PathKind::Put | PathKind::Patch | PathKind::Delete
    );
    if single && !used_identifier {
        if let Some(id) = mapping.identifier() {
            let position = filter
                .iter()
                .position(|(k, _)| *k == id.name || k == id.wire_name());
            let segment = match (position, target) {
                (Some(position), _) => {
                    let (_, value) = filter.remove(position);
                    Some(path_segment(&value).ok_or_else(|| {
                        RestmapError::UnresolvedPathParameter {
                            path: template.to_string(),
                            parameter: id.name.clone(),
                        }
                    })?)
                }
                (None, QueryTarget::Entity(entity)) => entity.identifier().map(|id| id.to_string()),
                (None, QueryTarget::Type(_)) => None,
            };
            if let Some(segment) = segment {
                path = format!("{}/{}", path.trim_end_matches('/'), segment);
            }
        }
    }
    Ok(path)
}

fn placeholder_value(
    name: &str,
    mapping: &EntityMapping,
    target: &QueryTarget,
    filter: &mut Vec<(String, PropertyValue)>,
) -> Option<String> {
    let property = mapping
        .properties()
        .iter()
        .find(|p| p.name == name || p.wire_name() == name);

    if let (QueryTarget::Entity(entity), Some(property)) = (target, property) {
        let value = entity.metadata().property_value(&property.name).ok()?;
        if let Some(segment) = path_segment(&value) {
            return Some(segment);
        }
    }

    let position = filter.iter().position(|(k, _)| {
        k == name || property.is_some_and(|p| *k == p.name || k == p.wire_name())
    })?;
    let (_, value) = filter.remove(position);
    path_segment(&value)
}

fn path_segment(value: &PropertyValue) -> Option<String> {
    match value {
        PropertyValue::Entity(entity) => entity.identifier().map(|id| id.to_string()),
        other => other.to_path_segment(),
    }
}

fn wire_key(mapping: &EntityMapping, property: &str) -> String {
    mapping
        .property(property)
        .map(|p| p.wire_name().to_string())
        .unwrap_or_else(|| property.to_string())
}

fn filter_value(property: &str, value: &PropertyValue) -> Result<Value> {
    match value {
        PropertyValue::Entity(entity) => entity.identifier().map(|id| id.to_json()).ok_or_else(|| {
            RestmapError::invalid_value(property, "filter entity has no identifier")
        }),
        PropertyValue::List(items) => items
            .iter()
            .map(|item| filter_value(property, item))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        PropertyValue::Collection(collection) => collection
            .iter()
            .map(|entity| filter_value(property, &PropertyValue::Entity(entity)))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        other => other.scalar_to_json().ok_or_else(|| {
            RestmapError::invalid_value(property, format!("cannot filter on {}", other.kind_name()))
        }),
    }
}
