//! Static entity mappings and the append-only register holding them.

use crate::entity::Entity;
use crate::error::{RestmapError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

/// Declared type of a mapped property. Selects the transformer used to
/// convert between wire and in-process values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PropertyType {
    Boolean,
    Integer,
    String,
    Float,
    Object,
    Entity,
    Custom(String),
}

impl PropertyType {
    pub fn as_str(&self) -> &str {
        match self {
            PropertyType::Boolean => "boolean",
            PropertyType::Integer => "integer",
            PropertyType::String => "string",
            PropertyType::Float => "float",
            PropertyType::Object => "object",
            PropertyType::Entity => "entity",
            PropertyType::Custom(name) => name,
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            PropertyType::Boolean | PropertyType::Integer | PropertyType::String | PropertyType::Float
        )
    }
}

impl From<String> for PropertyType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "boolean" | "bool" => PropertyType::Boolean,
            "integer" | "int" => PropertyType::Integer,
            "string" => PropertyType::String,
            "float" | "double" => PropertyType::Float,
            "object" => PropertyType::Object,
            "entity" => PropertyType::Entity,
            _ => PropertyType::Custom(value),
        }
    }
}

impl From<&str> for PropertyType {
    fn from(value: &str) -> Self {
        value.to_string().into()
    }
}

impl From<PropertyType> for String {
    fn from(value: PropertyType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options of an entity-reference property.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceOptions {
    /// Target entity type.
    pub entity: String,
    /// Wire data carries the full nested record instead of an identifier.
    pub inline: bool,
    /// The relation lives on the target side as a foreign key named here;
    /// the collection is fetched by querying the target with it.
    pub inverse_field: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropertySpec {
    pub name: String,
    pub map_from: String,
    pub property_type: PropertyType,
    pub read_only: bool,
    pub identifier: bool,
    pub multiple: bool,
    pub reference: Option<ReferenceOptions>,
}

impl PropertySpec {
    pub fn new(name: impl Into<String>, property_type: impl Into<PropertyType>) -> Self {
        let name = name.into();
        Self {
            map_from: name.clone(),
            name,
            property_type: property_type.into(),
            read_only: false,
            identifier: false,
            multiple: false,
            reference: None,
        }
    }

    /// An entity-reference property pointing at `entity`.
    pub fn reference(name: impl Into<String>, entity: impl Into<String>) -> Self {
        let mut spec = Self::new(name, PropertyType::Entity);
        spec.reference = Some(ReferenceOptions {
            entity: entity.into(),
            ..Default::default()
        });
        spec
    }

    pub fn map_from(mut self, wire_name: impl Into<String>) -> Self {
        self.map_from = wire_name.into();
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn identifier(mut self) -> Self {
        self.identifier = true;
        self
    }

    pub fn multiple(mut self) -> Self {
        self.multiple = true;
        self
    }

    pub fn inline(mut self) -> Self {
        if let Some(reference) = &mut self.reference {
            reference.inline = true;
        }
        self
    }

    pub fn inverse_field(mut self, field: impl Into<String>) -> Self {
        if let Some(reference) = &mut self.reference {
            reference.inverse_field = Some(field.into());
        }
        self
    }

    pub fn wire_name(&self) -> &str {
        &self.map_from
    }

    pub fn is_inverse(&self) -> bool {
        self.reference
            .as_ref()
            .is_some_and(|r| r.inverse_field.is_some())
    }

    /// Eligible for outbound diffing and normalization.
    pub fn is_writable(&self) -> bool {
        !self.read_only && !self.is_inverse()
    }
}

/// Endpoint template slots of a mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathKind {
    List,
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl PathKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PathKind::List => "list",
            PathKind::Get => "get",
            PathKind::Post => "post",
            PathKind::Put => "put",
            PathKind::Patch => "patch",
            PathKind::Delete => "delete",
        }
    }
}

impl fmt::Display for PathKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PathKind {
    type Err = RestmapError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "list" => PathKind::List,
            "get" => PathKind::Get,
            "post" => PathKind::Post,
            "put" => PathKind::Put,
            "patch" => PathKind::Patch,
            "delete" => PathKind::Delete,
            other => {
                return Err(RestmapError::Config(format!("unknown path kind \"{}\"", other)));
            }
        })
    }
}

/// Immutable description of one entity type.
#[derive(Debug, Clone)]
pub struct EntityMapping {
    entity_type: String,
    repository_name: String,
    properties: Vec<PropertySpec>,
    paths: HashMap<PathKind, String>,
    connection: String,
    identifier: Option<usize>,
}

impl EntityMapping {
    pub fn builder(entity_type: impl Into<String>) -> EntityMappingBuilder {
        EntityMappingBuilder::new(entity_type)
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn repository_name(&self) -> &str {
        &self.repository_name
    }

    pub fn connection(&self) -> &str {
        &self.connection
    }

    pub fn properties(&self) -> &[PropertySpec] {
        &self.properties
    }

    pub fn property(&self, name: &str) -> Option<&PropertySpec> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn writable_properties(&self) -> impl Iterator<Item = &PropertySpec> {
        self.properties.iter().filter(|p| p.is_writable())
    }

    pub fn identifier(&self) -> Option<&PropertySpec> {
        self.identifier.map(|i| &self.properties[i])
    }

    pub fn has_identifier(&self) -> bool {
        self.identifier.is_some()
    }

    pub fn path(&self, kind: PathKind) -> Option<&str> {
        self.paths.get(&kind).map(String::as_str)
    }

    pub fn require_path(&self, kind: PathKind) -> Result<&str> {
        self.path(kind).ok_or_else(|| RestmapError::UnsupportedPath {
            entity_type: self.entity_type.clone(),
            kind: kind.to_string(),
        })
    }
}

pub struct EntityMappingBuilder {
    entity_type: String,
    repository_name: Option<String>,
    properties: Vec<PropertySpec>,
    paths: HashMap<PathKind, String>,
    connection: String,
}

impl EntityMappingBuilder {
    fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            repository_name: None,
            properties: Vec::new(),
            paths: HashMap::new(),
            connection: "default".to_string(),
        }
    }

    pub fn repository(mut self, name: impl Into<String>) -> Self {
        self.repository_name = Some(name.into());
        self
    }

    pub fn connection(mut self, name: impl Into<String>) -> Self {
        self.connection = name.into();
        self
    }

    pub fn property(mut self, spec: PropertySpec) -> Self {
        self.properties.push(spec);
        self
    }

    pub fn path(mut self, kind: PathKind, template: impl Into<String>) -> Self {
        self.paths.insert(kind, template.into());
        self
    }

    pub fn build(self) -> Result<EntityMapping> {
        let mut identifier: Option<usize> = None;
        for (index, property) in self.properties.iter().enumerate() {
            if !property.identifier {
                continue;
            }
            if let Some(first) = identifier {
                return Err(RestmapError::DuplicateIdentifier {
                    entity_type: self.entity_type,
                    first: self.properties[first].name.clone(),
                    second: property.name.clone(),
                });
            }
            identifier = Some(index);
        }

        let repository_name = self
            .repository_name
            .unwrap_or_else(|| format!("{}Repository", self.entity_type));

        Ok(EntityMapping {
            entity_type: self.entity_type,
            repository_name,
            properties: self.properties,
            paths: self.paths,
            connection: self.connection,
            identifier,
        })
    }
}

/// Append-only lookup of mappings by entity type.
#[derive(Debug, Clone, Default)]
pub struct EntityMappingRegister {
    mappings: HashMap<String, Rc<EntityMapping>>,
}

impl EntityMappingRegister {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, mapping: EntityMapping) -> Result<()> {
        if self.mappings.contains_key(mapping.entity_type()) {
            return Err(RestmapError::Config(format!(
                "entity \"{}\" is mapped twice",
                mapping.entity_type()
            )));
        }
        tracing::debug!(entity_type = %mapping.entity_type(), "registered entity mapping");
        self.mappings
            .insert(mapping.entity_type().to_string(), Rc::new(mapping));
        Ok(())
    }

    pub fn get(&self, entity_type: &str) -> Result<Rc<EntityMapping>> {
        self.find(entity_type)
            .ok_or_else(|| RestmapError::UnknownEntity(entity_type.to_string()))
    }

    /// Non-failing lookup for callers that must tolerate unmapped names.
    pub fn find(&self, entity_type: &str) -> Option<Rc<EntityMapping>> {
        self.mappings.get(entity_type).cloned()
    }

    /// Mapping of an entity instance, if its type is registered here.
    pub fn find_entity(&self, entity: &Entity) -> Option<Rc<EntityMapping>> {
        self.find(entity.entity_type())
    }

    pub fn contains(&self, entity_type: &str) -> bool {
        self.mappings.contains_key(entity_type)
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rc<EntityMapping>> {
        self.mappings.values()
    }

    /// Every reference property must point at a registered type.
    pub fn validate_references(&self) -> Result<()> {
        for mapping in self.mappings.values() {
            for property in mapping.properties() {
                if let Some(reference) = &property.reference {
                    if !self.contains(&reference.entity) {
                        return Err(RestmapError::Config(format!(
                            "property \"{}.{}\" references unmapped entity \"{}\"",
                            mapping.entity_type(),
                            property.name,
                            reference.entity
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post_mapping() -> EntityMapping {
        EntityMapping::builder("Post")
            .connection("api")
            .property(PropertySpec::new("id", "integer").identifier().read_only())
            .property(PropertySpec::new("title", "string"))
            .property(PropertySpec::new("createdAt", "string").map_from("created_at").read_only())
            .property(PropertySpec::reference("author", "User"))
            .property(PropertySpec::reference("comments", "Comment").multiple().inverse_field("post"))
            .path(PathKind::List, "/posts")
            .path(PathKind::Get, "/posts/{id}")
            .build()
            .unwrap()
    }

    #[test]
    fn test_duplicate_identifier_rejected_at_build() {
        let err = EntityMapping::builder("Post")
            .property(PropertySpec::new("id", "integer").identifier())
            .property(PropertySpec::new("slug", "string").identifier())
            .build()
            .unwrap_err();

        match err {
            RestmapError::DuplicateIdentifier { first, second, .. } => {
                assert_eq!(first, "id");
                assert_eq!(second, "slug");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_identifier_and_paths() {
        let mapping = post_mapping();
        assert_eq!(mapping.identifier().map(|p| p.name.as_str()), Some("id"));
        assert_eq!(mapping.path(PathKind::Get), Some("/posts/{id}"));
        assert!(mapping.path(PathKind::Delete).is_none());
        assert!(matches!(
            mapping.require_path(PathKind::Delete),
            Err(RestmapError::UnsupportedPath { .. })
        ));
        assert_eq!(mapping.repository_name(), "PostRepository");
    }

    #[test]
    fn test_writable_properties_skip_read_only_and_inverse() {
        let mapping = post_mapping();
        let writable: Vec<&str> = mapping
            .writable_properties()
            .map(|p| p.name.as_str())
            .collect();
        assert_eq!(writable, vec!["title", "author"]);
    }

    #[test]
    fn test_register_get_and_find() {
        let mut register = EntityMappingRegister::new();
        register.register(post_mapping()).unwrap();

        assert!(register.get("Post").is_ok());
        assert!(register.find("Nope").is_none());
        assert!(matches!(
            register.get("Nope"),
            Err(RestmapError::UnknownEntity(name)) if name == "Nope"
        ));
        assert!(register.register(post_mapping()).is_err());
    }

    #[test]
    fn test_validate_references() {
        let mut register = EntityMappingRegister::new();
        register.register(post_mapping()).unwrap();
        assert!(register.validate_references().is_err());
    }

    #[test]
    fn test_property_type_parsing() {
        assert_eq!(PropertyType::from("bool"), PropertyType::Boolean);
        assert_eq!(PropertyType::from("float"), PropertyType::Float);
        assert_eq!(
            PropertyType::from("datetime"),
            PropertyType::Custom("datetime".to_string())
        );
        assert_eq!("patch".parse::<PathKind>().unwrap(), PathKind::Patch);
        assert!("fetch".parse::<PathKind>().is_err());
    }
}
