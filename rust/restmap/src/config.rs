//! File-backed configuration: entity mappings and connection settings.
//!
//! ```toml
//! [connections.default]
//! base_uri = "https://api.example.com/v1"
//! filter_mode = "query"
//!
//! [entities.User]
//! repository = "users"
//! paths = { list = "/users", get = "/users/{id}", post = "/users", patch = "/users/{id}" }
//!
//! [[entities.User.properties]]
//! name = "id"
//! type = "integer"
//! identifier = true
//! read_only = true
//!
//! [[entities.User.properties]]
//! name = "posts"
//! type = "entity"
//! entity = "Post"
//! multiple = true
//! inverse_field = "author"
//! ```

use crate::error::{RestmapError, Result};
use crate::mapping::{EntityMapping, EntityMappingRegister, PathKind, PropertySpec, PropertyType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_CONNECTION: &str = "default";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RestmapConfig {
    #[serde(default)]
    pub connections: BTreeMap<String, ConnectionConfig>,

    #[serde(default)]
    pub entities: BTreeMap<String, EntityConfig>,
}

/// Mapping of one entity type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<String>,

    /// Path templates by kind (`list`, `get`, `post`, `put`, `patch`,
    /// `delete`).
    #[serde(default)]
    pub paths: BTreeMap<String, String>,

    #[serde(default)]
    pub properties: Vec<PropertyConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyConfig {
    pub name: String,

    #[serde(rename = "type")]
    pub property_type: PropertyType,

    /// Wire field name, when it differs from `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map_from: Option<String>,

    #[serde(default)]
    pub read_only: bool,

    #[serde(default)]
    pub identifier: bool,

    #[serde(default)]
    pub multiple: bool,

    /// Target type of an entity reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<String>,

    #[serde(default)]
    pub inline: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inverse_field: Option<String>,
}

impl PropertyConfig {
    fn to_spec(&self, entity_type: &str) -> Result<PropertySpec> {
        let mut spec = match (&self.property_type, &self.entity) {
            (PropertyType::Entity, Some(target)) => PropertySpec::reference(&self.name, target),
            (PropertyType::Entity, None) => {
                return Err(RestmapError::Config(format!(
                    "property \"{}.{}\" is an entity reference without a target entity",
                    entity_type, self.name
                )))
            }
            (other, _) => PropertySpec::new(&self.name, other.clone()),
        };

        if let Some(wire_name) = &self.map_from {
            spec = spec.map_from(wire_name);
        }
        if self.read_only {
            spec = spec.read_only();
        }
        if self.identifier {
            spec = spec.identifier();
        }
        if self.multiple {
            spec = spec.multiple();
        }
        if self.inline {
            spec = spec.inline();
        }
        if let Some(field) = &self.inverse_field {
            spec = spec.inverse_field(field);
        }
        Ok(spec)
    }
}

/// How a connection passes query filters to the remote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    /// As URL query parameters.
    #[default]
    Query,
    /// Not sent; the path alone selects the resources.
    None,
}

/// Parameter and header names used for paging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationConfig {
    #[serde(default = "default_page_param")]
    pub page_param: String,

    #[serde(default = "default_per_page_param")]
    pub per_page_param: String,

    #[serde(default = "default_sort_param")]
    pub sort_param: String,

    /// Response header carrying the total number of matching items.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_header: Option<String>,

    /// Response header carrying the number of items on this page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_items_header: Option<String>,

    /// Response header carrying the current page number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_page_header: Option<String>,
}

fn default_page_param() -> String {
    "page".to_string()
}

fn default_per_page_param() -> String {
    "per_page".to_string()
}

fn default_sort_param() -> String {
    "sort".to_string()
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            page_param: default_page_param(),
            per_page_param: default_per_page_param(),
            sort_param: default_sort_param(),
            total_header: None,
            page_items_header: None,
            current_page_header: None,
        }
    }
}

impl PaginationConfig {
    pub fn with_total_header(mut self, header: impl Into<String>) -> Self {
        self.total_header = Some(header.into());
        self
    }

    pub fn with_page_items_header(mut self, header: impl Into<String>) -> Self {
        self.page_items_header = Some(header.into());
        self
    }

    pub fn with_current_page_header(mut self, header: impl Into<String>) -> Self {
        self.current_page_header = Some(header.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub base_uri: String,

    #[serde(default)]
    pub filter_mode: FilterMode,

    #[serde(default)]
    pub pagination: PaginationConfig,

    /// Sent in place of a null filter value.
    #[serde(default = "default_null_value")]
    pub null_value: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Sent with every request.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

fn default_null_value() -> String {
    "\0".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            base_uri: "http://localhost".to_string(),
            filter_mode: FilterMode::default(),
            pagination: PaginationConfig::default(),
            null_value: default_null_value(),
            timeout_secs: default_timeout_secs(),
            headers: BTreeMap::new(),
        }
    }
}

impl ConnectionConfig {
    pub fn new(base_uri: impl Into<String>) -> Self {
        Self {
            base_uri: base_uri.into(),
            ..Default::default()
        }
    }

    pub fn with_filter_mode(mut self, mode: FilterMode) -> Self {
        self.filter_mode = mode;
        self
    }

    pub fn with_pagination(mut self, pagination: PaginationConfig) -> Self {
        self.pagination = pagination;
        self
    }

    pub fn with_null_value(mut self, value: impl Into<String>) -> Self {
        self.null_value = value.into();
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl RestmapConfig {
    /// Load and validate a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        tracing::debug!(path = %path.display(), "loading configuration");
        Self::from_toml_str(&contents)
    }

    /// Same as [`load`](Self::load), returning `None` if the file is absent.
    pub fn load_optional<P: AsRef<Path>>(path: P) -> Result<Option<Self>> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(None);
        }
        Self::load(path).map(Some)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: RestmapConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_connection(mut self, name: impl Into<String>, connection: ConnectionConfig) -> Self {
        self.connections.insert(name.into(), connection);
        self
    }

    pub fn with_entity(mut self, entity_type: impl Into<String>, entity: EntityConfig) -> Self {
        self.entities.insert(entity_type.into(), entity);
        self
    }

    pub fn validate(&self) -> Result<()> {
        for (name, connection) in &self.connections {
            if connection.base_uri.trim().is_empty() {
                return Err(RestmapError::Config(format!(
                    "connection \"{}\" has an empty base_uri",
                    name
                )));
            }
        }

        for (entity_type, entity) in &self.entities {
            let connection = entity.connection.as_deref().unwrap_or(DEFAULT_CONNECTION);
            if !self.connections.contains_key(connection) {
                return Err(RestmapError::UnknownConnection(connection.to_string()));
            }
            for kind in entity.paths.keys() {
                PathKind::from_str(kind)?;
            }
            for property in &entity.properties {
                if let Some(target) = &property.entity {
                    if !self.entities.contains_key(target) {
                        return Err(RestmapError::Config(format!(
                            "property \"{}.{}\" references unmapped entity \"{}\"",
                            entity_type, property.name, target
                        )));
                    }
                }
            }
        }

        // Duplicate identifiers and missing reference targets surface here.
        self.entity_mappings().map(|_| ())
    }

    pub fn connection(&self, name: &str) -> Result<&ConnectionConfig> {
        self.connections
            .get(name)
            .ok_or_else(|| RestmapError::UnknownConnection(name.to_string()))
    }

    /// The declared entities as a mapping register.
    pub fn entity_mappings(&self) -> Result<EntityMappingRegister> {
        let mut register = EntityMappingRegister::new();
        for (entity_type, entity) in &self.entities {
            register.register(entity.to_mapping(entity_type)?)?;
        }
        register.validate_references()?;
        Ok(register)
    }
}

impl EntityConfig {
    pub fn to_mapping(&self, entity_type: &str) -> Result<EntityMapping> {
        let mut builder = EntityMapping::builder(entity_type)
            .connection(self.connection.as_deref().unwrap_or(DEFAULT_CONNECTION));
        if let Some(repository) = &self.repository {
            builder = builder.repository(repository);
        }
        for (kind, template) in &self.paths {
            builder = builder.path(PathKind::from_str(kind)?, template);
        }
        for property in &self.properties {
            builder = builder.property(property.to_spec(entity_type)?);
        }
        builder.build()
    }
}
