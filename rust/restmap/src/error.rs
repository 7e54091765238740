use thiserror::Error;

#[derive(Error, Debug)]
pub enum RestmapError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Entity \"{entity_type}\" declares more than one identifier ({first}, {second})")]
    DuplicateIdentifier {
        entity_type: String,
        first: String,
        second: String,
    },

    #[error("The entity \"{0}\" is not mapped")]
    UnknownEntity(String),

    #[error("No connection registered under \"{0}\"")]
    UnknownConnection(String),

    #[error("Property \"{field}\" of entity \"{entity_type}\" was not available in the data")]
    MissingProperty { entity_type: String, field: String },

    #[error("No transformer for type \"{0}\" exists")]
    UnknownTransformer(String),

    #[error("Invalid value for property \"{property}\": {reason}")]
    InvalidValue { property: String, reason: String },

    #[error("Invalid identifier for entity \"{entity_type}\": {reason}")]
    InvalidIdentifier { entity_type: String, reason: String },

    #[error("Entity \"{entity_type}\" has no property \"{property}\"")]
    UnknownProperty {
        entity_type: String,
        property: String,
    },

    #[error("Property \"{property}\" of entity \"{entity_type}\" is read-only")]
    ReadOnlyProperty {
        entity_type: String,
        property: String,
    },

    #[error("Entity \"{entity_type}\" has no {kind} path")]
    UnsupportedPath { entity_type: String, kind: String },

    #[error("No value for path parameter \"{parameter}\" in \"{path}\"")]
    UnresolvedPathParameter { path: String, parameter: String },

    #[error("Unexpected result for \"{entity_type}\": {reason}")]
    UnexpectedResult { entity_type: String, reason: String },

    #[error("Two instances claim identity {entity_type}#{identifier}")]
    IdentityConflict {
        entity_type: String,
        identifier: String,
    },

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("The entity manager was dropped")]
    ManagerDropped,

    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RestmapError {
    pub(crate) fn invalid_value(property: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            property: property.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T, E = RestmapError> = std::result::Result<T, E>;
