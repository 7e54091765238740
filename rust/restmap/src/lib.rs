//! # restmap
//!
//! Identity-mapped entities over REST resources.
//!
//! Declare how entity types map onto remote JSON records, register one or
//! more connections, then read through repositories and write back with
//! [`EntityManager::persist`]. Every identity is represented by exactly one
//! live [`Entity`] per manager; refetching merges into it and keeps local,
//! unpersisted edits.
//!
//! ## Example
//!
//! ```rust,ignore
//! use restmap::{EntityManager, RestmapConfig};
//! use restmap_http::HttpConnection;
//!
//! let config = RestmapConfig::load("restmap.toml")?;
//! let manager = EntityManager::from_config(&config, HttpConnection::register_all(&config)?)?;
//!
//! if let Some(user) = manager.repository("User")?.find_one(7)? {
//!     user.set("displayName", "Ada")?;
//!     manager.persist(&user)?; // PATCH /users/7 {"display_name": "Ada"}
//!
//!     for post in user.get_as::<restmap::EntityCollection>("posts")?.iter_all() {
//!         println!("{:?}", post?.get("title")?);
//!     }
//! }
//! ```
//!
//! ## Build pipeline
//!
//! Every record passes through named pre-build stages before population
//! (`store.cache_entity_data`, `store.find_existing_entity`,
//! `store.protect_pending_changes`, `proxy.build_proxy`) and a post-build
//! stage (`store.cache_entity`). Embedding code can add its own stages
//! around them through [`EntityManager::dispatcher`].

pub mod builder;
pub mod collection;
pub mod config;
pub mod connection;
pub mod entity;
pub mod error;
pub mod event;
pub mod manager;
pub mod mapping;
pub mod normalizer;
pub mod query;
pub mod repository;
pub mod store;
pub mod telemetry;
pub mod value;

pub use builder::EntityBuilder;
pub use collection::{EntityCollection, IterAll, Pagination};
pub use config::{ConnectionConfig, EntityConfig, FilterMode, PaginationConfig, PropertyConfig, RestmapConfig};
pub use connection::{Connection, ConnectionRegister, PaginatedConnection};
pub use entity::proxy::BUILD_PROXY;
pub use entity::{Entity, EntityMetadata, Proxy, Resolver};
pub use error::{RestmapError, Result};
pub use event::{EventDispatcher, Pipeline, PostBuildEvent, PreBuildEvent, PrePersistEvent};
pub use manager::{EntityManager, EntityManagerBuilder, ManagerRef, PersistOutcome};
pub use mapping::{
    EntityMapping, EntityMappingBuilder, EntityMappingRegister, PathKind, PropertySpec, PropertyType,
    ReferenceOptions,
};
pub use normalizer::{DenormalizeContext, Normalizer, Transformer, TransformerRegister};
pub use query::{Method, Query, QueryBuilder, QueryTarget, SortDirection};
pub use repository::{EntityRepository, Filter, Lookup};
pub use store::{
    EntityStore, CACHE_ENTITY, CACHE_ENTITY_DATA, FIND_EXISTING_ENTITY, PROTECT_PENDING_CHANGES,
    TRACK_NEW_ENTITY,
};
pub use value::{Identifier, PropertyValue, Record};

pub use serde_json::Value;
