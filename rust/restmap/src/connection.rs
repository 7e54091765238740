//! Transport seam.
//!
//! A [`Connection`] executes one [`Query`] against a remote and returns the
//! untyped result. Several connections may serve the same name (mirrors or
//! shards); reads try them in registration order.

use crate::error::{RestmapError, Result};
use crate::query::Query;
use serde_json::Value;
use std::collections::HashMap;
use std::rc::Rc;

pub trait Connection {
    /// Runs the query. `Ok(None)` means this connection does not have the
    /// requested resource; it is not an error.
    fn handle_query(&self, query: &Query) -> Result<Option<Value>>;

    /// Pagination counters from the last call, if this connection reports
    /// them.
    fn as_paginated(&self) -> Option<&dyn PaginatedConnection> {
        None
    }
}

/// Pagination summary of the most recent `handle_query` call.
pub trait PaginatedConnection {
    fn total_results_sum(&self) -> Option<u64>;
    fn current_page_results_sum(&self) -> Option<u64>;
    fn current_page(&self) -> Option<u64>;
}

/// Connections by name, each name holding an ordered candidate list.
#[derive(Clone, Default)]
pub struct ConnectionRegister {
    connections: HashMap<String, Vec<Rc<dyn Connection>>>,
}

impl ConnectionRegister {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a candidate under `name`.
    pub fn register(&mut self, name: impl Into<String>, connection: Rc<dyn Connection>) {
        let name = name.into();
        tracing::debug!(connection = %name, "registered connection");
        self.connections.entry(name).or_default().push(connection);
    }

    pub fn connections(&self, name: &str) -> Result<Vec<Rc<dyn Connection>>> {
        match self.connections.get(name) {
            Some(candidates) if !candidates.is_empty() => Ok(candidates.clone()),
            _ => Err(RestmapError::UnknownConnection(name.to_string())),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.connections.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.connections.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for ConnectionRegister {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<(&String, usize)> = self
            .connections
            .iter()
            .map(|(name, list)| (name, list.len()))
            .collect();
        names.sort();
        f.debug_struct("ConnectionRegister")
            .field("connections", &names)
            .finish()
    }
}
