//! Resolved requests and their execution.

pub mod builder;

pub use builder::{QueryBuilder, QueryTarget};

use crate::collection::{EntityCollection, Page, PageSource, Pagination};
use crate::connection::Connection;
use crate::entity::Entity;
use crate::error::{RestmapError, Result};
use crate::manager::ManagerRef;
use crate::value::Record;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }

    pub fn is_read(&self) -> bool {
        matches!(self, Method::Get)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Ascending => "ASC",
            SortDirection::Descending => "DESC",
        }
    }
}

/// A fully resolved request: concrete path, wire-named filter and sort,
/// and the candidate connections to run it against.
#[derive(Clone)]
pub struct Query {
    manager: ManagerRef,
    entity_type: String,
    connections: Vec<Rc<dyn Connection>>,
    path: String,
    method: Method,
    data: Option<Value>,
    filter: Record,
    sort: Vec<(String, SortDirection)>,
    page: Option<u32>,
    per_page: Option<u32>,
    headers: BTreeMap<String, String>,
}

impl Query {
    /// A detached query. Raw execution works once connections are attached;
    /// building entities needs a query from [`QueryBuilder`].
    pub fn new(entity_type: impl Into<String>, method: Method, path: impl Into<String>) -> Self {
        Self {
            manager: ManagerRef::default(),
            entity_type: entity_type.into(),
            connections: Vec::new(),
            path: path.into(),
            method,
            data: None,
            filter: Record::new(),
            sort: Vec::new(),
            page: None,
            per_page: None,
            headers: BTreeMap::new(),
        }
    }

    pub(crate) fn with_manager(mut self, manager: ManagerRef) -> Self {
        self.manager = manager;
        self
    }

    pub fn with_connections(mut self, connections: Vec<Rc<dyn Connection>>) -> Self {
        self.connections = connections;
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_filter(mut self, filter: Record) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_sort(mut self, sort: Vec<(String, SortDirection)>) -> Self {
        self.sort = sort;
        self
    }

    pub fn with_page(mut self, page: Option<u32>, per_page: Option<u32>) -> Self {
        self.page = page;
        self.per_page = per_page;
        self
    }

    pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    pub fn filter(&self) -> &Record {
        &self.filter
    }

    pub fn sort(&self) -> &[(String, SortDirection)] {
        &self.sort
    }

    pub fn page(&self) -> Option<u32> {
        self.page
    }

    pub fn per_page(&self) -> Option<u32> {
        self.per_page
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    /// Reads try every connection; writes only the first.
    fn candidates(&self) -> &[Rc<dyn Connection>] {
        if self.method.is_read() {
            &self.connections
        } else {
            &self.connections[..self.connections.len().min(1)]
        }
    }

    /// Runs the query and returns the first non-null raw result with the
    /// pagination its connection reported.
    pub fn execute(&self) -> Result<Option<(Value, Pagination)>> {
        for (index, connection) in self.candidates().iter().enumerate() {
            tracing::debug!(
                method = %self.method,
                path = %self.path,
                connection = index,
                "dispatching query"
            );
            match connection.handle_query(self)? {
                None | Some(Value::Null) => continue,
                Some(value) => {
                    let pagination = connection
                        .as_paginated()
                        .map(|paginated| Pagination {
                            expected_total_item_sum: paginated.total_results_sum(),
                            expected_page_item_sum: paginated.current_page_results_sum(),
                            expected_current_page: paginated.current_page(),
                        })
                        .unwrap_or_default();
                    return Ok(Some((value, pagination)));
                }
            }
        }
        tracing::debug!(method = %self.method, path = %self.path, "no connection returned a result");
        Ok(None)
    }

    /// One entity: the first element of an array result, or the object
    /// itself. `None` when no connection has it.
    pub fn get_single_result(&self) -> Result<Option<Entity>> {
        let record = match self.execute()? {
            None => return Ok(None),
            Some((Value::Array(items), _)) => match items.into_iter().next() {
                None => return Ok(None),
                Some(Value::Object(record)) => record,
                Some(other) => return Err(self.unexpected(&other)),
            },
            Some((Value::Object(record), _)) => record,
            Some((other, _)) => return Err(self.unexpected(&other)),
        };
        self.build(record).map(Some)
    }

    /// Every returned record, as a collection. Without explicit paging the
    /// collection can fetch further pages on demand.
    pub fn get_result(&self) -> Result<EntityCollection> {
        let page = self.load()?;
        let collection = EntityCollection::from_entities(page.entities);
        collection.set_pagination(page.pagination);
        if self.page.is_none() && self.method.is_read() {
            collection.attach_source(Rc::new(self.clone()), 1);
        }
        Ok(collection)
    }

    fn load(&self) -> Result<Page> {
        let (value, pagination) = match self.execute()? {
            None => return Ok(Page {
                entities: Vec::new(),
                pagination: Pagination::default(),
            }),
            Some(result) => result,
        };

        let records = match value {
            Value::Array(items) => items,
            object @ Value::Object(_) => vec![object],
            other => return Err(self.unexpected(&other)),
        };

        let mut entities = Vec::with_capacity(records.len());
        for item in records {
            match item {
                Value::Object(record) => entities.push(self.build(record)?),
                other => return Err(self.unexpected(&other)),
            }
        }
        Ok(Page {
            entities,
            pagination,
        })
    }

    fn build(&self, record: Record) -> Result<Entity> {
        self.manager
            .upgrade()?
            .entity_builder()
            .build_entity(&self.entity_type, record, false)
    }

    fn unexpected(&self, value: &Value) -> RestmapError {
        let found = match value {
            Value::Null => "null",
            Value::Bool(_) => "a boolean",
            Value::Number(_) => "a number",
            Value::String(_) => "a string",
            Value::Array(_) => "an array",
            Value::Object(_) => "an object",
        };
        RestmapError::UnexpectedResult {
            entity_type: self.entity_type.clone(),
            reason: format!("expected records, got {}", found),
        }
    }
}

impl PageSource for Query {
    fn fetch_page(&self, page: u32) -> Result<Page> {
        if page == 1 && self.page.is_none() {
            return self.load();
        }
        self.clone()
            .with_page(Some(page), self.per_page)
            .load()
    }
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("entity_type", &self.entity_type)
            .field("method", &self.method)
            .field("path", &self.path)
            .field("filter", &self.filter)
            .field("sort", &self.sort)
            .field("page", &self.page)
            .field("per_page", &self.per_page)
            .field("connections", &self.connections.len())
            .finish()
    }
}
