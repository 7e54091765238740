#![allow(dead_code)]

use restmap::{
    Connection, EntityManager, EntityMapping, PaginatedConnection, PathKind, PropertySpec, Query,
    Record, Result,
};
use serde_json::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// One request seen by a [`MemoryConnection`].
#[derive(Debug, Clone)]
pub struct Call {
    pub method: String,
    pub path: String,
    pub filter: Record,
    pub data: Option<Value>,
    pub page: Option<u32>,
}

impl Call {
    pub fn key(&self) -> String {
        request_key(&self.method, &self.path, self.page)
    }
}

fn request_key(method: &str, path: &str, page: Option<u32>) -> String {
    match page {
        Some(page) => format!("{} {}?page={}", method, path, page),
        None => format!("{} {}", method, path),
    }
}

/// Scripted in-memory remote. Responses are keyed by `"METHOD /path"`,
/// with `?page=N` appended when the query asks for a page.
#[derive(Default)]
pub struct MemoryConnection {
    responses: RefCell<HashMap<String, Value>>,
    calls: RefCell<Vec<Call>>,
    total: RefCell<Option<u64>>,
}

impl MemoryConnection {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn respond(&self, key: &str, value: Value) {
        self.responses.borrow_mut().insert(key.to_string(), value);
    }

    pub fn report_total(&self, total: u64) {
        *self.total.borrow_mut() = Some(total);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    pub fn keys(&self) -> Vec<String> {
        self.calls.borrow().iter().map(Call::key).collect()
    }

    pub fn count(&self, key: &str) -> usize {
        self.calls.borrow().iter().filter(|c| c.key() == key).count()
    }

    pub fn last(&self) -> Option<Call> {
        self.calls.borrow().last().cloned()
    }
}

impl Connection for MemoryConnection {
    fn handle_query(&self, query: &Query) -> Result<Option<Value>> {
        let call = Call {
            method: query.method().to_string(),
            path: query.path().to_string(),
            filter: query.filter().clone(),
            data: query.data().cloned(),
            page: query.page(),
        };
        let response = self.responses.borrow().get(&call.key()).cloned();
        self.calls.borrow_mut().push(call);
        Ok(response)
    }

    fn as_paginated(&self) -> Option<&dyn PaginatedConnection> {
        self.total.borrow().is_some().then_some(self as &dyn PaginatedConnection)
    }
}

impl PaginatedConnection for MemoryConnection {
    fn total_results_sum(&self) -> Option<u64> {
        *self.total.borrow()
    }

    fn current_page_results_sum(&self) -> Option<u64> {
        None
    }

    fn current_page(&self) -> Option<u64> {
        None
    }
}

pub fn user_mapping() -> EntityMapping {
    EntityMapping::builder("User")
        .repository("users")
        .property(PropertySpec::new("id", "integer").identifier().read_only())
        .property(PropertySpec::new("name", "string"))
        .property(PropertySpec::new("email", "string").map_from("email_address"))
        .property(PropertySpec::new("age", "integer"))
        .property(PropertySpec::reference("posts", "Post").multiple().inverse_field("author"))
        .path(PathKind::List, "/users")
        .path(PathKind::Get, "/users/{id}")
        .path(PathKind::Post, "/users")
        .path(PathKind::Patch, "/users/{id}")
        .path(PathKind::Delete, "/users/{id}")
        .build()
        .unwrap()
}

pub fn post_mapping() -> EntityMapping {
    EntityMapping::builder("Post")
        .property(PropertySpec::new("id", "integer").identifier().read_only())
        .property(PropertySpec::new("title", "string"))
        .property(PropertySpec::reference("author", "User"))
        .property(PropertySpec::reference("tags", "Tag").multiple())
        .path(PathKind::List, "/posts")
        .path(PathKind::Get, "/posts/{id}")
        .path(PathKind::Post, "/posts")
        .path(PathKind::Patch, "/posts/{id}")
        .build()
        .unwrap()
}

pub fn tag_mapping() -> EntityMapping {
    EntityMapping::builder("Tag")
        .property(PropertySpec::new("id", "integer").identifier().read_only())
        .property(PropertySpec::new("label", "string"))
        .path(PathKind::List, "/tags")
        .path(PathKind::Get, "/tags/{id}")
        .path(PathKind::Delete, "/tags")
        .build()
        .unwrap()
}

/// A blog manager over one in-memory connection.
pub fn blog(remote: &Rc<MemoryConnection>) -> EntityManager {
    blog_with(&[remote])
}

/// A blog manager whose default connection tries `remotes` in order.
pub fn blog_with(remotes: &[&Rc<MemoryConnection>]) -> EntityManager {
    let mut builder = EntityManager::builder()
        .mapping(user_mapping())
        .mapping(post_mapping())
        .mapping(tag_mapping());
    for remote in remotes {
        builder = builder.connection("default", Rc::clone(remote) as Rc<dyn Connection>);
    }
    builder.build().unwrap()
}

pub fn record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        other => panic!("not an object: {}", other),
    }
}
