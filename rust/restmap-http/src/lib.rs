//! # restmap-http
//!
//! A blocking HTTP [`Connection`] for restmap, configured by a
//! [`ConnectionConfig`].
//!
//! ```rust,ignore
//! use restmap::{EntityManager, RestmapConfig};
//! use restmap_http::HttpConnection;
//!
//! let config = RestmapConfig::load("restmap.toml")?;
//! let manager = EntityManager::from_config(&config, HttpConnection::register_all(&config)?)?;
//! ```

use reqwest::blocking::Client;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use restmap::{
    Connection, ConnectionConfig, ConnectionRegister, FilterMode, Method, PaginatedConnection,
    Pagination, Query, RestmapConfig, RestmapError, Result,
};
use serde_json::Value;
use std::cell::Cell;
use std::rc::Rc;
use url::Url;

pub struct HttpConnection {
    name: String,
    config: ConnectionConfig,
    base: Url,
    client: Client,
    last_pagination: Cell<Pagination>,
}

impl HttpConnection {
    pub fn new(name: impl Into<String>, config: ConnectionConfig) -> Result<Self> {
        let name = name.into();
        let base = Url::parse(&format!("{}/", config.base_uri.trim_end_matches('/'))).map_err(|e| {
            RestmapError::Config(format!(
                "connection \"{}\" has an invalid base_uri \"{}\": {}",
                name, config.base_uri, e
            ))
        })?;
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| RestmapError::ConnectionFailed(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            name,
            config,
            base,
            client,
            last_pagination: Cell::new(Pagination::default()),
        })
    }

    /// One connection per entry of `config.connections`, registered under
    /// its name.
    pub fn register_all(config: &RestmapConfig) -> Result<ConnectionRegister> {
        let mut register = ConnectionRegister::new();
        for (name, connection) in &config.connections {
            let connection = Self::new(name.clone(), connection.clone())?;
            register.register(name.clone(), Rc::new(connection) as Rc<dyn Connection>);
        }
        Ok(register)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Absolute request URL: the query path joined onto the base URI, with
    /// filter, sort and paging parameters.
    pub fn url_for(&self, query: &Query) -> Result<Url> {
        let mut url = self
            .base
            .join(query.path().trim_start_matches('/'))
            .map_err(|e| RestmapError::Config(format!("invalid path \"{}\": {}", query.path(), e)))?;

        let pairs = self.query_pairs(query);
        if !pairs.is_empty() {
            url.query_pairs_mut().extend_pairs(pairs);
        }
        Ok(url)
    }

    fn query_pairs(&self, query: &Query) -> Vec<(String, String)> {
        let mut pairs = Vec::new();

        if self.config.filter_mode == FilterMode::Query {
            for (field, value) in query.filter() {
                match value {
                    Value::Array(items) => {
                        let key = format!("{}[]", field);
                        for item in items {
                            pairs.push((key.clone(), self.parameter(item)));
                        }
                    }
                    other => pairs.push((field.clone(), self.parameter(other))),
                }
            }
        }

        if !query.sort().is_empty() {
            let sort = query
                .sort()
                .iter()
                .map(|(field, direction)| format!("{}:{}", field, direction.as_str()))
                .collect::<Vec<_>>()
                .join(",");
            pairs.push((self.config.pagination.sort_param.clone(), sort));
        }

        if let Some(page) = query.page() {
            pairs.push((self.config.pagination.page_param.clone(), page.to_string()));
        }
        if let Some(per_page) = query.per_page() {
            pairs.push((self.config.pagination.per_page_param.clone(), per_page.to_string()));
        }
        pairs
    }

    fn parameter(&self, value: &Value) -> String {
        match value {
            Value::Null => self.config.null_value.clone(),
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    fn read_pagination(&self, headers: &HeaderMap) -> Pagination {
        let read = |name: &Option<String>| -> Option<u64> {
            let name = name.as_deref()?;
            headers.get(name)?.to_str().ok()?.trim().parse().ok()
        };
        let settings = &self.config.pagination;
        Pagination {
            expected_total_item_sum: read(&settings.total_header),
            expected_page_item_sum: read(&settings.page_items_header),
            expected_current_page: read(&settings.current_page_header),
        }
    }

    fn reports_pagination(&self) -> bool {
        let settings = &self.config.pagination;
        settings.total_header.is_some()
            || settings.page_items_header.is_some()
            || settings.current_page_header.is_some()
    }
}

fn http_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
    }
}

impl Connection for HttpConnection {
    fn handle_query(&self, query: &Query) -> Result<Option<Value>> {
        let url = self.url_for(query)?;
        let method = query.method();
        tracing::debug!(connection = %self.name, %method, %url, "sending request");

        let mut request = self.client.request(http_method(method), url.clone());
        for (name, value) in self.config.headers.iter().chain(query.headers()) {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(data) = query.data() {
            request = request.json(data);
        }

        let response = request
            .send()
            .map_err(|e| RestmapError::ConnectionFailed(format!("{} {}: {}", method, url, e)))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            tracing::debug!(connection = %self.name, %method, %url, "resource not found");
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            tracing::warn!(connection = %self.name, %method, %url, %status, "request failed");
            return Err(RestmapError::ConnectionFailed(format!(
                "{} {} returned {}: {}",
                method, url, status, body
            )));
        }

        self.last_pagination.set(self.read_pagination(response.headers()));
        let body = response
            .text()
            .map_err(|e| RestmapError::ConnectionFailed(format!("{} {}: {}", method, url, e)))?;
        if body.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&body)?))
    }

    fn as_paginated(&self) -> Option<&dyn PaginatedConnection> {
        if self.reports_pagination() {
            Some(self)
        } else {
            None
        }
    }
}

impl PaginatedConnection for HttpConnection {
    fn total_results_sum(&self) -> Option<u64> {
        self.last_pagination.get().expected_total_item_sum
    }

    fn current_page_results_sum(&self) -> Option<u64> {
        self.last_pagination.get().expected_page_item_sum
    }

    fn current_page(&self) -> Option<u64> {
        self.last_pagination.get().expected_current_page
    }
}

impl std::fmt::Debug for HttpConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpConnection")
            .field("name", &self.name)
            .field("base", &self.base.as_str())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use restmap::{PaginationConfig, Record, SortDirection};
    use serde_json::json;

    fn connection(config: ConnectionConfig) -> HttpConnection {
        HttpConnection::new("api", config).unwrap()
    }

    fn filter(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {}", other),
        }
    }

    #[test]
    fn test_path_joins_onto_base() {
        let http = connection(ConnectionConfig::new("https://api.example.com/v1"));
        let query = Query::new("User", Method::Get, "/users/7");
        assert_eq!(
            http.url_for(&query).unwrap().as_str(),
            "https://api.example.com/v1/users/7"
        );
    }

    #[test]
    fn test_filter_sort_and_page_parameters() {
        let http = connection(ConnectionConfig::new("https://api.example.com/").with_null_value("null"));
        let query = Query::new("User", Method::Get, "users")
            .with_filter(filter(json!({"name": "Ada Lovelace", "manager": null, "role": ["a", "b"]})))
            .with_sort(vec![
                ("age".to_string(), SortDirection::Descending),
                ("name".to_string(), SortDirection::Ascending),
            ])
            .with_page(Some(2), Some(50));

        let url = http.url_for(&query).unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("name".to_string(), "Ada Lovelace".to_string())));
        assert!(pairs.contains(&("manager".to_string(), "null".to_string())));
        assert!(pairs.contains(&("role[]".to_string(), "a".to_string())));
        assert!(pairs.contains(&("role[]".to_string(), "b".to_string())));
        assert!(pairs.contains(&("sort".to_string(), "age:DESC,name:ASC".to_string())));
        assert!(pairs.contains(&("page".to_string(), "2".to_string())));
        assert!(pairs.contains(&("per_page".to_string(), "50".to_string())));
    }

    #[test]
    fn test_filters_can_be_left_out() {
        let http = connection(
            ConnectionConfig::new("https://api.example.com").with_filter_mode(FilterMode::None),
        );
        let query = Query::new("User", Method::Get, "/users").with_filter(filter(json!({"age": 3})));
        assert_eq!(http.url_for(&query).unwrap().query(), None);
    }

    #[test]
    fn test_pagination_headers() {
        let http = connection(ConnectionConfig::new("https://api.example.com").with_pagination(
            PaginationConfig::default()
                .with_total_header("X-Total-Count")
                .with_current_page_header("X-Page"),
        ));
        assert!(http.as_paginated().is_some());

        let mut headers = HeaderMap::new();
        headers.insert("X-Total-Count", HeaderValue::from_static("42"));
        headers.insert("X-Page", HeaderValue::from_static(" 3 "));
        let pagination = http.read_pagination(&headers);
        assert_eq!(pagination.expected_total_item_sum, Some(42));
        assert_eq!(pagination.expected_current_page, Some(3));
        assert_eq!(pagination.expected_page_item_sum, None);

        let plain = connection(ConnectionConfig::new("https://api.example.com"));
        assert!(plain.as_paginated().is_none());
    }

    #[test]
    fn test_invalid_base_uri() {
        assert!(matches!(
            HttpConnection::new("api", ConnectionConfig::new("not a url")),
            Err(RestmapError::Config(_))
        ));
    }

    #[test]
    fn test_register_all() {
        let config = RestmapConfig::default()
            .with_connection("primary", ConnectionConfig::new("https://a.example.com"))
            .with_connection("archive", ConnectionConfig::new("https://b.example.com"));
        let register = HttpConnection::register_all(&config).unwrap();
        assert!(register.contains("primary"));
        assert!(register.contains("archive"));
    }
}
