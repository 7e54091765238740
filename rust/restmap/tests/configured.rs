mod common;

use common::MemoryConnection;
use restmap::{Connection, ConnectionRegister, EntityManager, PersistOutcome, RestmapConfig};
use serde_json::json;
use std::rc::Rc;

const CONFIG: &str = r#"
    [connections.api]
    base_uri = "https://shop.example.com"

    [entities.Product]
    connection = "api"
    paths = { get = "/products/{sku}", patch = "/products/{sku}" }

    [[entities.Product.properties]]
    name = "sku"
    type = "string"
    identifier = true
    read_only = true

    [[entities.Product.properties]]
    name = "price"
    type = "float"

    [[entities.Product.properties]]
    name = "inStock"
    type = "boolean"
    map_from = "in_stock"
"#;

#[test]
fn test_manager_from_config() {
    let config = RestmapConfig::from_toml_str(CONFIG).unwrap();
    let remote = MemoryConnection::new();
    remote.respond("GET /products/A-1", json!({"sku": "A-1", "price": 9.5, "in_stock": 1}));

    let mut connections = ConnectionRegister::new();
    connections.register("api", Rc::clone(&remote) as Rc<dyn Connection>);
    let manager = EntityManager::from_config(&config, connections).unwrap();

    let product = manager
        .repository("Product")
        .unwrap()
        .find_one("A-1")
        .unwrap()
        .unwrap();
    assert!(product.get_as::<bool>("inStock").unwrap());

    product.set("price", 11.0).unwrap();
    assert_eq!(
        manager.persist(&product).unwrap(),
        PersistOutcome::Updated(vec!["price".to_string()])
    );
    let call = remote.last().unwrap();
    assert_eq!(call.key(), "PATCH /products/A-1");
    assert_eq!(call.data, Some(json!({"price": 11.0})));
}

#[test]
fn test_manager_requires_declared_connections() {
    let config = RestmapConfig::from_toml_str(CONFIG).unwrap();
    assert!(EntityManager::from_config(&config, ConnectionRegister::new()).is_err());
}
