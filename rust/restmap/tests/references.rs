mod common;

use common::{blog, MemoryConnection};
use restmap::{
    Connection, Entity, EntityCollection, EntityManager, EntityMapping, Identifier, PathKind,
    PersistOutcome, PropertySpec,
};
use serde_json::json;
use std::rc::Rc;

fn ada() -> serde_json::Value {
    json!({"id": 7, "name": "Ada", "email_address": "ada@example.com", "age": 36})
}

#[test]
fn test_reference_is_lazy_and_resolves_once() {
    let remote = MemoryConnection::new();
    remote.respond("GET /posts/1", json!({"id": 1, "title": "Notes", "author": 9, "tags": []}));
    remote.respond(
        "GET /users/9",
        json!({"id": 9, "name": "Edsger", "email_address": "ewd@example.com", "age": 72}),
    );
    let manager = blog(&remote);

    let post = manager.repository("Post").unwrap().find_one(1).unwrap().unwrap();
    let author: Entity = post.get_as("author").unwrap();
    assert!(!author.is_initialized());
    assert_eq!(remote.count("GET /users/9"), 0);

    assert_eq!(author.get_as::<String>("name").unwrap(), "Edsger");
    assert_eq!(author.get_as::<i64>("age").unwrap(), 72);
    assert!(author.is_initialized());
    assert_eq!(remote.count("GET /users/9"), 1);
}

#[test]
fn test_missing_lazy_reference_is_not_refetched() {
    let remote = MemoryConnection::new();
    remote.respond("GET /posts/1", json!({"id": 1, "title": "Notes", "author": 404, "tags": []}));
    let manager = blog(&remote);

    let post = manager.repository("Post").unwrap().find_one(1).unwrap().unwrap();
    let author: Entity = post.get_as("author").unwrap();

    assert!(author.get("name").unwrap().is_null());
    assert!(author.get("name").unwrap().is_null());
    assert_eq!(remote.count("GET /users/404"), 1);
}

#[test]
fn test_reference_to_known_entity_reuses_it() {
    let remote = MemoryConnection::new();
    remote.respond("GET /users/7", ada());
    remote.respond("GET /posts/1", json!({"id": 1, "title": "Notes", "author": 7, "tags": []}));
    let manager = blog(&remote);

    let user = manager.repository("User").unwrap().find_one(7).unwrap().unwrap();
    let post = manager.repository("Post").unwrap().find_one(1).unwrap().unwrap();
    let author: Entity = post.get_as("author").unwrap();

    assert!(author.ptr_eq(&user));
    assert!(author.is_initialized());

    // A bare identifier reference must not make the user look dirty.
    assert_eq!(manager.persist(&user).unwrap(), PersistOutcome::Unchanged);
}

#[test]
fn test_multi_reference_round_trip() {
    let remote = MemoryConnection::new();
    remote.respond("GET /posts/1", json!({"id": 1, "title": "Notes", "author": null, "tags": [7, 9]}));
    let manager = blog(&remote);

    let post = manager.repository("Post").unwrap().find_one(1).unwrap().unwrap();
    let tags: EntityCollection = post.get_as("tags").unwrap();
    assert_eq!(tags.len(), 2);
    assert_eq!(manager.persist(&post).unwrap(), PersistOutcome::Unchanged);

    let kept = tags.get(1).unwrap();
    post.set("tags", EntityCollection::from_entities([kept])).unwrap();
    assert_eq!(
        manager.persist(&post).unwrap(),
        PersistOutcome::Updated(vec!["tags".to_string()])
    );
    assert_eq!(remote.last().unwrap().data, Some(json!({"tags": [9]})));
    assert!(remote.keys().iter().all(|key| !key.starts_with("GET /tags")));
}

#[test]
fn test_inverse_collection_is_deferred() {
    let remote = MemoryConnection::new();
    remote.respond("GET /users/7", ada());
    remote.respond(
        "GET /posts",
        json!([
            {"id": 1, "title": "First", "author": 7, "tags": []},
            {"id": 2, "title": "Second", "author": 7, "tags": []}
        ]),
    );
    let manager = blog(&remote);

    let user = manager.repository("User").unwrap().find_one(7).unwrap().unwrap();
    let posts: EntityCollection = user.get_as("posts").unwrap();
    assert!(posts.is_empty());
    assert_eq!(remote.count("GET /posts"), 0);

    let titles = posts
        .iter_all()
        .map(|post| post.and_then(|p| p.get_as::<String>("title")))
        .collect::<restmap::Result<Vec<_>>>()
        .unwrap();
    assert_eq!(titles, vec!["First".to_string(), "Second".to_string()]);

    // No page size is known, so a second page is probed.
    assert_eq!(remote.count("GET /posts"), 1);
    assert_eq!(remote.count("GET /posts?page=2"), 1);
    let call = remote
        .calls()
        .into_iter()
        .find(|call| call.key() == "GET /posts")
        .unwrap();
    assert_eq!(call.filter.get("author"), Some(&json!(7)));

    let author: Entity = posts.get(0).unwrap().get_as("author").unwrap();
    assert!(author.ptr_eq(&user));
}

#[test]
fn test_inverse_collection_is_never_written() {
    let remote = MemoryConnection::new();
    remote.respond("GET /users/7", ada());
    let manager = blog(&remote);

    let user = manager.repository("User").unwrap().find_one(7).unwrap().unwrap();
    user.set("posts", EntityCollection::new()).unwrap();
    assert_eq!(manager.persist(&user).unwrap(), PersistOutcome::Unchanged);
}

#[test]
fn test_unsaved_reference_cannot_be_persisted() {
    let remote = MemoryConnection::new();
    let manager = blog(&remote);

    let author = manager.create("User").unwrap();
    let post = manager.create("Post").unwrap();
    post.set("title", "Draft").unwrap();
    post.set("author", &author).unwrap();

    assert!(manager.persist(&post).is_err());
    assert!(remote.calls().is_empty());
}

fn shop(remote: &Rc<MemoryConnection>) -> EntityManager {
    let customer = EntityMapping::builder("Customer")
        .property(PropertySpec::new("id", "integer").identifier().read_only())
        .property(PropertySpec::new("name", "string"))
        .property(PropertySpec::reference("address", "Address").inline())
        .property(PropertySpec::reference("profile", "Profile").inline())
        .path(PathKind::Get, "/customers/{id}")
        .path(PathKind::Patch, "/customers/{id}")
        .build()
        .unwrap();
    let address = EntityMapping::builder("Address")
        .property(PropertySpec::new("street", "string"))
        .property(PropertySpec::new("city", "string"))
        .build()
        .unwrap();
    let profile = EntityMapping::builder("Profile")
        .property(PropertySpec::new("id", "integer").identifier())
        .property(PropertySpec::new("bio", "string"))
        .build()
        .unwrap();
    EntityManager::builder()
        .mapping(customer)
        .mapping(address)
        .mapping(profile)
        .connection("default", Rc::clone(remote) as Rc<dyn Connection>)
        .build()
        .unwrap()
}

fn ann() -> serde_json::Value {
    json!({
        "id": 1,
        "name": "Ann",
        "address": {"street": "Main", "city": "Oslo"},
        "profile": {"id": 5, "bio": "hi"}
    })
}

#[test]
fn test_inline_records_build_full_entities() {
    let remote = MemoryConnection::new();
    remote.respond("GET /customers/1", ann());
    let manager = shop(&remote);
    let customers = manager.repository("Customer").unwrap();
    let customer = customers.find_one(1).unwrap().unwrap();

    let address: Entity = customer.get_as("address").unwrap();
    assert!(address.is_initialized());
    assert_eq!(address.identifier(), None);
    assert_eq!(address.get_as::<String>("street").unwrap(), "Main");
    assert_eq!(address.get_as::<String>("city").unwrap(), "Oslo");

    let profile: Entity = customer.get_as("profile").unwrap();
    assert_eq!(profile.get_as::<String>("bio").unwrap(), "hi");
    let cached = manager.store().get("Profile", &Identifier::Int(5)).unwrap();
    assert!(cached.ptr_eq(&profile));

    customers.find_one(1).unwrap();
    let again: Entity = customer.get_as("profile").unwrap();
    assert!(again.ptr_eq(&profile));
    assert_eq!(remote.keys(), vec!["GET /customers/1", "GET /customers/1"]);
}

#[test]
fn test_inline_edits_are_written_as_nested_records() {
    let remote = MemoryConnection::new();
    remote.respond("GET /customers/1", ann());
    let manager = shop(&remote);
    let customer = manager.repository("Customer").unwrap().find_one(1).unwrap().unwrap();

    assert_eq!(manager.persist(&customer).unwrap(), PersistOutcome::Unchanged);

    let address: Entity = customer.get_as("address").unwrap();
    address.set("city", "Bergen").unwrap();
    let profile: Entity = customer.get_as("profile").unwrap();
    profile.set("bio", "hello").unwrap();

    assert_eq!(
        manager.persist(&customer).unwrap(),
        PersistOutcome::Updated(vec!["address".to_string(), "profile".to_string()])
    );
    let call = remote.last().unwrap();
    assert_eq!(call.key(), "PATCH /customers/1");
    assert_eq!(
        call.data,
        Some(json!({
            "address": {"street": "Main", "city": "Bergen"},
            "profile": {"id": 5, "bio": "hello"}
        }))
    );
    assert_eq!(manager.persist(&customer).unwrap(), PersistOutcome::Unchanged);
}
