mod common;

use common::{blog, record, MemoryConnection};
use restmap::{
    Entity, Identifier, PreBuildEvent, PropertyValue, RestmapError, FIND_EXISTING_ENTITY,
};
use serde_json::json;

fn ada() -> serde_json::Value {
    json!({"id": 7, "name": "Ada", "email_address": "ada@example.com", "age": 36})
}

#[test]
fn test_same_identity_same_instance() {
    let remote = MemoryConnection::new();
    remote.respond("GET /users/7", ada());
    remote.respond("GET /users", json!([ada(), {"id": 8, "name": "Bob", "email_address": null, "age": 20}]));
    let manager = blog(&remote);
    let users = manager.repository("User").unwrap();

    let first = users.find_one(7).unwrap().unwrap();
    let second = users.find_one(7).unwrap().unwrap();
    assert!(first.ptr_eq(&second));

    let all = users.find_all().unwrap();
    assert_eq!(all.len(), 2);
    assert!(all.contains(&first));
    assert_eq!(manager.store().len(), 2);
    assert_eq!(remote.count("GET /users/7"), 2);
}

#[test]
fn test_string_identifier_is_canonicalized() {
    let remote = MemoryConnection::new();
    remote.respond("GET /users/7", ada());
    remote.respond(
        "GET /users",
        json!([{"id": "7", "name": "Ada", "email_address": "ada@example.com", "age": 36}]),
    );
    let manager = blog(&remote);
    let users = manager.repository("User").unwrap();

    let by_id = users.find_one(7).unwrap().unwrap();
    let listed = users.find_all().unwrap().get(0).unwrap();
    assert!(by_id.ptr_eq(&listed));
    assert_eq!(by_id.identifier(), Some(Identifier::Int(7)));
}

#[test]
fn test_refetch_keeps_pending_changes() {
    let remote = MemoryConnection::new();
    remote.respond("GET /users/7", ada());
    let manager = blog(&remote);
    let users = manager.repository("User").unwrap();

    let user = users.find_one(7).unwrap().unwrap();
    user.set("name", "Grace").unwrap();

    // Someone else changed the age meanwhile.
    remote.respond(
        "GET /users/7",
        json!({"id": 7, "name": "Ada", "email_address": "ada@example.com", "age": 37}),
    );
    let again = users.find_one(7).unwrap().unwrap();

    assert!(again.ptr_eq(&user));
    assert_eq!(user.get_as::<String>("name").unwrap(), "Grace");
    assert_eq!(user.get_as::<i64>("age").unwrap(), 37);
}

#[test]
fn test_refetch_overwrites_untouched_fields() {
    let remote = MemoryConnection::new();
    remote.respond("GET /users/7", ada());
    let manager = blog(&remote);
    let users = manager.repository("User").unwrap();

    let user = users.find_one(7).unwrap().unwrap();
    remote.respond(
        "GET /users/7",
        json!({"id": 7, "name": "Ada L.", "email_address": "ada@example.com", "age": 36}),
    );
    users.find_one(7).unwrap();

    assert_eq!(user.get_as::<String>("name").unwrap(), "Ada L.");
}

#[test]
fn test_strict_build_requires_every_field() {
    let remote = MemoryConnection::new();
    remote.respond("GET /users/8", json!({"id": 8, "name": "Bob"}));
    let manager = blog(&remote);

    let err = manager
        .repository("User")
        .unwrap()
        .find_one(8)
        .unwrap_err();
    assert!(matches!(
        err,
        RestmapError::MissingProperty { ref field, .. } if field == "email_address"
    ));
}

#[test]
fn test_absent_resource_is_none() {
    let remote = MemoryConnection::new();
    let manager = blog(&remote);
    let users = manager.repository("User").unwrap();

    assert!(users.find_one(404).unwrap().is_none());
    assert!(users.find_all().unwrap().is_empty());
}

#[test]
fn test_detach_and_clear() {
    let remote = MemoryConnection::new();
    remote.respond("GET /users/7", ada());
    let manager = blog(&remote);
    let users = manager.repository("User").unwrap();

    let user = users.find_one(7).unwrap().unwrap();
    manager.detach(&user);
    assert!(manager.store().get("User", &Identifier::Int(7)).is_none());

    let fresh = users.find_one(7).unwrap().unwrap();
    assert!(!fresh.ptr_eq(&user));

    manager.clear();
    assert!(manager.store().is_empty());
}

#[test]
fn test_entity_surface_checks() {
    let remote = MemoryConnection::new();
    let manager = blog(&remote);
    let user: Entity = manager.create("User").unwrap();

    assert!(matches!(
        user.set("id", 3),
        Err(RestmapError::ReadOnlyProperty { .. })
    ));
    assert!(matches!(
        user.get("nickname"),
        Err(RestmapError::UnknownProperty { .. })
    ));
    assert_eq!(user.get("name").unwrap(), PropertyValue::Null);
    assert!(remote.calls().is_empty());
}

#[test]
fn test_second_instance_for_known_identity_is_rejected() {
    let remote = MemoryConnection::new();
    remote.respond("GET /users/7", ada());
    let manager = blog(&remote);
    let original = manager.repository("User").unwrap().find_one(7).unwrap().unwrap();

    let impostor = manager.create("User").unwrap();
    let supplied = impostor.clone();
    manager
        .dispatcher()
        .pre_build()
        .insert_before(FIND_EXISTING_ENTITY, "swap", move |event: &mut PreBuildEvent| {
            event.set_entity(supplied.clone());
            Ok(())
        })
        .unwrap();

    let err = manager
        .entity_builder()
        .build_entity("User", record(ada()), false)
        .unwrap_err();
    assert!(matches!(
        err,
        RestmapError::IdentityConflict { ref entity_type, ref identifier }
            if entity_type == "User" && identifier == "7"
    ));

    let cached = manager.store().get("User", &Identifier::Int(7)).unwrap();
    assert!(cached.ptr_eq(&original));
    assert!(!manager.store().contains(&impostor));
}
