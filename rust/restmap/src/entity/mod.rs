//! Entity handles.
//!
//! An [`Entity`] is a shared, reference-counted handle: cloning it never
//! copies the entity, and two handles are equal only when they point at the
//! same instance. That is what lets the identity map hand the same object to
//! every code path that discovers a given identity.
//!
//! Application code reads and writes through [`Entity::get`] and
//! [`Entity::set`], which initialize lazy references first and honor
//! read-only declarations. The mapping layer goes through
//! [`EntityMetadata`], which does neither.

pub mod metadata;
pub mod proxy;

pub use metadata::EntityMetadata;
pub use proxy::{Proxy, Resolver};

use crate::error::{RestmapError, Result};
use crate::mapping::EntityMapping;
use crate::value::{ConversionError, Identifier, PropertyValue};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

enum Hydration {
    Ready,
    Deferred(Rc<dyn Resolver>),
    Resolving,
}

struct EntityInner {
    mapping: Rc<EntityMapping>,
    fields: RefCell<HashMap<String, PropertyValue>>,
    hydration: RefCell<Hydration>,
}

#[derive(Clone)]
pub struct Entity {
    inner: Rc<EntityInner>,
}

impl Entity {
    pub(crate) fn new(mapping: Rc<EntityMapping>) -> Self {
        Self::with_hydration(mapping, Hydration::Ready)
    }

    /// A stand-in whose state is populated by `resolver` on first access.
    pub(crate) fn deferred(mapping: Rc<EntityMapping>, resolver: Rc<dyn Resolver>) -> Self {
        Self::with_hydration(mapping, Hydration::Deferred(resolver))
    }

    fn with_hydration(mapping: Rc<EntityMapping>, hydration: Hydration) -> Self {
        Self {
            inner: Rc::new(EntityInner {
                mapping,
                fields: RefCell::new(HashMap::new()),
                hydration: RefCell::new(hydration),
            }),
        }
    }

    pub fn entity_type(&self) -> &str {
        self.inner.mapping.entity_type()
    }

    pub fn mapping(&self) -> &Rc<EntityMapping> {
        &self.inner.mapping
    }

    pub fn metadata(&self) -> EntityMetadata {
        EntityMetadata::new(self.clone())
    }

    /// Current identifier value. Never triggers lazy initialization.
    pub fn identifier(&self) -> Option<Identifier> {
        let id = self.inner.mapping.identifier()?;
        let fields = self.inner.fields.try_borrow().ok()?;
        fields
            .get(&id.name)
            .and_then(|value| Identifier::try_from(value).ok())
    }

    /// False while this is an unresolved lazy reference.
    pub fn is_initialized(&self) -> bool {
        !matches!(*self.inner.hydration.borrow(), Hydration::Deferred(_))
    }

    pub fn ptr_eq(&self, other: &Entity) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Resolves a lazy reference. Runs the resolver at most once, even when
    /// it fails; re-entrant calls during resolution are no-ops.
    pub fn initialize(&self) -> Result<()> {
        let resolver = {
            let mut hydration = self.inner.hydration.borrow_mut();
            match std::mem::replace(&mut *hydration, Hydration::Resolving) {
                Hydration::Deferred(resolver) => resolver,
                other => {
                    *hydration = other;
                    return Ok(());
                }
            }
        };

        let outcome = resolver.resolve(self);
        *self.inner.hydration.borrow_mut() = Hydration::Ready;
        outcome
    }

    pub fn get(&self, property: &str) -> Result<PropertyValue> {
        self.require_property(property)?;
        self.initialize()?;
        Ok(self.read_field(property))
    }

    /// Reads a property and converts it to a concrete type.
    pub fn get_as<T>(&self, property: &str) -> Result<T>
    where
        T: TryFrom<PropertyValue, Error = ConversionError>,
    {
        T::try_from(self.get(property)?)
            .map_err(|e| RestmapError::invalid_value(property, e.to_string()))
    }

    pub fn set(&self, property: &str, value: impl Into<PropertyValue>) -> Result<()> {
        let spec = self.require_property(property)?;
        if spec.read_only {
            return Err(RestmapError::ReadOnlyProperty {
                entity_type: self.entity_type().to_string(),
                property: property.to_string(),
            });
        }
        self.initialize()?;
        self.write_field(property, value.into());
        Ok(())
    }

    fn require_property(&self, property: &str) -> Result<&crate::mapping::PropertySpec> {
        self.inner
            .mapping
            .property(property)
            .ok_or_else(|| RestmapError::UnknownProperty {
                entity_type: self.entity_type().to_string(),
                property: property.to_string(),
            })
    }

    pub(crate) fn read_field(&self, name: &str) -> PropertyValue {
        self.inner
            .fields
            .borrow()
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn has_field(&self, name: &str) -> bool {
        self.inner.fields.borrow().contains_key(name)
    }

    pub(crate) fn write_field(&self, name: &str, value: PropertyValue) {
        self.inner
            .fields
            .borrow_mut()
            .insert(name.to_string(), value);
    }

    /// Marks a lazy reference as populated without running its resolver.
    pub(crate) fn mark_initialized(&self) {
        let mut hydration = self.inner.hydration.borrow_mut();
        if matches!(*hydration, Hydration::Deferred(_)) {
            *hydration = Hydration::Ready;
        }
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("type", &self.entity_type())
            .field("identifier", &self.identifier())
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::PropertySpec;
    use std::cell::Cell;

    fn mapping() -> Rc<EntityMapping> {
        Rc::new(
            EntityMapping::builder("User")
                .property(PropertySpec::new("id", "integer").identifier().read_only())
                .property(PropertySpec::new("name", "string"))
                .build()
                .unwrap(),
        )
    }

    struct CountingResolver {
        calls: Rc<Cell<u32>>,
        fail: bool,
    }

    impl Resolver for CountingResolver {
        fn resolve(&self, entity: &Entity) -> Result<()> {
            self.calls.set(self.calls.get() + 1);
            // re-entrant access must not resolve again
            let _ = entity.get("name")?;
            if self.fail {
                return Err(RestmapError::ConnectionFailed("offline".to_string()));
            }
            entity.write_field("name", "Ada".into());
            Ok(())
        }
    }

    #[test]
    fn test_get_set_and_read_only() {
        let user = Entity::new(mapping());
        user.set("name", "Grace").unwrap();
        assert_eq!(user.get_as::<String>("name").unwrap(), "Grace");

        assert!(matches!(
            user.set("id", 4),
            Err(RestmapError::ReadOnlyProperty { .. })
        ));
        assert!(matches!(
            user.get("email"),
            Err(RestmapError::UnknownProperty { .. })
        ));
        assert_eq!(user.get("id").unwrap(), PropertyValue::Null);
    }

    #[test]
    fn test_identity_equality() {
        let a = Entity::new(mapping());
        let b = Entity::new(mapping());
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[test]
    fn test_deferred_resolves_once() {
        let calls = Rc::new(Cell::new(0));
        let user = Entity::deferred(
            mapping(),
            Rc::new(CountingResolver {
                calls: calls.clone(),
                fail: false,
            }),
        );
        user.write_field("id", PropertyValue::Int(3));

        assert!(!user.is_initialized());
        assert_eq!(user.identifier(), Some(Identifier::Int(3)));
        assert_eq!(calls.get(), 0);

        assert_eq!(user.get_as::<String>("name").unwrap(), "Ada");
        assert_eq!(user.get_as::<String>("name").unwrap(), "Ada");
        assert!(user.is_initialized());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_failed_resolution_is_not_retried() {
        let calls = Rc::new(Cell::new(0));
        let user = Entity::deferred(
            mapping(),
            Rc::new(CountingResolver {
                calls: calls.clone(),
                fail: true,
            }),
        );

        assert!(user.get("name").is_err());
        assert_eq!(user.get("name").unwrap(), PropertyValue::Null);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_mark_initialized_skips_resolver() {
        let calls = Rc::new(Cell::new(0));
        let user = Entity::deferred(
            mapping(),
            Rc::new(CountingResolver {
                calls: calls.clone(),
                fail: false,
            }),
        );
        user.mark_initialized();
        assert_eq!(user.get("name").unwrap(), PropertyValue::Null);
        assert_eq!(calls.get(), 0);
    }
}
