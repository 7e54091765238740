//! Ordered, set-like entity collections with optional lazy paging.

use crate::entity::Entity;
use crate::error::Result;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Result-set summary reported by a paginated connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pagination {
    pub expected_total_item_sum: Option<u64>,
    pub expected_page_item_sum: Option<u64>,
    pub expected_current_page: Option<u64>,
}

impl Pagination {
    pub fn is_empty(&self) -> bool {
        self.expected_total_item_sum.is_none()
            && self.expected_page_item_sum.is_none()
            && self.expected_current_page.is_none()
    }
}

/// One fetched page.
pub(crate) struct Page {
    pub entities: Vec<Entity>,
    pub pagination: Pagination,
}

/// Something that can fetch a numbered page of entities (1-based).
pub(crate) trait PageSource {
    fn fetch_page(&self, page: u32) -> Result<Page>;
}

struct Paging {
    source: Rc<dyn PageSource>,
    next_page: u32,
    first_page_len: Option<usize>,
    exhausted: bool,
}

#[derive(Default)]
struct CollectionInner {
    entities: RefCell<Vec<Entity>>,
    pagination: RefCell<Pagination>,
    paging: RefCell<Option<Paging>>,
}

/// Shared handle over an ordered list of distinct entities.
///
/// Cloning shares the underlying list. `len`, `get` and `iter` only see what
/// has been loaded; a collection with a page source fetches more through
/// [`load_next_page`](Self::load_next_page), [`load_all`](Self::load_all) or
/// [`iter_all`](Self::iter_all).
#[derive(Clone, Default)]
pub struct EntityCollection {
    inner: Rc<CollectionInner>,
}

impl EntityCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entities(entities: impl IntoIterator<Item = Entity>) -> Self {
        let collection = Self::new();
        for entity in entities {
            collection.add(entity);
        }
        collection
    }

    /// Collection whose pages are fetched from `source` on demand, starting
    /// at `first_page`.
    pub(crate) fn deferred(source: Rc<dyn PageSource>, first_page: u32) -> Self {
        let collection = Self::new();
        *collection.inner.paging.borrow_mut() = Some(Paging {
            source,
            next_page: first_page,
            first_page_len: None,
            exhausted: false,
        });
        collection
    }

    /// Attaches a page source after page `loaded_page` was already loaded.
    pub(crate) fn attach_source(&self, source: Rc<dyn PageSource>, loaded_page: u32) {
        let loaded = self.len();
        let exhausted = loaded == 0 || self.total_reached();
        *self.inner.paging.borrow_mut() = Some(Paging {
            source,
            next_page: loaded_page + 1,
            first_page_len: Some(loaded),
            exhausted,
        });
    }

    /// Adds an entity unless this exact instance is already present.
    /// Returns whether it was added.
    pub fn add(&self, entity: Entity) -> bool {
        let mut entities = self.inner.entities.borrow_mut();
        if entities.iter().any(|e| e.ptr_eq(&entity)) {
            return false;
        }
        entities.push(entity);
        true
    }

    pub fn contains(&self, entity: &Entity) -> bool {
        self.inner.entities.borrow().iter().any(|e| e.ptr_eq(entity))
    }

    pub fn len(&self) -> usize {
        self.inner.entities.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<Entity> {
        self.inner.entities.borrow().get(index).cloned()
    }

    /// Snapshot iterator over the loaded entities.
    pub fn iter(&self) -> std::vec::IntoIter<Entity> {
        self.to_vec().into_iter()
    }

    pub fn to_vec(&self) -> Vec<Entity> {
        self.inner.entities.borrow().clone()
    }

    pub fn pagination(&self) -> Pagination {
        *self.inner.pagination.borrow()
    }

    pub(crate) fn set_pagination(&self, pagination: Pagination) {
        *self.inner.pagination.borrow_mut() = pagination;
    }

    pub fn ptr_eq(&self, other: &EntityCollection) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Whether further pages may still be fetched.
    pub fn has_more(&self) -> bool {
        self.inner
            .paging
            .borrow()
            .as_ref()
            .is_some_and(|paging| !paging.exhausted)
    }

    fn total_reached(&self) -> bool {
        self.pagination()
            .expected_total_item_sum
            .is_some_and(|total| self.len() as u64 >= total)
    }

    /// Fetches the next page into this collection. Returns how many new
    /// entities it contributed; zero once exhausted.
    pub fn load_next_page(&self) -> Result<usize> {
        let (source, page) = match self.inner.paging.borrow().as_ref() {
            Some(paging) if !paging.exhausted => (paging.source.clone(), paging.next_page),
            _ => return Ok(0),
        };

        let fetched = source.fetch_page(page)?;
        let fetched_len = fetched.entities.len();
        if !fetched.pagination.is_empty() {
            self.set_pagination(fetched.pagination);
        }

        let mut added = 0;
        for entity in fetched.entities {
            if self.add(entity) {
                added += 1;
            }
        }

        let total_reached = self.total_reached();
        let page_size_hint = fetched
            .pagination
            .expected_page_item_sum
            .map(|n| n as usize);

        let mut paging = self.inner.paging.borrow_mut();
        if let Some(paging) = paging.as_mut() {
            let full_page = *paging.first_page_len.get_or_insert(fetched_len);
            let short_page = fetched_len < page_size_hint.unwrap_or(full_page);
            paging.next_page = page + 1;
            paging.exhausted = fetched_len == 0 || added == 0 || short_page || total_reached;
        }

        tracing::debug!(page, fetched = fetched_len, added, "loaded collection page");
        Ok(added)
    }

    /// Fetches every remaining page.
    pub fn load_all(&self) -> Result<()> {
        while self.has_more() {
            self.load_next_page()?;
        }
        Ok(())
    }

    /// Iterates every entity, fetching further pages as the loaded ones run
    /// out.
    pub fn iter_all(&self) -> IterAll {
        IterAll {
            collection: self.clone(),
            position: 0,
        }
    }
}

impl fmt::Debug for EntityCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityCollection")
            .field("entities", &*self.inner.entities.borrow())
            .field("pagination", &self.pagination())
            .field("has_more", &self.has_more())
            .finish()
    }
}

impl PartialEq for EntityCollection {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl FromIterator<Entity> for EntityCollection {
    fn from_iter<T: IntoIterator<Item = Entity>>(iter: T) -> Self {
        Self::from_entities(iter)
    }
}

/// Fallible iterator returned by [`EntityCollection::iter_all`].
pub struct IterAll {
    collection: EntityCollection,
    position: usize,
}

impl Iterator for IterAll {
    type Item = Result<Entity>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entity) = self.collection.get(self.position) {
                self.position += 1;
                return Some(Ok(entity));
            }
            if !self.collection.has_more() {
                return None;
            }
            if let Err(e) = self.collection.load_next_page() {
                return Some(Err(e));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{EntityMapping, PropertySpec};
    use std::cell::Cell;

    fn mapping() -> Rc<EntityMapping> {
        Rc::new(
            EntityMapping::builder("Tag")
                .property(PropertySpec::new("id", "integer").identifier())
                .build()
                .unwrap(),
        )
    }

    struct Pages {
        pages: Vec<Vec<Entity>>,
        total: Option<u64>,
        calls: Cell<u32>,
    }

    impl PageSource for Pages {
        fn fetch_page(&self, page: u32) -> Result<Page> {
            self.calls.set(self.calls.get() + 1);
            let entities = self
                .pages
                .get(page as usize - 1)
                .cloned()
                .unwrap_or_default();
            Ok(Page {
                entities,
                pagination: Pagination {
                    expected_total_item_sum: self.total,
                    expected_page_item_sum: None,
                    expected_current_page: Some(page.into()),
                },
            })
        }
    }

    fn entities(n: usize) -> Vec<Entity> {
        let mapping = mapping();
        (0..n).map(|_| Entity::new(mapping.clone())).collect()
    }

    #[test]
    fn test_add_is_set_like() {
        let tag = Entity::new(mapping());
        let collection = EntityCollection::new();
        assert!(collection.add(tag.clone()));
        assert!(!collection.add(tag.clone()));
        assert!(collection.add(Entity::new(mapping())));
        assert_eq!(collection.len(), 2);
        assert!(collection.contains(&tag));
        assert_eq!(collection.get(0), Some(tag));
        assert!(!collection.has_more());
    }

    #[test]
    fn test_clones_share_entities() {
        let collection = EntityCollection::new();
        let alias = collection.clone();
        alias.add(Entity::new(mapping()));
        assert_eq!(collection.len(), 1);
        assert_eq!(collection, alias);
        assert_ne!(collection, EntityCollection::new());
    }

    #[test]
    fn test_deferred_loads_until_short_page() {
        let all = entities(5);
        let source = Rc::new(Pages {
            pages: vec![all[0..2].to_vec(), all[2..4].to_vec(), all[4..].to_vec()],
            total: None,
            calls: Cell::new(0),
        });
        let collection = EntityCollection::deferred(source.clone(), 1);

        assert!(collection.is_empty());
        assert_eq!(source.calls.get(), 0);

        let loaded: Vec<Entity> = collection.iter_all().collect::<Result<_>>().unwrap();
        assert_eq!(loaded, all);
        assert_eq!(source.calls.get(), 3);
        assert!(!collection.has_more());
    }

    #[test]
    fn test_stops_when_total_reached() {
        let all = entities(4);
        let source = Rc::new(Pages {
            pages: vec![all[0..2].to_vec(), all[2..4].to_vec(), entities(2)],
            total: Some(4),
            calls: Cell::new(0),
        });
        let collection = EntityCollection::from_entities(all[0..2].to_vec());
        collection.set_pagination(Pagination {
            expected_total_item_sum: Some(4),
            ..Default::default()
        });
        collection.attach_source(source.clone(), 1);

        collection.load_all().unwrap();
        assert_eq!(collection.len(), 4);
        assert_eq!(source.calls.get(), 1);
        assert_eq!(collection.pagination().expected_current_page, Some(2));
    }

    #[test]
    fn test_stops_when_page_repeats() {
        let all = entities(2);
        let source = Rc::new(Pages {
            pages: vec![all.clone(), all.clone(), all.clone()],
            total: None,
            calls: Cell::new(0),
        });
        let collection = EntityCollection::from_entities(all);
        collection.attach_source(source.clone(), 1);

        assert_eq!(collection.load_next_page().unwrap(), 0);
        assert!(!collection.has_more());
        assert_eq!(collection.load_next_page().unwrap(), 0);
        assert_eq!(source.calls.get(), 1);
    }
}
