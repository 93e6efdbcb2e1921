use crate::models::{EntityInfo, EntityKey, ItemRecord, PropertyRecord, TypeRef};
use crate::source::{drive, DumpSource, RecordHandler};
use anyhow::Result;
use dashmap::DashMap;
use rustc_hash::FxBuildHasher;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

pub(crate) type LabelMap = DashMap<EntityKey, EntityInfo, FxBuildHasher>;

/// Entity id -> label, first alias and description in one language.
///
/// Filled once by [`LabelCache::build`] and only read afterwards. Keys are packed
/// [`EntityKey`]s and values boxed strings, so a full dump fits in memory.
pub struct LabelCache {
    entries: LabelMap,
}

impl Default for LabelCache {
    fn default() -> Self {
        Self::new()
    }
}

impl LabelCache {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: DashMap::with_capacity_and_hasher(capacity, FxBuildHasher),
        }
    }

    pub(crate) fn from_map(entries: LabelMap) -> Self {
        Self { entries }
    }

    pub(crate) fn map(&self) -> &LabelMap {
        &self.entries
    }

    /// Pass 1: scans the whole dump and caches every item and property.
    pub fn build<S: DumpSource + ?Sized>(source: &S, language: &str) -> Result<Self> {
        let builder = LabelCacheBuilder {
            cache: LabelCache::new(),
            language,
            items: AtomicU64::new(0),
            properties: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        };

        info!(language, "Building label cache");
        let scan = drive(source, &builder, "labels")?;

        info!(
            items = builder.items.load(Ordering::Relaxed),
            properties = builder.properties.load(Ordering::Relaxed),
            rejected = builder.rejected.load(Ordering::Relaxed),
            malformed = scan.malformed,
            entries = builder.cache.len(),
            "Label cache built"
        );
        Ok(builder.cache)
    }

    /// Returns `false` if the id does not pack into an [`EntityKey`].
    pub fn insert(&self, id: &str, info: EntityInfo) -> bool {
        match EntityKey::parse(id) {
            Some(key) => {
                self.entries.insert(key, info);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &str) -> Option<EntityInfo> {
        let key = EntityKey::parse(id)?;
        self.entries.get(&key).map(|entry| entry.value().clone())
    }

    /// Cached terms, or empty strings when the id is unknown.
    pub fn info_or_empty(&self, id: &str) -> EntityInfo {
        self.get(id).unwrap_or_default()
    }

    /// Resolves a relation target into its denormalized form; `None` on a cache miss.
    pub fn resolve(&self, id: &str) -> Option<TypeRef> {
        let key = EntityKey::parse(id)?;
        let entry = self.entries.get(&key)?;
        Some(TypeRef::new(id, Some(entry.value())))
    }

    /// Like [`LabelCache::resolve`], with empty terms for unknown ids.
    pub fn type_ref(&self, id: &str) -> TypeRef {
        self.resolve(id).unwrap_or_else(|| TypeRef::new(id, None))
    }

    pub fn contains(&self, id: &str) -> bool {
        EntityKey::parse(id).is_some_and(|key| self.entries.contains_key(&key))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

struct LabelCacheBuilder<'a> {
    cache: LabelCache,
    language: &'a str,
    items: AtomicU64,
    properties: AtomicU64,
    rejected: AtomicU64,
}

impl LabelCacheBuilder<'_> {
    fn store(&self, id: &str, info: EntityInfo) {
        if !self.cache.insert(id, info) {
            debug!(id, "Id does not pack into a cache key, not cached");
            self.rejected.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl RecordHandler for LabelCacheBuilder<'_> {
    fn item(&self, item: &ItemRecord) {
        let terms = &item.terms;
        let info = EntityInfo::new(
            terms.label(self.language).unwrap_or(""),
            terms.first_alias(self.language).unwrap_or(""),
            terms.description(self.language).unwrap_or(""),
        );
        self.store(&item.id, info);
        self.items.fetch_add(1, Ordering::Relaxed);
    }

    fn property(&self, property: &PropertyRecord) {
        let info = EntityInfo::new(property.terms.label(self.language).unwrap_or(""), "", "");
        self.store(&property.id, info);
        self.properties.fetch_add(1, Ordering::Relaxed);
    }
}
