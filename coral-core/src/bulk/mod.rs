//! Session-scoped entity cache and dependency-ordered batch writer.
//!
//! A [`BulkInsertContext`] is owned by one indexing session. Entities are
//! resolved through [`BulkInsertContext::get_or_add`], which consults the
//! session cache, then storage (once per distinct key), and finally accepts
//! the caller's candidate as a new row. Many-to-many links between resolved
//! entities are collected with [`BulkInsertContext::register_relationship`].
//! Nothing is written until [`BulkInsertContext::save_changes`], which inserts
//! new entities type by type in foreign-key order and then writes the links.

mod entity;
mod order;
mod schema;
mod store;
mod value;

use std::any::Any;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

pub use entity::{BulkEntity, EntityKey, KeySelector};
pub use order::dependency_order;
pub use schema::{
    Column, ColumnType, EntityKind, ForeignKey, JunctionSchema, SchemaRegistry, TableSchema,
};
pub use store::EntityStore;
pub use value::{Row, RowReader, Value};

use crate::error::{CoralError, Result};

/// Batch sizes for [`BulkInsertContext::save_changes`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkInsertOptions {
    /// Entity rows per insert transaction.
    pub entity_batch_size: usize,
    /// Link rows per insert transaction.
    pub relationship_batch_size: usize,
}

impl Default for BulkInsertOptions {
    fn default() -> Self {
        Self {
            entity_batch_size: 10_000,
            relationship_batch_size: 50_000,
        }
    }
}

/// Counts and timings for one [`BulkInsertContext::save_changes`] call.
#[derive(Clone, Debug, Default)]
pub struct BulkInsertStats {
    /// New rows written per entity type.
    pub entities_inserted: BTreeMap<EntityKind, usize>,
    /// Link rows written per [`JunctionSchema::label`].
    pub relationships_inserted: BTreeMap<String, u64>,
    pub entity_insertion_time: Duration,
    pub relationship_insertion_time: Duration,
    pub total_time: Duration,
}

impl BulkInsertStats {
    /// Entity rows written across all types.
    pub fn total_entities(&self) -> usize {
        self.entities_inserted.values().sum()
    }

    /// Link rows written across all junctions.
    pub fn total_relationships(&self) -> u64 {
        self.relationships_inserted.values().sum()
    }
}

struct CacheEntry<T> {
    entity: T,
    is_new: bool,
}

struct EntityCache<T> {
    by_key: HashMap<EntityKey, Uuid>,
    entries: HashMap<Uuid, CacheEntry<T>>,
    order: Vec<Uuid>,
}

impl<T> Default for EntityCache<T> {
    fn default() -> Self {
        Self {
            by_key: HashMap::new(),
            entries: HashMap::new(),
            order: Vec::new(),
        }
    }
}

impl<T: BulkEntity> EntityCache<T> {
    fn lookup(&self, key: &EntityKey) -> Option<&T> {
        let id = self.by_key.get(key)?;
        self.entries.get(id).map(|entry| &entry.entity)
    }

    fn insert(&mut self, key: EntityKey, entity: T, is_new: bool) -> T {
        let id = entity.id();
        self.by_key.insert(key, id);
        if let Some(existing) = self.entries.get(&id) {
            return existing.entity.clone();
        }
        self.order.push(id);
        self.entries.insert(
            id,
            CacheEntry {
                entity: entity.clone(),
                is_new,
            },
        );
        entity
    }

    fn remove(&mut self, id: Uuid) -> bool {
        if self.entries.remove(&id).is_none() {
            return false;
        }
        self.by_key.retain(|_, cached| *cached != id);
        self.order.retain(|cached| *cached != id);
        true
    }
}

/// Type-erased view of an [`EntityCache`] used by the flush path.
trait ErasedCache: Send + Sync {
    fn pending(&self) -> Vec<(Uuid, Row)>;
    fn pending_count(&self) -> usize;
    fn len(&self) -> usize;
    fn contains(&self, id: Uuid) -> bool;
    fn mark_existing(&mut self, ids: &[Uuid]);
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: BulkEntity> ErasedCache for EntityCache<T> {
    fn pending(&self) -> Vec<(Uuid, Row)> {
        self.order
            .iter()
            .filter_map(|id| self.entries.get(id))
            .filter(|entry| entry.is_new)
            .map(|entry| (entry.entity.id(), entry.entity.to_row()))
            .collect()
    }

    fn pending_count(&self) -> usize {
        self.entries.values().filter(|entry| entry.is_new).count()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn contains(&self, id: Uuid) -> bool {
        self.entries.contains_key(&id)
    }

    fn mark_existing(&mut self, ids: &[Uuid]) {
        for id in ids {
            if let Some(entry) = self.entries.get_mut(id) {
                entry.is_new = false;
            }
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Per-session entity cache plus pending many-to-many links.
///
/// One indexing session owns one context for the duration of a scan job.
pub struct BulkInsertContext {
    store: Arc<dyn EntityStore>,
    schema: Arc<SchemaRegistry>,
    options: BulkInsertOptions,
    caches: BTreeMap<EntityKind, Box<dyn ErasedCache>>,
    relationships: HashMap<JunctionSchema, HashSet<(Uuid, Uuid)>>,
    junctions: HashMap<(EntityKind, EntityKind), (JunctionSchema, bool)>,
}

impl fmt::Debug for BulkInsertContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cached: BTreeMap<String, usize> = self
            .caches
            .iter()
            .map(|(kind, cache)| (kind.to_string(), cache.len()))
            .collect();
        f.debug_struct("BulkInsertContext")
            .field("options", &self.options)
            .field("cached", &cached)
            .field("pending_relationships", &self.pending_relationships())
            .finish()
    }
}

impl BulkInsertContext {
    /// Empty session writing to `store`.
    pub fn new(
        store: Arc<dyn EntityStore>,
        schema: Arc<SchemaRegistry>,
        options: BulkInsertOptions,
    ) -> Self {
        Self {
            store,
            schema,
            options,
            caches: BTreeMap::new(),
            relationships: HashMap::new(),
            junctions: HashMap::new(),
        }
    }

    /// Resolve an entity by key.
    ///
    /// The factory always runs because the key is extracted from the
    /// candidate it builds; on a hit the candidate is dropped. Storage is
    /// queried at most once per distinct key within this session.
    pub async fn get_or_add<T, F>(&mut self, selector: &KeySelector<T>, factory: F) -> Result<T>
    where
        T: BulkEntity,
        F: FnOnce() -> T,
    {
        let candidate = factory();
        let key = selector.key(&candidate);

        if let Some(cached) = self.cache::<T>().and_then(|cache| cache.lookup(&key)) {
            return Ok(cached.clone());
        }

        let table = *self.schema.table(T::KIND)?;
        let stored = self
            .store
            .find_one(&table, &selector.predicate(&key))
            .await?;

        let resolved = match stored {
            Some(row) => {
                let existing = T::from_row(&row)?;
                self.cache_mut::<T>()?.insert(key, existing, false)
            }
            None => self.cache_mut::<T>()?.insert(key, candidate, true),
        };

        Ok(resolved)
    }

    /// Record a link between two entities previously resolved through
    /// [`get_or_add`](Self::get_or_add). Registering the same pair twice is a
    /// no-op.
    pub fn register_relationship<L, R>(&mut self, left: &L, right: &R) -> Result<()>
    where
        L: BulkEntity,
        R: BulkEntity,
    {
        if !self.is_registered(L::KIND, left.id()) {
            return Err(CoralError::UnregisteredEntity(L::KIND));
        }
        if !self.is_registered(R::KIND, right.id()) {
            return Err(CoralError::UnregisteredEntity(R::KIND));
        }

        let (junction, swapped) = self.resolve_junction(L::KIND, R::KIND)?;
        let pair = if swapped {
            (right.id(), left.id())
        } else {
            (left.id(), right.id())
        };

        self.relationships.entry(junction).or_default().insert(pair);
        Ok(())
    }

    /// Whether `entity` is cached and has not been written yet.
    pub fn is_new<T: BulkEntity>(&self, entity: &T) -> bool {
        self.cache::<T>()
            .and_then(|cache| cache.entries.get(&entity.id()))
            .is_some_and(|entry| entry.is_new)
    }

    /// Drop a cached entity and any pending links that reference it.
    pub fn forget<T: BulkEntity>(&mut self, entity: &T) -> bool {
        let id = entity.id();
        let removed = self
            .cache_mut::<T>()
            .map(|cache| cache.remove(id))
            .unwrap_or(false);

        if removed {
            for (junction, pairs) in self.relationships.iter_mut() {
                if junction.left == T::KIND {
                    pairs.retain(|(left, _)| *left != id);
                }
                if junction.right == T::KIND {
                    pairs.retain(|(_, right)| *right != id);
                }
            }
        }

        removed
    }

    /// New entities waiting for [`Self::save_changes`].
    pub fn pending_entities(&self) -> usize {
        self.caches.values().map(|cache| cache.pending_count()).sum()
    }

    /// Links waiting for [`Self::save_changes`].
    pub fn pending_relationships(&self) -> usize {
        self.relationships.values().map(HashSet::len).sum()
    }

    /// Write every new entity in dependency order, then every pending link.
    ///
    /// Each batch commits on its own; a failing batch aborts the call but
    /// leaves earlier batches in place and marks their rows as existing.
    pub async fn save_changes(&mut self) -> Result<BulkInsertStats> {
        let started = Instant::now();
        let mut stats = BulkInsertStats::default();

        let kinds: Vec<EntityKind> = self.caches.keys().copied().collect();
        let order = dependency_order(&kinds, &self.schema)?;

        let entity_started = Instant::now();
        for kind in order {
            let pending = match self.caches.get(&kind) {
                Some(cache) => cache.pending(),
                None => continue,
            };
            if pending.is_empty() {
                continue;
            }

            let table = *self.schema.table(kind)?;
            let batch_size = self.options.entity_batch_size.max(1);
            let mut inserted = 0usize;

            for batch in pending.chunks(batch_size) {
                let rows: Vec<Row> = batch.iter().map(|(_, row)| row.clone()).collect();
                self.store.insert_batch(&table, &rows).await?;

                let ids: Vec<Uuid> = batch.iter().map(|(id, _)| *id).collect();
                if let Some(cache) = self.caches.get_mut(&kind) {
                    cache.mark_existing(&ids);
                }
                inserted += rows.len();
            }

            debug!(entity = %kind, rows = inserted, "inserted new entities");
            stats.entities_inserted.insert(kind, inserted);
        }
        stats.entity_insertion_time = entity_started.elapsed();

        let relationship_started = Instant::now();
        let mut junctions: Vec<JunctionSchema> = self.relationships.keys().copied().collect();
        junctions.sort_by_key(|junction| junction.table);

        for junction in junctions {
            let mut pairs: Vec<(Uuid, Uuid)> = self
                .relationships
                .get(&junction)
                .map(|pairs| pairs.iter().copied().collect())
                .unwrap_or_default();
            if pairs.is_empty() {
                self.relationships.remove(&junction);
                continue;
            }
            pairs.sort_unstable();

            let batch_size = self.options.relationship_batch_size.max(1);
            let mut written = 0u64;
            for batch in pairs.chunks(batch_size) {
                written += self.store.insert_links(&junction, batch).await?;
            }

            debug!(relationship = %junction.label(), rows = written, "inserted links");
            self.relationships.remove(&junction);
            *stats
                .relationships_inserted
                .entry(junction.label())
                .or_default() += written;
        }
        stats.relationship_insertion_time = relationship_started.elapsed();
        stats.total_time = started.elapsed();

        if stats.total_entities() > 0 || stats.total_relationships() > 0 {
            info!(
                entities = stats.total_entities(),
                relationships = stats.total_relationships(),
                elapsed_ms = stats.total_time.as_millis() as u64,
                "bulk insert flushed"
            );
        }

        Ok(stats)
    }

    /// Drop every cache and pending link without writing anything.
    pub fn clear(&mut self) {
        self.caches.clear();
        self.relationships.clear();
        self.junctions.clear();
    }

    fn is_registered(&self, kind: EntityKind, id: Uuid) -> bool {
        self.caches
            .get(&kind)
            .is_some_and(|cache| cache.contains(id))
    }

    fn resolve_junction(
        &mut self,
        left: EntityKind,
        right: EntityKind,
    ) -> Result<(JunctionSchema, bool)> {
        if let Some(resolved) = self.junctions.get(&(left, right)) {
            return Ok(*resolved);
        }
        let resolved = self.schema.junction_between(left, right)?;
        self.junctions.insert((left, right), resolved);
        Ok(resolved)
    }

    fn cache<T: BulkEntity>(&self) -> Option<&EntityCache<T>> {
        self.caches
            .get(&T::KIND)
            .and_then(|cache| cache.as_any().downcast_ref::<EntityCache<T>>())
    }

    fn cache_mut<T: BulkEntity>(&mut self) -> Result<&mut EntityCache<T>> {
        self.caches
            .entry(T::KIND)
            .or_insert_with(|| Box::new(EntityCache::<T>::default()))
            .as_any_mut()
            .downcast_mut::<EntityCache<T>>()
            .ok_or_else(|| {
                CoralError::Internal(format!(
                    "cache for {} holds a different entity type",
                    T::KIND
                ))
            })
    }
}
