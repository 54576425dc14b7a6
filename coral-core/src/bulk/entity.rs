use std::fmt;

use uuid::Uuid;

use super::schema::EntityKind;
use super::value::{Row, Value};
use crate::error::Result;

/// An entity the bulk engine can cache, insert and read back.
///
/// `to_row` and `from_row` must agree with the column order of the entity's
/// [`TableSchema`](super::TableSchema).
pub trait BulkEntity: Clone + Send + Sync + 'static {
    const KIND: EntityKind;

    fn id(&self) -> Uuid;

    fn to_row(&self) -> Row;

    fn from_row(row: &Row) -> Result<Self>;
}

/// Deduplication key for one entity type: which columns identify a row and
/// how to extract their values from a candidate.
pub struct KeySelector<T> {
    name: &'static str,
    columns: &'static [&'static str],
    extract: fn(&T) -> Vec<Value>,
}

impl<T> KeySelector<T> {
    /// Selector named `name` keying on `columns`, in the order `extract` returns them.
    pub const fn new(
        name: &'static str,
        columns: &'static [&'static str],
        extract: fn(&T) -> Vec<Value>,
    ) -> Self {
        Self {
            name,
            columns,
            extract,
        }
    }

    /// Name used to tell selectors of the same type apart.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Key columns.
    pub fn columns(&self) -> &'static [&'static str] {
        self.columns
    }

    /// Cache key of `entity`.
    pub fn key(&self, entity: &T) -> EntityKey {
        EntityKey {
            selector: self.name,
            values: (self.extract)(entity),
        }
    }

    /// Column/value pairs a store uses to look up an existing row.
    pub fn predicate(&self, key: &EntityKey) -> Vec<(&'static str, Value)> {
        self.columns
            .iter()
            .copied()
            .zip(key.values.iter().cloned())
            .collect()
    }
}

impl<T> fmt::Debug for KeySelector<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeySelector")
            .field("name", &self.name)
            .field("columns", &self.columns)
            .finish()
    }
}

/// Equality-comparable cache key produced by a [`KeySelector`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityKey {
    selector: &'static str,
    values: Vec<Value>,
}

impl EntityKey {
    /// Key values in selector column order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }
}
