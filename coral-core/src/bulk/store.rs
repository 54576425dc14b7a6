use async_trait::async_trait;
use uuid::Uuid;

use super::schema::{JunctionSchema, TableSchema};
use super::value::{Row, Value};
use crate::error::Result;

/// Storage access needed by [`BulkInsertContext`](super::BulkInsertContext).
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Return the first row whose columns equal the predicate values. `NULL`
    /// predicate values match `NULL` columns.
    async fn find_one(
        &self,
        table: &TableSchema,
        predicate: &[(&'static str, Value)],
    ) -> Result<Option<Row>>;

    /// Insert all rows inside a single transaction.
    async fn insert_batch(&self, table: &TableSchema, rows: &[Row]) -> Result<u64>;

    /// Insert link rows inside a single transaction, skipping pairs that
    /// already exist. Returns the number of rows actually written.
    async fn insert_links(&self, junction: &JunctionSchema, pairs: &[(Uuid, Uuid)]) -> Result<u64>;
}
