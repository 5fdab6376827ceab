//! Store module: the warehouse the tables write into.
//!
//! Dimension and fact tables depend only on the [`Store`] trait; the core
//! never speaks a SQL dialect or manages connections. Two reference
//! backends ship with the crate:
//!
//! - [`memory::MemoryStore`]: in-memory tables with snapshot rollback
//! - [`sled_store::SledStore`]: sled trees with a staged write overlay
//!
//! [`connection::ConnectionWrapper`] owns the transaction boundary and the
//! final flush of buffered fact tables.

pub mod connection;
pub mod memory;
pub mod sled_store;

use crate::error::EtlResult;
use crate::row::{Row, Value};

pub use connection::{ConnectionWrapper, Loadable};
pub use memory::MemoryStore;
pub use sled_store::SledStore;

/// Logical operations the framework issues against the warehouse.
///
/// # Contract
///
/// - `find`: every stored row whose `atts` equal `values`, in insertion order.
/// - `lookup`: surrogate key of the first row matching `lookupatts`, or `None`.
/// - `insert`: stores `row`; the row's `key` field is the surrogate key. A
///   missing or null key is assigned by the store (largest integer key + 1).
///   A duplicate key is a constraint violation. Returns the stored key.
/// - `update`: overwrites the given fields of the row identified by `key = keyvalue`.
/// - `bulk_load`: appends fact rows (already projected to `columns`) in order.
/// - `commit` / `rollback`: transaction boundary; nothing before `commit` is durable.
///
/// Implementations are `Send + Sync` so tables can be shared across workers.
pub trait Store: Send + Sync {
    /// Rows matching all `atts = values` pairs.
    fn find(&self, table: &str, atts: &[String], values: &[Value]) -> EtlResult<Vec<Row>>;

    /// Surrogate key of the row identified by the lookup attributes.
    fn lookup(
        &self,
        table: &str,
        key: &str,
        lookupatts: &[String],
        values: &[Value],
    ) -> EtlResult<Option<Value>> {
        Ok(self
            .find(table, lookupatts, values)?
            .into_iter()
            .find_map(|row| row.get(key).cloned()))
    }

    /// Fetch a row by surrogate key.
    fn get_by_key(&self, table: &str, key: &str, keyvalue: &Value) -> EtlResult<Option<Row>> {
        Ok(self
            .find(table, &[key.to_string()], std::slice::from_ref(keyvalue))?
            .into_iter()
            .next())
    }

    /// Insert a row and return its surrogate key.
    fn insert(&self, table: &str, key: &str, row: &Row) -> EtlResult<Value>;

    /// Overwrite fields of an existing row.
    fn update(&self, table: &str, key: &str, keyvalue: &Value, changes: &Row) -> EtlResult<()>;

    /// Every row of a table, in insertion order.
    fn scan(&self, table: &str) -> EtlResult<Vec<Row>>;

    /// Largest integer surrogate key stored in `table`.
    fn max_key(&self, table: &str, key: &str) -> EtlResult<Option<i64>> {
        Ok(self
            .scan(table)?
            .iter()
            .filter_map(|row| row.get(key).and_then(Value::to_int))
            .max())
    }

    /// Number of rows in a table.
    fn count(&self, table: &str) -> EtlResult<usize>;

    /// Append many rows at once (the store's bulk-load facility).
    fn bulk_load(&self, table: &str, columns: &[String], rows: &[Row]) -> EtlResult<()>;

    /// Make all writes since the last commit durable.
    fn commit(&self) -> EtlResult<()>;

    /// Discard all writes since the last commit.
    fn rollback(&self) -> EtlResult<()>;
}
