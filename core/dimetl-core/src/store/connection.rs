//! Connection wrapper: the transaction boundary of a load.
//!
//! A load commits exactly once, after the full input is exhausted. Buffered
//! fact tables must be flushed before that commit, otherwise their rows
//! would silently miss the transaction; `commit` therefore takes every
//! [`Loadable`] and ends its load first.
//!
//! Rolling back works the other way round: the store drops its uncommitted
//! rows first, then every dimension passed to `rollback` drops the cached
//! keys that pointed at them.

use crate::dimension::DimensionTable;
use crate::error::EtlResult;
use crate::store::Store;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// A table that may hold rows not yet handed to the store.
pub trait Loadable {
    /// Table name (for logging).
    fn name(&self) -> &str;

    /// Push every pending row into the store.
    fn end_load(&mut self) -> EtlResult<()>;
}

/// Owns the store handle shared by all tables of a load.
#[derive(Clone)]
pub struct ConnectionWrapper {
    store: Arc<dyn Store>,
}

impl ConnectionWrapper {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// The shared store handle, for constructing tables.
    pub fn store(&self) -> Arc<dyn Store> {
        Arc::clone(&self.store)
    }

    /// End the load of every table, then commit the store.
    ///
    /// Stops at the first failing table; nothing is committed in that case
    /// and the failing table keeps its pending rows.
    #[instrument(skip_all, fields(tables = tables.len()))]
    pub fn commit(&self, tables: &mut [&mut dyn Loadable]) -> EtlResult<()> {
        for table in tables.iter_mut() {
            if let Err(e) = table.end_load() {
                warn!(table = table.name(), error = %e, "end of load failed; not committing");
                return Err(e);
            }
        }
        self.store.commit()?;
        info!("load committed");
        Ok(())
    }

    /// Discard all uncommitted store state and reset the caches of
    /// `dimensions`, so their next `ensure` inserts the rows again.
    #[instrument(skip_all, fields(dimensions = dimensions.len()))]
    pub fn rollback(&self, dimensions: &[&dyn DimensionTable]) -> EtlResult<()> {
        self.store.rollback()?;
        for dimension in dimensions {
            dimension.reset_cache()?;
        }
        info!("load rolled back");
        Ok(())
    }
}
