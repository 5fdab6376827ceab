//! Bulk fact table: buffered inserts flushed through a [`BulkLoader`].
//!
//! The buffer never holds more than `bulksize` rows. When it is full the
//! next `insert` flushes first; if that flush fails the new row is refused
//! and the buffer is left exactly as it was, so nothing is lost and the
//! same rows are offered again on the next flush.

use crate::error::{EtlError, EtlResult};
use crate::fact::loader::{BulkLoadRequest, BulkLoader};
use crate::fact::{FactConfig, project};
use crate::row::{NameMapping, Row};
use crate::store::Loadable;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

/// Buffering and text-format settings of a bulk fact table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkConfig {
    pub bulksize: usize,
    pub fieldsep: String,
    pub rowsep: String,
    pub nullval: Option<String>,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            bulksize: 500_000,
            fieldsep: "\t".to_string(),
            rowsep: "\n".to_string(),
            nullval: None,
        }
    }
}

impl BulkConfig {
    pub fn with_bulksize(mut self, bulksize: usize) -> Self {
        self.bulksize = bulksize;
        self
    }

    pub fn with_separators(mut self, fieldsep: impl Into<String>, rowsep: impl Into<String>) -> Self {
        self.fieldsep = fieldsep.into();
        self.rowsep = rowsep.into();
        self
    }

    pub fn with_nullval(mut self, nullval: impl Into<String>) -> Self {
        self.nullval = Some(nullval.into());
        self
    }

    pub fn validate(&self) -> EtlResult<()> {
        if self.bulksize == 0 {
            return Err(EtlError::config("bulksize must be at least 1"));
        }
        if self.fieldsep.is_empty() || self.rowsep.is_empty() {
            return Err(EtlError::config("field and row separators must not be empty"));
        }
        if self.fieldsep == self.rowsep {
            return Err(EtlError::config("field and row separators must differ"));
        }
        Ok(())
    }
}

/// Fact table that batches inserts.
///
/// Mutation goes through `&mut self`; share one across workers behind a
/// mutex so inserts and flushes never interleave.
pub struct BulkFactTable {
    config: FactConfig,
    bulk: BulkConfig,
    columns: Vec<String>,
    loader: Box<dyn BulkLoader>,
    buffer: Vec<Row>,
    flushes: u64,
    loaded: u64,
}

impl BulkFactTable {
    pub fn new(config: FactConfig, bulk: BulkConfig, loader: impl BulkLoader + 'static) -> EtlResult<Self> {
        config.validate()?;
        bulk.validate()?;
        Ok(Self {
            columns: config.columns(),
            buffer: Vec::with_capacity(bulk.bulksize.min(4096)),
            config,
            bulk,
            loader: Box::new(loader),
            flushes: 0,
            loaded: 0,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Rows buffered and not yet loaded.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Number of successful flushes and rows loaded by them.
    pub fn loaded(&self) -> (u64, u64) {
        (self.flushes, self.loaded)
    }

    /// Buffer a fact row (`keyrefs ++ measures` only).
    pub fn insert(&mut self, row: &Row, namemapping: &NameMapping) -> EtlResult<()> {
        let fact = project(&self.columns, row, namemapping)?;
        if self.buffer.len() >= self.bulk.bulksize {
            self.flush()?;
        }
        self.buffer.push(fact);
        Ok(())
    }

    /// Hand the buffer to the loader. The buffer is cleared only when the
    /// loader succeeds.
    #[instrument(skip(self), fields(table = %self.config.name, rows = self.buffer.len()))]
    pub fn flush(&mut self) -> EtlResult<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let request = BulkLoadRequest {
            table: &self.config.name,
            columns: &self.columns,
            fieldsep: &self.bulk.fieldsep,
            rowsep: &self.bulk.rowsep,
            nullval: self.bulk.nullval.as_deref(),
            rows: &self.buffer,
        };
        if let Err(e) = self.loader.load(&request) {
            warn!(error = %e, "bulk load failed; rows kept for the next flush");
            return Err(match e {
                e @ EtlError::BulkLoad { .. } => e,
                other => EtlError::bulk_load(&self.config.name, other.to_string()),
            });
        }
        let rows = self.buffer.len() as u64;
        self.buffer.clear();
        self.flushes += 1;
        self.loaded += rows;
        info!(rows, "bulk load flushed");
        Ok(())
    }

    /// Flush whatever is still buffered. Call before committing.
    pub fn end_load(&mut self) -> EtlResult<()> {
        self.flush()
    }
}

impl Loadable for BulkFactTable {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn end_load(&mut self) -> EtlResult<()> {
        BulkFactTable::end_load(self)
    }
}
