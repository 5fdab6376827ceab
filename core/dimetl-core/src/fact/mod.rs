//! Fact tables.
//!
//! A fact row is the keyrefs (foreign keys into dimensions) followed by the
//! measures. [`FactTable`] writes every row straight to the store;
//! [`BulkFactTable`] buffers rows and hands them to a [`BulkLoader`] in
//! batches of `bulksize`.

pub mod bulk;
pub mod loader;

use crate::error::{EtlError, EtlResult};
use crate::row::{NameMapping, Row, Value};
use crate::store::Store;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

pub use bulk::{BulkConfig, BulkFactTable};
pub use loader::{BulkLoadRequest, BulkLoader, DelimitedFileLoader, ParquetLoader, StoreLoader};

/// Definition of a fact table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactConfig {
    pub name: String,
    pub keyrefs: Vec<String>,
    #[serde(default)]
    pub measures: Vec<String>,
}

impl FactConfig {
    pub fn new<S: Into<String>>(name: impl Into<String>, keyrefs: impl IntoIterator<Item = S>) -> Self {
        Self {
            name: name.into(),
            keyrefs: keyrefs.into_iter().map(Into::into).collect(),
            measures: Vec::new(),
        }
    }

    pub fn with_measures<S: Into<String>>(mut self, measures: impl IntoIterator<Item = S>) -> Self {
        self.measures = measures.into_iter().map(Into::into).collect();
        self
    }

    /// `keyrefs ++ measures`, the stored column order.
    pub fn columns(&self) -> Vec<String> {
        self.keyrefs.iter().chain(&self.measures).cloned().collect()
    }

    pub fn validate(&self) -> EtlResult<()> {
        if self.name.is_empty() {
            return Err(EtlError::config("fact table name must not be empty"));
        }
        if self.keyrefs.is_empty() {
            return Err(EtlError::config(format!(
                "fact table '{}' has no keyrefs",
                self.name
            )));
        }
        let mut seen = HashSet::new();
        for column in self.keyrefs.iter().chain(&self.measures) {
            if !seen.insert(column.as_str()) {
                return Err(EtlError::config(format!(
                    "fact table '{}' lists column '{column}' twice",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

/// Fact table with immediate, row-at-a-time inserts.
pub struct FactTable {
    config: FactConfig,
    columns: Vec<String>,
    store: Arc<dyn Store>,
}

impl FactTable {
    pub fn new(store: Arc<dyn Store>, config: FactConfig) -> EtlResult<Self> {
        config.validate()?;
        Ok(Self {
            columns: config.columns(),
            config,
            store,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &FactConfig {
        &self.config
    }

    pub fn insert(&self, row: &Row, namemapping: &NameMapping) -> EtlResult<()> {
        let fact = project(&self.columns, row, namemapping)?;
        self.store
            .bulk_load(&self.config.name, &self.columns, std::slice::from_ref(&fact))
    }

    /// The stored fact with the row's keyrefs.
    pub fn lookup(&self, row: &Row, namemapping: &NameMapping) -> EtlResult<Option<Row>> {
        let keys = row.values_of(&self.config.keyrefs, namemapping)?;
        Ok(self
            .store
            .find(&self.config.name, &self.config.keyrefs, &keys)?
            .into_iter()
            .next())
    }

    /// Insert the fact unless its keyref combination is already stored.
    /// Returns `true` when a row was inserted. Measures present in `row`
    /// must equal the stored ones; a mismatch is a constraint violation.
    pub fn ensure(&self, row: &Row, namemapping: &NameMapping) -> EtlResult<bool> {
        let Some(existing) = self.lookup(row, namemapping)? else {
            self.insert(row, namemapping)?;
            return Ok(true);
        };
        for measure in &self.config.measures {
            let Some(incoming) = row.get_mapped(measure, namemapping) else {
                continue;
            };
            let stored = existing.get(measure).unwrap_or(&Value::Null);
            if incoming != stored {
                return Err(EtlError::ConstraintViolation(format!(
                    "fact in '{}' already stored with {measure}={stored}, got {incoming}",
                    self.config.name
                )));
            }
        }
        debug!(table = %self.config.name, "fact already present");
        Ok(false)
    }
}

/// `keyrefs ++ measures` of a row under their logical names. A missing
/// column is a configuration error.
pub(crate) fn project(columns: &[String], row: &Row, namemapping: &NameMapping) -> EtlResult<Row> {
    let values = row.values_of(columns, namemapping)?;
    Ok(columns.iter().cloned().zip(values).collect())
}
