//! Warehouse layout loaded from JSON.
//!
//! ```json
//! {
//!   "dimensions": [{"name": "server", "key": "serverid", "attributes": ["server"]}],
//!   "slowly_changing": [],
//!   "facts": [{"name": "testresults", "keyrefs": ["pageid"], "measures": ["errors"]}],
//!   "bulk": {"testresults": {"bulksize": 5000}},
//!   "sources": {"downloadlog": {"delimiter": "\t"}}
//! }
//! ```

use crate::dimension::{DimensionConfig, ScdConfig};
use crate::error::{EtlError, EtlResult};
use crate::fact::{BulkConfig, FactConfig};
use crate::source::DelimitedConfig;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// Every table and source definition of one warehouse.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarehouseConfig {
    pub dimensions: Vec<DimensionConfig>,
    pub slowly_changing: Vec<ScdConfig>,
    pub facts: Vec<FactConfig>,
    /// Bulk settings per fact table; facts without an entry load row by row
    pub bulk: BTreeMap<String, BulkConfig>,
    pub sources: BTreeMap<String, DelimitedConfig>,
}

impl WarehouseConfig {
    pub fn from_path(path: impl AsRef<Path>) -> EtlResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> EtlResult<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> EtlResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> EtlResult<()> {
        let mut names = HashSet::new();
        let tables = self
            .dimensions
            .iter()
            .map(|d| d.validate().map(|_| d.name.as_str()))
            .chain(
                self.slowly_changing
                    .iter()
                    .map(|s| s.validate().map(|_| s.dimension.name.as_str())),
            )
            .chain(self.facts.iter().map(|f| f.validate().map(|_| f.name.as_str())));
        for name in tables {
            let name = name?;
            if !names.insert(name) {
                return Err(EtlError::config(format!("table '{name}' is defined twice")));
            }
        }
        for (fact, bulk) in &self.bulk {
            if !self.facts.iter().any(|f| &f.name == fact) {
                return Err(EtlError::config(format!(
                    "bulk settings for unknown fact table '{fact}'"
                )));
            }
            bulk.validate()?;
        }
        for source in self.sources.values() {
            source.validate()?;
        }
        Ok(())
    }

    pub fn dimension(&self, name: &str) -> EtlResult<&DimensionConfig> {
        self.dimensions
            .iter()
            .find(|d| d.name == name)
            .ok_or_else(|| EtlError::config(format!("no dimension named '{name}'")))
    }

    pub fn scd(&self, name: &str) -> EtlResult<&ScdConfig> {
        self.slowly_changing
            .iter()
            .find(|s| s.dimension.name == name)
            .ok_or_else(|| EtlError::config(format!("no slowly changing dimension named '{name}'")))
    }

    pub fn fact(&self, name: &str) -> EtlResult<&FactConfig> {
        self.facts
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| EtlError::config(format!("no fact table named '{name}'")))
    }

    pub fn bulk(&self, fact: &str) -> Option<&BulkConfig> {
        self.bulk.get(fact)
    }

    pub fn source(&self, name: &str) -> EtlResult<&DelimitedConfig> {
        self.sources
            .get(name)
            .ok_or_else(|| EtlError::config(format!("no source named '{name}'")))
    }
}
