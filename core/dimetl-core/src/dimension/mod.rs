//! Dimension tables.
//!
//! Every dimension implements [`DimensionTable`]: `lookup` finds the
//! surrogate key for a row's lookup attributes, `insert` stores a new row and
//! `ensure` does lookup-then-insert. On success `insert` and `ensure` write
//! the resolved surrogate key back into the row under the (mapped) key
//! field, which is how snowflaked parents pick up their children's keys.
//!
//! | type | module |
//! |------|--------|
//! | [`CachedDimension`] (plain when `cachesize == 0`) | [`cached`] |
//! | [`SlowlyChangingDimension`] | [`scd`] |
//! | [`SnowflakedDimension`] | [`snowflake`] |
//!
//! [`AnyDimension`] dispatches over the three without dynamic allocation.

pub mod cache;
pub mod cached;
pub mod scd;
pub mod snowflake;

use crate::error::{EtlError, EtlResult};
use crate::row::{NameMapping, Row, Value, ValueTuple};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

pub use cache::{CacheStats, DimensionCache};
pub use cached::{CachedDimension, RowExpander};
pub use scd::{ScdConfig, SlowlyChangingDimension};
pub use snowflake::{SnowflakeBuilder, SnowflakedDimension};

/// Polymorphic dimension capability.
pub trait DimensionTable: Send + Sync {
    fn name(&self) -> &str;

    /// Surrogate key field
    fn key(&self) -> &str;

    /// Stored attributes, surrogate key excluded
    fn attributes(&self) -> &[String];

    /// Attributes identifying an existing row
    fn lookupatts(&self) -> &[String];

    /// Surrogate key of the (current) row matching the lookup attributes.
    fn lookup(&self, row: &Row, namemapping: &NameMapping) -> EtlResult<Option<Value>>;

    /// Store `row` as a new dimension row and return its surrogate key.
    fn insert(&self, row: &mut Row, namemapping: &NameMapping) -> EtlResult<Value>;

    /// Look the row up, inserting it on a miss.
    fn ensure(&self, row: &mut Row, namemapping: &NameMapping) -> EtlResult<Value>;

    /// Stored row for a surrogate key.
    fn getbykey(&self, keyvalue: &Value) -> EtlResult<Option<Row>>;

    /// Whether `ensure` keeps version history.
    fn is_versioned(&self) -> bool {
        false
    }

    /// Drop cached keys that may refer to rows the store has rolled back.
    fn reset_cache(&self) -> EtlResult<()> {
        Ok(())
    }
}

/// Closed set of dimension kinds behind one `ensure` capability.
pub enum AnyDimension {
    Cached(CachedDimension),
    SlowlyChanging(SlowlyChangingDimension),
    Snowflaked(SnowflakedDimension),
}

macro_rules! dispatch {
    ($self:ident, $d:ident => $e:expr) => {
        match $self {
            AnyDimension::Cached($d) => $e,
            AnyDimension::SlowlyChanging($d) => $e,
            AnyDimension::Snowflaked($d) => $e,
        }
    };
}

impl DimensionTable for AnyDimension {
    fn name(&self) -> &str {
        dispatch!(self, d => d.name())
    }

    fn key(&self) -> &str {
        dispatch!(self, d => d.key())
    }

    fn attributes(&self) -> &[String] {
        dispatch!(self, d => d.attributes())
    }

    fn lookupatts(&self) -> &[String] {
        dispatch!(self, d => d.lookupatts())
    }

    fn lookup(&self, row: &Row, namemapping: &NameMapping) -> EtlResult<Option<Value>> {
        dispatch!(self, d => d.lookup(row, namemapping))
    }

    fn insert(&self, row: &mut Row, namemapping: &NameMapping) -> EtlResult<Value> {
        dispatch!(self, d => d.insert(row, namemapping))
    }

    fn ensure(&self, row: &mut Row, namemapping: &NameMapping) -> EtlResult<Value> {
        dispatch!(self, d => d.ensure(row, namemapping))
    }

    fn getbykey(&self, keyvalue: &Value) -> EtlResult<Option<Row>> {
        dispatch!(self, d => d.getbykey(keyvalue))
    }

    fn is_versioned(&self) -> bool {
        dispatch!(self, d => d.is_versioned())
    }

    fn reset_cache(&self) -> EtlResult<()> {
        dispatch!(self, d => d.reset_cache())
    }
}

impl From<CachedDimension> for AnyDimension {
    fn from(d: CachedDimension) -> Self {
        AnyDimension::Cached(d)
    }
}

impl From<SlowlyChangingDimension> for AnyDimension {
    fn from(d: SlowlyChangingDimension) -> Self {
        AnyDimension::SlowlyChanging(d)
    }
}

impl From<SnowflakedDimension> for AnyDimension {
    fn from(d: SnowflakedDimension) -> Self {
        AnyDimension::Snowflaked(d)
    }
}

fn default_cachesize() -> i64 {
    10_000
}

/// Definition of a (cached) dimension table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionConfig {
    pub name: String,
    pub key: String,
    pub attributes: Vec<String>,
    /// Empty means "all attributes"
    #[serde(default)]
    pub lookupatts: Vec<String>,
    /// `-1` unbounded, `0` no cache, `n` LRU-bounded
    #[serde(default = "default_cachesize")]
    pub cachesize: i64,
    #[serde(default)]
    pub prefill: bool,
    /// Key returned by `lookup` on a miss; needs `prefill`
    #[serde(default)]
    pub defaultidvalue: Option<Value>,
    #[serde(default)]
    pub cachefullrows: bool,
}

impl DimensionConfig {
    pub fn new<S: Into<String>>(
        name: impl Into<String>,
        key: impl Into<String>,
        attributes: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            name: name.into(),
            key: key.into(),
            attributes: attributes.into_iter().map(Into::into).collect(),
            lookupatts: Vec::new(),
            cachesize: default_cachesize(),
            prefill: false,
            defaultidvalue: None,
            cachefullrows: false,
        }
    }

    pub fn with_lookupatts<S: Into<String>>(mut self, atts: impl IntoIterator<Item = S>) -> Self {
        self.lookupatts = atts.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_cachesize(mut self, cachesize: i64) -> Self {
        self.cachesize = cachesize;
        self
    }

    pub fn with_prefill(mut self, prefill: bool) -> Self {
        self.prefill = prefill;
        self
    }

    pub fn with_defaultidvalue(mut self, value: impl Into<Value>) -> Self {
        self.defaultidvalue = Some(value.into());
        self
    }

    pub fn with_cachefullrows(mut self, cachefullrows: bool) -> Self {
        self.cachefullrows = cachefullrows;
        self
    }

    /// Effective lookup attributes.
    pub fn effective_lookupatts(&self) -> &[String] {
        if self.lookupatts.is_empty() {
            &self.attributes
        } else {
            &self.lookupatts
        }
    }

    pub fn validate(&self) -> EtlResult<()> {
        if self.name.is_empty() {
            return Err(EtlError::config("dimension name must not be empty"));
        }
        if self.key.is_empty() {
            return Err(EtlError::config(format!(
                "dimension '{}' has no key field",
                self.name
            )));
        }
        if self.attributes.is_empty() {
            return Err(EtlError::config(format!(
                "dimension '{}' has no attributes",
                self.name
            )));
        }
        let mut seen = HashSet::new();
        for att in &self.attributes {
            if !seen.insert(att.as_str()) {
                return Err(EtlError::config(format!(
                    "dimension '{}' lists attribute '{att}' twice",
                    self.name
                )));
            }
        }
        if seen.contains(self.key.as_str()) {
            return Err(EtlError::config(format!(
                "dimension '{}': key '{}' must not be listed among the attributes",
                self.name, self.key
            )));
        }
        for att in &self.lookupatts {
            if !seen.contains(att.as_str()) {
                return Err(EtlError::config(format!(
                    "dimension '{}': lookupatts references unknown attribute '{att}'",
                    self.name
                )));
            }
        }
        if self.cachesize < -1 {
            return Err(EtlError::config(format!(
                "dimension '{}': cachesize must be -1, 0 or positive",
                self.name
            )));
        }
        if self.defaultidvalue.is_some() && !self.prefill {
            return Err(EtlError::config(format!(
                "dimension '{}': defaultidvalue requires prefill",
                self.name
            )));
        }
        if self.prefill && self.cachesize == 0 {
            return Err(EtlError::config(format!(
                "dimension '{}': prefill requires a cache (cachesize != 0)",
                self.name
            )));
        }
        Ok(())
    }
}

/// One mutex per lookup tuple in flight, so concurrent `ensure` calls on
/// the same business key serialize while different keys proceed in parallel.
#[derive(Default)]
pub(crate) struct KeyLocks {
    locks: DashMap<ValueTuple, Arc<Mutex<()>>>,
}

impl KeyLocks {
    /// Run `f` while holding the lock for `tuple`.
    pub(crate) fn with_lock<T>(&self, tuple: &ValueTuple, f: impl FnOnce() -> T) -> T {
        let lock = Arc::clone(self.locks.entry(tuple.clone()).or_default().value());
        let result = {
            let _guard = lock.lock();
            f()
        };
        drop(lock);
        // forget the lock once nobody else waits on it
        self.locks
            .remove_if(tuple, |_, l| Arc::strong_count(l) == 1);
        result
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.locks.len()
    }
}
