//! Cached dimension: lookup-before-insert over a write-through cache.

use crate::dimension::cache::{CacheStats, DimensionCache};
use crate::dimension::{DimensionConfig, DimensionTable, KeyLocks};
use crate::error::EtlResult;
use crate::row::{NameMapping, Row, Value, ValueTuple};
use crate::sequence::SequenceGenerator;
use crate::store::Store;
use std::sync::Arc;
use tracing::{debug, info};

/// Callback computing derived attributes for a row about to be inserted.
///
/// Runs once per `ensure` miss, before the store insert; whatever it writes
/// into the row is stored with it.
pub type RowExpander = Box<dyn Fn(&mut Row, &NameMapping) -> EtlResult<()> + Send + Sync>;

/// Dimension table with a lookup cache.
///
/// With `cachesize == 0` it behaves as a plain dimension: every lookup is a
/// store query.
pub struct CachedDimension {
    config: DimensionConfig,
    lookupatts: Vec<String>,
    store: Arc<dyn Store>,
    cache: DimensionCache,
    keys: SequenceGenerator,
    locks: KeyLocks,
    rowexpander: Option<RowExpander>,
    prefilled: bool,
}

impl CachedDimension {
    pub fn new(store: Arc<dyn Store>, config: DimensionConfig) -> EtlResult<Self> {
        config.validate()?;
        let prefill = config.prefill;
        let mut dim = Self::build(store, config)?;
        if prefill {
            dim.prefill_where(|_| true)?;
        }
        Ok(dim)
    }

    /// Dimension without a cache.
    pub fn plain(store: Arc<dyn Store>, config: DimensionConfig) -> EtlResult<Self> {
        Self::new(store, config.with_cachesize(0))
    }

    /// Validated construction without prefilling.
    pub(crate) fn build(store: Arc<dyn Store>, config: DimensionConfig) -> EtlResult<Self> {
        let cache = DimensionCache::new(config.cachesize, config.cachefullrows)?;
        let keys = SequenceGenerator::after(store.max_key(&config.name, &config.key)?);
        Ok(Self {
            lookupatts: config.effective_lookupatts().to_vec(),
            config,
            store,
            cache,
            keys,
            locks: KeyLocks::default(),
            rowexpander: None,
            prefilled: false,
        })
    }

    pub fn with_rowexpander(
        mut self,
        expander: impl Fn(&mut Row, &NameMapping) -> EtlResult<()> + Send + Sync + 'static,
    ) -> Self {
        self.rowexpander = Some(Box::new(expander));
        self
    }

    /// Load every stored row accepted by `keep` into the cache.
    pub(crate) fn prefill_where(&mut self, keep: impl Fn(&Row) -> bool) -> EtlResult<()> {
        let loaded = self.load_cache(keep)?;
        self.prefilled = true;
        info!(dimension = %self.config.name, rows = loaded, "cache prefilled");
        Ok(())
    }

    fn load_cache(&self, keep: impl Fn(&Row) -> bool) -> EtlResult<usize> {
        let rows = self.store.scan(&self.config.name)?;
        self.cache.begin_refill();
        let mut loaded = 0usize;
        for row in rows.into_iter().filter(|r| keep(r)) {
            let Some(key) = row.get(&self.config.key).cloned() else {
                continue;
            };
            let tuple = row.values_of(&self.lookupatts, &NameMapping::new())?;
            self.cache.put_key(tuple, key.clone());
            if self.cache.caches_rows() {
                self.cache.put_row(key, row);
            }
            loaded += 1;
        }
        Ok(loaded)
    }

    /// Forget cached keys after the store discarded uncommitted rows. A
    /// prefilled cache is reloaded with the stored rows accepted by `keep`.
    pub(crate) fn reset_cache_where(&self, keep: impl Fn(&Row) -> bool) -> EtlResult<()> {
        if self.prefilled {
            let loaded = self.load_cache(keep)?;
            info!(dimension = %self.config.name, rows = loaded, "cache reloaded");
        } else {
            self.cache.clear();
            debug!(dimension = %self.config.name, "cache cleared");
        }
        Ok(())
    }

    pub fn config(&self) -> &DimensionConfig {
        &self.config
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub(crate) fn cache(&self) -> &DimensionCache {
        &self.cache
    }

    pub(crate) fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub(crate) fn locks(&self) -> &KeyLocks {
        &self.locks
    }

    pub(crate) fn is_prefilled(&self) -> bool {
        self.prefilled
    }

    pub(crate) fn next_key(&self) -> EtlResult<Value> {
        self.keys.next_value().map(Value::Int)
    }

    pub(crate) fn lookup_tuple(&self, row: &Row, namemapping: &NameMapping) -> EtlResult<ValueTuple> {
        row.values_of(&self.lookupatts, namemapping)
    }

    /// Cache, then store. No sentinel.
    pub(crate) fn find_key(&self, tuple: &ValueTuple) -> EtlResult<Option<Value>> {
        if let Some(key) = self.cache.get_key(tuple) {
            return Ok(Some(key));
        }
        if self.cache.is_complete(self.prefilled) {
            return Ok(None);
        }
        let found = self
            .store
            .lookup(&self.config.name, &self.config.key, &self.lookupatts, tuple)?;
        if let Some(key) = &found {
            self.cache.put_key(tuple.clone(), key.clone());
        }
        Ok(found)
    }

    /// Write a row to the store under `keyvalue` and through to the cache.
    pub(crate) fn store_row(&self, keyvalue: Value, mut stored: Row) -> EtlResult<Value> {
        stored.set(self.config.key.clone(), keyvalue.clone());
        let key = self.store.insert(&self.config.name, &self.config.key, &stored)?;
        if let Some(k) = key.to_int() {
            self.keys.observe(k);
        }
        let tuple = stored.values_of(&self.lookupatts, &NameMapping::new())?;
        self.cache.put_key(tuple, key.clone());
        if self.cache.caches_rows() {
            self.cache.put_row(key.clone(), stored);
        }
        debug!(dimension = %self.config.name, key = %key, "dimension row inserted");
        Ok(key)
    }

    fn insert_unlocked(&self, row: &mut Row, namemapping: &NameMapping) -> EtlResult<Value> {
        let stored = Row::from_iter(
            self.config
                .attributes
                .iter()
                .cloned()
                .zip(row.values_of(&self.config.attributes, namemapping)?),
        );
        let keyvalue = match row.get_mapped(&self.config.key, namemapping) {
            Some(v) if !v.is_null() => v.clone(),
            _ => self.next_key()?,
        };
        let key = self.store_row(keyvalue, stored)?;
        row.set_mapped(&self.config.key, namemapping, key.clone());
        Ok(key)
    }
}

impl DimensionTable for CachedDimension {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn key(&self) -> &str {
        &self.config.key
    }

    fn attributes(&self) -> &[String] {
        &self.config.attributes
    }

    fn lookupatts(&self) -> &[String] {
        &self.lookupatts
    }

    fn lookup(&self, row: &Row, namemapping: &NameMapping) -> EtlResult<Option<Value>> {
        let tuple = self.lookup_tuple(row, namemapping)?;
        Ok(self
            .find_key(&tuple)?
            .or_else(|| self.config.defaultidvalue.clone()))
    }

    /// Insert without looking up first. A non-null value already present
    /// under the key field is used as the surrogate key.
    fn insert(&self, row: &mut Row, namemapping: &NameMapping) -> EtlResult<Value> {
        self.insert_unlocked(row, namemapping)
    }

    fn ensure(&self, row: &mut Row, namemapping: &NameMapping) -> EtlResult<Value> {
        let tuple = self.lookup_tuple(row, namemapping)?;
        self.locks.with_lock(&tuple, || {
            if let Some(key) = self.find_key(&tuple)? {
                row.set_mapped(&self.config.key, namemapping, key.clone());
                return Ok(key);
            }
            if let Some(expand) = &self.rowexpander {
                expand(row, namemapping)?;
            }
            self.insert_unlocked(row, namemapping)
        })
    }

    fn reset_cache(&self) -> EtlResult<()> {
        self.reset_cache_where(|_| true)
    }

    fn getbykey(&self, keyvalue: &Value) -> EtlResult<Option<Row>> {
        if let Some(row) = self.cache.get_row(keyvalue) {
            return Ok(Some(row));
        }
        let row = self
            .store
            .get_by_key(&self.config.name, &self.config.key, keyvalue)?;
        if let Some(row) = &row {
            self.cache.put_row(keyvalue.clone(), row.clone());
        }
        Ok(row)
    }
}
