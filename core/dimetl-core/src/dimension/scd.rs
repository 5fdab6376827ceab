//! Slowly changing dimension (type 2, with optional type 1 columns).
//!
//! Each business key (the lookup attributes) owns a chain of versions
//! `1, 2, …` with half-open validity intervals `[fromatt, toatt)` taken from
//! the source date attribute. The chain always partitions time: sorted by
//! version, each `toatt` equals the next `fromatt`, and only the last
//! version is open (`toatt == maxto`).
//!
//! `ensure` compares the tracked attributes with the open version:
//!
//! - unchanged: the open version's key is returned
//! - changed, same date as the open version's `fromatt`: updated in place
//! - changed, later date: the open version is closed at that date and a new
//!   version starts there
//! - earlier date than the open version: history is left alone and the key
//!   of the version valid at that date is returned
//!
//! A later source date alone, with every tracked attribute unchanged, does
//! not start a version: the open version's key is returned.
//!
//! Type-1 attributes are overwritten on every version of the business key
//! and never start a version of their own.

use crate::dimension::cached::CachedDimension;
use crate::dimension::{DimensionConfig, DimensionTable};
use crate::error::{EtlError, EtlResult};
use crate::row::{NameMapping, Row, Value, ValueTuple};
use crate::store::Store;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

fn default_versionatt() -> String {
    "version".to_string()
}

fn default_fromatt() -> String {
    "validfrom".to_string()
}

fn default_toatt() -> String {
    "validto".to_string()
}

/// Versioning definition on top of a [`DimensionConfig`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScdConfig {
    pub dimension: DimensionConfig,
    #[serde(default = "default_versionatt")]
    pub versionatt: String,
    #[serde(default = "default_fromatt")]
    pub fromatt: String,
    #[serde(default = "default_toatt")]
    pub toatt: String,
    /// Row field holding the source date of a change
    pub srcdateatt: String,
    /// `fromatt` of a first version whose row carries no date
    #[serde(default)]
    pub minfrom: Value,
    /// `toatt` of the open version
    #[serde(default)]
    pub maxto: Value,
    #[serde(default)]
    pub type1atts: Vec<String>,
}

impl ScdConfig {
    pub fn new(dimension: DimensionConfig, srcdateatt: impl Into<String>) -> Self {
        Self {
            dimension,
            versionatt: default_versionatt(),
            fromatt: default_fromatt(),
            toatt: default_toatt(),
            srcdateatt: srcdateatt.into(),
            minfrom: Value::Null,
            maxto: Value::Null,
            type1atts: Vec::new(),
        }
    }

    pub fn with_versionatt(mut self, att: impl Into<String>) -> Self {
        self.versionatt = att.into();
        self
    }

    pub fn with_fromatt(mut self, att: impl Into<String>) -> Self {
        self.fromatt = att.into();
        self
    }

    pub fn with_toatt(mut self, att: impl Into<String>) -> Self {
        self.toatt = att.into();
        self
    }

    pub fn with_minfrom(mut self, value: impl Into<Value>) -> Self {
        self.minfrom = value.into();
        self
    }

    pub fn with_maxto(mut self, value: impl Into<Value>) -> Self {
        self.maxto = value.into();
        self
    }

    pub fn with_type1atts<S: Into<String>>(mut self, atts: impl IntoIterator<Item = S>) -> Self {
        self.type1atts = atts.into_iter().map(Into::into).collect();
        self
    }

    fn meta(&self) -> [&str; 3] {
        [self.versionatt.as_str(), self.fromatt.as_str(), self.toatt.as_str()]
    }

    /// Attributes whose change starts a new version.
    pub fn tracked_atts(&self) -> Vec<String> {
        let lookup = self.dimension.effective_lookupatts();
        self.dimension
            .attributes
            .iter()
            .filter(|a| {
                !lookup.contains(*a)
                    && !self.meta().contains(&a.as_str())
                    && !self.type1atts.contains(*a)
            })
            .cloned()
            .collect()
    }

    pub fn validate(&self) -> EtlResult<()> {
        self.dimension.validate()?;
        let name = &self.dimension.name;
        if self.srcdateatt.is_empty() {
            return Err(EtlError::config(format!(
                "slowly changing dimension '{name}' needs a srcdateatt"
            )));
        }
        let meta = self.meta();
        if meta[0] == meta[1] || meta[1] == meta[2] || meta[0] == meta[2] {
            return Err(EtlError::config(format!(
                "dimension '{name}': versionatt, fromatt and toatt must differ"
            )));
        }
        let lookup = self.dimension.effective_lookupatts();
        for att in meta {
            if !self.dimension.attributes.iter().any(|a| a == att) {
                return Err(EtlError::config(format!(
                    "dimension '{name}': versioning attribute '{att}' is not an attribute"
                )));
            }
            if lookup.iter().any(|a| a == att) {
                return Err(EtlError::config(format!(
                    "dimension '{name}': versioning attribute '{att}' cannot be a lookup attribute"
                )));
            }
        }
        for att in &self.type1atts {
            if !self.dimension.attributes.contains(att)
                || lookup.contains(att)
                || meta.contains(&att.as_str())
            {
                return Err(EtlError::config(format!(
                    "dimension '{name}': type-1 attribute '{att}' must be a non-lookup, non-versioning attribute"
                )));
            }
        }
        Ok(())
    }
}

/// Type-2 slowly changing dimension.
pub struct SlowlyChangingDimension {
    base: CachedDimension,
    config: ScdConfig,
    tracked: Vec<String>,
    /// Attributes copied from the incoming row into a new version
    payload: Vec<String>,
}

impl SlowlyChangingDimension {
    pub fn new(store: Arc<dyn Store>, config: ScdConfig) -> EtlResult<Self> {
        config.validate()?;
        let mut base = CachedDimension::build(store, config.dimension.clone())?;
        let tracked = config.tracked_atts();
        let payload = config
            .dimension
            .attributes
            .iter()
            .filter(|a| !config.meta().contains(&a.as_str()))
            .cloned()
            .collect();
        if config.dimension.prefill {
            let toatt = config.toatt.clone();
            let maxto = config.maxto.clone();
            base.prefill_where(|row| row.get(&toatt).unwrap_or(&Value::Null) == &maxto)?;
        }
        Ok(Self {
            base,
            config,
            tracked,
            payload,
        })
    }

    pub fn config(&self) -> &ScdConfig {
        &self.config
    }

    pub fn cache_stats(&self) -> crate::dimension::CacheStats {
        self.base.cache_stats()
    }

    fn is_open(&self, version: &Row) -> bool {
        version.get(&self.config.toatt).unwrap_or(&Value::Null) == &self.config.maxto
    }

    fn key_of(&self, version: &Row) -> EtlResult<Value> {
        version.get(self.key()).cloned().ok_or_else(|| {
            EtlError::store(format!(
                "version row of '{}' has no key field '{}'",
                self.name(),
                self.key()
            ))
        })
    }

    fn from_of<'r>(&self, version: &'r Row) -> &'r Value {
        version.get(&self.config.fromatt).unwrap_or(&Value::Null)
    }

    fn version_of(version: &Row, att: &str) -> i64 {
        version.get(att).and_then(Value::to_int).unwrap_or(0)
    }

    fn versions_of(&self, tuple: &ValueTuple) -> EtlResult<Vec<Row>> {
        let mut versions = self
            .base
            .store()
            .find(self.name(), self.lookupatts(), tuple)?;
        let att = &self.config.versionatt;
        versions.sort_by_key(|v| Self::version_of(v, att));
        Ok(versions)
    }

    /// Latest version of a business key, open or closed.
    fn latest(&self, tuple: &ValueTuple) -> EtlResult<Option<Row>> {
        if let Some(key) = self.base.cache().get_key(tuple) {
            if let Some(row) = self.base.getbykey(&key)? {
                return Ok(Some(row));
            }
        }
        let latest = self.versions_of(tuple)?.pop();
        if let Some(version) = latest.as_ref().filter(|v| self.is_open(v)) {
            self.base.cache().put_key(tuple.clone(), self.key_of(version)?);
        }
        Ok(latest)
    }

    /// Version whose interval contains `date`.
    fn valid_at(&self, versions: &[Row], date: &Value) -> Option<Row> {
        versions
            .iter()
            .find(|v| {
                self.from_of(v) <= date
                    && (self.is_open(v) || date < v.get(&self.config.toatt).unwrap_or(&Value::Null))
            })
            .cloned()
    }

    fn refresh_row(&self, key: &Value) -> EtlResult<()> {
        if self.base.cache().caches_rows() {
            if let Some(row) = self.base.store().get_by_key(self.name(), self.key(), key)? {
                self.base.cache().put_row(key.clone(), row);
            }
        }
        Ok(())
    }

    fn update(&self, key: &Value, changes: &Row) -> EtlResult<()> {
        self.base.store().update(self.name(), self.key(), key, changes)?;
        self.refresh_row(key)
    }

    fn insert_version(
        &self,
        row: &mut Row,
        namemapping: &NameMapping,
        version: i64,
        from: Value,
    ) -> EtlResult<Value> {
        let mut stored = Row::from_iter(
            self.payload
                .iter()
                .cloned()
                .zip(row.values_of(&self.payload, namemapping)?),
        );
        stored.set(self.config.versionatt.clone(), version);
        stored.set(self.config.fromatt.clone(), from);
        stored.set(self.config.toatt.clone(), self.config.maxto.clone());
        let key = self.base.store_row(self.base.next_key()?, stored)?;
        row.set_mapped(self.key(), namemapping, key.clone());
        debug!(dimension = %self.name(), key = %key, version, "version inserted");
        Ok(key)
    }

    /// Overwrite type-1 attributes on every version when they changed.
    fn apply_type1(&self, row: &Row, namemapping: &NameMapping, current: &Row, tuple: &ValueTuple) -> EtlResult<()> {
        if self.config.type1atts.is_empty() {
            return Ok(());
        }
        let incoming = row.values_of(&self.config.type1atts, namemapping)?;
        let changes: Row = self
            .config
            .type1atts
            .iter()
            .zip(incoming)
            .filter(|(att, v)| current.get(att) != Some(v))
            .map(|(att, v)| (att.clone(), v))
            .collect();
        if changes.is_empty() {
            return Ok(());
        }
        for version in self.versions_of(tuple)? {
            self.update(&self.key_of(&version)?, &changes)?;
        }
        debug!(dimension = %self.name(), fields = changes.len(), "type-1 attributes overwritten");
        Ok(())
    }

    fn ensure_locked(&self, row: &mut Row, namemapping: &NameMapping, tuple: &ValueTuple) -> EtlResult<Value> {
        let date = row
            .get_mapped(&self.config.srcdateatt, namemapping)
            .filter(|v| !v.is_null())
            .cloned();
        let Some(current) = self.latest(tuple)? else {
            let from = date.unwrap_or_else(|| self.config.minfrom.clone());
            return self.insert_version(row, namemapping, 1, from);
        };
        let curkey = self.key_of(&current)?;
        let curfrom = self.from_of(&current).clone();
        let version = Self::version_of(&current, &self.config.versionatt);

        if let Some(d) = date.as_ref().filter(|d| **d < curfrom) {
            return self.resolve_out_of_order(row, namemapping, tuple, d);
        }

        if !self.is_open(&current) {
            let Some(d) = date else {
                return Err(self.missing_date());
            };
            let curto = current.get(&self.config.toatt).unwrap_or(&Value::Null);
            if d < *curto {
                return self.resolve_out_of_order(row, namemapping, tuple, &d);
            }
            return self.insert_version(row, namemapping, version + 1, d);
        }

        self.apply_type1(row, namemapping, &current, tuple)?;

        let incoming = row.values_of(&self.tracked, namemapping)?;
        let changes: Row = self
            .tracked
            .iter()
            .zip(incoming)
            .filter(|(att, v)| current.get(att) != Some(v))
            .map(|(att, v)| (att.clone(), v))
            .collect();
        if changes.is_empty() {
            row.set_mapped(self.key(), namemapping, curkey.clone());
            return Ok(curkey);
        }
        let Some(d) = date else {
            return Err(self.missing_date());
        };
        if d == curfrom {
            self.update(&curkey, &changes)?;
            debug!(dimension = %self.name(), key = %curkey, "open version updated in place");
            row.set_mapped(self.key(), namemapping, curkey.clone());
            return Ok(curkey);
        }
        let mut close = Row::new();
        close.set(self.config.toatt.clone(), d.clone());
        self.update(&curkey, &close)?;
        self.insert_version(row, namemapping, version + 1, d)
    }

    fn resolve_out_of_order(
        &self,
        row: &mut Row,
        namemapping: &NameMapping,
        tuple: &ValueTuple,
        date: &Value,
    ) -> EtlResult<Value> {
        let versions = self.versions_of(tuple)?;
        let version = match self.valid_at(&versions, date) {
            Some(v) => v,
            None => versions.into_iter().next().ok_or_else(|| {
                EtlError::store(format!("business key vanished from '{}'", self.name()))
            })?,
        };
        let key = self.key_of(&version)?;
        warn!(
            dimension = %self.name(),
            date = %date,
            key = %key,
            "out-of-order row resolved to an existing version"
        );
        row.set_mapped(self.key(), namemapping, key.clone());
        Ok(key)
    }

    fn missing_date(&self) -> EtlError {
        EtlError::config(format!(
            "dimension '{}': row has no value for '{}' but its business key is already versioned",
            self.name(),
            self.config.srcdateatt
        ))
    }

    /// Key of the version valid at `date`.
    pub fn lookup_as_of(&self, row: &Row, date: &Value, namemapping: &NameMapping) -> EtlResult<Option<Value>> {
        let tuple = self.base.lookup_tuple(row, namemapping)?;
        let versions = self.versions_of(&tuple)?;
        self.valid_at(&versions, date)
            .map(|v| self.key_of(&v))
            .transpose()
    }

    /// End the open version at `enddate` without starting a new one.
    /// Returns the closed version's key, or `None` if nothing was open.
    pub fn close_current(&self, row: &Row, enddate: impl Into<Value>, namemapping: &NameMapping) -> EtlResult<Option<Value>> {
        let enddate = enddate.into();
        let tuple = self.base.lookup_tuple(row, namemapping)?;
        self.base.locks().with_lock(&tuple, || {
            let Some(current) = self.latest(&tuple)?.filter(|v| self.is_open(v)) else {
                return Ok(None);
            };
            let key = self.key_of(&current)?;
            let mut close = Row::new();
            close.set(self.config.toatt.clone(), enddate);
            self.update(&key, &close)?;
            self.base.cache().remove_key(&tuple);
            debug!(dimension = %self.name(), key = %key, "open version closed");
            Ok(Some(key))
        })
    }

    /// Every version of the row's business key, oldest first.
    pub fn versions(&self, row: &Row, namemapping: &NameMapping) -> EtlResult<Vec<Row>> {
        let tuple = self.base.lookup_tuple(row, namemapping)?;
        self.versions_of(&tuple)
    }
}

impl DimensionTable for SlowlyChangingDimension {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn key(&self) -> &str {
        self.base.key()
    }

    fn attributes(&self) -> &[String] {
        self.base.attributes()
    }

    fn lookupatts(&self) -> &[String] {
        self.base.lookupatts()
    }

    /// Key of the open version.
    fn lookup(&self, row: &Row, namemapping: &NameMapping) -> EtlResult<Option<Value>> {
        let tuple = self.base.lookup_tuple(row, namemapping)?;
        let cache = self.base.cache();
        let found = match cache.get_key(&tuple) {
            Some(key) => Some(key),
            None if cache.is_complete(self.base.is_prefilled()) => None,
            None => match self.versions_of(&tuple)?.into_iter().find(|v| self.is_open(v)) {
                Some(open) => {
                    let key = self.key_of(&open)?;
                    cache.put_key(tuple, key.clone());
                    Some(key)
                }
                None => None,
            },
        };
        Ok(found.or_else(|| self.base.config().defaultidvalue.clone()))
    }

    /// Store a version row as given. Missing versioning fields default to
    /// version 1, the source date (or `minfrom`) and `maxto`.
    fn insert(&self, row: &mut Row, namemapping: &NameMapping) -> EtlResult<Value> {
        let mut stored = Row::from_iter(
            self.payload
                .iter()
                .cloned()
                .zip(row.values_of(&self.payload, namemapping)?),
        );
        let pick = |att: &str| {
            row.get_mapped(att, namemapping)
                .filter(|v| !v.is_null())
                .cloned()
        };
        let from = pick(&self.config.fromatt)
            .or_else(|| pick(&self.config.srcdateatt))
            .unwrap_or_else(|| self.config.minfrom.clone());
        stored.set(
            self.config.versionatt.clone(),
            pick(&self.config.versionatt).unwrap_or(Value::Int(1)),
        );
        stored.set(self.config.fromatt.clone(), from);
        stored.set(
            self.config.toatt.clone(),
            pick(&self.config.toatt).unwrap_or_else(|| self.config.maxto.clone()),
        );
        let keyvalue = match pick(self.key()) {
            Some(k) => k,
            None => self.base.next_key()?,
        };
        let open = self.is_open(&stored);
        let tuple = stored.values_of(self.lookupatts(), &NameMapping::new())?;
        let key = self.base.store_row(keyvalue, stored)?;
        if !open {
            self.base.cache().remove_key(&tuple);
        }
        row.set_mapped(self.key(), namemapping, key.clone());
        Ok(key)
    }

    fn ensure(&self, row: &mut Row, namemapping: &NameMapping) -> EtlResult<Value> {
        let tuple = self.base.lookup_tuple(row, namemapping)?;
        self.base
            .locks()
            .with_lock(&tuple, || self.ensure_locked(row, namemapping, &tuple))
    }

    fn getbykey(&self, keyvalue: &Value) -> EtlResult<Option<Row>> {
        self.base.getbykey(keyvalue)
    }

    fn is_versioned(&self) -> bool {
        true
    }

    fn reset_cache(&self) -> EtlResult<()> {
        self.base.reset_cache_where(|row| self.is_open(row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row;
    use crate::store::MemoryStore;

    fn page_config() -> ScdConfig {
        ScdConfig::new(
            DimensionConfig::new(
                "page",
                "pageid",
                ["url", "size", "serverversionid", "version", "validfrom", "validto"],
            )
            .with_lookupatts(["url"]),
            "lastmoddate",
        )
    }

    fn page(url: &str, size: i64, date: &str) -> Row {
        row! { "url" => url, "size" => size, "serverversionid" => 1, "lastmoddate" => date }
    }

    fn pages(store: &Arc<MemoryStore>) -> SlowlyChangingDimension {
        SlowlyChangingDimension::new(store.clone(), page_config()).unwrap()
    }

    fn assert_partition(versions: &[Row]) {
        for pair in versions.windows(2) {
            assert_eq!(pair[0].get("validto"), pair[1].get("validfrom"));
        }
        let open = versions.iter().filter(|v| v.get("validto") == Some(&Value::Null)).count();
        assert_eq!(open, 1);
        assert_eq!(versions.last().unwrap().get("validto"), Some(&Value::Null));
    }

    #[test]
    fn test_first_version() {
        let store = Arc::new(MemoryStore::new());
        let dim = pages(&store);
        let none = NameMapping::new();
        let mut row = page("http://a.org/", 100, "2024-01-01");
        let key = dim.ensure(&mut row, &none).unwrap();
        assert_eq!(row.get("pageid"), Some(&key));
        let stored = dim.getbykey(&key).unwrap().unwrap();
        assert_eq!(stored.get("version"), Some(&Value::Int(1)));
        assert_eq!(stored.get("validfrom"), Some(&Value::from("2024-01-01")));
        assert_eq!(stored.get("validto"), Some(&Value::Null));
        assert!(!stored.contains("lastmoddate"));
    }

    #[test]
    fn test_change_creates_new_version() {
        let store = Arc::new(MemoryStore::new());
        let dim = pages(&store);
        let none = NameMapping::new();
        let k1 = dim.ensure(&mut page("http://a.org/", 100, "2024-01-01"), &none).unwrap();
        let same = dim.ensure(&mut page("http://a.org/", 100, "2024-01-05"), &none).unwrap();
        assert_eq!(k1, same);
        let k2 = dim.ensure(&mut page("http://a.org/", 120, "2024-02-01"), &none).unwrap();
        assert_ne!(k1, k2);

        let versions = dim.versions(&row! { "url" => "http://a.org/" }, &none).unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[1].get("version"), Some(&Value::Int(2)));
        assert_eq!(versions[0].get("validto"), Some(&Value::from("2024-02-01")));
        assert_partition(&versions);
        assert_eq!(dim.lookup(&row! { "url" => "http://a.org/" }, &none).unwrap(), Some(k2));
    }

    #[test]
    fn test_later_date_without_change_keeps_open_version() {
        let store = Arc::new(MemoryStore::new());
        let dim = pages(&store);
        let none = NameMapping::new();
        let k1 = dim.ensure(&mut page("http://a.org/", 100, "2024-01-01"), &none).unwrap();
        for date in ["2024-02-01", "2024-06-30", "2025-01-01"] {
            let key = dim.ensure(&mut page("http://a.org/", 100, date), &none).unwrap();
            assert_eq!(key, k1);
        }
        assert_eq!(store.count("page").unwrap(), 1);
        let open = dim.getbykey(&k1).unwrap().unwrap();
        assert_eq!(open.get("validfrom"), Some(&Value::from("2024-01-01")));
        assert_eq!(open.get("validto"), Some(&Value::Null));
        assert_eq!(open.get("version"), Some(&Value::Int(1)));
    }

    #[test]
    fn test_same_date_updates_in_place() {
        let store = Arc::new(MemoryStore::new());
        let dim = pages(&store);
        let none = NameMapping::new();
        let k1 = dim.ensure(&mut page("http://a.org/", 100, "2024-01-01"), &none).unwrap();
        let k2 = dim.ensure(&mut page("http://a.org/", 150, "2024-01-01"), &none).unwrap();
        assert_eq!(k1, k2);
        assert_eq!(store.count("page").unwrap(), 1);
        let row = dim.getbykey(&k1).unwrap().unwrap();
        assert_eq!(row.get("size"), Some(&Value::Int(150)));
    }

    #[test]
    fn test_out_of_order_row_keeps_history() {
        let store = Arc::new(MemoryStore::new());
        let dim = pages(&store);
        let none = NameMapping::new();
        let k1 = dim.ensure(&mut page("http://a.org/", 100, "2024-01-01"), &none).unwrap();
        dim.ensure(&mut page("http://a.org/", 120, "2024-03-01"), &none).unwrap();
        let late = dim.ensure(&mut page("http://a.org/", 999, "2024-02-01"), &none).unwrap();
        assert_eq!(late, k1);
        assert_eq!(store.count("page").unwrap(), 2);
    }

    #[test]
    fn test_lookup_as_of() {
        let store = Arc::new(MemoryStore::new());
        let dim = pages(&store);
        let none = NameMapping::new();
        let k1 = dim.ensure(&mut page("u", 1, "2024-01-01"), &none).unwrap();
        let k2 = dim.ensure(&mut page("u", 2, "2024-02-01"), &none).unwrap();
        let key = row! { "url" => "u" };
        assert_eq!(dim.lookup_as_of(&key, &Value::from("2024-01-15"), &none).unwrap(), Some(k1));
        assert_eq!(dim.lookup_as_of(&key, &Value::from("2024-02-01"), &none).unwrap(), Some(k2.clone()));
        assert_eq!(dim.lookup_as_of(&key, &Value::from("2030-01-01"), &none).unwrap(), Some(k2));
        assert_eq!(dim.lookup_as_of(&key, &Value::from("2023-12-31"), &none).unwrap(), None);
    }

    #[test]
    fn test_close_current_then_reopen() {
        let store = Arc::new(MemoryStore::new());
        let dim = pages(&store);
        let none = NameMapping::new();
        let key = row! { "url" => "u" };
        let k1 = dim.ensure(&mut page("u", 1, "2024-01-01"), &none).unwrap();
        assert_eq!(dim.close_current(&key, "2024-02-01", &none).unwrap(), Some(k1));
        assert_eq!(dim.lookup(&key, &none).unwrap(), None);
        assert_eq!(dim.close_current(&key, "2024-03-01", &none).unwrap(), None);

        let k2 = dim.ensure(&mut page("u", 1, "2024-04-01"), &none).unwrap();
        let versions = dim.versions(&key, &none).unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[1].get("version"), Some(&Value::Int(2)));
        assert_eq!(dim.lookup(&key, &none).unwrap(), Some(k2));
    }

    #[test]
    fn test_type1_attributes_overwrite_all_versions() {
        let store = Arc::new(MemoryStore::new());
        let config = page_config().with_type1atts(["serverversionid"]);
        let dim = SlowlyChangingDimension::new(store.clone(), config).unwrap();
        let none = NameMapping::new();
        dim.ensure(&mut page("u", 1, "2024-01-01"), &none).unwrap();
        dim.ensure(&mut page("u", 2, "2024-02-01"), &none).unwrap();
        let mut moved = page("u", 2, "2024-03-01");
        moved.set("serverversionid", 7);
        dim.ensure(&mut moved, &none).unwrap();

        let versions = dim.versions(&row! { "url" => "u" }, &none).unwrap();
        assert_eq!(versions.len(), 2);
        assert!(versions
            .iter()
            .all(|v| v.get("serverversionid") == Some(&Value::Int(7))));
    }

    #[test]
    fn test_missing_date_uses_minfrom_for_new_key() {
        let store = Arc::new(MemoryStore::new());
        let dim = SlowlyChangingDimension::new(store.clone(), page_config().with_minfrom("1900-01-01")).unwrap();
        let none = NameMapping::new();
        let mut row = row! { "url" => "u", "size" => 1, "serverversionid" => 1 };
        let key = dim.ensure(&mut row, &none).unwrap();
        let stored = dim.getbykey(&key).unwrap().unwrap();
        assert_eq!(stored.get("validfrom"), Some(&Value::from("1900-01-01")));

        let mut changed = row! { "url" => "u", "size" => 2, "serverversionid" => 1 };
        assert!(dim.ensure(&mut changed, &none).unwrap_err().is_fatal_config());
    }

    #[test]
    fn test_config_validation() {
        let no_lookup = ScdConfig::new(
            DimensionConfig::new("page", "pageid", ["url", "version", "validfrom", "validto"]),
            "date",
        );
        assert!(no_lookup.validate().is_err());
        let missing_meta = ScdConfig::new(
            DimensionConfig::new("page", "pageid", ["url", "version"]).with_lookupatts(["url"]),
            "date",
        );
        assert!(missing_meta.validate().is_err());
        assert!(page_config().with_type1atts(["url"]).validate().is_err());
        assert_eq!(page_config().tracked_atts(), vec!["size", "serverversionid"]);
    }

    #[test]
    fn test_prefill_loads_open_versions_only() {
        let store = Arc::new(MemoryStore::new());
        {
            let dim = pages(&store);
            let none = NameMapping::new();
            dim.ensure(&mut page("u", 1, "2024-01-01"), &none).unwrap();
            dim.ensure(&mut page("u", 2, "2024-02-01"), &none).unwrap();
        }
        let mut config = page_config();
        config.dimension = config.dimension.with_prefill(true).with_cachesize(-1);
        let dim = SlowlyChangingDimension::new(store.clone(), config).unwrap();
        assert_eq!(dim.cache_stats().entries, 1);
        assert_eq!(
            dim.lookup(&row! { "url" => "u" }, &NameMapping::new()).unwrap(),
            Some(Value::Int(2))
        );
    }
}
