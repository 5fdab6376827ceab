//! In-memory store backend
//!
//! Each table is a vector of rows in insertion order plus hash indexes over
//! the surrogate key and over every attribute list that has been queried.
//! Writes go to a working copy; `commit` snapshots it and `rollback`
//! restores the last snapshot.

use crate::error::{EtlError, EtlResult};
use crate::row::{Row, Value};
use crate::store::Store;
use ahash::AHashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, Default)]
struct MemTable {
    rows: Vec<Row>,
    /// surrogate key field → (key value → row index)
    by_key: HashMap<String, AHashMap<Value, usize>>,
    /// attribute list → (values → row indexes)
    indexes: HashMap<Vec<String>, AHashMap<Vec<Value>, Vec<usize>>>,
}

impl MemTable {
    fn tuple(row: &Row, atts: &[String]) -> Vec<Value> {
        atts.iter()
            .map(|a| row.get(a).cloned().unwrap_or_default())
            .collect()
    }

    fn index(&mut self, atts: &[String]) -> &AHashMap<Vec<Value>, Vec<usize>> {
        let rows = &self.rows;
        self.indexes.entry(atts.to_vec()).or_insert_with(|| {
            let mut idx: AHashMap<Vec<Value>, Vec<usize>> = AHashMap::new();
            for (i, row) in rows.iter().enumerate() {
                idx.entry(Self::tuple(row, atts)).or_default().push(i);
            }
            idx
        })
    }

    fn key_index(&mut self, key: &str) -> &mut AHashMap<Value, usize> {
        let rows = &self.rows;
        self.by_key.entry(key.to_string()).or_insert_with(|| {
            rows.iter()
                .enumerate()
                .filter_map(|(i, r)| r.get(key).map(|v| (v.clone(), i)))
                .collect()
        })
    }

    fn push(&mut self, row: Row) {
        let pos = self.rows.len();
        for (atts, idx) in self.indexes.iter_mut() {
            idx.entry(Self::tuple(&row, atts)).or_default().push(pos);
        }
        for (key, idx) in self.by_key.iter_mut() {
            if let Some(v) = row.get(key) {
                idx.insert(v.clone(), pos);
            }
        }
        self.rows.push(row);
    }

    fn replace(&mut self, pos: usize, row: Row) {
        let old = std::mem::replace(&mut self.rows[pos], row);
        let new = &self.rows[pos];
        for (atts, idx) in self.indexes.iter_mut() {
            let before = Self::tuple(&old, atts);
            let after = Self::tuple(new, atts);
            if before == after {
                continue;
            }
            if let Some(list) = idx.get_mut(&before) {
                list.retain(|&i| i != pos);
            }
            let list = idx.entry(after).or_default();
            // keep insertion order within a bucket
            let at = list.partition_point(|&i| i < pos);
            list.insert(at, pos);
        }
    }
}

/// In-memory [`Store`] with snapshot commit/rollback.
pub struct MemoryStore {
    working: RwLock<HashMap<String, MemTable>>,
    committed: RwLock<HashMap<String, MemTable>>,
    available: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            working: RwLock::new(HashMap::new()),
            committed: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate losing (or regaining) the connection. While unavailable every
    /// operation fails with [`EtlError::StoreUnavailable`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check(&self) -> EtlResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(EtlError::StoreUnavailable(
                "in-memory store is offline".to_string(),
            ))
        }
    }

    /// Names of all tables that hold at least one row.
    pub fn table_names(&self) -> Vec<String> {
        let tables = self.working.read();
        let mut names: Vec<String> = tables
            .iter()
            .filter(|(_, t)| !t.rows.is_empty())
            .map(|(n, _)| n.clone())
            .collect();
        names.sort();
        names
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for MemoryStore {
    fn find(&self, table: &str, atts: &[String], values: &[Value]) -> EtlResult<Vec<Row>> {
        self.check()?;
        let mut tables = self.working.write();
        let Some(t) = tables.get_mut(table) else {
            return Ok(Vec::new());
        };
        let hits = t.index(atts).get(values).cloned().unwrap_or_default();
        Ok(hits.into_iter().map(|i| t.rows[i].clone()).collect())
    }

    fn get_by_key(&self, table: &str, key: &str, keyvalue: &Value) -> EtlResult<Option<Row>> {
        self.check()?;
        let mut tables = self.working.write();
        let Some(t) = tables.get_mut(table) else {
            return Ok(None);
        };
        let pos = t.key_index(key).get(keyvalue).copied();
        Ok(pos.map(|i| t.rows[i].clone()))
    }

    fn insert(&self, table: &str, key: &str, row: &Row) -> EtlResult<Value> {
        self.check()?;
        let mut tables = self.working.write();
        let t = tables.entry(table.to_string()).or_default();

        let mut row = row.clone();
        let keyvalue = match row.get(key) {
            Some(v) if !v.is_null() => v.clone(),
            _ => {
                let next = t
                    .key_index(key)
                    .keys()
                    .filter_map(Value::to_int)
                    .max()
                    .map_or(1, |m| m + 1);
                row.set(key, next);
                Value::Int(next)
            }
        };
        if t.key_index(key).contains_key(&keyvalue) {
            return Err(EtlError::ConstraintViolation(format!(
                "duplicate key {key}={keyvalue} in table '{table}'"
            )));
        }
        t.push(row);
        Ok(keyvalue)
    }

    fn update(&self, table: &str, key: &str, keyvalue: &Value, changes: &Row) -> EtlResult<()> {
        self.check()?;
        let mut tables = self.working.write();
        let t = tables
            .get_mut(table)
            .ok_or_else(|| EtlError::store(format!("table '{table}' not found")))?;
        let pos = t.key_index(key).get(keyvalue).copied().ok_or_else(|| {
            EtlError::store(format!("no row with {key}={keyvalue} in table '{table}'"))
        })?;
        let mut row = t.rows[pos].clone();
        row.merge(changes);
        t.replace(pos, row);
        Ok(())
    }

    fn scan(&self, table: &str) -> EtlResult<Vec<Row>> {
        self.check()?;
        let tables = self.working.read();
        Ok(tables.get(table).map(|t| t.rows.clone()).unwrap_or_default())
    }

    fn count(&self, table: &str) -> EtlResult<usize> {
        self.check()?;
        let tables = self.working.read();
        Ok(tables.get(table).map(|t| t.rows.len()).unwrap_or(0))
    }

    fn bulk_load(&self, table: &str, columns: &[String], rows: &[Row]) -> EtlResult<()> {
        self.check()?;
        let mut tables = self.working.write();
        let t = tables.entry(table.to_string()).or_default();
        for row in rows {
            t.push(row.project(columns, &Default::default()));
        }
        Ok(())
    }

    fn commit(&self) -> EtlResult<()> {
        self.check()?;
        let snapshot = self.working.read().clone();
        *self.committed.write() = snapshot;
        Ok(())
    }

    fn rollback(&self) -> EtlResult<()> {
        self.check()?;
        let snapshot = self.committed.read().clone();
        *self.working.write() = snapshot;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row;

    fn atts(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_insert_and_lookup() {
        let store = MemoryStore::new();
        let key = store
            .insert("server", "serverid", &row! { "serverid" => 1, "server" => "nginx" })
            .unwrap();
        assert_eq!(key, Value::Int(1));

        let found = store
            .lookup("server", "serverid", &atts(&["server"]), &[Value::from("nginx")])
            .unwrap();
        assert_eq!(found, Some(Value::Int(1)));
        assert_eq!(
            store
                .lookup("server", "serverid", &atts(&["server"]), &[Value::from("apache")])
                .unwrap(),
            None
        );
    }

    #[test]
    fn test_store_assigns_missing_key() {
        let store = MemoryStore::new();
        store.insert("t", "id", &row! { "id" => 7, "a" => 1 }).unwrap();
        let key = store.insert("t", "id", &row! { "a" => 2 }).unwrap();
        assert_eq!(key, Value::Int(8));
        assert_eq!(store.max_key("t", "id").unwrap(), Some(8));
    }

    #[test]
    fn test_duplicate_key_is_constraint_violation() {
        let store = MemoryStore::new();
        store.insert("t", "id", &row! { "id" => 1 }).unwrap();
        let err = store.insert("t", "id", &row! { "id" => 1 }).unwrap_err();
        assert!(matches!(err, EtlError::ConstraintViolation(_)));
    }

    #[test]
    fn test_update_maintains_indexes() {
        let store = MemoryStore::new();
        store
            .insert("page", "pageid", &row! { "pageid" => 1, "url" => "u", "validto" => Value::Null })
            .unwrap();
        // build the index before the update
        assert_eq!(
            store.find("page", &atts(&["validto"]), &[Value::Null]).unwrap().len(),
            1
        );
        store
            .update("page", "pageid", &Value::Int(1), &row! { "validto" => "2024-02-01" })
            .unwrap();
        assert!(store.find("page", &atts(&["validto"]), &[Value::Null]).unwrap().is_empty());
        assert_eq!(
            store
                .find("page", &atts(&["validto"]), &[Value::from("2024-02-01")])
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_rollback_restores_snapshot() {
        let store = MemoryStore::new();
        store.insert("t", "id", &row! { "id" => 1 }).unwrap();
        store.commit().unwrap();
        store.insert("t", "id", &row! { "id" => 2 }).unwrap();
        assert_eq!(store.count("t").unwrap(), 2);
        store.rollback().unwrap();
        assert_eq!(store.count("t").unwrap(), 1);
    }

    #[test]
    fn test_bulk_load_projects_columns_in_order() {
        let store = MemoryStore::new();
        let cols = atts(&["pageid", "errors"]);
        store
            .bulk_load(
                "facts",
                &cols,
                &[row! { "errors" => 3, "pageid" => 1, "noise" => "x" }],
            )
            .unwrap();
        let rows = store.scan("facts").unwrap();
        assert_eq!(rows[0].names().collect::<Vec<_>>(), vec!["pageid", "errors"]);
    }

    #[test]
    fn test_unavailable_store_fails() {
        let store = MemoryStore::new();
        store.set_available(false);
        let err = store.count("t").unwrap_err();
        assert!(matches!(err, EtlError::StoreUnavailable(_)));
        assert!(err.is_store_error());
    }
}
