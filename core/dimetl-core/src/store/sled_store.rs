//! sled-backed persistent store.
//!
//! Each warehouse table maps to a separate sled `Tree`; rows are encoded
//! with bincode and keyed by their surrogate key. Writes are staged in an
//! in-memory overlay and reach sled only on `commit`, so `rollback` simply
//! drops the overlay. Reads consult the overlay first, then the tree.
//!
//! `find` is served from secondary indexes built per (table, attribute list)
//! on first use and kept current by every staged write. A rollback discards
//! the indexes of the tables it touched; they are rebuilt on the next lookup.

use crate::error::{EtlError, EtlResult};
use crate::row::{Row, Value};
use crate::store::Store;
use ahash::AHashMap;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{debug, info};

const INT_TAG: u8 = 0x01;
const OTHER_TAG: u8 = 0x02;

/// Order-preserving key encoding: integers sort numerically and before
/// every non-integer key.
fn encode_key(value: &Value) -> EtlResult<Vec<u8>> {
    match value {
        Value::Int(i) => {
            let mut out = Vec::with_capacity(9);
            out.push(INT_TAG);
            out.extend_from_slice(&((*i as u64) ^ (1 << 63)).to_be_bytes());
            Ok(out)
        }
        other => {
            let mut out = vec![OTHER_TAG];
            out.extend(bincode::serialize(other)?);
            Ok(out)
        }
    }
}

fn decode_int_key(bytes: &[u8]) -> Option<i64> {
    if bytes.len() != 9 || bytes[0] != INT_TAG {
        return None;
    }
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[1..]);
    Some((u64::from_be_bytes(raw) ^ (1 << 63)) as i64)
}

/// Staged writes for one table, keyed by encoded surrogate key.
type Overlay = HashMap<String, BTreeMap<Vec<u8>, Row>>;

/// attribute list → (values → encoded keys, ascending)
type TableIndexes = HashMap<Vec<String>, AHashMap<Vec<Value>, Vec<Vec<u8>>>>;

fn tuple(row: &Row, atts: &[String]) -> Vec<Value> {
    atts.iter()
        .map(|a| row.get(a).cloned().unwrap_or_default())
        .collect()
}

fn add_key(keys: &mut Vec<Vec<u8>>, encoded: &[u8]) {
    if let Err(at) = keys.binary_search_by(|k| k.as_slice().cmp(encoded)) {
        keys.insert(at, encoded.to_vec());
    }
}

/// Persistent [`Store`] on top of sled.
pub struct SledStore {
    db: sled::Db,
    pending: Mutex<Overlay>,
    // lock order: indexes before pending
    indexes: Mutex<HashMap<String, TableIndexes>>,
}

impl SledStore {
    /// Open the store at the given directory path.
    pub fn open(path: &Path) -> EtlResult<Self> {
        let db = sled::open(path)?;
        Ok(Self {
            db,
            pending: Mutex::new(HashMap::new()),
            indexes: Mutex::new(HashMap::new()),
        })
    }

    /// Open a temporary store (for testing). Data is deleted on drop.
    pub fn open_temporary() -> EtlResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self {
            db,
            pending: Mutex::new(HashMap::new()),
            indexes: Mutex::new(HashMap::new()),
        })
    }

    fn tree(&self, table: &str) -> EtlResult<sled::Tree> {
        Ok(self.db.open_tree(table)?)
    }

    /// Committed and staged rows of a table, merged and ordered by key.
    fn merged(&self, table: &str) -> EtlResult<BTreeMap<Vec<u8>, Row>> {
        let mut rows = BTreeMap::new();
        for item in self.tree(table)?.iter() {
            let (k, v) = item?;
            rows.insert(k.to_vec(), bincode::deserialize::<Row>(&v)?);
        }
        if let Some(staged) = self.pending.lock().get(table) {
            for (k, row) in staged {
                rows.insert(k.clone(), row.clone());
            }
        }
        Ok(rows)
    }

    fn read(&self, table: &str, encoded: &[u8]) -> EtlResult<Option<Row>> {
        if let Some(row) = self.pending.lock().get(table).and_then(|t| t.get(encoded)) {
            return Ok(Some(row.clone()));
        }
        match self.tree(table)?.get(encoded)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Encoded keys of the rows whose `atts` equal `values`, in key order.
    fn index_lookup(
        &self,
        table: &str,
        atts: &[String],
        values: &[Value],
    ) -> EtlResult<Vec<Vec<u8>>> {
        let mut indexes = self.indexes.lock();
        let table_indexes = indexes.entry(table.to_string()).or_default();
        if !table_indexes.contains_key(atts) {
            let mut idx: AHashMap<Vec<Value>, Vec<Vec<u8>>> = AHashMap::new();
            for (k, row) in self.merged(table)? {
                idx.entry(tuple(&row, atts)).or_default().push(k);
            }
            debug!(table, atts = ?atts, entries = idx.len(), "sled index built");
            table_indexes.insert(atts.to_vec(), idx);
        }
        Ok(table_indexes
            .get(atts)
            .and_then(|idx| idx.get(values))
            .cloned()
            .unwrap_or_default())
    }

    fn stage(&self, table: &str, encoded: Vec<u8>, old: Option<&Row>, row: Row) {
        if let Some(table_indexes) = self.indexes.lock().get_mut(table) {
            for (atts, idx) in table_indexes.iter_mut() {
                let after = tuple(&row, atts);
                if let Some(old) = old {
                    let before = tuple(old, atts);
                    if before == after {
                        continue;
                    }
                    if let Some(keys) = idx.get_mut(&before) {
                        keys.retain(|k| *k != encoded);
                    }
                }
                add_key(idx.entry(after).or_default(), &encoded);
            }
        }
        self.pending
            .lock()
            .entry(table.to_string())
            .or_default()
            .insert(encoded, row);
    }

    fn next_int_key(&self, table: &str) -> EtlResult<i64> {
        let committed = self
            .tree(table)?
            .range(..vec![OTHER_TAG])
            .next_back()
            .transpose()?
            .and_then(|(k, _)| decode_int_key(&k));
        let staged = self
            .pending
            .lock()
            .get(table)
            .and_then(|t| t.range(..vec![OTHER_TAG]).next_back())
            .and_then(|(k, _)| decode_int_key(k));
        Ok(committed.max(staged).map_or(1, |m| m + 1))
    }

    /// Number of staged (uncommitted) rows across all tables.
    pub fn pending_rows(&self) -> usize {
        self.pending.lock().values().map(BTreeMap::len).sum()
    }
}

impl Store for SledStore {
    fn find(&self, table: &str, atts: &[String], values: &[Value]) -> EtlResult<Vec<Row>> {
        let mut rows = Vec::new();
        for encoded in self.index_lookup(table, atts, values)? {
            // a concurrent rollback may have dropped the row since the lookup
            if let Some(row) = self.read(table, &encoded)? {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    fn get_by_key(&self, table: &str, _key: &str, keyvalue: &Value) -> EtlResult<Option<Row>> {
        self.read(table, &encode_key(keyvalue)?)
    }

    fn insert(&self, table: &str, key: &str, row: &Row) -> EtlResult<Value> {
        let mut row = row.clone();
        let keyvalue = match row.get(key) {
            Some(v) if !v.is_null() => v.clone(),
            _ => {
                let next = Value::Int(self.next_int_key(table)?);
                row.set(key, next.clone());
                next
            }
        };
        let encoded = encode_key(&keyvalue)?;
        if self.read(table, &encoded)?.is_some() {
            return Err(EtlError::ConstraintViolation(format!(
                "duplicate key {key}={keyvalue} in table '{table}'"
            )));
        }
        self.stage(table, encoded, None, row);
        Ok(keyvalue)
    }

    fn update(&self, table: &str, key: &str, keyvalue: &Value, changes: &Row) -> EtlResult<()> {
        let encoded = encode_key(keyvalue)?;
        let old = self.read(table, &encoded)?.ok_or_else(|| {
            EtlError::store(format!("no row with {key}={keyvalue} in table '{table}'"))
        })?;
        let mut row = old.clone();
        row.merge(changes);
        self.stage(table, encoded, Some(&old), row);
        Ok(())
    }

    fn scan(&self, table: &str) -> EtlResult<Vec<Row>> {
        Ok(self.merged(table)?.into_values().collect())
    }

    fn max_key(&self, table: &str, _key: &str) -> EtlResult<Option<i64>> {
        let next = self.next_int_key(table)?;
        Ok((next > 1).then_some(next - 1))
    }

    fn count(&self, table: &str) -> EtlResult<usize> {
        let tree = self.tree(table)?;
        let mut count = tree.len();
        if let Some(staged) = self.pending.lock().get(table) {
            for k in staged.keys() {
                if !tree.contains_key(k)? {
                    count += 1;
                }
            }
        }
        Ok(count)
    }

    fn bulk_load(&self, table: &str, columns: &[String], rows: &[Row]) -> EtlResult<()> {
        for row in rows {
            // sled ids are monotonic, so load order is preserved in key order
            let id = self.db.generate_id()? as i64;
            let projected = row.project(columns, &Default::default());
            self.stage(table, encode_key(&Value::Int(id))?, None, projected);
        }
        debug!(table, rows = rows.len(), "bulk load staged");
        Ok(())
    }

    fn commit(&self) -> EtlResult<()> {
        let staged = std::mem::take(&mut *self.pending.lock());
        let mut written = 0usize;
        for (table, rows) in &staged {
            let mut batch = sled::Batch::default();
            for (k, row) in rows {
                batch.insert(k.as_slice(), bincode::serialize(row)?);
                written += 1;
            }
            self.tree(table)?.apply_batch(batch)?;
        }
        self.db.flush()?;
        info!(tables = staged.len(), rows = written, "sled store committed");
        Ok(())
    }

    fn rollback(&self) -> EtlResult<()> {
        let dropped = std::mem::take(&mut *self.pending.lock());
        let mut indexes = self.indexes.lock();
        for table in dropped.keys() {
            indexes.remove(table);
        }
        drop(indexes);
        info!(tables = dropped.len(), "sled store rolled back");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row;

    #[test]
    fn test_int_key_encoding_orders_numerically() {
        let a = encode_key(&Value::Int(-5)).unwrap();
        let b = encode_key(&Value::Int(3)).unwrap();
        let c = encode_key(&Value::Int(300)).unwrap();
        let t = encode_key(&Value::from("x")).unwrap();
        assert!(a < b && b < c && c < t);
        assert_eq!(decode_int_key(&c), Some(300));
        assert_eq!(decode_int_key(&t), None);
    }

    #[test]
    fn test_insert_visible_before_commit() {
        let store = SledStore::open_temporary().unwrap();
        store
            .insert("server", "serverid", &row! { "serverid" => 1, "server" => "nginx" })
            .unwrap();
        assert_eq!(store.count("server").unwrap(), 1);
        assert_eq!(store.pending_rows(), 1);
        let atts = vec!["server".to_string()];
        assert_eq!(
            store.lookup("server", "serverid", &atts, &[Value::from("nginx")]).unwrap(),
            Some(Value::Int(1))
        );
    }

    #[test]
    fn test_commit_persists_and_rollback_discards() {
        let store = SledStore::open_temporary().unwrap();
        store.insert("t", "id", &row! { "id" => 1 }).unwrap();
        store.commit().unwrap();
        assert_eq!(store.pending_rows(), 0);

        store.insert("t", "id", &row! { "id" => 2 }).unwrap();
        store.rollback().unwrap();
        assert_eq!(store.count("t").unwrap(), 1);
        assert_eq!(store.max_key("t", "id").unwrap(), Some(1));
    }

    #[test]
    fn test_update_merges_fields() {
        let store = SledStore::open_temporary().unwrap();
        store
            .insert("page", "pageid", &row! { "pageid" => 1, "url" => "u", "validto" => Value::Null })
            .unwrap();
        store.commit().unwrap();
        store
            .update("page", "pageid", &Value::Int(1), &row! { "validto" => "2024-03-01" })
            .unwrap();
        let row = store.get_by_key("page", "pageid", &Value::Int(1)).unwrap().unwrap();
        assert_eq!(row.get("validto"), Some(&Value::from("2024-03-01")));
        assert_eq!(row.get("url"), Some(&Value::from("u")));
    }

    #[test]
    fn test_find_follows_writes_after_index_built() {
        let store = SledStore::open_temporary().unwrap();
        let atts = vec!["url".to_string()];
        let find = |url: &str| -> Vec<i64> {
            store
                .find("page", &atts, &[Value::from(url)])
                .unwrap()
                .iter()
                .filter_map(|r| r.get("pageid").and_then(Value::to_int))
                .collect()
        };
        store.insert("page", "pageid", &row! { "pageid" => 2, "url" => "/a" }).unwrap();
        store.commit().unwrap();
        assert_eq!(find("/a"), vec![2]);

        store.insert("page", "pageid", &row! { "pageid" => 1, "url" => "/a" }).unwrap();
        store.insert("page", "pageid", &row! { "pageid" => 3, "url" => "/b" }).unwrap();
        assert_eq!(find("/a"), vec![1, 2]);
        assert_eq!(find("/b"), vec![3]);

        store
            .update("page", "pageid", &Value::Int(2), &row! { "url" => "/b" })
            .unwrap();
        assert_eq!(find("/a"), vec![1]);
        assert_eq!(find("/b"), vec![2, 3]);

        store.rollback().unwrap();
        assert_eq!(find("/a"), vec![2]);
        assert!(find("/b").is_empty());

        store.insert("page", "pageid", &row! { "pageid" => 4, "url" => "/a" }).unwrap();
        store.commit().unwrap();
        assert_eq!(find("/a"), vec![2, 4]);
    }

    #[test]
    fn test_bulk_load_preserves_order() {
        let store = SledStore::open_temporary().unwrap();
        let cols = vec!["n".to_string()];
        let rows: Vec<Row> = (0..5).map(|n| row! { "n" => n }).collect();
        store.bulk_load("facts", &cols, &rows).unwrap();
        store.commit().unwrap();
        let loaded: Vec<i64> = store
            .scan("facts")
            .unwrap()
            .iter()
            .filter_map(|r| r.get("n").and_then(Value::to_int))
            .collect();
        assert_eq!(loaded, vec![0, 1, 2, 3, 4]);
    }
}
