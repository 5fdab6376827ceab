// End-to-end pipeline tests: sources → dimensions → bulk fact table → commit

use dimetl_core::{
    BulkConfig, BulkFactTable, CachedDimension, ConnectionWrapper, DataSource, DelimitedConfig,
    DelimitedFileLoader, DelimitedSource, DimensionConfig, DimensionTable, EtlError, EtlResult,
    FactConfig, HashJoinSource, MemorySource, MemoryStore, NameMapping, Row, ScdConfig,
    SledStore, SlowlyChangingDimension, SnowflakeBuilder, SnowflakedDimension, Store,
    StoreLoader, Value, WarehouseConfig, row,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tempfile::tempdir;

// ─── Helpers ────────────────────────────────────────────

fn downloads() -> MemorySource {
    [
        ("nginx", "/a", 10, 1, 0),
        ("apache", "/b", 20, 1, 2),
        ("nginx", "/a", 12, 5, 1),
        ("nginx", "/c", 5, 2, 0),
    ]
    .into_iter()
    .map(|(server, url, size, lastmod, errors)| {
        row! {
            "server" => server,
            "url" => url,
            "size" => size,
            "lastmod" => lastmod,
            "errors" => errors,
        }
    })
    .collect()
}

/// One complete load with freshly constructed tables, as a rerun would do.
fn run_pipeline(store: Arc<dyn Store>) -> EtlResult<Vec<(Value, Value)>> {
    let conn = ConnectionWrapper::new(store);
    let servers = CachedDimension::new(
        conn.store(),
        DimensionConfig::new("server", "serverid", ["server"]),
    )?;
    let pages = SlowlyChangingDimension::new(
        conn.store(),
        ScdConfig::new(
            DimensionConfig::new("page", "pageid", ["url", "size", "version", "validfrom", "validto"])
                .with_lookupatts(["url"]),
            "lastmod",
        ),
    )?;
    let mut facts = BulkFactTable::new(
        FactConfig::new("hits", ["serverid", "pageid"]).with_measures(["errors"]),
        BulkConfig::default().with_bulksize(3),
        StoreLoader::new(conn.store()),
    )?;

    let mut keys = Vec::new();
    for row in downloads().rows() {
        let mut row = row?;
        let serverid = servers.ensure(&mut row, &NameMapping::new())?;
        let pageid = pages.ensure(&mut row, &NameMapping::new())?;
        facts.insert(&row, &NameMapping::new())?;
        keys.push((serverid, pageid));
    }
    conn.commit(&mut [&mut facts])?;
    Ok(keys)
}

fn counts(store: &dyn Store) -> EtlResult<(usize, usize, usize)> {
    Ok((store.count("server")?, store.count("page")?, store.count("hits")?))
}

// ═══════════════════════════════════════════════════════════
// Rerun behaviour
// ═══════════════════════════════════════════════════════════

#[test]
fn test_rerun_is_deterministic_for_dimensions() -> EtlResult<()> {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());

    let first = run_pipeline(Arc::clone(&store))?;
    assert_eq!(counts(store.as_ref())?, (2, 4, 4));

    let second = run_pipeline(Arc::clone(&store))?;
    assert_eq!(first, second);
    // fact inserts are not idempotent
    assert_eq!(counts(store.as_ref())?, (2, 4, 8));
    Ok(())
}

#[test]
fn test_rerun_on_sled_store() -> EtlResult<()> {
    let dir = tempdir()?;
    let store: Arc<dyn Store> = Arc::new(SledStore::open(dir.path())?);

    let first = run_pipeline(Arc::clone(&store))?;
    let second = run_pipeline(Arc::clone(&store))?;
    assert_eq!(first, second);
    assert_eq!(counts(store.as_ref())?, (2, 4, 8));

    // the second version of '/a' starts where the first one ends
    let atts = vec!["url".to_string()];
    let mut versions = store.find("page", &atts, &[Value::from("/a")])?;
    versions.sort_by_key(|v| v.get("version").and_then(Value::to_int));
    assert_eq!(versions.len(), 2);
    assert_eq!(versions[0].get("validto"), versions[1].get("validfrom"));
    assert_eq!(versions[1].get("validto"), Some(&Value::Null));
    Ok(())
}

#[test]
fn test_failed_load_is_rolled_back() -> EtlResult<()> {
    let store = Arc::new(MemoryStore::new());
    let conn = ConnectionWrapper::new(store.clone());
    let servers = CachedDimension::new(
        conn.store(),
        DimensionConfig::new("server", "serverid", ["server"]),
    )?;
    let mut facts = BulkFactTable::new(
        FactConfig::new("hits", ["serverid"]),
        BulkConfig::default(),
        |_: &dimetl_core::BulkLoadRequest<'_>| -> EtlResult<()> {
            Err(EtlError::store("copy refused"))
        },
    )?;
    for row in downloads().rows() {
        let mut row = row?;
        servers.ensure(&mut row, &NameMapping::new())?;
        facts.insert(&row, &NameMapping::new())?;
    }
    let err = conn.commit(&mut [&mut facts]).unwrap_err();
    assert!(matches!(err, EtlError::BulkLoad { .. }));
    assert_eq!(facts.pending(), 4);

    conn.rollback(&[&servers])?;
    assert_eq!(store.count("server")?, 0);
    Ok(())
}

#[test]
fn test_retry_after_rollback_reinserts_dimension_rows() -> EtlResult<()> {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    store.insert("host", "hostid", &row! { "hostid" => 1, "host" => "db1" })?;
    store.commit()?;

    let conn = ConnectionWrapper::new(Arc::clone(&store));
    let servers = CachedDimension::new(
        conn.store(),
        DimensionConfig::new("server", "serverid", ["server"]),
    )?;
    let prefilled = CachedDimension::new(
        conn.store(),
        DimensionConfig::new("host", "hostid", ["host"]).with_prefill(true),
    )?;
    let pages = SlowlyChangingDimension::new(
        conn.store(),
        ScdConfig::new(
            DimensionConfig::new("page", "pageid", ["url", "size", "version", "validfrom", "validto"])
                .with_lookupatts(["url"]),
            "lastmod",
        ),
    )?;

    let mut row = row! { "server" => "nginx", "url" => "/a", "size" => 1, "lastmod" => 1 };
    servers.ensure(&mut row, &NameMapping::new())?;
    prefilled.ensure(&mut row! { "host" => "web1" }, &NameMapping::new())?;
    pages.ensure(&mut row, &NameMapping::new())?;
    assert_eq!(store.count("server")?, 1);
    assert_eq!(store.count("host")?, 2);

    conn.rollback(&[&servers, &prefilled, &pages])?;
    assert_eq!(store.count("server")?, 0);
    assert_eq!(store.count("host")?, 1);
    assert_eq!(store.count("page")?, 0);

    // the retried load must store every row it hands out a key for
    let mut retry = row! { "server" => "nginx", "url" => "/a", "size" => 1, "lastmod" => 1 };
    let serverid = servers.ensure(&mut retry, &NameMapping::new())?;
    let hostid = prefilled.ensure(&mut row! { "host" => "web1" }, &NameMapping::new())?;
    let pageid = pages.ensure(&mut retry, &NameMapping::new())?;
    assert!(servers.getbykey(&serverid)?.is_some());
    assert!(prefilled.getbykey(&hostid)?.is_some());
    assert!(pages.getbykey(&pageid)?.is_some());
    assert_eq!(store.count("server")?, 1);
    assert_eq!(store.count("host")?, 2);
    assert_eq!(store.count("page")?, 1);

    // committed rows survive the reload of a prefilled cache
    assert_eq!(
        prefilled.lookup(&row! { "host" => "db1" }, &NameMapping::new())?,
        Some(Value::Int(1))
    );
    Ok(())
}

// ═══════════════════════════════════════════════════════════
// Snowflake resolution order
// ═══════════════════════════════════════════════════════════

/// Dimension that records when it was asked to ensure a row and refuses
/// rows that still lack one of its foreign keys.
struct Recording {
    name: String,
    key: String,
    attributes: Vec<String>,
    foreign_keys: Vec<String>,
    keyvalue: i64,
    calls: Arc<Mutex<Vec<String>>>,
}

impl Recording {
    fn new(
        name: &str,
        foreign_keys: &[&str],
        keyvalue: i64,
        calls: &Arc<Mutex<Vec<String>>>,
    ) -> Arc<dyn DimensionTable> {
        let foreign_keys: Vec<String> = foreign_keys.iter().map(|s| s.to_string()).collect();
        let mut attributes = vec![name.to_string()];
        attributes.extend(foreign_keys.iter().cloned());
        Arc::new(Self {
            name: name.to_string(),
            key: format!("{name}id"),
            attributes,
            foreign_keys,
            keyvalue,
            calls: Arc::clone(calls),
        })
    }
}

impl DimensionTable for Recording {
    fn name(&self) -> &str {
        &self.name
    }

    fn key(&self) -> &str {
        &self.key
    }

    fn attributes(&self) -> &[String] {
        &self.attributes
    }

    fn lookupatts(&self) -> &[String] {
        &self.attributes
    }

    fn lookup(&self, _row: &Row, _namemapping: &NameMapping) -> EtlResult<Option<Value>> {
        Ok(Some(Value::Int(self.keyvalue)))
    }

    fn insert(&self, row: &mut Row, namemapping: &NameMapping) -> EtlResult<Value> {
        self.ensure(row, namemapping)
    }

    fn ensure(&self, row: &mut Row, namemapping: &NameMapping) -> EtlResult<Value> {
        if let Some(fk) = self.foreign_keys.iter().find(|fk| !row.contains(fk)) {
            return Err(EtlError::config(format!("{} ensured before {fk}", self.name)));
        }
        self.calls.lock().push(self.name.clone());
        row.set_mapped(&self.key, namemapping, self.keyvalue);
        Ok(Value::Int(self.keyvalue))
    }

    fn getbykey(&self, _keyvalue: &Value) -> EtlResult<Option<Row>> {
        Ok(None)
    }
}

#[test]
fn test_snowflake_resolves_bottom_up() -> EtlResult<()> {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let page = Recording::new("page", &["serverversionid", "domainid"], 100, &calls);
    let serverversion = Recording::new("serverversion", &["serverid"], 10, &calls);
    let domain = Recording::new("domain", &["topleveldomainid"], 20, &calls);
    let server = Recording::new("server", &[], 1, &calls);
    let topleveldomain = Recording::new("topleveldomain", &[], 2, &calls);

    let snowflake = SnowflakedDimension::new(vec![
        (page, vec![Arc::clone(&serverversion), Arc::clone(&domain)]),
        (serverversion, vec![server]),
        (domain, vec![topleveldomain]),
    ])?;
    assert_eq!(
        snowflake.levels(),
        vec![
            vec!["server", "topleveldomain"],
            vec!["serverversion", "domain"],
            vec!["page"],
        ]
    );

    let mut row = row! { "page" => "/index.html" };
    assert_eq!(snowflake.ensure(&mut row, &NameMapping::new())?, Value::Int(100));
    assert_eq!(
        *calls.lock(),
        vec!["server", "topleveldomain", "serverversion", "domain", "page"]
    );
    for (key, expected) in [("serverid", 1), ("domainid", 20), ("pageid", 100)] {
        assert_eq!(row.get(key), Some(&Value::Int(expected)));
    }

    let err = snowflake.scdensure(&mut row, &NameMapping::new()).unwrap_err();
    assert!(err.is_fatal_config());
    Ok(())
}

#[test]
fn test_snowflake_over_store_backed_tables() -> EtlResult<()> {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let server: Arc<dyn DimensionTable> = Arc::new(CachedDimension::new(
        Arc::clone(&store),
        DimensionConfig::new("server", "serverid", ["server"]),
    )?);
    let version: Arc<dyn DimensionTable> = Arc::new(CachedDimension::new(
        Arc::clone(&store),
        DimensionConfig::new("serverversion", "serverversionid", ["serverversion", "serverid"])
            .with_lookupatts(["serverversion"]),
    )?);
    let snowflake = SnowflakeBuilder::new()
        .table(version)
        .table(server)
        .link("serverversion", ["server"])
        .build()?;

    let mut a = row! { "serverversion" => "nginx/1.18", "server" => "nginx" };
    let mut b = row! { "serverversion" => "nginx/1.20", "server" => "nginx" };
    let ka = snowflake.ensure(&mut a, &NameMapping::new())?;
    let kb = snowflake.ensure(&mut b, &NameMapping::new())?;
    assert_ne!(ka, kb);
    assert_eq!(a.get("serverid"), b.get("serverid"));
    assert_eq!(store.count("server")?, 1);
    assert_eq!(store.count("serverversion")?, 2);
    Ok(())
}

// ═══════════════════════════════════════════════════════════
// File-based sources and loaders
// ═══════════════════════════════════════════════════════════

#[test]
fn test_delimited_files_to_bulk_files() -> EtlResult<()> {
    let dir = tempdir()?;
    let wines = dir.path().join("wines.csv");
    let grapes = dir.path().join("grapes.csv");
    std::fs::write(&wines, "id;name;grape\n1;Vigna;10\n2;Colle;20\n3;Rocca;10\n")?;
    std::fs::write(&grapes, "grapeid;grapename\n10;Sangiovese\n20;Nebbiolo\n")?;

    let config = DelimitedConfig::new(';').with_cast("grape", dimetl_core::CastKind::Int);
    let joined = HashJoinSource::new(
        DelimitedSource::open(&wines, config)?,
        "grape",
        DelimitedSource::open(
            &grapes,
            DelimitedConfig::new(';').with_cast("grapeid", dimetl_core::CastKind::Int),
        )?,
        "grapeid",
    );

    let out = dir.path().join("out");
    std::fs::create_dir(&out)?;
    let mut facts = BulkFactTable::new(
        FactConfig::new("winegrapes", ["id"]).with_measures(["grapename"]),
        BulkConfig::default().with_separators("|", "\n"),
        DelimitedFileLoader::new(&out),
    )?;
    for row in joined.rows() {
        facts.insert(&row?, &NameMapping::new())?;
    }
    facts.end_load()?;

    let written = std::fs::read_to_string(out.join("winegrapes-00000.txt"))?;
    assert_eq!(written, "1|Sangiovese\n2|Nebbiolo\n3|Sangiovese\n");
    Ok(())
}

#[test]
fn test_tables_from_warehouse_config() -> EtlResult<()> {
    let config = WarehouseConfig::from_json(
        r#"{
            "dimensions": [{"name": "test", "key": "testid",
                            "attributes": ["testname", "testauthor"],
                            "lookupatts": ["testname"],
                            "prefill": true, "defaultidvalue": {"Int": -1}}],
            "facts": [{"name": "results", "keyrefs": ["testid"], "measures": ["errors"]}],
            "bulk": {"results": {"bulksize": 2}}
        }"#,
    )?;
    let store = Arc::new(MemoryStore::new());
    store.insert("test", "testid", &row! { "testid" => 1, "testname" => "links", "testauthor" => "ann" })?;
    let tests = CachedDimension::new(store.clone(), config.dimension("test")?.clone())?;
    let bulk = config.bulk("results").cloned().unwrap_or_default();
    let mut facts = BulkFactTable::new(config.fact("results")?.clone(), bulk, StoreLoader::new(store.clone()))?;

    let by_test = NameMapping::from([("testname", "test")]);
    for (test, errors) in [("links", 0), ("spelling", 4), ("links", 2)] {
        let mut row = row! { "test" => test, "errors" => errors };
        let testid = tests.lookup(&row, &by_test)?.unwrap_or(Value::Null);
        row.set("testid", testid);
        facts.insert(&row, &NameMapping::new())?;
    }
    facts.end_load()?;

    let ids: Vec<Value> = store
        .scan("results")?
        .iter()
        .filter_map(|r| r.get("testid").cloned())
        .collect();
    assert_eq!(ids, vec![Value::Int(1), Value::Int(-1), Value::Int(1)]);
    assert_eq!(facts.loaded(), (2, 3));
    Ok(())
}
