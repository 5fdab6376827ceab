//! Web-page test results warehouse
//!
//! A download log and a test-results log are merge-joined on the local file
//! name. Each joined row resolves the snowflaked page dimension (a slowly
//! changing page table over server and domain hierarchies), the date
//! dimension and the prefilled test dimension, then lands in a bulk fact
//! table.
//!
//! Run: cargo run --example testresults
//!      RUST_LOG=debug cargo run --example testresults --features logging

use dimetl_core::{
    BulkConfig, BulkFactTable, CachedDimension, ConnectionWrapper, DataSource, DelimitedConfig,
    DelimitedSource, DimensionConfig, DimensionTable, EtlError, EtlResult, FactConfig,
    MemoryStore, MergeJoinSource, NameMapping, Row, ScdConfig, SlowlyChangingDimension,
    SnowflakedDimension, Store, StoreLoader, TransformingSource, Value, row,
};
use std::io::Cursor;
use std::sync::Arc;

// Both inputs are sorted on `localfile`, as the merge join requires.
const DOWNLOAD_LOG: &str = "\
localfile\turl\tserverversion\tsize\tdownloaddate\tlastmoddate
p1.html\thttp://www.example.org/p1.html\tnginx/1.18\t1200\t2024-01-03\t2024-01-01
p2.html\thttp://www.example.org/p2.html\tnginx/1.18\t800\t2024-01-03\t2024-01-02
p3.html\thttp://docs.example.com/p3.html\tApache/2.4\t4100\t2024-01-04\t2024-01-02
p4.html\thttp://docs.example.com/p4.html\tApache/2.4\t3900\t2024-01-04\t2024-01-03
p5.html\thttp://www.example.org/p1.html\tnginx/1.20\t1350\t2024-02-10\t2024-02-09
";

const TEST_RESULTS: &str = "\
localfile\ttest\terrors
p1.html\tlinks\t0
p1.html\tspelling\t3
p2.html\tlinks\t1
p3.html\tlinks\t0
p3.html\taccessibility\t7
p4.html\tspelling\t2
p5.html\tlinks\t0
p5.html\tspelling\t1
";

fn tsv(text: &'static str) -> EtlResult<DelimitedSource> {
    DelimitedSource::from_reader(Cursor::new(text), DelimitedConfig::new('\t'))
}

/// Row expander of the date dimension: derives every calendar attribute
/// from an ISO `YYYY-MM-DD` date.
fn expand_date(row: &mut Row, namemapping: &NameMapping) -> EtlResult<()> {
    let date = row
        .get_mapped("date", namemapping)
        .and_then(Value::as_text)
        .ok_or_else(|| EtlError::config("date dimension row without a date"))?
        .to_string();
    let (year, month, day) = parse_date(&date)?;
    let (weekyear, week) = iso_week(year, month, day);
    row.set("day", day);
    row.set("month", month);
    row.set("year", year);
    row.set("week", week);
    row.set("weekyear", weekyear);
    // supports dates from 1990-01-01
    row.set_mapped(
        "dateid",
        namemapping,
        day_of_year(year, month, day) + 366 * (year - 1990),
    );
    Ok(())
}

fn parse_date(date: &str) -> EtlResult<(i64, i64, i64)> {
    let bad = || EtlError::TypeConversion {
        line: 0,
        field: "date".to_string(),
        value: date.to_string(),
        target: "date".to_string(),
    };
    let mut parts = date.splitn(3, '-').map(|p| p.parse::<i64>());
    match (parts.next(), parts.next(), parts.next()) {
        (Some(Ok(y)), Some(Ok(m)), Some(Ok(d))) if (1..=12).contains(&m) && (1..=31).contains(&d) => {
            Ok((y, m, d))
        }
        _ => Err(bad()),
    }
}

fn is_leap(year: i64) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

fn day_of_year(year: i64, month: i64, day: i64) -> i64 {
    const CUMULATIVE: [i64; 12] = [0, 31, 59, 90, 120, 151, 181, 212, 243, 273, 304, 334];
    let leap = i64::from(month > 2 && is_leap(year));
    CUMULATIVE[(month - 1) as usize] + day + leap
}

/// Monday = 1 … Sunday = 7
fn iso_weekday(year: i64, month: i64, day: i64) -> i64 {
    const OFFSETS: [i64; 12] = [0, 3, 2, 5, 0, 3, 5, 1, 4, 6, 2, 4];
    let y = if month < 3 { year - 1 } else { year };
    let sunday_based = (y + y / 4 - y / 100 + y / 400 + OFFSETS[(month - 1) as usize] + day) % 7;
    if sunday_based == 0 { 7 } else { sunday_based }
}

fn iso_weeks_in(year: i64) -> i64 {
    let jan1 = iso_weekday(year, 1, 1);
    if jan1 == 4 || (jan1 == 3 && is_leap(year)) { 53 } else { 52 }
}

fn iso_week(year: i64, month: i64, day: i64) -> (i64, i64) {
    let week = (day_of_year(year, month, day) - iso_weekday(year, month, day) + 10) / 7;
    if week < 1 {
        (year - 1, iso_weeks_in(year - 1))
    } else if week > iso_weeks_in(year) {
        (year + 1, 1)
    } else {
        (year, week)
    }
}

fn extract_domain_info(row: &mut Row) -> EtlResult<()> {
    let url = row
        .get("url")
        .and_then(Value::as_text)
        .ok_or_else(|| EtlError::config("download log row without url"))?;
    // 'www.domain.org' from 'http://www.domain.org/page.html'
    let domain = url.rsplit('/').nth(1).unwrap_or_default().to_string();
    let toplevel = domain.rsplit('.').next().unwrap_or_default().to_string();
    row.set("domain", domain);
    row.set("topleveldomain", toplevel);
    Ok(())
}

fn extract_server_info(row: &mut Row) -> EtlResult<()> {
    let server = row
        .get("serverversion")
        .and_then(Value::as_text)
        .and_then(|v| v.split('/').next())
        .unwrap_or_default()
        .to_string();
    row.set("server", server);
    Ok(())
}

fn to_int(row: &mut Row, field: &str) -> EtlResult<()> {
    let value = row.get(field).cloned().unwrap_or_default();
    let parsed = value.to_int().ok_or_else(|| EtlError::TypeConversion {
        line: 0,
        field: field.to_string(),
        value: value.to_string(),
        target: "int".to_string(),
    })?;
    row.set(field, parsed);
    Ok(())
}

fn main() -> EtlResult<()> {
    let verbosity = std::env::args().filter(|a| a == "-v").count() as u8;
    dimetl_core::logging::init_with_level(dimetl_core::logging::level_for_verbosity(verbosity));

    let store = Arc::new(MemoryStore::new());
    let connection = ConnectionWrapper::new(store.clone());

    // The test catalogue exists before the load and is prefilled into the cache.
    for (id, name, author) in [(1, "links", "ann"), (2, "spelling", "bo")] {
        store.insert(
            "test",
            "testid",
            &row! { "testid" => id, "testname" => name, "testauthor" => author },
        )?;
    }
    store.commit()?;

    let topleveldim: Arc<dyn DimensionTable> = Arc::new(CachedDimension::new(
        connection.store(),
        DimensionConfig::new("topleveldomain", "topleveldomainid", ["topleveldomain"]),
    )?);
    let domaindim: Arc<dyn DimensionTable> = Arc::new(CachedDimension::new(
        connection.store(),
        DimensionConfig::new("domain", "domainid", ["domain", "topleveldomainid"])
            .with_lookupatts(["domain"]),
    )?);
    let serverdim: Arc<dyn DimensionTable> = Arc::new(CachedDimension::new(
        connection.store(),
        DimensionConfig::new("server", "serverid", ["server"]),
    )?);
    let serverversiondim: Arc<dyn DimensionTable> = Arc::new(CachedDimension::new(
        connection.store(),
        DimensionConfig::new("serverversion", "serverversionid", ["serverversion", "serverid"]),
    )?);
    let pagedim: Arc<dyn DimensionTable> = Arc::new(SlowlyChangingDimension::new(
        connection.store(),
        ScdConfig::new(
            DimensionConfig::new(
                "page",
                "pageid",
                [
                    "url",
                    "size",
                    "validfrom",
                    "validto",
                    "version",
                    "domainid",
                    "serverversionid",
                ],
            )
            .with_lookupatts(["url"])
            .with_cachesize(-1),
            "lastmoddate",
        ),
    )?);
    let pagesf = SnowflakedDimension::new(vec![
        (pagedim, vec![serverversiondim.clone(), domaindim.clone()]),
        (serverversiondim, vec![serverdim]),
        (domaindim, vec![topleveldim]),
    ])?;

    let testdim = CachedDimension::new(
        connection.store(),
        DimensionConfig::new("test", "testid", ["testname", "testauthor"])
            .with_lookupatts(["testname"])
            .with_prefill(true)
            .with_defaultidvalue(-1),
    )?;
    let datedim = CachedDimension::new(
        connection.store(),
        DimensionConfig::new(
            "date",
            "dateid",
            ["date", "day", "month", "year", "week", "weekyear"],
        )
        .with_lookupatts(["date"]),
    )?
    .with_rowexpander(expand_date);

    let mut facttbl = BulkFactTable::new(
        FactConfig::new("testresults", ["pageid", "testid", "dateid"]).with_measures(["errors"]),
        BulkConfig::default().with_bulksize(4),
        StoreLoader::new(connection.store()),
    )?;

    let inputdata = TransformingSource::new(MergeJoinSource::new(
        tsv(DOWNLOAD_LOG)?,
        "localfile",
        tsv(TEST_RESULTS)?,
        "localfile",
    ))
    .with_transform(extract_domain_info)
    .with_transform(extract_server_info)
    .with_transform(|row| to_int(row, "size"))
    .with_transform(|row| to_int(row, "errors"));

    let by_date = NameMapping::from([("date", "downloaddate")]);
    let by_test = NameMapping::from([("testname", "test")]);
    for row in inputdata.rows() {
        let mut row = row?;
        let pageid = pagesf.scdensure(&mut row, &NameMapping::new())?;
        row.set("pageid", pageid);
        let dateid = datedim.ensure(&mut row, &by_date)?;
        row.set("dateid", dateid);
        let testid = testdim
            .lookup(&row, &by_test)?
            .unwrap_or(Value::Int(-1));
        row.set("testid", testid);
        facttbl.insert(&row, &NameMapping::new())?;
    }
    connection.commit(&mut [&mut facttbl])?;

    for table in store.table_names() {
        println!("{table:>15}: {} rows", store.count(&table)?);
    }
    println!("{}", pagesf.levels().iter().map(|l| l.join(", ")).collect::<Vec<_>>().join(" -> "));
    for version in store.scan("page")? {
        println!("{:?}", version.iter().collect::<Vec<_>>());
    }
    let (flushes, rows) = facttbl.loaded();
    println!("testresults: {rows} rows in {flushes} bulk loads");
    println!("date cache: {:?}", datedim.cache_stats());
    Ok(())
}
