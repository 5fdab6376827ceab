//! Wine quality pipeline
//!
//! Red and white wine measurements are read with typed casts, tagged with a
//! running identifier and a wine type, filtered on quality and interleaved
//! in batches. Derived measures are computed on the combined stream and the
//! result is bulk-written to a tab-separated file.
//!
//! Run: cargo run --example wines [output-dir]

use dimetl_core::{
    BulkConfig, BulkFactTable, CastKind, DataSource, DelimitedConfig, DelimitedFileLoader,
    DelimitedSource, EtlResult, FactConfig, FilteringSource, NameMapping, RoundRobinSource, Row,
    SequenceGenerator, TransformingSource, Value,
};
use std::io::Cursor;
use std::sync::Arc;

const RED: &str = "\
FixedAcidity,VolatileAcidity,FreeSO2,TotalSO2,Alcohol,Quality
7.4,0.70,11,34,9.4,5
7.8,0.88,25,67,9.8,5
11.2,0.28,17,60,9.8,6
7.4,0.66,13,40,9.4,3
6.7,0.58,15,65,9.2,4
";

const WHITE: &str = "\
FixedAcidity,VolatileAcidity,FreeSO2,TotalSO2,Alcohol,Quality
7.0,0.27,45,170,8.8,6
6.3,0.30,14,132,9.5,6
8.1,0.28,30,97,10.1,4
7.2,0.23,47,186,9.9,7
";

fn wine_config() -> DelimitedConfig {
    ["FixedAcidity", "VolatileAcidity", "FreeSO2", "TotalSO2", "Alcohol"]
        .into_iter()
        .fold(DelimitedConfig::new(','), |c, f| c.with_cast(f, CastKind::Float))
        .with_cast("Quality", CastKind::Int)
}

fn float(row: &Row, field: &str) -> f64 {
    row.get(field).and_then(Value::to_float).unwrap_or(0.0)
}

/// Tag rows with an identifier from the shared sequence and their wine type,
/// keeping those of at least `min_quality`.
fn wines(
    text: &'static str,
    kind: &'static str,
    min_quality: i64,
    ids: Arc<SequenceGenerator>,
) -> EtlResult<Box<dyn DataSource>> {
    let typed = DelimitedSource::from_reader(Cursor::new(text), wine_config())?;
    let tagged = TransformingSource::new(typed).with_transform(move |row| {
        row.set("id", ids.next_value()?);
        row.set("type", kind);
        Ok(())
    });
    Ok(Box::new(FilteringSource::new(tagged, move |row| {
        row.get("Quality").and_then(Value::to_int).unwrap_or(0) >= min_quality
    })))
}

fn main() -> EtlResult<()> {
    dimetl_core::logging::init();

    let outdir = std::env::args()
        .nth(1)
        .map(std::path::PathBuf::from)
        .unwrap_or_else(std::env::temp_dir);

    let ids = Arc::new(SequenceGenerator::new(0));
    let inputdata = RoundRobinSource::new(
        vec![
            wines(RED, "Red", 4, Arc::clone(&ids))?,
            wines(WHITE, "White", 5, Arc::clone(&ids))?,
        ],
        2,
    )?;
    let combined = TransformingSource::new(inputdata)
        .with_transform(|row| {
            let max = float(row, "FixedAcidity") + float(row, "VolatileAcidity");
            row.set("MaxAcidity", max);
            Ok(())
        })
        .with_transform(|row| {
            let locked = float(row, "TotalSO2") - float(row, "FreeSO2");
            row.set("LockedSO2", locked);
            Ok(())
        });

    let loader = DelimitedFileLoader::new(&outdir);
    let mut output = BulkFactTable::new(
        FactConfig::new("winesoutput", ["id", "type"])
            .with_measures(["Quality", "Alcohol", "MaxAcidity", "LockedSO2"]),
        BulkConfig::default().with_bulksize(3),
        loader,
    )?;
    let mut count = 0usize;
    for row in combined.rows() {
        let row = row?;
        println!("{:?}", row.iter().collect::<Vec<_>>());
        output.insert(&row, &NameMapping::new())?;
        count += 1;
    }
    output.end_load()?;

    let (flushes, rows) = output.loaded();
    println!(
        "{count} wines, {rows} written in {flushes} files under {}; next id {}",
        outdir.display(),
        ids.peek()
    );
    Ok(())
}
