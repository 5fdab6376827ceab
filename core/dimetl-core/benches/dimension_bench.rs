// Dimension benchmarks
//
// Section 1: cached ensure (cache hit vs. store lookup vs. LRU churn)
// Section 2: bulk fact buffering

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use dimetl_core::{
    BulkConfig, BulkFactTable, BulkLoadRequest, CachedDimension, DimensionConfig, DimensionTable,
    EtlResult, FactConfig, MemoryStore, NameMapping, row,
};
use std::sync::Arc;

// ═══════════════════════════════════════════════════════════════════════════
// Section 1: cached ensure
// ═══════════════════════════════════════════════════════════════════════════

fn servers(cachesize: i64) -> CachedDimension {
    let store = Arc::new(MemoryStore::new());
    let dim = CachedDimension::new(
        store,
        DimensionConfig::new("server", "serverid", ["server"]).with_cachesize(cachesize),
    )
    .unwrap();
    for i in 0..1_000 {
        dim.ensure(&mut row! { "server" => format!("server-{i}") }, &NameMapping::new())
            .unwrap();
    }
    dim
}

fn bench_cached_ensure(c: &mut Criterion) {
    let mut group = c.benchmark_group("cached_ensure");
    let names: Vec<String> = (0..1_000).map(|i| format!("server-{i}")).collect();

    for (label, cachesize) in [("unbounded", -1), ("lru_100", 100), ("no_cache", 0)] {
        let dim = servers(cachesize);
        group.bench_with_input(BenchmarkId::new("existing", label), &names, |b, names| {
            let mut i = 0;
            b.iter(|| {
                let mut row = row! { "server" => names[i % names.len()].as_str() };
                black_box(dim.ensure(&mut row, &NameMapping::new()).unwrap());
                i += 1;
            })
        });
        println!("{label}: {:?}", dim.cache_stats());
    }

    group.bench_function("new_members", |b| {
        let dim = servers(-1);
        let mut i = 0u64;
        b.iter(|| {
            let mut row = row! { "server" => format!("fresh-{i}") };
            black_box(dim.ensure(&mut row, &NameMapping::new()).unwrap());
            i += 1;
        })
    });

    group.finish();
}

// ═══════════════════════════════════════════════════════════════════════════
// Section 2: bulk fact buffering
// ═══════════════════════════════════════════════════════════════════════════

fn bench_bulk_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("bulk_fact_insert");
    for bulksize in [100usize, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(bulksize), &bulksize, |b, &bulksize| {
            let mut facts = BulkFactTable::new(
                FactConfig::new("testresults", ["pageid", "testid"]).with_measures(["errors"]),
                BulkConfig::default().with_bulksize(bulksize),
                |req: &BulkLoadRequest<'_>| -> EtlResult<()> {
                    black_box(req.to_text()?);
                    Ok(())
                },
            )
            .unwrap();
            let mut i = 0i64;
            b.iter(|| {
                let fact = row! { "pageid" => i, "testid" => i % 7, "errors" => i % 3 };
                facts.insert(black_box(&fact), &NameMapping::new()).unwrap();
                i += 1;
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_cached_ensure, bench_bulk_insert);
criterion_main!(benches);
