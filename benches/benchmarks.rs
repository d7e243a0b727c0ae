//! Performance benchmarks for flatdex
//!
//! Run with: cargo bench

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use flatdex::index::sort::{SortKey, SortStrategy, TokenSorter};
use flatdex::index::{BuildConfig, SortMode, build_index};
use flatdex::query::{CacheManager, Query, Session, parse_query};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

const ORGANISMS: [&str; 4] = [
    "Homo sapiens (Human)",
    "Mus musculus (Mouse)",
    "Rattus norvegicus (Rat)",
    "Escherichia coli (strain K12)",
];

/// Write a small databank and return (data dir, index root)
fn create_benchmark_fixtures() -> (TempDir, TempDir) {
    let data = TempDir::new().expect("Failed to create temp dir");
    let root = TempDir::new().expect("Failed to create temp dir");

    for div in 0..8 {
        let mut text = String::new();
        for i in 0..500 {
            text.push_str(&format!(
                "ID   P{div}{i:05}_BENCH   Reviewed;   250 AA.\n\
AC   Q{div}{i:05};\n\
DE   Benchmark protein {i} of division {div}.\n\
OS   {org}.\n\
KW   Kw{kw}; Signal.\n\
SQ   SEQUENCE   250 AA;\n\
     MKWVTFISLL FLFSSAYSRG VFRRDTHKSE IAHRFKDLGE ENFKALVLIA\n\
//\n",
                org = ORGANISMS[i % ORGANISMS.len()],
                kw = i % 37,
            ));
        }
        fs::write(data.path().join(format!("div{}.dat", div)), text)
            .expect("Failed to write division");
    }

    (data, root)
}

fn config(data: &TempDir) -> BuildConfig {
    BuildConfig::new("bench", data.path())
        .with_field("org")
        .with_field("key")
        .with_field("acc")
}

fn bench_query_parsing(c: &mut Criterion) {
    let queries = vec![
        "P012345",
        "org:homo*",
        "org:homo AND key:signal",
        "org:zzz ELSE org:mus*",
        "des:\"benchmark protein\" OR acc:Q1*",
    ];

    let mut group = c.benchmark_group("query_parsing");
    for query in queries {
        group.bench_with_input(BenchmarkId::from_parameter(query), &query, |b, &q| {
            b.iter(|| parse_query(black_box(q), "id"))
        });
    }
    group.finish();
}

fn bench_token_sort(c: &mut Criterion) {
    let keys: Vec<SortKey> = (0..20_000u32)
        .map(|i| SortKey {
            token: format!("TOKEN{}", (i * 7919) % 5000),
            entry: format!("ENTRY{:06}", i),
            seq: i,
        })
        .collect();
    let spill = TempDir::new().expect("Failed to create temp dir");

    let mut group = c.benchmark_group("token_sort");
    for (name, strategy, budget) in [
        ("memory", SortStrategy::InMemory, u64::MAX),
        ("external", SortStrategy::External, 64 * 1024),
    ] {
        group.bench_function(name, |b| {
            b.iter(|| {
                let mut sorter = TokenSorter::new(strategy, "bench", spill.path(), budget);
                for key in &keys {
                    sorter.push(key.clone()).expect("push failed");
                }
                let sorted = sorter.finish().expect("finish failed");
                sorted.count()
            })
        });
    }
    group.finish();
}

fn bench_build(c: &mut Criterion) {
    let (data, _) = create_benchmark_fixtures();

    let mut group = c.benchmark_group("build");
    group.sample_size(10);
    for mode in [SortMode::Memory, SortMode::External] {
        let mut config = config(&data);
        config.sort = mode;
        if mode == SortMode::External {
            config.memory_budget = 256 * 1024;
        }
        group.bench_with_input(BenchmarkId::from_parameter(format!("{:?}", mode)), &config, |b, config| {
            b.iter(|| {
                let root = TempDir::new().expect("Failed to create temp dir");
                build_index(black_box(config), root.path(), true).expect("Failed to build index")
            })
        });
    }
    group.finish();
}

fn bench_search(c: &mut Criterion) {
    let (data, root) = create_benchmark_fixtures();
    build_index(&config(&data), root.path(), true).expect("Failed to build index");
    let index_root: PathBuf = root.path().to_path_buf();
    let manager = CacheManager::new(&index_root, 16);
    // Keep the cache warm across iterations
    let _warm = manager.acquire("bench").expect("Failed to open index");

    let drain = |query: Query| {
        let mut session = Session::open(&manager, "bench", query).expect("Failed to open session");
        let mut n = 0;
        while let Some(record) = session.next_record().expect("Query failed") {
            black_box(&record);
            n += 1;
        }
        n
    };

    let mut group = c.benchmark_group("search");

    group.bench_function("entry", |b| {
        b.iter(|| drain(Query::entry("id", black_box("P300042_BENCH"))))
    });

    group.bench_function("wildcard", |b| {
        b.iter(|| drain(Query::default().or("org", black_box("homo*"))))
    });

    group.bench_function("and", |b| {
        b.iter(|| drain(Query::default().or("org", "mus").and("key", black_box("kw3"))))
    });

    group.bench_function("all", |b| b.iter(|| drain(Query::all())));

    group.finish();
}

criterion_group!(
    benches,
    bench_query_parsing,
    bench_token_sort,
    bench_build,
    bench_search,
);

criterion_main!(benches);
