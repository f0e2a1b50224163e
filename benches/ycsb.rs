//! YCSB-style macro-benchmarks for sparsejpt.
//!
//! Measures sustained throughput and latency distributions under
//! realistic mixed workloads inspired by the Yahoo Cloud Serving
//! Benchmark (YCSB). Every row lives under a single fixed column, so
//! these workloads exercise the engine the way a one-column key/value
//! table would.
//!
//! # Workloads
//!
//! | Name | Mix | Description |
//! |------|-----|-------------|
//! | **A** | 50% read, 50% update | Session store — heavy read/write |
//! | **B** | 95% read, 5% update | Photo tagging — read-mostly |
//! | **C** | 100% read | User profile cache — read-only |
//! | **D** | 95% read, 5% insert | Read-latest — status updates |
//! | **E** | 95% scan, 5% insert | Short ranges — threaded conversations |
//! | **F** | 50% read, 50% read-modify-write | User database — RMW |
//!
//! # Running
//!
//! ```bash
//! cargo bench --bench ycsb               # all workloads
//! cargo bench --bench ycsb -- "load"      # load phase only
//! cargo bench --bench ycsb -- "A"         # workload A only
//! ```

use criterion::{BatchSize, BenchmarkId, Criterion, criterion_group, criterion_main};

use rand::Rng;
use sparsejpt::engine::{Engine, EngineConfig, MergeMode, ScanControl};
use std::hint::black_box;
use tempfile::TempDir;

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// Number of rows loaded into the engine before running workloads.
const RECORD_COUNT: u64 = 10_000;

/// Number of operations per workload run.
const OPS_PER_RUN: u64 = 5_000;

/// Value size in bytes.
const VALUE_SIZE: usize = 256;

/// Scan length for workload E.
const SCAN_LENGTH: u64 = 50;

/// The single column every workload reads and writes.
const COLUMN: &[u8] = b"value";

// ------------------------------------------------------------------------------------------------
// Helpers
// ------------------------------------------------------------------------------------------------

fn make_row(i: u64) -> Vec<u8> {
    format!("user{i:012}").into_bytes()
}

fn make_value(rng: &mut impl Rng) -> Vec<u8> {
    let mut buf = vec![0u8; VALUE_SIZE];
    rng.fill(&mut buf[..]);
    buf
}

/// Open an engine with settings tuned for benchmarking.
fn open_bench_engine(dir: &std::path::Path) -> Engine {
    Engine::open(dir, EngineConfig { memtable_budget_bytes: 256 * 1024, ..EngineConfig::default() }).expect("open")
}

/// Load phase: insert [`RECORD_COUNT`] sequential rows.
///
/// **Scenario:** Writes 10,000 row/value pairs (256 B values) sequentially, simulating the
/// initial bulk-load of a dataset.
///
/// **What it measures:** Sustained sequential write throughput through the entire engine
/// pipeline — op log append, memtable insertion, and the minor compactions triggered as
/// the memtable budget fills up.
///
/// **Expected behaviour:** Millisecond range for the full load. Performance is dominated
/// by the number of minor compactions triggered by the 256 KiB budget.
fn load_engine(engine: &Engine) {
    let mut rng = rand::rng();
    for i in 0..RECORD_COUNT {
        let row = make_row(i);
        let value = make_value(&mut rng);
        engine.insert(&row, COLUMN, value, MergeMode::Replace).unwrap();
    }
}

// ------------------------------------------------------------------------------------------------
// Workloads
// ------------------------------------------------------------------------------------------------

/// Workload A — 50% read, 50% update.
///
/// **Real-world analogy:** Session store. A web server reads and updates session data
/// equally — e.g., checking user login state and refreshing session tokens.
///
/// **What it measures:** Performance under a balanced read/write mix with uniform random
/// row access. Updates overwrite existing rows, exercising the op log, memtable, and any
/// minor compactions triggered by accumulated writes.
///
/// **Expected behaviour:** Dominated by write cost. Latency should sit between the pure-
/// read (Workload C) and pure-write baselines.
fn run_workload_a(engine: &Engine) {
    let mut rng = rand::rng();
    for _ in 0..OPS_PER_RUN {
        let row_id = rng.random_range(0..RECORD_COUNT);
        let row = make_row(row_id);

        if rng.random_bool(0.5) {
            let _ = black_box(engine.get(&row, COLUMN).unwrap());
        } else {
            let value = make_value(&mut rng);
            engine.insert(&row, COLUMN, value, MergeMode::Replace).unwrap();
        }
    }
}

/// Workload B — 95% read, 5% update.
///
/// **Real-world analogy:** Photo tagging or social-media metadata. The vast majority of
/// accesses are reads (viewing tags/likes), with occasional writes (adding a tag).
///
/// **What it measures:** Read-dominated throughput with light write pressure.
///
/// **Expected behaviour:** Close to Workload C (pure read), with a small overhead from
/// the 5% writes.
fn run_workload_b(engine: &Engine) {
    let mut rng = rand::rng();
    for _ in 0..OPS_PER_RUN {
        let row_id = rng.random_range(0..RECORD_COUNT);
        let row = make_row(row_id);

        if rng.random_bool(0.95) {
            let _ = black_box(engine.get(&row, COLUMN).unwrap());
        } else {
            let value = make_value(&mut rng);
            engine.insert(&row, COLUMN, value, MergeMode::Replace).unwrap();
        }
    }
}

/// Workload C — 100% read.
///
/// **Real-world analogy:** User profile cache. A CDN or application reads user profile
/// data from the engine with no modifications during the measured window.
///
/// **What it measures:** Peak read throughput with zero write contention.
///
/// **Expected behaviour:** The fastest of all workloads. Latency is determined entirely
/// by how many rows reside in the memtable vs. disktables.
fn run_workload_c(engine: &Engine) {
    let mut rng = rand::rng();
    for _ in 0..OPS_PER_RUN {
        let row_id = rng.random_range(0..RECORD_COUNT);
        let row = make_row(row_id);
        let _ = black_box(engine.get(&row, COLUMN).unwrap());
    }
}

/// Workload D — 95% read, 5% insert (append-only new rows).
///
/// **Real-world analogy:** Status/timeline feed. Most operations read recent posts, while
/// a small fraction inserts new posts. New rows are appended beyond the initial range.
///
/// **What it measures:** The engine's ability to handle a growing keyspace.
///
/// **Expected behaviour:** Similar to Workload B, but with slightly higher write cost
/// because inserts create new cells rather than overwriting.
fn run_workload_d(engine: &Engine, insert_base: &mut u64) {
    let mut rng = rand::rng();
    for _ in 0..OPS_PER_RUN {
        if rng.random_bool(0.95) {
            let row_id = rng.random_range(0..RECORD_COUNT + *insert_base);
            let row = make_row(row_id);
            let _ = black_box(engine.get(&row, COLUMN).unwrap());
        } else {
            let row = make_row(RECORD_COUNT + *insert_base);
            let value = make_value(&mut rng);
            engine.insert(&row, COLUMN, value, MergeMode::Replace).unwrap();
            *insert_base += 1;
        }
    }
}

/// Workload E — 95% scan (short range), 5% insert.
///
/// **Real-world analogy:** Threaded conversations or messaging. Reading a thread requires
/// scanning a range of messages ([`SCAN_LENGTH`] = 50 rows), while posting adds new
/// entries.
///
/// **What it measures:** Short-range scan throughput under light write pressure. Each scan
/// walks the column from its start, skipping rows below the chosen offset and collecting
/// the next 50 — exercising the merge across memtable and disktables.
///
/// **Expected behaviour:** Significantly slower per-operation than point-read workloads
/// because each scan touches up to `offset + 50` rows before stopping.
fn run_workload_e(engine: &Engine, insert_base: &mut u64) {
    let mut rng = rand::rng();
    for _ in 0..OPS_PER_RUN {
        if rng.random_bool(0.95) {
            let start_id = rng.random_range(0..RECORD_COUNT.saturating_sub(SCAN_LENGTH));
            let start = make_row(start_id);

            let mut collected = Vec::with_capacity(SCAN_LENGTH as usize);
            engine
                .column_scan(COLUMN, |row, value, _ts| {
                    if row < start.as_slice() {
                        return ScanControl::Continue;
                    }
                    collected.push(value.to_vec());
                    if collected.len() as u64 >= SCAN_LENGTH { ScanControl::Stop } else { ScanControl::Continue }
                })
                .unwrap();
            black_box(&collected);
        } else {
            let row = make_row(RECORD_COUNT + *insert_base);
            let value = make_value(&mut rng);
            engine.insert(&row, COLUMN, value, MergeMode::Replace).unwrap();
            *insert_base += 1;
        }
    }
}

/// Workload F — 50% read, 50% read-modify-write (RMW).
///
/// **Real-world analogy:** User database with counters. Half the operations read a user
/// record; the other half read a record, modify it, and write it back.
///
/// **What it measures:** Read-modify-write cost. Each RMW operation performs a `get`
/// followed by an `insert` — effectively two engine calls per logical unit.
///
/// **Expected behaviour:** Slower than Workload A because the RMW half does strictly more
/// work than a plain update.
fn run_workload_f(engine: &Engine) {
    let mut rng = rand::rng();
    for _ in 0..OPS_PER_RUN {
        let row_id = rng.random_range(0..RECORD_COUNT);
        let row = make_row(row_id);

        if rng.random_bool(0.5) {
            let _ = black_box(engine.get(&row, COLUMN).unwrap());
        } else {
            let _ = engine.get(&row, COLUMN).unwrap();
            let value = make_value(&mut rng);
            engine.insert(&row, COLUMN, value, MergeMode::Replace).unwrap();
        }
    }
}

// ================================================================================================
// Criterion benchmark functions
// ================================================================================================

/// Criterion registration for the load phase.
///
/// Measures the time to insert [`RECORD_COUNT`] rows into a fresh engine.
/// Sample size is reduced to 10 because each iteration creates and fills an entire
/// engine from scratch.
fn bench_load(c: &mut Criterion) {
    let mut group = c.benchmark_group("ycsb/load");
    group.sample_size(10);
    group.bench_function(BenchmarkId::new("sequential", RECORD_COUNT), |b| {
        b.iter_batched(
            || {
                let dir = TempDir::new().unwrap();
                let engine = open_bench_engine(dir.path());
                (dir, engine)
            },
            |(_dir, engine)| {
                load_engine(&engine);
                engine.close().unwrap();
            },
            BatchSize::PerIteration,
        );
    });
    group.finish();
}

/// Criterion registration for Workload A (50% read / 50% update).
fn bench_workload_a(c: &mut Criterion) {
    let mut group = c.benchmark_group("ycsb/workload");
    group.sample_size(10);
    group.bench_function("A_50read_50update", |b| {
        b.iter_batched(
            || {
                let dir = TempDir::new().unwrap();
                let engine = open_bench_engine(dir.path());
                load_engine(&engine);
                (dir, engine)
            },
            |(_dir, engine)| run_workload_a(&engine),
            BatchSize::PerIteration,
        );
    });
    group.finish();
}

/// Criterion registration for Workload B (95% read / 5% update).
fn bench_workload_b(c: &mut Criterion) {
    let mut group = c.benchmark_group("ycsb/workload");
    group.sample_size(10);
    group.bench_function("B_95read_5update", |b| {
        b.iter_batched(
            || {
                let dir = TempDir::new().unwrap();
                let engine = open_bench_engine(dir.path());
                load_engine(&engine);
                (dir, engine)
            },
            |(_dir, engine)| run_workload_b(&engine),
            BatchSize::PerIteration,
        );
    });
    group.finish();
}

/// Criterion registration for Workload C (100% read).
fn bench_workload_c(c: &mut Criterion) {
    let mut group = c.benchmark_group("ycsb/workload");
    group.sample_size(10);
    group.bench_function("C_100read", |b| {
        b.iter_batched(
            || {
                let dir = TempDir::new().unwrap();
                let engine = open_bench_engine(dir.path());
                load_engine(&engine);
                (dir, engine)
            },
            |(_dir, engine)| run_workload_c(&engine),
            BatchSize::PerIteration,
        );
    });
    group.finish();
}

/// Criterion registration for Workload D (95% read / 5% insert).
fn bench_workload_d(c: &mut Criterion) {
    let mut group = c.benchmark_group("ycsb/workload");
    group.sample_size(10);
    group.bench_function("D_95read_5insert", |b| {
        b.iter_batched(
            || {
                let dir = TempDir::new().unwrap();
                let engine = open_bench_engine(dir.path());
                load_engine(&engine);
                let insert_base = 0u64;
                (dir, engine, insert_base)
            },
            |(_dir, engine, mut insert_base)| run_workload_d(&engine, &mut insert_base),
            BatchSize::PerIteration,
        );
    });
    group.finish();
}

/// Criterion registration for Workload E (95% scan / 5% insert).
fn bench_workload_e(c: &mut Criterion) {
    let mut group = c.benchmark_group("ycsb/workload");
    group.sample_size(10);
    group.bench_function("E_95scan_5insert", |b| {
        b.iter_batched(
            || {
                let dir = TempDir::new().unwrap();
                let engine = open_bench_engine(dir.path());
                load_engine(&engine);
                let insert_base = 0u64;
                (dir, engine, insert_base)
            },
            |(_dir, engine, mut insert_base)| run_workload_e(&engine, &mut insert_base),
            BatchSize::PerIteration,
        );
    });
    group.finish();
}

/// Criterion registration for Workload F (50% read / 50% RMW).
fn bench_workload_f(c: &mut Criterion) {
    let mut group = c.benchmark_group("ycsb/workload");
    group.sample_size(10);
    group.bench_function("F_50read_50rmw", |b| {
        b.iter_batched(
            || {
                let dir = TempDir::new().unwrap();
                let engine = open_bench_engine(dir.path());
                load_engine(&engine);
                (dir, engine)
            },
            |(_dir, engine)| run_workload_f(&engine),
            BatchSize::PerIteration,
        );
    });
    group.finish();
}

// ================================================================================================
// Group registration
// ================================================================================================

criterion_group!(
    benches,
    bench_load,
    bench_workload_a,
    bench_workload_b,
    bench_workload_c,
    bench_workload_d,
    bench_workload_e,
    bench_workload_f,
);

criterion_main!(benches);
