#![allow(clippy::cast_possible_wrap, clippy::cast_precision_loss)]

//! Criterion benchmark for the read path: concurrent single-row lookups through
//! pooled read connections with and without the statement cache, bare
//! checkout/release cost, and a plain `rusqlite` baseline using its own
//! `prepare_cached`. Each iteration fans a batch of lookups out across worker
//! threads.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use rusqlite::Connection;
use sqlite_access::{ConnectionPool, SqliteAccessError, TransactionMode, Value};
use std::fs;
use std::hint::black_box;
use std::path::PathBuf;
use std::sync::{LazyLock, Mutex};
use std::thread;
use std::time::{Duration, Instant};

const SQLITE_SELECT: &str = "SELECT id, name, score, active FROM test WHERE id = ?1";

/// On-disk dataset plus a fixed lookup order.
struct Dataset {
    path: String,
    ids: Vec<i64>,
}

static DATASET: LazyLock<Dataset> = LazyLock::new(|| {
    let row_count = lookup_row_count_to_run();
    let path = PathBuf::from("benchmark_pool_read_checkout.db");
    for suffix in ["", "-wal", "-shm"] {
        let _ = fs::remove_file(format!("{}{suffix}", path.display()));
    }
    let path = path.to_string_lossy().into_owned();
    prepare_dataset(&path, row_count).expect("prepare sqlite dataset");
    Dataset {
        path,
        ids: scrambled_ids(row_count),
    }
});

// Pools stay alive across iterations so the benchmark measures steady state.
static CACHED_POOL: LazyLock<ConnectionPool> =
    LazyLock::new(|| build_pool(true).expect("cached pool"));
static UNCACHED_POOL: LazyLock<ConnectionPool> =
    LazyLock::new(|| build_pool(false).expect("uncached pool"));

static BENCH_CONCURRENCY: LazyLock<usize> = LazyLock::new(|| concurrency_to_run().max(1));

fn lookup_row_count_to_run() -> usize {
    std::env::var("BENCH_LOOKUPS")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(1024)
}

fn concurrency_to_run() -> usize {
    std::env::var("BENCH_CONCURRENCY")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(8)
}

/// Deterministic permutation of `1..=n` so lookups do not walk the b-tree in order.
fn scrambled_ids(n: usize) -> Vec<i64> {
    let n = n.max(1) as i64;
    let stride = (1..n).rev().find(|s| gcd(*s, n) == 1 && *s > n / 3).unwrap_or(1);
    (0..n).map(|i| (i * stride) % n + 1).collect()
}

fn gcd(a: i64, b: i64) -> i64 {
    if b == 0 { a } else { gcd(b, a % b) }
}

fn prepare_dataset(path: &str, row_count: usize) -> Result<(), SqliteAccessError> {
    let pool = ConnectionPool::builder(path).build()?;
    pool.with_write_transaction(TransactionMode::Immediate, move |conn, _| {
        conn.execute_batch(
            "CREATE TABLE test (
                id      INTEGER PRIMARY KEY,
                name    TEXT NOT NULL,
                score   REAL NOT NULL,
                active  INTEGER NOT NULL
            );",
        )?;
        for id in 1..=row_count as i64 {
            conn.execute(
                "INSERT INTO test (id, name, score, active) VALUES (?1, ?2, ?3, ?4)",
                &[
                    Value::Int(id),
                    Value::Text(format!("name-{id}")),
                    Value::Float(id as f64 * 0.5),
                    Value::from(id % 2 == 0),
                ],
            )?;
        }
        Ok(())
    })
}

fn build_pool(cache_statements: bool) -> Result<ConnectionPool, SqliteAccessError> {
    ConnectionPool::builder(DATASET.path.clone())
        .cache_statements(cache_statements)
        .max_idle_read_connections(*BENCH_CONCURRENCY)
        .keep_journal_mode()
        .build()
}

fn chunk_size(total: usize, concurrency: usize) -> usize {
    total.div_ceil(concurrency.max(1)).max(1)
}

fn pool_parallel_select(pool: &ConnectionPool, ids: &[i64], concurrency: usize) {
    thread::scope(|scope| {
        for chunk in ids.chunks(chunk_size(ids.len(), concurrency)) {
            scope.spawn(move || {
                pool.with_read(|conn| {
                    for &id in chunk {
                        let row = conn.query_row_optional(SQLITE_SELECT, &[Value::Int(id)])?;
                        black_box(row);
                    }
                    Ok(())
                })
                .expect("pooled lookups");
            });
        }
    });
}

fn pool_parallel_checkout(pool: &ConnectionPool, concurrency: usize) {
    thread::scope(|scope| {
        for _ in 0..concurrency {
            scope.spawn(|| {
                let conn = pool.acquire_read_connection().expect("checkout");
                pool.release_read_connection(conn).expect("release");
            });
        }
    });
}

fn rusqlite_parallel_select(conns: &[Mutex<Connection>], ids: &[i64]) {
    thread::scope(|scope| {
        for (chunk, conn) in ids.chunks(chunk_size(ids.len(), conns.len())).zip(conns) {
            scope.spawn(move || {
                let conn = conn.lock().expect("rusqlite connection");
                let mut stmt = conn.prepare_cached(SQLITE_SELECT).expect("prepare");
                for &id in chunk {
                    let row = stmt
                        .query_row([id], |row| {
                            Ok((
                                row.get::<_, i64>(0)?,
                                row.get::<_, String>(1)?,
                                row.get::<_, f64>(2)?,
                                row.get::<_, i64>(3)? != 0,
                            ))
                        })
                        .expect("lookup");
                    black_box(row);
                }
            });
        }
    });
}

fn timed(iters: u64, mut body: impl FnMut()) -> Duration {
    let mut total = Duration::default();
    for _ in 0..iters {
        let start = Instant::now();
        body();
        total += start.elapsed();
    }
    total
}

fn sqlite_pool_read_checkout(c: &mut Criterion) {
    let dataset = &*DATASET;
    let concurrency = *BENCH_CONCURRENCY;

    let mut group = c.benchmark_group("sqlite_pool_read_checkout");
    group.throughput(Throughput::Elements(dataset.ids.len() as u64));

    for (name, pool) in [("cached", &*CACHED_POOL), ("uncached", &*UNCACHED_POOL)] {
        group.bench_function(BenchmarkId::new(format!("pool_select_{name}"), concurrency), |b| {
            b.iter_custom(|iters| {
                timed(iters, || pool_parallel_select(pool, &dataset.ids, concurrency))
            });
        });
    }

    group.bench_function(BenchmarkId::new("pool_checkout", concurrency), |b| {
        b.iter_custom(|iters| timed(iters, || pool_parallel_checkout(&CACHED_POOL, concurrency)));
    });

    let conns: Vec<Mutex<Connection>> = (0..concurrency)
        .map(|_| Mutex::new(Connection::open(&dataset.path).expect("open rusqlite connection")))
        .collect();
    group.bench_function(BenchmarkId::new("rusqlite_prepare_cached", concurrency), |b| {
        b.iter_custom(|iters| timed(iters, || rusqlite_parallel_select(&conns, &dataset.ids)));
    });

    group.finish();
}

criterion_group!(benches, sqlite_pool_read_checkout);
criterion_main!(benches);
