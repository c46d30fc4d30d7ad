use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use sqlite_access::prelude::*;

mod common;

#[test]
fn concurrent_writes_are_totally_ordered() -> Result<(), SqliteAccessError> {
    let (_dir, pool) = common::seeded_pool("ordered", "log")?;
    let pool = Arc::new(pool);
    let journal = Arc::new(Mutex::new(Vec::<String>::new()));

    const WRITERS: usize = 24;
    let handles: Vec<_> = (0..WRITERS)
        .map(|i| {
            let pool = Arc::clone(&pool);
            let journal = Arc::clone(&journal);
            thread::spawn(move || {
                pool.with_write(move |conn| {
                    journal.lock().expect("journal").push(format!("start-{i}"));
                    thread::sleep(Duration::from_millis(2));
                    conn.execute(
                        "INSERT INTO log (val) VALUES (?1)",
                        &[Value::Text(format!("writer-{i}"))],
                    )?;
                    journal.lock().expect("journal").push(format!("end-{i}"));
                    Ok(())
                })
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("writer thread")?;
    }

    let journal = journal.lock().expect("journal").clone();
    assert_eq!(journal.len(), WRITERS * 2);
    for pair in journal.chunks(2) {
        let start = pair[0].strip_prefix("start-").expect("start marker");
        let end = pair[1].strip_prefix("end-").expect("end marker");
        assert_eq!(start, end, "work items interleaved: {pair:?}");
    }

    let rows = pool.with_read(|conn| common::count_rows(conn, "log"))?;
    assert_eq!(rows, i64::try_from(WRITERS).unwrap());
    Ok(())
}

#[test]
fn nested_write_is_misuse_not_deadlock() -> Result<(), SqliteAccessError> {
    let (_dir, pool) = common::seeded_pool("nested", "t")?;
    let pool = Arc::new(pool);
    let inner_pool = Arc::clone(&pool);

    let nested = pool.with_write(move |_| Ok(inner_pool.with_write(|_| Ok(()))))?;
    assert!(matches!(nested, Err(SqliteAccessError::Misuse(_))));

    let tx_pool = Arc::clone(&pool);
    let nested = pool.with_write_transaction(TransactionMode::Immediate, move |_, _| {
        Ok(tx_pool.with_write_transaction(TransactionMode::Immediate, |_, _| Ok(())))
    })?;
    assert!(matches!(nested, Err(SqliteAccessError::Misuse(_))));

    // The queue is still healthy afterwards.
    pool.with_write(|conn| conn.execute("INSERT INTO t (val) VALUES ('after')", &[]))?;
    Ok(())
}

#[test]
fn reads_inside_a_write_item_are_allowed() -> Result<(), SqliteAccessError> {
    let (_dir, pool) = common::seeded_pool("read_in_write", "t")?;
    let pool = Arc::new(pool);
    let reader_pool = Arc::clone(&pool);
    let seen = pool.with_write(move |conn| {
        conn.execute("INSERT INTO t (val) VALUES ('x')", &[])?;
        reader_pool.with_read(|reader| common::count_rows(reader, "t"))
    })?;
    assert_eq!(seen, 1);
    Ok(())
}

#[test]
fn lazy_open_failure_is_retried_by_next_submission() {
    let dir = tempfile::tempdir().expect("tempdir");
    let nested = dir.path().join("not-yet").join("queue.db");
    let queue = SerialAccessQueue::open(&nested, OpenFlags::read_write(), "lazy", true)
        .expect("spawn worker");

    let err = queue.run(|_| Ok(())).unwrap_err();
    assert!(matches!(err, SqliteAccessError::Open { .. }));

    std::fs::create_dir_all(nested.parent().unwrap()).unwrap();
    queue
        .run(|conn| conn.execute_batch("CREATE TABLE t (v INTEGER)"))
        .expect("second submission opens the connection");
    assert!(nested.exists());
}

#[test]
fn plain_run_leaves_transaction_to_the_caller() -> Result<(), SqliteAccessError> {
    let (_dir, pool) = common::seeded_pool("manual_tx", "t")?;
    pool.with_write(|conn| {
        conn.begin_explicit(TransactionMode::Immediate)?;
        conn.execute("INSERT INTO t (val) VALUES ('pending')", &[])?;
        Ok(())
    })?;
    // Nothing rolled the transaction back between work items.
    let still_open = pool.with_write(|conn| Ok(!conn.is_autocommit()))?;
    assert!(still_open);
    pool.with_write(|conn| conn.commit_explicit())?;
    assert_eq!(pool.with_read(|conn| common::count_rows(conn, "t"))?, 1);
    Ok(())
}
