use sqlite_access::prelude::*;

mod common;

#[test]
fn unmet_journal_mode_is_setup_error_every_time() {
    // An in-memory database only ever reports `memory`.
    let pool = ConnectionPool::builder(":memory:")
        .journal_mode(JournalMode::Wal)
        .build()
        .expect("pool");

    for _ in 0..2 {
        let err = pool
            .with_write(|conn| conn.execute_batch("CREATE TABLE t (v INTEGER)"))
            .unwrap_err();
        match err {
            SqliteAccessError::Setup(message) => {
                assert!(message.contains("wal"), "{message}");
                assert!(message.contains("memory"), "{message}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!pool.write_queue_ready().unwrap());
    }
}

#[test]
fn skipped_setup_leaves_mode_alone() -> Result<(), SqliteAccessError> {
    let pool = ConnectionPool::builder(":memory:")
        .keep_journal_mode()
        .build()?;
    let mode = pool.with_write(|conn| conn.journal_mode())?;
    assert_eq!(mode, "memory");
    assert!(pool.write_queue_ready()?);
    Ok(())
}

#[test]
fn file_pool_switches_to_requested_mode() -> Result<(), SqliteAccessError> {
    for (mode, expected) in [(JournalMode::Wal, "wal"), (JournalMode::Truncate, "truncate")] {
        let (_dir, path) = common::temp_db(expected);
        let pool = ConnectionPool::builder(path).journal_mode(mode).build()?;
        assert!(!pool.write_queue_ready()?);
        let reported = pool.with_write(|conn| conn.journal_mode())?;
        assert_eq!(reported, expected);
        assert!(pool.write_queue_ready()?);
    }
    Ok(())
}

#[test]
fn reading_a_missing_file_is_open_error() {
    let (_dir, path) = common::temp_db("absent");
    let pool = ConnectionPool::builder(path).build().expect("pool");
    let err = pool.acquire_read_connection().unwrap_err();
    assert!(matches!(err, SqliteAccessError::Open { .. }));
    assert!(matches!(
        pool.with_read(|_| Ok(())),
        Err(SqliteAccessError::Open { .. })
    ));
}

#[test]
fn read_connections_are_read_only() -> Result<(), SqliteAccessError> {
    let (_dir, pool) = common::seeded_pool("readonly", "t")?;
    let err = pool
        .with_read(|conn| conn.execute("INSERT INTO t (val) VALUES ('nope')", &[]))
        .unwrap_err();
    assert!(matches!(err, SqliteAccessError::Step { .. }));
    // The reader went back to the free set even though the work failed.
    assert_eq!(pool.idle_read_connections()?, 1);
    Ok(())
}

#[test]
fn options_round_trip_through_serde() -> Result<(), SqliteAccessError> {
    let (_dir, path) = common::temp_db("from_json");
    let json = serde_json::json!({
        "path": path,
        "journal_mode": "truncate",
        "max_idle_read_connections": 2,
    });
    let options: PoolOptions = serde_json::from_value(json).expect("options");
    let pool = ConnectionPool::new(options)?;
    assert_eq!(pool.with_write(|conn| conn.journal_mode())?, "truncate");
    assert_eq!(pool.options().max_idle_read_connections, 2);
    Ok(())
}
