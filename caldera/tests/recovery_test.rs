mod common;

use common::*;
use strata::transaction::IsolationLevel::RepeatableRead;
use tempfile::tempdir;

#[test]
fn crash_before_commit_rolls_the_transaction_back() {
    let dir = tempdir().unwrap();

    // Session 1: insert without committing; the log reaches disk, the
    // heap pages do not.
    {
        let engine = Engine::open(dir.path());
        let table = engine.create_table(20, int_varchar_columns(), true);
        let xid = engine.transaction_manager.begin().unwrap();
        let context = engine.context(xid, 0, RepeatableRead);
        run_plan(&insert_plan(&table, &[(1, "phantom")]), &context).unwrap();
        engine.log_manager.flush(None).unwrap();
        // Crash: no commit, no page flush.
    }

    // Session 2: recovery replays the insert, then rolls it back.
    let engine = Engine::open(dir.path());
    let table = engine.create_table(20, int_varchar_columns(), false);
    engine.recover();

    let reader = engine.transaction_manager.begin().unwrap();
    let context = engine.context(reader, 0, RepeatableRead);
    assert!(run_plan(&scan_plan(&table, "t"), &context)
        .unwrap()
        .is_empty());
}

#[test]
fn committed_work_survives_a_crash_before_page_flush() {
    let dir = tempdir().unwrap();

    {
        let engine = Engine::open(dir.path());
        let table = engine.create_table(20, int_varchar_columns(), true);
        let xid = engine.transaction_manager.begin().unwrap();
        let context = engine.context(xid, 0, RepeatableRead);
        run_plan(&insert_plan(&table, &[(1, "durable"), (2, "rows")]), &context).unwrap();
        // Commit flushes the log; the dirty pages never reach disk.
        engine.transaction_manager.commit(xid).unwrap();
    }

    let engine = Engine::open(dir.path());
    let table = engine.create_table(20, int_varchar_columns(), false);
    engine.recover();

    let reader = engine.transaction_manager.begin().unwrap();
    let context = engine.context(reader, 0, RepeatableRead);
    let rows = run_plan(&scan_plan(&table, "t"), &context).unwrap();
    assert_eq!(ints(&rows, 0), vec![Some(1), Some(2)]);
}

#[test]
fn recovery_resumes_the_xid_allocator_past_logged_transactions() {
    let dir = tempdir().unwrap();

    let crashed_xid = {
        let engine = Engine::open(dir.path());
        let table = engine.create_table(20, int_varchar_columns(), true);
        let xid = engine.transaction_manager.begin().unwrap();
        let context = engine.context(xid, 0, RepeatableRead);
        run_plan(&insert_plan(&table, &[(7, "x")]), &context).unwrap();
        engine.log_manager.flush(None).unwrap();
        xid
    };

    let engine = Engine::open(dir.path());
    engine.create_table(20, int_varchar_columns(), false);
    engine.recover();
    let next = engine.transaction_manager.begin().unwrap();
    assert!(next > crashed_xid);
}

#[test]
fn checkpoint_bounds_the_analysis_scan() {
    let dir = tempdir().unwrap();

    {
        let engine = Engine::open(dir.path());
        let table = engine.create_table(20, int_varchar_columns(), true);

        let first = engine.transaction_manager.begin().unwrap();
        let context = engine.context(first, 0, RepeatableRead);
        run_plan(&insert_plan(&table, &[(1, "before")]), &context).unwrap();
        engine.transaction_manager.commit(first).unwrap();
        engine.lock_manager.release_locks(first);

        engine.log_manager.checkpoint().unwrap();
        assert!(engine.disk.read_master_record().unwrap().is_some());

        let second = engine.transaction_manager.begin().unwrap();
        let context = engine.context(second, 0, RepeatableRead);
        run_plan(&insert_plan(&table, &[(2, "after")]), &context).unwrap();
        engine.transaction_manager.commit(second).unwrap();
    }

    let engine = Engine::open(dir.path());
    let table = engine.create_table(20, int_varchar_columns(), false);
    engine.recover();

    let reader = engine.transaction_manager.begin().unwrap();
    let context = engine.context(reader, 0, RepeatableRead);
    let rows = run_plan(&scan_plan(&table, "t"), &context).unwrap();
    assert_eq!(ints(&rows, 0), vec![Some(1), Some(2)]);
}

#[test]
fn clean_shutdown_replay_matches_the_pre_shutdown_state() {
    let dir = tempdir().unwrap();

    let expected = {
        let engine = Engine::open(dir.path());
        let table = engine.create_table(20, int_varchar_columns(), true);
        let xid = engine.transaction_manager.begin().unwrap();
        let context = engine.context(xid, 0, RepeatableRead);
        run_plan(
            &insert_plan(&table, &[(1, "a"), (2, "b"), (3, "c")]),
            &context,
        )
        .unwrap();
        engine.transaction_manager.commit(xid).unwrap();
        engine.lock_manager.release_locks(xid);
        engine.buffer_pool.flush_all().unwrap();

        let reader = engine.transaction_manager.begin().unwrap();
        let context = engine.context(reader, 0, RepeatableRead);
        run_plan(&scan_plan(&table, "t"), &context).unwrap()
    };

    let engine = Engine::open(dir.path());
    let table = engine.create_table(20, int_varchar_columns(), false);
    engine.recover();

    let reader = engine.transaction_manager.begin().unwrap();
    let context = engine.context(reader, 0, RepeatableRead);
    let rows = run_plan(&scan_plan(&table, "t"), &context).unwrap();
    assert_eq!(rows.len(), expected.len());
    for (actual, expected) in rows.iter().zip(expected.iter()) {
        assert_eq!(actual.header, expected.header);
        assert_eq!(actual.values(), expected.values());
    }
}

#[test]
fn page_writeback_never_outruns_the_flushed_log() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(dir.path());
    let table = engine.create_table(20, int_varchar_columns(), true);

    let xid = engine.transaction_manager.begin().unwrap();
    let context = engine.context(xid, 0, RepeatableRead);
    run_plan(&insert_plan(&table, &[(1, "w")]), &context).unwrap();

    // Nothing flushed yet; forcing the page out must drag the log along.
    assert!(engine.log_manager.flushed_lsn().is_none());
    engine
        .buffer_pool
        .flush_page(DB_OID, table.oid(), 0)
        .unwrap();

    let guard = engine.buffer_pool.get_page(DB_OID, table.oid(), 0).unwrap();
    let page_lsn = guard.read().page_lsn();
    assert!(engine.log_manager.flushed_lsn().unwrap() >= page_lsn);
    // The dirty page table no longer tracks the written-back page.
    assert!(!engine
        .log_manager
        .dpt_snapshot()
        .contains_key(&(table.oid(), 0)));
}
