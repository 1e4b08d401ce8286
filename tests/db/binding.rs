//! Device binding and quota enforcement tests

#[path = "../common/mod.rs"]
mod common;

use common::*;
use keymint::db::queries::BindOutcome;
use rusqlite::Connection;

// ============ Bind Tests ============

#[test]
fn test_bind_new_device_claims_slot() {
    let mut conn = setup_test_db();
    let activation = issue_test_activation(&conn, "buyer@example.com");

    let outcome = queries::bind_device_atomic(
        &mut conn,
        &activation.id,
        activation.max_devices,
        "laptop-1",
        Some("Work MacBook"),
    )
    .unwrap();

    match outcome {
        BindOutcome::NewlyBound(binding) => {
            assert_eq!(binding.device_id, "laptop-1");
            assert_eq!(binding.label.as_deref(), Some("Work MacBook"));
            assert!(binding.active);
            assert!(binding.id.starts_with("km_dev_"));
        }
        other => panic!("expected NewlyBound, got {:?}", other),
    }

    assert_eq!(
        queries::active_device_count(&conn, &activation.id).unwrap(),
        1
    );
}

#[test]
fn test_rebind_same_device_is_idempotent() {
    let mut conn = setup_test_db();
    let activation = issue_test_activation(&conn, "buyer@example.com");

    queries::bind_device_atomic(&mut conn, &activation.id, 3, "laptop-1", None).unwrap();
    let outcome =
        queries::bind_device_atomic(&mut conn, &activation.id, 3, "laptop-1", None).unwrap();

    assert!(
        matches!(outcome, BindOutcome::AlreadyBound(_)),
        "same device binding again should be AlreadyBound"
    );
    assert_eq!(
        queries::active_device_count(&conn, &activation.id).unwrap(),
        1,
        "rebinding must not consume another slot"
    );
}

#[test]
fn test_bind_rejects_over_quota() {
    let mut conn = setup_test_db();
    let activation = issue_test_activation_with_quota(&conn, "buyer@example.com", 2);

    for i in 0..2 {
        let outcome =
            queries::bind_device_atomic(&mut conn, &activation.id, 2, &format!("dev-{}", i), None)
                .unwrap();
        assert!(matches!(outcome, BindOutcome::NewlyBound(_)));
    }

    let outcome =
        queries::bind_device_atomic(&mut conn, &activation.id, 2, "dev-overflow", None).unwrap();
    assert!(
        matches!(outcome, BindOutcome::QuotaExceeded),
        "binding past the quota should be refused"
    );

    assert_eq!(
        queries::active_device_count(&conn, &activation.id).unwrap(),
        2,
        "refused bind must not create a row"
    );
    let bindings = queries::list_bindings(&conn, &activation.id).unwrap();
    assert_eq!(bindings.len(), 2, "no row should exist for the refused device");
}

// ============ Release Tests ============

#[test]
fn test_release_frees_slot_for_another_device() {
    let mut conn = setup_test_db();
    let activation = issue_test_activation_with_quota(&conn, "buyer@example.com", 1);

    queries::bind_device_atomic(&mut conn, &activation.id, 1, "old-laptop", None).unwrap();
    let blocked =
        queries::bind_device_atomic(&mut conn, &activation.id, 1, "new-laptop", None).unwrap();
    assert!(matches!(blocked, BindOutcome::QuotaExceeded));

    let released = queries::release_binding(&conn, &activation.id, "old-laptop").unwrap();
    assert!(released, "release should free the active slot");

    let outcome =
        queries::bind_device_atomic(&mut conn, &activation.id, 1, "new-laptop", None).unwrap();
    assert!(
        matches!(outcome, BindOutcome::NewlyBound(_)),
        "freed slot should be claimable by another device"
    );
}

#[test]
fn test_release_is_idempotent() {
    let mut conn = setup_test_db();
    let activation = issue_test_activation(&conn, "buyer@example.com");
    queries::bind_device_atomic(&mut conn, &activation.id, 3, "laptop-1", None).unwrap();

    assert!(queries::release_binding(&conn, &activation.id, "laptop-1").unwrap());
    assert!(
        !queries::release_binding(&conn, &activation.id, "laptop-1").unwrap(),
        "second release should be a no-op"
    );
    assert!(
        !queries::release_binding(&conn, &activation.id, "never-bound").unwrap(),
        "releasing an unknown device should be a no-op"
    );
}

#[test]
fn test_released_device_reactivates_same_row() {
    let mut conn = setup_test_db();
    let activation = issue_test_activation(&conn, "buyer@example.com");

    let first = match queries::bind_device_atomic(&mut conn, &activation.id, 3, "laptop-1", None)
        .unwrap()
    {
        BindOutcome::NewlyBound(b) => b,
        other => panic!("expected NewlyBound, got {:?}", other),
    };
    queries::release_binding(&conn, &activation.id, "laptop-1").unwrap();

    let second = match queries::bind_device_atomic(&mut conn, &activation.id, 3, "laptop-1", None)
        .unwrap()
    {
        BindOutcome::NewlyBound(b) => b,
        other => panic!("re-bind after release should be NewlyBound, got {:?}", other),
    };

    assert_eq!(
        first.id, second.id,
        "re-binding should reactivate the historical row, not insert a new one"
    );
    assert!(second.active);
    assert!(second.released_at.is_none());
    assert_eq!(
        queries::list_bindings(&conn, &activation.id).unwrap().len(),
        1,
        "device should have exactly one row for its lifetime"
    );
}

// ============ Heartbeat Tests ============

#[test]
fn test_touch_binding_refreshes_heartbeat() {
    let mut conn = setup_test_db();
    let activation = issue_test_activation(&conn, "buyer@example.com");
    queries::bind_device_atomic(&mut conn, &activation.id, 3, "laptop-1", None).unwrap();

    // Backdate so the refresh is observable
    conn.execute(
        "UPDATE device_bindings SET last_seen_at = ?1 WHERE activation_id = ?2",
        rusqlite::params![past_timestamp(5), &activation.id],
    )
    .unwrap();

    assert!(queries::touch_binding(&conn, &activation.id, "laptop-1").unwrap());

    let binding = queries::get_binding(&conn, &activation.id, "laptop-1")
        .unwrap()
        .unwrap();
    assert!(
        binding.last_seen_at > past_timestamp(1),
        "heartbeat should move forward"
    );
}

#[test]
fn test_touch_binding_ignores_inactive_devices() {
    let mut conn = setup_test_db();
    let activation = issue_test_activation(&conn, "buyer@example.com");

    assert!(
        !queries::touch_binding(&conn, &activation.id, "never-bound").unwrap(),
        "unknown device should not be touchable"
    );

    queries::bind_device_atomic(&mut conn, &activation.id, 3, "laptop-1", None).unwrap();
    queries::release_binding(&conn, &activation.id, "laptop-1").unwrap();
    assert!(
        !queries::touch_binding(&conn, &activation.id, "laptop-1").unwrap(),
        "released device should not be touchable"
    );
}

#[test]
fn test_release_stale_bindings_only_touches_stale() {
    let mut conn = setup_test_db();
    let activation = issue_test_activation(&conn, "buyer@example.com");
    queries::bind_device_atomic(&mut conn, &activation.id, 3, "fresh", None).unwrap();
    queries::bind_device_atomic(&mut conn, &activation.id, 3, "stale", None).unwrap();

    conn.execute(
        "UPDATE device_bindings SET last_seen_at = ?1 WHERE device_id = 'stale'",
        rusqlite::params![past_timestamp(60)],
    )
    .unwrap();

    let released = queries::release_stale_bindings(&conn, past_timestamp(30)).unwrap();
    assert_eq!(released, 1, "only the stale binding should be released");

    let fresh = queries::get_binding(&conn, &activation.id, "fresh")
        .unwrap()
        .unwrap();
    assert!(fresh.active, "recently seen device must keep its slot");
    let stale = queries::get_binding(&conn, &activation.id, "stale")
        .unwrap()
        .unwrap();
    assert!(!stale.active);
    assert!(stale.released_at.is_some());
}

// ============ Concurrency Tests ============

#[test]
fn test_bind_device_atomic_concurrent() {
    // Several devices race for a single free slot. The IMMEDIATE
    // transaction serializes the count-then-claim, so exactly one wins.
    use std::sync::{Arc, Barrier};

    let num_threads = 5;

    // Cross-thread access needs a file-backed DB: in-memory DBs are
    // per-connection.
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let db_path = dir.path().join("bind_race.db");
    let conn = Connection::open(&db_path).expect("Failed to create test db");
    init_db(&conn).expect("Failed to init schema");
    let activation = issue_test_activation_with_quota(&conn, "buyer@example.com", 1);
    let activation_id = activation.id.clone();
    drop(conn);

    let barrier = Arc::new(Barrier::new(num_threads));
    let handles: Vec<_> = (0..num_threads)
        .map(|i| {
            let barrier = Arc::clone(&barrier);
            let db_path = db_path.clone();
            let activation_id = activation_id.clone();

            std::thread::spawn(move || {
                let mut thread_conn =
                    Connection::open(&db_path).expect("thread failed to open db");
                thread_conn
                    .busy_timeout(std::time::Duration::from_secs(5))
                    .expect("failed to set busy timeout");

                barrier.wait();

                matches!(
                    queries::bind_device_atomic(
                        &mut thread_conn,
                        &activation_id,
                        1,
                        &format!("race-device-{}", i),
                        None,
                    )
                    .expect("bind should not error"),
                    BindOutcome::NewlyBound(_)
                )
            })
        })
        .collect();

    let results: Vec<bool> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let success_count = results.iter().filter(|&&won| won).count();

    assert_eq!(
        success_count, 1,
        "exactly 1 of {} racing devices should claim the single slot",
        num_threads
    );

    let verify_conn = Connection::open(&db_path).expect("failed to reopen db");
    assert_eq!(
        queries::active_device_count(&verify_conn, &activation_id).unwrap(),
        1,
        "exactly one active binding should exist after the race"
    );
}
