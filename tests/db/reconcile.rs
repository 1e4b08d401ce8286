//! Purchase recording and reconciliation tests

#[path = "../common/mod.rs"]
mod common;

use common::*;
use keymint::db::queries::IngestOutcome;
use rusqlite::Connection;

fn ingest_input(email: &str, purchase_id: &str) -> CreateActivation {
    CreateActivation {
        purchase_id: Some(purchase_id.to_string()),
        ..test_input(email)
    }
}

// ============ Recording Tests ============

#[test]
fn test_record_purchase_stores_row() {
    let conn = setup_test_db();

    let purchase =
        queries::record_purchase(&conn, &test_purchase_input("sale_1", "buyer@example.com"))
            .unwrap();

    assert!(purchase.id.starts_with("km_pur_"));
    assert_eq!(purchase.provider, "gumroad");
    assert_eq!(purchase.provider_purchase_id, "sale_1");
    assert_eq!(purchase.email, "buyer@example.com");
    assert_eq!(purchase.price_cents, Some(2900));
    assert!(!purchase.processed, "new purchase starts unprocessed");
    assert!(purchase.activation_id.is_none());
}

#[test]
fn test_record_purchase_deduplicates_on_provider_id() {
    let conn = setup_test_db();

    let first =
        queries::record_purchase(&conn, &test_purchase_input("sale_1", "buyer@example.com"))
            .unwrap();
    let second =
        queries::record_purchase(&conn, &test_purchase_input("sale_1", "buyer@example.com"))
            .unwrap();

    assert_eq!(
        first.id, second.id,
        "duplicate delivery should land on the existing row"
    );

    let (_, total) = queries::list_purchases(&conn, None, 50, 0).unwrap();
    assert_eq!(total, 1, "only one purchase row should exist");
}

#[test]
fn test_same_sale_id_different_provider_is_distinct() {
    let conn = setup_test_db();

    queries::record_purchase(&conn, &test_purchase_input("sale_1", "buyer@example.com")).unwrap();
    let other = NewPurchase {
        provider: "paddle".to_string(),
        ..test_purchase_input("sale_1", "buyer@example.com")
    };
    queries::record_purchase(&conn, &other).unwrap();

    let (_, total) = queries::list_purchases(&conn, None, 50, 0).unwrap();
    assert_eq!(total, 2, "idempotency key is (provider, sale id), not sale id alone");
}

// ============ Ingest Tests ============

#[test]
fn test_ingest_issues_and_links_activation() {
    let mut conn = setup_test_db();
    let purchase =
        queries::record_purchase(&conn, &test_purchase_input("sale_1", "buyer@example.com"))
            .unwrap();

    let outcome = queries::ingest_purchase_atomic(
        &mut conn,
        TEST_PREFIX,
        &purchase.id,
        &ingest_input("buyer@example.com", &purchase.id),
    )
    .unwrap();

    let activation = match outcome {
        IngestOutcome::Processed(activation) => activation,
        IngestOutcome::AlreadyProcessed(_) => panic!("first ingest should process"),
    };
    assert_eq!(activation.purchase_id.as_deref(), Some(purchase.id.as_str()));

    let stored = queries::get_purchase_by_id(&conn, &purchase.id)
        .unwrap()
        .unwrap();
    assert!(stored.processed);
    assert!(stored.processed_at.is_some());
    assert_eq!(
        stored.activation_id.as_deref(),
        Some(activation.id.as_str()),
        "purchase should link back to the issued activation"
    );
}

#[test]
fn test_ingest_twice_issues_exactly_one_activation() {
    let mut conn = setup_test_db();
    let purchase =
        queries::record_purchase(&conn, &test_purchase_input("sale_1", "buyer@example.com"))
            .unwrap();
    let input = ingest_input("buyer@example.com", &purchase.id);

    let first = queries::ingest_purchase_atomic(&mut conn, TEST_PREFIX, &purchase.id, &input)
        .unwrap();
    assert!(matches!(first, IngestOutcome::Processed(_)));

    let second = queries::ingest_purchase_atomic(&mut conn, TEST_PREFIX, &purchase.id, &input)
        .unwrap();
    assert!(
        matches!(second, IngestOutcome::AlreadyProcessed(_)),
        "retry should observe the processed flag"
    );

    let (_, total) = queries::list_activations(&conn, None, 50, 0).unwrap();
    assert_eq!(total, 1, "a resent webhook must never mint a second code");
}

#[test]
fn test_ingest_adopts_orphaned_activation() {
    // An earlier run issued the activation but crashed before flipping the
    // processed flag. The next delivery must adopt it, not issue again.
    let mut conn = setup_test_db();
    let purchase =
        queries::record_purchase(&conn, &test_purchase_input("sale_1", "buyer@example.com"))
            .unwrap();
    let input = ingest_input("buyer@example.com", &purchase.id);

    let orphan = queries::issue_activation(&conn, TEST_PREFIX, &input).unwrap();

    let outcome = queries::ingest_purchase_atomic(&mut conn, TEST_PREFIX, &purchase.id, &input)
        .unwrap();
    let adopted = match outcome {
        IngestOutcome::Processed(activation) => activation,
        IngestOutcome::AlreadyProcessed(_) => panic!("ingest should complete the processing"),
    };

    assert_eq!(adopted.id, orphan.id, "the orphaned activation should be adopted");
    let (_, total) = queries::list_activations(&conn, None, 50, 0).unwrap();
    assert_eq!(total, 1);

    let stored = queries::get_purchase_by_id(&conn, &purchase.id)
        .unwrap()
        .unwrap();
    assert!(stored.processed);
    assert_eq!(stored.activation_id.as_deref(), Some(orphan.id.as_str()));
}

#[test]
fn test_ingest_unknown_purchase_errors() {
    let mut conn = setup_test_db();

    let result = queries::ingest_purchase_atomic(
        &mut conn,
        TEST_PREFIX,
        "km_pur_missing",
        &ingest_input("buyer@example.com", "km_pur_missing"),
    );
    assert!(result.is_err(), "unknown purchase id should error");
}

// ============ Listing Tests ============

#[test]
fn test_list_purchases_processed_filter() {
    let mut conn = setup_test_db();
    let processed_purchase =
        queries::record_purchase(&conn, &test_purchase_input("sale_1", "a@example.com")).unwrap();
    queries::record_purchase(&conn, &test_purchase_input("sale_2", "b@example.com")).unwrap();
    queries::ingest_purchase_atomic(
        &mut conn,
        TEST_PREFIX,
        &processed_purchase.id,
        &ingest_input("a@example.com", &processed_purchase.id),
    )
    .unwrap();

    let (rows, total) = queries::list_purchases(&conn, Some(true), 50, 0).unwrap();
    assert_eq!(total, 1);
    assert_eq!(rows[0].provider_purchase_id, "sale_1");

    let (rows, total) = queries::list_purchases(&conn, Some(false), 50, 0).unwrap();
    assert_eq!(total, 1);
    assert_eq!(rows[0].provider_purchase_id, "sale_2");

    let (_, total) = queries::list_purchases(&conn, None, 50, 0).unwrap();
    assert_eq!(total, 2);
}

// ============ Concurrency Tests ============

#[test]
fn test_ingest_purchase_atomic_concurrent() {
    // Concurrent deliveries of the same sale serialize on the IMMEDIATE
    // transaction: one processes, the rest see AlreadyProcessed.
    use std::sync::{Arc, Barrier};

    let num_threads = 4;

    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let db_path = dir.path().join("ingest_race.db");
    let conn = Connection::open(&db_path).expect("Failed to create test db");
    init_db(&conn).expect("Failed to init schema");
    let purchase =
        queries::record_purchase(&conn, &test_purchase_input("sale_1", "buyer@example.com"))
            .unwrap();
    let purchase_id = purchase.id.clone();
    drop(conn);

    let barrier = Arc::new(Barrier::new(num_threads));
    let handles: Vec<_> = (0..num_threads)
        .map(|_| {
            let barrier = Arc::clone(&barrier);
            let db_path = db_path.clone();
            let purchase_id = purchase_id.clone();

            std::thread::spawn(move || {
                let mut thread_conn =
                    Connection::open(&db_path).expect("thread failed to open db");
                thread_conn
                    .busy_timeout(std::time::Duration::from_secs(5))
                    .expect("failed to set busy timeout");

                barrier.wait();

                let outcome = queries::ingest_purchase_atomic(
                    &mut thread_conn,
                    TEST_PREFIX,
                    &purchase_id,
                    &CreateActivation {
                        purchase_id: Some(purchase_id.clone()),
                        ..test_input("buyer@example.com")
                    },
                )
                .expect("ingest should not error");
                matches!(outcome, IngestOutcome::Processed(_))
            })
        })
        .collect();

    let results: Vec<bool> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let processed_count = results.iter().filter(|&&processed| processed).count();

    assert_eq!(
        processed_count, 1,
        "exactly 1 of {} concurrent deliveries should process the purchase",
        num_threads
    );

    let verify_conn = Connection::open(&db_path).expect("failed to reopen db");
    let (_, total) = queries::list_activations(&verify_conn, None, 50, 0).unwrap();
    assert_eq!(total, 1, "exactly one activation should exist after the race");
}
