//! Tests for the POST /api/release endpoint:
//! A device voluntarily gives its quota slot back.

use axum::{body::Body, http::Request, http::StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

#[path = "../common/mod.rs"]
mod common;
use common::*;

async fn post_json(app: axum::Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_string(&body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&bytes).expect("Response should be valid JSON");
    (status, json)
}

#[tokio::test]
async fn test_release_frees_slot_and_another_device_can_redeem() {
    let state = create_test_app_state();
    let code = {
        let mut conn = state.db.get().unwrap();
        let activation = issue_test_activation_with_quota(&conn, "buyer@example.com", 1);
        queries::redeem_atomic(&mut conn, &activation.code, "old-laptop", None)
            .unwrap()
            .unwrap();
        activation.code
    };
    let app = public_app(state);

    let (status, json) = post_json(
        app.clone(),
        "/api/release",
        json!({"code": code, "device_id": "old-laptop"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "release should return 200");
    assert_eq!(json["valid"], true);
    assert_eq!(json["device_count"], 0, "the slot should be free again");

    let (status, json) = post_json(
        app,
        "/api/redeem",
        json!({"code": code, "device_id": "new-laptop"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "freed slot should be redeemable");
    assert_eq!(json["binding"], "newly_bound");
}

#[tokio::test]
async fn test_release_is_idempotent_over_http() {
    let state = create_test_app_state();
    let code = {
        let mut conn = state.db.get().unwrap();
        let activation = issue_test_activation(&conn, "buyer@example.com");
        queries::redeem_atomic(&mut conn, &activation.code, "laptop-1", None)
            .unwrap()
            .unwrap();
        activation.code
    };
    let app = public_app(state);
    let body = json!({"code": code, "device_id": "laptop-1"});

    let (status, _) = post_json(app.clone(), "/api/release", body.clone()).await;
    assert_eq!(status, StatusCode::OK);

    let (status, json) = post_json(app, "/api/release", body).await;
    assert_eq!(status, StatusCode::OK, "repeat release should still be 200");
    assert_eq!(json["device_count"], 0);
}

#[tokio::test]
async fn test_release_never_bound_device_is_a_no_op() {
    let state = create_test_app_state();
    let code = {
        let conn = state.db.get().unwrap();
        issue_test_activation(&conn, "buyer@example.com").code
    };

    let (status, json) = post_json(
        public_app(state),
        "/api/release",
        json!({"code": code, "device_id": "stranger"}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["device_count"], 0);
}

#[tokio::test]
async fn test_release_works_on_expired_activation() {
    // Giving a slot back must not require a currently-valid license.
    let state = create_test_app_state();
    let code = {
        let mut conn = state.db.get().unwrap();
        let activation = issue_test_activation(&conn, "buyer@example.com");
        queries::redeem_atomic(&mut conn, &activation.code, "laptop-1", None)
            .unwrap()
            .unwrap();
        force_expire(&conn, &activation.id);
        activation.code
    };
    let state_check = state.clone();

    let (status, json) = post_json(
        public_app(state),
        "/api/release",
        json!({"code": code, "device_id": "laptop-1"}),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "release on expired code is still 200");
    assert_eq!(json["valid"], false);
    assert_eq!(json["reason"], "expired");
    assert_eq!(json["device_count"], 0, "the slot should still be freed");

    let conn = state_check.db.get().unwrap();
    let activation = queries::get_activation_by_code(&conn, code.as_str())
        .unwrap()
        .unwrap();
    let bindings = queries::list_bindings(&conn, &activation.id).unwrap();
    assert!(!bindings[0].active, "binding row should be released, not deleted");
}

#[tokio::test]
async fn test_release_unknown_code_returns_not_found() {
    let state = create_test_app_state();

    let (status, json) = post_json(
        public_app(state),
        "/api/release",
        json!({"code": "KM-NONE-NONE-NONE-NONE", "device_id": "laptop-1"}),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["reason"], "not_found");
}
