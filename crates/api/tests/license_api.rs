//! Integration tests for the `/api/v1/licenses` read endpoints.

mod common;

use axum::http::StatusCode;
use common::{body_json, get};
use liman_db::models::license::{NewLicense, STATUS_ACTIVE, STATUS_INACTIVE};
use liman_db::repositories::LicenseRepo;
use sqlx::PgPool;

async fn seed(pool: &PgPool, appid: &str, email: &str, status: &str) -> i64 {
    let license = LicenseRepo::insert(
        pool,
        &NewLicense {
            appid: Some(appid.to_string()),
            countid: Some(1000),
            dba: Some("Corner Store".to_string()),
            email: Some(email.to_string()),
            status: Some(status.to_string()),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    license.id
}

// ---------------------------------------------------------------------------
// Test: list returns seeded rows and honours the status filter
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn list_licenses_honours_status_filter(pool: PgPool) {
    seed(&pool, "app-1", "a@example.com", STATUS_ACTIVE).await;
    seed(&pool, "app-2", "b@example.com", STATUS_INACTIVE).await;

    let app = common::build_test_app(pool);

    let response = get(app.clone(), "/api/v1/licenses?status=active").await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    let rows = json["data"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["appid"], "app-1");

    // Unfiltered list sees both.
    let response = get(app, "/api/v1/licenses").await;
    let json = body_json(response).await;
    assert_eq!(json["data"].as_array().unwrap().len(), 2);
}

// ---------------------------------------------------------------------------
// Test: get by id returns the entity, missing id returns 404
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn get_license_by_id(pool: PgPool) {
    let id = seed(&pool, "app-1", "a@example.com", STATUS_ACTIVE).await;
    let app = common::build_test_app(pool);

    let response = get(app.clone(), &format!("/api/v1/licenses/{id}")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["data"]["id"], id);
    assert_eq!(json["data"]["dba"], "Corner Store");

    let response = get(app, "/api/v1/licenses/999999").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let json = body_json(response).await;
    assert_eq!(json["code"], "NOT_FOUND");
}

// ---------------------------------------------------------------------------
// Test: stats endpoint aggregates by status
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn stats_counts_by_status(pool: PgPool) {
    seed(&pool, "app-1", "a@example.com", STATUS_ACTIVE).await;
    seed(&pool, "app-2", "b@example.com", STATUS_ACTIVE).await;
    seed(&pool, "app-3", "c@example.com", STATUS_INACTIVE).await;

    let app = common::build_test_app(pool);
    let response = get(app, "/api/v1/licenses/stats").await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["data"]["total"], 3);
    assert_eq!(json["data"]["active"], 2);
    assert_eq!(json["data"]["inactive"], 1);
}

// ---------------------------------------------------------------------------
// Test: list responses are served from the cache until invalidated
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn list_is_cached_between_requests(pool: PgPool) {
    seed(&pool, "app-1", "a@example.com", STATUS_ACTIVE).await;

    let state = common::build_test_state(pool.clone(), std::sync::Arc::default());
    let app = common::router_for(state.clone());

    let response = get(app.clone(), "/api/v1/licenses").await;
    assert_eq!(body_json(response).await["data"].as_array().unwrap().len(), 1);

    // A row inserted behind the cache's back is not visible yet.
    seed(&pool, "app-2", "b@example.com", STATUS_ACTIVE).await;
    let response = get(app.clone(), "/api/v1/licenses").await;
    assert_eq!(body_json(response).await["data"].as_array().unwrap().len(), 1);

    // Invalidation (what a sync run does) makes it visible.
    state
        .cache
        .clear_pattern(liman_core::cache::ALL_LICENSE_KEYS)
        .await;
    let response = get(app, "/api/v1/licenses").await;
    assert_eq!(body_json(response).await["data"].as_array().unwrap().len(), 2);
}
