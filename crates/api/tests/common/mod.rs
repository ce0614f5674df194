use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use sqlx::PgPool;
use tower::ServiceExt;

use liman_appcount::{AppCountError, ExternalLicenseApi, LicensePage};
use liman_core::cache::TtlCache;
use liman_core::monitor::Monitor;
use liman_core::validation::ExternalLicenseRecord;
use liman_events::{EventBus, SyncNotifier};
use liman_sync::{PgLicenseStore, SyncEngine};

use liman_api::config::ServerConfig;
use liman_api::router::build_app_router;
use liman_api::state::AppState;
use liman_api::ws::WsManager;

/// Scripted stand-in for the external licensing system.
///
/// `fetch_page` serves queued pages in order; once the queue is empty it
/// returns an empty final page. `fetch_by_appid` looks up a fixed map.
#[derive(Default)]
pub struct StubApi {
    pub pages: Mutex<VecDeque<Result<LicensePage, AppCountError>>>,
    pub by_appid: Mutex<std::collections::HashMap<String, ExternalLicenseRecord>>,
    pub pushed: Mutex<Vec<(String, serde_json::Value)>>,
}

impl StubApi {
    pub fn with_pages(pages: Vec<LicensePage>) -> Self {
        Self {
            pages: Mutex::new(pages.into_iter().map(Ok).collect()),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ExternalLicenseApi for StubApi {
    async fn fetch_page(&self, _offset: u32, _limit: u32) -> Result<LicensePage, AppCountError> {
        self.pages
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(LicensePage::default()))
    }

    async fn fetch_by_appid(
        &self,
        appid: &str,
    ) -> Result<Option<ExternalLicenseRecord>, AppCountError> {
        Ok(self.by_appid.lock().unwrap().get(appid).cloned())
    }

    async fn push_update(
        &self,
        appid: &str,
        payload: &serde_json::Value,
    ) -> Result<(), AppCountError> {
        self.pushed
            .lock()
            .unwrap()
            .push((appid.to_string(), payload.clone()));
        Ok(())
    }
}

/// An external record that passes validation.
pub fn external_record(countid: i64, appid: &str) -> ExternalLicenseRecord {
    ExternalLicenseRecord {
        countid: Some(serde_json::json!(countid)),
        appid: Some(appid.to_string()),
        dba: Some(format!("Store {countid}")),
        zip: Some("30301".to_string()),
        email: Some(format!("owner{countid}@example.com")),
        status: Some(serde_json::json!(1)),
        ..Default::default()
    }
}

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 30,
    }
}

/// Build the full application state around a scripted external API.
pub fn build_test_state(pool: PgPool, api: Arc<StubApi>) -> AppState {
    let monitor = Arc::new(Monitor::new());
    let cache = Arc::new(TtlCache::new());
    let event_bus = Arc::new(EventBus::default());
    let notifier = SyncNotifier::new(Arc::clone(&event_bus));

    let store = Arc::new(PgLicenseStore::new(pool.clone()));
    let engine = Arc::new(SyncEngine::new(
        api,
        store,
        Arc::clone(&cache),
        Arc::clone(&monitor),
        notifier,
        Duration::from_secs(30),
    ));

    AppState {
        pool,
        config: Arc::new(test_config()),
        engine,
        monitor,
        cache,
        event_bus,
        ws_manager: Arc::new(WsManager::new()),
    }
}

/// Build the full application router with all middleware layers, using the
/// given database pool and an empty stub API.
///
/// This goes through [`build_app_router`] so integration tests exercise the
/// same middleware stack (CORS, request ID, timeout, tracing, panic
/// recovery) that production uses.
pub fn build_test_app(pool: PgPool) -> Router {
    router_for(build_test_state(pool, Arc::new(StubApi::default())))
}

/// Build the router around a pre-made state (for tests that also need a
/// handle on the monitor, cache, or engine).
pub fn router_for(state: AppState) -> Router {
    let config = state.config.clone();
    build_app_router(state, &config)
}

/// Issue a GET request against the app.
pub async fn get(app: Router, uri: &str) -> Response<Body> {
    app.oneshot(
        Request::builder()
            .method("GET")
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    )
    .await
    .unwrap()
}

/// Issue a POST request with an empty body against the app.
pub async fn post(app: Router, uri: &str) -> Response<Body> {
    app.oneshot(
        Request::builder()
            .method("POST")
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    )
    .await
    .unwrap()
}

/// Collect a response body and parse it as JSON.
pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
