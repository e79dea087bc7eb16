//! HTTP contract tests: the router is served on an ephemeral port and
//! exercised with a real client.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value};

use disclosure_nlq::config::Config;
use disclosure_nlq::data;
use disclosure_nlq::pipeline::NlqService;
use disclosure_nlq::server::router;
use disclosure_nlq_core::error::StoreError;
use disclosure_nlq_core::store::memory::InMemoryStore;
use disclosure_nlq_core::store::{AnnouncementStore, KeyQuery, Page, PageRequest, ScanQuery};

const TEVA: &str = "טבע תעשיות פרמצבטיות בע\"מ";
const SCENARIO: &str = "רבעוני של טבע מהרבעון השלישי 2025";

fn test_config() -> Config {
    let mut cfg = Config::minimal();
    cfg.retrieval.base_backoff_ms = 1;
    cfg.retrieval.max_backoff_ms = 5;
    cfg.retrieval.call_timeout_secs = 5;
    cfg
}

/// Fails every call with the given error.
struct BrokenStore(StoreError);

#[async_trait]
impl AnnouncementStore for BrokenStore {
    async fn query(&self, _: &KeyQuery, _: &PageRequest) -> Result<Page, StoreError> {
        Err(self.0.clone())
    }

    async fn scan(&self, _: &ScanQuery, _: &PageRequest) -> Result<Page, StoreError> {
        Err(self.0.clone())
    }
}

/// Serves the router over `store` and returns its base URL.
async fn serve(store: Arc<dyn AnnouncementStore>) -> String {
    let service = Arc::new(NlqService::new(test_config(), store).unwrap());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(service)).await.unwrap();
    });
    format!("http://{}", addr)
}

fn broken(err: StoreError) -> Arc<dyn AnnouncementStore> {
    Arc::new(BrokenStore(err))
}

fn scenario() -> Value {
    json!({"query": SCENARIO, "today": "2025-12-01"})
}

async fn serve_fallback_data() -> String {
    let items = data::fallback_items(&Config::minimal()).unwrap();
    serve(Arc::new(InMemoryStore::from_items(items))).await
}

async fn post(base: &str, path: &str, body: Value) -> (StatusCode, Value) {
    let resp = reqwest::Client::new()
        .post(format!("{}{}", base, path))
        .json(&body)
        .send()
        .await
        .unwrap();
    let status = resp.status();
    (status, resp.json().await.unwrap())
}

async fn get(base: &str, path: &str) -> (StatusCode, Value) {
    let resp = reqwest::get(format!("{}{}", base, path)).await.unwrap();
    let status = resp.status();
    (status, resp.json().await.unwrap())
}

#[tokio::test]
async fn test_health_reports_alias_count() {
    let base = serve_fallback_data().await;
    let (status, body) = get(&base, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert!(body["aliases"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn test_filters_endpoint_compiles_query() {
    let base = serve_fallback_data().await;
    let (status, body) = post(
        &base,
        "/filters",
        json!({"query": SCENARIO, "today": "2025-12-01"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["filters"]["companyNames"][0], TEVA);
    assert_eq!(body["filters"]["startDate"], "2025-07-01");
    assert_eq!(body["filters"]["endDate"], "2025-09-30");
    assert!(body["diagnostics"]["confidence"].as_f64().unwrap() > 0.7);
}

#[tokio::test]
async fn test_run_endpoint_queries_store() {
    let base = serve_fallback_data().await;
    let (status, body) = post(&base, "/run", scenario()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["degraded"], false);
    assert_eq!(body["planKind"], "by_primary_key");
    assert_eq!(body["items"][0]["id"], "fb-002");
}

#[tokio::test]
async fn test_run_falls_back_over_http() {
    let base = serve(broken(StoreError::Transient("throttled".into()))).await;
    let (status, body) = post(&base, "/run", scenario()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["degraded"], true);
    assert_eq!(body["diagnostics"]["confidence"], 0.0);
    assert!(body["diagnostics"]["notes"][0]
        .as_str()
        .unwrap()
        .starts_with("degraded mode"));
    assert_eq!(body["items"][0]["id"], "fb-002");
}

#[tokio::test]
async fn test_run_without_fallback_maps_store_errors() {
    let base = serve(broken(StoreError::Transient("throttled".into()))).await;
    let (status, body) = post(
        &base,
        "/run",
        json!({"query": SCENARIO, "today": "2025-12-01", "fallback": false}),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "store_unavailable");
    assert!(body["error"]["message"].as_str().unwrap().contains("throttled"));

    let base = serve(broken(StoreError::Permanent("no such table".into()))).await;
    let (status, body) = post(&base, "/run", scenario()).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"]["code"], "store_rejected");
}

#[tokio::test]
async fn test_plan_endpoint_skips_store() {
    let base = serve(broken(StoreError::Permanent("unused".into()))).await;
    let (status, body) = post(&base, "/plan", scenario()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["planKind"], "by_primary_key");
    assert!(body["items"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_suggest_rejects_zero_limit() {
    let base = serve_fallback_data().await;
    let (status, body) = get(&base, "/suggest?q=Leu&limit=0").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");

    let (status, body) = get(&base, "/suggest?q=Leu&limit=3").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["suggestions"][0], "Leumi");
}

#[tokio::test]
async fn test_reload_returns_alias_count() {
    let base = serve_fallback_data().await;
    let (_, health) = get(&base, "/health").await;
    let (status, body) = post(&base, "/aliases/reload", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["aliases"], health["aliases"]);
}
