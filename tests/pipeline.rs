use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use disclosure_nlq::augment::{Augmentation, Augmenter};
use disclosure_nlq::config::Config;
use disclosure_nlq::data;
use disclosure_nlq::executor::ExecutionError;
use disclosure_nlq::pipeline::{CompileRequest, NlqService, RunMode, RunOptions};
use disclosure_nlq_core::error::StoreError;
use disclosure_nlq_core::models::FilterConfig;
use disclosure_nlq_core::record::StoreItem;
use disclosure_nlq_core::store::memory::InMemoryStore;
use disclosure_nlq_core::store::{AnnouncementStore, KeyQuery, Page, PageRequest, ScanQuery};

const TEVA: &str = "טבע תעשיות פרמצבטיות בע\"מ";
const LEUMI: &str = "בנק לאומי לישראל בע\"מ";
const SCENARIO: &str = "רבעוני של טבע מהרבעון השלישי 2025";

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 12, 1).unwrap()
}

fn test_config() -> Config {
    let mut cfg = Config::minimal();
    cfg.retrieval.base_backoff_ms = 1;
    cfg.retrieval.max_backoff_ms = 5;
    cfg.retrieval.call_timeout_secs = 5;
    cfg
}

fn options() -> RunOptions {
    RunOptions {
        compile: CompileRequest {
            today: Some(today()),
            ..CompileRequest::default()
        },
        ..RunOptions::default()
    }
}

fn item(v: Value) -> StoreItem {
    v.as_object().cloned().unwrap()
}

fn fallback_store() -> Arc<InMemoryStore> {
    Arc::new(InMemoryStore::from_items(
        data::fallback_items(&Config::minimal()).unwrap(),
    ))
}

/// Counts calls and delegates to an inner store.
struct CountingStore {
    inner: InMemoryStore,
    calls: AtomicUsize,
}

#[async_trait]
impl AnnouncementStore for CountingStore {
    async fn query(&self, query: &KeyQuery, page: &PageRequest) -> Result<Page, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.query(query, page).await
    }

    async fn scan(&self, query: &ScanQuery, page: &PageRequest) -> Result<Page, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.scan(query, page).await
    }
}

/// Always fails with a transient error.
#[derive(Default)]
struct FailingStore {
    calls: AtomicUsize,
}

#[async_trait]
impl AnnouncementStore for FailingStore {
    async fn query(&self, _: &KeyQuery, _: &PageRequest) -> Result<Page, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Transient("throttled".to_string()))
    }

    async fn scan(&self, _: &ScanQuery, _: &PageRequest) -> Result<Page, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Transient("throttled".to_string()))
    }

    fn name(&self) -> &str {
        "failing"
    }
}

/// Never answers within the test's patience.
struct StalledStore;

#[async_trait]
impl AnnouncementStore for StalledStore {
    async fn query(&self, _: &KeyQuery, _: &PageRequest) -> Result<Page, StoreError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(Page::default())
    }

    async fn scan(&self, _: &ScanQuery, _: &PageRequest) -> Result<Page, StoreError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(Page::default())
    }
}

#[tokio::test]
async fn test_scenario_quarterly_teva_q3() {
    let cfg = test_config();
    let schema = cfg.table.clone();
    let service = NlqService::new(cfg, fallback_store()).unwrap();

    let result = service
        .run_query(SCENARIO, &schema, &options(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.filters.company_names, vec![TEVA]);
    assert_eq!(result.filters.announcement_types, vec!["דוח רבעוני"]);
    assert_eq!(result.filters.start_date, NaiveDate::from_ymd_opt(2025, 7, 1));
    assert_eq!(result.filters.end_date, NaiveDate::from_ymd_opt(2025, 9, 30));
    assert_eq!(result.plan_kind, "by_primary_key");
    assert!(!result.degraded);

    let ids: Vec<&str> = result.items.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["fb-002"]);
    assert_eq!(result.items[0].announcement_date, "2025-08-06");
}

#[tokio::test]
async fn test_unmatched_query_scans_with_cap() {
    let cfg = test_config();
    let schema = cfg.table.clone();
    let service = NlqService::new(cfg, fallback_store()).unwrap();

    let result = service
        .run_query("xyzzy nonword", &schema, &options(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(result.filters.is_empty());
    assert_eq!(result.diagnostics.confidence, 0.0);
    assert_eq!(result.plan_kind, "full_scan_filtered");
    assert_eq!(result.items.len(), 12);
}

#[tokio::test]
async fn test_pagination_bound() {
    let inner = InMemoryStore::new();
    for i in 0..500 {
        inner.insert(item(json!({
            "id": format!("t-{i}"),
            "issuerName": TEVA,
            "form_type": "דוח מיידי",
            "publicationDate": format!("2024-{:02}-{:02}", i % 12 + 1, i % 28 + 1),
        })));
    }
    let store = Arc::new(CountingStore {
        inner,
        calls: AtomicUsize::new(0),
    });
    let cfg = test_config();
    let schema = cfg.table.clone();
    let service = NlqService::new(cfg, store.clone()).unwrap();

    let mut opts = options();
    opts.max_items = Some(5);
    let result = service
        .run_query("טבע", &schema, &opts, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.items.len(), 5);
    assert_eq!(result.fetched, 5);
    assert_eq!(store.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_partitions_merge_by_date() {
    let store = Arc::new(InMemoryStore::from_items(vec![
        item(json!({"id": "t1", "issuerName": TEVA, "publicationDate": "2025-03-01"})),
        item(json!({"id": "t2", "issuerName": TEVA, "publicationDate": "2025-01-15"})),
        item(json!({"id": "l1", "issuerName": LEUMI, "publicationDate": "2025-02-10"})),
        item(json!({"id": "l2", "issuerName": LEUMI, "publicationDate": "2024-12-31"})),
    ]));
    let cfg = test_config();
    let schema = cfg.table.clone();
    let service = NlqService::new(cfg, store).unwrap();

    let result = service
        .run_query("לאומי וטבע", &schema, &options(), &CancellationToken::new())
        .await
        .unwrap();
    let ids: Vec<&str> = result.items.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["t1", "l1", "t2", "l2"]);

    let mut opts = options();
    opts.ascending = true;
    let result = service
        .run_query("לאומי וטבע", &schema, &opts, &CancellationToken::new())
        .await
        .unwrap();
    let ids: Vec<&str> = result.items.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["l2", "t2", "l1", "t1"]);
}

#[tokio::test]
async fn test_store_failures_exhaust_retries() {
    let store = Arc::new(FailingStore::default());
    let cfg = test_config();
    let schema = cfg.table.clone();
    let service = NlqService::new(cfg, store.clone()).unwrap();

    let err = service
        .run_query(SCENARIO, &schema, &options(), &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        ExecutionError::StoreUnavailable { attempts, last_error } => {
            assert_eq!(attempts, 3);
            assert!(last_error.contains("throttled"));
        }
        other => panic!("expected StoreUnavailable, got {other:?}"),
    }
    assert_eq!(store.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_degraded_mode_serves_static_dataset() {
    let cfg = test_config();
    let schema = cfg.table.clone();
    let service = NlqService::new(cfg, Arc::new(FailingStore::default())).unwrap();

    let result = service
        .run_query_or_fallback(SCENARIO, &schema, &options(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(result.degraded);
    assert_eq!(result.diagnostics.confidence, 0.0);
    assert!(result.diagnostics.notes[0].starts_with("degraded mode"));
    let ids: Vec<&str> = result.items.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["fb-002"]);
}

#[tokio::test]
async fn test_invalid_schema_is_not_degraded() {
    let cfg = test_config();
    let mut bad_schema = cfg.table.clone();
    let service = NlqService::new(cfg, fallback_store()).unwrap();

    bad_schema.date_index_name = " ".to_string();
    let err = service
        .run_query_or_fallback(SCENARIO, &bad_schema, &options(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ExecutionError::InvalidPlan(_)));
}

#[tokio::test]
async fn test_cancellation_aborts_store_call() {
    let cfg = test_config();
    let schema = cfg.table.clone();
    let service = NlqService::new(cfg, Arc::new(StalledStore)).unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let err = service
        .run_query_or_fallback("טבע", &schema, &options(), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, ExecutionError::Cancelled));
}

#[tokio::test]
async fn test_dry_run_describes_without_store_access() {
    let store = Arc::new(FailingStore::default());
    let cfg = test_config();
    let schema = cfg.table.clone();
    let service = NlqService::new(cfg, store.clone()).unwrap();

    let mut opts = options();
    opts.mode = RunMode::DryRun;
    opts.region = Some("il-central-1".to_string());
    let result = service
        .run_query(SCENARIO, &schema, &opts, &CancellationToken::new())
        .await
        .unwrap();

    assert!(result.items.is_empty());
    assert_eq!(store.calls.load(Ordering::SeqCst), 0);
    let description = result.rendered_plan_description.unwrap();
    assert!(description.starts_with("-- region: il-central-1"));
    assert!(description.contains("\"CompanyDisclosuresHebrew\""));
    assert!(description.contains("'2025-07-01'"));
}

#[tokio::test]
async fn test_unreachable_endpoint_falls_back() {
    let cfg = test_config();
    let schema = cfg.table.clone();
    let service = NlqService::new(cfg, fallback_store()).unwrap();

    let tmp = tempfile::TempDir::new().unwrap();
    let blocker = tmp.path().join("not-a-dir");
    std::fs::write(&blocker, "x").unwrap();

    let mut opts = options();
    opts.endpoint = Some(blocker.join("nlq.sqlite").display().to_string());
    let result = service
        .run_query_or_fallback(SCENARIO, &schema, &opts, &CancellationToken::new())
        .await
        .unwrap();
    assert!(result.degraded);
    assert_eq!(result.items.len(), 1);
}

#[tokio::test]
async fn test_compile_filters_relative_window() {
    let service = NlqService::offline(test_config()).unwrap();
    let request = CompileRequest {
        auto_expand_aliases: true,
        force_absolute_timeframe: false,
        today: Some(today()),
    };
    let c = service
        .compile_filters("Teva last 30 days", &request, &CancellationToken::new())
        .await;
    assert_eq!(c.filters.company_names, vec![TEVA]);
    assert!(c.filters.relative_timeframe.is_some());
    assert!(c.filters.start_date.is_none());
}

#[tokio::test]
async fn test_suggest_and_reload() {
    let service = NlqService::offline(test_config()).unwrap();
    let before = service.suggest("טב", None);
    assert_eq!(before[0], TEVA);

    let n = service.reload_aliases().unwrap();
    assert_eq!(n, service.alias_count());
    assert_eq!(service.suggest("טב", None), before);
    assert!(service.suggest("xyzzy", Some(5)).is_empty());
}

/// Adds the quarterly report type to whatever the heuristic found.
struct QuarterlyAugmenter;

#[async_trait]
impl Augmenter for QuarterlyAugmenter {
    fn name(&self) -> &str {
        "quarterly"
    }

    async fn augment(
        &self,
        _query: &str,
        heuristic: &FilterConfig,
        _today: NaiveDate,
    ) -> anyhow::Result<Augmentation> {
        let mut filters = heuristic.clone();
        filters.announcement_types = vec!["רבעוני".to_string()];
        Ok(Augmentation {
            filters,
            final_text: Some("Teva quarterly reports".to_string()),
        })
    }
}

#[tokio::test]
async fn test_augmentation_revises_low_confidence_filters() {
    let service = NlqService::offline(test_config())
        .unwrap()
        .with_augmenter(Arc::new(QuarterlyAugmenter));
    let request = CompileRequest {
        today: Some(today()),
        ..CompileRequest::default()
    };

    let c = service
        .compile_filters("טבע zzzz", &request, &CancellationToken::new())
        .await;
    assert_eq!(c.filters.company_names, vec![TEVA]);
    assert_eq!(c.filters.announcement_types, vec!["דוח רבעוני"]);
    assert_eq!(c.diagnostics.final_text.as_deref(), Some("Teva quarterly reports"));
    assert!((c.diagnostics.confidence - 0.75).abs() < 1e-9);

    // Fully resolved queries skip augmentation.
    let c = service
        .compile_filters("טבע", &request, &CancellationToken::new())
        .await;
    assert!(c.filters.announcement_types.is_empty());
}
