//! Query executor.
//!
//! Runs a [`QueryPlan`] against an [`AnnouncementStore`]:
//!
//! - one paginated stream per partition (one for the date index and for
//!   full scans), merged by sort key through [`KWayMerge`]
//! - pages are pulled lazily and reading stops at the plan's `limit`
//! - every store call is time-bounded and retried with exponential backoff
//!   on [`StoreError::Transient`]
//! - a [`CancellationToken`] aborts in-flight calls and backoff sleeps
//!
//! # Retry Strategy
//!
//! | Failure | Action |
//! |---------|--------|
//! | transient error or call timeout | retry, sleeping `base * 2^(n-1)` capped at `max_backoff` |
//! | permanent error | fail immediately with [`ExecutionError::Rejected`] |
//! | retries exhausted | [`ExecutionError::StoreUnavailable`] |

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use disclosure_nlq_core::error::{PlanConfigError, StoreError};
use disclosure_nlq_core::merge::KWayMerge;
use disclosure_nlq_core::models::AnnouncementRecord;
use disclosure_nlq_core::plan::{QueryPlan, RecordPredicate, TableSchema};
use disclosure_nlq_core::record::{self, StoreItem};
use disclosure_nlq_core::store::{AnnouncementStore, KeyQuery, Page, PageRequest, ScanQuery};

use crate::config::RetrievalConfig;

#[derive(Debug, Error)]
pub enum ExecutionError {
    /// Retries exhausted on transient failures. Callers may fall back to
    /// static data.
    #[error("store unavailable after {attempts} attempts: {last_error}")]
    StoreUnavailable { attempts: u32, last_error: String },

    #[error("store rejected request: {0}")]
    Rejected(String),

    #[error("query cancelled")]
    Cancelled,

    #[error(transparent)]
    InvalidPlan(#[from] PlanConfigError),
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub call_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetrievalConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_backoff: Duration::from_millis(config.base_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            call_timeout: Duration::from_secs(config.call_timeout_secs),
        }
    }

    /// Sleep before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

/// Records produced by one plan execution.
#[derive(Debug, Clone, Default)]
pub struct ExecutionOutcome {
    pub records: Vec<AnnouncementRecord>,
    /// Items read from the store, including ones past the limit.
    pub fetched: usize,
    pub store_calls: usize,
}

enum Source {
    Key(KeyQuery),
    Scan(ScanQuery),
}

impl Source {
    fn sort_attr(&self) -> &str {
        match self {
            Source::Key(q) => &q.sort_attr,
            Source::Scan(q) => &q.sort_attr,
        }
    }
}

pub struct QueryExecutor {
    store: Arc<dyn AnnouncementStore>,
    schema: TableSchema,
    retry: RetryPolicy,
    page_size: usize,
}

impl QueryExecutor {
    pub fn new(
        store: Arc<dyn AnnouncementStore>,
        schema: TableSchema,
        retry: RetryPolicy,
        page_size: usize,
    ) -> Self {
        Self {
            store,
            schema,
            retry,
            page_size: page_size.max(1),
        }
    }

    /// Executes `plan`, returning at most `plan.limit()` records in global
    /// sort-key order.
    pub async fn execute(
        &self,
        plan: &QueryPlan,
        cancel: &CancellationToken,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        let sources = self.sources(plan);
        let limit = plan.limit();
        let page_limit = self.page_size.min(limit).max(1);

        let mut merge = KWayMerge::new(sources.len(), plan.descending());
        let mut cursors: Vec<Option<String>> = vec![None; sources.len()];
        let mut items: Vec<StoreItem> = Vec::with_capacity(limit);
        let mut outcome = ExecutionOutcome::default();

        while items.len() < limit {
            while let Some(s) = merge.pending_refill() {
                let request = PageRequest {
                    limit: page_limit,
                    cursor: cursors[s].take(),
                };
                let page = self.fetch_with_retry(&sources[s], &request, cancel).await?;
                outcome.store_calls += 1;
                outcome.fetched += page.items.len();

                let sort_attr = sources[s].sort_attr();
                let keyed = page
                    .items
                    .into_iter()
                    .map(|item| {
                        let key = item
                            .get(sort_attr)
                            .and_then(|v| self.schema.date_format.decode(v));
                        (key, item)
                    })
                    .collect();
                let has_more = page.next_cursor.is_some();
                cursors[s] = page.next_cursor;
                merge.push_page(s, keyed, has_more);
            }
            match merge.pop() {
                Some(item) => items.push(item),
                None => break,
            }
        }

        outcome.records = items
            .iter()
            .enumerate()
            .map(|(i, item)| record::from_item(item, &self.schema, i))
            .collect();
        Ok(outcome)
    }

    fn sources(&self, plan: &QueryPlan) -> Vec<Source> {
        let schema = &self.schema;
        match plan {
            QueryPlan::ByPrimaryKey {
                partition_values,
                sort_range,
                filter,
                descending,
                ..
            } => partition_values
                .iter()
                .map(|company| {
                    Source::Key(KeyQuery {
                        index_name: None,
                        partition_attr: schema.partition_key_attr.clone(),
                        partition_value: company.clone(),
                        sort_attr: schema.sort_key_attr.clone(),
                        sort_range: *sort_range,
                        date_format: schema.date_format,
                        descending: *descending,
                        filter: filter.clone(),
                    })
                })
                .collect(),
            QueryPlan::ByCategoryIndex {
                index_name,
                partition_values,
                sort_range,
                descending,
                ..
            } => partition_values
                .iter()
                .map(|report_type| {
                    Source::Key(KeyQuery {
                        index_name: Some(index_name.clone()),
                        partition_attr: schema.category_index_partition_attr.clone(),
                        partition_value: report_type.clone(),
                        sort_attr: schema.category_index_sort_attr.clone(),
                        sort_range: *sort_range,
                        date_format: schema.date_format,
                        descending: *descending,
                        filter: RecordPredicate::identity(),
                    })
                })
                .collect(),
            QueryPlan::ByDateIndex {
                index_name,
                partition_value,
                sort_range,
                descending,
                ..
            } => vec![Source::Key(KeyQuery {
                index_name: Some(index_name.clone()),
                partition_attr: schema.date_index_partition_attr.clone(),
                partition_value: partition_value.clone(),
                sort_attr: schema.sort_key_attr.clone(),
                sort_range: Some(*sort_range),
                date_format: schema.date_format,
                descending: *descending,
                filter: RecordPredicate::identity(),
            })],
            QueryPlan::FullScanFiltered {
                predicate,
                descending,
                ..
            } => vec![Source::Scan(ScanQuery {
                sort_attr: schema.sort_key_attr.clone(),
                date_format: schema.date_format,
                descending: *descending,
                predicate: predicate.clone(),
            })],
        }
    }

    async fn fetch_with_retry(
        &self,
        source: &Source,
        request: &PageRequest,
        cancel: &CancellationToken,
    ) -> Result<Page, ExecutionError> {
        let max = self.retry.max_attempts;
        let mut last_error = String::new();

        for attempt in 1..=max {
            if cancel.is_cancelled() {
                return Err(ExecutionError::Cancelled);
            }

            let call = async {
                match source {
                    Source::Key(q) => self.store.query(q, request).await,
                    Source::Scan(q) => self.store.scan(q, request).await,
                }
            };
            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(ExecutionError::Cancelled),
                r = tokio::time::timeout(self.retry.call_timeout, call) => r,
            };

            match result {
                Ok(Ok(page)) => return Ok(page),
                Ok(Err(StoreError::Permanent(msg))) => {
                    error!(store = self.store.name(), error = %msg, "store rejected request");
                    return Err(ExecutionError::Rejected(msg));
                }
                Ok(Err(StoreError::Transient(msg))) => last_error = msg,
                Err(_) => {
                    last_error = format!(
                        "call timed out after {}ms",
                        self.retry.call_timeout.as_millis()
                    )
                }
            }

            if attempt < max {
                let delay = self.retry.backoff(attempt);
                warn!(
                    store = self.store.name(),
                    attempt,
                    max_attempts = max,
                    delay_ms = delay.as_millis() as u64,
                    error = %last_error,
                    "transient store failure, retrying"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(ExecutionError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        error!(store = self.store.name(), attempts = max, error = %last_error, "store unavailable");
        Err(ExecutionError::StoreUnavailable {
            attempts: max,
            last_error,
        })
    }
}
