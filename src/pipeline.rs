//! The resolver pipeline and its boundary operations.
//!
//! [`NlqService`] owns the shared read-only state (alias index snapshot
//! holder, temporal grammar, fallback dataset) and exposes:
//!
//! | Operation | Store access |
//! |-----------|--------------|
//! | [`compile_filters`](NlqService::compile_filters) | none |
//! | [`run_query`](NlqService::run_query) | live store, errors surfaced |
//! | [`run_query_or_fallback`](NlqService::run_query_or_fallback) | live store, static dataset on failure |
//! | [`suggest`](NlqService::suggest) | none |
//! | [`reload_aliases`](NlqService::reload_aliases) | none |
//!
//! Within one request the stages run strictly in order: compile, optional
//! augmentation, plan selection, execution.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use disclosure_nlq_core::alias::SharedAliasIndex;
use disclosure_nlq_core::compiler::{Compilation, CompileOptions, FilterCompiler};
use disclosure_nlq_core::models::{AnnouncementRecord, Diagnostics, FilterConfig};
use disclosure_nlq_core::plan::{select_plan, PlanOptions, QueryPlan, TableSchema};
use disclosure_nlq_core::store::memory::InMemoryStore;
use disclosure_nlq_core::store::AnnouncementStore;
use disclosure_nlq_core::suggest::{SuggestionIndex, DEFAULT_LIMIT};
use disclosure_nlq_core::temporal::TemporalResolver;

use crate::augment::{apply_outcome, run_augmentation, Augmenter, HttpAugmenter};
use crate::config::Config;
use crate::data;
use crate::db;
use crate::executor::{ExecutionError, QueryExecutor, RetryPolicy};
use crate::sqlite_store::SqliteStore;

/// Environment variable pinning "today" (YYYY-MM-DD) for reproducible runs.
pub const TODAY_ENV: &str = "NLQ_TEST_TODAY";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileRequest {
    #[serde(default = "default_true")]
    pub auto_expand_aliases: bool,
    #[serde(default = "default_true")]
    pub force_absolute_timeframe: bool,
    #[serde(default)]
    pub today: Option<NaiveDate>,
}

impl Default for CompileRequest {
    fn default() -> Self {
        Self {
            auto_expand_aliases: true,
            force_absolute_timeframe: true,
            today: None,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    #[default]
    Live,
    DryRun,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOptions {
    #[serde(default)]
    pub max_items: Option<usize>,
    #[serde(default)]
    pub mode: RunMode,
    /// Label for logs and the plan description.
    #[serde(default)]
    pub region: Option<String>,
    /// Store location override (`sqlite:` URL or file path).
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub ascending: bool,
    #[serde(flatten)]
    pub compile: CompileRequest,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub items: Vec<AnnouncementRecord>,
    pub fetched: usize,
    pub filters: FilterConfig,
    pub diagnostics: Diagnostics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rendered_plan_description: Option<String>,
    pub plan_kind: String,
    pub degraded: bool,
}

/// A compiled query with its plan, ready to execute.
struct Prepared {
    compilation: Compilation,
    plan: QueryPlan,
    description: String,
}

pub struct NlqService {
    config: Arc<Config>,
    aliases: SharedAliasIndex,
    temporal: Arc<TemporalResolver>,
    store: Arc<dyn AnnouncementStore>,
    fallback: Arc<InMemoryStore>,
    augmenter: Option<Arc<dyn Augmenter>>,
}

impl NlqService {
    /// Builds the service. Alias-table, grammar, and fallback-data errors
    /// are fatal.
    pub fn new(config: Config, store: Arc<dyn AnnouncementStore>) -> Result<Self> {
        let index = data::build_alias_index(&config)?;
        info!(aliases = index.len(), "alias index built");
        let temporal = Arc::new(TemporalResolver::new()?);
        let fallback = Arc::new(InMemoryStore::from_items(data::fallback_items(&config)?));

        let augmenter: Option<Arc<dyn Augmenter>> = if config.augmentation.is_enabled() {
            match HttpAugmenter::from_config(&config.augmentation) {
                Ok(a) => Some(Arc::new(a)),
                Err(e) => {
                    warn!(error = %e, "augmentation disabled");
                    None
                }
            }
        } else {
            None
        };

        Ok(Self {
            config: Arc::new(config),
            aliases: SharedAliasIndex::new(index),
            temporal,
            store,
            fallback,
            augmenter,
        })
    }

    /// Opens the SQLite database named in the config and builds the service.
    pub async fn open(config: Config) -> Result<Self> {
        let pool = db::connect(&config).await?;
        Self::new(config, Arc::new(SqliteStore::new(pool)))
    }

    /// Builds the service over an empty in-memory store, for callers that
    /// only compile filters or suggest.
    pub fn offline(config: Config) -> Result<Self> {
        Self::new(config, Arc::new(InMemoryStore::new()))
    }

    pub fn with_augmenter(mut self, augmenter: Arc<dyn Augmenter>) -> Self {
        self.augmenter = Some(augmenter);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn alias_count(&self) -> usize {
        self.aliases.snapshot().len()
    }

    fn today(&self, requested: Option<NaiveDate>) -> NaiveDate {
        requested
            .or_else(|| {
                std::env::var(TODAY_ENV)
                    .ok()
                    .and_then(|s| NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok())
            })
            .unwrap_or_else(|| chrono::Local::now().date_naive())
    }

    // ============ compileFilters ============

    /// Resolves `query` into filters and diagnostics. Never touches the store.
    pub async fn compile_filters(
        &self,
        query: &str,
        request: &CompileRequest,
        cancel: &CancellationToken,
    ) -> Compilation {
        let index = self.aliases.snapshot();
        let compiler = FilterCompiler::new(
            Arc::clone(&index),
            Arc::clone(&self.temporal),
            self.config.scoring.clone(),
        );
        let opts = CompileOptions {
            auto_expand_aliases: request.auto_expand_aliases,
            force_absolute_timeframe: request.force_absolute_timeframe,
            today: self.today(request.today),
        };
        let mut compilation = compiler.compile_raw(query, &opts);

        if let Some(augmenter) = &self.augmenter {
            let d = &compilation.diagnostics;
            if d.error.is_none() && d.confidence < 1.0 {
                let outcome = run_augmentation(
                    augmenter.as_ref(),
                    query,
                    &compilation.filters,
                    opts.today,
                    Duration::from_secs(self.config.augmentation.timeout_secs),
                    cancel,
                )
                .await;
                apply_outcome(&mut compilation, outcome, &index);
            }
        }

        let compilation = compilation.finish(self.config.scoring.max_notes);
        debug!(
            confidence = compilation.diagnostics.confidence,
            companies = compilation.filters.company_names.len(),
            report_types = compilation.filters.announcement_types.len(),
            dated = compilation.filters.has_time_constraint(),
            "query compiled"
        );
        compilation
    }

    // ============ plan ============

    async fn prepare(
        &self,
        query: &str,
        schema: &TableSchema,
        opts: &RunOptions,
        cancel: &CancellationToken,
    ) -> Result<Prepared, ExecutionError> {
        schema.validate()?;
        let compilation = self.compile_filters(query, &opts.compile, cancel).await;

        let retrieval = &self.config.retrieval;
        let plan_opts = PlanOptions {
            max_items: opts.max_items.unwrap_or(retrieval.max_items),
            max_items_cap: retrieval.max_items_cap,
            full_scan_cap: retrieval.full_scan_cap,
            ascending: opts.ascending,
            today: self.today(opts.compile.today),
        };
        let plan = select_plan(&compilation.filters, schema, &plan_opts);
        let mut description = plan.describe(schema);
        if let Some(region) = &opts.region {
            description = format!("-- region: {}\n{}", region, description);
        }
        info!(
            plan = plan.kind(),
            limit = plan.limit(),
            descending = plan.descending(),
            region = opts.region.as_deref().unwrap_or("default"),
            "plan selected"
        );
        Ok(Prepared {
            compilation,
            plan,
            description,
        })
    }

    /// Compiles and plans without executing.
    pub async fn plan(
        &self,
        query: &str,
        opts: &RunOptions,
        cancel: &CancellationToken,
    ) -> Result<RunResult, ExecutionError> {
        let prepared = self.prepare(query, &self.config.table, opts, cancel).await?;
        Ok(result_of(prepared, Vec::new(), 0, false))
    }

    // ============ runQuery ============

    /// Full pipeline against the live store. `StoreUnavailable` is surfaced.
    pub async fn run_query(
        &self,
        query: &str,
        schema: &TableSchema,
        opts: &RunOptions,
        cancel: &CancellationToken,
    ) -> Result<RunResult, ExecutionError> {
        let prepared = self.prepare(query, schema, opts, cancel).await?;
        if opts.mode == RunMode::DryRun {
            return Ok(result_of(prepared, Vec::new(), 0, false));
        }
        let store = self.live_store(opts).await?;
        let executor = self.executor(store, schema);
        let outcome = executor.execute(&prepared.plan, cancel).await?;
        Ok(result_of(prepared, outcome.records, outcome.fetched, false))
    }

    /// Like [`run_query`](Self::run_query), but serves the static dataset
    /// when the store stays unavailable after retries.
    pub async fn run_query_or_fallback(
        &self,
        query: &str,
        schema: &TableSchema,
        opts: &RunOptions,
        cancel: &CancellationToken,
    ) -> Result<RunResult, ExecutionError> {
        let prepared = self.prepare(query, schema, opts, cancel).await?;
        if opts.mode == RunMode::DryRun {
            return Ok(result_of(prepared, Vec::new(), 0, false));
        }

        let live = match self.live_store(opts).await {
            Ok(store) => self.executor(store, schema).execute(&prepared.plan, cancel).await,
            Err(e) => Err(e),
        };
        match live {
            Ok(outcome) => Ok(result_of(prepared, outcome.records, outcome.fetched, false)),
            Err(ExecutionError::StoreUnavailable { attempts, last_error }) => {
                warn!(attempts, error = %last_error, "serving degraded mode from static dataset");
                let fallback: Arc<dyn AnnouncementStore> = self.fallback.clone();
                let outcome = self
                    .executor(fallback, schema)
                    .execute(&prepared.plan, cancel)
                    .await?;
                let mut result = result_of(prepared, outcome.records, outcome.fetched, true);
                result.diagnostics.confidence = 0.0;
                result.diagnostics.prepend_note(format!(
                    "degraded mode: store unavailable after {} attempts ({}); serving static dataset",
                    attempts, last_error
                ));
                Ok(result)
            }
            Err(e) => Err(e),
        }
    }

    async fn live_store(
        &self,
        opts: &RunOptions,
    ) -> Result<Arc<dyn AnnouncementStore>, ExecutionError> {
        let Some(endpoint) = &opts.endpoint else {
            return Ok(Arc::clone(&self.store));
        };
        match db::connect_endpoint(endpoint).await {
            Ok(pool) => {
                let label = match &opts.region {
                    Some(region) => format!("sqlite:{}@{}", endpoint, region),
                    None => format!("sqlite:{}", endpoint),
                };
                Ok(Arc::new(SqliteStore::with_label(pool, label)))
            }
            Err(e) => Err(ExecutionError::StoreUnavailable {
                attempts: 1,
                last_error: format!("cannot open {}: {:#}", endpoint, e),
            }),
        }
    }

    fn executor(&self, store: Arc<dyn AnnouncementStore>, schema: &TableSchema) -> QueryExecutor {
        QueryExecutor::new(
            store,
            schema.clone(),
            RetryPolicy::from_config(&self.config.retrieval),
            self.config.retrieval.page_size,
        )
    }

    // ============ suggest ============

    pub fn suggest(&self, prefix: &str, limit: Option<usize>) -> Vec<String> {
        SuggestionIndex::new(self.aliases.snapshot())
            .suggest(prefix, limit.unwrap_or(DEFAULT_LIMIT))
    }

    // ============ reload ============

    /// Rebuilds the alias index from the configured tables and swaps it in.
    /// On error the current index stays in place.
    pub fn reload_aliases(&self) -> Result<usize> {
        let index = data::build_alias_index(&self.config)?;
        let n = index.len();
        self.aliases.replace(index);
        info!(aliases = n, "alias index reloaded");
        Ok(n)
    }
}

fn result_of(
    prepared: Prepared,
    items: Vec<AnnouncementRecord>,
    fetched: usize,
    degraded: bool,
) -> RunResult {
    RunResult {
        items,
        fetched,
        filters: prepared.compilation.filters,
        diagnostics: prepared.compilation.diagnostics,
        rendered_plan_description: Some(prepared.description),
        plan_kind: prepared.plan.kind().to_string(),
        degraded,
    }
}
