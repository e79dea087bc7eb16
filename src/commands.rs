//! CLI command runners. Each prints one JSON document on stdout.

use anyhow::Result;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::pipeline::{CompileRequest, NlqService, RunOptions};

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Cancels `token` on Ctrl-C.
fn cancel_on_ctrl_c(token: &CancellationToken) {
    let token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });
}

/// `nlq filters <query>`
pub async fn run_filters(config: &Config, query: &str, request: &CompileRequest) -> Result<()> {
    let service = NlqService::offline(config.clone())?;
    let compilation = service
        .compile_filters(query, request, &CancellationToken::new())
        .await;
    print_json(&compilation)
}

/// `nlq run <query>`. With `fallback`, a store outage is served from the
/// static dataset instead of failing.
pub async fn run_query(
    config: &Config,
    query: &str,
    options: &RunOptions,
    fallback: bool,
) -> Result<()> {
    let service = NlqService::open(config.clone()).await?;
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(&cancel);

    let schema = config.table.clone();
    let result = if fallback {
        service
            .run_query_or_fallback(query, &schema, options, &cancel)
            .await?
    } else {
        service.run_query(query, &schema, options, &cancel).await?
    };
    print_json(&result)
}

#[derive(Serialize)]
struct SuggestOutput<'a> {
    prefix: &'a str,
    suggestions: Vec<String>,
}

/// `nlq suggest <prefix>`
pub fn run_suggest(config: &Config, prefix: &str, limit: Option<usize>) -> Result<()> {
    let service = NlqService::offline(config.clone())?;
    print_json(&SuggestOutput {
        prefix,
        suggestions: service.suggest(prefix, limit),
    })
}
