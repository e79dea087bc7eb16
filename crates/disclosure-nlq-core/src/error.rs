//! Typed errors raised by the core.
//!
//! Resolution-time problems (unmatched tokens, ambiguous dates) are never
//! errors; they surface as notes in [`Diagnostics`](crate::models::Diagnostics).

use thiserror::Error;

/// Failure to build the alias index. Fatal at startup.
#[derive(Debug, Error)]
pub enum AliasLoadError {
    #[error("alias table '{table}' is not valid JSON: {source}")]
    Parse {
        table: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("alias table '{table}' is empty")]
    Empty { table: String },

    #[error("alias table '{table}': canonical '{canonical}' has an empty surface form")]
    EmptySurface { table: String, canonical: String },
}

/// Invalid table / index / attribute configuration. Fatal at startup.
#[derive(Debug, Error)]
pub enum PlanConfigError {
    #[error("invalid plan configuration: table.{field} {reason}")]
    InvalidPlanConfiguration { field: &'static str, reason: String },
}

impl PlanConfigError {
    pub(crate) fn missing(field: &'static str) -> Self {
        PlanConfigError::InvalidPlanConfiguration {
            field,
            reason: "must not be empty".to_string(),
        }
    }
}

/// Error returned by an [`AnnouncementStore`](crate::store::AnnouncementStore) call.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Worth retrying: throttling, busy database, dropped connection.
    #[error("transient store error: {0}")]
    Transient(String),

    /// Retrying will not help: malformed request, missing table.
    #[error("store rejected request: {0}")]
    Permanent(String),
}
