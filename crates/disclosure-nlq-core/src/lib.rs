//! # disclosure-nlq core
//!
//! Pure resolution logic for the disclosure NLQ resolver: text
//! normalization, the alias index, the temporal resolver, the filter
//! compiler, the query plan selector, record mapping, the k-way merge,
//! the suggestion index, and the storage trait the executor drives.
//!
//! This crate contains no tokio, sqlx, or network dependencies. Stateful
//! pieces (the alias index and the temporal grammar) are built once and
//! shared by `Arc`; everything else is request-scoped.
//!
//! | Module | Role |
//! |--------|------|
//! | [`text`] | Normalization, tokenization, stop words |
//! | [`alias`] | Surface form → canonical entity lookup |
//! | [`temporal`] | Date / period expression grammar |
//! | [`compiler`] | Query → [`models::FilterConfig`] + [`models::Diagnostics`] |
//! | [`plan`] | [`models::FilterConfig`] → [`plan::QueryPlan`] |
//! | [`record`] | Raw store items → [`models::AnnouncementRecord`] |
//! | [`merge`] | K-way merge of per-partition streams |
//! | [`suggest`] | Prefix / substring completions |
//! | [`store`] | [`store::AnnouncementStore`] trait + in-memory backend |

pub mod alias;
pub mod compiler;
pub mod error;
pub mod merge;
pub mod models;
pub mod plan;
pub mod record;
pub mod store;
pub mod suggest;
pub mod temporal;
pub mod text;
