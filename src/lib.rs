//! # disclosure-nlq
//!
//! Natural-language query resolver for corporate disclosure announcements.
//!
//! A free-text question in Hebrew, English, or a mix of both ("דוחות
//! רבעוניים של טבע מ-2025", "last 3 immediate reports of El Al") is
//! compiled into structured filters, turned into the cheapest access plan
//! the table's indexes allow, and executed against the announcement store
//! with bounded retries and a static fallback dataset.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌────────────┐   ┌──────────┐   ┌──────────┐
//! │  query   │──▶│ compiler │──▶│ augmenter  │──▶│   plan   │──▶│ executor │
//! │  text    │   │ (aliases │   │ (optional  │   │ selector │   │ (retry + │
//! │          │   │ + dates) │   │  LLM pass) │   │          │   │  merge)  │
//! └──────────┘   └──────────┘   └────────────┘   └──────────┘   └────┬─────┘
//!                                                                    │
//!                                          ┌─────────────────────────┤
//!                                          ▼                         ▼
//!                                     ┌──────────┐             ┌──────────┐
//!                                     │  SQLite  │             │ fallback │
//!                                     │  store   │             │ dataset  │
//!                                     └──────────┘             └──────────┘
//! ```
//!
//! The pure resolution logic lives in the `disclosure-nlq-core` crate;
//! this crate adds storage, I/O, the CLI, and the HTTP server.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema and index creation |
//! | [`sqlite_store`] | SQLite [`AnnouncementStore`](disclosure_nlq_core::store::AnnouncementStore) |
//! | [`load`] | Item import |
//! | [`data`] | Embedded alias tables and fallback dataset |
//! | [`executor`] | Paginated, retried plan execution |
//! | [`augment`] | Optional LLM refinement of compiled filters |
//! | [`pipeline`] | Boundary operations: compile, run, suggest |
//! | [`commands`] | CLI command runners |
//! | [`server`] | HTTP server |

pub mod augment;
pub mod commands;
pub mod config;
pub mod data;
pub mod db;
pub mod executor;
pub mod load;
pub mod logging;
pub mod migrate;
pub mod pipeline;
pub mod server;
pub mod sqlite_store;
