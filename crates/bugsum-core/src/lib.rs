//! bugsum-core library.
//!
//! Incrementally maintained bug counts per summary location. Bug task and
//! tag mutations are expanded into signed per-location deltas
//! ([`expand`]), appended to a journal in the mutating transaction
//! ([`maintain`], [`db::journal`]), and periodically rolled up into the
//! aggregate table ([`db::rollup`]). Readers sum both through the combined
//! view ([`db::view`]).
//!
//! # Conventions
//!
//! - **Errors**: module errors are `thiserror` enums exposing an
//!   [`error::ErrorCode`]; orchestration returns `anyhow::Result`.
//! - **Logging**: `tracing` macros (`info!`, `warn!`, `debug!`, `trace!`).

pub mod config;
pub mod db;
pub mod error;
pub mod expand;
pub mod lock;
pub mod maintain;
pub mod model;
pub mod recount;

pub use db::journal::{JournalAppend, JournalWriter};
pub use db::rollup::{RollupOptions, RollupOutcome, RollupReport, rollup_journal, rollup_until_empty};
pub use db::store::{Applied, Conflict, StoreError, UpsertPolicy};
pub use db::view::{Match, SummaryFilter, SummaryRow};
pub use expand::{ExpandError, TagChange, TaskChange};
pub use maintain::{SummaryMaintainer, SummaryObserver};
