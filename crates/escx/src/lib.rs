//! 🚀 escx — the core library crate, the beating heart, the engine room
//! where one cluster's documents become another cluster's documents.
//!
//! 📦 This crate contains the scroll reader, the batch pool, the bulk writer
//! dock, the settings choreography, and the auditor who checks the work.
//!
//! 🧠 Knowledge graph — data flows left to right, cancellation flows everywhere:
//!
//! ```text
//!   scroll reader → page channel (2) → doc channel (scroll_docs)
//!        → batch pool (parallelism) → bulk writers → destination hosts
//! ```
//!
//! ⚠️ "An index copy is just a very long POST request with extra steps."
//!    — someone who has never restored refresh settings by hand 🦆

pub mod app_config;
pub mod batch;
pub mod bulk;
pub mod client;
pub mod diff;
pub mod index_meta;
pub mod jobs;
pub mod progress;
pub mod scroll;
pub mod types;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

pub use app_config::{load_config, AppConfig};
pub use jobs::validate::{MissMatch, ValidationResults};

/// 🚚 The grand entry point for a copy. The big kahuna. The main event.
///
/// Cancellation via `cancel` is a clean stop, not an error: the reader closes,
/// the writers drain, the restore phase is skipped, `Ok(())` comes back.
pub async fn run_copy(app_config: &AppConfig, cancel: CancellationToken) -> Result<()> {
    jobs::copy::run(&app_config.source, &app_config.destination, cancel).await
}

/// 🔎 The grand entry point for an audit.
///
/// `Ok` carries the clean ledger; an `Err` that downcasts to [`MissMatch`]
/// carries the dirty one. Anything else means the audit itself fell over.
pub async fn run_validate(
    app_config: &AppConfig,
    cancel: CancellationToken,
) -> Result<ValidationResults> {
    jobs::validate::run(
        &app_config.source,
        &app_config.destination,
        &app_config.validate,
        cancel,
    )
    .await
}
