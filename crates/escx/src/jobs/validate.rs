//! 🔎 The validator — trust, but sample.
//!
//! 🧠 Knowledge graph:
//! - Pre-flight doc-count comparison catches the cheap, catastrophic case
//!   before any scrolling happens. `force` pushes past it for the brave.
//! - Each scrolled doc rolls a die: with probability 1/`denom` it gets
//!   fetched from the destination and classified. `denom ≤ 1` checks
//!   everything — the audit of champions, priced accordingly.
//! - Classification counters always sum to `checked`; the details list names
//!   every delinquent document for the postmortem.
//! - Anything missing or mismatched makes the whole run a [`MissMatch`] —
//!   a typed error carrying the full results, because "it failed" without
//!   numbers is a useless thing to tell an operator.
//!
//! 🦆 The duck samples 1 in 1000 breadcrumbs and extrapolates the loaf.

use anyhow::{bail, Context, Result};
use rand::Rng;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::diff::{self, DocDiff};
use crate::{client, index_meta, scroll};

use super::{DestConfig, SourceConfig};

/// 🎲 Validation knobs.
#[derive(Debug, Clone, Deserialize)]
pub struct ValidateConfig {
    /// 🎲 1/`denom` chance of each document being checked; ≤ 1 checks all
    #[serde(default = "default_denom")]
    pub denom: u32,
    /// 💪 keep going even when the doc counts already disagree
    #[serde(default)]
    pub force: bool,
}

fn default_denom() -> u32 {
    1000
}

impl Default for ValidateConfig {
    fn default() -> Self {
        Self { denom: default_denom(), force: false }
    }
}

/// 📊 The audit ledger.
#[derive(Debug, Clone, Default)]
pub struct ValidationResults {
    pub total: u64,
    pub checked: u64,
    pub matched: u64,
    pub missing: u64,
    pub miss_matched: u64,
    /// 📝 one line per delinquent document (or count mismatch)
    pub details: Vec<String>,
}

impl ValidationResults {
    /// ✅ No document went missing, none diverged.
    pub fn clean(&self) -> bool {
        self.missing + self.miss_matched == 0
    }
}

impl std::fmt::Display for ValidationResults {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let percent = if self.total > 0 {
            (self.checked as f64 / self.total as f64) * 100.0
        } else {
            0.0
        };
        write!(
            f,
            "Checked {}/{} ({percent:.1}%) documents; missing={} mismatched={} matched={}",
            self.checked, self.total, self.missing, self.miss_matched, self.matched
        )
    }
}

/// 💀 The validator's signature failure: the clusters disagree, here's the ledger.
#[derive(Debug, Clone, thiserror::Error)]
#[error("missmatched results: {0}")]
pub struct MissMatch(pub ValidationResults);

/// 🔎 Audit `dest` against `source`.
///
/// `Ok(results)` means the sampled population matched. `Err` carrying a
/// [`MissMatch`] means it did not — downcast to get the ledger. Any other
/// error means the audit itself broke and proves nothing either way.
pub async fn run(
    source: &SourceConfig,
    dest: &DestConfig,
    opts: &ValidateConfig,
    cancel: CancellationToken,
) -> Result<ValidationResults> {
    let http = client::build()?;
    let src_url = source.url();
    let Some(dest_idx_url) = dest.primary_url() else {
        bail!("no destination hosts configured");
    };
    let mut results = ValidationResults::default();

    // ⚖️ the cheap test first: if the totals already disagree, the expensive
    // per-document work can only confirm the bad news
    let src_count = index_meta::doc_count(&http, &src_url)
        .await
        .context("error getting source doc count")?;
    let dest_count = index_meta::doc_count(&http, &dest_idx_url)
        .await
        .context("error getting destination doc count")?;
    if src_count != dest_count {
        warn!("Source and target have different document totals: {src_count} vs. {dest_count}");
        results.details.push(format!("DocCountMissMatch: {src_count} vs. {dest_count}"));
        if !opts.force {
            return Err(MissMatch(results).into());
        }
    }

    let stream = scroll::start(
        &http,
        &src_url,
        &source.scroll_timeout,
        source.scroll_page,
        source.scroll_docs,
        source.filter.as_ref(),
        cancel,
    )
    .await
    .context("error starting scroll")?;

    results.total = stream.total;
    info!("Scrolling over {} documents from {src_url}", stream.total);

    let denom = opts.denom.max(1);
    while let Ok(doc) = stream.hits.recv().await {
        // 🎲 roll the die. denom == 1 always wins; everyone gets audited.
        if denom == 1 || rand::rng().random_range(0..denom) == 0 {
            results.checked += 1;
            let verdict = diff::check(&http, &doc, &dest_idx_url)
                .await
                .context("fatal check error")?;
            match verdict {
                DocDiff::Match { .. } => results.matched += 1,
                DocDiff::Missing => {
                    results.missing += 1;
                    results.details.push(format!("MissingDoc:{}", doc.id));
                }
                DocDiff::FieldCount { source, dest } => {
                    results.miss_matched += 1;
                    results.details.push(format!(
                        "DocMissMatch:{} {source} fields in source; {dest} fields in target",
                        doc.id
                    ));
                }
                DocDiff::Source => {
                    results.miss_matched += 1;
                    results.details.push(format!("DocMissMatch:{}", doc.id));
                }
            }
        }
    }
    if let Some(e) = stream.take_err().await {
        return Err(e.context("scroll error"));
    }

    if !results.clean() {
        return Err(MissMatch(results).into());
    }
    Ok(results)
}
