// ai
//! 🎬 *[an index wants to be somewhere else. a protocol clears its throat.]*
//! *[snapshot. create. pour. restore. merge. bow.]*
//! *[the audience — one operator, 2:41am — does not clap. the exit code is the applause.]*
//!
//! 🚚 The copy orchestrator — sequences the whole index-lifecycle dance.
//!
//! 🧠 Knowledge graph:
//! - Order is the contract: source metadata FIRST (fail before touching the
//!   destination), scroll SECOND (a bad source URL must not leave an empty
//!   index behind), create THIRD, then the stream, then the restore phase.
//! - `delay_refresh` creates with `refresh_interval = -1` for write
//!   throughput. The index is NOT QUERYABLE until refresh is restored —
//!   which is why restore-phase failures get the loudest error text in the
//!   whole crate: the docs are there, the settings are not, a human must act.
//! - Cancellation mid-copy is a clean return: the reader closes, the writers
//!   drain, and the restore phase is deliberately skipped (no force-merging
//!   a half-poured index).
//! - A scroll error discovered AFTER the writers finished is logged, not
//!   fatal — everything that was written stays written.
//!
//! ⚠️ "He who re-enables refresh by hand at 3am, configures `delay_refresh`
//! more carefully the second time." — Ancient operations proverb 🦆

use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::bulk::Indexer;
use crate::index_meta::{self, IndexMeta, IndexSettings};
use crate::progress::iec_format;
use crate::{client, scroll};

use super::{DestConfig, SourceConfig};

/// 🚚 Copy `source` into `dest`, end to end.
///
/// Returns `Ok(())` on success AND on cancellation — being told to stop is
/// not a failure. Everything else is an error with enough context to know
/// which phase died and whether the destination needs manual settings work.
pub async fn run(source: &SourceConfig, dest: &DestConfig, cancel: CancellationToken) -> Result<()> {
    let http = client::build()?;
    let src_url = source.url();
    let Some(pri_dest_url) = dest.primary_url() else {
        bail!("no destination hosts configured");
    };

    // 1️⃣ source snapshot — fail here and nothing anywhere has changed
    let src_meta = index_meta::get(&http, &src_url)
        .await
        .context("failed getting source index metadata")?;

    // 2️⃣ resolve inherited settings
    let shards = if dest.shards == 0 {
        // get() guarantees shards deserialized, but the chain stays honest
        src_meta.shards().context("source index settings missing shard count")?
    } else {
        dest.shards
    };
    let refresh_interval = match &dest.refresh_interval {
        Some(configured) => configured.clone(),
        None => src_meta
            .refresh_interval()
            .filter(|interval| !interval.is_empty())
            .unwrap_or("1s")
            .to_string(),
    };

    // 3️⃣ scroll before create — a bad source must not cost us an index
    let stream = scroll::start(
        &http,
        &src_url,
        &source.scroll_timeout,
        source.scroll_page,
        source.scroll_docs,
        source.filter.as_ref(),
        cancel.clone(),
    )
    .await
    .context("error starting scroll")?;

    // 4️⃣ create the destination, tuned for pouring
    if !dest.skip_create {
        info!(
            "Creating index {} with shards={} refresh_interval={} delay-refresh={}",
            dest.index, shards, refresh_interval, dest.delay_refresh
        );
        let mut settings = IndexSettings {
            shards: Some(shards),
            refresh_interval: Some(refresh_interval.clone()),
            ..Default::default()
        };
        if dest.delay_refresh {
            // 🚫 refresh off entirely until the copy lands
            settings.refresh_interval = Some("-1".to_string());
        }
        if dest.delay_replication {
            settings.replicas = Some(0);
        }
        if let Err(e) =
            index_meta::create(&http, &pri_dest_url, &IndexMeta::with_index_settings(settings)).await
        {
            // 🛑 the scroll is already running — stop it before bailing
            cancel.cancel();
            return Err(e.context("index create failed"));
        }

        // 💤 give shard allocation a moment before the firehose opens
        tokio::time::sleep(Duration::from_secs(dest.create_delay_secs)).await;
    }

    // 📋 best-effort settings echo — useful in the log, not worth dying for
    match index_meta::get(&http, &pri_dest_url).await {
        Ok(meta) => info!(
            "destination index settings: {}",
            serde_json::to_string(&meta).unwrap_or_default()
        ),
        Err(e) => info!("error loading destination index settings: {e:#}"),
    }
    info!(
        "Copying {} documents from {} to {:?}/{} bulksize:{}",
        stream.total,
        src_url,
        dest.hosts,
        dest.index,
        iec_format(dest.bulk_size as u64)
    );

    // 5️⃣ open the firehose
    let indexer = Indexer::new(
        cancel.clone(),
        http.clone(),
        dest.urls(),
        dest.index.clone(),
        dest.bulk_size,
        dest.workers(),
        stream.hits.clone(),
        dest.rotate_retry_hosts,
    );

    // 6️⃣ writer verdict first — a writer error abandons the scroll outright
    if let Some(e) = indexer.wait().await {
        cancel.cancel();
        return Err(e.context("error indexing"));
    }
    // the reader's error, if any, arrives after everything written stayed written
    if let Some(e) = stream.take_err().await {
        error!("error searching: {e:#}");
    }

    // 7️⃣ cancelled? then the restore phase is intentionally skipped
    if cancel.is_cancelled() {
        return Ok(());
    }

    // 8️⃣ restore phase — failures here leave a healthy-but-unqueryable
    // index, so every error names the manual fix
    if dest.delay_refresh {
        info!("Copy completed. Refreshing index. This may take some time.");
        index_meta::force_merge(&http, &pri_dest_url, dest.max_segments)
            .await
            .context("error force merging index — copy completed successfully, restore the index settings manually")?;
        info!("Force merge completed. Setting refresh interval to {refresh_interval}");
        index_meta::update(
            &http,
            &pri_dest_url,
            &IndexMeta::with_index_settings(IndexSettings {
                refresh_interval: Some(refresh_interval.clone()),
                ..Default::default()
            }),
        )
        .await
        .context("error re-enabling refresh — copy completed successfully, restore the index settings manually")?;
    }
    if dest.delay_replication {
        index_meta::update(
            &http,
            &pri_dest_url,
            &IndexMeta::with_index_settings(IndexSettings {
                replicas: Some(dest.replication_factor),
                ..Default::default()
            }),
        )
        .await
        .with_context(|| {
            format!(
                "error restoring replicas[{}] — copy completed successfully, restore the index settings manually",
                dest.replication_factor
            )
        })?;
    }

    // 9️⃣ the final settings echo is load-bearing: it's the receipt
    let final_meta = index_meta::get(&http, &pri_dest_url)
        .await
        .context("error loading destination index settings")?;
    info!(
        "copy job completed: idx:{pri_dest_url} settings:{}",
        serde_json::to_string(&final_meta).unwrap_or_default()
    );
    Ok(())
}
