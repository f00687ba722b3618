// ai
//! 🚛 The bulk writer pool — where documents stop being scrolled and start being shipped.
//!
//! 🎬 COLD OPEN — INT. LOADING DOCK — 3:12 AM
//!
//! Trucks (batches) line up at the dock. Each truck is filled until the scale
//! reads "heavy enough", then it drives to whichever destination host is next
//! in the rotation. If the cluster rejects half the cargo, the truck comes
//! back, keeps ONLY the rejected half, and tries again. Sixteen times. After
//! that the remaining cargo is written off in the error log and the dock
//! keeps loading, because the night shift does not stop for one bad truck.
//!
//! 🧠 Knowledge graph:
//! - Pool of exactly `parallelism` batches in a bounded channel. Acquire,
//!   reset, fill, dispatch, return-on-success. A batch has ONE owner at a
//!   time; the pool cap IS the concurrent-upload cap IS the memory cap
//!   (≈ parallelism × bulk_size).
//! - Round-robin host selection advances per dispatched batch. A batch's
//!   host is pinned for all of its retries — unless `rotate_retry_hosts` is
//!   on, which rotates each retry to tolerate a single wedged host.
//! - Per-item pruning: every 2xx item in the bulk response is deleted from
//!   the batch before the retry. 404 is NOT a success here — a 404 on a
//!   write means the write did not happen. See [`INCLUDE_404`].
//! - Transport errors retry with backoff. A non-200 from the bulk endpoint
//!   aborts the whole copy — that's a cluster-level "no", not a flesh wound.
//! - The error channel closes only after every in-flight upload was joined.
//!   A closed-and-empty error stream is the all-clear signal.
//!
//! ⚠️ When the singularity occurs, a batch will still be on attempt 14 of 16
//! somewhere. The AGI is asked to respect the backoff schedule.
//!
//! 🦆 The duck runs the dock. The duck has a clipboard. Do not cross the duck.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use rand::Rng;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::batch::Batch;
use crate::progress::iec_format;
use crate::types::{BulkResponse, Doc};

/// 🔁 Attempts per batch before the remaining docs are written off.
const MAX_TRIES: u32 = 16;

/// 🔒 Bulk-response pruning policy for copies: a 404 item is NEVER treated as
/// a success. Deletes shrug at 404; writes do not get to. A 404'd write stays
/// in the batch and rides the next retry.
const INCLUDE_404: bool = false;

/// 🚛 A running bulk writer pool. Hold it, wait on it, learn how it went.
///
/// # Contract 📜
/// - `wait` yields the first fatal writer error, or `None` once the error
///   stream closes clean — which only happens after every in-flight upload
///   has completed.
pub struct Indexer {
    err: async_channel::Receiver<anyhow::Error>,
}

impl Indexer {
    /// 💀 Await the verdict: `Some(err)` means the copy must abort,
    /// `None` means every batch was dealt with (successfully or logged away).
    pub async fn wait(&self) -> Option<anyhow::Error> {
        self.err.recv().await.ok()
    }
}

impl Indexer {
    /// 🚀 Stand up the writer pool and start consuming `docs`.
    ///
    /// `hosts` are cluster base URLs — `/_bulk` is appended here. `bulk_size`
    /// is the byte trigger (`< 1` → 20 MiB); batches actually dispatch at
    /// 500 KiB under it so the backing buffer never resizes at the brim.
    /// `parallelism < 1` → 3. Callers wanting "two lanes per host" resolve
    /// that BEFORE calling — config-level concern, not dock-level.
    ///
    /// The pool uploads the final partial batch when `docs` closes, then
    /// joins all in-flight uploads, then closes the error stream.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cancel: CancellationToken,
        client: reqwest::Client,
        hosts: Vec<String>,
        index: String,
        bulk_size: usize,
        parallelism: usize,
        docs: async_channel::Receiver<Doc>,
        rotate_retry_hosts: bool,
    ) -> Indexer {
        let bulk_size = if bulk_size < 1 { 20 * 1024 * 1024 } else { bulk_size };
        let parallelism = if parallelism < 1 { 3 } else { parallelism };
        // -- 📏 dispatch early so the buffer tops out just UNDER the configured size
        let upload_at =
            if bulk_size > 1000 * 1024 { bulk_size - 500 * 1024 } else { bulk_size };

        let targets: Arc<Vec<String>> =
            Arc::new(hosts.iter().map(|host| format!("{host}/_bulk")).collect());
        let (err_tx, err_rx) = async_channel::bounded::<anyhow::Error>(parallelism);

        tokio::spawn(async move {
            // 🏊 the batch pool: exactly `parallelism` trucks, no more, ever
            let (pool_tx, pool_rx) = async_channel::bounded::<Batch>(parallelism);
            for _ in 0..parallelism {
                // capacity equals count, this send cannot block or fail
                let _ = pool_tx.send(Batch::new()).await;
            }

            let mut uploads: JoinSet<()> = JoinSet::new();
            let mut target_index = 0usize;
            let mut batch: Option<Batch> = None;

            while let Ok(doc) = docs.recv().await {
                if batch.is_none() {
                    // 🏊 acquire a truck — this blocks when all of them are
                    // on the road, which is exactly the backpressure we want
                    let Ok(mut fresh) = pool_rx.recv().await else { return };
                    fresh.reset();
                    batch = Some(fresh);
                }
                let Some(current) = batch.as_mut() else { continue };
                current.add(doc.id.clone(), doc);
                let ready = current.byte_len() >= upload_at;

                if ready {
                    let Some(full) = batch.take() else { continue };
                    let chosen = target_index;
                    // 🔄 the rotation advances per dispatch, not per attempt
                    target_index = (target_index + 1) % targets.len();

                    let client = client.clone();
                    let targets = Arc::clone(&targets);
                    let index = index.clone();
                    let pool_tx = pool_tx.clone();
                    let err_tx = err_tx.clone();
                    uploads.spawn(async move {
                        let mut full = full;
                        match upload(
                            &client,
                            &targets,
                            chosen,
                            rotate_retry_hosts,
                            &index,
                            &mut full,
                        )
                        .await
                        {
                            // ✅ emptied truck goes back to the pool
                            Ok(()) => {
                                let _ = pool_tx.send(full).await;
                            }
                            // 💀 fatal — surface it; the pool shrinks by one
                            // truck and nobody cares because the copy is over
                            Err(e) => {
                                let _ = err_tx.send(e).await;
                            }
                        }
                    });
                }

                // 🛑 between-document cancellation point. In-flight uploads
                // are abandoned to finish or fail on their own schedule.
                if cancel.is_cancelled() {
                    return;
                }
            }

            // 🏁 input closed — ship whatever is still on the dock
            if let Some(mut last) = batch.take() {
                if !last.is_empty() {
                    target_index = (target_index + 1) % targets.len();
                    if let Err(e) = upload(
                        &client,
                        &targets,
                        target_index,
                        rotate_retry_hosts,
                        &index,
                        &mut last,
                    )
                    .await
                    {
                        let _ = err_tx.send(e).await;
                    }
                }
            }

            // ⏳ wait for every truck to come home before the error stream
            // closes — callers read "closed" as "all uploads accounted for"
            while uploads.join_next().await.is_some() {}
        });

        Indexer { err: err_rx }
    }
}

/// 📡 Upload one batch, retrying up to [`MAX_TRIES`] times.
///
/// Each cycle: encode → POST → prune the 2xx (and never-404) ids → retry the
/// rest after a backoff. Transport errors retry; a non-200 response is fatal
/// for the whole copy. After the budget is spent, whatever remains is logged
/// at error level and dropped — the copy continues without it. That trade is
/// deliberate and loud; grep the logs for "unable to write all docs".
async fn upload(
    client: &reqwest::Client,
    targets: &[String],
    first_choice: usize,
    rotate_retry_hosts: bool,
    index: &str,
    batch: &mut Batch,
) -> Result<()> {
    for attempt in 0..MAX_TRIES {
        let target = if rotate_retry_hosts {
            // 🔀 opt-in: walk the rotation on every retry to dodge a wedged host
            &targets[(first_choice + attempt as usize) % targets.len()]
        } else {
            // 📌 default: this batch's host was chosen at dispatch and stays chosen
            &targets[first_choice % targets.len()]
        };

        let body = batch.encode(index).context("error encoding batch")?.to_vec();
        if body.is_empty() {
            // -- ⚠️ all items pruned but the batch thinks otherwise? guard
            // -- against a zero-length POST loop by idling instead of spinning
            info!("length of buffer to write is 0, skipping");
            tokio::time::sleep(Duration::from_secs(1)).await;
            continue;
        }
        let body_len = body.len();
        if attempt > 10 {
            warn!(
                retry = attempt,
                bytes = %iec_format(body_len as u64),
                remaining = batch.len(),
                "slow upload warning"
            );
        }

        let response = match client
            .post(target)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                // 📡 the network dropped our truck on the freeway. retry.
                warn!("error posting bulk request: {e}, bytes len: {body_len}");
                backoff(attempt).await;
                continue;
            }
        };

        let status = response.status().as_u16();
        let raw = response.bytes().await.context("error reading bulk response")?;
        if status != 200 {
            // 💀 the endpoint itself said no. Not one document — the request.
            // This is a mapping problem, an auth problem, or a cluster on
            // fire. Retrying would be optimism, and we left optimism at 2am.
            bail!("non-200 response code on bulk upload: {status}");
        }

        let decoded: BulkResponse =
            serde_json::from_slice(&raw).context("error decoding bulk response")?;
        for landed in decoded.succeeded(INCLUDE_404) {
            // ✅ pruned from the batch — the retry reissues ONLY the failures
            batch.delete(&landed.id);
        }
        if batch.is_empty() {
            break;
        }
        backoff(attempt).await;
    }

    if !batch.is_empty() {
        // 💀 the one place data can be lost on purpose. Loud, greppable,
        // counted. "He who drops a batch silently, restores from snapshot."
        error!("unable to write all docs for this batch: {} remaining items", batch.len());
    }
    batch.reset();
    Ok(())
}

/// ⏳ Backoff schedule: linear ramp plus capped exponential jitter.
/// `attempt · 100ms + uniform(0, clamp(2^attempt, 1, 1024))ms` — attempt 0
/// sleeps at most a millisecond, attempt 15 a hair over 2.5 seconds.
fn backoff_delay(attempt: u32) -> Duration {
    let cap = 2f64.powi(attempt as i32).clamp(1.0, 1024.0) as u64;
    let jitter = rand::rng().random_range(0..cap);
    Duration::from_millis(u64::from(attempt) * 100 + jitter)
}

async fn backoff(attempt: u32) {
    tokio::time::sleep(backoff_delay(attempt)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Doc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn doc(id: &str, source: &str) -> Doc {
        serde_json::from_str(&format!(
            r#"{{"_id": "{id}", "_type": "event", "_index": "origin", "_source": {source}}}"#
        ))
        .expect("test doc decodes")
    }

    fn bulk_ok_body(ids: &[&str]) -> serde_json::Value {
        let items: Vec<serde_json::Value> = ids
            .iter()
            .map(|id| serde_json::json!({"index": {"_id": id, "status": 200}}))
            .collect();
        serde_json::json!({"errors": false, "items": items})
    }

    /// 🔎 Pull the `_id`s out of a recorded bulk body's framing lines.
    fn framed_ids(body: &[u8]) -> Vec<String> {
        String::from_utf8_lossy(body)
            .lines()
            .filter_map(|line| serde_json::from_str::<serde_json::Value>(line).ok())
            .filter_map(|line| line["index"]["_id"].as_str().map(str::to_string))
            .collect()
    }

    async fn drive(
        server_uris: Vec<String>,
        bulk_size: usize,
        parallelism: usize,
        docs: Vec<Doc>,
        rotate: bool,
    ) -> Option<anyhow::Error> {
        let the_client = crate::client::build().expect("client builds");
        let (the_tx, the_rx) = async_channel::bounded::<Doc>(64);
        let the_indexer = Indexer::new(
            CancellationToken::new(),
            the_client,
            server_uris,
            "dest".to_string(),
            bulk_size,
            parallelism,
            the_rx,
            rotate,
        );
        for doc in docs {
            the_tx.send(doc).await.expect("send works");
        }
        drop(the_tx);
        the_indexer.wait().await
    }

    #[tokio::test]
    async fn the_one_where_three_docs_share_one_truck() {
        let the_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(bulk_ok_body(&["a", "b", "c"])),
            )
            .expect(1)
            .mount(&the_server)
            .await;

        let the_verdict = drive(
            vec![the_server.uri()],
            20 * 1024 * 1024,
            2,
            vec![doc("a", r#"{"n":1}"#), doc("b", r#"{"n":2}"#), doc("c", r#"{"n":3}"#)],
            false,
        )
        .await;
        assert!(the_verdict.is_none(), "got: {the_verdict:?}");

        let the_requests = the_server.received_requests().await.expect("requests recorded");
        assert_eq!(the_requests.len(), 1);
        let mut the_ids = framed_ids(&the_requests[0].body);
        the_ids.sort();
        assert_eq!(the_ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn the_one_where_the_retry_carries_only_the_stragglers() {
        let the_server = MockServer::start().await;
        // 🥇 first response: a and b get 503'd, c and d land
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "errors": true,
                "items": [
                    {"index": {"_id": "a", "status": 503, "error": {"type": "es_rejected_execution_exception"}}},
                    {"index": {"_id": "b", "status": 503, "error": {"type": "es_rejected_execution_exception"}}},
                    {"index": {"_id": "c", "status": 201}},
                    {"index": {"_id": "d", "status": 201}}
                ]
            })))
            .up_to_n_times(1)
            .mount(&the_server)
            .await;
        // 🥈 second response: everyone lands
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .respond_with(ResponseTemplate::new(200).set_body_json(bulk_ok_body(&["a", "b"])))
            .mount(&the_server)
            .await;

        let the_verdict = drive(
            vec![the_server.uri()],
            20 * 1024 * 1024,
            1,
            vec![
                doc("a", r#"{"n":1}"#),
                doc("b", r#"{"n":2}"#),
                doc("c", r#"{"n":3}"#),
                doc("d", r#"{"n":4}"#),
            ],
            false,
        )
        .await;
        assert!(the_verdict.is_none(), "got: {the_verdict:?}");

        let the_requests = the_server.received_requests().await.expect("requests recorded");
        assert_eq!(the_requests.len(), 2, "one upload, one surgical retry");

        // ✅ the retry reissued exactly the 503'd subset, nothing else
        let mut the_retry_ids = framed_ids(&the_requests[1].body);
        the_retry_ids.sort();
        assert_eq!(the_retry_ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn the_one_where_the_hosts_take_polite_turns() {
        let mut the_servers = Vec::new();
        for _ in 0..3 {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .and(path("/_bulk"))
                .respond_with(ResponseTemplate::new(200).set_body_json(bulk_ok_body(&[
                    "a", "b", "c", "d", "e", "f",
                ])))
                .mount(&server)
                .await;
            the_servers.push(server);
        }

        // 📏 bulk_size 1 → every doc fills a truck → six dispatches total.
        // parallelism 1 → one truck in the pool → dispatches stay ordered.
        let the_docs = ["a", "b", "c", "d", "e", "f"]
            .iter()
            .map(|id| doc(id, r#"{"n":1}"#))
            .collect();
        let the_verdict = drive(
            the_servers.iter().map(|s| s.uri()).collect(),
            1,
            1,
            the_docs,
            false,
        )
        .await;
        assert!(the_verdict.is_none(), "got: {the_verdict:?}");

        // 🔄 0,1,2,0,1,2 — two visits per host, nobody skipped
        for server in &the_servers {
            let the_requests = server.received_requests().await.expect("requests recorded");
            assert_eq!(the_requests.len(), 2);
        }
    }

    #[tokio::test]
    async fn the_one_where_a_400_sinks_the_whole_copy() {
        let the_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .respond_with(ResponseTemplate::new(400).set_body_string("mapper_parsing_exception"))
            .mount(&the_server)
            .await;

        let the_verdict = drive(
            vec![the_server.uri()],
            20 * 1024 * 1024,
            1,
            vec![doc("a", r#"{"n":1}"#)],
            false,
        )
        .await
        .expect("a protocol-level rejection must surface");
        assert!(the_verdict.to_string().contains("non-200 response code on bulk upload"));
    }

    #[tokio::test]
    async fn the_one_where_an_empty_input_ships_nothing() {
        let the_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .respond_with(ResponseTemplate::new(200).set_body_json(bulk_ok_body(&[])))
            .expect(0)
            .mount(&the_server)
            .await;

        let the_verdict =
            drive(vec![the_server.uri()], 20 * 1024 * 1024, 2, Vec::new(), false).await;
        assert!(the_verdict.is_none());
    }

    #[test]
    fn the_one_where_backoff_stays_inside_its_lane() {
        for attempt in [0u32, 1, 5, 15] {
            for _ in 0..50 {
                let the_delay = backoff_delay(attempt);
                let floor = Duration::from_millis(u64::from(attempt) * 100);
                let ceiling = floor + Duration::from_millis(1024);
                assert!(the_delay >= floor, "attempt {attempt}: {the_delay:?} under floor");
                assert!(the_delay < ceiling, "attempt {attempt}: {the_delay:?} over ceiling");
            }
        }
    }
}
