//! 🚰 The scroll reader — headwaters of the whole pipeline. Data starts here.
//!
//! 🎬 *[a vast index stretches to the horizon, millions of documents,
//! blissfully unaware]*
//! *[a scroll cursor clears its throat]*
//! *["Don't worry," it says. "I'll be gentle."]*
//! *[it was not gentle. it was a GET in a loop.]*
//!
//! 🧠 Knowledge graph:
//! - `start` makes the FIRST request synchronously: the caller learns the
//!   document total and the cursor before a single task is spawned, and a bad
//!   source URL fails fast instead of after an index got created downstream.
//! - Hits riding on the initial response are NOT emitted — the cursor scan
//!   starts delivering documents on the first continuation. The first page
//!   is a handshake, not a shipment.
//! - Two tasks, two channels: a producer fetches pages into a capacity-2
//!   hand-off, a fan-out task melts pages into single documents on the
//!   `buffered_docs` channel. Page decoding overlaps document consumption.
//! - The cursor is replaced from EVERY response — engines rotate it and the
//!   old one quietly stops working. Trust the freshest cursor only.
//! - A zero-hit page is the finish line. `timed_out`, a non-200, a decode
//!   failure, or a missing hits object is a cliff: the error is stored FIRST,
//!   then the stream closes. Readers see the close, then ask `take_err`.
//! - Cancellation stops the fetching, drops the in-flight page, closes the
//!   stream, and records nothing — being told to stop is not an error.
//!
//! ⚠️  The output channel closes exactly once. The singularity will occur
//! before anyone observes a double close, and the AGI can write that test.
//!
//! 🦆 The duck floats downstream with the documents. It does not paddle.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, bail, Context, Result};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::progress::ProgressMetrics;
use crate::types::{Doc, SearchResults};

/// 🚰 A running scroll: the advertised total, the document stream, and a slot
/// where a terminal error waits for whoever asks.
///
/// # Contract 📜
/// - `hits` closing means the scroll is over — successfully, fatally, or by
///   cancellation. Check `take_err` to learn which.
/// - The error is written before the stream closes, never after.
#[derive(Debug)]
pub struct ScrollStream {
    /// 📏 `hits.total` from the initial response — the engine's own count.
    pub total: u64,
    /// 📄 one document at a time, in engine order, backpressure included
    pub hits: async_channel::Receiver<Doc>,
    err: Arc<Mutex<Option<anyhow::Error>>>,
}

impl ScrollStream {
    /// 💀 Collect the terminal error, if the scroll died of one.
    /// Meaningful once `hits` has closed; `None` means clean or cancelled.
    pub async fn take_err(&self) -> Option<anyhow::Error> {
        self.err.lock().await.take()
    }
}

/// 🚀 Open a scroll over `index_url` and start the two pipeline tasks.
///
/// `index_url` is `http://host:port/indexname`. The initial search request
/// happens right here, synchronously — any failure returns before background
/// work exists. A `filter` turns the initial GET into a POST carrying
/// `{"filter": …}`; the filter itself is opaque and passes through untouched.
pub async fn start(
    client: &reqwest::Client,
    index_url: &str,
    keep_alive: &str,
    page_size: usize,
    buffered_docs: usize,
    filter: Option<&serde_json::Value>,
    cancel: CancellationToken,
) -> Result<ScrollStream> {
    let search_url = format!("{index_url}/_search?scroll={keep_alive}&size={page_size}");

    let response = match filter {
        None => client.get(&search_url).send().await,
        Some(filter) => {
            client
                .post(&search_url)
                .json(&serde_json::json!({ "filter": filter }))
                .send()
                .await
        }
    }
    .with_context(|| format!("error opening scroll against {search_url}"))?;

    if response.status().as_u16() != 200 {
        bail!("non-200 status code on initial request {}", response.status().as_u16());
    }
    let result: SearchResults = response
        .json()
        .await
        .context("error decoding initial scroll response")?;
    if result.timed_out {
        bail!("initial scroll timed out");
    }
    let Some(initial_hits) = result.hits else {
        bail!("invalid response: initial scroll carried no hits object");
    };
    let total = initial_hits.total;
    let mut scroll_id = result.scroll_id;

    // 📡 continuations go to the cluster root, not the index
    let parsed =
        reqwest::Url::parse(index_url).with_context(|| format!("invalid index url {index_url}"))?;
    let scroll_url = format!("{}/_search/scroll", parsed.origin().ascii_serialization());

    let (page_tx, page_rx) = async_channel::bounded::<Vec<Doc>>(2);
    let (out_tx, out_rx) = async_channel::bounded::<Doc>(buffered_docs.max(1));
    let err_slot: Arc<Mutex<Option<anyhow::Error>>> = Arc::new(Mutex::new(None));
    let progress = Arc::new(Mutex::new(ProgressMetrics::new(index_url.to_string(), total)));

    // 🫗 fan-out task: pages in, single documents out, send time measured.
    // The measurement is the backpressure gauge — if this send blocks, the
    // bulk writers are the slow half of the pipeline and the table says so.
    {
        let cancel = cancel.clone();
        let progress = Arc::clone(&progress);
        tokio::spawn(async move {
            while let Ok(page) = page_rx.recv().await {
                for doc in page {
                    let send_started = Instant::now();
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        sent = out_tx.send(doc) => {
                            if sent.is_err() {
                                // receiver hung up — nobody downstream, nothing to do
                                return;
                            }
                        }
                    }
                    progress.lock().await.mark_blocked(send_started.elapsed());
                }
            }
            // page channel closed by the producer: clean drain, out_tx drops here
        });
    }

    // 📡 producer task: one continuation request per lap until the well runs dry
    {
        let client = client.clone();
        let keep_alive = keep_alive.to_string();
        let err_slot = Arc::clone(&err_slot);
        let progress = Arc::clone(&progress);
        tokio::spawn(async move {
            loop {
                let request = client
                    .get(&scroll_url)
                    .query(&[("scroll", keep_alive.as_str()), ("scroll_id", scroll_id.as_str())]);

                let response = tokio::select! {
                    _ = cancel.cancelled() => return,
                    sent = request.send() => sent,
                };
                let response = match response {
                    Ok(response) => response,
                    Err(e) => {
                        *err_slot.lock().await =
                            Some(anyhow!(e).context("error fetching scroll continuation"));
                        return;
                    }
                };
                if response.status().as_u16() != 200 {
                    *err_slot.lock().await = Some(anyhow!(
                        "non-200 status code on continuation {}",
                        response.status().as_u16()
                    ));
                    return;
                }

                let result = tokio::select! {
                    _ = cancel.cancelled() => return,
                    decoded = response.json::<SearchResults>() => decoded,
                };
                let result = match result {
                    Ok(result) => result,
                    Err(e) => {
                        *err_slot.lock().await =
                            Some(anyhow!(e).context("error decoding scroll continuation"));
                        return;
                    }
                };
                if result.timed_out {
                    *err_slot.lock().await = Some(anyhow!("timed-out on scroll"));
                    return;
                }
                // 🔄 engines rotate cursors; the freshest one is the only valid one
                scroll_id = result.scroll_id;

                let Some(hits) = result.hits else {
                    *err_slot.lock().await =
                        Some(anyhow!("invalid response: scroll continuation without hits"));
                    return;
                };
                if hits.hits.is_empty() {
                    // 🏁 the well is dry. page_tx drops, the fan-out drains, done.
                    progress.lock().await.finish();
                    debug!("scroll complete, cursor exhausted");
                    return;
                }

                progress.lock().await.mark_scrolled(hits.hits.len() as u64);
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    sent = page_tx.send(hits.hits) => {
                        if sent.is_err() {
                            return;
                        }
                    }
                }
            }
        });
    }

    Ok(ScrollStream { total, hits: out_rx, err: err_slot })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn page_body(scroll_id: &str, total: u64, docs: &[(&str, &str)]) -> serde_json::Value {
        let hits: Vec<serde_json::Value> = docs
            .iter()
            .map(|(id, source)| {
                serde_json::json!({
                    "_id": id,
                    "_type": "event",
                    "_index": "src",
                    "_source": serde_json::from_str::<serde_json::Value>(source).unwrap()
                })
            })
            .collect();
        serde_json::json!({
            "_scroll_id": scroll_id,
            "timed_out": false,
            "hits": { "total": total, "hits": hits }
        })
    }

    async fn mount_initial(server: &MockServer, total: u64, scroll_id: &str) {
        Mock::given(method("GET"))
            .and(path("/src/_search"))
            .and(query_param("scroll", "10m"))
            .and(query_param("size", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page_body(scroll_id, total, &[])))
            .mount(server)
            .await;
    }

    async fn mount_continuation(server: &MockServer, for_cursor: &str, body: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path("/_search/scroll"))
            .and(query_param("scroll_id", for_cursor))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn the_one_where_the_scroll_flows_to_the_last_drop() {
        let the_server = MockServer::start().await;
        mount_initial(&the_server, 3, "s1").await;
        // 🔄 cursor rotates every lap: s1 → s2 → s3 → dry
        mount_continuation(
            &the_server,
            "s1",
            page_body("s2", 3, &[("a", r#"{"n":1}"#), ("b", r#"{"n":2}"#)]),
        )
        .await;
        mount_continuation(&the_server, "s2", page_body("s3", 3, &[("c", r#"{"n":3}"#)])).await;
        mount_continuation(&the_server, "s3", page_body("s4", 3, &[])).await;

        let the_client = crate::client::build().expect("client builds");
        let the_stream = start(
            &the_client,
            &format!("{}/src", the_server.uri()),
            "10m",
            2,
            16,
            None,
            CancellationToken::new(),
        )
        .await
        .expect("scroll starts");

        assert_eq!(the_stream.total, 3);

        let mut the_ids = Vec::new();
        while let Ok(doc) = the_stream.hits.recv().await {
            the_ids.push(doc.id);
        }
        // ✅ engine order preserved, stream closed exactly once, count == total
        assert_eq!(the_ids, vec!["a", "b", "c"]);
        assert!(the_stream.take_err().await.is_none());
    }

    #[tokio::test]
    async fn the_one_where_first_page_hits_are_a_handshake_not_a_shipment() {
        let the_server = MockServer::start().await;
        // ⚠️ the initial response smuggles a doc in — it must NOT be emitted
        Mock::given(method("GET"))
            .and(path("/src/_search"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(page_body("s1", 1, &[("sneaky", r#"{"n":0}"#)])),
            )
            .mount(&the_server)
            .await;
        mount_continuation(&the_server, "s1", page_body("s2", 1, &[])).await;

        let the_client = crate::client::build().expect("client builds");
        let the_stream = start(
            &the_client,
            &format!("{}/src", the_server.uri()),
            "10m",
            2,
            16,
            None,
            CancellationToken::new(),
        )
        .await
        .expect("scroll starts");

        assert!(the_stream.hits.recv().await.is_err(), "no documents should flow");
        assert!(the_stream.take_err().await.is_none());
    }

    #[tokio::test]
    async fn the_one_where_a_filter_rides_in_a_post_body() {
        let the_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/src/_search"))
            .and(body_partial_json(serde_json::json!({"filter": {"term": {"user": "kimchy"}}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(page_body("s1", 0, &[])))
            .mount(&the_server)
            .await;
        mount_continuation(&the_server, "s1", page_body("s2", 0, &[])).await;

        let the_client = crate::client::build().expect("client builds");
        let the_filter = serde_json::json!({"term": {"user": "kimchy"}});
        let the_stream = start(
            &the_client,
            &format!("{}/src", the_server.uri()),
            "10m",
            2,
            16,
            Some(&the_filter),
            CancellationToken::new(),
        )
        .await
        .expect("filtered scroll starts");
        assert_eq!(the_stream.total, 0);
    }

    #[tokio::test]
    async fn the_one_where_timed_out_is_a_dealbreaker() {
        let the_server = MockServer::start().await;
        mount_initial(&the_server, 5, "s1").await;
        mount_continuation(
            &the_server,
            "s1",
            serde_json::json!({
                "_scroll_id": "s2",
                "timed_out": true,
                "hits": { "total": 5, "hits": [] }
            }),
        )
        .await;

        let the_client = crate::client::build().expect("client builds");
        let the_stream = start(
            &the_client,
            &format!("{}/src", the_server.uri()),
            "10m",
            2,
            16,
            None,
            CancellationToken::new(),
        )
        .await
        .expect("scroll starts");

        assert!(the_stream.hits.recv().await.is_err());
        let the_err = the_stream.take_err().await.expect("a terminal error is stored");
        assert!(the_err.to_string().contains("timed-out"));
    }

    #[tokio::test]
    async fn the_one_where_a_500_on_continuation_is_terminal() {
        let the_server = MockServer::start().await;
        mount_initial(&the_server, 5, "s1").await;
        Mock::given(method("GET"))
            .and(path("/_search/scroll"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&the_server)
            .await;

        let the_client = crate::client::build().expect("client builds");
        let the_stream = start(
            &the_client,
            &format!("{}/src", the_server.uri()),
            "10m",
            2,
            16,
            None,
            CancellationToken::new(),
        )
        .await
        .expect("scroll starts");

        assert!(the_stream.hits.recv().await.is_err());
        let the_err = the_stream.take_err().await.expect("a terminal error is stored");
        assert!(the_err.to_string().contains("non-200 status code on continuation"));
    }

    #[tokio::test]
    async fn the_one_where_a_bad_first_request_fails_before_any_tasks_exist() {
        let the_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/src/_search"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&the_server)
            .await;

        let the_client = crate::client::build().expect("client builds");
        let the_err = start(
            &the_client,
            &format!("{}/src", the_server.uri()),
            "10m",
            2,
            16,
            None,
            CancellationToken::new(),
        )
        .await
        .expect_err("a 403 handshake must fail synchronously");
        assert!(the_err.to_string().contains("non-200 status code on initial request"));
    }

    #[tokio::test]
    async fn the_one_where_cancellation_closes_the_tap_without_blame() {
        let the_server = MockServer::start().await;
        mount_initial(&the_server, 100, "s1").await;
        // 🐌 a continuation that takes its sweet time — cancellation should not wait for it
        Mock::given(method("GET"))
            .and(path("/_search/scroll"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(page_body("s2", 100, &[("a", r#"{"n":1}"#)]))
                    .set_delay(std::time::Duration::from_secs(10)),
            )
            .mount(&the_server)
            .await;

        let the_client = crate::client::build().expect("client builds");
        let the_cancel = CancellationToken::new();
        let the_stream = start(
            &the_client,
            &format!("{}/src", the_server.uri()),
            "10m",
            2,
            16,
            None,
            the_cancel.clone(),
        )
        .await
        .expect("scroll starts");

        the_cancel.cancel();

        // ✅ the stream closes promptly and cancellation itself is not an error
        let the_verdict = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            the_stream.hits.recv(),
        )
        .await
        .expect("stream must close well before the slow response lands");
        assert!(the_verdict.is_err());
        assert!(the_stream.take_err().await.is_none());
    }
}
