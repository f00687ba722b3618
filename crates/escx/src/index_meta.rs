//! 🗂️ Index metadata client — get, create, tune, and squash indexes.
//!
//! 🧠 Knowledge graph:
//! - Deliberately stateless: every function takes the client and a full index
//!   URL. Sequencing (snapshot → create → load → restore → merge) is the
//!   orchestrator's job; this module is just verbs.
//! - The engine string-encodes numeric settings on the wire —
//!   `"number_of_shards": "5"`, yes really — so `as_string_number` speaks
//!   string on the way out and tolerates both on the way in.
//! - `get` asserts that `shards` came back non-null. Shards are ALWAYS
//!   populated in a real settings response, so a null there means the
//!   response shape drifted and we'd rather fail here than act on garbage.
//! - Matchable failures (`Missing`, `Exists`, `Unacknowledged`) are a typed
//!   enum; everything else rides anyhow with context.
//!
//! ⚠️ `force_merge` reads the response body to completion ON PURPOSE — that
//! read is what blocks until the merge finishes. Do not "optimize" it away;
//! you would return success while the cluster is still chewing.
//!
//! 🦆 The duck asked why shard counts are strings. Nobody knew. The duck
//! wrote it down in a small, damp notebook.

use std::collections::HashMap;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::types::{AckResponse, SearchResults};

/// 💀 The failures callers actually branch on. Everything else is context soup.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum IndexError {
    #[error("index missing")]
    Missing,
    #[error("index exists")]
    Exists,
    /// The cluster answered, but didn't say `acknowledged: true`. A mutation
    /// that wasn't acknowledged didn't happen as far as we're concerned.
    #[error("index change not acknowledged")]
    Unacknowledged,
}

/// 🗂️ The settings envelope, as PUT and as GET.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<Settings>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<IndexSettings>,
}

/// 🔧 The knobs we read and write. Everything optional — a partial update
/// PUTs only what it means to change, nothing else rides along.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexSettings {
    #[serde(
        rename = "number_of_replicas",
        default,
        with = "as_string_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub replicas: Option<u32>,
    #[serde(
        rename = "number_of_shards",
        default,
        with = "as_string_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub shards: Option<u32>,
    #[serde(rename = "refresh_interval", default, skip_serializing_if = "Option::is_none")]
    pub refresh_interval: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapping: Option<IndexMapping>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unassigned: Option<UnassignedWrapper>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexMapping {
    #[serde(rename = "nested_fields", default, skip_serializing_if = "Option::is_none")]
    pub nested_fields: Option<FieldsSetting>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldsSetting {
    #[serde(default, with = "as_string_number", skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnassignedWrapper {
    #[serde(rename = "node_left", default, skip_serializing_if = "Option::is_none")]
    pub node_left: Option<NodeOptions>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeOptions {
    #[serde(rename = "delayed_timeout", default, skip_serializing_if = "Option::is_none")]
    pub delayed_timeout: Option<String>,
}

impl IndexMeta {
    /// 🔧 Wrap bare index settings in the full envelope.
    pub fn with_index_settings(index: IndexSettings) -> Self {
        IndexMeta { settings: Some(Settings { index: Some(index) }) }
    }

    /// 🔎 Shard count, if the whole chain of Options cooperates.
    pub fn shards(&self) -> Option<u32> {
        self.settings.as_ref()?.index.as_ref()?.shards
    }

    /// 🔎 Refresh interval string, same deal.
    pub fn refresh_interval(&self) -> Option<&str> {
        self.settings.as_ref()?.index.as_ref()?.refresh_interval.as_deref()
    }
}

/// 🔢 `"5"` on the wire, `5` in the struct. Tolerates bare numbers on input
/// because some responses have opinions.
mod as_string_number {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<u32>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(n) => serializer.serialize_str(&n.to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u32>, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum NumberOrString {
            Number(u32),
            Text(String),
        }
        match Option::<NumberOrString>::deserialize(deserializer)? {
            None => Ok(None),
            Some(NumberOrString::Number(n)) => Ok(Some(n)),
            Some(NumberOrString::Text(s)) => s.parse().map(Some).map_err(de::Error::custom),
        }
    }
}

// -- the index name is the last path segment of the index URL. always.
fn index_name_of(index_url: &str) -> &str {
    index_url.trim_end_matches('/').rsplit('/').next().unwrap_or(index_url)
}

/// 📥 Fetch an index's settings. `IndexError::Missing` on 404.
///
/// The response is keyed by index name; we pluck ours out and sanity-check
/// that `shards` deserialized — the canary for a malformed response.
pub async fn get(client: &reqwest::Client, index_url: &str) -> Result<IndexMeta> {
    let response = client
        .get(index_url)
        .send()
        .await
        .with_context(|| format!("error contacting index {index_url}"))?;
    if response.status().as_u16() == 404 {
        return Err(IndexError::Missing.into());
    }
    if response.status().as_u16() != 200 {
        bail!("non-200 status code reading index {index_url}: {}", response.status().as_u16());
    }

    let raw = response.bytes().await.context("error reading index settings response")?;
    let mut by_name: HashMap<String, IndexMeta> = serde_json::from_slice(&raw)
        .with_context(|| format!("error decoding settings for {index_url}"))?;

    let name = index_name_of(index_url);
    let meta = by_name
        .remove(name)
        .ok_or_else(|| anyhow!("index {name} not found in settings response"))?;
    // 🔒 shards are always present in a real settings block — a None here
    // means the response didn't unmarshal the way we think it did
    if meta.shards().is_none() {
        bail!("unable to read existing shards for index {name}");
    }
    Ok(meta)
}

/// 🏗️ Create an index with the given settings. `IndexError::Exists` when it
/// already does — and in that case nothing was sent, nothing was modified.
pub async fn create(client: &reqwest::Client, index_url: &str, meta: &IndexMeta) -> Result<()> {
    match get(client, index_url).await {
        Ok(_) => Err(IndexError::Exists.into()),
        Err(e) if e.downcast_ref::<IndexError>() == Some(&IndexError::Missing) => {
            put(client, index_url, meta).await
        }
        Err(e) => Err(e.context("error checking for existing index")),
    }
}

/// 🔧 Update live settings: PUT to `<index>/_settings`.
pub async fn update(client: &reqwest::Client, index_url: &str, meta: &IndexMeta) -> Result<()> {
    put(client, &format!("{index_url}/_settings"), meta).await
}

async fn put(client: &reqwest::Client, url: &str, meta: &IndexMeta) -> Result<()> {
    let response = client
        .put(url)
        .json(meta)
        .send()
        .await
        .with_context(|| format!("error putting index settings to {url}"))?;
    let ack: AckResponse = response
        .json()
        .await
        .with_context(|| format!("error decoding index response from {url}"))?;
    if !ack.acknowledged {
        return Err(IndexError::Unacknowledged.into());
    }
    Ok(())
}

/// 🧲 Squash the index's segments down to at most `max_segments` (`< 1` → 1).
///
/// Blocks until the merge completes — the body read at the end is the
/// blocking mechanism, see the module notes.
pub async fn force_merge(client: &reqwest::Client, index_url: &str, max_segments: u32) -> Result<()> {
    let max_segments = max_segments.max(1);
    let url = format!("{index_url}/_forcemerge?max_num_segments={max_segments}");
    let response = client
        .post(&url)
        .send()
        .await
        .with_context(|| format!("error force merging {index_url}"))?;
    if !response.status().is_success() {
        bail!("non-2xx status code on force merge: {}", response.status().as_u16());
    }
    // ⏳ this read IS the wait
    response.bytes().await.context("error while waiting on force merge")?;
    Ok(())
}

/// 🔢 How many documents does the index claim to hold?
pub async fn doc_count(client: &reqwest::Client, index_url: &str) -> Result<u64> {
    let response = client
        .get(format!("{index_url}/_search?size=0"))
        .send()
        .await
        .with_context(|| format!("error contacting index {index_url}"))?;
    let results: SearchResults = response
        .json()
        .await
        .with_context(|| format!("error reading doc count for {index_url}"))?;
    let hits = results.hits.ok_or_else(|| anyhow!("invalid count response for {index_url}"))?;
    Ok(hits.total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings_body(index_name: &str, shards: &str, replicas: &str) -> serde_json::Value {
        serde_json::json!({
            index_name: {
                "settings": {
                    "index": {
                        "number_of_shards": shards,
                        "number_of_replicas": replicas,
                        "refresh_interval": "5s"
                    }
                }
            }
        })
    }

    #[test]
    fn the_one_where_numbers_wear_string_costumes() {
        let the_meta: IndexMeta = serde_json::from_str(
            r#"{"settings": {"index": {"number_of_shards": "5", "number_of_replicas": 2,
                "mapping": {"nested_fields": {"limit": "100"}},
                "unassigned": {"node_left": {"delayed_timeout": "5m"}}}}}"#,
        )
        .expect("settings decode with both encodings");
        assert_eq!(the_meta.shards(), Some(5));

        let the_wire = serde_json::to_value(&the_meta).expect("settings serialize");
        // ✅ string costumes back on for the trip out
        assert_eq!(the_wire["settings"]["index"]["number_of_shards"], "5");
        assert_eq!(the_wire["settings"]["index"]["number_of_replicas"], "2");
        assert_eq!(
            the_wire["settings"]["index"]["mapping"]["nested_fields"]["limit"],
            "100"
        );
    }

    #[test]
    fn the_one_where_partial_settings_stay_partial() {
        let the_meta = IndexMeta::with_index_settings(IndexSettings {
            refresh_interval: Some("30s".to_string()),
            ..Default::default()
        });
        let the_wire = serde_json::to_string(&the_meta).expect("settings serialize");
        // 🔒 a refresh-interval update must not smuggle shard or replica keys
        assert_eq!(the_wire, r#"{"settings":{"index":{"refresh_interval":"30s"}}}"#);
    }

    #[tokio::test]
    async fn the_one_where_a_404_becomes_a_typed_missing() {
        let the_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/nope"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&the_server)
            .await;

        let the_client = crate::client::build().expect("client builds");
        let the_err = get(&the_client, &format!("{}/nope", the_server.uri()))
            .await
            .expect_err("404 must be Missing");
        assert_eq!(the_err.downcast_ref::<IndexError>(), Some(&IndexError::Missing));
    }

    #[tokio::test]
    async fn the_one_where_a_shardless_response_is_called_out() {
        let the_server = MockServer::start().await;
        // ⚠️ settings block with no shards — the malformed-response canary
        Mock::given(method("GET"))
            .and(path("/weird"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "weird": {"settings": {"index": {"refresh_interval": "1s"}}}
            })))
            .mount(&the_server)
            .await;

        let the_client = crate::client::build().expect("client builds");
        let the_err = get(&the_client, &format!("{}/weird", the_server.uri()))
            .await
            .expect_err("a shardless settings block is malformed");
        assert!(the_err.to_string().contains("unable to read existing shards"));
    }

    #[tokio::test]
    async fn the_one_where_create_refuses_to_overwrite() {
        let the_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/already"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(settings_body("already", "3", "1")),
            )
            .mount(&the_server)
            .await;
        // 🔒 no PUT mock mounted: an attempted PUT would 404 and fail the test
        // through the unacknowledged path — but really, it must never be sent

        let the_client = crate::client::build().expect("client builds");
        let the_err = create(
            &the_client,
            &format!("{}/already", the_server.uri()),
            &IndexMeta::default(),
        )
        .await
        .expect_err("creating an existing index must refuse");
        assert_eq!(the_err.downcast_ref::<IndexError>(), Some(&IndexError::Exists));
        assert_eq!(
            the_server
                .received_requests()
                .await
                .expect("requests recorded")
                .iter()
                .filter(|r| r.method.as_str() == "PUT")
                .count(),
            0,
            "no settings mutation may happen on Exists"
        );
    }

    #[tokio::test]
    async fn the_one_where_create_puts_after_a_clean_404() {
        let the_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fresh"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&the_server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/fresh"))
            .and(body_partial_json(serde_json::json!({
                "settings": {"index": {"number_of_shards": "3"}}
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"acknowledged": true})),
            )
            .expect(1)
            .mount(&the_server)
            .await;

        let the_client = crate::client::build().expect("client builds");
        let the_meta = IndexMeta::with_index_settings(IndexSettings {
            shards: Some(3),
            ..Default::default()
        });
        create(&the_client, &format!("{}/fresh", the_server.uri()), &the_meta)
            .await
            .expect("create works");
    }

    #[tokio::test]
    async fn the_one_where_an_unacknowledged_put_does_not_count() {
        let the_server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/idx/_settings"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"acknowledged": false})),
            )
            .mount(&the_server)
            .await;

        let the_client = crate::client::build().expect("client builds");
        let the_err = update(&the_client, &format!("{}/idx", the_server.uri()), &IndexMeta::default())
            .await
            .expect_err("unacknowledged must fail");
        assert_eq!(the_err.downcast_ref::<IndexError>(), Some(&IndexError::Unacknowledged));
    }

    #[tokio::test]
    async fn the_one_where_force_merge_clamps_and_blocks() {
        let the_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/idx/_forcemerge"))
            .and(query_param("max_num_segments", "1"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&the_server)
            .await;

        let the_client = crate::client::build().expect("client builds");
        // 🔢 0 clamps to 1, mirroring the endpoint's own minimum
        force_merge(&the_client, &format!("{}/idx", the_server.uri()), 0)
            .await
            .expect("force merge works");
    }

    #[tokio::test]
    async fn the_one_where_the_doc_count_is_just_hits_total() {
        let the_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/idx/_search"))
            .and(query_param("size", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "hits": {"total": 42, "hits": []}
            })))
            .mount(&the_server)
            .await;

        let the_client = crate::client::build().expect("client builds");
        let the_count = doc_count(&the_client, &format!("{}/idx", the_server.uri()))
            .await
            .expect("count works");
        assert_eq!(the_count, 42);
    }
}
