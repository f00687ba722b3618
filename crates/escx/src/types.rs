//! 📦 Wire types — the vocabulary both clusters agree on.
//!
//! 🎬 COLD OPEN — INT. A JSON RESPONSE BODY — TIMESTAMP UNKNOWN
//!
//! Somewhere between two clusters, a document is in transit. It carries three
//! pieces of identity (`_id`, `_type`, `_index`) and one opaque payload
//! (`_source`) that we have sworn never to look inside. We are movers, not
//! readers. The boxes stay taped shut until the validator NEEDS to open one.
//!
//! 🧠 Knowledge graph:
//! - `Doc` is the atomic unit: identity fields + `_source` as raw bytes.
//!   The `(index, type, id)` triple must survive the trip bit-exact.
//! - `SearchResults`/`Hits` decode both scroll pages and `_search?size=0`
//!   count probes — same envelope, different fill level.
//! - `BulkAction`/`FramingMeta` serialize the one-line header of each bulk
//!   pair. Borrowed fields, zero clones in the encode hot loop.
//! - `BulkResponse::succeeded` is the retry brain: it decides which ids get
//!   pruned from a batch after an upload.
//! - `_source` rides as `Box<RawValue>` so payload bytes pass through
//!   untouched. Only the validator's slow path ever parses them.
//!
//! 🦆 The duck inspected the `_type` field, muttered something about
//! deprecation timelines, and declined to comment further.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

/// 📄 One document, as the scroll hands it to us and as the bulk API wants it back.
///
/// Identity fields default to empty strings when absent — an absent `_type`
/// is the engine's problem to have and ours to faithfully reproduce.
/// The payload is raw bytes in a box. Do not open the box. The box is load-bearing.
#[derive(Debug, Clone, Deserialize)]
pub struct Doc {
    #[serde(rename = "_id", default)]
    pub id: String,
    #[serde(rename = "_type", default)]
    pub doc_type: String,
    #[serde(rename = "_index", default)]
    pub index: String,
    /// 📦 The uninterpreted payload. `RawValue` keeps the exact bytes the
    /// source cluster sent — field order, float formatting, everything.
    #[serde(rename = "_source", default = "null_source")]
    pub source: Box<RawValue>,
}

// -- "null" is what a doc without a body is worth. Harsh but accurate.
fn null_source() -> Box<RawValue> {
    // 🐛 safe unwrap: "null" is valid JSON, has been since 2001, will be after the singularity
    RawValue::from_string("null".to_string()).unwrap()
}

/// 📦 The `hits` envelope: a page of documents plus the advertised grand total.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct Hits {
    #[serde(default)]
    pub hits: Vec<Doc>,
    #[serde(default)]
    pub total: u64,
}

/// 📡 Top-level search/scroll response envelope.
///
/// Decodes three very different requests with one struct:
/// the initial scroll (total + cursor), every continuation (docs + rotated
/// cursor), and the `size=0` count probe (total, nothing else). Economy of types.
#[derive(Debug, Default, Deserialize)]
pub struct SearchResults {
    pub hits: Option<Hits>,
    #[serde(default)]
    pub timed_out: bool,
    #[serde(rename = "_scroll_id", default)]
    pub scroll_id: String,
}

/// ✅ The cluster's one-word answer to index mutations. `true` or we riot.
#[derive(Debug, Default, Deserialize)]
pub struct AckResponse {
    #[serde(default)]
    pub acknowledged: bool,
}

/// 📜 The one-line header preceding each source line in a bulk body.
///
/// Borrowed straight out of the `Doc` being encoded — the only field we
/// override is `_index`, which gets the destination index name. `_id` and
/// `_type` pass through untouched, as identity demands.
#[derive(Debug, Serialize)]
pub struct BulkAction<'a> {
    pub index: FramingMeta<'a>,
}

#[derive(Debug, Serialize)]
pub struct FramingMeta<'a> {
    #[serde(rename = "_id")]
    pub id: &'a str,
    #[serde(rename = "_type")]
    pub doc_type: &'a str,
    #[serde(rename = "_index")]
    pub index: &'a str,
}

/// 📡 What the bulk endpoint says about each action we sent it.
///
/// Each entry in `items` is a one-key map: action name ("index") → the
/// per-item verdict. We don't care which action it was — only the verdict.
#[derive(Debug, Default, Deserialize)]
pub struct BulkResponse {
    #[serde(default)]
    pub errors: bool,
    #[serde(default)]
    pub items: Vec<HashMap<String, BulkItem>>,
}

/// 🎯 One per-item verdict from a bulk response: the id it concerns, the HTTP
/// status the engine assigned it, and an error blob when things went sideways.
#[derive(Debug, Deserialize)]
pub struct BulkItem {
    #[serde(rename = "_id", default)]
    pub id: String,
    #[serde(default)]
    pub status: u16,
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

impl BulkResponse {
    /// ✅ Iterate the items that actually made it.
    ///
    /// An item succeeded when its status is 2xx. A 404 is *optionally* a
    /// success (`include_404`) — deletes report 404 for already-gone docs and
    /// some callers shrug at that. A copy does NOT shrug: a 404 on a write
    /// means the write did not happen, so copy callers pass `false` and the
    /// item stays in the batch for the next retry.
    ///
    /// "He who treats 404 as success while writing, validates in tears."
    ///   — Ancient bulk-API proverb 🦆
    pub fn succeeded(&self, include_404: bool) -> impl Iterator<Item = &BulkItem> {
        self.items.iter().flat_map(|entry| entry.values()).filter(move |item| {
            (200..=299).contains(&item.status) || (include_404 && item.status == 404)
        })
    }
}
