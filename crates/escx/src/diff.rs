//! 🔍 Single-document comparison — did the copy actually copy?
//!
//! 🧠 Knowledge graph:
//! - Fast path first: raw `_source` bytes compared as-is. Identical bytes
//!   means identical documents, no parsing, no allocation, next please.
//! - Slow path only when bytes differ: both payloads parse into generic maps
//!   and get compared structurally. Key order and whitespace don't count as
//!   differences; values and field sets do.
//! - A `(type, id)` disagreement between what we asked for and what came
//!   back is NOT a data diff — it's a coding error in this program or a
//!   cluster losing its mind, and either way it's fatal.
//!
//! 🦆 The duck holds the two documents up to the light, one in each wing.

use anyhow::{bail, Context, Result};
use serde_json::{Map, Value};

use crate::types::Doc;

/// 🔍 The verdict on one document.
#[derive(Debug, PartialEq, Eq)]
pub enum DocDiff {
    /// ✅ same document. `fast` says whether the byte path settled it.
    Match { fast: bool },
    /// 👻 destination returned 404 — the document never arrived.
    Missing,
    /// 📊 different number of fields — the cheapest structural tell.
    FieldCount { source: usize, dest: usize },
    /// 📄 same field count, different content.
    Source,
}

impl DocDiff {
    pub fn is_match(&self) -> bool {
        matches!(self, DocDiff::Match { .. })
    }
}

/// 🔍 Fetch `doc`'s counterpart from `<dest_index_url>/<type>/<id>` and classify.
///
/// Returns `Err` for transport failures, unexpected statuses, undecodable
/// bodies, and metadata mismatches — none of those are "the data differs",
/// all of them mean the validation run itself cannot be trusted.
pub async fn check(client: &reqwest::Client, doc: &Doc, dest_index_url: &str) -> Result<DocDiff> {
    let target = format!("{dest_index_url}/{}/{}", doc.doc_type, doc.id);
    let response = client
        .get(&target)
        .send()
        .await
        .with_context(|| format!("error contacting target {target}"))?;

    match response.status().as_u16() {
        200 => {}
        404 => return Ok(DocDiff::Missing),
        status => {
            // 💀 a 500 or a 403 is not a diff verdict, it's a broken check
            let body = response.text().await.unwrap_or_default();
            bail!("non-200 status code from {target}: {status} body: {body}");
        }
    }

    let fetched: Doc = response
        .json()
        .await
        .with_context(|| format!("error decoding destination document {target}"))?;

    // 🔒 identity check — we asked for a specific (type, id); getting back a
    // different one means the request and response disagree about reality
    if doc.id != fetched.id {
        bail!("metadata mismatch; coding error? _id {} != {}", doc.id, fetched.id);
    }
    if doc.doc_type != fetched.doc_type {
        bail!("metadata mismatch; coding error? _type {} != {}", doc.doc_type, fetched.doc_type);
    }

    // 🚀 fast path: byte-identical payloads need no ceremony
    if doc.source.get() == fetched.source.get() {
        return Ok(DocDiff::Match { fast: true });
    }

    // 🐢 slow path: structural comparison, order-insensitive
    let original: Map<String, Value> = serde_json::from_str(doc.source.get())
        .with_context(|| format!("error unmarshalling source doc {}", doc.id))?;
    let copied: Map<String, Value> = serde_json::from_str(fetched.source.get())
        .with_context(|| format!("error unmarshalling destination doc {}", doc.id))?;

    if original.len() != copied.len() {
        return Ok(DocDiff::FieldCount { source: original.len(), dest: copied.len() });
    }
    if original != copied {
        return Ok(DocDiff::Source);
    }
    Ok(DocDiff::Match { fast: false })
}
