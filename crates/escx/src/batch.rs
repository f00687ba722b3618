// ai
//! 🗑️ The batch buffer — a shopping cart keyed by `_id`, with a scale built in.
//!
//! 🎬 *[a bulk upload fails. 200 docs went out. 3 came back marked 503.]*
//! *[an amateur resends all 200. the cluster, already drowning, drowns harder.]*
//! *[a `Batch` resends exactly 3. the cluster sends its regards.]*
//!
//! 🧠 Knowledge graph:
//! - Keyed by id so a bulk response can prune precisely the items it blessed.
//!   The retry then reissues the failed subset and nothing else.
//! - `byte_len` tracks accumulated `_source` bytes — the writer's upload
//!   trigger reads it after every add.
//! - `encode` renders the two-line-per-doc bulk body into a backing buffer
//!   that lives with the batch and is reused across uploads and retries.
//!   Cleared at the top of every call, so encoding is repeatable.
//! - Batches are pooled by the writer: acquired, reset, filled, uploaded,
//!   returned. One owner at a time. The pool is the law.
//!
//! ⚠️ Inserting an id that's already present overwrites it. That's a feature:
//! re-adding during a retry is idempotent instead of duplicating.
//!
//! 🦆 The duck weighed the batch, nodded once, and waddled off.

use std::collections::HashMap;

use anyhow::{Context, Result};

use crate::types::{BulkAction, Doc, FramingMeta};

/// 🗑️ A pool-owned accumulation of documents awaiting upload.
///
/// # Contract 📜
/// - `add` overwrites on duplicate id; byte accounting stays honest either way.
/// - `delete` is how upload success is recorded, one id at a time.
/// - `encode` emits `framing\nsource\n` pairs with `_index` overridden to the
///   destination index; the backing buffer is cleared first, so the output
///   never contains a previous encoding.
/// - `reset` empties everything but keeps allocations — pools love capacity.
#[derive(Debug, Default)]
pub struct Batch {
    docs: HashMap<String, Doc>,
    byte_len: usize,
    buf: Vec<u8>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    /// 📦 Put a document in the cart. Same id twice? The newer one wins and
    /// the scale is adjusted — no double counting, no stale weight.
    pub fn add(&mut self, id: String, doc: Doc) {
        self.byte_len += doc.source.get().len();
        if let Some(previous) = self.docs.insert(id, doc) {
            self.byte_len -= previous.source.get().len();
        }
    }

    /// ✅ Remove one id — the bulk response said this one landed.
    pub fn delete(&mut self, id: &str) {
        if let Some(previous) = self.docs.remove(id) {
            self.byte_len -= previous.source.get().len();
        }
    }

    /// 🔢 Distinct ids still awaiting a successful write.
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// 📏 Accumulated `_source` bytes. Framing overhead not included — the
    /// upload trigger cares about payload weight, not packaging.
    pub fn byte_len(&self) -> usize {
        self.byte_len
    }

    /// 📜 Render the bulk request body: one framing line and one source line
    /// per document, each terminated by LF.
    ///
    /// The framing `_index` is overridden with `index` — the whole point of a
    /// copy is that documents land somewhere else. `_id` and `_type` pass
    /// through verbatim.
    ///
    /// ⚠️ Raw LF bytes inside a source payload are stripped while writing.
    /// A newline mid-source would split one document into two framing-less
    /// lines and the bulk endpoint would reject the entire body.
    pub fn encode(&mut self, index: &str) -> Result<&[u8]> {
        // 🧹 top-of-call clear: encode is repeatable, never additive
        self.buf.clear();
        for (id, doc) in &self.docs {
            serde_json::to_writer(
                &mut self.buf,
                &BulkAction {
                    index: FramingMeta { id, doc_type: &doc.doc_type, index },
                },
            )
            .context("error encoding batch framing line")?;
            self.buf.push(b'\n');
            for &byte in doc.source.get().as_bytes() {
                if byte != b'\n' {
                    self.buf.push(byte);
                }
            }
            self.buf.push(b'\n');
        }
        Ok(&self.buf)
    }

    /// 🧹 Empty the cart, keep the cart. Capacity survives for the next lap.
    pub fn reset(&mut self) {
        self.docs.clear();
        self.byte_len = 0;
        self.buf.clear();
    }
}
