//! 🧰 Jobs — the two things this tool actually does, and the configs they share.
//!
//! 🧠 Knowledge graph:
//! - `copy` moves an index. `validate` audits the move. Both scroll the same
//!   source, so `SourceConfig` lives here, equidistant from its two users.
//! - `DestConfig` carries every destination-side knob: creation, throughput,
//!   and the deferred-settings dance (refresh off → copy → merge → restore).
//! - Configs deserialize straight out of the app config file; defaults are
//!   serde default fns so a three-line TOML is a valid config.
//! - `bulk_size` accepts honest integers AND human strings ("20m", "500k") —
//!   because nobody on this earth types 20971520 on purpose.

pub mod copy;
pub mod validate;

use anyhow::{bail, Context};
use serde::{Deserialize, Deserializer};

use crate::client::normalize_host;

/// 🚰 Where the documents come from, and how hard to pull.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// 📡 source cluster, e.g. `http://es1:9200` (scheme optional, we fix it)
    pub host: String,
    /// 🏷️ the index to read
    pub index: String,
    /// ⏳ server-side cursor keep-alive, passed to the engine verbatim
    #[serde(default = "default_scroll_timeout")]
    pub scroll_timeout: String,
    /// 📄 hits requested per shard per page
    #[serde(default = "default_scroll_page")]
    pub scroll_page: usize,
    /// 📦 documents buffered in memory between reader and writers
    #[serde(default = "default_scroll_docs")]
    pub scroll_docs: usize,
    /// 🔍 opaque filter object shipped with the initial search, untouched
    #[serde(default)]
    pub filter: Option<serde_json::Value>,
}

fn default_scroll_timeout() -> String {
    "10m".to_string()
}
fn default_scroll_page() -> usize {
    1000
}
fn default_scroll_docs() -> usize {
    5000
}

impl SourceConfig {
    /// 📡 Full source index URL: normalized host + index name.
    pub fn url(&self) -> String {
        format!("{}/{}", normalize_host(&self.host), self.index)
    }
}

/// 🚛 Where the documents go, and everything about how they get there.
#[derive(Debug, Clone, Deserialize)]
pub struct DestConfig {
    /// 📡 destination nodes — bulk requests round-robin across all of them
    pub hosts: Vec<String>,
    /// 🏷️ the index to write
    pub index: String,
    /// 🔢 shard count for the new index; 0 = inherit from the source
    #[serde(default)]
    pub shards: u32,
    /// ⏭️ assume the index exists; skip creation (and the settle delay)
    #[serde(default)]
    pub skip_create: bool,
    /// 💤 seconds to let the cluster settle after creating the index
    #[serde(default)]
    pub create_delay_secs: u64,
    /// 🚫 create with `refresh_interval = -1`, restore after the copy
    #[serde(default)]
    pub delay_refresh: bool,
    /// 🔄 interval to restore afterwards; unset = inherit source (or "1s")
    #[serde(default)]
    pub refresh_interval: Option<String>,
    /// 🧲 `max_num_segments` for the post-copy force merge
    #[serde(default = "default_max_segments")]
    pub max_segments: u32,
    /// 🚫 create with `number_of_replicas = 0`, restore after the copy
    #[serde(default)]
    pub delay_replication: bool,
    /// 🔄 replica count to restore when `delay_replication` is on
    #[serde(default = "default_replication_factor")]
    pub replication_factor: u32,
    /// 📏 byte trigger for batch dispatch; integers or "20m"-style strings
    #[serde(default = "default_bulk_size", deserialize_with = "human_byte_size")]
    pub bulk_size: usize,
    /// 🧵 bulk worker pool size; 0 = two lanes per destination host
    #[serde(default)]
    pub bulk_parallelism: usize,
    /// 🔀 rotate to the next host on each retry of a failing batch.
    /// Off by default: a batch's host is pinned for all of its attempts.
    #[serde(default)]
    pub rotate_retry_hosts: bool,
}

fn default_max_segments() -> u32 {
    1
}
fn default_replication_factor() -> u32 {
    1
}
fn default_bulk_size() -> usize {
    20 * 1024 * 1024
}

impl DestConfig {
    /// 📡 All destination hosts, normalized.
    pub fn urls(&self) -> Vec<String> {
        self.hosts.iter().map(|host| normalize_host(host)).collect()
    }

    /// 📡 The "primary" — first host — used for everything that isn't a bulk
    /// write: create, settings, merge, counts. `None` when no hosts exist.
    pub fn primary_url(&self) -> Option<String> {
        self.hosts.first().map(|host| format!("{}/{}", normalize_host(host), self.index))
    }

    /// 🧵 Resolved worker-pool size: configured value, or hosts × 2.
    pub fn workers(&self) -> usize {
        if self.bulk_parallelism == 0 {
            self.hosts.len() * 2
        } else {
            self.bulk_parallelism
        }
    }
}

/// 📏 Parse "20m" / "500k" / "3g" / "123b" / "123" into bytes.
/// Magnitudes are powers of 1024. Above gigabytes you don't want an in-memory
/// buffer anyway, so the table stops there.
pub(crate) fn parse_byte_size(v: &str) -> anyhow::Result<usize> {
    let v = v.trim();
    if v.is_empty() {
        bail!("size string too small: {v:?}");
    }
    // -- bare digits are already bytes, no costume required
    if v.bytes().all(|b| b.is_ascii_digit()) {
        return v.parse().with_context(|| format!("invalid size: {v}"));
    }
    if v.len() < 2 {
        bail!("size string too small: {v:?}");
    }
    let (number, suffix) = v.split_at(v.len() - 1);
    let magnitude: usize = match suffix.to_ascii_lowercase().as_str() {
        "b" => 1,
        "k" => 1024,
        "m" => 1024 * 1024,
        "g" => 1024 * 1024 * 1024,
        _ => bail!("invalid order of magnitude: {v}"),
    };
    let n: usize = number.trim().parse().with_context(|| format!("invalid size: {v}"))?;
    Ok(n * magnitude)
}

fn human_byte_size<'de, D: Deserializer<'de>>(deserializer: D) -> Result<usize, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Size {
        Number(usize),
        Text(String),
    }
    match Size::deserialize(deserializer)? {
        Size::Number(n) => Ok(n),
        Size::Text(s) => parse_byte_size(&s).map_err(serde::de::Error::custom),
    }
}
