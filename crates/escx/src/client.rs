//! 📡 The HTTP side of the house: one shared client, one URL hygiene routine.
//!
//! Everything that talks to a cluster goes through a `reqwest::Client` built
//! here. One client, one connection pool, reused everywhere.

use std::time::Duration;

use anyhow::{Context, Result};

/// 🔧 Build the shared HTTP client.
///
/// 10 second connect timeout — if a cluster can't complete a handshake in 10
/// seconds it is not having a good day and neither are we. Deliberately NO
/// overall request timeout: force-merge blocks until the merge finishes and a
/// chunky bulk upload on a busy cluster can legitimately take minutes.
pub fn build() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
        .context("💀 The HTTP client refused to be born. Usually a TLS backend having feelings. Check the system cert store and try again.")
}

/// 🧹 Normalize a host string into something a URL joiner won't weep over.
///
/// Trailing `/` stripped (one slash of difference, infinite suffering of
/// difference), and `http://` prepended when no scheme was given, because
/// "es1:9200" is what everyone types and what nothing parses.
pub fn normalize_host(host: &str) -> String {
    let trimmed = host.trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    }
}
