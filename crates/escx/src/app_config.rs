//! 🔧 App Configuration — the sacred TOML-to-struct pipeline.
//!
//! 📡 "Config not found: We looked everywhere. Under the couch. Behind the
//! fridge. In the junk drawer. Nothing." — every operator at 3am 🦆
//!
//! 🏗️ Powered by Figment, because manually parsing env vars is a form of
//! self-harm that even the borrow checker wouldn't approve of.

use std::path::Path;

use anyhow::Context;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;
use tracing::info;

use crate::jobs::validate::ValidateConfig;
use crate::jobs::{DestConfig, SourceConfig};

/// 📦 The AppConfig: one struct to rule them all, one struct to find them,
/// one struct to bring them all, and in the Figment bind them.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// 🚰 where documents come from
    pub source: SourceConfig,
    /// 🚛 where documents go, and how
    pub destination: DestConfig,
    /// 🔎 validation knobs — optional, defaults are sane
    #[serde(default)]
    pub validate: ValidateConfig,
}

/// 🚀 Load the config — env vars, an optional TOML file, or the sheer power of hoping.
///
/// 🔧 Merges `ESCX_`-prefixed environment variables with an optional TOML
/// file; `__` in an env name descends into sections, so
/// `ESCX_SOURCE__HOST=es1:9200` lands in `[source] host`. TOML wins conflicts.
///
/// 📐 DESIGN NOTE (tribal knowledge, do not lose):
///   - `config_file` is None → env vars only. No file. No assumptions.
///   - `config_file` is Some → env vars + TOML, merged.
///   Nobody gets a silently-assumed default file path at this layer; the CLI
///   decides what "default" means and owns the existence check.
///
/// 💀 Returns an error if the config is unparseable. The error message names
/// the file AND the prefix, because "error: error" is a Kafka novel, not a
/// diagnostic. (The author, not the queue.)
pub fn load_config(config_file: Option<&Path>) -> anyhow::Result<AppConfig> {
    info!("🔧 Loading configuration: {:#?}", config_file.unwrap_or(Path::new("")));

    let config = Figment::new().merge(Env::prefixed("ESCX_").split("__"));
    let config = match config_file {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    let context_msg = match config_file {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables (ESCX_*). \
             The file exists in our hearts, but apparently its contents do not parse.",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (ESCX_*). \
                 No file was provided — this one's all on the environment. Classic."
            .to_string(),
    };

    config.extract().context(context_msg)
}
