//! Configuration loading and management.

use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use lz_core::EngineConfig;
use serde::{Deserialize, Serialize};

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the database file.
    pub database_path: PathBuf,
    /// Root of the query result cache.
    pub cache_dir: PathBuf,
    /// Reports are written to `<output_dir>/<shop>/<run_id>/`.
    pub output_dir: PathBuf,
    /// Country the reports are restricted to.
    pub country_code: String,
    /// Default lookback window.
    pub timeframe_months: u32,
    #[serde(default)]
    pub engine: EngineConfig,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs_data_path().unwrap_or_else(|| PathBuf::from("."));
        let cache_dir = dirs_cache_path().unwrap_or_else(|| PathBuf::from("cache"));
        Self {
            database_path: data_dir.join("lz.db"),
            cache_dir,
            output_dir: PathBuf::from("output"),
            country_code: "DE".to_string(),
            timeframe_months: 6,
            engine: EngineConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration, optionally from a specific file.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(config_dir) = dirs_config_path() {
            figment = figment.merge(Toml::file(config_dir.join("config.toml")));
        }

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // LZ_*, with `__` separating nested keys (LZ_ENGINE__SAMPLE_SIZE)
        figment = figment.merge(Env::prefixed("LZ_").split("__"));

        figment.extract()
    }
}

/// Returns the platform-specific config directory for lz.
fn dirs_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("lz"))
}

/// Returns the platform-specific data directory for lz.
///
/// On Linux: `~/.local/share/lz`
pub fn dirs_data_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("lz"))
}

/// On Linux: `~/.cache/lz`
pub fn dirs_cache_path() -> Option<PathBuf> {
    dirs::cache_dir().map(|p| p.join("lz"))
}
