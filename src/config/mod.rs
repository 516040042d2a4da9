use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAME: &str = "config.toml";
const DEFAULT_LOG_FILTER: &str = "offmail=info";

/// Application-wide defaults. Read from an optional `config.toml` in the data
/// directory, then overridden by env vars. The persisted offline toggle in the
/// store takes precedence over `offline` once the user has flipped it.
#[derive(Debug, Clone)]
pub struct AppDefaults {
    pub data_dir: Option<PathBuf>,
    pub offline: bool,
    pub log_filter: String,
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    data_dir: Option<PathBuf>,
    offline: Option<bool>,
    log_filter: Option<String>,
}

impl AppDefaults {
    pub fn load() -> Result<Self> {
        let data_dir = env::var("OFFMAIL_DATA_DIR").ok().map(PathBuf::from);
        let file = match config_file_path(data_dir.as_deref()) {
            Some(path) if path.exists() => read_file_config(&path)?,
            _ => FileConfig::default(),
        };

        let offline = env::var("OFFMAIL_OFFLINE")
            .ok()
            .map(|s| parse_flag(&s))
            .or(file.offline)
            .unwrap_or(false);
        let log_filter = env::var("OFFMAIL_LOG")
            .ok()
            .or(file.log_filter)
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

        Ok(Self {
            data_dir: data_dir.or(file.data_dir),
            offline,
            log_filter,
        })
    }
}

pub fn parse_flag(raw: &str) -> bool {
    raw == "1" || raw.eq_ignore_ascii_case("true") || raw.eq_ignore_ascii_case("on")
}

fn config_file_path(data_dir: Option<&Path>) -> Option<PathBuf> {
    match data_dir {
        Some(dir) => Some(dir.join(CONFIG_FILE_NAME)),
        None => dirs::home_dir().map(|home| home.join(".offmail").join(CONFIG_FILE_NAME)),
    }
}

fn read_file_config(path: &Path) -> Result<FileConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))
}
