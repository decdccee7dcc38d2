use std::env;
use std::path::PathBuf;

use tracing::warn;

use crate::attachments::DEFAULT_THUMBNAIL_EDGE;

pub const DATA_DIR_ENV: &str = "SHIFTBOOK_DATA_DIR";
pub const LOG_ENV: &str = "SHIFTBOOK_LOG";
pub const THUMBNAIL_EDGE_ENV: &str = "SHIFTBOOK_THUMBNAIL_EDGE";

pub const DEFAULT_LOG_FILTER: &str = "shiftbook=info";
const APP_DIR_NAME: &str = "shiftbook";
const MIN_THUMBNAIL_EDGE: u32 = 64;
const MAX_THUMBNAIL_EDGE: u32 = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub log_filter: String,
    pub thumbnail_edge: u32,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Resolve settings through `lookup` so tests need not touch the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let data_dir = match lookup(DATA_DIR_ENV).filter(|v| !v.trim().is_empty()) {
            Some(dir) => PathBuf::from(dir),
            None => default_data_dir()?,
        };
        let log_filter = lookup(LOG_ENV)
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());
        let thumbnail_edge = lookup(THUMBNAIL_EDGE_ENV)
            .map(|raw| parse_thumbnail_edge(&raw))
            .unwrap_or(DEFAULT_THUMBNAIL_EDGE);

        Ok(Self {
            data_dir,
            log_filter,
            thumbnail_edge,
        })
    }
}

fn default_data_dir() -> anyhow::Result<PathBuf> {
    let base = match dirs::data_dir() {
        Some(dir) => dir,
        None => env::current_dir()?,
    };
    Ok(base.join(APP_DIR_NAME))
}

fn parse_thumbnail_edge(raw: &str) -> u32 {
    match raw.trim().parse::<u32>() {
        Ok(edge) => edge.clamp(MIN_THUMBNAIL_EDGE, MAX_THUMBNAIL_EDGE),
        Err(_) => {
            warn!(
                target: "shiftbook",
                event = "config_invalid_thumbnail_edge",
                value = %raw
            );
            DEFAULT_THUMBNAIL_EDGE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn explicit_values_win() {
        let config = AppConfig::from_lookup(lookup(&[
            (DATA_DIR_ENV, "/tmp/shiftbook-test"),
            (LOG_ENV, "shiftbook=debug"),
            (THUMBNAIL_EDGE_ENV, "512"),
        ]))
        .unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/shiftbook-test"));
        assert_eq!(config.log_filter, "shiftbook=debug");
        assert_eq!(config.thumbnail_edge, 512);
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert!(config.data_dir.ends_with(APP_DIR_NAME));
        assert_eq!(config.log_filter, DEFAULT_LOG_FILTER);
        assert_eq!(config.thumbnail_edge, DEFAULT_THUMBNAIL_EDGE);
    }

    #[test]
    fn thumbnail_edge_is_clamped_or_defaulted() {
        assert_eq!(parse_thumbnail_edge("8"), MIN_THUMBNAIL_EDGE);
        assert_eq!(parse_thumbnail_edge("99999"), MAX_THUMBNAIL_EDGE);
        assert_eq!(parse_thumbnail_edge("big"), DEFAULT_THUMBNAIL_EDGE);
    }
}
