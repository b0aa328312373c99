//! Explicit configuration threaded into `open` (REDESIGN FLAGS: no
//! process-wide singleton/factory).

use serde::{Deserialize, Serialize};

use crate::error::StoreResult;

/// Knobs shared by every layer, constructed by the caller and passed to
/// `open` rather than read from global state.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where the underlying [`StoreMap`](crate::store_map::StoreMap) lives.
    /// `"/"` selects the RAM-only mode (§4.2).
    pub location: String,

    /// Open the knowledge base read-only.
    pub read_only: bool,

    /// Threshold at which a slot's stored container is promoted from a
    /// List to a SetList representation (§4.3). Default 100.
    pub max_list_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            location: "/".to_string(),
            read_only: false,
            max_list_size: 100,
        }
    }
}

impl Config {
    pub fn ram() -> Self {
        Self::default()
    }

    pub fn read_only_at(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            read_only: true,
            ..Self::default()
        }
    }

    /// Loads a [`Config`] from a TOML file, falling back to defaults for
    /// any field the file omits.
    pub fn from_toml_file(path: impl AsRef<std::path::Path>) -> StoreResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&text)
            .map_err(|err| crate::error::StoreError::usage("config", err.to_string()))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_ram_mode() {
        let config = Config::default();
        assert_eq!(config.location, "/");
        assert!(!config.read_only);
        assert_eq!(config.max_list_size, 100);
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let config: Config = toml::from_str("read_only = true").unwrap();
        assert!(config.read_only);
        assert_eq!(config.location, "/");
        assert_eq!(config.max_list_size, 100);
    }
}
