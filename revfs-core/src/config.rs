//! Reader configuration
//!
//! Tunables for one opened store, loaded from `revfs.json` in the store
//! directory when present.

use crate::error::{FsError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Name of the optional config file inside a store directory
pub const CONFIG_FILE: &str = "revfs.json";

/// Settings for a single cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Maximum number of entries
    pub capacity: usize,
}

impl CacheSettings {
    pub fn new(capacity: usize) -> Self {
        Self {
            enabled: true,
            capacity,
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            capacity: 0,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Settings for all caches of a store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub rep_header: CacheSettings,
    pub txdelta_window: CacheSettings,
    pub combined_window: CacheSettings,
    pub fulltext: CacheSettings,
    /// Larger fulltexts are not cached
    pub fulltext_max_item_size: u64,
    pub node_revision: CacheSettings,
    pub dir: CacheSettings,
    pub properties: CacheSettings,
    pub changes: CacheSettings,
    pub rev_root_id: CacheSettings,
    pub packed_offset: CacheSettings,
}

impl CacheConfig {
    /// Every cache switched off
    pub fn disabled() -> Self {
        let off = CacheSettings::disabled();
        Self {
            rep_header: off,
            txdelta_window: off,
            combined_window: off,
            fulltext: off,
            fulltext_max_item_size: 0,
            node_revision: off,
            dir: off,
            properties: off,
            changes: off,
            rev_root_id: off,
            packed_offset: off,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            rep_header: CacheSettings::new(4096),
            txdelta_window: CacheSettings::new(1024),
            combined_window: CacheSettings::new(256),
            fulltext: CacheSettings::new(512),
            fulltext_max_item_size: 1024 * 1024,
            node_revision: CacheSettings::new(4096),
            dir: CacheSettings::new(1024),
            properties: CacheSettings::new(1024),
            changes: CacheSettings::new(64),
            rev_root_id: CacheSettings::new(1024),
            packed_offset: CacheSettings::new(32),
        }
    }
}

/// Configuration for reading a store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FsConfig {
    pub caches: CacheConfig,
    /// Links walked by the chain-length probe before dropping its file hint
    pub chain_hint_recycle_interval: usize,
    /// Longer delta chains are reported as corruption
    pub max_chain_length: usize,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            caches: CacheConfig::default(),
            chain_hint_recycle_interval: 16,
            max_chain_length: 10_000,
        }
    }
}

impl FsConfig {
    /// Load the configuration of a store, or the defaults if it has none.
    pub fn load(store_path: &Path) -> Result<Self> {
        let config_path = store_path.join(CONFIG_FILE);
        if !config_path.exists() {
            return Ok(Self::default());
        }
        let data = fs::read_to_string(&config_path)?;
        let config: FsConfig = serde_json::from_str(&data).map_err(|e| {
            FsError::Config(format!("Failed to parse {}: {}", config_path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save the configuration into a store directory.
    pub fn save(&self, store_path: &Path) -> Result<()> {
        let config_path = store_path.join(CONFIG_FILE);
        let tmp_path = config_path.with_extension("tmp");
        let data = serde_json::to_string_pretty(self)
            .map_err(|e| FsError::Config(e.to_string()))?;
        fs::write(&tmp_path, &data)?;
        fs::rename(&tmp_path, &config_path)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.chain_hint_recycle_interval == 0 {
            return Err(FsError::Config(
                "chain_hint_recycle_interval must be positive".to_string(),
            ));
        }
        if self.max_chain_length == 0 {
            return Err(FsError::Config("max_chain_length must be positive".to_string()));
        }
        Ok(())
    }
}
