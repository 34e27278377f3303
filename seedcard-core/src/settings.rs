//! Tunables for the flash pipeline, loadable from a TOML file.
//!
//! ```toml
//! chunk_size = 1048576
//!
//! [settle]
//! timeout_ms = 30000
//! interval_ms = 250
//!
//! [root_hook]
//! on_missing = "boot-only"
//! ```

use seedcard_error::{SeedError, SeedResult, ValidationError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const MIN_CHUNK_SIZE: usize = 64 * 1024;
pub const MAX_CHUNK_SIZE: usize = 4 * 1024 * 1024;
pub const CHUNK_ALIGN: usize = 4096;

/// What to do when the root partition has no startup hook anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MissingHookPolicy {
    #[default]
    Fail,
    /// Write the boot partition anyway and tell the user what to run by hand.
    BootOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SettleSettings {
    pub timeout_ms: u64,
    pub interval_ms: u64,
}

impl Default for SettleSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 15_000,
            interval_ms: 100,
        }
    }
}

impl SettleSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RootHookSettings {
    pub on_missing: MissingHookPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct FlashSettings {
    pub chunk_size: usize,
    pub settle: SettleSettings,
    pub root_hook: RootHookSettings,
}

impl Default for FlashSettings {
    fn default() -> Self {
        Self {
            chunk_size: MIN_CHUNK_SIZE,
            settle: SettleSettings::default(),
            root_hook: RootHookSettings::default(),
        }
    }
}

impl FlashSettings {
    pub fn from_toml(text: &str) -> SeedResult<Self> {
        let settings: Self =
            toml::from_str(text).map_err(|e| SeedError::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load(path: &Path) -> SeedResult<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| SeedError::Config(format!("{}: {}", path.display(), e)))?;
        log::debug!("loaded settings from {}", path.display());
        Self::from_toml(&text)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&self.chunk_size)
            || self.chunk_size % CHUNK_ALIGN != 0
        {
            return Err(ValidationError::Option(format!(
                "chunk_size {} must be a multiple of {} between {} and {}",
                self.chunk_size, CHUNK_ALIGN, MIN_CHUNK_SIZE, MAX_CHUNK_SIZE
            )));
        }
        if self.settle.interval_ms == 0 {
            return Err(ValidationError::Option(
                "settle.interval_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
