//! Parameter-file configuration for the sync core.
//!
//! Loaded from TOML, matching this codebase's other parameter-file types.
//! Mode (`Off`/`Leader`/`Follower`) is deliberately not part of this struct:
//! it is set at runtime via [`crate::control::SyncController::switch_mode`],
//! not read from a file.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

fn default_group() -> String {
    "239.255.255.250".to_string()
}

fn default_port() -> u16 {
    10000
}

fn default_sync_period() -> u32 {
    30
}

fn default_ready_frame() -> u32 {
    1000
}

fn default_line_fitting() -> u32 {
    100
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    /// IPv4 multicast group the leader sends beacons to and followers join.
    #[serde(default = "default_group")]
    pub group: String,

    /// UDP port shared by leader and followers.
    #[serde(default = "default_port")]
    pub port: u16,

    /// `P`: frames between beacons, also the slope-extrapolation horizon.
    #[serde(default = "default_sync_period")]
    pub sync_period: u32,

    /// Leader-chosen countdown value at which `sync_ready` should latch.
    #[serde(default = "default_ready_frame")]
    pub ready_frame: u32,

    /// `L`: window capacity shared by the clock model and error tracker.
    #[serde(default = "default_line_fitting")]
    pub line_fitting: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            group: default_group(),
            port: default_port(),
            sync_period: default_sync_period(),
            ready_frame: default_ready_frame(),
            line_fitting: default_line_fitting(),
        }
    }
}

impl SyncConfig {
    pub fn from_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(SyncError::from)
    }

    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_str(&raw)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(SyncError::from)
    }
}
