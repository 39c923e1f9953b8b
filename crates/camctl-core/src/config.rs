//! Controller configuration
//!
//! Loaded from JSON. Every field is optional; missing fields take the
//! defaults below.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::protocol::{LinkConfig, ProtocolError};

fn default_visca_address() -> u8 {
    1
}

/// Settings for one controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Serial link timing
    pub link: LinkConfig,

    /// Terminator override for the byte-terminated dialects (`canon`, `visca`).
    /// Firmware revisions disagree on `0xFF` versus `0xEF`.
    pub terminator: Option<u8>,

    /// Camera address for the `visca` dialect, 1..=7
    #[serde(default = "default_visca_address")]
    pub visca_address: u8,

    /// Speed table digit sent with Panasonic absolute moves, 0..=2
    pub pana_speed_table: u8,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            link: LinkConfig::default(),
            terminator: None,
            visca_address: default_visca_address(),
            pana_speed_table: 0,
        }
    }
}

impl ControllerConfig {
    /// Load from a JSON file and validate
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ProtocolError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let config: ControllerConfig = serde_json::from_str(&content)
            .map_err(|e| ProtocolError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save as pretty-printed JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ProtocolError> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ProtocolError::Config(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Reject values no camera can work with
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if !(1..=7).contains(&self.visca_address) {
            return Err(ProtocolError::Config(format!(
                "visca_address {} out of range 1..=7",
                self.visca_address
            )));
        }
        if self.pana_speed_table > 2 {
            return Err(ProtocolError::Config(format!(
                "pana_speed_table {} out of range 0..=2",
                self.pana_speed_table
            )));
        }
        if self.link.baud_rate == 0 {
            return Err(ProtocolError::Config("baud_rate must be non-zero".to_string()));
        }
        if self.link.reply_timeout_ms == 0 || self.link.completion_timeout_ms == 0 {
            return Err(ProtocolError::Config("timeouts must be non-zero".to_string()));
        }
        Ok(())
    }
}
