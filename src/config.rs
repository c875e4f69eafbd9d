//! Engine configuration
//!
//! Knobs for the stateful detection engine. Same pattern as every other
//! subsystem config: serde-derived struct with a hand-written `Default`.

use serde::{Deserialize, Serialize};

/// Configuration for stateful detection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectConfig {
    /// Enable stateful (continuation) detection
    pub enabled: bool,

    /// Maximum alerts queued per packet; further alerts are dropped
    pub max_alerts_per_packet: usize,

    /// Track file-interested signatures and disable file storage when
    /// none of them can match anymore
    pub filestore_enabled: bool,
}

impl Default for DetectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_alerts_per_packet: 15,
            filestore_enabled: true,
        }
    }
}
