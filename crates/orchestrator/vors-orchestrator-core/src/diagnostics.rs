use serde::{Deserialize, Serialize};

/// Diagnostics configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsCfg {
    pub enabled: bool,
    /// Log every dirty range at debug level (noisy on long sequences).
    pub log_dirty_ranges: bool,
}

impl Default for DiagnosticsCfg {
    fn default() -> Self {
        DiagnosticsCfg {
            enabled: true,
            log_dirty_ranges: false,
        }
    }
}

/// Counters accumulated over the lifetime of a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    pub ticks: u64,
    pub keyframes: u64,
    /// `track` calls made after the last frame.
    pub noop_polls: u64,
    pub restarts: u64,
    pub visualizations: u64,
    pub commits: u64,
    pub reallocations: u64,
    pub rejected_commands: u64,
}
