//! Durability mode configuration
//!
//! Controls when appended log records are fsynced (Always, Standard).

/// Durability mode for log appends
///
/// # Modes
///
/// | Mode | fsync | Data Loss Window |
/// |------|-------|-----------------|
/// | Always | Every append | Zero |
/// | Standard | Periodic | Up to interval |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurabilityMode {
    /// fsync after every append (slow, maximum durability)
    Always,

    /// fsync on `flush` or once `interval_ms` has elapsed (the default)
    ///
    /// The owner of the log is expected to call `sync_if_overdue`
    /// periodically; records appended since the last sync may be lost on
    /// crash.
    Standard {
        /// Maximum time between fsyncs in milliseconds
        interval_ms: u64,
    },
}

impl DurabilityMode {
    /// Check if this mode requires immediate fsync on every append
    pub fn requires_immediate_fsync(&self) -> bool {
        matches!(self, DurabilityMode::Always)
    }

    /// Human-readable description of the mode
    pub fn description(&self) -> &'static str {
        match self {
            DurabilityMode::Always => "Always sync (safest, slowest)",
            DurabilityMode::Standard { .. } => "Standard (balanced speed/safety)",
        }
    }

    /// Create a standard mode with the recommended 100ms interval
    pub fn standard_default() -> Self {
        DurabilityMode::Standard { interval_ms: 100 }
    }
}

impl Default for DurabilityMode {
    fn default() -> Self {
        Self::standard_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_standard() {
        let mode = DurabilityMode::default();
        assert_eq!(mode, DurabilityMode::Standard { interval_ms: 100 });
        assert!(!mode.requires_immediate_fsync());
        assert!(DurabilityMode::Always.requires_immediate_fsync());
    }
}
