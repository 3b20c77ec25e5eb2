//! Engine configuration.

use serde::{Deserialize, Serialize};

use crate::event_key::StartSignal;

/// Tunables for the comparison step.
///
/// Constructed by the caller and passed in explicitly; the engine keeps no
/// configuration of its own between runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Buckets whose weak-signal share exceeds this percentage are listed.
    pub weak_share_threshold_pct: f64,
    /// Signal whose share is measured.
    pub weak_share_role: StartSignal,
    /// Signal the share is measured against (together with the weak one).
    pub weak_share_reference_role: StartSignal,
    /// Tracking codes sampled per end key.
    pub sample_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            weak_share_threshold_pct: 1.0,
            weak_share_role: StartSignal::F10,
            weak_share_reference_role: StartSignal::E10,
            sample_size: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_fills_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"sample_size": 5}"#).unwrap();
        assert_eq!(config.sample_size, 5);
        assert_eq!(config.weak_share_role, StartSignal::F10);
        assert_eq!(config.weak_share_reference_role, StartSignal::E10);
    }

    #[test]
    fn unknown_signal_is_rejected() {
        let result: Result<EngineConfig, _> = serde_json::from_str(r#"{"weak_share_role": "Z1"}"#);
        assert!(result.is_err());
    }
}
