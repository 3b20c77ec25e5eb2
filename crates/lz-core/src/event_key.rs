//! Carrier event keys and their semantic roles.
//!
//! This is the single source of truth for which raw event keys start the
//! delivery clock, which ones stop it, and which ones may stand in for a
//! delayed stop signal.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::types::ValidationError;

/// Phase key marking a delivery-completion event.
pub const COMPLETION_PHASE: &str = "H";

/// Event key recorded for completion events that carry no key of their own.
pub const UNKNOWN_COMPLETION_KEY: &str = "H_UNKNOWN";

/// Event keys that may substitute for a delayed completion event.
pub const PROXY_COMPLETION_KEYS: [&str; 4] = ["G30", "G31", "G32", "G33"];

/// Completion keys known to lag behind the actual handover.
pub const PROXYABLE_COMPLETION_KEYS: [&str; 4] = ["H20", "H21", "H22", "H23"];

/// Leitzone audited in the fixed deep-dive section of the comparison.
pub const DEEP_DIVE_LEITZONE: &str = "94";

/// Start-of-transit signals, in enumeration (and tie-break) order.
///
/// `E10` is the strongest signal and the only one the baseline method uses.
/// `F10` is weak: it is only trusted when it precedes every other signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StartSignal {
    E10,
    E11,
    G11,
    F10,
}

impl StartSignal {
    /// All signals in enumeration order.
    pub const ALL: [Self; 4] = [Self::E10, Self::E11, Self::G11, Self::F10];

    /// The signal the baseline method measures from.
    pub const BASELINE: Self = Self::E10;

    /// Key as it appears in the event log.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::E10 => "E10",
            Self::E11 => "E11",
            Self::G11 => "G11",
            Self::F10 => "F10",
        }
    }

    #[must_use]
    pub const fn is_weak(&self) -> bool {
        matches!(self, Self::F10)
    }
}

impl fmt::Display for StartSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for StartSignal {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "E10" => Ok(Self::E10),
            "E11" => Ok(Self::E11),
            "G11" => Ok(Self::G11),
            "F10" => Ok(Self::F10),
            _ => Err(ValidationError::UnknownStartSignal {
                value: s.to_string(),
            }),
        }
    }
}

impl Serialize for StartSignal {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for StartSignal {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Semantic role of a raw event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventRole {
    Start(StartSignal),
    ProxyCompletion(String),
    Completion(String),
}

/// Classifies an event by key and phase.
///
/// Start keys win over proxy keys, which win over the completion phase.
/// Returns `None` for events that play no role.
pub fn classify(event_key: Option<&str>, phase_key: Option<&str>) -> Option<EventRole> {
    if let Some(key) = event_key {
        if let Ok(signal) = key.parse::<StartSignal>() {
            return Some(EventRole::Start(signal));
        }
        if is_proxy_completion_key(key) {
            return Some(EventRole::ProxyCompletion(key.to_string()));
        }
    }
    if phase_key == Some(COMPLETION_PHASE) {
        let key = event_key
            .filter(|k| !k.is_empty())
            .unwrap_or(UNKNOWN_COMPLETION_KEY);
        return Some(EventRole::Completion(key.to_string()));
    }
    None
}

#[must_use]
pub fn is_proxy_completion_key(key: &str) -> bool {
    PROXY_COMPLETION_KEYS.contains(&key)
}

#[must_use]
pub fn is_proxyable_completion_key(key: &str) -> bool {
    PROXYABLE_COMPLETION_KEYS.contains(&key)
}
