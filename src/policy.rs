//! Policy engine — maps a sensitivity score to a routing action.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default score above which a message is quarantined.
pub const DEFAULT_QUARANTINE_AT: f64 = 0.5;

/// Default score above which a message is discarded with an alert.
pub const DEFAULT_DISCARD_AT: f64 = 0.8;

/// Routing action chosen for a message.
///
/// Serialized with the wire names used by the classifier service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    #[serde(rename = "Send Normally")]
    Deliver,
    #[serde(rename = "Quarantine for Review")]
    Quarantine,
    #[serde(rename = "Trash & Alert Security")]
    Discard,
}

impl Action {
    /// Wire name as sent in the classifier contract.
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::Deliver => "Send Normally",
            Self::Quarantine => "Quarantine for Review",
            Self::Discard => "Trash & Alert Security",
        }
    }

    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Deliver => "deliver",
            Self::Quarantine => "quarantine",
            Self::Discard => "discard",
        }
    }

    /// Parse either the wire name or the short label (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        [Self::Deliver, Self::Quarantine, Self::Discard]
            .into_iter()
            .find(|a| a.wire_name().eq_ignore_ascii_case(s) || a.label().eq_ignore_ascii_case(s))
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Score thresholds for the policy engine.
///
/// Invariant: `quarantine_at < discard_at`, enforced by [`PolicyThresholds::new`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolicyThresholds {
    quarantine_at: f64,
    discard_at: f64,
}

impl PolicyThresholds {
    /// Build thresholds, rejecting non-finite or inverted values.
    pub fn new(quarantine_at: f64, discard_at: f64) -> Result<Self, ConfigError> {
        if !quarantine_at.is_finite() || !discard_at.is_finite() || quarantine_at >= discard_at {
            return Err(ConfigError::InvertedThresholds {
                quarantine_at,
                discard_at,
            });
        }
        Ok(Self {
            quarantine_at,
            discard_at,
        })
    }

    pub fn quarantine_at(&self) -> f64 {
        self.quarantine_at
    }

    pub fn discard_at(&self) -> f64 {
        self.discard_at
    }

    /// Policy version string reported alongside every classification.
    pub fn version(&self) -> String {
        format!("v1-thresholds-{}-{}", self.quarantine_at, self.discard_at)
    }

    /// Map a score to an action. Boundary values belong to the lower action.
    pub fn decide(&self, score: f64) -> Action {
        decide(score, self)
    }
}

impl Default for PolicyThresholds {
    fn default() -> Self {
        Self {
            quarantine_at: DEFAULT_QUARANTINE_AT,
            discard_at: DEFAULT_DISCARD_AT,
        }
    }
}

/// Map a sensitivity score to an action.
///
/// `score <= quarantine_at` delivers, `score <= discard_at` quarantines,
/// anything higher (or NaN) discards.
pub fn decide(score: f64, thresholds: &PolicyThresholds) -> Action {
    if score <= thresholds.quarantine_at {
        Action::Deliver
    } else if score <= thresholds.discard_at {
        Action::Quarantine
    } else {
        Action::Discard
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_thresholds_bands() {
        let t = PolicyThresholds::default();
        assert_eq!(t.decide(0.0), Action::Deliver);
        assert_eq!(t.decide(0.3), Action::Deliver);
        assert_eq!(t.decide(0.51), Action::Quarantine);
        assert_eq!(t.decide(0.79), Action::Quarantine);
        assert_eq!(t.decide(0.81), Action::Discard);
        assert_eq!(t.decide(1.0), Action::Discard);
    }

    #[test]
    fn boundaries_belong_to_lower_action() {
        let t = PolicyThresholds::default();
        assert_eq!(t.decide(0.5), Action::Deliver);
        assert_eq!(t.decide(0.8), Action::Quarantine);
    }

    #[test]
    fn nan_score_discards() {
        assert_eq!(PolicyThresholds::default().decide(f64::NAN), Action::Discard);
    }

    #[test]
    fn custom_thresholds() {
        let t = PolicyThresholds::new(0.2, 0.4).unwrap();
        assert_eq!(t.decide(0.2), Action::Deliver);
        assert_eq!(t.decide(0.3), Action::Quarantine);
        assert_eq!(t.decide(0.41), Action::Discard);
    }

    #[test]
    fn inverted_thresholds_rejected() {
        assert!(PolicyThresholds::new(0.8, 0.5).is_err());
        assert!(PolicyThresholds::new(0.5, 0.5).is_err());
        assert!(PolicyThresholds::new(f64::NAN, 0.5).is_err());
    }

    #[test]
    fn sweep_is_monotonic() {
        let t = PolicyThresholds::default();
        let mut last = Action::Deliver;
        for i in 0..=1000 {
            let action = t.decide(f64::from(i) / 1000.0);
            let rank = |a: Action| a as u8;
            assert!(rank(action) >= rank(last));
            last = action;
        }
        assert_eq!(last, Action::Discard);
    }

    #[test]
    fn version_string() {
        assert_eq!(PolicyThresholds::default().version(), "v1-thresholds-0.5-0.8");
    }

    // ── Action names ────────────────────────────────────────────────

    #[test]
    fn action_wire_names_roundtrip_through_serde() {
        let json = serde_json::to_string(&Action::Discard).unwrap();
        assert_eq!(json, "\"Trash & Alert Security\"");
        let parsed: Action = serde_json::from_str("\"Quarantine for Review\"").unwrap();
        assert_eq!(parsed, Action::Quarantine);
    }

    #[test]
    fn action_parse_accepts_labels_and_wire_names() {
        assert_eq!(Action::parse("Send Normally"), Some(Action::Deliver));
        assert_eq!(Action::parse("quarantine"), Some(Action::Quarantine));
        assert_eq!(Action::parse(" DISCARD "), Some(Action::Discard));
        assert_eq!(Action::parse("bounce"), None);
    }
}
