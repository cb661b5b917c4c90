//! Scoring configuration and presets
//!
//! Coefficients come from the `Profile`; presets cover common tunings.

use serde::{Deserialize, Serialize};

use crate::scanner::Profile;

// =============================================================================
// Main Configuration
// =============================================================================

/// Coefficients for winner scoring and scene ranking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScoringConfig {
    /// Scales the per-kind priority weight. Default: 100
    pub priority_multiplier: f64,
    /// Penalty per byte between a match and the end of the text. Default: 1.0
    pub distance_penalty_weight: f64,
    /// Added to "active" kinds only. Default: 0
    pub detection_bias: f64,
    /// Flat bonus for active roster members. Default: 150
    pub roster_bonus: f64,
    /// Attenuates the roster bonus for strong kinds. Default: 0.5
    pub roster_priority_dropoff: f64,
    /// Scene ranking reward per mention. Default: 10
    pub mention_weight: f64,
    /// Kinds at or above this priority count as "active". Default: 3
    pub active_priority: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            priority_multiplier: 100.0,
            distance_penalty_weight: 1.0,
            detection_bias: 0.0,
            roster_bonus: 150.0,
            roster_priority_dropoff: 0.5,
            mention_weight: 10.0,
            active_priority: 3.0,
        }
    }
}

impl From<&Profile> for ScoringConfig {
    fn from(profile: &Profile) -> Self {
        Self {
            priority_multiplier: profile.priority_multiplier,
            distance_penalty_weight: profile.distance_penalty_weight,
            detection_bias: profile.detection_bias,
            roster_bonus: profile.roster_bonus,
            roster_priority_dropoff: profile.roster_priority_dropoff,
            ..Self::default()
        }
    }
}

impl ScoringConfig {
    /// Ignore scene membership entirely
    pub fn without_roster() -> Self {
        Self {
            roster_bonus: 0.0,
            ..Self::default()
        }
    }

    /// Roster bonus at full strength for every kind
    pub fn sticky_roster() -> Self {
        Self {
            roster_priority_dropoff: 0.0,
            ..Self::default()
        }
    }

    /// Position does not matter, only signal strength
    pub fn position_blind() -> Self {
        Self {
            distance_penalty_weight: 0.0,
            ..Self::default()
        }
    }

    pub fn is_active_priority(&self, priority: f64) -> bool {
        priority >= self.active_priority
    }

    /// Roster bonus for a member matched at `priority`; strong kinds get
    /// `max(0, 1 - dropoff * (priority - 2))` of it.
    pub fn roster_bonus_for(&self, priority: f64) -> f64 {
        if priority > 2.0 {
            let factor = (1.0 - self.roster_priority_dropoff * (priority - 2.0)).max(0.0);
            self.roster_bonus * factor
        } else {
            self.roster_bonus
        }
    }

    /// Bias term for `priority`
    pub fn bias_for(&self, priority: f64) -> f64 {
        if self.is_active_priority(priority) {
            self.detection_bias
        } else {
            0.0
        }
    }
}
