//! Winner selection and scene ranking
//!
//! Winner score per match:
//! ```text
//! priority * priorityMultiplier
//!   - distancePenaltyWeight * max(0, textLength - matchIndex)
//!   + detectionBias            (active kinds only)
//!   + rosterBonus(priority)    (active roster members only)
//! ```
//!
//! Scene ranking aggregates every match per character:
//! ```text
//! bestPriority * priorityMultiplier + count * mentionWeight
//!   - distancePenaltyWeight * distanceFromEnd  (+ bias, roster bonus)
//! ```
//! Ties: score desc, count desc, bestPriority desc, first offset asc,
//! name asc (case-insensitive).

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use crate::scanner::DetectionMatch;
use crate::scoring::config::ScoringConfig;

// =============================================================================
// Roster seam
// =============================================================================

/// Read-only view of who is currently in scene
pub trait RosterView {
    fn is_active(&self, name: &str) -> bool;
}

/// No roster: nobody is active
impl RosterView for () {
    fn is_active(&self, _name: &str) -> bool {
        false
    }
}

/// Lowercased names
impl RosterView for HashSet<String> {
    fn is_active(&self, name: &str) -> bool {
        self.contains(&name.trim().to_lowercase())
    }
}

// =============================================================================
// Types
// =============================================================================

/// Incremental filter: drop matches wholly before the boundary
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScoreFilter {
    pub min_index: Option<usize>,
    pub min_token_index: Option<usize>,
}

impl ScoreFilter {
    /// Compares end boundaries, so straddling matches survive
    pub fn keeps(&self, m: &DetectionMatch) -> bool {
        if let Some(min) = self.min_index {
            if m.char_end() <= min {
                return false;
            }
        }
        if let (Some(min), Some(start), Some(len)) = (self.min_token_index, m.token_start, m.token_len) {
            if start + len <= min {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredMatch {
    #[serde(flatten)]
    pub detection: DetectionMatch,
    pub score: f64,
    pub roster_member: bool,
}

/// One character's aggregate over a buffer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneEntry {
    pub name: String,
    pub count: usize,
    pub best_priority: f64,
    pub first_index: usize,
    pub last_index: usize,
    pub roster_member: bool,
    pub score: f64,
}

// =============================================================================
// Scorer
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct AttributionScorer {
    config: ScoringConfig,
}

impl AttributionScorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Score one match against a text of `text_len` bytes
    pub fn score(&self, m: &DetectionMatch, text_len: usize, roster: &dyn RosterView) -> ScoredMatch {
        let c = &self.config;
        let distance = text_len.saturating_sub(m.char_start) as f64;
        let member = roster.is_active(&m.name);

        let mut score = m.priority * c.priority_multiplier - c.distance_penalty_weight * distance;
        score += c.bias_for(m.priority);
        if member {
            score += c.roster_bonus_for(m.priority);
        }

        ScoredMatch {
            detection: m.clone(),
            score,
            roster_member: member,
        }
    }

    /// All kept matches, best first. Equal scores keep input order.
    pub fn rank(
        &self,
        matches: &[DetectionMatch],
        text_len: usize,
        roster: &dyn RosterView,
        filter: ScoreFilter,
    ) -> Vec<ScoredMatch> {
        let mut scored: Vec<ScoredMatch> = matches
            .iter()
            .filter(|m| filter.keeps(m))
            .map(|m| self.score(m, text_len, roster))
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored
    }

    pub fn winner(
        &self,
        matches: &[DetectionMatch],
        text_len: usize,
        roster: &dyn RosterView,
        filter: ScoreFilter,
    ) -> Option<ScoredMatch> {
        self.rank(matches, text_len, roster, filter).into_iter().next()
    }

    /// Every distinct character, best first, fully deterministic
    pub fn rank_scene(
        &self,
        matches: &[DetectionMatch],
        text_len: usize,
        roster: &dyn RosterView,
        filter: ScoreFilter,
    ) -> Vec<SceneEntry> {
        let mut by_key: HashMap<String, SceneEntry> = HashMap::new();

        for m in matches.iter().filter(|m| filter.keeps(m)) {
            let key = m.name.trim().to_lowercase();
            if key.is_empty() {
                continue;
            }
            let entry = by_key.entry(key).or_insert_with(|| SceneEntry {
                name: m.name.clone(),
                count: 0,
                best_priority: f64::MIN,
                first_index: m.char_start,
                last_index: m.char_start,
                roster_member: roster.is_active(&m.name),
                score: 0.0,
            });
            entry.count += 1;
            entry.best_priority = entry.best_priority.max(m.priority);
            entry.first_index = entry.first_index.min(m.char_start);
            entry.last_index = entry.last_index.max(m.char_start);
        }

        let c = &self.config;
        let mut entries: Vec<SceneEntry> = by_key
            .into_values()
            .map(|mut e| {
                let distance = text_len.saturating_sub(e.last_index) as f64;
                e.score = e.best_priority * c.priority_multiplier + e.count as f64 * c.mention_weight
                    - c.distance_penalty_weight * distance
                    + c.bias_for(e.best_priority);
                if e.roster_member {
                    e.score += c.roster_bonus_for(e.best_priority);
                }
                e
            })
            .collect();
        entries.sort_by(compare_scene);
        entries
    }
}

fn compare_scene(a: &SceneEntry, b: &SceneEntry) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.count.cmp(&a.count))
        .then_with(|| b.best_priority.total_cmp(&a.best_priority))
        .then_with(|| a.first_index.cmp(&b.first_index))
        .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
}

// =============================================================================
// Tests
// =============================================================================
