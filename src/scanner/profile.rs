//! Profile: roster + vocabulary configuration
//!
//! A `Profile` is the single configuration unit the engine borrows per call.
//! Shapes accepted from hosts are loose (bare strings or objects, several
//! spellings for the avatar folder); `Profile::normalized` folds them into one
//! canonical form so nothing downstream needs fallbacks.

use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};

use crate::error::EngineError;
use crate::scanner::fuzzy::FuzzyTolerance;

// =============================================================================
// Match Kinds
// =============================================================================

/// Detection strategy, each with its own template and priority weight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchKind {
    Speaker,
    Attribution,
    Action,
    Vocative,
    Possessive,
    Pronoun,
    Name,
    Veto,
}

impl MatchKind {
    pub const ALL: [MatchKind; 8] = [
        MatchKind::Speaker,
        MatchKind::Attribution,
        MatchKind::Action,
        MatchKind::Vocative,
        MatchKind::Possessive,
        MatchKind::Pronoun,
        MatchKind::Name,
        MatchKind::Veto,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MatchKind::Speaker => "speaker",
            MatchKind::Attribution => "attribution",
            MatchKind::Action => "action",
            MatchKind::Vocative => "vocative",
            MatchKind::Possessive => "possessive",
            MatchKind::Pronoun => "pronoun",
            MatchKind::Name => "name",
            MatchKind::Veto => "veto",
        }
    }

    /// Kinds whose template carries a roster-name capture
    pub fn is_name_bearing(self) -> bool {
        !matches!(self, MatchKind::Pronoun | MatchKind::Veto)
    }

    /// Narration cues: suppressed when they start inside a quoted span
    pub fn is_narration_only(self) -> bool {
        matches!(
            self,
            MatchKind::Attribution
                | MatchKind::Action
                | MatchKind::Possessive
                | MatchKind::Name
                | MatchKind::Pronoun
        )
    }
}

// =============================================================================
// Identities
// =============================================================================

/// Roster entry as hosts send it: either `"Name"` or a detailed object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IdentitySource {
    Name(String),
    Detailed {
        name: String,
        #[serde(default)]
        aliases: Vec<String>,
        #[serde(default)]
        folder: Option<String>,
        #[serde(default)]
        path: Option<String>,
        #[serde(default)]
        directory: Option<String>,
    },
}

impl From<&str> for IdentitySource {
    fn from(name: &str) -> Self {
        IdentitySource::Name(name.to_string())
    }
}

/// Canonical character identity after normalization
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CharacterIdentity {
    pub name: String,
    pub aliases: Vec<String>,
    pub folder: Option<String>,
}

impl IdentitySource {
    /// Resolve the loose shape once. Folder sources are tried in order:
    /// `folder`, `path`, `directory`; the first non-blank wins.
    pub fn normalize(&self) -> Option<CharacterIdentity> {
        match self {
            IdentitySource::Name(name) => {
                let name = name.trim();
                (!name.is_empty()).then(|| CharacterIdentity {
                    name: name.to_string(),
                    aliases: Vec::new(),
                    folder: None,
                })
            }
            IdentitySource::Detailed {
                name,
                aliases,
                folder,
                path,
                directory,
            } => {
                let name = name.trim();
                if name.is_empty() {
                    return None;
                }
                let folder = [folder, path, directory]
                    .into_iter()
                    .flatten()
                    .map(|f| f.trim())
                    .find(|f| !f.is_empty())
                    .map(str::to_string);
                let aliases = dedupe_vocabulary(aliases)
                    .into_iter()
                    .filter(|a| !a.eq_ignore_ascii_case(name))
                    .collect();
                Some(CharacterIdentity {
                    name: name.to_string(),
                    aliases,
                    folder,
                })
            }
        }
    }
}

// =============================================================================
// Flags and Weights
// =============================================================================

/// Per-kind enable flags. `general` gates the bare `name` kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DetectionFlags {
    pub speaker: bool,
    pub attribution: bool,
    pub action: bool,
    pub vocative: bool,
    pub possessive: bool,
    pub pronoun: bool,
    pub general: bool,
}

impl Default for DetectionFlags {
    fn default() -> Self {
        Self {
            speaker: true,
            attribution: true,
            action: true,
            vocative: true,
            possessive: true,
            pronoun: true,
            general: false,
        }
    }
}

impl DetectionFlags {
    pub fn enabled(&self, kind: MatchKind) -> bool {
        match kind {
            MatchKind::Speaker => self.speaker,
            MatchKind::Attribution => self.attribution,
            MatchKind::Action => self.action,
            MatchKind::Vocative => self.vocative,
            MatchKind::Possessive => self.possessive,
            MatchKind::Pronoun => self.pronoun,
            MatchKind::Name => self.general,
            MatchKind::Veto => true,
        }
    }
}

/// Priority weight per match kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PriorityWeights {
    pub speaker: f64,
    pub attribution: f64,
    pub action: f64,
    pub pronoun: f64,
    pub vocative: f64,
    pub possessive: f64,
    pub name: f64,
}

impl Default for PriorityWeights {
    fn default() -> Self {
        Self {
            speaker: 5.0,
            attribution: 4.0,
            action: 3.0,
            pronoun: 3.0,
            vocative: 2.0,
            possessive: 1.0,
            name: 0.0,
        }
    }
}

impl PriorityWeights {
    pub fn get(&self, kind: MatchKind) -> f64 {
        match kind {
            MatchKind::Speaker => self.speaker,
            MatchKind::Attribution => self.attribution,
            MatchKind::Action => self.action,
            MatchKind::Pronoun => self.pronoun,
            MatchKind::Vocative => self.vocative,
            MatchKind::Possessive => self.possessive,
            MatchKind::Name => self.name,
            MatchKind::Veto => 0.0,
        }
    }

    pub fn set(&mut self, kind: MatchKind, value: f64) {
        let value = value.max(0.0);
        match kind {
            MatchKind::Speaker => self.speaker = value,
            MatchKind::Attribution => self.attribution = value,
            MatchKind::Action => self.action = value,
            MatchKind::Pronoun => self.pronoun = value,
            MatchKind::Vocative => self.vocative = value,
            MatchKind::Possessive => self.possessive = value,
            MatchKind::Name => self.name = value,
            MatchKind::Veto => {}
        }
    }

    /// Copy with per-call overrides applied on top
    pub fn with_overrides(&self, overrides: &HashMap<MatchKind, f64>) -> Self {
        let mut merged = self.clone();
        for (kind, value) in overrides {
            merged.set(*kind, *value);
        }
        merged
    }
}

// =============================================================================
// Profile
// =============================================================================

const DEFAULT_ATTRIBUTION_VERBS: &[&str] = &[
    "said", "says", "asked", "asks", "replied", "replies", "answered", "whispered",
    "shouted", "yelled", "murmured", "muttered", "called", "cried", "exclaimed",
    "added", "continued", "explained", "snapped", "sighed", "responded", "admitted",
    "insisted", "laughed", "chuckled", "giggled", "hissed", "growled", "teased",
];

const DEFAULT_ACTION_VERBS: &[&str] = &[
    "walked", "walks", "stepped", "steps", "turned", "turns", "smiled", "smiles",
    "nodded", "nods", "looked", "looks", "glanced", "reached", "reaches", "grabbed",
    "moved", "stood", "sat", "leaned", "shrugged", "frowned", "grinned", "raised",
    "pulled", "pushed", "ran", "took", "held", "crossed", "tilted", "paused",
    "blinked", "sighed", "laughed", "watched", "waved", "knelt", "jumped",
];

const DEFAULT_PRONOUNS: &[&str] = &["he", "she", "they"];

fn words(list: &[&str]) -> Vec<String> {
    list.iter().map(|w| w.to_string()).collect()
}

/// Roster + vocabulary configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Profile {
    pub patterns: Vec<IdentitySource>,
    pub ignore_patterns: Vec<String>,
    pub attribution_verbs: Vec<String>,
    pub action_verbs: Vec<String>,
    pub pronoun_vocabulary: Vec<String>,
    pub veto_patterns: Vec<String>,
    pub detection: DetectionFlags,
    pub priority_weights: PriorityWeights,
    pub priority_multiplier: f64,
    pub distance_penalty_weight: f64,
    pub detection_bias: f64,
    pub roster_bonus: f64,
    pub roster_priority_dropoff: f64,
    /// Turns a member stays active without being mentioned; `None` = forever
    pub scene_roster_ttl: Option<u32>,
    pub fuzzy_tolerance: FuzzyTolerance,
    pub fuzzy_scan_lowercase: bool,
    /// Rescues allowed per identical raw fuzzy surface form within one scan
    pub fuzzy_repeat_limit: usize,
    pub scan_dialogue_actions: bool,
    pub global_cooldown_ms: i64,
    pub decision_log_capacity: usize,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            patterns: Vec::new(),
            ignore_patterns: Vec::new(),
            attribution_verbs: words(DEFAULT_ATTRIBUTION_VERBS),
            action_verbs: words(DEFAULT_ACTION_VERBS),
            pronoun_vocabulary: words(DEFAULT_PRONOUNS),
            veto_patterns: vec!["OOC:".to_string(), "(OOC".to_string()],
            detection: DetectionFlags::default(),
            priority_weights: PriorityWeights::default(),
            priority_multiplier: 100.0,
            distance_penalty_weight: 1.0,
            detection_bias: 0.0,
            roster_bonus: 150.0,
            roster_priority_dropoff: 0.5,
            scene_roster_ttl: Some(5),
            fuzzy_tolerance: FuzzyTolerance::Off,
            fuzzy_scan_lowercase: false,
            fuzzy_repeat_limit: 1,
            scan_dialogue_actions: false,
            global_cooldown_ms: 0,
            decision_log_capacity: 25,
        }
    }
}

impl Profile {
    /// Profile with the given roster names and default vocabulary
    pub fn with_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            patterns: names
                .into_iter()
                .map(|n| IdentitySource::from(n.as_ref()))
                .collect(),
            ..Self::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let profile: Profile = serde_json::from_str(json)?;
        Ok(profile.normalized())
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self, EngineError> {
        let profile: Profile = serde_json::from_value(value)?;
        Ok(profile.normalized())
    }

    /// Trim, dedupe and clamp every field once.
    pub fn normalized(mut self) -> Self {
        let mut seen = HashSet::new();
        self.patterns = self
            .patterns
            .iter()
            .filter_map(IdentitySource::normalize)
            .filter(|id| seen.insert(id.name.to_lowercase()))
            .map(|id| IdentitySource::Detailed {
                name: id.name,
                aliases: id.aliases,
                folder: id.folder,
                path: None,
                directory: None,
            })
            .collect();
        self.ignore_patterns = dedupe_vocabulary(&self.ignore_patterns);
        self.attribution_verbs = dedupe_vocabulary(&self.attribution_verbs);
        self.action_verbs = dedupe_vocabulary(&self.action_verbs);
        self.pronoun_vocabulary = dedupe_vocabulary(&self.pronoun_vocabulary);
        self.veto_patterns = dedupe_vocabulary(&self.veto_patterns);

        self.priority_multiplier = self.priority_multiplier.max(0.0);
        self.distance_penalty_weight = self.distance_penalty_weight.max(0.0);
        self.roster_bonus = self.roster_bonus.max(0.0);
        self.roster_priority_dropoff = self.roster_priority_dropoff.max(0.0);
        self.global_cooldown_ms = self.global_cooldown_ms.max(0);
        self.fuzzy_repeat_limit = self.fuzzy_repeat_limit.max(1);
        if self.decision_log_capacity == 0 {
            self.decision_log_capacity = 25;
        }
        self
    }

    /// Normalized identities in configuration order
    pub fn identities(&self) -> Vec<CharacterIdentity> {
        self.patterns
            .iter()
            .filter_map(IdentitySource::normalize)
            .collect()
    }

    pub fn is_ignored(&self, pattern: &str) -> bool {
        let pattern = pattern.trim().to_lowercase();
        self.ignore_patterns
            .iter()
            .any(|ignored| ignored.trim().to_lowercase() == pattern)
    }

    /// Hash of every field that shapes compiled matchers. Two profiles with
    /// the same fingerprint share a `MatcherSet`.
    pub fn pattern_fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.identities().hash(&mut hasher);
        self.ignore_patterns.hash(&mut hasher);
        self.attribution_verbs.hash(&mut hasher);
        self.action_verbs.hash(&mut hasher);
        self.pronoun_vocabulary.hash(&mut hasher);
        self.veto_patterns.hash(&mut hasher);
        self.detection.hash(&mut hasher);
        self.fuzzy_tolerance.is_enabled().hash(&mut hasher);
        self.fuzzy_scan_lowercase.hash(&mut hasher);
        hasher.finish()
    }
}

/// Trim entries, drop blanks, remove case-insensitive duplicates (first wins)
pub fn dedupe_vocabulary(entries: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    entries
        .iter()
        .map(|e| e.trim())
        .filter(|e| !e.is_empty())
        .filter(|e| seen.insert(e.to_lowercase()))
        .map(str::to_string)
        .collect()
}

// =============================================================================
// Tests
// =============================================================================
