//! Fuzzy Name Resolver
//!
//! Canonicalizes a raw matched surface form to a roster identity.
//!
//! # Pipeline
//! 1. Sample: very long candidates are cut to their first few words
//! 2. Strip a trailing possessive (`'s`, `’s`, `'`)
//! 3. Exact (case-insensitive) against names, then aliases
//! 4. Accent-folded comparison
//! 5. Optional similarity search (optimal string alignment distance),
//!    gated by a score floor and a character-overlap floor

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::convert::TryFrom;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;
use unicode_segmentation::UnicodeSegmentation;

use crate::error::EngineError;
use crate::scanner::profile::{CharacterIdentity, Profile};

/// Candidates longer than this are sampled down before resolution
const MAX_RAW_BYTES: usize = 64;

/// Words kept when sampling a long candidate
const SAMPLE_WORDS: usize = 4;

/// Lowercase connectors never rescued by fuzzy fallback
const CONNECTORS: &[&str] = &[
    "and", "but", "or", "nor", "yet", "so", "then", "the", "a", "an", "of", "to",
];

// =============================================================================
// Tolerance
// =============================================================================

/// Explicit fuzzy acceptance thresholds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FuzzyThreshold {
    /// Maximum edit distance; `None` scales with candidate length
    #[serde(default)]
    pub max_distance: Option<usize>,
    /// Similarity floor in `[0, 1]`
    pub min_score: f64,
    /// Shared-character ratio floor in `[0, 1]`
    #[serde(default = "default_min_overlap")]
    pub min_overlap: f64,
}

fn default_min_overlap() -> f64 {
    0.75
}

/// Fuzzy tolerance: off, automatic, or explicit thresholds
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "ToleranceRepr", into = "ToleranceRepr")]
pub enum FuzzyTolerance {
    #[default]
    Off,
    Auto,
    Explicit(FuzzyThreshold),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum ToleranceRepr {
    Flag(bool),
    Mode(String),
    Explicit(FuzzyThreshold),
}

impl TryFrom<ToleranceRepr> for FuzzyTolerance {
    type Error = EngineError;

    fn try_from(repr: ToleranceRepr) -> Result<Self, Self::Error> {
        match repr {
            ToleranceRepr::Flag(false) => Ok(FuzzyTolerance::Off),
            ToleranceRepr::Flag(true) => Ok(FuzzyTolerance::Auto),
            ToleranceRepr::Mode(mode) => match mode.trim().to_lowercase().as_str() {
                "" | "off" | "none" | "false" => Ok(FuzzyTolerance::Off),
                "auto" | "on" | "true" => Ok(FuzzyTolerance::Auto),
                other => Err(EngineError::FuzzyThreshold(format!("unknown mode '{}'", other))),
            },
            ToleranceRepr::Explicit(threshold) => {
                FuzzyTolerance::explicit(threshold)
            }
        }
    }
}

// serde's `into` needs an infallible conversion back
impl From<FuzzyTolerance> for ToleranceRepr {
    fn from(tolerance: FuzzyTolerance) -> Self {
        match tolerance {
            FuzzyTolerance::Off => ToleranceRepr::Mode("off".to_string()),
            FuzzyTolerance::Auto => ToleranceRepr::Mode("auto".to_string()),
            FuzzyTolerance::Explicit(t) => ToleranceRepr::Explicit(t),
        }
    }
}

impl FuzzyTolerance {
    pub fn explicit(threshold: FuzzyThreshold) -> Result<Self, EngineError> {
        let in_unit = |v: f64| (0.0..=1.0).contains(&v);
        if !in_unit(threshold.min_score) || !in_unit(threshold.min_overlap) {
            return Err(EngineError::FuzzyThreshold(format!(
                "minScore {} / minOverlap {} must be within [0, 1]",
                threshold.min_score, threshold.min_overlap
            )));
        }
        Ok(FuzzyTolerance::Explicit(threshold))
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, FuzzyTolerance::Off)
    }

    /// (max distance, min score, min overlap) for a candidate of `len` chars
    fn limits(&self, len: usize) -> Option<(usize, f64, f64)> {
        let scaled = match len {
            0..=3 => 0,
            4..=5 => 1,
            6..=8 => 2,
            _ => 3,
        };
        match self {
            FuzzyTolerance::Off => None,
            FuzzyTolerance::Auto => Some((scaled, 0.75, 0.75)),
            FuzzyTolerance::Explicit(t) => {
                Some((t.max_distance.unwrap_or(scaled), t.min_score, t.min_overlap))
            }
        }
    }
}

// =============================================================================
// Resolution
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionMethod {
    Direct,
    Alias,
    AccentFold,
    Fuzzy,
    Raw,
}

/// Outcome of canonicalizing one raw surface form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NameResolution {
    pub raw: String,
    /// Sampled, possessive-stripped, accent-folded form
    pub normalized: String,
    pub canonical: Option<String>,
    pub method: ResolutionMethod,
    pub score: Option<f64>,
    pub distance: Option<usize>,
    /// True when the canonical name differs from the raw surface form
    pub changed: bool,
}

impl NameResolution {
    fn raw(raw: &str, normalized: String) -> Self {
        Self {
            raw: raw.to_string(),
            normalized,
            canonical: None,
            method: ResolutionMethod::Raw,
            score: None,
            distance: None,
            changed: false,
        }
    }

    /// Canonical name if resolved, otherwise the raw text
    pub fn name(&self) -> &str {
        self.canonical.as_deref().unwrap_or(&self.raw)
    }

    pub fn is_resolved(&self) -> bool {
        self.canonical.is_some()
    }
}

#[derive(Debug, Clone)]
struct Candidate {
    canonical: String,
    lower: String,
    folded: String,
    is_alias: bool,
}

/// Roster-backed name canonicalizer
#[derive(Debug, Clone, Default)]
pub struct NameResolver {
    candidates: Vec<Candidate>,
    tolerance: FuzzyTolerance,
}

impl NameResolver {
    pub fn new(identities: &[CharacterIdentity], tolerance: FuzzyTolerance) -> Self {
        let mut candidates = Vec::new();
        for identity in identities {
            let surfaces = std::iter::once((&identity.name, false))
                .chain(identity.aliases.iter().map(|a| (a, true)));
            for (surface, is_alias) in surfaces {
                candidates.push(Candidate {
                    canonical: identity.name.clone(),
                    lower: surface.to_lowercase(),
                    folded: fold_diacritics(&surface.to_lowercase()),
                    is_alias,
                });
            }
        }
        Self { candidates, tolerance }
    }

    /// Resolver over the profile's effective (non-ignored) identities
    pub fn from_profile(profile: &Profile) -> Self {
        let identities: Vec<CharacterIdentity> = profile
            .identities()
            .into_iter()
            .filter(|id| !profile.is_ignored(&id.name))
            .map(|mut id| {
                id.aliases.retain(|a| !profile.is_ignored(a));
                id
            })
            .collect();
        Self::new(&identities, profile.fuzzy_tolerance)
    }

    pub fn tolerance(&self) -> FuzzyTolerance {
        self.tolerance
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Resolve with the resolver's own tolerance
    pub fn resolve(&self, raw: &str) -> NameResolution {
        self.resolve_with(raw, self.tolerance)
    }

    /// Resolve with a per-call tolerance override
    pub fn resolve_with(&self, raw: &str, tolerance: FuzzyTolerance) -> NameResolution {
        let sampled = sample(raw);
        let stripped = strip_possessive(&sampled);
        let lower = stripped.to_lowercase();
        let folded = fold_diacritics(&lower);
        let mut resolution = NameResolution::raw(raw, folded.clone());

        if lower.is_empty() {
            return resolution;
        }

        let exact = |alias: bool| {
            self.candidates
                .iter()
                .find(|c| c.is_alias == alias && c.lower == lower)
        };
        let found = exact(false)
            .map(|c| (c, ResolutionMethod::Direct))
            .or_else(|| exact(true).map(|c| (c, ResolutionMethod::Alias)))
            .or_else(|| {
                self.candidates
                    .iter()
                    .find(|c| c.folded == folded)
                    .map(|c| (c, ResolutionMethod::AccentFold))
            });

        if let Some((candidate, method)) = found {
            resolution.canonical = Some(candidate.canonical.clone());
            resolution.method = method;
            resolution.score = Some(1.0);
            resolution.distance = Some(0);
            resolution.changed = candidate.canonical != raw;
            return resolution;
        }

        if is_connector(&lower) {
            return resolution;
        }

        if let Some((candidate, distance, score)) = self.best_fuzzy(&folded, tolerance) {
            resolution.canonical = Some(candidate.canonical.clone());
            resolution.method = ResolutionMethod::Fuzzy;
            resolution.score = Some(score);
            resolution.distance = Some(distance);
            resolution.changed = candidate.canonical != raw;
        }
        resolution
    }

    fn best_fuzzy(&self, folded: &str, tolerance: FuzzyTolerance) -> Option<(&Candidate, usize, f64)> {
        let raw_len = folded.chars().count();
        let mut best: Option<(&Candidate, usize, f64)> = None;

        for candidate in &self.candidates {
            let cand_len = candidate.folded.chars().count();
            let Some((max_distance, min_score, min_overlap)) =
                tolerance.limits(raw_len.max(cand_len))
            else {
                return None;
            };
            if raw_len.abs_diff(cand_len) > max_distance {
                continue;
            }
            if char_overlap(folded, &candidate.folded) < min_overlap {
                continue;
            }
            let distance = osa_distance(folded, &candidate.folded);
            let score = similarity(distance, raw_len, cand_len);
            if distance > max_distance || score < min_score {
                continue;
            }
            let better = match best {
                None => true,
                Some((_, d, s)) => distance < d || (distance == d && score > s),
            };
            if better {
                best = Some((candidate, distance, score));
            }
        }
        best
    }
}

// =============================================================================
// Text helpers
// =============================================================================

/// Cut very long candidates to their first few words
fn sample(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.len() <= MAX_RAW_BYTES {
        return trimmed.to_string();
    }
    trimmed
        .unicode_words()
        .take(SAMPLE_WORDS)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Strip a trailing possessive marker
pub fn strip_possessive(text: &str) -> &str {
    for suffix in ["'s", "’s", "'S", "’S", "'", "’"] {
        if let Some(stripped) = text.strip_suffix(suffix) {
            if !stripped.is_empty() {
                return stripped;
            }
        }
    }
    text
}

/// Remove combining marks after canonical decomposition ("Élise" -> "Elise")
pub fn fold_diacritics(text: &str) -> String {
    text.nfd().filter(|c| !is_combining_mark(*c)).nfc().collect()
}

pub fn is_connector(word: &str) -> bool {
    let lower = word.to_lowercase();
    CONNECTORS.contains(&lower.as_str())
}

/// Optimal string alignment distance (Levenshtein + adjacent transposition)
pub fn osa_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (n, m) = (a.len(), b.len());
    if n == 0 {
        return m;
    }
    if m == 0 {
        return n;
    }

    let mut dp = vec![vec![0usize; m + 1]; n + 1];
    for (i, row) in dp.iter_mut().enumerate() {
        row[0] = i;
    }
    for j in 0..=m {
        dp[0][j] = j;
    }

    for i in 1..=n {
        for j in 1..=m {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            let mut best = (dp[i - 1][j] + 1)
                .min(dp[i][j - 1] + 1)
                .min(dp[i - 1][j - 1] + cost);
            if i > 1 && j > 1 && a[i - 1] == b[j - 2] && a[i - 2] == b[j - 1] {
                best = best.min(dp[i - 2][j - 2] + 1);
            }
            dp[i][j] = best;
        }
    }
    dp[n][m]
}

fn similarity(distance: usize, a_len: usize, b_len: usize) -> f64 {
    let longest = a_len.max(b_len);
    if longest == 0 {
        return 1.0;
    }
    1.0 - distance as f64 / longest as f64
}

/// Shared characters (multiset) over the longer length
fn char_overlap(a: &str, b: &str) -> f64 {
    let mut counts: HashMap<char, usize> = HashMap::new();
    for c in a.chars() {
        *counts.entry(c).or_insert(0) += 1;
    }
    let mut shared = 0usize;
    for c in b.chars() {
        if let Some(n) = counts.get_mut(&c) {
            if *n > 0 {
                *n -= 1;
                shared += 1;
            }
        }
    }
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 0.0;
    }
    shared as f64 / longest as f64
}

// =============================================================================
// Anti-flood throttle
// =============================================================================

/// Limits how often one raw fuzzy surface form is rescued per scan window
#[derive(Debug, Clone)]
pub struct FuzzyThrottle {
    limit: usize,
    rescued: HashMap<String, usize>,
}

impl FuzzyThrottle {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            rescued: HashMap::new(),
        }
    }

    /// Record a rescue; false when the surface form is already exhausted
    pub fn admit(&mut self, raw: &str) -> bool {
        let count = self.rescued.entry(raw.to_string()).or_insert(0);
        if *count >= self.limit {
            return false;
        }
        *count += 1;
        true
    }
}

// =============================================================================
// Tests
// =============================================================================
