//! Match Collector
//!
//! The central scan step: runs every enabled matcher from a `MatcherSet`
//! over a window of the buffer and emits `DetectionMatch` records.
//!
//! # Window
//! A scan starts `MatcherSet::max_reach` bytes before the resumption point,
//! the longest match any template can produce, then keeps only matches whose
//! end lies past that point. A signal straddling the window edge is therefore
//! never lost, and nothing already reported is re-emitted. A profile with an
//! unbounded regex entry rescans from `start_index`.
//!
//! # Veto
//! A veto phrase in the window suppresses detection: the outcome carries the
//! `VetoHit` and no matches.
//!
//! # Visibility
//! - Narration cues (attribution, action, possessive, name, pronoun) are
//!   dropped when the name starts inside a quoted span
//! - Vocatives are kept only inside quotes
//! - Attribution/action inside quotes are allowed with `scan_dialogue_actions`
//! - Speaker tags are always visible
//!
//! Overlap: Rust regex has no lookahead, so after every hit the search resumes
//! one character past the name start instead of past the whole match.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ops::Range;

use crate::scanner::fuzzy::{FuzzyThrottle, FuzzyTolerance, NameResolution, NameResolver, ResolutionMethod};
use crate::scanner::patterns::MatcherSet;
use crate::scanner::profile::{MatchKind, PriorityWeights, Profile};
use crate::scanner::quotes::QuoteSpanState;
use crate::scanner::tokens::TokenProjector;

// =============================================================================
// Types
// =============================================================================

/// Caller-supplied per-scan options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScanOptions {
    /// Byte offset where searching may begin at the earliest
    pub start_index: usize,
    /// Matches ending at or before this offset are discarded
    pub min_index: Option<usize>,
    /// Same as `min_index`, expressed as a token index
    pub min_token_index: Option<usize>,
    /// Current subject for pronoun attribution; no subject, no pronoun matches
    pub last_subject: Option<String>,
    /// Per-kind weight overrides
    pub priority_weights: HashMap<MatchKind, f64>,
    /// Overrides the profile's `scanDialogueActions`
    pub scan_dialogue_actions: Option<bool>,
    /// Overrides the profile's fuzzy tolerance
    pub fuzzy_tolerance: Option<FuzzyTolerance>,
}

/// One detected signal. Produced fresh per scan, never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionMatch {
    /// Matched surface text of the name (the pronoun for pronoun matches)
    pub raw: String,
    /// Canonical name, or `raw` when nothing resolved
    pub name: String,
    pub kind: MatchKind,
    /// Byte offset of the name
    pub char_start: usize,
    /// From the name to the end of the whole template match
    pub char_len: usize,
    pub token_start: Option<usize>,
    pub token_len: Option<usize>,
    pub priority: f64,
    /// Rescued by a fuzzy fallback matcher
    pub fallback: bool,
    pub resolution: Option<NameResolution>,
}

impl DetectionMatch {
    /// Defining offset for incremental ordering
    pub fn char_end(&self) -> usize {
        self.char_start + self.char_len
    }

    pub fn span(&self) -> Range<usize> {
        self.char_start..self.char_end()
    }

    pub fn method(&self) -> ResolutionMethod {
        self.resolution
            .as_ref()
            .map(|r| r.method)
            .unwrap_or(ResolutionMethod::Raw)
    }
}

/// First veto phrase found in the window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VetoHit {
    pub phrase: String,
    pub char_start: usize,
    pub char_len: usize,
}

/// Result of one collection pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanOutcome {
    /// Sorted by (char_start, kind)
    pub matches: Vec<DetectionMatch>,
    pub veto: Option<VetoHit>,
    /// Effective resumption point (matches end past it)
    pub boundary: usize,
    /// Where the regex search actually began
    pub searched_from: usize,
}

impl ScanOutcome {
    /// Furthest end offset among the matches
    pub fn max_end(&self) -> Option<usize> {
        self.matches.iter().map(DetectionMatch::char_end).max()
    }

    pub fn count(&self, kind: MatchKind) -> usize {
        self.matches.iter().filter(|m| m.kind == kind).count()
    }
}

/// A name capture that passed the word-boundary check
#[derive(Debug, Clone, Copy)]
struct Hit {
    name_start: usize,
    name_end: usize,
    end: usize,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    from: usize,
    boundary: usize,
}

// =============================================================================
// Collector
// =============================================================================

/// Borrows one compiled set, profile and resolver for a scan
pub struct MatchCollector<'a> {
    set: &'a MatcherSet,
    profile: &'a Profile,
    resolver: &'a NameResolver,
}

impl<'a> MatchCollector<'a> {
    pub fn new(set: &'a MatcherSet, profile: &'a Profile, resolver: &'a NameResolver) -> Self {
        Self {
            set,
            profile,
            resolver,
        }
    }

    /// Run every enabled kind over the window. `quotes` must already cover
    /// `text`. Without a projector, whitespace runs provide token spans.
    pub fn collect(
        &self,
        text: &str,
        quotes: &QuoteSpanState,
        projector: Option<&TokenProjector>,
        options: &ScanOptions,
    ) -> ScanOutcome {
        self.collect_kinds(text, quotes, projector, options, &MatchKind::ALL)
    }

    /// Run only the listed kinds
    pub fn collect_kinds(
        &self,
        text: &str,
        quotes: &QuoteSpanState,
        projector: Option<&TokenProjector>,
        options: &ScanOptions,
        kinds: &[MatchKind],
    ) -> ScanOutcome {
        let owned;
        let projector = match projector {
            Some(p) => p,
            None => {
                owned = TokenProjector::new(text, None);
                &owned
            }
        };
        let window = self.window(text, projector, options);
        let weights = self
            .profile
            .priority_weights
            .with_overrides(&options.priority_weights);
        let dialogue_actions = options
            .scan_dialogue_actions
            .unwrap_or(self.profile.scan_dialogue_actions);
        let tolerance = options
            .fuzzy_tolerance
            .unwrap_or_else(|| self.resolver.tolerance());

        let mut outcome = ScanOutcome {
            boundary: window.boundary,
            searched_from: window.from,
            ..ScanOutcome::default()
        };
        if kinds.contains(&MatchKind::Veto) {
            if let Some(regex) = self.set.get(MatchKind::Veto) {
                outcome.veto = find_veto(regex, text, window);
            }
            if let Some(hit) = &outcome.veto {
                tracing::debug!(phrase = %hit.phrase, at = hit.char_start, "veto phrase in window, detection suppressed");
                return outcome;
            }
        }

        // Name ranges any primary matcher claimed, visible or not
        let mut covered: Vec<Range<usize>> = Vec::new();

        for kind in self.set.enabled_kinds().filter(|k| kinds.contains(k)) {
            let Some(regex) = self.set.get(kind) else {
                continue;
            };
            match kind {
                MatchKind::Veto => {}
                MatchKind::Pronoun => {
                    let Some(subject) = options
                        .last_subject
                        .as_deref()
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                    else {
                        continue;
                    };
                    let resolution = self.resolver.resolve_with(subject, FuzzyTolerance::Off);
                    for hit in hits(regex, text, window.from) {
                        if hit.end <= window.boundary
                            || !visible(kind, quotes.is_quoted(hit.name_start), dialogue_actions)
                        {
                            continue;
                        }
                        outcome.matches.push(self.build(
                            text,
                            projector,
                            hit,
                            kind,
                            &weights,
                            resolution.name().to_string(),
                            Some(resolution.clone()),
                            false,
                        ));
                    }
                }
                _ => {
                    for hit in hits(regex, text, window.from) {
                        covered.push(hit.name_start..hit.name_end);
                        if hit.end <= window.boundary
                            || !visible(kind, quotes.is_quoted(hit.name_start), dialogue_actions)
                        {
                            continue;
                        }
                        let raw = &text[hit.name_start..hit.name_end];
                        let resolution = self.resolver.resolve_with(raw, tolerance);
                        outcome.matches.push(self.build(
                            text,
                            projector,
                            hit,
                            kind,
                            &weights,
                            resolution.name().to_string(),
                            Some(resolution),
                            false,
                        ));
                    }
                }
            }
        }

        if tolerance.is_enabled() {
            self.rescue(
                text,
                quotes,
                projector,
                window,
                &weights,
                dialogue_actions,
                tolerance,
                kinds,
                &covered,
                &mut outcome.matches,
            );
        }

        outcome
            .matches
            .sort_by(|a, b| a.char_start.cmp(&b.char_start).then(a.kind.cmp(&b.kind)));
        tracing::trace!(
            matches = outcome.matches.len(),
            from = window.from,
            boundary = window.boundary,
            "collected"
        );
        outcome
    }

    /// Fuzzy fallback: generic-name templates whose captures no primary
    /// matcher covered, kept only when they resolve to a roster identity.
    #[allow(clippy::too_many_arguments)]
    fn rescue(
        &self,
        text: &str,
        quotes: &QuoteSpanState,
        projector: &TokenProjector,
        window: Window,
        weights: &PriorityWeights,
        dialogue_actions: bool,
        tolerance: FuzzyTolerance,
        kinds: &[MatchKind],
        covered: &[Range<usize>],
        out: &mut Vec<DetectionMatch>,
    ) {
        let mut throttle = FuzzyThrottle::new(self.profile.fuzzy_repeat_limit);

        for kind in MatchKind::ALL.into_iter().filter(|k| kinds.contains(k)) {
            let Some(regex) = self.set.fallback(kind) else {
                continue;
            };
            for hit in hits(regex, text, window.from) {
                if hit.end <= window.boundary
                    || covered
                        .iter()
                        .any(|r| r.start < hit.name_end && hit.name_start < r.end)
                    || !visible(kind, quotes.is_quoted(hit.name_start), dialogue_actions)
                {
                    continue;
                }
                let raw = &text[hit.name_start..hit.name_end];
                let resolution = self.resolver.resolve_with(raw, tolerance);
                if !resolution.is_resolved() {
                    continue;
                }
                if resolution.method == ResolutionMethod::Fuzzy && !throttle.admit(raw) {
                    tracing::trace!(raw, "fuzzy repeat throttled");
                    continue;
                }
                // One rescue per name position, whichever kind saw it first
                if out
                    .iter()
                    .any(|m| m.fallback && m.kind == kind && m.char_start == hit.name_start)
                {
                    continue;
                }
                tracing::debug!(
                    raw,
                    canonical = resolution.name(),
                    kind = kind.as_str(),
                    "fuzzy rescue"
                );
                out.push(self.build(
                    text,
                    projector,
                    hit,
                    kind,
                    weights,
                    resolution.name().to_string(),
                    Some(resolution),
                    true,
                ));
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        &self,
        text: &str,
        projector: &TokenProjector,
        hit: Hit,
        kind: MatchKind,
        weights: &PriorityWeights,
        name: String,
        resolution: Option<NameResolution>,
        fallback: bool,
    ) -> DetectionMatch {
        let (token_start, token_len) = match projector.token_span(hit.name_start, hit.end) {
            Some((first, last)) => (Some(first), Some(last - first + 1)),
            None => (None, None),
        };
        DetectionMatch {
            raw: text[hit.name_start..hit.name_end].to_string(),
            name,
            kind,
            char_start: hit.name_start,
            char_len: hit.end - hit.name_start,
            token_start,
            token_len,
            priority: weights.get(kind),
            fallback,
            resolution,
        }
    }

    fn window(&self, text: &str, projector: &TokenProjector, options: &ScanOptions) -> Window {
        let mut boundary = options.min_index.unwrap_or(0);
        if let Some(token) = options.min_token_index {
            boundary = boundary.max(projector.token_start(token));
        }
        let boundary = floor_char_boundary(text, boundary.min(text.len()));
        let lookback = self
            .set
            .max_reach()
            .map_or(0, |reach| floor_char_boundary(text, boundary.saturating_sub(reach)));
        let start = floor_char_boundary(text, options.start_index.min(text.len()));
        Window {
            from: start.max(lookback),
            boundary,
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn visible(kind: MatchKind, quoted: bool, dialogue_actions: bool) -> bool {
    match kind {
        MatchKind::Vocative => quoted,
        MatchKind::Attribution | MatchKind::Action if dialogue_actions => true,
        k if k.is_narration_only() => !quoted,
        _ => true,
    }
}

/// Every name capture from `from` on, resuming one char past each name start
fn hits(regex: &Regex, text: &str, from: usize) -> Vec<Hit> {
    let mut out = Vec::new();
    let mut pos = from;
    while pos <= text.len() {
        let Some(caps) = regex.captures_at(text, pos) else {
            break;
        };
        let Some(name) = caps.name("name") else {
            break;
        };
        let end = caps.get(0).map_or(name.end(), |m| m.end());
        if !name.is_empty() && at_word_boundary(text, name.start(), name.end()) {
            out.push(Hit {
                name_start: name.start(),
                name_end: name.end(),
                end: end.max(name.end()),
            });
        }
        pos = next_char_boundary(text, name.start().max(pos));
    }
    out
}

fn find_veto(regex: &Regex, text: &str, window: Window) -> Option<VetoHit> {
    let mut pos = window.from;
    while pos <= text.len() {
        let m = regex.find_at(text, pos)?;
        if m.end() > window.boundary {
            return Some(VetoHit {
                phrase: m.as_str().to_string(),
                char_start: m.start(),
                char_len: m.len(),
            });
        }
        pos = next_char_boundary(text, m.start());
    }
    None
}

/// Han, kana and hangul carry no spaces between words
fn is_cjk(c: char) -> bool {
    matches!(
        c as u32,
        0x3040..=0x30FF | 0x3400..=0x4DBF | 0x4E00..=0x9FFF | 0xAC00..=0xD7AF | 0xF900..=0xFAFF
    )
}

fn is_name_char(c: char) -> bool {
    (c.is_alphanumeric() || c == '_') && !is_cjk(c)
}

/// Stand-in for `(?<!\w)` / `(?!\w)` around the name capture
fn at_word_boundary(text: &str, start: usize, end: usize) -> bool {
    let before = text[..start].chars().next_back();
    let after = text[end..].chars().next();
    !before.map_or(false, is_name_char) && !after.map_or(false, is_name_char)
}

fn next_char_boundary(text: &str, index: usize) -> usize {
    text.get(index..)
        .and_then(|rest| rest.chars().next())
        .map_or(text.len() + 1, |c| index + c.len_utf8())
}

pub(crate) fn floor_char_boundary(text: &str, index: usize) -> usize {
    let mut index = index.min(text.len());
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        profile: Profile,
        set: MatcherSet,
        resolver: NameResolver,
    }

    impl Fixture {
        fn new(profile: Profile) -> Self {
            let profile = profile.normalized();
            Self {
                set: MatcherSet::compile(&profile),
                resolver: NameResolver::from_profile(&profile),
                profile,
            }
        }

        fn scan(&self, text: &str, options: &ScanOptions) -> ScanOutcome {
            let mut quotes = QuoteSpanState::new();
            quotes.scan(text, true);
            MatchCollector::new(&self.set, &self.profile, &self.resolver)
                .collect(text, &quotes, None, options)
        }
    }

    fn kinds_and_names(outcome: &ScanOutcome) -> Vec<(MatchKind, String)> {
        outcome
            .matches
            .iter()
            .map(|m| (m.kind, m.name.clone()))
            .collect()
    }

    // -------------------------------------------------------------------------
    // Requirement 1: spans and priorities
    // -------------------------------------------------------------------------
    #[test]
    fn test_speaker_span_and_priority() {
        let fx = Fixture::new(Profile::with_names(["Kotori", "Shido"]));
        let outcome = fx.scan("Kotori: Hello there.", &ScanOptions::default());

        assert_eq!(outcome.matches.len(), 1);
        let m = &outcome.matches[0];
        assert_eq!(m.kind, MatchKind::Speaker);
        assert_eq!(m.raw, "Kotori");
        assert_eq!(m.span(), 0..7);
        assert_eq!(m.token_start, Some(0));
        assert_eq!(m.token_len, Some(1));
        assert_eq!(m.priority, 5.0);
        assert_eq!(m.method(), ResolutionMethod::Direct);
    }

    #[test]
    fn test_priority_override() {
        let fx = Fixture::new(Profile::with_names(["Kotori"]));
        let mut options = ScanOptions::default();
        options.priority_weights.insert(MatchKind::Speaker, 9.0);
        let outcome = fx.scan("Kotori: Hi.", &options);
        assert_eq!(outcome.matches[0].priority, 9.0);
    }

    #[test]
    fn test_partial_word_rejected() {
        let fx = Fixture::new(Profile::with_names(["Ali"]));
        let outcome = fx.scan("Alice stepped in. Ali stepped out.", &ScanOptions::default());
        let starts: Vec<_> = outcome.matches.iter().map(|m| m.char_start).collect();
        assert_eq!(starts, vec![18]);
    }

    #[test]
    fn test_alias_resolves_to_canonical() {
        let profile = Profile::from_json(
            r#"{"patterns": [{"name": "Kotori Itsuka", "aliases": ["Kotori"]}]}"#,
        )
        .unwrap();
        let fx = Fixture::new(profile);
        let outcome = fx.scan("Kotori nodded slowly.", &ScanOptions::default());
        assert_eq!(outcome.matches[0].name, "Kotori Itsuka");
        assert_eq!(outcome.matches[0].method(), ResolutionMethod::Alias);
    }

    // -------------------------------------------------------------------------
    // Requirement 2: quote visibility
    // -------------------------------------------------------------------------
    #[test]
    fn test_narration_suppressed_in_quotes() {
        let fx = Fixture::new(Profile::with_names(["Tohka"]));
        let text = r#""Tohka stepped back," she whispered. Tohka stepped back."#;
        let outcome = fx.scan(text, &ScanOptions::default());
        let actions: Vec<_> = outcome
            .matches
            .iter()
            .filter(|m| m.kind == MatchKind::Action)
            .map(|m| m.char_start)
            .collect();
        assert_eq!(actions, vec![37]);
    }

    #[test]
    fn test_dialogue_actions_opt_in() {
        let fx = Fixture::new(Profile::with_names(["Tohka"]));
        let text = r#""Tohka stepped back," she whispered."#;
        let options = ScanOptions {
            scan_dialogue_actions: Some(true),
            ..ScanOptions::default()
        };
        assert_eq!(fx.scan(text, &options).count(MatchKind::Action), 1);
    }

    #[test]
    fn test_vocative_requires_quotes() {
        let fx = Fixture::new(Profile::with_names(["Shido"]));
        let outcome = fx.scan(r#"She waved, Shido! "Wait, Shido!""#, &ScanOptions::default());
        let vocatives: Vec<_> = outcome
            .matches
            .iter()
            .filter(|m| m.kind == MatchKind::Vocative)
            .map(|m| m.char_start)
            .collect();
        assert_eq!(vocatives, vec![25]);
    }

    // -------------------------------------------------------------------------
    // Requirement 3: pronouns need a subject
    // -------------------------------------------------------------------------
    #[test]
    fn test_pronoun_uses_subject() {
        let fx = Fixture::new(Profile::with_names(["Tohka"]));
        let text = "The door opened. She stepped inside.";

        assert_eq!(fx.scan(text, &ScanOptions::default()).count(MatchKind::Pronoun), 0);

        let options = ScanOptions {
            last_subject: Some("tohka".into()),
            ..ScanOptions::default()
        };
        let outcome = fx.scan(text, &options);
        assert_eq!(kinds_and_names(&outcome), vec![(MatchKind::Pronoun, "Tohka".to_string())]);
        assert_eq!(outcome.matches[0].raw, "She");
    }

    // -------------------------------------------------------------------------
    // Requirement 4: resumption window
    // -------------------------------------------------------------------------
    #[test]
    fn test_min_index_keeps_straddling_match() {
        let fx = Fixture::new(Profile::with_names(["Tohka"]));
        let text = "Tohka stepped forward.";
        // Name before the boundary, verb after it
        let options = ScanOptions {
            min_index: Some(8),
            ..ScanOptions::default()
        };
        assert_eq!(fx.scan(text, &options).matches.len(), 1);

        let options = ScanOptions {
            min_index: Some(13),
            ..ScanOptions::default()
        };
        assert!(fx.scan(text, &options).matches.is_empty());
    }

    #[test]
    fn test_min_token_index() {
        let fx = Fixture::new(Profile::with_names(["Tohka", "Shido"]));
        let text = "Tohka stepped forward. Shido nodded.";
        let options = ScanOptions {
            min_token_index: Some(3),
            ..ScanOptions::default()
        };
        assert_eq!(
            kinds_and_names(&fx.scan(text, &options)),
            vec![(MatchKind::Action, "Shido".to_string())]
        );
    }

    #[test]
    fn test_out_of_range_options_are_clamped() {
        let fx = Fixture::new(Profile::with_names(["Tohka"]));
        let options = ScanOptions {
            start_index: 999,
            min_index: Some(999),
            min_token_index: Some(999),
            ..ScanOptions::default()
        };
        let outcome = fx.scan("Tohka stepped.", &options);
        assert!(outcome.matches.is_empty());
        assert_eq!(outcome.boundary, 14);
    }

    #[test]
    fn test_window_reaches_back_by_template_reach() {
        let fx = Fixture::new(Profile::with_names(["Tohka"]));
        let reach = fx.set.max_reach().unwrap();
        let text = "a ".repeat(reach);
        let options = ScanOptions {
            min_index: Some(text.len()),
            ..ScanOptions::default()
        };
        assert_eq!(fx.scan(&text, &options).searched_from, text.len() - reach);

        let fx = Fixture::new(Profile::with_names(["/Toh+ka/"]));
        assert_eq!(fx.scan(&text, &options).searched_from, 0);
    }

    // -------------------------------------------------------------------------
    // Requirement 5: veto and fuzzy fallback
    // -------------------------------------------------------------------------
    #[test]
    fn test_veto_hit() {
        let fx = Fixture::new(Profile::with_names(["Kotori"]));
        let outcome = fx.scan("(OOC: brb)\nKotori: hi", &ScanOptions::default());
        let veto = outcome.veto.clone().unwrap();
        assert_eq!(veto.char_start, 0);
        assert_eq!(veto.phrase, "(OOC");
        assert!(outcome.matches.is_empty());
    }

    #[test]
    fn test_veto_suppresses_rescues_too() {
        let mut profile = Profile::with_names(["Alice"]);
        profile.fuzzy_tolerance = FuzzyTolerance::Auto;
        let fx = Fixture::new(profile);
        let outcome = fx.scan("Ailce reached out. OOC: back soon. Alice smiled.", &ScanOptions::default());
        assert!(outcome.veto.is_some());
        assert!(outcome.matches.is_empty());
    }

    #[test]
    fn test_veto_behind_window_is_ignored() {
        let fx = Fixture::new(Profile::with_names(["Kotori"]));
        let text = "(OOC: brb)\nKotori: hi";
        let options = ScanOptions {
            min_index: Some(11),
            ..ScanOptions::default()
        };
        let outcome = fx.scan(text, &options);
        assert!(outcome.veto.is_none());
        assert_eq!(outcome.count(MatchKind::Speaker), 1);
    }

    #[test]
    fn test_fuzzy_rescue_and_throttle() {
        let mut profile = Profile::with_names(["Alice"]);
        profile.fuzzy_tolerance = FuzzyTolerance::Auto;
        let fx = Fixture::new(profile);

        let outcome = fx.scan(
            "Ailce reached out. Ailce nodded. Alice smiled.",
            &ScanOptions::default(),
        );
        let rescued: Vec<_> = outcome.matches.iter().filter(|m| m.fallback).collect();
        assert_eq!(rescued.len(), 1);
        assert_eq!(rescued[0].raw, "Ailce");
        assert_eq!(rescued[0].name, "Alice");
        assert_eq!(rescued[0].method(), ResolutionMethod::Fuzzy);
        // The exact mention is a primary match, not a rescue
        assert!(outcome
            .matches
            .iter()
            .any(|m| !m.fallback && m.raw == "Alice" && m.kind == MatchKind::Action));
    }

    #[test]
    fn test_fuzzy_disabled_per_call() {
        let mut profile = Profile::with_names(["Alice"]);
        profile.fuzzy_tolerance = FuzzyTolerance::Auto;
        let fx = Fixture::new(profile);
        let options = ScanOptions {
            fuzzy_tolerance: Some(FuzzyTolerance::Off),
            ..ScanOptions::default()
        };
        assert!(fx.scan("Ailce reached out.", &options).matches.is_empty());
    }

    #[test]
    fn test_word_boundary_helpers() {
        assert!(at_word_boundary("a Bob b", 2, 5));
        assert!(!at_word_boundary("aBob b", 1, 4));
        assert!(at_word_boundary("琴里は", 0, 6));
        assert_eq!(floor_char_boundary("琴里", 4), 3);
        assert_eq!(next_char_boundary("琴里", 0), 3);
        assert_eq!(next_char_boundary("ab", 2), 3);
    }
}
