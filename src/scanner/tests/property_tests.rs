//! Invariants that must hold for every input of a family

use super::Harness;
use crate::scanner::{
    DetectionMatch, FuzzyThreshold, FuzzyTolerance, MatchKind, NameResolver, Profile, QuoteSpanState,
    ResolutionMethod, ScanOptions,
};
use crate::scoring::{AttributionScorer, ScoreFilter, ScoringConfig};
use crate::session::AttributionEngine;
use std::collections::HashSet;

const STREAM: &str =
    "Kotori: Hello there.\nTohka stepped forward. \"Shido, wait!\" Shido's coat flapped. Kotori smiled.";

const NAMES: [&str; 4] = ["Kotori", "Tohka", "Shido", "Maya"];

/// One attribution whose filler alone runs past 256 bytes
fn long_attribution() -> String {
    let word = "supercalifragilisticexpialidociouslyish";
    format!("Maya {} said nothing.", vec![word; 7].join(" "))
}

fn sorted(mut keys: Vec<Key>) -> Vec<Key> {
    keys.sort_by_key(|k| (k.2, k.0));
    keys
}

fn after_whitespace(text: &str) -> Vec<usize> {
    text.char_indices()
        .filter(|(_, c)| c.is_whitespace())
        .map(|(i, c)| i + c.len_utf8())
        .collect()
}

type Key = (MatchKind, String, usize, usize);

fn key(m: &DetectionMatch) -> Key {
    (m.kind, m.name.clone(), m.char_start, m.char_end())
}

// ============================================================================
// Monotonic incremental scan
// ============================================================================

#[test]
fn test_split_scan_matches_single_pass() {
    let h = Harness::new(Profile::with_names(NAMES));
    let long = long_attribution();

    for text in [STREAM, long.as_str()] {
        let whole: Vec<Key> = h.scan(text, &ScanOptions::default()).matches.iter().map(key).collect();
        assert!(!whole.is_empty());

        for k in after_whitespace(text) {
            let mut quotes = QuoteSpanState::new();
            let prefix = &text[..k];
            quotes.scan(prefix, true);
            let mut joined: Vec<Key> = h
                .collector()
                .collect(prefix, &quotes, None, &ScanOptions::default())
                .matches
                .iter()
                .map(key)
                .collect();

            quotes.scan(text, false);
            let rest = ScanOptions {
                min_index: Some(k),
                ..ScanOptions::default()
            };
            joined.extend(h.collector().collect(text, &quotes, None, &rest).matches.iter().map(key));

            assert_eq!(sorted(joined), whole, "split at {}", k);
        }
    }
}

#[test]
fn test_long_attribution_found_across_split() {
    let h = Harness::new(Profile::with_names(["Maya"]));
    let text = long_attribution();
    let k = text.find("said").unwrap();
    assert!(k > 256);

    let mut quotes = QuoteSpanState::new();
    quotes.scan(&text, true);
    let rest = ScanOptions {
        min_index: Some(k),
        ..ScanOptions::default()
    };
    let outcome = h.collector().collect(&text, &quotes, None, &rest);
    let found: Vec<(MatchKind, &str, usize)> = outcome
        .matches
        .iter()
        .map(|m| (m.kind, m.name.as_str(), m.char_start))
        .collect();
    assert_eq!(found, vec![(MatchKind::Attribution, "Maya", 0)]);
}

// ============================================================================
// Streaming through the session equals one pass
// ============================================================================

/// Feed `chunks` to buffer `id`, finish it, return what it found
fn streamed<'a>(engine: &mut AttributionEngine, id: &str, chunks: impl IntoIterator<Item = &'a str>) -> Vec<Key> {
    for (i, chunk) in chunks.into_iter().enumerate() {
        engine.append(id, chunk, i as i64);
    }
    let summary = engine.end_buffer(id, 0).unwrap();
    sorted(
        summary
            .matches
            .iter()
            .filter(|m| m.kind != MatchKind::Pronoun)
            .map(key)
            .collect(),
    )
}

fn one_pass(engine: &AttributionEngine, text: &str) -> Vec<Key> {
    engine
        .analyze(text, &ScanOptions::default())
        .matches
        .iter()
        .map(key)
        .collect()
}

fn boundaries(text: &str) -> Vec<usize> {
    text.char_indices().map(|(i, _)| i).chain([text.len()]).collect()
}

#[test]
fn test_char_by_char_stream_matches_single_pass() {
    let mut engine = AttributionEngine::new(Profile::with_names(NAMES));
    let long = long_attribution();
    for text in [STREAM, long.as_str(), "琴里は笑った。\nKotori: こんにちは"] {
        let bounds = boundaries(text);
        let chars = bounds.windows(2).map(|w| &text[w[0]..w[1]]);
        let expected = one_pass(&engine, text);
        assert_eq!(streamed(&mut engine, text, chars), expected, "{}", text);
    }
}

#[test]
fn test_two_chunk_stream_matches_single_pass_at_every_split() {
    let mut engine = AttributionEngine::new(Profile::with_names(NAMES));
    let long = long_attribution();
    for text in [STREAM, long.as_str()] {
        let expected = one_pass(&engine, text);
        assert!(!expected.is_empty());
        for k in boundaries(text) {
            let (head, tail) = text.split_at(k);
            let id = format!("split-{}", k);
            assert_eq!(streamed(&mut engine, &id, [head, tail]), expected, "split at {} of {:?}", k, text);
        }
    }
}

#[test]
fn test_no_duplicates_across_windows() {
    let h = Harness::new(Profile::with_names(["Kotori", "Tohka", "Shido"]));
    let mut quotes = QuoteSpanState::new();
    let mut seen = HashSet::new();
    let mut processed = 0;

    let ends = STREAM
        .char_indices()
        .filter(|(_, c)| c.is_whitespace())
        .map(|(i, c)| i + c.len_utf8())
        .chain([STREAM.len()]);

    for end in ends {
        let text = &STREAM[..end];
        quotes.scan(text, false);
        let options = ScanOptions {
            min_index: Some(processed),
            ..ScanOptions::default()
        };
        for m in h.collector().collect(text, &quotes, None, &options).matches {
            assert!(m.char_end() > processed);
            assert!(seen.insert((m.kind, m.char_start)), "re-emitted {:?}", m);
        }
        processed = end;
    }
}

// ============================================================================
// Quote suppression
// ============================================================================

#[test]
fn test_narration_kinds_never_start_inside_quotes() {
    let mut profile = Profile::with_names(["Kotori", "Tohka"]);
    profile.detection.general = true;
    let h = Harness::new(profile);
    let texts = [
        "\"Kotori smiled, Tohka's here,\" Tohka said.",
        "“Tohka nodded.” Kotori stepped back.",
        "«Kotori's bag» Tohka laughed. 「Tohka sighed」",
        "\"Unclosed, Kotori nodded and Tohka's",
    ];

    for text in texts {
        let mut quotes = QuoteSpanState::new();
        quotes.scan(text, true);
        let outcome = h.collector().collect(text, &quotes, None, &ScanOptions::default());
        for m in outcome.matches.iter().filter(|m| m.kind.is_narration_only()) {
            assert!(!quotes.is_quoted(m.char_start), "{:?} inside quotes in {:?}", m, text);
        }
    }
}

// ============================================================================
// Pronoun gating
// ============================================================================

#[test]
fn test_no_subject_no_pronouns() {
    let h = Harness::new(Profile::with_names(["Kotori"]));
    let texts = [
        "She smiled.",
        "Kotori: hi. He nodded. They laughed.",
        "Tohka waved. She stepped closer. \"He said,\" she said.",
    ];
    for text in texts {
        let outcome = h.scan(text, &ScanOptions::default());
        assert_eq!(outcome.count(MatchKind::Pronoun), 0, "{}", text);
    }

    let with_subject = ScanOptions {
        last_subject: Some("Kotori".to_string()),
        ..ScanOptions::default()
    };
    assert_eq!(h.scan("She smiled.", &with_subject).count(MatchKind::Pronoun), 1);
}

// ============================================================================
// Fuzzy floor
// ============================================================================

#[test]
fn test_fuzzy_floor() {
    let mut profile = Profile::with_names(["Alice", "Kotori"]);
    profile.fuzzy_tolerance = FuzzyTolerance::Auto;
    let h = Harness::new(profile);

    for text in ["Xyzzy reached out.", "Bob smiled.", "Zelda: hello", "Kotaro nodded."] {
        let outcome = h.scan(text, &ScanOptions::default());
        assert!(outcome.matches.is_empty(), "{} produced {:?}", text, outcome.matches);
    }
}

#[test]
fn test_fuzzy_threshold_respected() {
    let identities = Profile::with_names(["Alexandra"]).identities();
    let strict = FuzzyTolerance::explicit(FuzzyThreshold {
        max_distance: Some(1),
        min_score: 0.9,
        min_overlap: 0.75,
    })
    .unwrap();
    let resolver = NameResolver::new(&identities, strict);

    assert!(!resolver.resolve("Alxandr").is_resolved());
    let near = resolver.resolve("Alexandar");
    assert!(!near.is_resolved() || near.score.unwrap_or(0.0) >= 0.9);
    assert_eq!(resolver.resolve("Alexandra").method, ResolutionMethod::Direct);
}

// ============================================================================
// Scoring properties
// ============================================================================

fn bare(name: &str, start: usize) -> DetectionMatch {
    DetectionMatch {
        raw: name.to_string(),
        name: name.to_string(),
        kind: MatchKind::Name,
        char_start: start,
        char_len: name.len(),
        token_start: None,
        token_len: None,
        priority: 0.0,
        fallback: false,
        resolution: None,
    }
}

#[test]
fn test_roster_member_never_scores_lower() {
    let scorer = AttributionScorer::new(ScoringConfig::default());
    let roster: HashSet<String> = ["kotori".to_string()].into_iter().collect();

    for start in [0, 10, 50, 99] {
        let member = scorer.score(&bare("Kotori", start), 100, &roster);
        let outsider = scorer.score(&bare("Tohkaa", start), 100, &roster);
        assert!(member.score >= outsider.score);
        assert!(member.roster_member);
    }
}

#[test]
fn test_scene_tie_break_is_lexical() {
    let scorer = AttributionScorer::new(ScoringConfig::position_blind());
    for (a, b) in [("tohka", "Kotori"), ("Kotori", "tohka")] {
        let matches = vec![bare(a, 0), bare(b, 0)];
        let scene = scorer.rank_scene(&matches, 10, &(), ScoreFilter::default());
        let names: Vec<&str> = scene.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["Kotori", "tohka"]);
    }
}
