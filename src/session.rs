//! AttributionEngine: one explicit engine session per chat
//!
//! Owns all mutable state: the compiled-matcher cache, per-buffer streaming
//! state, scene roster, decision log and switch gate. Nothing is global, so
//! several chats (or tests) never share state by accident.
//!
//! # Streaming
//! - `append` - pure-append path for token-by-token generation
//! - `update_buffer` - full text each call; a change inside the settled
//!   prefix (edit, trim, swipe) forces a reset before scanning
//! - `end_buffer` - flushes the unsettled tail, ranks the scene and advances
//!   the roster one turn
//!
//! Only settled text is scanned: everything up to the last whitespace. The
//! trailing word may still grow ("ran" into "ransacked"), so matches touching
//! it wait for the next chunk or for `end_buffer`. Quote state and token
//! offsets grow with the settled text, so each update costs time in the new
//! text plus the matchers' reach, not in the buffer length.
//!
//! `analyze` is the stateless one-shot path with per-phase timings.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use crate::error::{CompileError, EngineError};
use crate::scanner::{
    DetectionMatch, MatchCollector, MatchKind, MatcherSet, NameResolver, Profile, QuoteSpanState,
    ScanOptions, TokenCursor, TokenProjector, Tokenize, TokenizedText, VetoHit,
};
use crate::scene::{
    member_key, DecisionEvent, DecisionLog, LastMatch, RosterChange, SceneRoster, SkipReason,
};
use crate::scoring::{AttributionScorer, SceneEntry, ScoreFilter, ScoredMatch, ScoringConfig};

/// Compiled sets kept for recently used profiles
const MATCHER_CACHE_SIZE: usize = 4;

/// Bytes compared at each end of the settled prefix on `update_buffer`
const CONTINUITY_WINDOW: usize = 64;

/// Kinds that establish the current subject for pronouns
const SUBJECT_KINDS: [MatchKind; 3] = [MatchKind::Speaker, MatchKind::Attribution, MatchKind::Action];

/// First pass; pronouns need the subjects these produce
const DIRECT_KINDS: [MatchKind; 7] = [
    MatchKind::Speaker,
    MatchKind::Attribution,
    MatchKind::Action,
    MatchKind::Vocative,
    MatchKind::Possessive,
    MatchKind::Name,
    MatchKind::Veto,
];

/// Wall-clock milliseconds for decision timestamps
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// End of the last whitespace char. Text past it is a word still streaming.
fn settled_len(text: &str) -> usize {
    text.char_indices()
        .rev()
        .find(|(_, c)| c.is_whitespace())
        .map_or(0, |(i, c)| i + c.len_utf8())
}

// =============================================================================
// Matcher cache
// =============================================================================

/// Compiled sets keyed by profile fingerprint, most recent last
#[derive(Debug, Default)]
pub struct MatcherCache {
    entries: Vec<Arc<MatcherSet>>,
    compiles: u64,
    hits: u64,
}

impl MatcherCache {
    /// Shared set for `profile`; the flag is true when it had to compile
    pub fn get_or_compile(&mut self, profile: &Profile) -> (Arc<MatcherSet>, bool) {
        let fingerprint = profile.pattern_fingerprint();
        if let Some(pos) = self.entries.iter().position(|s| s.fingerprint() == fingerprint) {
            let set = self.entries.remove(pos);
            self.entries.push(Arc::clone(&set));
            self.hits += 1;
            return (set, false);
        }

        let set = Arc::new(MatcherSet::compile(profile));
        self.compiles += 1;
        self.entries.push(Arc::clone(&set));
        if self.entries.len() > MATCHER_CACHE_SIZE {
            self.entries.remove(0);
        }
        (set, true)
    }

    pub fn compile_count(&self) -> u64 {
        self.compiles
    }

    pub fn hit_count(&self) -> u64 {
        self.hits
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

// =============================================================================
// Types
// =============================================================================

/// Per-buffer streaming state (one in-flight message)
#[derive(Debug, Clone, Default)]
pub struct StreamBuffer {
    text: String,
    /// Covers `text[..processed]`
    quotes: QuoteSpanState,
    /// Settled prefix already scanned; matches end at or before it
    processed: usize,
    /// Token offsets over `text[..processed]`
    projector: TokenProjector,
    cursor: TokenCursor,
    last_subject: Option<String>,
    matches: Vec<DetectionMatch>,
    /// (kind, name offset) of every reported match
    reported: HashSet<(MatchKind, usize)>,
    vetoed: Option<VetoHit>,
    /// (name key, kind, offset) winners already decided in this buffer
    decided: HashSet<(String, MatchKind, usize)>,
}

impl StreamBuffer {
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn processed(&self) -> usize {
        self.processed
    }

    pub fn last_subject(&self) -> Option<&str> {
        self.last_subject.as_deref()
    }

    pub fn matches(&self) -> &[DetectionMatch] {
        &self.matches
    }

    pub fn vetoed(&self) -> Option<&VetoHit> {
        self.vetoed.as_ref()
    }

    pub fn quotes(&self) -> &QuoteSpanState {
        &self.quotes
    }

    /// True if `text` still carries the settled prefix. Only its first and
    /// last `CONTINUITY_WINDOW` bytes are compared; the unsettled tail may
    /// change freely.
    fn continues(&self, text: &str) -> bool {
        let settled = self.processed;
        if settled == 0 {
            return true;
        }
        if text.len() < settled || !text.is_char_boundary(settled) {
            return false;
        }
        let (old, new) = (self.text.as_bytes(), text.as_bytes());
        let head = CONTINUITY_WINDOW.min(settled);
        let tail = settled.saturating_sub(CONTINUITY_WINDOW);
        old[..head] == new[..head] && old[tail..settled] == new[tail..settled]
    }
}

/// Result of one streaming update
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamUpdate {
    /// A discontinuity forced a full reset first
    pub reset: bool,
    pub new_matches: Vec<DetectionMatch>,
    pub winner: Option<ScoredMatch>,
    pub decision: Option<DecisionEvent>,
    pub vetoed: bool,
    pub processed: usize,
    /// Last token whose text is settled
    pub resume_token: Option<usize>,
}

/// Final state of a buffer handed back by `end_buffer`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferSummary {
    pub text_len: usize,
    pub matches: Vec<DetectionMatch>,
    pub winner: Option<ScoredMatch>,
    pub scene: Vec<SceneEntry>,
    pub roster_change: RosterChange,
    pub vetoed: bool,
    /// Gate decision for matches found in the flushed tail
    pub decision: Option<DecisionEvent>,
}

/// Timing statistics for each analysis phase
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanTimings {
    pub total_us: u64,
    pub quote_us: u64,
    pub token_us: u64,
    pub collect_us: u64,
    pub score_us: u64,
}

/// Aggregate statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanStats {
    pub timings: ScanTimings,
    pub matches_found: usize,
    pub by_kind: BTreeMap<MatchKind, usize>,
    pub fuzzy_rescues: usize,
    pub vetoed: bool,
    pub compile_errors: usize,
}

/// One-shot analysis result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    pub matches: Vec<DetectionMatch>,
    pub winner: Option<ScoredMatch>,
    pub scene: Vec<SceneEntry>,
    pub veto: Option<VetoHit>,
    pub stats: ScanStats,
}

// =============================================================================
// Engine
// =============================================================================

pub struct AttributionEngine {
    profile: Profile,
    cache: MatcherCache,
    matchers: Arc<MatcherSet>,
    resolver: NameResolver,
    scorer: AttributionScorer,
    tokenizer: Option<Box<dyn Tokenize>>,
    buffers: HashMap<String, StreamBuffer>,
    roster: SceneRoster,
    log: DecisionLog,
    /// (name key, timestamp) of the last switch
    last_switch: Option<(String, i64)>,
}

impl Default for AttributionEngine {
    fn default() -> Self {
        Self::new(Profile::default())
    }
}

impl AttributionEngine {
    pub fn new(profile: Profile) -> Self {
        let profile = profile.normalized();
        let mut cache = MatcherCache::default();
        let (matchers, _) = cache.get_or_compile(&profile);
        Self {
            resolver: NameResolver::from_profile(&profile),
            scorer: AttributionScorer::new(ScoringConfig::from(&profile)),
            roster: SceneRoster::new(profile.scene_roster_ttl),
            log: DecisionLog::new(profile.decision_log_capacity),
            matchers,
            cache,
            tokenizer: None,
            buffers: HashMap::new(),
            last_switch: None,
            profile,
        }
    }

    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        Ok(Self::new(Profile::from_json(json)?))
    }

    // ===== Configuration =====

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    /// Swap the profile. Matchers are recompiled only when pattern-shaping
    /// fields changed; returns true when that happened.
    pub fn set_profile(&mut self, profile: Profile) -> bool {
        let profile = profile.normalized();
        let (matchers, compiled) = self.cache.get_or_compile(&profile);
        if compiled && !matchers.errors().is_empty() {
            tracing::warn!(errors = matchers.errors().len(), "profile compiled with errors");
        }
        self.matchers = matchers;
        self.resolver = NameResolver::from_profile(&profile);
        self.scorer = AttributionScorer::new(ScoringConfig::from(&profile));
        self.roster.set_default_ttl(profile.scene_roster_ttl);
        self.log.set_capacity(profile.decision_log_capacity);
        self.profile = profile;
        compiled
    }

    pub fn set_tokenizer(&mut self, tokenizer: Option<Box<dyn Tokenize>>) {
        self.tokenizer = tokenizer;
    }

    pub fn matchers(&self) -> Arc<MatcherSet> {
        Arc::clone(&self.matchers)
    }

    pub fn matcher_cache(&self) -> &MatcherCache {
        &self.cache
    }

    /// Problems from the current compilation, reported once per compile
    pub fn compile_errors(&self) -> &[CompileError] {
        self.matchers.errors()
    }

    /// False when every roster name is ignored (detection fully disabled)
    pub fn has_name_matchers(&self) -> bool {
        self.matchers.has_name_matchers()
    }

    pub fn resolver(&self) -> &NameResolver {
        &self.resolver
    }

    // ===== State access =====

    pub fn roster(&self) -> &SceneRoster {
        &self.roster
    }

    pub fn roster_mut(&mut self) -> &mut SceneRoster {
        &mut self.roster
    }

    pub fn decision_log(&self) -> &DecisionLog {
        &self.log
    }

    pub fn buffer(&self, id: &str) -> Option<&StreamBuffer> {
        self.buffers.get(id)
    }

    pub fn reset_buffer(&mut self, id: &str) -> bool {
        self.buffers.remove(id).is_some()
    }

    /// New conversation: forget buffers, roster, log and switch history
    pub fn reset_scene(&mut self) {
        self.buffers.clear();
        self.roster.reset();
        self.log.clear();
        self.last_switch = None;
    }

    // ===== One-shot =====

    /// Stateless scan + score of `text`; the roster only contributes bonuses.
    pub fn analyze(&self, text: &str, options: &ScanOptions) -> Analysis {
        self.analyze_inner(text, options, None)
    }

    /// `analyze` with offsets from an external tokenizer run by the host
    pub fn analyze_tokenized(&self, text: &str, options: &ScanOptions, tokens: &TokenizedText) -> Analysis {
        self.analyze_inner(text, options, Some(tokens))
    }

    fn analyze_inner(&self, text: &str, options: &ScanOptions, tokens: Option<&TokenizedText>) -> Analysis {
        let overall_start = instant::Instant::now();
        let mut stats = ScanStats::default();

        let quote_start = instant::Instant::now();
        let mut quotes = QuoteSpanState::new();
        quotes.scan(text, true);
        stats.timings.quote_us = quote_start.elapsed().as_micros() as u64;

        let token_start = instant::Instant::now();
        let projector = match tokens {
            Some(tokens) => TokenProjector::new(text, Some(tokens)),
            None => self.project(text),
        };
        stats.timings.token_us = token_start.elapsed().as_micros() as u64;

        let collect_start = instant::Instant::now();
        let outcome = MatchCollector::new(&self.matchers, &self.profile, &self.resolver)
            .collect(text, &quotes, Some(&projector), options);
        stats.timings.collect_us = collect_start.elapsed().as_micros() as u64;

        let score_start = instant::Instant::now();
        let filter = ScoreFilter {
            min_index: options.min_index,
            min_token_index: options.min_token_index,
        };
        let (winner, scene) = if outcome.veto.is_some() {
            (None, Vec::new())
        } else {
            (
                self.scorer
                    .winner(&outcome.matches, text.len(), &self.roster, filter),
                self.scorer
                    .rank_scene(&outcome.matches, text.len(), &self.roster, filter),
            )
        };
        stats.timings.score_us = score_start.elapsed().as_micros() as u64;

        stats.matches_found = outcome.matches.len();
        for m in &outcome.matches {
            *stats.by_kind.entry(m.kind).or_insert(0) += 1;
        }
        stats.fuzzy_rescues = outcome.matches.iter().filter(|m| m.fallback).count();
        stats.vetoed = outcome.veto.is_some();
        stats.compile_errors = self.matchers.errors().len();
        stats.timings.total_us = overall_start.elapsed().as_micros() as u64;

        Analysis {
            matches: outcome.matches,
            winner,
            scene,
            veto: outcome.veto,
            stats,
        }
    }

    // ===== Streaming =====

    /// Append a chunk to buffer `id` and scan only the new text
    pub fn append(&mut self, id: &str, chunk: &str, now: i64) -> StreamUpdate {
        self.append_with(id, chunk, &ScanOptions::default(), now)
    }

    pub fn append_with(&mut self, id: &str, chunk: &str, options: &ScanOptions, now: i64) -> StreamUpdate {
        let mut buffer = self.take_buffer(id);
        buffer.text.push_str(chunk);
        let update = self.advance(&mut buffer, options, now);
        self.buffers.insert(id.to_string(), buffer);
        update
    }

    /// Replace buffer `id` with `full_text`, resetting on discontinuity
    pub fn update_buffer(&mut self, id: &str, full_text: &str, now: i64) -> StreamUpdate {
        self.update_buffer_with(id, full_text, &ScanOptions::default(), now)
    }

    pub fn update_buffer_with(
        &mut self,
        id: &str,
        full_text: &str,
        options: &ScanOptions,
        now: i64,
    ) -> StreamUpdate {
        let mut buffer = self.take_buffer(id);
        let mut reset = false;
        if !buffer.continues(full_text) {
            tracing::debug!(buffer = id, old_len = buffer.text.len(), new_len = full_text.len(), "discontinuity, buffer reset");
            buffer = self.fresh_buffer();
            reset = true;
        }
        buffer.text.clear();
        buffer.text.push_str(full_text);

        let mut update = self.advance(&mut buffer, options, now);
        update.reset = reset;
        self.buffers.insert(id.to_string(), buffer);
        update
    }

    /// Finish buffer `id`: scan the tail held back as unsettled, rank the
    /// scene, advance the roster one turn and drop the buffer state.
    pub fn end_buffer(&mut self, id: &str, now: i64) -> Option<BufferSummary> {
        let mut buffer = self.buffers.remove(id)?;
        let text_len = buffer.text.len();
        let flush = self.scan_to(&mut buffer, &ScanOptions::default(), text_len, now);
        let vetoed = buffer.vetoed.is_some();

        let (winner, scene) = if vetoed {
            (None, Vec::new())
        } else {
            (
                self.scorer
                    .winner(&buffer.matches, text_len, &self.roster, ScoreFilter::default()),
                self.scorer
                    .rank_scene(&buffer.matches, text_len, &self.roster, ScoreFilter::default()),
            )
        };
        let mentioned: Vec<&str> = scene.iter().map(|e| e.name.as_str()).collect();
        let roster_change = self.roster.end_turn(&mentioned, now);

        Some(BufferSummary {
            text_len,
            winner,
            roster_change,
            vetoed,
            matches: buffer.matches,
            scene,
            decision: flush.decision,
        })
    }

    fn take_buffer(&mut self, id: &str) -> StreamBuffer {
        match self.buffers.remove(id) {
            Some(buffer) => buffer,
            None => self.fresh_buffer(),
        }
    }

    /// New buffers inherit the last confirmed subject for pronouns
    fn fresh_buffer(&self) -> StreamBuffer {
        StreamBuffer {
            last_subject: self
                .roster
                .last_match()
                .filter(|m| SUBJECT_KINDS.contains(&m.kind))
                .map(|m| m.name.clone()),
            ..StreamBuffer::default()
        }
    }

    fn project(&self, text: &str) -> TokenProjector {
        match &self.tokenizer {
            Some(tokenizer) => TokenProjector::from_tokenizer(text, tokenizer.as_ref()),
            None => TokenProjector::new(text, None),
        }
    }

    /// Scan what `buffer` settled since the last call, then score and gate
    fn advance(&mut self, buffer: &mut StreamBuffer, options: &ScanOptions, now: i64) -> StreamUpdate {
        let settled = settled_len(&buffer.text);
        self.scan_to(buffer, options, settled, now)
    }

    /// Scan `buffer.text[processed..settled]` with the matchers' reach of
    /// left context. Only matches ending at or before `settled` exist in that
    /// slice, so nothing is reported on a word that may still grow.
    fn scan_to(&mut self, buffer: &mut StreamBuffer, options: &ScanOptions, settled: usize, now: i64) -> StreamUpdate {
        let settled = settled.max(buffer.processed).min(buffer.text.len());
        let text = &buffer.text[..settled];
        buffer.quotes.scan(text, false);
        buffer
            .projector
            .extend(text, buffer.processed, self.tokenizer.as_deref());

        let scan_options = ScanOptions {
            min_index: Some(options.min_index.unwrap_or(0).max(buffer.processed)),
            last_subject: None,
            ..options.clone()
        };
        let collector = MatchCollector::new(&self.matchers, &self.profile, &self.resolver);

        let mut fresh = Vec::new();
        let mut decision = None;
        if buffer.vetoed.is_none() {
            let direct = collector.collect_kinds(
                text,
                &buffer.quotes,
                Some(&buffer.projector),
                &scan_options,
                &DIRECT_KINDS,
            );
            if let Some(hit) = direct.veto {
                tracing::debug!(phrase = %hit.phrase, at = hit.char_start, "buffer vetoed");
                let event = DecisionEvent::veto(&hit.phrase, hit.char_start, now);
                self.log.push(event.clone());
                decision = Some(event);
                buffer.vetoed = Some(hit);
            } else {
                fresh = direct.matches;
                let pronouns = pronoun_pass(&collector, buffer, text, &scan_options, &fresh);
                fresh.extend(pronouns);
                fresh.retain(|m| !buffer.reported.contains(&(m.kind, m.char_start)));
                fresh.sort_by(|a, b| a.char_start.cmp(&b.char_start).then(a.kind.cmp(&b.kind)));
            }
        }

        if let Some(subject) = fresh
            .iter()
            .filter(|m| SUBJECT_KINDS.contains(&m.kind))
            .max_by_key(|m| m.char_start)
        {
            buffer.last_subject = Some(subject.name.clone());
        }

        buffer
            .reported
            .extend(fresh.iter().map(|m| (m.kind, m.char_start)));
        buffer.matches.extend(fresh.iter().cloned());
        buffer.processed = settled;
        buffer.cursor.advance(&buffer.projector, settled);

        let winner = if buffer.vetoed.is_some() {
            None
        } else {
            self.scorer
                .winner(&buffer.matches, buffer.text.len(), &self.roster, ScoreFilter::default())
        };
        if decision.is_none() {
            if let Some(w) = &winner {
                decision = Some(self.gate(buffer, w, now));
            }
        }

        StreamUpdate {
            reset: false,
            new_matches: fresh,
            winner,
            decision,
            vetoed: buffer.vetoed.is_some(),
            processed: buffer.processed,
            resume_token: buffer.cursor.last_token,
        }
    }

    /// Decide whether the winner triggers a switch. Repeats of an already
    /// decided winner are returned but not logged.
    fn gate(&mut self, buffer: &mut StreamBuffer, winner: &ScoredMatch, now: i64) -> DecisionEvent {
        let d = &winner.detection;
        let key = member_key(&d.name);
        let identity = (key.clone(), d.kind, d.char_start);

        if buffer.decided.contains(&identity) {
            return DecisionEvent::skipped(&d.name, d.kind, d.char_start, now, SkipReason::RepeatSuppressed)
                .with_token_index(d.token_start);
        }

        let cooldown = self.profile.global_cooldown_ms;
        let event = match &self.last_switch {
            Some((last, _)) if *last == key => {
                buffer.decided.insert(identity);
                DecisionEvent::skipped(&d.name, d.kind, d.char_start, now, SkipReason::AlreadyActive)
            }
            Some((_, at)) if cooldown > 0 && now - at < cooldown => {
                DecisionEvent::skipped(&d.name, d.kind, d.char_start, now, SkipReason::Cooldown)
            }
            _ => {
                buffer.decided.insert(identity);
                self.last_switch = Some((key, now));
                self.roster.touch(&d.name, now);
                self.roster.record_match(LastMatch {
                    name: d.name.clone(),
                    kind: d.kind,
                    char_index: d.char_start,
                });
                DecisionEvent::switch(&d.name, d.kind, d.char_start, now)
            }
        }
        .with_token_index(d.token_start);

        tracing::debug!(
            name = %d.name,
            kind = d.kind.as_str(),
            decision = ?event.kind,
            reason = event.reason.map(|r| r.as_str()),
            score = winner.score,
            "switch gate"
        );
        self.log.push(event.clone());
        event
    }
}

/// Second pass: each pronoun goes to the latest subject-kind mention before
/// it, or the buffer's carried subject. No subject at all, no pronouns.
fn pronoun_pass(
    collector: &MatchCollector<'_>,
    buffer: &StreamBuffer,
    text: &str,
    options: &ScanOptions,
    fresh: &[DetectionMatch],
) -> Vec<DetectionMatch> {
    let anchors: Vec<&DetectionMatch> = buffer
        .matches
        .iter()
        .chain(fresh.iter())
        .filter(|m| SUBJECT_KINDS.contains(&m.kind))
        .collect();
    let fallback = buffer.last_subject.clone().or_else(|| {
        anchors
            .iter()
            .max_by_key(|m| m.char_start)
            .map(|m| m.name.clone())
    });
    let Some(fallback) = fallback else {
        return Vec::new();
    };

    let options = ScanOptions {
        last_subject: Some(fallback),
        ..options.clone()
    };
    let outcome = collector.collect_kinds(
        text,
        &buffer.quotes,
        Some(&buffer.projector),
        &options,
        &[MatchKind::Pronoun],
    );

    outcome
        .matches
        .into_iter()
        .filter_map(|mut m| {
            let anchor = anchors
                .iter()
                .filter(|a| a.char_start < m.char_start)
                .max_by_key(|a| a.char_start);
            match anchor {
                Some(anchor) => {
                    m.name = anchor.name.clone();
                    m.resolution = anchor.resolution.clone();
                }
                // Only the carried subject can explain a pronoun before any anchor
                None if buffer.last_subject.is_none() => return None,
                None => {}
            }
            Some(m)
        })
        .collect()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::WhitespaceTokenizer;
    use crate::scene::{DecisionKind, RosterUpdate};
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Records the length of every slice it is asked to tokenize
    #[derive(Clone, Default)]
    struct Recording(Rc<RefCell<Vec<usize>>>);

    impl Tokenize for Recording {
        fn tokenize(&self, text: &str) -> TokenizedText {
            self.0.borrow_mut().push(text.len());
            WhitespaceTokenizer.tokenize(text)
        }
    }

    fn engine(names: &[&str]) -> AttributionEngine {
        AttributionEngine::new(Profile::with_names(names))
    }

    fn stream(engine: &mut AttributionEngine, id: &str, text: &str) -> Vec<StreamUpdate> {
        text.split_inclusive(' ')
            .enumerate()
            .map(|(i, chunk)| engine.append(id, chunk, i as i64))
            .collect()
    }

    // -------------------------------------------------------------------------
    // Requirement 1: one-shot analysis
    // -------------------------------------------------------------------------
    #[test]
    fn test_analyze() {
        let engine = engine(&["Kotori", "Shido"]);
        let analysis = engine.analyze("Kotori: Hello there.", &ScanOptions::default());

        assert_eq!(analysis.stats.matches_found, 1);
        assert_eq!(analysis.stats.by_kind.get(&MatchKind::Speaker), Some(&1));
        assert_eq!(analysis.stats.compile_errors, 0);
        assert!(!analysis.stats.vetoed);
        assert_eq!(analysis.winner.unwrap().detection.name, "Kotori");
        assert_eq!(analysis.scene.len(), 1);
    }

    #[test]
    fn test_analyze_with_host_tokens() {
        let engine = engine(&["Kotori"]);
        let text = "Well. Kotori smiled.";
        let tokens = TokenizedText {
            ids: vec![1, 2, 3, 4, 5],
            offsets: vec![(0, 4), (4, 5), (6, 12), (13, 19), (19, 20)],
            chunks: vec!["Well".into(), ".".into(), "Kotori".into(), "smiled".into(), ".".into()],
        };
        let analysis = engine.analyze_tokenized(text, &ScanOptions::default(), &tokens);
        let winner = analysis.winner.unwrap().detection;
        assert_eq!(winner.kind, MatchKind::Action);
        assert_eq!(winner.token_start, Some(2));
    }

    #[test]
    fn test_analyze_veto_has_no_winner() {
        let engine = engine(&["Kotori"]);
        let analysis = engine.analyze("OOC: Kotori: hi", &ScanOptions::default());
        assert!(analysis.veto.is_some());
        assert!(analysis.winner.is_none());
    }

    #[test]
    fn test_analyze_veto_suppresses_detection() {
        let engine = engine(&["Kotori"]);
        let analysis = engine.analyze("(OOC: brb)\nKotori: hi", &ScanOptions::default());
        assert!(analysis.stats.vetoed);
        assert!(analysis.matches.is_empty());
        assert!(analysis.scene.is_empty());
        assert_eq!(analysis.stats.matches_found, 0);
    }

    #[test]
    fn test_stats_keys_are_camel_case() {
        let engine = engine(&["Kotori"]);
        let analysis = engine.analyze("Kotori: hi", &ScanOptions::default());
        let json = serde_json::to_value(&analysis.stats).unwrap();

        assert!(json.get("matchesFound").is_some());
        assert!(json.get("byKind").is_some());
        assert!(json.get("fuzzyRescues").is_some());
        assert!(json.get("compileErrors").is_some());
        assert!(json["timings"].get("totalUs").is_some());
        assert!(json["timings"].get("collectUs").is_some());
        assert!(json.get("matches_found").is_none());
        assert!(json["timings"].get("total_us").is_none());
    }

    // -------------------------------------------------------------------------
    // Requirement 2: streaming switches
    // -------------------------------------------------------------------------
    #[test]
    fn test_streaming_switches() {
        let mut engine = engine(&["Kotori", "Tohka"]);
        let updates = stream(&mut engine, "m1", "Tohka stepped forward.\nKotori: Wait!");

        assert!(updates[0].winner.is_none());
        assert_eq!(updates[1].new_matches.len(), 1);
        assert_eq!(updates[1].decision.as_ref().unwrap().kind, DecisionKind::Switch);
        assert_eq!(updates[2].decision.as_ref().unwrap().name, "Kotori");
        assert_eq!(updates[2].decision.as_ref().unwrap().kind, DecisionKind::Switch);

        let last = updates.last().unwrap().decision.as_ref().unwrap();
        assert_eq!(last.reason, Some(SkipReason::RepeatSuppressed));

        let switches: Vec<_> = engine
            .decision_log()
            .switches()
            .map(|e| e.name.as_str())
            .collect();
        assert_eq!(switches, vec!["Tohka", "Kotori"]);
        assert_eq!(engine.decision_log().len(), 2);
        assert!(engine.roster().is_active("Tohka"));
    }

    #[test]
    fn test_append_never_reemits() {
        let mut engine = engine(&["Kotori", "Tohka"]);
        let updates = stream(&mut engine, "m1", "Kotori: hi.\nTohka stepped in.\nKotori: bye.");
        let total: usize = updates.iter().map(|u| u.new_matches.len()).sum();
        let buffer = engine.buffer("m1").unwrap();
        assert_eq!(total, buffer.matches().len());
        assert_eq!(total, 3);
        // "bye." may still grow
        assert_eq!(buffer.processed(), buffer.text().len() - "bye.".len());
    }

    #[test]
    fn test_half_streamed_word_is_held_back() {
        let mut engine = engine(&["Tohka"]);
        let first = engine.append("m", "Tohka ran", 0);
        assert!(first.new_matches.is_empty());
        assert_eq!(first.processed, "Tohka ".len());

        let second = engine.append("m", "sacked the room.", 1);
        assert!(second.new_matches.is_empty());
        assert!(second.winner.is_none());
        assert!(second.decision.is_none());

        let summary = engine.end_buffer("m", 2).unwrap();
        assert!(summary.matches.is_empty());
        assert!(engine
            .analyze("Tohka ransacked the room.", &ScanOptions::default())
            .matches
            .is_empty());
        assert!(engine.decision_log().is_empty());
    }

    #[test]
    fn test_end_buffer_flushes_tail() {
        let mut engine = engine(&["Kotori"]);
        let update = engine.update_buffer("m", "Kotori smiled", 0);
        assert!(update.new_matches.is_empty());

        let summary = engine.end_buffer("m", 1).unwrap();
        assert_eq!(summary.matches.len(), 1);
        assert_eq!(summary.matches[0].kind, MatchKind::Action);
        assert_eq!(summary.winner.unwrap().detection.name, "Kotori");
        assert_eq!(summary.decision.unwrap().kind, DecisionKind::Switch);
        assert!(engine.roster().is_active("Kotori"));
    }

    #[test]
    fn test_streaming_tokenizes_each_byte_once() {
        let mut engine = engine(&["Kotori", "Tohka"]);
        let seen = Recording::default();
        engine.set_tokenizer(Some(Box::new(seen.clone())));

        let text = "Tohka stepped forward. Kotori smiled at her and waved. ";
        let updates = stream(&mut engine, "m", text);
        let chunks: Vec<usize> = text.split_inclusive(' ').map(str::len).collect();
        assert_eq!(*seen.0.borrow(), chunks);
        assert_eq!(updates.last().unwrap().resume_token, Some(8));
        assert_eq!(engine.buffer("m").unwrap().matches().len(), 2);
    }

    #[test]
    fn test_resume_token_tracks_settled_text() {
        let mut engine = engine(&["Tohka"]);
        let update = engine.append("m", "Tohka step", 0);
        assert_eq!(update.resume_token, Some(0));
        let update = engine.append("m", "ped ", 1);
        assert_eq!(update.resume_token, Some(1));
    }

    // -------------------------------------------------------------------------
    // Requirement 3: discontinuity forces a reset
    // -------------------------------------------------------------------------
    #[test]
    fn test_update_buffer_discontinuity() {
        let mut engine = engine(&["Kotori", "Shido"]);
        assert!(!engine.update_buffer("a", "Kotori: hi", 0).reset);
        let grown = engine.update_buffer("a", "Kotori: hi there", 1);
        assert!(!grown.reset);
        assert!(grown.new_matches.is_empty());

        // Edits inside the unsettled tail are not a discontinuity
        let retyped = engine.update_buffer("a", "Kotori: hi thereabouts", 2);
        assert!(!retyped.reset);

        let swiped = engine.update_buffer("a", "Shido: yo", 3);
        assert!(swiped.reset);
        assert_eq!(swiped.new_matches.len(), 1);
        assert_eq!(swiped.new_matches[0].name, "Shido");
        assert_eq!(engine.buffer("a").unwrap().matches().len(), 1);
    }

    // -------------------------------------------------------------------------
    // Requirement 4: veto
    // -------------------------------------------------------------------------
    #[test]
    fn test_vetoed_buffer_collects_nothing() {
        let mut engine = engine(&["Kotori", "Tohka"]);
        let update = engine.update_buffer("b", "(OOC: brb)\nKotori: hi ", 0);
        assert!(update.vetoed);
        assert!(update.new_matches.is_empty());

        engine.append("b", "\nTohka stepped in. ", 1);
        let summary = engine.end_buffer("b", 2).unwrap();
        assert!(summary.matches.is_empty());
        assert!(summary.scene.is_empty());
        assert!(summary.winner.is_none());
    }

    #[test]
    fn test_veto_stops_winners() {
        let mut engine = engine(&["Kotori", "Tohka"]);
        let first = engine.update_buffer("b", "(OOC: pause) ", 0);
        assert!(first.vetoed);
        assert_eq!(first.decision.unwrap().kind, DecisionKind::Veto);

        let later = engine.append("b", "Kotori: hi", 1);
        assert!(later.vetoed);
        assert!(later.winner.is_none());
        assert!(later.decision.is_none());
        assert_eq!(engine.decision_log().len(), 1);

        let summary = engine.end_buffer("b", 2).unwrap();
        assert!(summary.vetoed);
        assert!(engine.roster().is_empty());
    }

    // -------------------------------------------------------------------------
    // Requirement 5: switch gate reasons
    // -------------------------------------------------------------------------
    #[test]
    fn test_already_active() {
        let mut engine = engine(&["Kotori"]);
        engine.update_buffer("a", "Kotori: hi", 0);
        engine.end_buffer("a", 1);

        let update = engine.update_buffer("b", "Kotori: again", 2);
        assert_eq!(update.decision.unwrap().reason, Some(SkipReason::AlreadyActive));
        let update = engine.append("b", " and again", 3);
        assert_eq!(update.decision.unwrap().reason, Some(SkipReason::RepeatSuppressed));
        assert_eq!(engine.decision_log().len(), 2);
    }

    #[test]
    fn test_cooldown() {
        let mut profile = Profile::with_names(["Kotori", "Tohka"]);
        profile.global_cooldown_ms = 1000;
        let mut engine = AttributionEngine::new(profile);

        engine.update_buffer("a", "Kotori: hi", 0);
        engine.end_buffer("a", 10);

        let early = engine.update_buffer("b", "Tohka: yo", 500);
        assert_eq!(early.decision.unwrap().reason, Some(SkipReason::Cooldown));

        let later = engine.update_buffer("b", "Tohka: yo there", 1500);
        assert_eq!(later.decision.unwrap().kind, DecisionKind::Switch);
        assert_eq!(engine.roster().last_match().unwrap().name, "Tohka");
    }

    // -------------------------------------------------------------------------
    // Requirement 6: pronouns follow the latest subject
    // -------------------------------------------------------------------------
    #[test]
    fn test_pronoun_follows_subject() {
        let mut engine = engine(&["Tohka", "Kotori"]);
        let update = engine.update_buffer("a", "Tohka stepped in. She smiled. ", 0);
        let pronoun = update
            .new_matches
            .iter()
            .find(|m| m.kind == MatchKind::Pronoun)
            .unwrap();
        assert_eq!(pronoun.name, "Tohka");
        assert_eq!(pronoun.raw, "She");
    }

    #[test]
    fn test_no_subject_no_pronoun() {
        let mut engine = engine(&["Tohka"]);
        let update = engine.update_buffer("a", "She smiled. He nodded.", 0);
        assert!(update.new_matches.is_empty());
    }

    #[test]
    fn test_subject_carries_into_next_buffer() {
        let mut engine = engine(&["Tohka"]);
        engine.update_buffer("a", "Tohka stepped in.", 0);
        engine.end_buffer("a", 1);
        let update = engine.update_buffer("b", "She smiled. ", 2);
        assert_eq!(update.new_matches.len(), 1);
        assert_eq!(update.new_matches[0].name, "Tohka");
    }

    // -------------------------------------------------------------------------
    // Requirement 7: end of turn drives roster decay
    // -------------------------------------------------------------------------
    #[test]
    fn test_end_buffer_decays_roster() {
        let mut profile = Profile::with_names(["Kotori", "Tohka"]);
        profile.scene_roster_ttl = Some(1);
        let mut engine = AttributionEngine::new(profile);

        engine.update_buffer("a", "Kotori: hi. Tohka stepped in.", 0);
        let summary = engine.end_buffer("a", 1).unwrap();
        assert_eq!(summary.scene.len(), 2);
        assert!(engine.roster().is_active("Tohka"));

        engine.update_buffer("b", "Kotori: again", 2);
        let summary = engine.end_buffer("b", 3).unwrap();
        assert_eq!(summary.roster_change.left, vec!["Tohka"]);
        assert!(!engine.roster().is_active("Tohka"));
        assert!(engine.roster().is_active("Kotori"));
        assert!(engine.end_buffer("b", 4).is_none());
    }

    #[test]
    fn test_roster_update_feeds_scoring() {
        let mut engine = engine(&["Tohka", "Kotori"]);
        engine.roster_mut().update(RosterUpdate {
            roster: vec!["Kotori".into()],
            updated_at: 0,
            ..RosterUpdate::default()
        });
        // Two weak mentions; the active member wins on roster bonus
        let analysis = engine.analyze("Tohka's bag. Kotori's hat.", &ScanOptions::default());
        assert_eq!(analysis.winner.unwrap().detection.name, "Kotori");
        let analysis = engine.analyze("Kotori's hat. Tohka's bag.", &ScanOptions::default());
        assert_eq!(analysis.winner.unwrap().detection.name, "Kotori");
    }

    // -------------------------------------------------------------------------
    // Requirement 8: matcher cache
    // -------------------------------------------------------------------------
    #[test]
    fn test_matcher_cache() {
        let mut engine = engine(&["Kotori"]);
        let mut reweighted = Profile::with_names(["Kotori"]);
        reweighted.roster_bonus = 10.0;
        assert!(!engine.set_profile(reweighted));

        assert!(engine.set_profile(Profile::with_names(["Tohka"])));
        assert!(!engine.set_profile(Profile::with_names(["Kotori"])));
        assert_eq!(engine.matcher_cache().compile_count(), 2);
        assert_eq!(engine.matcher_cache().len(), 2);
    }

    #[test]
    fn test_degraded_profile_reported() {
        let mut profile = Profile::with_names(["Kotori"]);
        profile.ignore_patterns = vec!["Kotori".into()];
        let engine = AttributionEngine::new(profile);
        assert!(!engine.has_name_matchers());
        assert!(engine.compile_errors().is_empty());
        assert!(engine
            .analyze("Kotori: hi", &ScanOptions::default())
            .matches
            .is_empty());
    }

    #[test]
    fn test_reset_scene() {
        let mut engine = engine(&["Kotori"]);
        engine.update_buffer("a", "Kotori: hi", 0);
        engine.reset_scene();
        assert!(engine.buffer("a").is_none());
        assert!(engine.roster().is_empty());
        assert!(engine.decision_log().is_empty());
    }
}
