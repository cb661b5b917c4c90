//! MatcherSet - compiles a Profile into kind-specific matchers
//!
//! Every roster name and alias (minus the ignore list) is merged into one
//! alternation group, then wrapped in a template per match kind:
//! - Speaker: `Name:` dialogue tags at line start or after a quote/bracket
//! - Attribution / Action: `Name [honorific] [descriptors] [filler] verb`
//! - Pronoun: sentence-initial pronoun + filler + verb
//! - Vocative: `"Name!"`, `..., Name?` address forms
//! - Possessive: `Name's`
//! - Name: bare mention
//! - Veto: plain alternation, suppresses detection
//!
//! Note: Rust regex doesn't support lookaround. Templates never consume past
//! the signal they key on, and word boundaries around the name capture are
//! checked by the collector in post-processing.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::error::CompileError;
use crate::scanner::profile::{MatchKind, Profile};

// ==================== TEMPLATE FRAGMENTS ====================

/// Optional honorific particle glued to a name ("Kotori-san", "琴里様")
const HONORIFIC: &str = r"(?:-(?:san|sama|kun|chan|senpai|sempai|sensei|dono|tan|hime|shi)\b|\s?(?:様|さん|くん|ちゃん|先輩|先生|殿|씨|님|선배))?";

/// Hyphen- or space-joined capitalized continuation ("Maya Ito", "Jean-Luc")
const COMPOUND: &str = r"(?:[-\s](?-i:\p{Lu})[\p{L}\p{M}'’]{0,30}){0,2}";

const POSSESSIVE_TAIL: &str = r"(?:['’]s)?";

/// Up to three comma or parenthetical descriptive clauses
const DESCRIPTORS: &str =
    r"(?:\s{0,3},\s{0,3}[^,.!?;:\n\x22“”«»]{1,60}?\s{0,3},|\s{0,3}\([^()\n]{1,60}\)){0,3}";

/// Bounded run of filler words before the verb
const FILLER: &str = r"(?:,?\s{1,3}[\p{L}\p{M}'’-]{1,40}){0,7}?";
const PRONOUN_FILLER: &str = r"(?:,?\s{1,3}[\p{L}\p{M}'’-]{1,40}){0,3}?";

/// Generic stand-in for a name in fuzzy fallback templates
const GENERIC_CAPITALIZED: &str = r"(?-i:\p{Lu})[\p{L}\p{M}]{1,30}";
const GENERIC_ANY: &str = r"[\p{L}][\p{L}\p{M}]{1,30}";
const GENERIC_CHARS: usize = 31;

// Upper bounds, in chars, of what each fragment can consume. Every
// quantifier above is bounded so a whole template match has a known reach.
const HONORIFIC_REACH: usize = 8;
const COMPOUND_REACH: usize = 2 * (2 + 30);
const POSSESSIVE_REACH: usize = 2;
const DESCRIPTOR_REACH: usize = 3 * (3 + 1 + 3 + 60 + 3 + 1);
const FILLER_REACH: usize = 7 * (1 + 3 + 40);
const PRONOUN_FILLER_REACH: usize = 3 * (1 + 3 + 40);
/// `,?\s{1,3}` before the verb
const VERB_GAP_REACH: usize = 4;
/// Longest UTF-8 encoding of one char
const MAX_CHAR_BYTES: usize = 4;

const REGEX_SIZE_LIMIT: usize = 32 * (1 << 20);

// ==================== ENTRY PARSING ====================

/// Flags collected from `/regex/flags` entries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryFlags {
    pub dot_all: bool,
    pub multi_line: bool,
}

impl EntryFlags {
    fn union(self, other: EntryFlags) -> EntryFlags {
        EntryFlags {
            dot_all: self.dot_all || other.dot_all,
            multi_line: self.multi_line || other.multi_line,
        }
    }
}

/// A roster or veto entry turned into regex source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedEntry {
    pub raw: String,
    pub source: String,
    pub flags: EntryFlags,
    pub is_regex: bool,
}

/// Parse a plain string (escaped) or a `/regex/flags` literal.
pub fn parse_entry(raw: &str) -> Result<ParsedEntry, CompileError> {
    let trimmed = raw.trim();
    if let Some((source, flag_str)) = split_regex_literal(trimmed) {
        let mut flags = EntryFlags::default();
        for flag in flag_str.chars() {
            match flag {
                's' => flags.dot_all = true,
                'm' => flags.multi_line = true,
                // case-insensitivity is always forced; g/y/u/d have no Rust meaning here
                'i' | 'g' | 'y' | 'u' | 'd' => {}
                other => {
                    return Err(CompileError::entry(raw, format!("unsupported flag '{}'", other)))
                }
            }
        }
        if source.is_empty() {
            return Err(CompileError::entry(raw, "empty regex literal"));
        }
        Regex::new(source).map_err(|e| CompileError::entry(raw, e.to_string()))?;
        return Ok(ParsedEntry {
            raw: raw.to_string(),
            source: source.to_string(),
            flags,
            is_regex: true,
        });
    }

    Ok(ParsedEntry {
        raw: raw.to_string(),
        source: regex::escape(trimmed),
        flags: EntryFlags::default(),
        is_regex: false,
    })
}

fn split_regex_literal(text: &str) -> Option<(&str, &str)> {
    let body = text.strip_prefix('/')?;
    let close = body.rfind('/')?;
    let flags = &body[close + 1..];
    if flags.chars().all(|c| c.is_ascii_alphabetic()) {
        Some((&body[..close], flags))
    } else {
        None
    }
}

/// One alternation group over parsed entries, longest first so that
/// leftmost-first matching prefers "Maya Ito" over "Maya".
fn alternation(entries: &[ParsedEntry]) -> Option<(String, EntryFlags)> {
    if entries.is_empty() {
        return None;
    }
    let mut ordered: Vec<&ParsedEntry> = entries.iter().collect();
    ordered.sort_by(|a, b| b.raw.len().cmp(&a.raw.len()));

    let flags = ordered
        .iter()
        .fold(EntryFlags::default(), |acc, e| acc.union(e.flags));
    let body = ordered
        .iter()
        .map(|e| format!("(?:{})", e.source))
        .collect::<Vec<_>>()
        .join("|");
    Some((format!("(?:{})", body), flags))
}

fn word_alternation(words: &[String]) -> Option<String> {
    if words.is_empty() {
        return None;
    }
    let mut ordered: Vec<&String> = words.iter().collect();
    ordered.sort_by(|a, b| b.len().cmp(&a.len()));
    let body = ordered
        .iter()
        .map(|w| regex::escape(w))
        .collect::<Vec<_>>()
        .join("|");
    Some(format!("(?:{})", body))
}

// ==================== TEMPLATES ====================

/// Kind-specific template around a name group (`name` is the capture).
pub fn template(kind: MatchKind, name: &str, verbs: Option<&str>) -> Option<String> {
    let named = format!("(?P<name>{})", name);
    let source = match kind {
        MatchKind::Speaker => format!(
            r"(?:^|[\x22“«「『(\[])[ \t]{{0,8}}[*_]{{0,2}}{named}{HONORIFIC}{COMPOUND}[*_]{{0,2}}[ \t]{{0,8}}[:;：]"
        ),
        MatchKind::Attribution | MatchKind::Action => format!(
            r"{named}{HONORIFIC}{COMPOUND}{POSSESSIVE_TAIL}{DESCRIPTORS}{FILLER},?\s{{1,3}}{verbs}\b",
            verbs = verbs?
        ),
        MatchKind::Pronoun => format!(
            r"(?:^|[.!?…][\x22”»」』]?\s{{1,8}}|[\x22”»」』]\s{{0,8}}|[\r\n]\s{{0,8}}){named}\b{PRONOUN_FILLER},?\s{{1,3}}{verbs}\b",
            verbs = verbs?
        ),
        MatchKind::Vocative => format!(
            r"(?:[\x22“«「『(]|[,，、][ \t]{{0,8}})[ \t]{{0,8}}{named}{HONORIFIC}[ \t]{{0,8}}[,!?.…，！？。]"
        ),
        MatchKind::Possessive => format!(r"{named}{HONORIFIC}(?:['’]s\b|['’](?:\s|$))"),
        MatchKind::Name => format!(r"{named}{HONORIFIC}"),
        MatchKind::Veto => return None,
    };
    Some(source)
}

/// Longest match, in bytes, a template can produce around a name of at most
/// `name` chars followed by a verb of at most `verbs` chars.
pub fn template_reach(kind: MatchKind, name: usize, verbs: usize) -> usize {
    let chars = match kind {
        MatchKind::Speaker => 1 + 8 + 2 + name + HONORIFIC_REACH + COMPOUND_REACH + 2 + 8 + 1,
        MatchKind::Attribution | MatchKind::Action => {
            name + HONORIFIC_REACH
                + COMPOUND_REACH
                + POSSESSIVE_REACH
                + DESCRIPTOR_REACH
                + FILLER_REACH
                + VERB_GAP_REACH
                + verbs
        }
        MatchKind::Pronoun => 10 + name + PRONOUN_FILLER_REACH + VERB_GAP_REACH + verbs,
        MatchKind::Vocative => 9 + 8 + name + HONORIFIC_REACH + 8 + 1,
        MatchKind::Possessive => name + HONORIFIC_REACH + 2,
        MatchKind::Name => name + HONORIFIC_REACH,
        MatchKind::Veto => name,
    };
    chars * MAX_CHAR_BYTES
}

/// Longest literal entry in chars; `None` once any entry is a user regex,
/// whose reach is unknown
fn literal_chars(entries: &[ParsedEntry]) -> Option<usize> {
    entries.iter().try_fold(0, |acc, e| {
        (!e.is_regex).then(|| acc.max(e.raw.trim().chars().count()))
    })
}

fn word_chars(words: &[String]) -> usize {
    words.iter().map(|w| w.chars().count()).max().unwrap_or(0)
}

fn build(kind: MatchKind, source: &str, flags: EntryFlags) -> Result<Regex, CompileError> {
    RegexBuilder::new(source)
        .case_insensitive(true)
        .multi_line(true)
        .dot_matches_new_line(flags.dot_all)
        .size_limit(REGEX_SIZE_LIMIT)
        .build()
        .map_err(|e| CompileError::matcher(kind, e.to_string()))
}

// ==================== MATCHER SET ====================

/// Compiled matchers for one Profile revision, indexed by `MatchKind`.
#[derive(Debug, Clone)]
pub struct MatcherSet {
    matchers: [Option<Regex>; 8],
    fallback: [Option<Regex>; 8],
    effective_patterns: Vec<String>,
    errors: Vec<CompileError>,
    fingerprint: u64,
    /// Longest possible match in bytes; `None` when a regex entry is unbounded
    reach: Option<usize>,
}

impl MatcherSet {
    /// Compile every enabled kind. Never fails: problems are collected in
    /// `errors()` and the affected matcher is left out.
    pub fn compile(profile: &Profile) -> Self {
        let mut errors = Vec::new();
        let mut effective_patterns = Vec::new();
        let mut entries = Vec::new();

        for identity in profile.identities() {
            if profile.is_ignored(&identity.name) {
                continue;
            }
            let surfaces = std::iter::once(&identity.name).chain(identity.aliases.iter());
            for surface in surfaces {
                if profile.is_ignored(surface) {
                    continue;
                }
                match parse_entry(surface) {
                    Ok(entry) => {
                        effective_patterns.push(surface.clone());
                        entries.push(entry);
                    }
                    Err(err) => {
                        tracing::warn!(pattern = %surface, error = %err.message, "roster entry rejected");
                        errors.push(err);
                    }
                }
            }
        }

        let names = alternation(&entries);
        let attribution_verbs = word_alternation(&profile.attribution_verbs);
        let action_verbs = word_alternation(&profile.action_verbs);
        let pronouns = word_alternation(&profile.pronoun_vocabulary);
        let pronoun_verbs = word_alternation(
            &profile
                .action_verbs
                .iter()
                .chain(profile.attribution_verbs.iter())
                .cloned()
                .collect::<Vec<_>>(),
        );

        let mut matchers: [Option<Regex>; 8] = Default::default();
        let mut fallback: [Option<Regex>; 8] = Default::default();
        let mut reach = Some(0);

        let name_chars = literal_chars(&entries);
        let veto_entries: Vec<ParsedEntry> = profile
            .veto_patterns
            .iter()
            .filter_map(|raw| parse_entry(raw).ok())
            .collect();
        let verb_chars = |kind: MatchKind| match kind {
            MatchKind::Attribution => word_chars(&profile.attribution_verbs),
            MatchKind::Action => word_chars(&profile.action_verbs),
            MatchKind::Pronoun => word_chars(&profile.action_verbs).max(word_chars(&profile.attribution_verbs)),
            _ => 0,
        };

        for kind in MatchKind::ALL {
            if !profile.detection.enabled(kind) {
                continue;
            }
            let compiled = match kind {
                MatchKind::Veto => Self::compile_veto(profile, &mut errors),
                MatchKind::Pronoun => match (&names, &pronouns) {
                    // Pronouns only ever resolve to roster members
                    (Some(_), Some(pronouns)) => template(kind, pronouns, pronoun_verbs.as_deref())
                        .map(|source| build(kind, &source, EntryFlags::default())),
                    _ => None,
                },
                _ => {
                    let verbs = match kind {
                        MatchKind::Attribution => attribution_verbs.as_deref(),
                        MatchKind::Action => action_verbs.as_deref(),
                        _ => None,
                    };
                    names.as_ref().and_then(|(alt, flags)| {
                        template(kind, alt, verbs).map(|source| build(kind, &source, *flags))
                    })
                }
            };

            if matches!(compiled, Some(Ok(_))) {
                let chars = match kind {
                    MatchKind::Veto => literal_chars(&veto_entries),
                    MatchKind::Pronoun => Some(word_chars(&profile.pronoun_vocabulary)),
                    _ => name_chars,
                };
                reach = reach.zip(chars).map(|(r, n)| r.max(template_reach(kind, n, verb_chars(kind))));
            }

            match compiled {
                Some(Ok(regex)) => matchers[kind.index()] = Some(regex),
                Some(Err(err)) => {
                    tracing::warn!(kind = kind.as_str(), error = %err.message, "matcher disabled");
                    errors.push(err);
                }
                None => {}
            }

            if profile.fuzzy_tolerance.is_enabled() && names.is_some() && Self::has_fallback(kind) {
                let generic = if profile.fuzzy_scan_lowercase {
                    GENERIC_ANY
                } else {
                    GENERIC_CAPITALIZED
                };
                let verbs = match kind {
                    MatchKind::Attribution => attribution_verbs.as_deref(),
                    MatchKind::Action => action_verbs.as_deref(),
                    _ => None,
                };
                if let Some(source) = template(kind, generic, verbs) {
                    match build(kind, &source, EntryFlags::default()) {
                        Ok(regex) => {
                            reach = reach.map(|r| r.max(template_reach(kind, GENERIC_CHARS, verb_chars(kind))));
                            fallback[kind.index()] = Some(regex);
                        }
                        Err(err) => errors.push(err),
                    }
                }
            }
        }

        let set = Self {
            matchers,
            fallback,
            effective_patterns,
            errors,
            fingerprint: profile.pattern_fingerprint(),
            reach,
        };
        tracing::debug!(
            patterns = set.effective_patterns.len(),
            kinds = set.enabled_kinds().count(),
            errors = set.errors.len(),
            reach = ?set.reach,
            "matcher set compiled"
        );
        set
    }

    fn compile_veto(profile: &Profile, errors: &mut Vec<CompileError>) -> Option<Result<Regex, CompileError>> {
        let entries: Vec<ParsedEntry> = profile
            .veto_patterns
            .iter()
            .filter_map(|raw| match parse_entry(raw) {
                Ok(entry) => Some(entry),
                Err(err) => {
                    errors.push(err);
                    None
                }
            })
            .collect();
        let (source, flags) = alternation(&entries)?;
        Some(build(MatchKind::Veto, &source, flags))
    }

    /// Strong structural kinds get a generic-name fallback for fuzzy rescue
    fn has_fallback(kind: MatchKind) -> bool {
        matches!(
            kind,
            MatchKind::Speaker | MatchKind::Attribution | MatchKind::Action | MatchKind::Vocative
        )
    }

    /// Longest match any compiled matcher can produce, in bytes. A scan that
    /// resumes at offset `k` must start searching this far before `k`.
    pub fn max_reach(&self) -> Option<usize> {
        self.reach
    }

    pub fn get(&self, kind: MatchKind) -> Option<&Regex> {
        self.matchers[kind.index()].as_ref()
    }

    pub fn fallback(&self, kind: MatchKind) -> Option<&Regex> {
        self.fallback[kind.index()].as_ref()
    }

    pub fn enabled_kinds(&self) -> impl Iterator<Item = MatchKind> + '_ {
        MatchKind::ALL
            .into_iter()
            .filter(move |kind| self.matchers[kind.index()].is_some())
    }

    /// False in the fully-degraded state (every roster name ignored)
    pub fn has_name_matchers(&self) -> bool {
        MatchKind::ALL
            .into_iter()
            .filter(|kind| kind.is_name_bearing())
            .any(|kind| self.matchers[kind.index()].is_some())
    }

    pub fn effective_patterns(&self) -> &[String] {
        &self.effective_patterns
    }

    pub fn errors(&self) -> &[CompileError] {
        &self.errors
    }

    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }
}

// ==================== TESTS ====================
