//! Quote-Span Scanner
//!
//! Classifies byte positions as dialogue (inside quotes) or narration with a
//! single left-to-right pass over a table of quote pairs. State is kept per
//! streaming buffer so re-scans only touch newly appended text.
//!
//! # Marker rules
//! - **Symmetric** (`"…"`, `'…'`): a glyph closes the nearest open marker of
//!   the same family, otherwise opens a new one.
//! - **Asymmetric** (`“…”`, `«…»`, `「…」`): a closing glyph pairs with the
//!   nearest compatible open marker, discarding unmatched markers above it.
//! - **Apostrophe-sensitive** families skip glyphs flanked by word characters
//!   on both sides ("don't", "Shido's").

use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Opening glyph, closing glyph, apostrophe-sensitive
const QUOTE_PAIRS: &[(char, char, bool)] = &[
    ('"', '"', false),
    ('“', '”', false),
    ('«', '»', false),
    ('‹', '›', false),
    ('「', '」', false),
    ('『', '』', false),
    ('＂', '＂', false),
    ('\'', '\'', true),
    ('‘', '’', true),
];

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

// =============================================================================
// Types
// =============================================================================

/// A quotation marker that has not been closed yet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenQuote {
    /// Index into the quote-pair table
    pub family: usize,
    pub glyph: char,
    pub start: usize,
    /// Open glyph == close glyph (ambiguous with apostrophes for `'`)
    pub symmetric: bool,
}

/// A closed `[start, end)` quoted span, glyphs included
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteRange {
    pub family: usize,
    pub start: usize,
    pub end: usize,
}

impl QuoteRange {
    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    /// Strictly inside: after the opening glyph, before the end
    pub fn contains_strictly(&self, pos: usize) -> bool {
        pos > self.start && pos < self.end
    }
}

/// Per-buffer incremental quote state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuoteSpanState {
    stack: Vec<OpenQuote>,
    closed: Vec<QuoteRange>,
    /// Byte offset up to which text has been consumed
    scanned_to: usize,
}

impl QuoteSpanState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.stack.clear();
        self.closed.clear();
        self.scanned_to = 0;
    }

    pub fn scanned_to(&self) -> usize {
        self.scanned_to
    }

    pub fn open_quotes(&self) -> &[OpenQuote] {
        &self.stack
    }

    /// Closed ranges, sorted by start offset
    pub fn closed(&self) -> &[QuoteRange] {
        &self.closed
    }

    /// Advance over `text` (the whole buffer). With `reset = false` scanning
    /// resumes where the previous call stopped; the caller guarantees the
    /// buffer only grew since then.
    pub fn scan(&mut self, text: &str, reset: bool) {
        if reset || self.scanned_to > text.len() || !text.is_char_boundary(self.scanned_to) {
            self.reset();
        }

        let start = self.scanned_to;
        let mut prev = text[..start].chars().next_back();
        let mut iter = text[start..].char_indices().peekable();

        while let Some((rel, c)) = iter.next() {
            let pos = start + rel;
            let next = iter.peek().map(|&(_, n)| n);

            if let Some(family) = QUOTE_PAIRS.iter().position(|&(o, cl, _)| o == c || cl == c) {
                let sensitive = QUOTE_PAIRS.iter().any(|&(o, cl, s)| s && (o == c || cl == c));
                if sensitive {
                    match next {
                        // Can't tell a contraction from a closing quote until
                        // the next character arrives
                        None => {
                            self.scanned_to = pos;
                            return;
                        }
                        Some(n) if prev.map_or(false, is_word_char) && is_word_char(n) => {
                            prev = Some(c);
                            continue;
                        }
                        _ => {}
                    }
                }
                self.handle_glyph(family, c, pos);
            }
            prev = Some(c);
        }
        self.scanned_to = text.len();
    }

    fn handle_glyph(&mut self, family: usize, glyph: char, pos: usize) {
        let (open, close, _) = QUOTE_PAIRS[family];

        if open == close {
            if let Some(depth) = self.stack.iter().rposition(|q| q.family == family) {
                self.close_at(depth, pos + glyph.len_utf8());
            } else {
                self.stack.push(OpenQuote {
                    family,
                    glyph,
                    start: pos,
                    symmetric: true,
                });
            }
            return;
        }

        if glyph == open {
            self.stack.push(OpenQuote {
                family,
                glyph,
                start: pos,
                symmetric: false,
            });
        } else if let Some(depth) = self.stack.iter().rposition(|q| q.family == family) {
            self.close_at(depth, pos + glyph.len_utf8());
        }
    }

    /// Pair the marker at `depth` with a close ending at `end`. Markers
    /// opened above it were never closed and are dropped.
    fn close_at(&mut self, depth: usize, end: usize) {
        let opened = self.stack[depth];
        self.stack.truncate(depth);
        let range = QuoteRange {
            family: opened.family,
            start: opened.start,
            end,
        };
        let at = self.closed.partition_point(|r| r.start <= range.start);
        self.closed.insert(at, range);
    }

    /// True if `pos` lies strictly inside a closed span or after a marker
    /// that is still open (dialogue in progress).
    pub fn is_quoted(&self, pos: usize) -> bool {
        self.closed.iter().any(|r| r.contains_strictly(pos))
            || self.stack.iter().any(|q| pos > q.start)
    }

    /// Quoted ranges clipped to `[window_start, window_start + len)`.
    /// Open markers extend to the end of the scanned text.
    pub fn ranges_in(&self, window_start: usize, len: usize) -> Vec<Range<usize>> {
        let window_end = window_start.saturating_add(len);
        let open_ranges = self.stack.iter().map(|q| q.start..self.scanned_to.max(q.start + q.glyph.len_utf8()));
        self.closed
            .iter()
            .map(QuoteRange::range)
            .chain(open_ranges)
            .filter_map(|r| {
                let start = r.start.max(window_start);
                let end = r.end.min(window_end);
                (start < end).then_some(start..end)
            })
            .collect()
    }
}

// =============================================================================
// Tests
// =============================================================================
