//! Token Projector
//!
//! Bridges byte offsets (what regex matchers report) and token indices (what
//! an external tokenizer reports) so incremental scans can resume "after
//! token N" whatever the tokenizer granularity. Without a tokenizer,
//! whitespace-separated runs stand in as tokens.
//!
//! A streaming buffer grows its projector with `extend`, tokenizing only the
//! newly settled text.
//!
//! Every lookup is total: out-of-range input yields `None` or a clamped
//! boundary, since streaming text routinely has empty or partial token sets.

use serde::{Deserialize, Serialize};

// =============================================================================
// Tokenizer seam
// =============================================================================

/// Tokenizer output: ids, byte offsets and surface chunks, always together
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenizedText {
    pub ids: Vec<u32>,
    /// `[start, end)` byte offsets per token
    pub offsets: Vec<(usize, usize)>,
    pub chunks: Vec<String>,
}

impl TokenizedText {
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}

/// External tokenizer collaborator
pub trait Tokenize {
    fn tokenize(&self, text: &str) -> TokenizedText;
}

/// Fallback tokenizer: every run of non-whitespace chars is a token
#[derive(Debug, Clone, Copy, Default)]
pub struct WhitespaceTokenizer;

impl Tokenize for WhitespaceTokenizer {
    fn tokenize(&self, text: &str) -> TokenizedText {
        let mut out = TokenizedText::default();
        let mut run_start = None;
        // Sentinel whitespace closes a trailing run
        for (i, c) in text.char_indices().chain(std::iter::once((text.len(), ' '))) {
            match (run_start, c.is_whitespace()) {
                (None, false) => run_start = Some(i),
                (Some(start), true) => {
                    out.ids.push(out.offsets.len() as u32);
                    out.offsets.push((start, i));
                    out.chunks.push(text[start..i].to_string());
                    run_start = None;
                }
                _ => {}
            }
        }
        out
    }
}

#[cfg(feature = "hf-tokenizer")]
impl Tokenize for tokenizers::Tokenizer {
    fn tokenize(&self, text: &str) -> TokenizedText {
        match self.encode(text, false) {
            Ok(encoding) => TokenizedText {
                ids: encoding.get_ids().to_vec(),
                offsets: encoding.get_offsets().to_vec(),
                chunks: encoding.get_tokens().to_vec(),
            },
            Err(err) => {
                tracing::warn!(error = %err, "tokenizer failed, using whitespace runs");
                WhitespaceTokenizer.tokenize(text)
            }
        }
    }
}

// =============================================================================
// Projector
// =============================================================================

/// Offset lookups over one token stream
#[derive(Debug, Clone, Default)]
pub struct TokenProjector {
    offsets: Vec<(usize, usize)>,
    text_len: usize,
}

impl TokenProjector {
    /// Use tokenizer offsets, falling back to whitespace runs when the
    /// tokenizer produced nothing for non-empty text.
    pub fn new(text: &str, tokens: Option<&TokenizedText>) -> Self {
        let offsets = match tokens {
            Some(t) if !t.is_empty() || text.trim().is_empty() => {
                let mut offsets: Vec<(usize, usize)> = t
                    .offsets
                    .iter()
                    .map(|&(s, e)| (s.min(text.len()), e.min(text.len()).max(s.min(text.len()))))
                    .collect();
                offsets.sort_by_key(|&(s, e)| (s, e));
                offsets
            }
            _ => WhitespaceTokenizer.tokenize(text).offsets,
        };
        Self {
            offsets,
            text_len: text.len(),
        }
    }

    pub fn from_tokenizer(text: &str, tokenizer: &dyn Tokenize) -> Self {
        let tokens = tokenizer.tokenize(text);
        Self::new(text, Some(&tokens))
    }

    /// Grow over `text[from..]`, which must start at or past the end of every
    /// token already held. Only that slice is tokenized; its offsets are
    /// shifted into `text` coordinates.
    pub fn extend(&mut self, text: &str, from: usize, tokenizer: Option<&dyn Tokenize>) {
        let from = from.max(self.offsets.last().map_or(0, |&(_, end)| end)).min(text.len());
        if text.is_char_boundary(from) && from < text.len() {
            let tail = &text[from..];
            let tokens = tokenizer.map(|t| t.tokenize(tail));
            let local = Self::new(tail, tokens.as_ref());
            self.offsets
                .extend(local.offsets.into_iter().map(|(s, e)| (s + from, e + from)));
        }
        self.text_len = text.len();
    }

    /// Length of the text the offsets were taken from
    pub fn text_len(&self) -> usize {
        self.text_len
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Token containing `index`, or the first token after it
    pub fn ceil_token(&self, index: usize) -> Option<usize> {
        let i = self.offsets.partition_point(|&(_, end)| end <= index);
        (i < self.offsets.len()).then_some(i)
    }

    /// Token containing `index`, or the last token before it
    pub fn floor_token(&self, index: usize) -> Option<usize> {
        let i = self.offsets.partition_point(|&(start, _)| start <= index);
        i.checked_sub(1)
    }

    /// Byte offset where token `token` begins; past the end clamps to text length
    pub fn token_start(&self, token: usize) -> usize {
        self.offsets
            .get(token)
            .map(|&(start, _)| start)
            .unwrap_or(self.text_len)
    }

    /// Inclusive token span `(first, last)` covering `[start, end)`
    pub fn token_span(&self, start: usize, end: usize) -> Option<(usize, usize)> {
        let first = self.ceil_token(start)?;
        let last = self.floor_token(end.saturating_sub(1).max(start))?;
        (first <= last).then_some((first, last))
    }
}

/// Incremental cursor: remembers the last token already reported
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCursor {
    pub last_token: Option<usize>,
}

impl TokenCursor {
    /// First byte offset that still needs scanning
    pub fn resume_offset(&self, projector: &TokenProjector) -> usize {
        match self.last_token {
            Some(token) => projector.token_start(token + 1),
            None => 0,
        }
    }

    /// Advance to the last token that ends at or before `settled`
    pub fn advance(&mut self, projector: &TokenProjector, settled: usize) {
        let Some(token) = projector.floor_token(settled) else {
            return;
        };
        let complete = if projector.offsets[token].1 <= settled {
            Some(token)
        } else {
            token.checked_sub(1)
        };
        if complete > self.last_token {
            self.last_token = complete;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
