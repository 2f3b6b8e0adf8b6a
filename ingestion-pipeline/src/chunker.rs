use std::sync::Arc;

use common::storage::types::chunk::Chunk;
use tracing::{debug, warn};
use unicode_normalization::UnicodeNormalization;

/// Token-length function injected into the chunker. The default counts
/// whitespace-separated words, which tracks model tokenizers closely
/// enough for budgeting.
pub type TokenLenFn = dyn Fn(&str) -> usize + Send + Sync;

pub fn whitespace_token_len(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Recursive, separator-priority text splitter.
///
/// Separators are tried coarsest-first (paragraph, line, space, character);
/// pieces are greedily accumulated up to the core budget, and a piece that
/// alone exceeds the budget recurses into the next finer separator. The
/// separator stays attached to the piece before it, so the concatenation
/// of the produced cores reproduces the input byte-for-byte.
///
/// Emitted chunks carry a leading overlap: the trailing `chunk_overlap`
/// tokens of the previous core. The core budget is `chunk_size -
/// chunk_overlap`, so a chunk stays within `chunk_size` tokens after its
/// overlap prefix is added.
pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
    token_len: Arc<TokenLenFn>,
}

impl Chunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            chunk_overlap: chunk_overlap.min(chunk_size.saturating_sub(1)),
            separators: vec![
                "\n\n".to_string(),
                "\n".to_string(),
                " ".to_string(),
                String::new(),
            ],
            token_len: Arc::new(whitespace_token_len),
        }
    }

    pub fn with_separators(mut self, separators: Vec<String>) -> Self {
        self.separators = separators;
        self
    }

    pub fn with_token_len(mut self, token_len: Arc<TokenLenFn>) -> Self {
        self.token_len = token_len;
        self
    }

    fn core_budget(&self) -> usize {
        self.chunk_size.saturating_sub(self.chunk_overlap).max(1)
    }

    /// Split normalized text into budget-bounded cores without overlap.
    /// Concatenating the result reconstructs the input exactly.
    pub fn split_into_cores(&self, text: &str) -> Vec<String> {
        if text.is_empty() {
            return Vec::new();
        }
        self.split_recursive(text, &self.separators)
    }

    /// Produce the final chunks for a document: NFC-normalized text, split
    /// into cores, each non-initial chunk prefixed with the token overlap
    /// carried over from the previous core.
    pub fn chunk_document(&self, document_id: &str, source_file: &str, text: &str) -> Vec<Chunk> {
        let normalized: String = text.nfc().collect();
        let cores = self.split_into_cores(&normalized);
        debug!(
            document_id,
            cores = cores.len(),
            "Split document into cores"
        );

        let mut chunks = Vec::with_capacity(cores.len());
        for (index, core) in cores.iter().enumerate() {
            let emitted = if index == 0 {
                core.clone()
            } else {
                let previous = cores.get(index - 1).map(String::as_str).unwrap_or_default();
                let overlap = self.trailing_tokens(previous, self.chunk_overlap);
                format!("{overlap}{core}")
            };
            let token_len = (self.token_len)(&emitted);
            chunks.push(Chunk::new(document_id, index, emitted, token_len, source_file));
        }
        chunks
    }

    fn split_recursive(&self, text: &str, separators: &[String]) -> Vec<String> {
        let budget = self.core_budget();
        let (separator, rest) = pick_separator(text, separators);
        let pieces = split_keep_separator(text, &separator);

        let mut cores: Vec<String> = Vec::new();
        let mut current = String::new();

        for piece in pieces {
            if piece.is_empty() {
                continue;
            }

            let mut candidate = current.clone();
            candidate.push_str(&piece);
            if (self.token_len)(&candidate) <= budget {
                current = candidate;
                continue;
            }

            if !current.is_empty() {
                cores.push(std::mem::take(&mut current));
            }

            if (self.token_len)(&piece) > budget {
                if rest.is_empty() {
                    // Indivisible and over budget: emit oversized rather
                    // than truncate or drop.
                    warn!(
                        token_len = (self.token_len)(&piece),
                        budget, "Emitting oversized indivisible chunk"
                    );
                    cores.push(piece);
                } else {
                    cores.extend(self.split_recursive(&piece, rest));
                }
            } else {
                current = piece;
            }
        }

        if !current.is_empty() {
            cores.push(current);
        }

        cores
    }

    /// The suffix of `text`, starting at a word boundary, whose token
    /// length fits within `budget`. Keeps trailing separators so the
    /// overlap joins cleanly onto the next core.
    fn trailing_tokens(&self, text: &str, budget: usize) -> String {
        if budget == 0 || text.is_empty() {
            return String::new();
        }

        let mut word_starts = Vec::new();
        let mut prev_was_whitespace = true;
        for (idx, ch) in text.char_indices() {
            let is_whitespace = ch.is_whitespace();
            if prev_was_whitespace && !is_whitespace {
                word_starts.push(idx);
            }
            prev_was_whitespace = is_whitespace;
        }

        let mut best: Option<usize> = None;
        for &start in word_starts.iter().rev() {
            let suffix = text.get(start..).unwrap_or_default();
            if (self.token_len)(suffix) <= budget {
                best = Some(start);
            } else {
                break;
            }
        }

        best.and_then(|start| text.get(start..))
            .unwrap_or_default()
            .to_string()
    }
}

/// First separator that is empty or present in the text, plus the finer
/// separators after it for recursion.
fn pick_separator<'a>(text: &str, separators: &'a [String]) -> (String, &'a [String]) {
    for (idx, sep) in separators.iter().enumerate() {
        if sep.is_empty() || text.contains(sep.as_str()) {
            let rest = separators.get(idx + 1..).unwrap_or_default();
            return (sep.clone(), rest);
        }
    }
    (String::new(), &[])
}

/// Split on `separator`, keeping the separator attached to the preceding
/// piece. An empty separator splits into single characters.
fn split_keep_separator(text: &str, separator: &str) -> Vec<String> {
    if separator.is_empty() {
        return text.chars().map(String::from).collect();
    }

    let raw: Vec<&str> = text.split(separator).collect();
    let last_index = raw.len().saturating_sub(1);
    raw.into_iter()
        .enumerate()
        .map(|(i, piece)| {
            if i < last_index {
                format!("{piece}{separator}")
            } else {
                piece.to_string()
            }
        })
        .collect()
}
