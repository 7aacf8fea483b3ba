//! Document segmentation: ordered, overlapping, size-bounded text segments.
//!
//! [`TokenSegmenter`] works on estimated tokens (~4 chars per token). It
//! first breaks the text into pieces no larger than the target size, trying
//! paragraph, line, sentence and word boundaries in that order, and then
//! packs those pieces greedily into segments. Each new segment starts with
//! the trailing pieces of the previous one, up to `overlap` tokens, so the
//! model always sees some context across a segment boundary.

use std::collections::VecDeque;
use std::path::Path;

use crate::error::{ConfigError, SegmentationError};

/// Splits a document into an ordered sequence of text segments.
///
/// Implementations must be deterministic: the same document always yields
/// the same segments, since segment indices are the addressing scheme of the
/// whole conversion.
pub trait Segmenter: Send + Sync {
    fn segment(&self, document: &str) -> Result<Vec<String>, SegmentationError>;
}

/// Estimate token count using the ~4 chars per token heuristic.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Read a UTF-8 document from disk.
pub fn load_document(path: impl AsRef<Path>) -> Result<String, SegmentationError> {
    let path = path.as_ref();
    std::fs::read_to_string(path).map_err(|source| SegmentationError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Recursive boundary splitter with token overlap.
#[derive(Debug, Clone)]
pub struct TokenSegmenter {
    chunk_size: usize,
    overlap: usize,
    separators: Vec<&'static str>,
}

impl TokenSegmenter {
    /// `chunk_size` must be positive and strictly larger than `overlap`.
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self, ConfigError> {
        if chunk_size == 0 || overlap >= chunk_size {
            return Err(ConfigError::InvalidSegmentSizes {
                chunk_size,
                overlap,
            });
        }
        Ok(Self {
            chunk_size,
            overlap,
            separators: vec!["\n\n", "\n", ". ", " "],
        })
    }

    /// Break `text` into pieces of at most `chunk_size` tokens. Separators
    /// stay attached to the piece they end, so concatenating the pieces
    /// reproduces the input.
    fn split_pieces<'t>(&self, text: &'t str, depth: usize, out: &mut Vec<&'t str>) {
        if estimate_tokens(text) <= self.chunk_size {
            out.push(text);
            return;
        }

        match self.separators.get(depth) {
            Some(sep) => {
                for piece in text.split_inclusive(sep) {
                    self.split_pieces(piece, depth + 1, out);
                }
            }
            None => self.hard_split(text, out),
        }
    }

    /// Last resort for a single run of text with no separator: cut on char
    /// boundaries.
    fn hard_split<'t>(&self, text: &'t str, out: &mut Vec<&'t str>) {
        let max_chars = self.chunk_size.saturating_mul(4);
        let mut start = 0;
        let mut chars = 0;
        for (idx, _) in text.char_indices() {
            if chars == max_chars {
                #[allow(clippy::string_slice)] // both ends come from char_indices
                out.push(&text[start..idx]);
                start = idx;
                chars = 0;
            }
            chars += 1;
        }
        if start < text.len() {
            #[allow(clippy::string_slice)] // start comes from char_indices
            out.push(&text[start..]);
        }
    }

    fn merge_pieces(&self, pieces: &[&str]) -> Vec<String> {
        let mut segments = Vec::new();
        let mut window: VecDeque<(&str, usize)> = VecDeque::new();
        let mut window_tokens = 0;

        for &piece in pieces {
            let tokens = estimate_tokens(piece);

            if window_tokens + tokens > self.chunk_size && !window.is_empty() {
                push_segment(&mut segments, &window);

                // Keep a tail of at most `overlap` tokens that still leaves
                // room for the incoming piece.
                while let Some(&(_, front)) = window.front()
                    && (window_tokens > self.overlap || window_tokens + tokens > self.chunk_size)
                {
                    window.pop_front();
                    window_tokens -= front;
                }
            }

            window.push_back((piece, tokens));
            window_tokens += tokens;
        }

        if !window.is_empty() {
            push_segment(&mut segments, &window);
        }
        segments
    }
}

fn push_segment(segments: &mut Vec<String>, window: &VecDeque<(&str, usize)>) {
    let text: String = window.iter().map(|(piece, _)| *piece).collect();
    let text = text.trim();
    if !text.is_empty() {
        segments.push(text.to_string());
    }
}

impl Segmenter for TokenSegmenter {
    fn segment(&self, document: &str) -> Result<Vec<String>, SegmentationError> {
        if document.trim().is_empty() {
            return Err(SegmentationError::EmptyDocument);
        }

        let mut pieces = Vec::new();
        self.split_pieces(document, 0, &mut pieces);
        let segments = self.merge_pieces(&pieces);

        if segments.is_empty() {
            return Err(SegmentationError::NoSegments);
        }
        Ok(segments)
    }
}
