//! Header-aware document chunking.
//!
//! This module provides the [`Chunker`] trait and [`RecursiveChunker`], which
//! splits each page hierarchically by an ordered list of boundary markers
//! (section headings first, then paragraphs, lines, and words) and merges the
//! resulting pieces back into overlapping chunks of bounded size.

use std::collections::VecDeque;

use crate::config::RagConfig;
use crate::document::{Chunk, Document};
use crate::error::{RagError, Result};

/// Boundary markers tried in order, from section headings of the indexed
/// guide down to single spaces.
pub const DEFAULT_BOUNDARY_MARKERS: &[&str] = &[
    "\nIntroduction",
    "\nGenerative AI options",
    "\nCustom RAG architectures",
    "\nRetrievers",
    "\n\n",
    "\n",
    " ",
];

/// A strategy for splitting documents into chunks.
pub trait Chunker: Send + Sync {
    /// Split a document into chunks with contiguous `sequence_index` values.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::DocumentEmpty`] if the document has no
    /// non-whitespace text.
    fn chunk(&self, document: &Document) -> Result<Vec<Chunk>>;
}

/// Splits text recursively at boundary markers, then merges pieces up to
/// `chunk_size` characters with up to `chunk_overlap` characters of overlap.
///
/// Markers are matched literally and kept at the start of the piece that
/// follows them, so a heading stays attached to its section body. A marker
/// with any non-whitespace character is a heading marker: a piece it
/// introduces always opens a new chunk. Text that no marker can bound is
/// split on raw character counts.
///
/// Pages are hard boundaries. No chunk spans two pages and no overlap is
/// carried from one page to the next.
///
/// # Example
///
/// ```rust,ignore
/// use docsearch_rag::RecursiveChunker;
///
/// let chunker = RecursiveChunker::with_default_markers(1200, 200)?;
/// let chunks = chunker.chunk(&document)?;
/// ```
#[derive(Debug, Clone)]
pub struct RecursiveChunker {
    chunk_size: usize,
    chunk_overlap: usize,
    boundary_markers: Vec<String>,
}

impl RecursiveChunker {
    /// Create a new `RecursiveChunker`.
    ///
    /// # Arguments
    ///
    /// * `chunk_size`: maximum number of characters per chunk
    /// * `chunk_overlap`: maximum number of characters repeated between consecutive chunks
    /// * `boundary_markers`: split points, most specific first
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidParameter`] unless `chunk_size > chunk_overlap`
    /// and every marker is non-empty.
    pub fn new<I, S>(chunk_size: usize, chunk_overlap: usize, boundary_markers: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if chunk_size == 0 || chunk_overlap >= chunk_size {
            return Err(RagError::InvalidParameter(format!(
                "chunk_size ({chunk_size}) must be greater than chunk_overlap ({chunk_overlap})"
            )));
        }
        let boundary_markers: Vec<String> = boundary_markers.into_iter().map(Into::into).collect();
        if boundary_markers.iter().any(String::is_empty) {
            return Err(RagError::InvalidParameter(
                "boundary markers must not be empty strings".to_string(),
            ));
        }
        Ok(Self { chunk_size, chunk_overlap, boundary_markers })
    }

    /// Create a chunker using [`DEFAULT_BOUNDARY_MARKERS`].
    pub fn with_default_markers(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        Self::new(chunk_size, chunk_overlap, DEFAULT_BOUNDARY_MARKERS.iter().copied())
    }

    /// Create a chunker from the chunking fields of a [`RagConfig`].
    pub fn from_config(config: &RagConfig) -> Result<Self> {
        Self::new(config.chunk_size, config.chunk_overlap, config.boundary_markers.iter().cloned())
    }

    /// The boundary markers in the order they are tried.
    pub fn boundary_markers(&self) -> &[String] {
        &self.boundary_markers
    }
}

/// A byte range of page text that is never split further.
#[derive(Debug, Clone, Copy)]
struct Piece {
    start: usize,
    end: usize,
    chars: usize,
    /// Introduced by a heading marker; must open a new chunk.
    heading: bool,
}

fn is_heading_marker(marker: &str) -> bool {
    marker.chars().any(|c| !c.is_whitespace())
}

/// Split `text` before every occurrence of `marker`, so each returned
/// segment after the first starts with the marker. Offsets are relative to
/// `text`; empty segments are omitted.
fn split_before<'a>(text: &'a str, marker: &str) -> Vec<(usize, &'a str)> {
    let mut segments = Vec::new();
    let mut start = 0;
    for (pos, _) in text.match_indices(marker) {
        if pos > start {
            segments.push((start, &text[start..pos]));
        }
        start = pos;
    }
    if start < text.len() {
        segments.push((start, &text[start..]));
    }
    segments
}

/// Recursively break `text` into pieces of at most `chunk_size` characters.
///
/// The first marker that occurs anywhere in `text` is used; segments still
/// too long are retried with the remaining markers.
fn collect_pieces(
    text: &str,
    offset: usize,
    leading_heading: bool,
    markers: &[String],
    chunk_size: usize,
    out: &mut Vec<Piece>,
) {
    let chars = text.chars().count();
    if chars <= chunk_size {
        if chars > 0 {
            out.push(Piece { start: offset, end: offset + text.len(), chars, heading: leading_heading });
        }
        return;
    }

    let Some(pos) = markers.iter().position(|m| text.contains(m.as_str())) else {
        split_by_chars(text, offset, leading_heading, chunk_size, out);
        return;
    };
    let marker = markers[pos].as_str();
    let remaining = &markers[pos + 1..];
    let heading_marker = is_heading_marker(marker);

    for (start, segment) in split_before(text, marker) {
        let heading =
            (start == 0 && leading_heading) || (heading_marker && segment.starts_with(marker));
        collect_pieces(segment, offset + start, heading, remaining, chunk_size, out);
    }
}

/// Raw character-count split, the fallback once no marker applies.
fn split_by_chars(
    text: &str,
    offset: usize,
    leading_heading: bool,
    chunk_size: usize,
    out: &mut Vec<Piece>,
) {
    let mut start = 0;
    let mut chars = 0;
    for (i, _) in text.char_indices() {
        if chars == chunk_size {
            out.push(Piece {
                start: offset + start,
                end: offset + i,
                chars,
                heading: leading_heading && start == 0,
            });
            start = i;
            chars = 0;
        }
        chars += 1;
    }
    if chars > 0 {
        out.push(Piece {
            start: offset + start,
            end: offset + text.len(),
            chars,
            heading: leading_heading && start == 0,
        });
    }
}

/// Re-split the piece after a heading when the two do not fit in one chunk,
/// so that the heading's chunk can open with the start of its section body.
fn fit_after_headings(text: &str, pieces: Vec<Piece>, markers: &[String], chunk_size: usize) -> Vec<Piece> {
    let mut out = Vec::with_capacity(pieces.len());
    let mut rest = pieces.into_iter().peekable();

    while let Some(piece) = rest.next() {
        out.push(piece);
        if !piece.heading || piece.chars >= chunk_size {
            continue;
        }
        let Some(&next) = rest.peek() else { continue };
        if next.heading || piece.chars + next.chars <= chunk_size {
            continue;
        }
        rest.next();

        let budget = chunk_size - piece.chars;
        let mut lead = Vec::new();
        collect_pieces(&text[next.start..next.end], next.start, false, markers, budget, &mut lead);
        let mut used = 0;
        let mut split_at = next.start;
        for sub in lead {
            if used + sub.chars > budget {
                break;
            }
            used += sub.chars;
            split_at = sub.end;
            out.push(sub);
        }
        collect_pieces(&text[split_at..next.end], split_at, false, markers, chunk_size, &mut out);
    }
    out
}

/// Characters that must fit behind the carried overlap when `pieces[i]`
/// opens a chunk. A heading brings its first body piece along.
fn opening_chars(pieces: &[Piece], i: usize, chunk_size: usize) -> usize {
    let piece = pieces[i];
    match pieces.get(i + 1) {
        Some(next) if piece.heading && !next.heading && piece.chars + next.chars <= chunk_size => {
            piece.chars + next.chars
        }
        _ => piece.chars,
    }
}

/// Merge consecutive pieces into byte ranges of at most `chunk_size`
/// characters. After each emitted range, trailing pieces totalling at most
/// `chunk_overlap` characters are carried into the next one.
fn merge_pieces(pieces: &[Piece], chunk_size: usize, chunk_overlap: usize) -> Vec<(usize, usize)> {
    let mut ranges = Vec::new();
    let mut window: VecDeque<Piece> = VecDeque::new();
    let mut total = 0;

    for (i, &piece) in pieces.iter().enumerate() {
        if piece.heading || total + piece.chars > chunk_size {
            if let Some(range) = window_range(&window) {
                ranges.push(range);
                let opening = opening_chars(pieces, i, chunk_size);
                while total > chunk_overlap || (total > 0 && total + opening > chunk_size) {
                    match window.pop_front() {
                        Some(dropped) => total -= dropped.chars,
                        None => break,
                    }
                }
            }
        }
        window.push_back(piece);
        total += piece.chars;
    }

    ranges.extend(window_range(&window));
    ranges
}

fn window_range(window: &VecDeque<Piece>) -> Option<(usize, usize)> {
    Some((window.front()?.start, window.back()?.end))
}

impl Chunker for RecursiveChunker {
    fn chunk(&self, document: &Document) -> Result<Vec<Chunk>> {
        if document.is_empty() {
            return Err(RagError::DocumentEmpty);
        }

        let mut chunks = Vec::new();
        for (index, page) in document.pages().iter().enumerate() {
            let page_start = document.page_start(index).unwrap_or_default();
            let mut pieces = Vec::new();
            collect_pieces(&page.text, 0, false, &self.boundary_markers, self.chunk_size, &mut pieces);
            let pieces = fit_after_headings(&page.text, pieces, &self.boundary_markers, self.chunk_size);

            for (start, end) in merge_pieces(&pieces, self.chunk_size, self.chunk_overlap) {
                let raw = &page.text[start..end];
                let text = raw.trim();
                if text.is_empty() {
                    continue;
                }
                let start_offset = page_start + start + (raw.len() - raw.trim_start().len());
                chunks.push(Chunk {
                    text: text.to_string(),
                    source_page: document.page_for_offset(start_offset).unwrap_or(page.number),
                    sequence_index: chunks.len(),
                    start_offset,
                });
            }
        }

        if chunks.is_empty() {
            return Err(RagError::DocumentEmpty);
        }
        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Page;

    fn texts(chunks: &[Chunk]) -> Vec<&str> {
        chunks.iter().map(|c| c.text.as_str()).collect()
    }

    fn guide() -> Document {
        Document::new(vec![
            Page::new(0, "Introduction\nThis guide covers RAG."),
            Page::new(1, "Retrievers\nFAISS is a vector index."),
        ])
    }

    #[test]
    fn heading_stays_with_following_sentence() {
        let chunker = RecursiveChunker::with_default_markers(20, 5).unwrap();
        let chunks = chunker.chunk(&guide()).unwrap();

        assert!(chunks.len() >= 2);
        let heading = chunks.iter().find(|c| c.text.starts_with("Retrievers")).unwrap();
        assert_eq!(heading.source_page, 1);
        assert!(heading.text.contains("FAISS"), "heading orphaned: {:?}", heading.text);
        assert!(chunks.iter().filter(|c| c.text.starts_with("Introduction")).all(|c| c.source_page == 0));
    }

    #[test]
    fn scenario_chunks_are_exact() {
        let chunker = RecursiveChunker::with_default_markers(20, 5).unwrap();
        let chunks = chunker.chunk(&guide()).unwrap();
        assert_eq!(
            texts(&chunks),
            vec![
                "Introduction\nThis",
                "This guide covers",
                "RAG.",
                "Retrievers\nFAISS is",
                "is a vector index."
            ]
        );
        let pages: Vec<usize> = chunks.iter().map(|c| c.source_page).collect();
        assert_eq!(pages, vec![0, 0, 0, 1, 1]);
    }

    #[test]
    fn heading_marker_starts_a_new_chunk() {
        let doc = Document::new(vec![Page::new(
            0,
            "Some preamble text.\nRetrievers\nKendra and OpenSearch are retrievers.\nMore words follow here to pad.",
        )]);
        let chunker = RecursiveChunker::with_default_markers(50, 0).unwrap();
        let chunks = chunker.chunk(&doc).unwrap();
        assert_eq!(
            texts(&chunks),
            vec![
                "Some preamble text.",
                "Retrievers\nKendra and OpenSearch are retrievers.",
                "More words follow here to pad."
            ]
        );
    }

    #[test]
    fn overlap_before_heading_yields_to_its_body() {
        let doc = Document::new(vec![Page::new(0, "aaaa bbbb cccc dddd eeee ff\nRetrievers\nFAISSab cd")]);
        let chunker = RecursiveChunker::with_default_markers(20, 5).unwrap();
        let chunks = chunker.chunk(&doc).unwrap();
        assert_eq!(
            texts(&chunks),
            vec!["aaaa bbbb cccc dddd", "dddd eeee ff", "Retrievers\nFAISSab", "cd"]
        );
        assert!(chunks.iter().all(|c| !c.text.ends_with("Retrievers")));
    }

    #[test]
    fn heading_keeps_overlap_when_body_fits() {
        let doc = Document::new(vec![Page::new(0, "aaaa bbbb cccc dddd ee\nRetrievers\nFAISS")]);
        let chunker = RecursiveChunker::with_default_markers(20, 3).unwrap();
        let chunks = chunker.chunk(&doc).unwrap();
        assert_eq!(texts(&chunks), vec!["aaaa bbbb cccc dddd", "ee", "ee\nRetrievers\nFAISS"]);
    }

    #[test]
    fn overlap_repeats_trailing_words() {
        let doc = Document::new(vec![Page::new(0, "one two three four five six seven eight")]);
        let chunker = RecursiveChunker::new(14, 6, [" "]).unwrap();
        let chunks = chunker.chunk(&doc).unwrap();
        assert_eq!(texts(&chunks), vec!["one two three", "three four", "four five six", "six seven", "seven eight"]);
    }

    #[test]
    fn unbounded_text_falls_back_to_character_split() {
        let doc = Document::new(vec![Page::new(0, "abcdefghijklmnopqrstuvwxyz")]);
        let chunker = RecursiveChunker::new(10, 0, ["\n\n", " "]).unwrap();
        let chunks = chunker.chunk(&doc).unwrap();
        assert_eq!(texts(&chunks), vec!["abcdefghij", "klmnopqrst", "uvwxyz"]);
    }

    #[test]
    fn character_split_counts_chars_not_bytes() {
        let doc = Document::new(vec![Page::new(0, "ééééé")]);
        let chunker = RecursiveChunker::new(2, 0, [" "]).unwrap();
        let chunks = chunker.chunk(&doc).unwrap();
        assert_eq!(texts(&chunks), vec!["éé", "éé", "é"]);
        assert_eq!(chunks[1].start_offset, 4);
    }

    #[test]
    fn chunks_never_span_pages() {
        let doc = Document::new(vec![Page::new(0, "alpha beta"), Page::new(1, "gamma delta")]);
        let chunker = RecursiveChunker::with_default_markers(100, 10).unwrap();
        let chunks = chunker.chunk(&doc).unwrap();
        assert_eq!(texts(&chunks), vec!["alpha beta", "gamma delta"]);
        assert_eq!(chunks[1].start_offset, 11);
        assert_eq!(chunks[1].source_page, 1);
    }

    #[test]
    fn blank_pages_are_skipped() {
        let doc = Document::new(vec![Page::new(0, "   "), Page::new(1, "content")]);
        let chunks = RecursiveChunker::with_default_markers(50, 5).unwrap().chunk(&doc).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].source_page, 1);
        assert_eq!(chunks[0].sequence_index, 0);
    }

    #[test]
    fn empty_document_is_rejected() {
        let chunker = RecursiveChunker::with_default_markers(20, 5).unwrap();
        assert!(matches!(chunker.chunk(&Document::new(Vec::new())), Err(RagError::DocumentEmpty)));
        let blank = Document::new(vec![Page::new(0, "\n\n  ")]);
        assert!(matches!(chunker.chunk(&blank), Err(RagError::DocumentEmpty)));
    }

    #[test]
    fn rejects_overlap_not_below_size() {
        assert!(matches!(
            RecursiveChunker::with_default_markers(10, 10),
            Err(RagError::InvalidParameter(_))
        ));
        assert!(matches!(RecursiveChunker::new(10, 2, [""]), Err(RagError::InvalidParameter(_))));
    }

    #[test]
    fn split_before_keeps_marker_on_following_segment() {
        let segments = split_before("a\nb\nc", "\n");
        assert_eq!(segments, vec![(0, "a"), (1, "\nb"), (3, "\nc")]);
        assert_eq!(split_before("\nx", "\n"), vec![(0, "\nx")]);
    }
}
