//! Data types for documents, chunks, and search results.

use serde::{Deserialize, Serialize};

/// Separator placed between pages in [`Document::full_text`].
pub const PAGE_SEPARATOR: &str = "\n";

/// One page of extracted text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Page {
    /// Page number as reported by the loader (zero-based for PDFs).
    pub number: usize,
    /// The extracted text of the page.
    pub text: String,
}

impl Page {
    /// Create a new page.
    pub fn new(number: usize, text: impl Into<String>) -> Self {
        Self { number, text: text.into() }
    }
}

/// A loaded source document: an ordered sequence of pages.
///
/// Page byte ranges inside [`full_text`](Document::full_text) are computed once
/// at construction so that [`page_for_offset`](Document::page_for_offset) is a
/// binary search. Only the pages are serialized; offsets are rebuilt on
/// deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "DocumentPages", into = "DocumentPages")]
pub struct Document {
    pages: Vec<Page>,
    /// Byte offset of each page's first byte in the joined text.
    page_starts: Vec<usize>,
}

#[derive(Serialize, Deserialize)]
struct DocumentPages {
    pages: Vec<Page>,
}

impl From<DocumentPages> for Document {
    fn from(repr: DocumentPages) -> Self {
        Document::new(repr.pages)
    }
}

impl From<Document> for DocumentPages {
    fn from(doc: Document) -> Self {
        DocumentPages { pages: doc.pages }
    }
}

impl Document {
    /// Create a document from its pages, in reading order.
    pub fn new(pages: Vec<Page>) -> Self {
        let mut page_starts = Vec::with_capacity(pages.len());
        let mut offset = 0;
        for (i, page) in pages.iter().enumerate() {
            if i > 0 {
                offset += PAGE_SEPARATOR.len();
            }
            page_starts.push(offset);
            offset += page.text.len();
        }
        Self { pages, page_starts }
    }

    /// The pages of this document.
    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    /// Byte offset of page `index` (position, not page number) in [`full_text`](Self::full_text).
    pub fn page_start(&self, index: usize) -> Option<usize> {
        self.page_starts.get(index).copied()
    }

    /// True when there are no pages, or every page is whitespace.
    pub fn is_empty(&self) -> bool {
        self.pages.iter().all(|p| p.text.trim().is_empty())
    }

    /// All page texts joined by [`PAGE_SEPARATOR`].
    pub fn full_text(&self) -> String {
        self.pages.iter().map(|p| p.text.as_str()).collect::<Vec<_>>().join(PAGE_SEPARATOR)
    }

    /// Return the number of the page whose text range contains `offset`.
    ///
    /// An offset that lands on the separator after a page belongs to that
    /// page. Offsets at or beyond the end of the text return `None`.
    pub fn page_for_offset(&self, offset: usize) -> Option<usize> {
        let last = self.pages.len().checked_sub(1)?;
        let end = self.page_starts[last] + self.pages[last].text.len();
        if offset >= end {
            return None;
        }
        let idx = self.page_starts.partition_point(|&start| start <= offset).saturating_sub(1);
        Some(self.pages[idx].number)
    }
}

/// A contiguous span of document text, the atomic retrieval unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// The chunk text, a verbatim slice of the document text.
    pub text: String,
    /// Number of the page containing the chunk's first byte.
    pub source_page: usize,
    /// Position among all chunks of the document, in insertion order.
    pub sequence_index: usize,
    /// Byte offset of the chunk's first byte in [`Document::full_text`].
    pub start_offset: usize,
}

/// A retrieved [`Chunk`] paired with a relevance score.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    /// The retrieved chunk.
    pub chunk: Chunk,
    /// Relevance in `[0, 1]`, higher is more relevant.
    pub score: f32,
}
