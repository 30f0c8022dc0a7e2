//! Document loaders: the boundary between a file on disk and ordered pages of text.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error};

use crate::document::{Document, Page};
use crate::error::{RagError, Result};

/// Form feed, the page delimiter in plain-text sources.
pub const PAGE_BREAK: char = '\x0c';

/// Loads a source file into a [`Document`].
#[async_trait]
pub trait DocumentLoader: Send + Sync {
    /// Load the document at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::SourceNotFound`] if `path` does not exist and
    /// [`RagError::Load`] if its content cannot be turned into text.
    async fn load(&self, path: &Path) -> Result<Document>;
}

/// Extracts text page by page from a PDF with `pdf-extract`.
///
/// Pages are numbered from zero in file order. Extraction is CPU bound and
/// runs on the blocking thread pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfLoader;

#[async_trait]
impl DocumentLoader for PdfLoader {
    async fn load(&self, path: &Path) -> Result<Document> {
        let bytes = read_source(path).await?;
        let owned = path.to_path_buf();
        let pages = tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem_by_pages(&bytes))
            .await
            .map_err(|e| load_error(&owned, format!("extraction task failed: {e}")))?
            .map_err(|e| {
                error!(path = %owned.display(), error = %e, "PDF extraction failed");
                load_error(&owned, e.to_string())
            })?;

        debug!(path = %path.display(), pages = pages.len(), "extracted PDF");
        Ok(Document::new(pages.into_iter().enumerate().map(|(i, text)| Page::new(i, text)).collect()))
    }
}

/// Reads UTF-8 text, splitting pages at form feeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextLoader;

#[async_trait]
impl DocumentLoader for TextLoader {
    async fn load(&self, path: &Path) -> Result<Document> {
        let bytes = read_source(path).await?;
        let text = String::from_utf8(bytes).map_err(|e| load_error(path, format!("not UTF-8: {e}")))?;
        Ok(Document::new(text.split(PAGE_BREAK).enumerate().map(|(i, t)| Page::new(i, t)).collect()))
    }
}

/// Pick [`PdfLoader`] for `.pdf` files and [`TextLoader`] for anything else.
pub fn loader_for_path(path: &Path) -> Arc<dyn DocumentLoader> {
    let is_pdf =
        path.extension().and_then(|e| e.to_str()).is_some_and(|e| e.eq_ignore_ascii_case("pdf"));
    if is_pdf { Arc::new(PdfLoader) } else { Arc::new(TextLoader) }
}

async fn read_source(path: &Path) -> Result<Vec<u8>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(RagError::SourceNotFound { path: path.to_path_buf() })
        }
        Err(e) => Err(RagError::io(path, e)),
    }
}

fn load_error(path: &Path, message: String) -> RagError {
    RagError::Load { path: PathBuf::from(path), message }
}
