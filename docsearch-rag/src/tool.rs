//! The search operation exposed to orchestrators.
//!
//! [`DocumentSearchTool`] resolves the index through an [`IndexStore`], runs
//! the [`Retriever`], and renders the results as evidence blocks that an
//! agent can cite.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use docsearch_rag::{DocumentSearchTool, IndexStore, RagConfig};
//!
//! let store = Arc::new(IndexStore::from_config(RagConfig::default(), embedder)?);
//! let tool = DocumentSearchTool::from_store(store);
//!
//! // The agent calls the tool with: { "query": "What is Amazon Kendra?" }
//! let evidence = tool.run("What is Amazon Kendra?").await?;
//! ```

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{error, info};

use crate::document::SearchResult;
use crate::error::{RagError, Result};
use crate::retriever::Retriever;
use crate::store::IndexStore;

/// Placed between evidence blocks.
pub const BLOCK_SEPARATOR: &str = "\n\n---\n\n";

/// Rendered when retrieval succeeds but no passage clears the threshold.
pub const NO_EVIDENCE: &str = "No relevant passages found in the indexed document.";

/// A search tool over one indexed document.
///
/// Safe to share across tasks; concurrent first calls trigger a single build.
pub struct DocumentSearchTool {
    store: Arc<IndexStore>,
    retriever: Retriever,
    top_k: usize,
}

impl DocumentSearchTool {
    pub fn new(store: Arc<IndexStore>, retriever: Retriever, top_k: usize) -> Self {
        Self { store, retriever, top_k }
    }

    /// Use the store's embedder, threshold, and `top_k`.
    pub fn from_store(store: Arc<IndexStore>) -> Self {
        let config = store.config();
        let retriever = Retriever::new(Arc::clone(store.embedder()))
            .with_similarity_threshold(config.similarity_threshold);
        let top_k = config.top_k;
        Self::new(store, retriever, top_k)
    }

    pub fn name(&self) -> &str {
        "document_search"
    }

    pub fn description(&self) -> &str {
        "Search the indexed technical document for passages relevant to a question. \
         Returns evidence blocks with a page identifier, a confidence score, and the passage text."
    }

    /// JSON schema of the tool's arguments.
    pub fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The question or keywords to search the document for"
                }
            },
            "required": ["query"]
        })
    }

    pub fn store(&self) -> &Arc<IndexStore> {
        &self.store
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Build or load the index, search it, and format the evidence.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidParameter`] for a blank query. Store and
    /// retrieval errors propagate unchanged; a failure is never rendered as
    /// [`NO_EVIDENCE`].
    pub async fn run(&self, query: &str) -> Result<String> {
        self.run_with_top_k(query, self.top_k).await
    }

    /// Like [`run`](Self::run) with an explicit `top_k`.
    pub async fn run_with_top_k(&self, query: &str, top_k: usize) -> Result<String> {
        if query.trim().is_empty() {
            return Err(RagError::InvalidParameter("query must not be blank".into()));
        }
        info!(tool = self.name(), query, top_k, "document_search called");

        let index = self.store.get().await.inspect_err(|e| {
            error!(error = %e, "document_search could not resolve the index");
        })?;
        let results = self.retriever.search(&index, query, top_k).await?;
        Ok(format_results(&results))
    }
}

/// Render results as evidence blocks joined by [`BLOCK_SEPARATOR`].
pub fn format_results(results: &[SearchResult]) -> String {
    if results.is_empty() {
        return NO_EVIDENCE.to_string();
    }
    results.iter().map(format_block).collect::<Vec<_>>().join(BLOCK_SEPARATOR)
}

fn format_block(result: &SearchResult) -> String {
    let page = result.chunk.source_page;
    format!(
        "[ID: p{page}][Confidence: {:.2}][Page: {page}]\n{}",
        result.score,
        escape_separator(&result.chunk.text)
    )
}

/// Rewrite lines that are exactly `---` so no block contains the separator.
fn escape_separator(text: &str) -> String {
    if !text.lines().any(|line| line.trim_end_matches('\r') == "---") {
        return text.to_string();
    }
    text.split('\n')
        .map(|line| if line.trim_end_matches('\r') == "---" { "- - -" } else { line })
        .collect::<Vec<_>>()
        .join("\n")
}
