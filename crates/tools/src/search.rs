//! Search tool and an in-memory keyword [`Retriever`].

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use taskloom_core::error::{RetrievalError, ToolError};
use taskloom_core::retrieval::{Retriever, SearchHit};
use taskloom_core::tool::{Tool, ToolParameter};

const DEFAULT_TOP_K: usize = 5;
const MAX_TOP_K: usize = 50;

/// Queries the injected retrieval service.
pub struct SearchTool {
    retriever: Arc<dyn Retriever>,
}

impl SearchTool {
    pub fn new(retriever: Arc<dyn Retriever>) -> Self {
        Self { retriever }
    }
}

#[async_trait]
impl Tool for SearchTool {
    fn name(&self) -> &str {
        "search"
    }

    fn description(&self) -> &str {
        "Search the knowledge corpus and return the most relevant passages."
    }

    fn category(&self) -> &str {
        "retrieval"
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::required("query", "string", "What to search for"),
            ToolParameter::optional("top_k", "integer", "Maximum number of hits (default 5)"),
        ]
    }

    async fn execute(&self, arguments: Value) -> Result<Value, ToolError> {
        let query = arguments["query"]
            .as_str()
            .filter(|q| !q.trim().is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'query' argument".into()))?;
        let top_k = arguments["top_k"]
            .as_u64()
            .map(|k| (k as usize).clamp(1, MAX_TOP_K))
            .unwrap_or(DEFAULT_TOP_K);

        let hits = self
            .retriever
            .search(query, top_k)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "search".into(),
                reason: e.to_string(),
            })?;

        serde_json::to_value(hits).map_err(|e| ToolError::ExecutionFailed {
            tool_name: "search".into(),
            reason: e.to_string(),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
struct Document {
    id: String,
    content: String,
    #[serde(default)]
    metadata: serde_json::Map<String, Value>,
}

/// Naive keyword retriever over documents held in memory.
///
/// Scores by query-term occurrences, normalized by document length.
#[derive(Debug, Default)]
pub struct KeywordRetriever {
    documents: Vec<Document>,
}

impl KeywordRetriever {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(
        mut self,
        id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        self.documents.push(Document {
            id: id.into(),
            content: content.into(),
            metadata: serde_json::Map::new(),
        });
        self
    }

    /// Load a JSON array of `{id, content, metadata?}` documents.
    pub fn from_json_file(path: &Path) -> Result<Self, RetrievalError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            RetrievalError::SearchFailed(format!("reading {}: {e}", path.display()))
        })?;
        let documents: Vec<Document> = serde_json::from_str(&raw).map_err(|e| {
            RetrievalError::SearchFailed(format!("parsing {}: {e}", path.display()))
        })?;
        Ok(Self { documents })
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

#[async_trait]
impl Retriever for KeywordRetriever {
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>, RetrievalError> {
        let terms: Vec<String> = query
            .split_whitespace()
            .map(|t| t.to_lowercase())
            .collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut hits: Vec<SearchHit> = self
            .documents
            .iter()
            .filter_map(|doc| {
                let haystack = doc.content.to_lowercase();
                let occurrences: usize = terms.iter().map(|t| haystack.matches(t.as_str()).count()).sum();
                if occurrences == 0 {
                    return None;
                }
                Some(SearchHit {
                    id: doc.id.clone(),
                    content: doc.content.clone(),
                    score: occurrences as f32 / (doc.content.len() as f32 / 100.0).max(1.0),
                    metadata: doc.metadata.clone(),
                })
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);
        Ok(hits)
    }
}
