//! Retriever trait: the seam to the retrieval / search service.
//!
//! Index construction is somebody else's problem; the engines only ask
//! for the top-k hits for a query.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RetrievalError;

/// One search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub content: String,
    pub score: f32,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

#[async_trait]
pub trait Retriever: Send + Sync {
    /// Return at most `top_k` hits, best first.
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>, RetrievalError>;
}
